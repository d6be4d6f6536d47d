pub mod config;
pub mod entitlements;
pub mod error;
pub mod executable;
pub mod ipa;
pub mod repack;
pub mod tools;

pub use config::{RepackConfig, RepackOptions, SymbolMapping};
pub use entitlements::{make_debuggable, KeyPatch, DEBUGGABLE_KEYS};
pub use error::{RepackError, Result};
pub use executable::{EmbeddedExecutable, ProcessedExecutable};
pub use ipa::{cleanup, create_ipa, extract_ipa, locate_bundle};
pub use repack::{repack, resolve_output, RepackReport};
pub use tools::Toolchain;
