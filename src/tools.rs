//! Invocations of the external tools the repack pipeline drives.
//!
//! Every command line is echoed at debug level before it runs and is carried
//! in the error when it fails, so a failed step can be re-run by hand.

use crate::error::{RepackError, Result};
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::Command;

pub const DEFAULT_RESTORE_SYMBOL: &str = "restore-symbol";
pub const DEFAULT_CODESIGN: &str = "codesign";

/// What `codesign -d` prints to stderr for a binary without any signature.
const UNSIGNED_MARKER: &str = "code object is not signed at all";

/// Paths of the programs used to rewrite and re-sign executables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Toolchain {
    pub restore_symbol: PathBuf,
    pub codesign: PathBuf,
}

impl Default for Toolchain {
    fn default() -> Self {
        Self {
            restore_symbol: PathBuf::from(DEFAULT_RESTORE_SYMBOL),
            codesign: PathBuf::from(DEFAULT_CODESIGN),
        }
    }
}

/// Render a command the way it would be typed into a shell.
pub fn display_command(cmd: &Command) -> String {
    let mut parts = vec![quote(cmd.get_program())];
    parts.extend(cmd.get_args().map(quote));
    parts.join(" ")
}

fn quote(arg: &OsStr) -> String {
    let s = arg.to_string_lossy();
    if !s.is_empty() && !s.contains(|c: char| c.is_whitespace() || "'\"$`\\".contains(c)) {
        s.into_owned()
    } else {
        format!("'{}'", s.replace('\'', r"'\''"))
    }
}

/// Run `cmd` to completion and return its stdout; a non-zero exit is an error.
pub fn run_tool(mut cmd: Command) -> Result<Vec<u8>> {
    let command = display_command(&cmd);
    log::debug!("running: {}", command);

    let output = cmd.output().map_err(|e| RepackError::ToolFailed {
        command: command.clone(),
        reason: format!("could not start: {}", e),
    })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let reason = match stderr.trim() {
            "" => output.status.to_string(),
            msg => format!("{}: {}", output.status, msg),
        };
        return Err(RepackError::ToolFailed { command, reason });
    }

    Ok(output.stdout)
}

impl Toolchain {
    pub fn entitlements_command(&self, executable: &Path) -> Command {
        let mut cmd = Command::new(&self.codesign);
        cmd.args(["-d", "--entitlements", ":-"]).arg(executable);
        cmd
    }

    pub fn restore_symbol_command(&self, executable: &Path, symbols: &Path, output: &Path) -> Command {
        let mut cmd = Command::new(&self.restore_symbol);
        cmd.args(["-w", "true", "-s", "false", "-j"])
            .arg(symbols)
            .arg("-o")
            .arg(output)
            .arg(executable);
        cmd
    }

    pub fn sign_command(&self, executable: &Path, entitlements: Option<&Path>) -> Command {
        let mut cmd = Command::new(&self.codesign);
        cmd.args(["--force", "--sign", "-"]);
        if let Some(ent) = entitlements {
            cmd.arg("--entitlements").arg(ent);
        }
        cmd.args(["--timestamp=none", "--generate-entitlement-der"])
            .arg(executable);
        cmd
    }

    /// Entitlements embedded in `executable`, or `None` when it has none.
    ///
    /// An unsigned executable has no entitlements; `codesign` exits non-zero
    /// for it, which is not treated as a failure.
    pub fn extract_entitlements(&self, executable: &Path) -> Result<Option<String>> {
        let stdout = match run_tool(self.entitlements_command(executable)) {
            Ok(stdout) => stdout,
            Err(RepackError::ToolFailed { reason, .. }) if reason.contains(UNSIGNED_MARKER) => {
                log::debug!("{} is not signed", executable.display());
                return Ok(None);
            }
            Err(e) => return Err(e),
        };
        let text = String::from_utf8_lossy(&stdout);
        if text.trim().is_empty() {
            Ok(None)
        } else {
            Ok(Some(text.into_owned()))
        }
    }

    pub fn restore_symbols(&self, executable: &Path, symbols: &Path, output: &Path) -> Result<()> {
        run_tool(self.restore_symbol_command(executable, symbols, output))?;
        Ok(())
    }

    /// Ad-hoc sign `executable`, embedding `entitlements` if given.
    pub fn sign(&self, executable: &Path, entitlements: Option<&Path>) -> Result<()> {
        run_tool(self.sign_command(executable, entitlements))?;
        Ok(())
    }
}
