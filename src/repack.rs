use crate::config::RepackOptions;
use crate::error::{RepackError, Result};
use crate::executable::{EmbeddedExecutable, ProcessedExecutable};
use crate::ipa::{cleanup, create_ipa, extract_ipa, locate_bundle};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tempfile::TempDir;

pub const OUTPUT_SUFFIX: &str = "_repacked";

/// Result of a successful run.
#[derive(Debug)]
pub struct RepackReport {
    pub output: PathBuf,
    pub bundle: PathBuf,
    pub executables: Vec<ProcessedExecutable>,
    /// Set when the working directory was kept.
    pub workdir: Option<PathBuf>,
}

/// `<dir>/<stem>_repacked_<unix seconds>.ipa` next to the input.
pub fn default_output(input: &Path) -> PathBuf {
    let stamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "app".to_string());
    input.with_file_name(format!("{}{}_{}.ipa", stem, OUTPUT_SUFFIX, stamp))
}

fn ensure_ipa_extension(output: PathBuf) -> PathBuf {
    let is_ipa = output
        .extension()
        .map(|e| e.eq_ignore_ascii_case("ipa"))
        .unwrap_or(false);
    if is_ipa {
        output
    } else {
        println!("[?] ipa file extension not detected, appending manually");
        let mut name = output.into_os_string();
        name.push(".ipa");
        PathBuf::from(name)
    }
}

/// The output archive for `options`: the given path or [`default_output`],
/// with `.ipa` appended when missing.
pub fn resolve_output(options: &RepackOptions) -> PathBuf {
    ensure_ipa_extension(
        options
            .output
            .clone()
            .unwrap_or_else(|| default_output(&options.input)),
    )
}

/// A fresh working directory beside `output`, named `<stem>_work_<random>`.
pub fn create_workdir(output: &Path) -> Result<TempDir> {
    let stem = output
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "repack".to_string());
    let parent = match output.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent)?;

    Ok(tempfile::Builder::new()
        .prefix(&format!("{}_work_", stem))
        .tempdir_in(parent)?)
}

/// Unpack, process every mapped executable, and repack.
///
/// Stops at the first error. Executables processed before the failure stay
/// modified in the working directory, which is left on disk for inspection.
pub fn repack(options: &RepackOptions) -> Result<RepackReport> {
    let input = &options.input;
    if !input.is_file() {
        return Err(RepackError::FileNotFound(input.clone()));
    }
    if options.compression_level > 9 {
        return Err(RepackError::InvalidInput(format!(
            "compression level must be 0-9, got {}",
            options.compression_level
        )));
    }

    let output = resolve_output(options);
    if output == *input {
        return Err(RepackError::InvalidInput(
            "output would overwrite the input archive".to_string(),
        ));
    }
    if output.exists() {
        if !options.overwrite {
            return Err(RepackError::InvalidInput(format!(
                "{} already exists, pass --overwrite to replace it",
                output.display()
            )));
        }
        println!("[?] overwriting {}", output.display());
    }

    let workdir = create_workdir(&output)?;
    let unpacked = workdir.path().join("unpacked");
    let transient = workdir.path().join("transient");
    fs::create_dir_all(&transient)?;

    let (bundle, executables) = match run_in(options, &unpacked, &transient, &output) {
        Ok(done) => done,
        Err(e) => {
            log::debug!("aborting after error: {}", e);
            let kept = workdir.keep();
            println!("[!] working directory left at {}", kept.display());
            return Err(e);
        }
    };

    let kept = cleanup(workdir, options.keep_workdir)?;
    if let Some(ref dir) = kept {
        println!("[*] kept working directory {}", dir.display());
    }

    Ok(RepackReport {
        output,
        bundle,
        executables,
        workdir: kept,
    })
}

fn run_in(
    options: &RepackOptions,
    unpacked: &Path,
    transient: &Path,
    output: &Path,
) -> Result<(PathBuf, Vec<ProcessedExecutable>)> {
    println!("[*] extracting...");
    extract_ipa(&options.input, unpacked)?;
    let bundle = locate_bundle(unpacked)?
        .ok_or_else(|| RepackError::InvalidIpa("No .app folder found".to_string()))?;
    println!(
        "[*] extracted {}",
        bundle.file_name().unwrap_or_default().to_string_lossy()
    );

    if options.mappings.is_empty() {
        println!("[?] no executables to process, repacking unchanged");
    }

    let mut processed = Vec::with_capacity(options.mappings.len());
    for (index, mapping) in options.mappings.iter().enumerate() {
        println!("[*] processing {}", mapping.executable.display());
        let exe = EmbeddedExecutable::new(&bundle, mapping)?;
        processed.push(exe.process(&options.tools, transient, index, options.debuggable)?);
    }

    println!("[*] generating...");
    create_ipa(unpacked, output, options.compression_level)?;
    println!("[*] done: {}", output.display());

    Ok((bundle, processed))
}
