use crate::error::{RepackError, Result};
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;
use zip::CompressionMethod;

pub const BUNDLE_SUFFIX: &str = ".app";

/// Extract every entry of the archive at `ipa_path` into `dest`.
pub fn extract_ipa<P: AsRef<Path>, Q: AsRef<Path>>(ipa_path: P, dest: Q) -> Result<()> {
    let ipa_path = ipa_path.as_ref();
    let dest = dest.as_ref();

    fs::create_dir_all(dest)?;

    let file = File::open(ipa_path)?;
    let mut archive = zip::ZipArchive::new(file)?;

    for i in 0..archive.len() {
        let mut file = archive.by_index(i)?;
        let rel = file.enclosed_name().ok_or_else(|| {
            RepackError::InvalidIpa(format!("entry escapes the archive root: {}", file.name()))
        })?;
        let outpath = dest.join(rel);

        if file.is_dir() {
            fs::create_dir_all(&outpath)?;
            continue;
        }

        if let Some(p) = outpath.parent() {
            fs::create_dir_all(p)?;
        }
        let mut outfile = File::create(&outpath)?;
        io::copy(&mut file, &mut outfile)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Some(mode) = file.unix_mode() {
                fs::set_permissions(&outpath, fs::Permissions::from_mode(mode))?;
            }
        }
    }

    log::debug!("extracted {} entries into {}", archive.len(), dest.display());
    Ok(())
}

/// Find the first directory under `root` whose name ends in `.app`.
pub fn locate_bundle<P: AsRef<Path>>(root: P) -> Result<Option<PathBuf>> {
    for entry in WalkDir::new(root.as_ref()).sort_by_file_name() {
        let entry = entry?;
        if !entry.file_type().is_dir() {
            continue;
        }
        let is_bundle = entry
            .file_name()
            .to_str()
            .map(|name| name.ends_with(BUNDLE_SUFFIX) && name.len() > BUNDLE_SUFFIX.len())
            .unwrap_or(false);
        if is_bundle {
            return Ok(Some(fs::canonicalize(entry.path())?));
        }
    }
    Ok(None)
}

/// Zip the contents of `source_dir` into `output`, naming entries relative to `source_dir`.
///
/// A partially written `output` is removed when packing fails.
pub fn create_ipa<P: AsRef<Path>, Q: AsRef<Path>>(
    source_dir: P,
    output: Q,
    compression_level: u32,
) -> Result<()> {
    let source_dir = source_dir.as_ref();
    let output = output.as_ref();

    if let Some(parent) = output.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let file = File::create(output)?;
    if let Err(e) = write_ipa(file, source_dir, output, compression_level) {
        let _ = fs::remove_file(output);
        return Err(e);
    }
    Ok(())
}

fn write_ipa(file: File, source_dir: &Path, output: &Path, compression_level: u32) -> Result<()> {
    let mut zip = zip::ZipWriter::new(file);

    let options = match compression_level {
        0 => SimpleFileOptions::default().compression_method(CompressionMethod::Stored),
        level => SimpleFileOptions::default()
            .compression_method(CompressionMethod::Deflated)
            .compression_level(Some(level as i64)),
    };

    let mut count = 0usize;
    for entry in WalkDir::new(source_dir).min_depth(1) {
        let entry = entry?;
        let path = entry.path();
        let name = path
            .strip_prefix(source_dir)
            .map_err(|_| {
                RepackError::InvalidInput(format!(
                    "{} is outside {}",
                    path.display(),
                    source_dir.display()
                ))
            })?
            .to_string_lossy()
            .replace('\\', "/");

        #[cfg(unix)]
        let options = {
            use std::os::unix::fs::PermissionsExt;
            options.unix_permissions(entry.metadata()?.permissions().mode())
        };

        if entry.file_type().is_dir() {
            zip.add_directory(format!("{}/", name), options)?;
        } else if entry.file_type().is_file() {
            zip.start_file(name, options)?;
            let mut f = File::open(path)?;
            io::copy(&mut f, &mut zip)?;
            count += 1;
        }
    }

    zip.finish()?;
    log::debug!("wrote {} files to {}", count, output.display());

    Ok(())
}

/// Remove the working directory unless it should be kept. Returns the kept path.
pub fn cleanup(dir: TempDir, keep: bool) -> Result<Option<PathBuf>> {
    if keep {
        return Ok(Some(dir.keep()));
    }
    dir.close()?;
    Ok(None)
}
