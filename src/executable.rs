use crate::config::SymbolMapping;
use crate::entitlements::{self, KeyPatch};
use crate::error::{RepackError, Result};
use crate::tools::Toolchain;
use std::fs;
use std::path::{Path, PathBuf};

/// What was done to one executable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessedExecutable {
    pub path: PathBuf,
    /// The entitlements file passed to the signer, if any.
    pub entitlements: Option<PathBuf>,
    pub patches: Vec<(&'static str, KeyPatch)>,
}

/// A Mach-O inside the unpacked bundle, paired with the symbols to restore into it.
pub struct EmbeddedExecutable {
    pub path: PathBuf,
    pub name: String,
    pub symbols: PathBuf,
}

impl EmbeddedExecutable {
    pub fn new<P: AsRef<Path>>(bundle: P, mapping: &SymbolMapping) -> Result<Self> {
        let path = bundle.as_ref().join(&mapping.executable);
        if !path.is_file() {
            return Err(RepackError::FileNotFound(path));
        }
        if !mapping.symbols.is_file() {
            return Err(RepackError::FileNotFound(mapping.symbols.clone()));
        }

        let name = path
            .file_name()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();

        Ok(Self {
            path,
            name,
            symbols: mapping.symbols.clone(),
        })
    }

    /// Write the current entitlements into `transient`, patched when `debuggable`.
    /// Returns the file to sign with, or `None` if the binary carries no entitlements.
    pub fn prepare_entitlements(
        &self,
        tools: &Toolchain,
        transient: &Path,
        prefix: &str,
        debuggable: bool,
    ) -> Result<(Option<PathBuf>, Vec<(&'static str, KeyPatch)>)> {
        let Some(xml) = tools.extract_entitlements(&self.path)? else {
            println!("[?] {} has no entitlements", self.name);
            return Ok((None, Vec::new()));
        };

        let original = transient.join(format!("{}.entitlements.plist", prefix));
        fs::write(&original, &xml)?;
        log::debug!("saved entitlements of {} to {}", self.name, original.display());

        if !debuggable {
            return Ok((Some(original), Vec::new()));
        }

        let (patched, report) = entitlements::make_debuggable(&xml)?;
        for (key, patch) in &report {
            match patch {
                KeyPatch::NotBoolean => println!("[?] {}: {} {}", self.name, key, patch),
                _ => log::debug!("{}: {} {}", self.name, key, patch),
            }
        }

        match entitlements::missing_debuggable_keys(&patched) {
            Ok(missing) if !missing.is_empty() => {
                println!("[?] {}: still not debuggable: {}", self.name, missing.join(", "));
            }
            Ok(_) => {}
            Err(e) => log::warn!("could not verify patched entitlements of {}: {}", self.name, e),
        }

        let debuggable_path = transient.join(format!("{}.debuggable.plist", prefix));
        fs::write(&debuggable_path, &patched)?;

        let changed = report.iter().filter(|(_, p)| p.changed()).count();
        if changed > 0 {
            println!("[*] made {} debuggable ({} key(s) changed)", self.name, changed);
        }

        Ok((Some(debuggable_path), report))
    }

    /// Run the restore tool into `transient` and copy the result back over the executable.
    pub fn restore_symbols(&self, tools: &Toolchain, transient: &Path, prefix: &str) -> Result<()> {
        let restored = transient.join(format!("{}.restored", prefix));
        tools.restore_symbols(&self.path, &self.symbols, &restored)?;

        if !restored.is_file() {
            return Err(RepackError::ToolFailed {
                command: crate::tools::display_command(&tools.restore_symbol_command(
                    &self.path,
                    &self.symbols,
                    &restored,
                )),
                reason: format!("no output written to {}", restored.display()),
            });
        }

        let perms = fs::metadata(&self.path)?.permissions();
        fs::copy(&restored, &self.path)?;
        fs::set_permissions(&self.path, perms)?;

        println!("[*] restored symbols in {}", self.name);
        Ok(())
    }

    /// Extract entitlements, restore symbols, then re-sign. `index` keeps
    /// transient file names unique when two executables share a name.
    pub fn process(
        &self,
        tools: &Toolchain,
        transient: &Path,
        index: usize,
        debuggable: bool,
    ) -> Result<ProcessedExecutable> {
        let prefix = format!("{}_{}", index, self.name);

        let (entitlements, patches) = self.prepare_entitlements(tools, transient, &prefix, debuggable)?;
        self.restore_symbols(tools, transient, &prefix)?;
        tools.sign(&self.path, entitlements.as_deref())?;
        println!("[*] signed {}", self.name);

        Ok(ProcessedExecutable {
            path: self.path.clone(),
            entitlements,
            patches,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn mapping(executable: &str, symbols: &Path) -> SymbolMapping {
        SymbolMapping {
            executable: PathBuf::from(executable),
            symbols: symbols.to_path_buf(),
        }
    }

    #[test]
    fn missing_executable_is_rejected() {
        let tmp = TempDir::new().unwrap();
        let symbols = tmp.path().join("Demo.json");
        fs::write(&symbols, "[]").unwrap();

        let err = EmbeddedExecutable::new(tmp.path(), &mapping("Demo", &symbols))
            .err()
            .unwrap();
        assert!(matches!(err, RepackError::FileNotFound(p) if p == tmp.path().join("Demo")));
    }

    #[test]
    fn missing_symbol_file_is_rejected() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("Demo"), b"binary").unwrap();
        let symbols = tmp.path().join("Demo.json");

        let err = EmbeddedExecutable::new(tmp.path(), &mapping("Demo", &symbols))
            .err()
            .unwrap();
        assert!(matches!(err, RepackError::FileNotFound(p) if p == symbols));
    }

    #[test]
    fn resolves_nested_executable() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("Frameworks/Core.framework");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("Core"), b"binary").unwrap();
        let symbols = tmp.path().join("Core.json");
        fs::write(&symbols, "[]").unwrap();

        let exe = EmbeddedExecutable::new(
            tmp.path(),
            &mapping("Frameworks/Core.framework/Core", &symbols),
        )
        .unwrap();
        assert_eq!(exe.name, "Core");
        assert_eq!(exe.path, dir.join("Core"));
    }

    #[cfg(unix)]
    #[test]
    fn no_entitlements_means_no_file() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("Demo"), b"binary").unwrap();
        let symbols = tmp.path().join("Demo.json");
        fs::write(&symbols, "[]").unwrap();
        let transient = tmp.path().join("transient");
        fs::create_dir_all(&transient).unwrap();

        let tools = Toolchain {
            codesign: PathBuf::from("true"),
            ..Toolchain::default()
        };
        let exe = EmbeddedExecutable::new(tmp.path(), &mapping("Demo", &symbols)).unwrap();
        let (file, report) = exe.prepare_entitlements(&tools, &transient, "0_Demo", true).unwrap();

        assert_eq!(file, None);
        assert!(report.is_empty());
        assert_eq!(fs::read_dir(&transient).unwrap().count(), 0);
    }
}
