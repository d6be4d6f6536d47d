use crate::error::{RepackError, Result};
use crate::tools::Toolchain;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// An executable inside the app bundle and the symbol file to restore into it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymbolMapping {
    /// Relative to the `.app` directory, e.g. `Frameworks/Core.framework/Core`.
    pub executable: PathBuf,
    pub symbols: PathBuf,
}

impl FromStr for SymbolMapping {
    type Err = RepackError;

    /// Parses `EXECUTABLE=SYMBOLS`, splitting at the first `=`.
    fn from_str(s: &str) -> Result<Self> {
        let (executable, symbols) = s.split_once('=').ok_or_else(|| {
            RepackError::InvalidInput(format!("expected EXECUTABLE=SYMBOLS, got `{}`", s))
        })?;
        let (executable, symbols) = (executable.trim(), symbols.trim());

        if executable.is_empty() || symbols.is_empty() {
            return Err(RepackError::InvalidInput(format!(
                "empty executable or symbol path in `{}`",
                s
            )));
        }
        if Path::new(executable).is_absolute() {
            return Err(RepackError::InvalidInput(format!(
                "executable must be relative to the app bundle: {}",
                executable
            )));
        }

        Ok(Self {
            executable: PathBuf::from(executable),
            symbols: PathBuf::from(symbols),
        })
    }
}

impl fmt::Display for SymbolMapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.executable.display(), self.symbols.display())
    }
}

/// Contents of a `--config` JSON file. Every field is optional.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RepackConfig {
    #[serde(default)]
    pub input: Option<PathBuf>,
    #[serde(default)]
    pub output: Option<PathBuf>,
    #[serde(default)]
    pub restore_symbol: Option<PathBuf>,
    #[serde(default)]
    pub codesign: Option<PathBuf>,
    #[serde(default)]
    pub symbols: Vec<SymbolMapping>,
    #[serde(default)]
    pub debuggable: Option<bool>,
    #[serde(default)]
    pub keep_workdir: bool,
    #[serde(default)]
    pub overwrite: bool,
    #[serde(default)]
    pub compress: Option<u32>,
}

impl RepackConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(RepackError::FileNotFound(path.to_path_buf()));
        }
        let config: Self = serde_json::from_str(&fs::read_to_string(path)?)?;

        // Symbol paths in a config file are relative to the file itself.
        let base = path.parent().unwrap_or(Path::new(""));
        Ok(Self {
            symbols: config
                .symbols
                .into_iter()
                .map(|m| SymbolMapping {
                    symbols: base.join(m.symbols),
                    ..m
                })
                .collect(),
            ..config
        })
    }
}

/// Everything one repack run needs.
#[derive(Debug, Clone)]
pub struct RepackOptions {
    pub input: PathBuf,
    /// Derived from the input name when `None`.
    pub output: Option<PathBuf>,
    pub tools: Toolchain,
    pub mappings: Vec<SymbolMapping>,
    pub debuggable: bool,
    pub keep_workdir: bool,
    /// Replace an existing output archive.
    pub overwrite: bool,
    pub compression_level: u32,
}

impl RepackOptions {
    pub fn new<P: AsRef<Path>>(input: P) -> Self {
        Self {
            input: input.as_ref().to_path_buf(),
            output: None,
            tools: Toolchain::default(),
            mappings: Vec::new(),
            debuggable: true,
            keep_workdir: false,
            overwrite: false,
            compression_level: 6,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    #[test]
    fn parses_mapping() {
        let m: SymbolMapping = "Frameworks/Core.framework/Core=/tmp/Core=v2.json".parse().unwrap();
        assert_eq!(m.executable, PathBuf::from("Frameworks/Core.framework/Core"));
        assert_eq!(m.symbols, PathBuf::from("/tmp/Core=v2.json"));
        assert_eq!(m.to_string(), "Frameworks/Core.framework/Core=/tmp/Core=v2.json");
    }

    #[test]
    fn rejects_bad_mappings() {
        for bad in ["Demo", "=Demo.json", "Demo=", " = ", "/abs/Demo=Demo.json"] {
            assert!(
                matches!(bad.parse::<SymbolMapping>(), Err(RepackError::InvalidInput(_))),
                "{bad}"
            );
        }
    }

    #[test]
    fn loads_config_relative_to_file() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("repack.json");
        fs::write(
            &path,
            r#"{
                "input": "/ipa/Demo.ipa",
                "symbols": [
                    {"executable": "Demo", "symbols": "symbols/Demo.json"},
                    {"executable": "Frameworks/Core.framework/Core", "symbols": "/abs/Core.json"}
                ],
                "debuggable": false,
                "compress": 9
            }"#,
        )
        .unwrap();

        let config = RepackConfig::load(&path).unwrap();
        assert_eq!(config.input, Some(PathBuf::from("/ipa/Demo.ipa")));
        assert_eq!(config.debuggable, Some(false));
        assert_eq!(config.compress, Some(9));
        assert!(!config.keep_workdir);
        assert_eq!(
            config.symbols,
            vec![
                SymbolMapping {
                    executable: PathBuf::from("Demo"),
                    symbols: tmp.path().join("symbols/Demo.json"),
                },
                SymbolMapping {
                    executable: PathBuf::from("Frameworks/Core.framework/Core"),
                    symbols: PathBuf::from("/abs/Core.json"),
                },
            ]
        );
    }

    #[test]
    fn unknown_config_keys_are_rejected() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("repack.json");
        fs::write(&path, r#"{"inptu": "typo.ipa"}"#).unwrap();
        assert!(matches!(RepackConfig::load(&path), Err(RepackError::Json(_))));
    }

    #[test]
    fn missing_config_is_not_found() {
        assert!(matches!(
            RepackConfig::load("/nonexistent/repack.json"),
            Err(RepackError::FileNotFound(_))
        ));
    }
}
