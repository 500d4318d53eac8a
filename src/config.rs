//! Run configuration.
//!
//! Loaded from an optional TOML file; every field has a default, so an
//! empty file (or none at all) reproduces the fixed setup: scan blocks of
//! 4, convolution tiles of 16×16, `input.txt` in and `output.txt` out.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::backend::BackendKind;
use crate::error::{Error, Result};
use crate::kernels::KernelSource;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub backend: BackendKind,
    pub scan: KernelConfig,
    pub convolution: KernelConfig,
    pub files: FilesConfig,
}

/// Per-primitive settings.  A section that is present must name its
/// block size; an absent section keeps the primitive's default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct KernelConfig {
    pub block_size: u32,
    /// WGSL body replacing the built-in program.
    #[serde(default)]
    pub kernel_source: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FilesConfig {
    pub input: PathBuf,
    pub output: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backend: BackendKind::default(),
            scan: KernelConfig {
                block_size: 4,
                kernel_source: None,
            },
            convolution: KernelConfig {
                block_size: 16,
                kernel_source: None,
            },
            files: FilesConfig::default(),
        }
    }
}

impl Default for FilesConfig {
    fn default() -> Self {
        Self {
            input: PathBuf::from("input.txt"),
            output: PathBuf::from("output.txt"),
        }
    }
}

impl Config {
    pub fn from_toml(text: &str) -> Result<Self> {
        let config: Config = toml::from_str(text).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml(&text).map_err(|e| match e {
            Error::Config(msg) => Error::Config(format!("{}: {msg}", path.display())),
            other => other,
        })
    }

    pub fn validate(&self) -> Result<()> {
        for (name, kernel) in [("scan", &self.scan), ("convolution", &self.convolution)] {
            let b = kernel.block_size;
            if b < 2 || !b.is_power_of_two() {
                return Err(Error::Config(format!(
                    "{name}.block_size must be a power of two of at least 2, got {b}"
                )));
            }
        }
        Ok(())
    }

    /// Program text for the scan kernels.
    pub fn scan_source(&self) -> Result<KernelSource> {
        match &self.scan.kernel_source {
            Some(path) => KernelSource::from_file("scan", self.scan.block_size, path),
            None => Ok(KernelSource::scan(self.scan.block_size)),
        }
    }

    /// Program text for the convolution kernel.
    pub fn convolution_source(&self) -> Result<KernelSource> {
        match &self.convolution.kernel_source {
            Some(path) => KernelSource::from_file("convolution", self.convolution.block_size, path),
            None => Ok(KernelSource::convolution(self.convolution.block_size)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_gives_the_defaults() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.scan.block_size, 4);
        assert_eq!(config.convolution.block_size, 16);
        assert_eq!(config.files.input, PathBuf::from("input.txt"));
    }

    #[test]
    fn sections_override_fields() {
        let config = Config::from_toml(
            r#"
            backend = "emulator"

            [convolution]
            block_size = 8

            [files]
            output = "result.txt"
            "#,
        )
        .unwrap();
        assert_eq!(config.backend, BackendKind::Emulator);
        assert_eq!(config.convolution.block_size, 8);
        assert_eq!(config.scan.block_size, 4);
        assert_eq!(config.files.input, PathBuf::from("input.txt"));
        assert_eq!(config.files.output, PathBuf::from("result.txt"));
    }

    #[test]
    fn invalid_block_sizes_are_rejected() {
        let err = Config::from_toml("[scan]\nblock_size = 6\n").unwrap_err();
        assert!(err.to_string().contains("scan.block_size"));
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(Config::from_toml("blocksize = 4").is_err());
    }

    #[test]
    fn builtin_sources_follow_the_block_size() {
        let config = Config::default();
        assert_eq!(config.scan_source().unwrap().block(), 4);
        assert_eq!(config.convolution_source().unwrap().block(), 16);
    }
}
