//! Configuration management for unionfs

use crate::backend::{OsFs, SharedBackend};
use crate::error::{Error, Result};
use crate::overlay::{OverlayFs, OverlayOptions};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// Environment variable listing layer directories, colon separated
pub const ENV_LAYERS: &str = "UNIONFS_LAYERS";

/// Environment variable enabling writes to the first layer
pub const ENV_FIRST_WRITABLE: &str = "UNIONFS_FIRST_WRITABLE";

/// Overlay configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OverlayConfig {
    /// Layer directories, highest priority first
    pub layers: Vec<PathBuf>,

    /// Send writes to the first layer
    pub first_writable: bool,
}

#[derive(Clone, Copy)]
enum Format {
    Json,
    Yaml,
}

impl Format {
    fn of(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some("yaml") | Some("yml") => Format::Yaml,
            _ => Format::Json,
        }
    }
}

impl OverlayConfig {
    /// Load configuration from a file, with environment variable overrides.
    ///
    /// `.yaml`/`.yml` files are read as YAML, anything else as JSON.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Failed to read config file: {}", e))
        })?;

        let mut config: OverlayConfig = match Format::of(path) {
            Format::Json => serde_json::from_str(&content)
                .map_err(|e| Error::Config(format!("Failed to parse config file: {}", e)))?,
            Format::Yaml => serde_yaml::from_str(&content)
                .map_err(|e| Error::Config(format!("Failed to parse config file: {}", e)))?,
        };

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Default config file location
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("unionfs")
            .join("config.yaml")
    }

    /// Apply environment variable overrides to configuration
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(layers) = lookup(ENV_LAYERS) {
            let layers: Vec<PathBuf> = layers
                .split(':')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(PathBuf::from)
                .collect();
            if !layers.is_empty() {
                self.layers = layers;
            }
        }

        if let Some(writable) = lookup(ENV_FIRST_WRITABLE) {
            match writable.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" => self.first_writable = true,
                "0" | "false" | "no" => self.first_writable = false,
                _ => {}
            }
        }
    }

    /// Save configuration to a file, in the format its extension names
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let content = match Format::of(path) {
            Format::Json => serde_json::to_string_pretty(self)
                .map_err(|e| Error::Config(format!("Failed to serialize config: {}", e)))?,
            Format::Yaml => serde_yaml::to_string(self)
                .map_err(|e| Error::Config(format!("Failed to serialize config: {}", e)))?,
        };

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(path, content).map_err(|e| {
            Error::Config(format!("Failed to write config file: {}", e))
        })?;

        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        for layer in &self.layers {
            if !layer.is_dir() {
                return Err(Error::InvalidConfig(format!(
                    "Layer is not a directory: {}",
                    layer.display()
                )));
            }
        }
        Ok(())
    }

    /// Build an overlay with one OS backend per layer
    pub fn build(&self) -> Result<OverlayFs> {
        let mut backends: Vec<SharedBackend> = Vec::with_capacity(self.layers.len());
        for layer in &self.layers {
            debug!("Adding layer {:?}", layer);
            backends.push(Arc::new(OsFs::new(layer)?));
        }
        Ok(OverlayFs::new(OverlayOptions {
            backends,
            first_writable: self.first_writable,
            ..Default::default()
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{Backend, BackendIterator};
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn layers(n: usize) -> (TempDir, Vec<PathBuf>) {
        let tmp = TempDir::new().unwrap();
        let dirs = (0..n)
            .map(|i| {
                let dir = tmp.path().join(format!("layer{}", i));
                std::fs::create_dir(&dir).unwrap();
                dir
            })
            .collect();
        (tmp, dirs)
    }

    #[test]
    fn test_save_load_yaml() {
        let (tmp, dirs) = layers(2);
        let config = OverlayConfig {
            layers: dirs,
            first_writable: true,
        };
        let path = tmp.path().join("conf/unionfs.yaml");
        config.save(&path).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("first_writable: true"));
        assert_eq!(OverlayConfig::load(&path).unwrap(), config);
    }

    #[test]
    fn test_save_load_json() {
        let (tmp, dirs) = layers(1);
        let config = OverlayConfig {
            layers: dirs,
            first_writable: false,
        };
        let path = tmp.path().join("unionfs.json");
        config.save(&path).unwrap();
        assert_eq!(OverlayConfig::load(&path).unwrap(), config);
    }

    #[test]
    fn test_missing_fields_default() {
        let config: OverlayConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, OverlayConfig::default());

        let config: OverlayConfig = serde_yaml::from_str("first_writable: true").unwrap();
        assert!(config.layers.is_empty());
        assert!(config.first_writable);
    }

    #[test]
    fn test_load_errors() {
        let tmp = TempDir::new().unwrap();
        assert!(matches!(
            OverlayConfig::load(tmp.path().join("missing.json")),
            Err(Error::Config(_))
        ));

        let path = tmp.path().join("bad.yaml");
        std::fs::write(&path, "layers: [unterminated").unwrap();
        assert!(matches!(OverlayConfig::load(&path), Err(Error::Config(_))));
    }

    #[test]
    fn test_validate() {
        let (tmp, mut dirs) = layers(1);
        let config = OverlayConfig {
            layers: dirs.clone(),
            first_writable: false,
        };
        assert!(config.validate().is_ok());

        dirs.push(tmp.path().join("nope"));
        let config = OverlayConfig {
            layers: dirs,
            first_writable: false,
        };
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_overrides() {
        let vars: HashMap<&str, &str> = [
            (ENV_LAYERS, "/a: /b ::/c"),
            (ENV_FIRST_WRITABLE, "TRUE"),
        ]
        .into_iter()
        .collect();

        let mut config = OverlayConfig::default();
        config.apply_overrides(|k| vars.get(k).map(|v| v.to_string()));
        assert_eq!(
            config.layers,
            vec![PathBuf::from("/a"), PathBuf::from("/b"), PathBuf::from("/c")]
        );
        assert!(config.first_writable);

        let mut config = OverlayConfig {
            layers: vec![PathBuf::from("/keep")],
            first_writable: true,
        };
        config.apply_overrides(|k| match k {
            ENV_LAYERS => Some(" : ".to_string()),
            ENV_FIRST_WRITABLE => Some("maybe".to_string()),
            _ => None,
        });
        assert_eq!(config.layers, vec![PathBuf::from("/keep")]);
        assert!(config.first_writable);
    }

    #[test]
    fn test_build() {
        let (_tmp, dirs) = layers(2);
        std::fs::write(dirs[0].join("a.txt"), "upper").unwrap();
        std::fs::write(dirs[1].join("a.txt"), "lower").unwrap();
        std::fs::write(dirs[1].join("b.txt"), "lower").unwrap();

        let ofs = OverlayConfig {
            layers: dirs.clone(),
            first_writable: true,
        }
        .build()
        .unwrap();
        assert_eq!(ofs.num_backends(), 2);
        assert!(ofs.is_first_writable());
        assert_eq!(ofs.stat(Path::new("a.txt")).unwrap().len(), 5);
        assert!(ofs.stat(Path::new("b.txt")).is_ok());

        ofs.mkdir(Path::new("new"), 0o755).unwrap();
        assert!(dirs[0].join("new").is_dir());
        assert!(!dirs[1].join("new").exists());
    }

    #[test]
    fn test_default_path() {
        let path = OverlayConfig::default_path();
        assert!(path.ends_with("unionfs/config.yaml"));
    }
}
