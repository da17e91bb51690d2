use std::fs;
use std::path::Path;

use serde::{de::DeserializeOwned, Serialize};

use crate::error::{Error, Result};

/// Load `path` as YAML into `T`, writing out `T::default()` if the file does
/// not exist yet. Mirrors `original_source/common/config.go`'s
/// `ReadConfig`, generalised over master and slave config types.
pub fn load_or_init<T>(path: &Path) -> Result<T>
where
    T: DeserializeOwned + Serialize + Default,
{
    match fs::read_to_string(path) {
        Ok(raw) => serde_yaml::from_str(&raw).map_err(|source| Error::Yaml {
            path: path.to_path_buf(),
            source,
        }),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            let default = T::default();
            let raw = serde_yaml::to_string(&default).map_err(|source| Error::Yaml {
                path: path.to_path_buf(),
                source,
            })?;
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(path, raw)?;
            Ok(default)
        }
        Err(err) => Err(err.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Default, Serialize, Deserialize, PartialEq)]
    struct Cfg {
        name: String,
        port: u16,
    }

    #[test]
    fn writes_default_when_missing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cfg.yaml");
        let cfg: Cfg = load_or_init(&path).unwrap();
        assert_eq!(cfg, Cfg::default());
        assert!(path.exists());
    }

    #[test]
    fn loads_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cfg.yaml");
        fs::write(&path, "name: s1\nport: 9000\n").unwrap();
        let cfg: Cfg = load_or_init(&path).unwrap();
        assert_eq!(
            cfg,
            Cfg {
                name: "s1".into(),
                port: 9000
            }
        );
    }
}
