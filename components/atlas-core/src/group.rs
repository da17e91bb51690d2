use std::ffi::OsStr;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GroupType {
    Proxy,
    Server,
}

/// Declarative, persisted desired-state for one kind of service. One YAML
/// file per group lives under the groups directory; `name` must equal the
/// file's stem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: GroupType,
    pub min_services: u32,
    pub max_services: u32,
    pub memory_mib: u32,
    pub start_port: u16,
}

impl Group {
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(Error::Validation("group name cannot be empty".into()));
        }
        if self.max_services < self.min_services {
            return Err(Error::Validation(
                "max_services cannot be smaller than min_services".into(),
            ));
        }
        if self.memory_mib < 1 {
            return Err(Error::Validation("memory_mib must be at least 1".into()));
        }
        if self.start_port < 1 {
            return Err(Error::Validation("start_port must be at least 1".into()));
        }
        Ok(())
    }

    /// Load a single group file and verify its basename matches `name`.
    pub fn from_file(path: &Path) -> Result<Group> {
        let raw = fs::read_to_string(path)?;
        let group: Group = serde_yaml::from_str(&raw).map_err(|source| Error::Yaml {
            path: path.to_path_buf(),
            source,
        })?;
        group.validate()?;

        let stem = path.file_stem().and_then(OsStr::to_str);
        if stem != Some(group.name.as_str()) {
            return Err(Error::GroupNameMismatch {
                path: path.to_path_buf(),
                name: group.name.clone(),
            });
        }
        Ok(group)
    }

    pub fn to_file(&self, path: &Path) -> Result<()> {
        self.validate()?;
        let raw = serde_yaml::to_string(self).map_err(|source| Error::Yaml {
            path: path.to_path_buf(),
            source,
        })?;
        fs::write(path, raw)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Group {
        Group {
            name: "lobby".into(),
            kind: GroupType::Proxy,
            min_services: 1,
            max_services: 2,
            memory_mib: 512,
            start_port: 25565,
        }
    }

    #[test]
    fn valid_group_passes() {
        assert!(sample().validate().is_ok());
    }

    #[test]
    fn max_below_min_is_rejected() {
        let mut g = sample();
        g.max_services = 0;
        g.min_services = 1;
        assert!(g.validate().is_err());
    }

    #[test]
    fn zero_memory_is_rejected() {
        let mut g = sample();
        g.memory_mib = 0;
        assert!(g.validate().is_err());
    }

    #[test]
    fn round_trips_through_yaml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lobby.yaml");
        let g = sample();
        g.to_file(&path).unwrap();
        let loaded = Group::from_file(&path).unwrap();
        assert_eq!(g, loaded);
    }

    #[test]
    fn mismatched_filename_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("not-lobby.yaml");
        sample().to_file(&path).unwrap();
        assert!(Group::from_file(&path).is_err());
    }
}
