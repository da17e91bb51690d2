use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use atlas_core::{Error, Group, Result};
use glob::glob;
use log::{info, warn};

/// The master's collaborator for provisioning a group's template directory
/// on disk. Kept as a trait so the group store can be unit tested without
/// touching the filesystem for template layers.
pub trait TemplateProvisioner {
    fn create_template_dir(&self, group_name: &str) -> Result<()>;
}

pub struct FsTemplateProvisioner {
    pub templates_root: PathBuf,
}

impl TemplateProvisioner for FsTemplateProvisioner {
    fn create_template_dir(&self, group_name: &str) -> Result<()> {
        fs::create_dir_all(self.templates_root.join(group_name))?;
        Ok(())
    }
}

/// Result of diffing the on-disk group set against the in-memory one during
/// a reload.
#[derive(Debug, Default)]
pub struct GroupDiff {
    pub added: Vec<Group>,
    pub removed: Vec<Group>,
}

/// Loads, validates, creates and reloads `*.yaml` group definitions from one
/// directory. One file per group; filename stem must equal the group's
/// `name`.
pub struct GroupStore {
    dir: PathBuf,
    groups: Vec<Group>,
}

fn read_dir(dir: &Path) -> Result<Vec<Group>> {
    let pattern = dir.join("*.yaml");
    let mut groups = Vec::new();
    let mut seen = HashSet::new();
    for entry in glob(&pattern.display().to_string()).expect("glob pattern is valid") {
        let path = match entry {
            Ok(p) => p,
            Err(err) => {
                warn!("failed to read groups directory entry: {err}");
                continue;
            }
        };
        if !path.is_file() {
            continue;
        }
        let group = Group::from_file(&path)?;
        if !seen.insert(group.name.clone()) {
            return Err(Error::DuplicateGroup(group.name));
        }
        groups.push(group);
    }
    Ok(groups)
}

impl GroupStore {
    pub fn load(dir: PathBuf) -> Result<GroupStore> {
        fs::create_dir_all(&dir)?;
        let groups = read_dir(&dir)?;
        Ok(GroupStore { dir, groups })
    }

    pub fn groups(&self) -> &[Group] {
        &self.groups
    }

    pub fn get(&self, name: &str) -> Option<&Group> {
        self.groups.iter().find(|g| g.name == name)
    }

    fn file_path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{name}.yaml"))
    }

    /// Create a new group: validates it, writes the YAML file, appends it to
    /// the in-memory list, and provisions its template directory.
    pub fn create(&mut self, group: Group, templates: &dyn TemplateProvisioner) -> Result<()> {
        group.validate()?;
        if self.get(&group.name).is_some() {
            return Err(Error::DuplicateGroup(group.name));
        }
        group.to_file(&self.file_path(&group.name))?;
        templates.create_template_dir(&group.name)?;
        info!("group '{}' created", group.name);
        self.groups.push(group);
        Ok(())
    }

    /// Recompute the on-disk set and diff it against memory. Added groups
    /// are appended and provisioned with a template directory; removed
    /// groups are returned so the caller (the scheduler) can stop their
    /// services.
    pub fn reload(&mut self, templates: &dyn TemplateProvisioner) -> Result<GroupDiff> {
        let on_disk = read_dir(&self.dir)?;
        let on_disk_names: HashSet<&str> = on_disk.iter().map(|g| g.name.as_str()).collect();
        let in_memory_names: HashSet<&str> = self.groups.iter().map(|g| g.name.as_str()).collect();

        let added: Vec<Group> = on_disk
            .iter()
            .filter(|g| !in_memory_names.contains(g.name.as_str()))
            .cloned()
            .collect();
        let removed: Vec<Group> = self
            .groups
            .iter()
            .filter(|g| !on_disk_names.contains(g.name.as_str()))
            .cloned()
            .collect();

        for group in &added {
            templates.create_template_dir(&group.name)?;
            info!("group '{}' added by reload", group.name);
        }
        for group in &removed {
            info!("group '{}' removed by reload", group.name);
        }

        self.groups = on_disk;
        Ok(GroupDiff { added, removed })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use atlas_core::GroupType;
    use std::cell::RefCell;

    struct FakeTemplates {
        created: RefCell<Vec<String>>,
    }
    impl TemplateProvisioner for FakeTemplates {
        fn create_template_dir(&self, group_name: &str) -> Result<()> {
            self.created.borrow_mut().push(group_name.to_string());
            Ok(())
        }
    }

    fn sample(name: &str) -> Group {
        Group {
            name: name.into(),
            kind: GroupType::Proxy,
            min_services: 1,
            max_services: 1,
            memory_mib: 512,
            start_port: 25565,
        }
    }

    #[test]
    fn create_persists_and_provisions() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = GroupStore::load(dir.path().to_path_buf()).unwrap();
        let templates = FakeTemplates { created: RefCell::new(vec![]) };
        store.create(sample("lobby"), &templates).unwrap();

        assert_eq!(store.groups().len(), 1);
        assert_eq!(templates.created.borrow().as_slice(), ["lobby"]);
        assert!(dir.path().join("lobby.yaml").exists());
    }

    #[test]
    fn duplicate_create_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = GroupStore::load(dir.path().to_path_buf()).unwrap();
        let templates = FakeTemplates { created: RefCell::new(vec![]) };
        store.create(sample("lobby"), &templates).unwrap();
        assert!(store.create(sample("lobby"), &templates).is_err());
    }

    #[test]
    fn reload_detects_additions_and_removals() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = GroupStore::load(dir.path().to_path_buf()).unwrap();
        let templates = FakeTemplates { created: RefCell::new(vec![]) };
        store.create(sample("lobby"), &templates).unwrap();

        // Simulate external edits: remove lobby.yaml, add survival.yaml.
        fs::remove_file(dir.path().join("lobby.yaml")).unwrap();
        sample("survival").to_file(&dir.path().join("survival.yaml")).unwrap();

        let diff = store.reload(&templates).unwrap();
        assert_eq!(diff.added.len(), 1);
        assert_eq!(diff.added[0].name, "survival");
        assert_eq!(diff.removed.len(), 1);
        assert_eq!(diff.removed[0].name, "lobby");
        assert_eq!(store.groups().len(), 1);
    }

    #[test]
    fn duplicate_names_on_disk_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        sample("lobby").to_file(&dir.path().join("lobby.yaml")).unwrap();
        // second file with the same `name` field but a different filename
        let mut dup = sample("lobby");
        dup.memory_mib = 1024;
        fs::write(
            dir.path().join("lobby2.yaml"),
            serde_yaml::to_string(&dup).unwrap(),
        )
        .unwrap();
        assert!(GroupStore::load(dir.path().to_path_buf()).is_err());
    }
}
