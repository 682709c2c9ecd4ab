//! Durable record of every instance this tool has provisioned.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{AppError, Result};
use crate::instance::InstanceDescriptor;

/// JSON array of [`InstanceDescriptor`]s, rewritten wholesale on each change.
#[derive(Debug)]
pub struct StateStore {
    path: PathBuf,
    instances: Vec<InstanceDescriptor>,
}

impl StateStore {
    /// Read the store at `path`.
    ///
    /// A missing file is an empty store. An unreadable or malformed file is
    /// also treated as empty, with a warning: the next successful build will
    /// overwrite it.
    pub fn load(path: &Path) -> Self {
        let instances = if path.is_file() {
            match read_instances(path) {
                Ok(instances) => instances,
                Err(e) => {
                    log::warn!(
                        "Unable to read state at {}: {}. If this build succeeds, it will be overwritten.",
                        path.display(),
                        e
                    );
                    Vec::new()
                }
            }
        } else {
            Vec::new()
        };

        Self {
            path: path.to_path_buf(),
            instances,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn instances(&self) -> &[InstanceDescriptor] {
        &self.instances
    }

    pub fn find(&self, name: &str) -> Option<&InstanceDescriptor> {
        self.instances.iter().find(|inst| inst.name == name)
    }

    /// Whether a record already uses this name or directory name.
    pub fn contains(&self, name: &str, dir_name: &str) -> bool {
        self.instances
            .iter()
            .any(|inst| inst.name == name || inst.dir_name == dir_name)
    }

    /// Append a descriptor and persist. The in-memory list only changes if
    /// the write succeeds.
    pub fn insert(&mut self, descriptor: InstanceDescriptor) -> Result<()> {
        let mut updated = self.instances.clone();
        updated.push(descriptor);
        self.write(&updated)?;
        self.instances = updated;
        Ok(())
    }

    /// Remove the descriptor named `name` and persist, returning it.
    pub fn remove(&mut self, name: &str) -> Result<InstanceDescriptor> {
        let index = self
            .instances
            .iter()
            .position(|inst| inst.name == name)
            .ok_or_else(|| AppError::instance_not_found(name))?;
        let mut updated = self.instances.clone();
        let removed = updated.remove(index);
        self.write(&updated)?;
        self.instances = updated;
        Ok(removed)
    }

    fn write(&self, instances: &[InstanceDescriptor]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let content = serde_json::to_string_pretty(instances)?;
        fs::write(&self.path, content).map_err(|e| {
            AppError::io(format!(
                "Failed to write state to {}: {}",
                self.path.display(),
                e
            ))
        })
    }
}

fn read_instances(path: &Path) -> Result<Vec<InstanceDescriptor>> {
    let content = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::{Compensation, Step, StepLedger};

    fn descriptor(name: &str, port: u16) -> InstanceDescriptor {
        let mut steps = StepLedger::new();
        steps.record(
            Step::CreateStorage,
            Compensation::RemoveDirectory {
                path: PathBuf::from(format!("/srv/apps/{name}old")),
            },
        );
        InstanceDescriptor {
            name: name.to_string(),
            dir_name: format!("{name}old"),
            db_name: format!("{name}old"),
            apps_path: PathBuf::from("/srv/apps"),
            instance_path: PathBuf::from(format!("/srv/apps/{name}old")),
            host: "old.example.org".to_string(),
            mysql_user: "old".to_string(),
            paster_path: "paster".to_string(),
            vh_path: PathBuf::from("/etc/apache2/sites-available/old.example.org"),
            port,
            secure: true,
            build_date: None,
            steps,
        }
    }

    #[test]
    fn insert_then_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".buildold.json");

        let mut store = StateStore::load(&path);
        assert!(store.instances().is_empty());
        store.insert(descriptor("bla", 9000)).unwrap();
        store.insert(descriptor("gla", 9001)).unwrap();

        let reloaded = StateStore::load(&path);
        assert_eq!(reloaded.instances().len(), 2);
        assert_eq!(reloaded.find("gla").unwrap().port, 9001);
        assert!(reloaded.contains("other", "blaold"));
        assert!(!reloaded.contains("other", "otherold"));
        assert_eq!(reloaded.find("bla").unwrap().steps.len(), 1);
    }

    #[test]
    fn remove_filters_by_name() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        let mut store = StateStore::load(&path);
        store.insert(descriptor("bla", 9000)).unwrap();
        store.insert(descriptor("gla", 9001)).unwrap();

        let removed = store.remove("bla").unwrap();
        assert_eq!(removed.name, "bla");
        assert!(store.remove("bla").is_err());

        let reloaded = StateStore::load(&path);
        let names: Vec<&str> = reloaded.instances().iter().map(|i| i.name.as_str()).collect();
        assert_eq!(names, vec!["gla"]);
    }

    #[test]
    fn corrupt_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        fs::write(&path, "{ not json").unwrap();
        let store = StateStore::load(&path);
        assert!(store.instances().is_empty());

        fs::write(&path, r#"{"an": "object"}"#).unwrap();
        assert!(StateStore::load(&path).instances().is_empty());
    }
}
