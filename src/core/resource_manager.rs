use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{bail, Context, Result};
use serde_json::Value;

/// Owner of one downloadable resource (scales, arpeggiators, translations...).
pub trait ResourceManager: Send + Sync {
    fn id(&self) -> &str;

    /// The current base resource: the last downloaded copy, or a built-in default.
    fn base_resource(&self) -> Value;

    fn update_base_resource(&self, resource: Value) -> Result<()>;
}

/// Keeps the downloaded resource in `<dir>/<id>.json`.
pub struct FileResourceManager {
    id: String,
    path: PathBuf,
    builtin: Value,
    cached: Mutex<Option<Value>>,
}

impl FileResourceManager {
    pub fn new(id: &str, dir: &Path, builtin: Value) -> Self {
        Self {
            id: id.to_string(),
            path: dir.join(format!("{id}.json")),
            builtin,
            cached: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_from_disk(&self) -> Option<Value> {
        let text = fs::read_to_string(&self.path).ok()?;
        match serde_json::from_str(&text) {
            Ok(v) => Some(v),
            Err(err) => {
                tracing::warn!(resource = %self.id, %err, "ignoring unreadable resource file");
                None
            }
        }
    }
}

impl ResourceManager for FileResourceManager {
    fn id(&self) -> &str {
        &self.id
    }

    fn base_resource(&self) -> Value {
        let mut cached = self.cached.lock().unwrap_or_else(|e| e.into_inner());
        if cached.is_none() {
            *cached = self.read_from_disk();
        }
        cached.clone().unwrap_or_else(|| self.builtin.clone())
    }

    fn update_base_resource(&self, resource: Value) -> Result<()> {
        if resource.is_null() {
            bail!("refusing to store an empty {} resource", self.id);
        }
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create dir {}", parent.display()))?;
        }
        let text = serde_json::to_string_pretty(&resource)
            .with_context(|| format!("serialize {} resource", self.id))?;
        fs::write(&self.path, format!("{text}\n"))
            .with_context(|| format!("write {}", self.path.display()))?;

        *self.cached.lock().unwrap_or_else(|e| e.into_inner()) = Some(resource);
        tracing::info!(resource = %self.id, "base resource updated");
        Ok(())
    }
}

/// Named resource managers, keyed by the resource type the server uses.
#[derive(Clone, Default)]
pub struct ResourceManagerPool {
    managers: BTreeMap<String, Arc<dyn ResourceManager>>,
}

impl ResourceManagerPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, manager: Arc<dyn ResourceManager>) {
        self.managers.insert(manager.id().to_string(), manager);
    }

    pub fn contains(&self, id: &str) -> bool {
        self.managers.contains_key(id)
    }

    pub fn get(&self, id: &str) -> Option<&Arc<dyn ResourceManager>> {
        self.managers.get(id)
    }

    pub fn ids(&self) -> Vec<String> {
        self.managers.keys().cloned().collect()
    }

    /// The resources this application ships defaults for.
    pub fn with_defaults(dir: &Path) -> Self {
        let mut pool = Self::new();
        for id in ["translations", "arpeggiators", "scales", "chordPresets"] {
            pool.insert(Arc::new(FileResourceManager::new(
                id,
                dir,
                Value::Object(Default::default()),
            )));
        }
        pool
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn falls_back_to_builtin_then_persists_updates() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let rm = FileResourceManager::new("scales", dir.path(), json!({"builtin": true}));
        assert_eq!(rm.base_resource(), json!({"builtin": true}));

        rm.update_base_resource(json!({"major": [0, 2, 4, 5, 7, 9, 11]}))?;
        assert!(rm.path().exists());

        let fresh = FileResourceManager::new("scales", dir.path(), json!(null));
        assert_eq!(fresh.base_resource()["major"][1], 2);
        Ok(())
    }

    #[test]
    fn null_resource_is_rejected() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let rm = FileResourceManager::new("scales", dir.path(), json!({}));
        assert!(rm.update_base_resource(Value::Null).is_err());
        assert!(!rm.path().exists());
        Ok(())
    }

    #[test]
    fn pool_lookup_by_id() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let pool = ResourceManagerPool::with_defaults(dir.path());
        assert!(pool.contains("scales"));
        assert!(!pool.contains("unknown"));
        assert_eq!(
            pool.get("translations").map(|m| m.id().to_string()),
            Some("translations".into())
        );
        assert_eq!(pool.ids().len(), 4);
        Ok(())
    }
}
