use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::{bail, Context, Result};
use serde::Serialize;

use crate::core::vcs::VersionControl;

const PROJECT_FILE: &str = "project.json";

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalProject {
    pub id: String,
    pub name: String,
    pub path: String,
    pub loaded: bool,
}

/// Projects on disk under one directory, each in `<projects_dir>/<id>/project.json`.
pub struct Workspace {
    projects_dir: PathBuf,
    loaded: Mutex<HashMap<String, Arc<VersionControl>>>,
}

pub type SharedWorkspace = Arc<Workspace>;

fn validate_project_id(project_id: &str) -> Result<()> {
    let id = project_id.trim();
    if id.is_empty() {
        bail!("project id is empty");
    }
    if id == "." || id == ".." || id.contains(['/', '\\']) {
        bail!("invalid project id {project_id:?}");
    }
    Ok(())
}

impl Workspace {
    pub fn new(projects_dir: impl Into<PathBuf>) -> Self {
        Self {
            projects_dir: projects_dir.into(),
            loaded: Mutex::new(HashMap::new()),
        }
    }

    pub fn projects_dir(&self) -> &Path {
        &self.projects_dir
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Arc<VersionControl>>> {
        self.loaded.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn project_dir(&self, project_id: &str) -> PathBuf {
        self.projects_dir.join(project_id)
    }

    pub fn project_path(&self, project_id: &str) -> PathBuf {
        self.project_dir(project_id).join(PROJECT_FILE)
    }

    pub fn project(&self, project_id: &str) -> Option<Arc<VersionControl>> {
        self.lock().get(project_id).cloned()
    }

    /// Empty, loaded project that a clone fills in. Fails if the project
    /// already exists locally.
    pub fn create_project_stub(
        &self,
        project_id: &str,
        project_name: &str,
    ) -> Result<Arc<VersionControl>> {
        validate_project_id(project_id)?;
        let mut loaded = self.lock();
        if loaded.contains_key(project_id) || self.project_path(project_id).exists() {
            bail!("project {project_id} already exists locally");
        }
        let dir = self.project_dir(project_id);
        fs::create_dir_all(&dir).with_context(|| format!("create {}", dir.display()))?;

        let vcs = Arc::new(VersionControl::new(project_id, project_name));
        loaded.insert(project_id.to_string(), vcs.clone());
        Ok(vcs)
    }

    /// Returns the already-loaded instance if there is one.
    pub fn load_project(&self, project_id: &str) -> Result<Arc<VersionControl>> {
        validate_project_id(project_id)?;
        if let Some(vcs) = self.project(project_id) {
            return Ok(vcs);
        }
        let vcs = Arc::new(VersionControl::load(&self.project_path(project_id))?);
        if vcs.project_id() != project_id {
            bail!(
                "project file for {project_id} belongs to {}",
                vcs.project_id()
            );
        }
        let mut loaded = self.lock();
        Ok(loaded
            .entry(project_id.to_string())
            .or_insert(vcs)
            .clone())
    }

    pub fn save_project(&self, project_id: &str) -> Result<()> {
        let vcs = self
            .project(project_id)
            .with_context(|| format!("project {project_id} is not loaded"))?;
        vcs.save(&self.project_path(project_id))
    }

    /// Drops the loaded instance. With `delete_local`, removes its directory too.
    /// Returns whether anything was unloaded or deleted.
    pub fn unload_project(&self, project_id: &str, delete_local: bool) -> Result<bool> {
        validate_project_id(project_id)?;
        let was_loaded = self.lock().remove(project_id).is_some();
        if !delete_local {
            return Ok(was_loaded);
        }
        let dir = self.project_dir(project_id);
        match fs::remove_dir_all(&dir) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(was_loaded),
            Err(e) => Err(e).with_context(|| format!("remove {}", dir.display())),
        }
    }

    pub fn list_local_projects(&self) -> Result<Vec<LocalProject>> {
        let entries = match fs::read_dir(&self.projects_dir) {
            Ok(v) => v,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("read_dir {}", self.projects_dir.display()))
            }
        };

        let loaded = self.lock().clone();
        let mut out = Vec::new();
        for ent in entries {
            let ent = match ent {
                Ok(v) => v,
                Err(_) => continue,
            };
            let path = ent.path().join(PROJECT_FILE);
            let Some(id) = ent.file_name().to_str().map(str::to_string) else {
                continue;
            };
            let name = match loaded.get(&id) {
                Some(vcs) => vcs.project_name().to_string(),
                None => match VersionControl::load(&path) {
                    Ok(vcs) => vcs.project_name().to_string(),
                    Err(_) => continue,
                },
            };
            out.push(LocalProject {
                loaded: loaded.contains_key(&id),
                id,
                name,
                path: path.to_string_lossy().to_string(),
            });
        }
        out.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(out)
    }
}
