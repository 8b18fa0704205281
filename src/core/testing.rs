//! In-crate fakes for exercising workers without a server or a UI.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

use anyhow::{anyhow, Result};
use serde_json::Value;

use crate::core::remote::{ApiError, ProjectDto, RevisionDto, RevisionHeader, SyncApi};
use crate::core::update_info::AppInfo;
use crate::core::vcs::Revision;
use crate::events::{EventSink, UiAction, UiEvent};

#[derive(Default)]
struct FakeState {
    updates: Option<AppInfo>,
    resources: HashMap<String, Value>,
    projects: HashMap<String, ProjectDto>,
    revisions: HashMap<(String, String), RevisionDto>,
    pushed: Vec<(String, RevisionDto)>,
    calls: Vec<String>,
    fail_with: Option<Vec<String>>,
}

/// Scripted server. Unknown lookups fail with a 404 `ApiError`.
#[derive(Default)]
pub struct FakeApi {
    state: Mutex<FakeState>,
    blocked: Arc<AtomicBool>,
}

fn not_found(what: &str) -> anyhow::Error {
    ApiError {
        status: 404,
        errors: vec![format!("{what} not found")],
    }
    .into()
}

impl FakeApi {
    fn lock(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn set_updates(&self, info: AppInfo) {
        self.lock().updates = Some(info);
    }

    pub fn set_resource(&self, resource_type: &str, value: Value) {
        self.lock().resources.insert(resource_type.to_string(), value);
    }

    pub fn add_project(&self, project_id: &str, title: &str, revisions: &[Revision]) {
        let mut st = self.lock();
        st.projects.insert(
            project_id.to_string(),
            ProjectDto {
                id: project_id.to_string(),
                title: title.to_string(),
                head: revisions.last().map(|r| r.id.clone()),
                revisions: revisions.iter().map(|r| r.header()).collect(),
            },
        );
        for r in revisions {
            st.revisions
                .insert((project_id.to_string(), r.id.clone()), r.to_dto());
        }
    }

    /// Every call fails with these messages until cleared.
    pub fn fail_all(&self, errors: &[&str]) {
        self.lock().fail_with = Some(errors.iter().map(|s| s.to_string()).collect());
    }

    /// Calls park until `release` is called.
    pub fn block(&self) {
        self.blocked.store(true, Ordering::SeqCst);
    }

    pub fn release(&self) {
        self.blocked.store(false, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<String> {
        self.lock().calls.clone()
    }

    pub fn pushed(&self) -> Vec<(String, RevisionDto)> {
        self.lock().pushed.clone()
    }

    fn enter(&self, call: String) -> Result<()> {
        self.lock().calls.push(call);
        while self.blocked.load(Ordering::SeqCst) {
            thread::sleep(Duration::from_millis(5));
        }
        if let Some(errors) = self.lock().fail_with.clone() {
            return Err(ApiError {
                status: 500,
                errors,
            }
            .into());
        }
        Ok(())
    }
}

impl SyncApi for FakeApi {
    fn fetch_updates_info(&self) -> Result<AppInfo> {
        self.enter("updates".to_string())?;
        self.lock()
            .updates
            .clone()
            .ok_or_else(|| anyhow!("no manifest scripted"))
    }

    fn request_resource(&self, resource_type: &str) -> Result<Value> {
        self.enter(format!("resource:{resource_type}"))?;
        self.lock()
            .resources
            .get(resource_type)
            .cloned()
            .ok_or_else(|| not_found(resource_type))
    }

    fn fetch_project(&self, project_id: &str) -> Result<ProjectDto> {
        self.enter(format!("project:{project_id}"))?;
        self.lock()
            .projects
            .get(project_id)
            .cloned()
            .ok_or_else(|| not_found("Project"))
    }

    fn fetch_revision_headers(&self, project_id: &str) -> Result<Vec<RevisionHeader>> {
        self.enter(format!("headers:{project_id}"))?;
        Ok(self
            .lock()
            .projects
            .get(project_id)
            .map(|p| p.revisions.clone())
            .unwrap_or_default())
    }

    fn fetch_revision(&self, project_id: &str, revision_id: &str) -> Result<RevisionDto> {
        self.enter(format!("revision:{project_id}/{revision_id}"))?;
        self.lock()
            .revisions
            .get(&(project_id.to_string(), revision_id.to_string()))
            .cloned()
            .ok_or_else(|| not_found("Revision"))
    }

    fn put_revision(
        &self,
        project_id: &str,
        project_title: &str,
        revision: &RevisionDto,
    ) -> Result<()> {
        self.enter(format!("put:{project_id}/{}", revision.header.id))?;
        let mut st = self.lock();
        let project = st
            .projects
            .entry(project_id.to_string())
            .or_insert_with(|| ProjectDto {
                id: project_id.to_string(),
                title: project_title.to_string(),
                head: None,
                revisions: Vec::new(),
            });
        project.revisions.push(revision.header.clone());
        project.head = Some(revision.header.id.clone());
        st.revisions.insert(
            (project_id.to_string(), revision.header.id.clone()),
            revision.clone(),
        );
        st.pushed.push((project_id.to_string(), revision.clone()));
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<UiEvent>>,
}

impl RecordingSink {
    pub fn actions(&self) -> Vec<UiAction> {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|e| e.action.clone())
            .collect()
    }

    pub fn events(&self) -> Vec<UiEvent> {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl EventSink for RecordingSink {
    fn emit(&self, event: UiEvent) {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(event);
    }
}
