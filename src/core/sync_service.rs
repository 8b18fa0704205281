use std::sync::{Arc, Weak};
use std::time::Duration;

use anyhow::Error;

use crate::core::project_clone;
use crate::core::remote::{error_messages, SyncApi};
use crate::core::resource_manager::ResourceManagerPool;
use crate::core::revisions_sync;
use crate::core::settings::{AppPaths, SyncConfig};
use crate::core::update_info::{platform_type, AppInfo};
use crate::core::updates_check;
use crate::core::vcs::VersionControl;
use crate::core::workers::{CancelFlag, Cancelled, WorkerKind, WorkerRegistry, WorkerStats};
use crate::core::workspace::SharedWorkspace;
use crate::events::{EventSink, UiAction, UiEvent, SYNC_DONE_MESSAGE, SYNC_UP_TO_DATE_MESSAGE};

pub struct SyncServiceDeps {
    pub api: Arc<dyn SyncApi>,
    pub events: Arc<dyn EventSink>,
    pub resource_managers: ResourceManagerPool,
    pub workspace: SharedWorkspace,
    pub paths: AppPaths,
    pub config: SyncConfig,
}

/// Owns the background workers that talk to the server: update checks,
/// resource downloads, revision fetch/sync and project clones.
///
/// Every start operation returns whether a worker was started. Starting an
/// operation whose worker is still running is a logged no-op.
pub struct ResourceSyncService {
    api: Arc<dyn SyncApi>,
    events: Arc<dyn EventSink>,
    resource_managers: ResourceManagerPool,
    workspace: SharedWorkspace,
    paths: AppPaths,
    config: SyncConfig,
    workers: WorkerRegistry,
}

pub type SharedSyncService = Arc<ResourceSyncService>;

fn first_error(err: &Error) -> String {
    error_messages(err).into_iter().next().unwrap_or_default()
}

fn is_cancelled(err: &Error) -> bool {
    err.downcast_ref::<Cancelled>().is_some()
}

impl ResourceSyncService {
    /// Builds the service and, unless disabled, schedules the delayed
    /// update check.
    pub fn start(deps: SyncServiceDeps) -> SharedSyncService {
        let svc = Arc::new(Self {
            api: deps.api,
            events: deps.events,
            resource_managers: deps.resource_managers,
            workspace: deps.workspace,
            paths: deps.paths,
            config: deps.config,
            workers: WorkerRegistry::new(),
        });
        if svc.config.check_updates_on_start {
            svc.check_for_updates(svc.config.update_check_delay);
        }
        svc
    }

    pub fn workspace(&self) -> &SharedWorkspace {
        &self.workspace
    }

    pub fn resource_managers(&self) -> &ResourceManagerPool {
        &self.resource_managers
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    fn emit(&self, action: UiAction, project_id: &str) {
        self.events.emit(UiEvent::for_project(action, project_id));
    }

    fn spawn<F>(self: &Arc<Self>, kind: WorkerKind, job: F) -> bool
    where
        F: FnOnce(Arc<Self>, CancelFlag) + Send + 'static,
    {
        let weak: Weak<Self> = Arc::downgrade(self);
        let label = kind.to_string();
        match self.workers.try_spawn(kind, move |cancel| {
            if let Some(svc) = weak.upgrade() {
                job(svc, cancel);
            }
        }) {
            Ok(true) => true,
            Ok(false) if self.workers.is_closed() => {
                tracing::debug!(worker = %label, "service is shut down, not starting");
                false
            }
            Ok(false) => {
                tracing::warn!("attempt to start a {label} worker while another one is running");
                false
            }
            Err(err) => {
                tracing::error!(worker = %label, "{err:#}");
                false
            }
        }
    }

    // -------------------------------------------------------------------------
    // Updates and resources
    // -------------------------------------------------------------------------

    pub fn check_for_updates(self: &Arc<Self>, delay: Duration) -> bool {
        self.spawn(WorkerKind::UpdatesCheck, move |svc, cancel| {
            svc.run_updates_check(&cancel, delay);
        })
    }

    fn run_updates_check(self: &Arc<Self>, cancel: &CancelFlag, delay: Duration) {
        let fresh = match updates_check::fetch_updates_info(self.api.as_ref(), cancel, delay) {
            Ok(v) => v,
            Err(err) if is_cancelled(&err) => {
                tracing::debug!("updates check cancelled");
                return;
            }
            Err(err) => {
                tracing::debug!("updates check failed: {}", first_error(&err));
                return;
            }
        };

        let cached_path = self.paths.last_updates_info_path();
        let cached = AppInfo::load(&cached_path).unwrap_or_else(|err| {
            tracing::warn!("{err:#}");
            AppInfo::default()
        });

        let outcome = updates_check::evaluate_updates(
            &fresh,
            &cached,
            platform_type(),
            crate::VERSION,
        );

        if let Some(newer) = &outcome.newer_version {
            tracing::info!(version = %newer.version, "newer version available");
            self.events.emit(UiEvent::new(UiAction::UpdateAvailable {
                version: newer.version.clone(),
                link: newer.link.clone(),
            }));
        }

        if cancel.should_exit() {
            tracing::debug!("updates check cancelled");
            return;
        }

        let mut rng = rand::thread_rng();
        for resource in &outcome.outdated {
            let wait = updates_check::resource_fetch_delay(
                &mut rng,
                self.config.resource_fetch_max_delay_secs,
            );
            self.request_resource(&resource.resource_type, wait);
        }
        if outcome.everything_up_to_date() {
            tracing::info!("all resources are up to date");
        }

        // Versions info might have changed too.
        if cancel.should_exit() {
            return;
        }
        if let Err(err) = fresh.save(&cached_path) {
            tracing::warn!("{err:#}");
        }
    }

    /// Downloads one resource after `delay` and hands it to its manager.
    pub fn request_resource(self: &Arc<Self>, resource_type: &str, delay: Duration) -> bool {
        let resource_type = resource_type.to_string();
        let kind = WorkerKind::RequestResource(resource_type.clone());
        self.spawn(kind, move |svc, cancel| {
            svc.run_resource_request(&cancel, &resource_type, delay);
        })
    }

    fn run_resource_request(&self, cancel: &CancelFlag, resource_type: &str, delay: Duration) {
        let resource =
            match updates_check::request_resource(self.api.as_ref(), cancel, resource_type, delay) {
                Ok(v) => v,
                Err(err) if is_cancelled(&err) => return,
                Err(err) => {
                    tracing::warn!(resource = resource_type, "{}", first_error(&err));
                    return;
                }
            };

        match self.resource_managers.get(resource_type) {
            Some(manager) => {
                if let Err(err) = manager.update_base_resource(resource) {
                    tracing::warn!(resource = resource_type, "{err:#}");
                }
            }
            None => tracing::debug!(resource = resource_type, "no manager for resource"),
        }
    }

    // -------------------------------------------------------------------------
    // Revisions
    // -------------------------------------------------------------------------

    /// Refreshes the remote revision list in the background. No UI feedback.
    pub fn fetch_revisions_info(
        self: &Arc<Self>,
        vcs: Weak<VersionControl>,
        project_id: &str,
    ) -> bool {
        let project_id = project_id.to_string();
        self.spawn(WorkerKind::Revisions, move |svc, _cancel| {
            match revisions_sync::fetch_revisions_info(svc.api.as_ref(), &vcs, &project_id) {
                Ok(status) => {
                    tracing::debug!(
                        project_id = %project_id,
                        local_only = status.local_only.len(),
                        remote_only = status.remote_only.len(),
                        "revisions info fetched"
                    );
                    svc.persist(&project_id);
                }
                Err(err) => {
                    tracing::warn!(project_id = %project_id, "fetch failed: {}", first_error(&err))
                }
            }
        })
    }

    /// Pulls and pushes `revision_ids`, or everything out of sync when empty.
    pub fn sync_revisions(
        self: &Arc<Self>,
        vcs: Weak<VersionControl>,
        project_id: &str,
        project_name: &str,
        revision_ids: Vec<String>,
    ) -> bool {
        let project_id = project_id.to_string();
        let project_name = project_name.to_string();
        self.spawn(WorkerKind::Revisions, move |svc, cancel| {
            let result = revisions_sync::sync_revisions(
                svc.api.as_ref(),
                &vcs,
                &project_id,
                &project_name,
                &revision_ids,
                &cancel,
            );
            match result {
                Ok(report) => {
                    if !report.nothing_to_sync() {
                        svc.persist(&project_id);
                    }
                    svc.on_sync_done(&project_id, report.nothing_to_sync());
                }
                Err(err) => {
                    tracing::warn!(project_id = %project_id, "sync failed: {err:#}");
                    svc.on_sync_failed(&project_id, &error_messages(&err));
                }
            }
        })
    }

    pub fn cancel_sync_revisions(&self) -> bool {
        self.workers.signal(&WorkerKind::Revisions)
    }

    fn on_sync_done(&self, project_id: &str, nothing_to_sync: bool) {
        self.emit(UiAction::HideModal, project_id);
        let message = if nothing_to_sync {
            SYNC_UP_TO_DATE_MESSAGE
        } else {
            SYNC_DONE_MESSAGE
        };
        self.emit(
            UiAction::Tooltip {
                message: message.to_string(),
            },
            project_id,
        );
        self.emit(UiAction::Success, project_id);
    }

    fn on_sync_failed(&self, project_id: &str, errors: &[String]) {
        self.emit(UiAction::HideModal, project_id);
        if let Some(first) = errors.first() {
            self.emit(
                UiAction::Tooltip {
                    message: first.clone(),
                },
                project_id,
            );
        }
        self.emit(UiAction::Failure, project_id);
    }

    /// Saves the project if the workspace still has it loaded.
    fn persist(&self, project_id: &str) {
        if self.workspace.project(project_id).is_none() {
            return;
        }
        if let Err(err) = self.workspace.save_project(project_id) {
            tracing::warn!(project_id, "{err:#}");
        }
    }

    // -------------------------------------------------------------------------
    // Clone
    // -------------------------------------------------------------------------

    /// Fills the (empty, loaded) project stub from the server. On failure the
    /// stub is unloaded and its local files are deleted.
    pub fn clone_project(self: &Arc<Self>, vcs: Weak<VersionControl>, project_id: &str) -> bool {
        let project_id = project_id.to_string();
        self.spawn(WorkerKind::ProjectClone, move |svc, cancel| {
            // Shown from the worker so a rejected caller never touches the modal.
            svc.emit(UiAction::ShowProgress { cancellable: false }, &project_id);
            let result = project_clone::clone_project(
                svc.api.as_ref(),
                &svc.workspace,
                &vcs,
                &project_id,
                &cancel,
            );
            match result {
                Ok(_) => {
                    svc.emit(UiAction::HideModal, &project_id);
                    svc.emit(UiAction::Success, &project_id);
                }
                Err(err) => {
                    tracing::warn!(project_id = %project_id, "clone failed: {err:#}");
                    svc.on_clone_failed(&project_id, &error_messages(&err));
                }
            }
        })
    }

    pub fn cancel_clone_project(&self) -> bool {
        self.workers.signal(&WorkerKind::ProjectClone)
    }

    fn on_clone_failed(&self, project_id: &str, errors: &[String]) {
        self.emit(UiAction::HideModal, project_id);
        if let Some(first) = errors.first() {
            self.emit(
                UiAction::Tooltip {
                    message: first.clone(),
                },
                project_id,
            );
        }
        self.emit(UiAction::Failure, project_id);

        // Drop the half-cloned stub, files included.
        if let Err(err) = self.workspace.unload_project(project_id, true) {
            tracing::warn!(project_id, "{err:#}");
        }
    }

    // -------------------------------------------------------------------------
    // Introspection / lifecycle
    // -------------------------------------------------------------------------

    pub fn is_running(&self, kind: &WorkerKind) -> bool {
        self.workers.is_running(kind)
    }

    pub fn stats(&self) -> WorkerStats {
        self.workers.stats()
    }

    pub fn wait_idle(&self, timeout: Duration) -> bool {
        self.workers.wait_idle(timeout)
    }

    /// Cancels and joins every worker.
    pub fn shutdown(&self) {
        self.workers.shutdown();
    }
}
