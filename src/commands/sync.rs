use std::sync::Arc;
use std::time::Duration;

use crate::core::sync_service::SharedSyncService;
use crate::core::vcs::SyncStatus;
use crate::core::workers::WorkerStats;
use crate::core::workspace::LocalProject;

#[derive(Debug, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VcsProjectArgs {
    pub project_id: String,
}

#[derive(Debug, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VcsSyncArgs {
    pub project_id: String,
    /// Empty means everything that is out of sync.
    #[serde(default)]
    pub revision_ids: Vec<String>,
}

#[derive(Debug, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectCloneArgs {
    pub project_id: String,
    #[serde(default)]
    pub project_name: Option<String>,
}

#[derive(Debug, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StartedResponse {
    pub started: bool,
}

#[derive(Debug, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelResponse {
    pub cancelled: bool,
}

#[derive(Debug, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VcsStatusResponse {
    pub project_id: String,
    pub project_name: String,
    pub revisions: usize,
    pub head: Option<String>,
    pub has_remote_info: bool,
    pub status: SyncStatus,
}

pub fn vcs_fetch(
    svc: &SharedSyncService,
    args: VcsProjectArgs,
) -> std::result::Result<StartedResponse, String> {
    let vcs = svc
        .workspace()
        .load_project(&args.project_id)
        .map_err(|e| format!("{e:#}"))?;
    let started = svc.fetch_revisions_info(Arc::downgrade(&vcs), &args.project_id);
    Ok(StartedResponse { started })
}

pub fn vcs_sync(
    svc: &SharedSyncService,
    args: VcsSyncArgs,
) -> std::result::Result<StartedResponse, String> {
    let vcs = svc
        .workspace()
        .load_project(&args.project_id)
        .map_err(|e| format!("{e:#}"))?;
    let started = svc.sync_revisions(
        Arc::downgrade(&vcs),
        &args.project_id,
        &vcs.project_name(),
        args.revision_ids,
    );
    Ok(StartedResponse { started })
}

pub fn vcs_cancel_sync(svc: &SharedSyncService) -> CancelResponse {
    CancelResponse {
        cancelled: svc.cancel_sync_revisions(),
    }
}

pub fn vcs_status(
    svc: &SharedSyncService,
    args: VcsProjectArgs,
) -> std::result::Result<VcsStatusResponse, String> {
    let vcs = svc
        .workspace()
        .load_project(&args.project_id)
        .map_err(|e| format!("{e:#}"))?;
    Ok(VcsStatusResponse {
        project_id: args.project_id,
        project_name: vcs.project_name(),
        revisions: vcs.revisions().len(),
        head: vcs.head().map(|r| r.id),
        has_remote_info: vcs.has_remote_info(),
        status: vcs.sync_status(),
    })
}

/// Creates the local stub and starts filling it. If the clone cannot start,
/// the stub is removed again.
pub fn project_clone(
    svc: &SharedSyncService,
    args: ProjectCloneArgs,
) -> std::result::Result<StartedResponse, String> {
    let name = args
        .project_name
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or(&args.project_id)
        .to_string();
    let stub = svc
        .workspace()
        .create_project_stub(&args.project_id, &name)
        .map_err(|e| format!("{e:#}"))?;

    let started = svc.clone_project(Arc::downgrade(&stub), &args.project_id);
    if !started {
        svc.workspace()
            .unload_project(&args.project_id, true)
            .map_err(|e| format!("{e:#}"))?;
    }
    Ok(StartedResponse { started })
}

pub fn project_cancel_clone(svc: &SharedSyncService) -> CancelResponse {
    CancelResponse {
        cancelled: svc.cancel_clone_project(),
    }
}

pub fn projects_list(svc: &SharedSyncService) -> std::result::Result<Vec<LocalProject>, String> {
    svc.workspace()
        .list_local_projects()
        .map_err(|e| format!("{e:#}"))
}

pub fn updates_check_now(svc: &SharedSyncService) -> StartedResponse {
    StartedResponse {
        started: svc.check_for_updates(Duration::ZERO),
    }
}

pub fn sync_worker_stats(svc: &SharedSyncService) -> WorkerStats {
    svc.stats()
}
