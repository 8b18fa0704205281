use std::sync::Weak;

use anyhow::{Context, Result};

use crate::core::remote::SyncApi;
use crate::core::revisions_sync::upgrade;
use crate::core::vcs::{Revision, VersionControl};
use crate::core::workers::CancelFlag;
use crate::core::workspace::Workspace;

/// Fills an empty project stub with the full remote history and saves it.
/// Returns the number of revisions cloned.
pub fn clone_project(
    api: &dyn SyncApi,
    workspace: &Workspace,
    vcs: &Weak<VersionControl>,
    project_id: &str,
    cancel: &CancelFlag,
) -> Result<usize> {
    let project = api
        .fetch_project(project_id)
        .with_context(|| format!("fetch project {project_id}"))?;
    cancel.check()?;

    let headers = if project.revisions.is_empty() {
        api.fetch_revision_headers(project_id)
            .with_context(|| format!("fetch revisions of {project_id}"))?
    } else {
        project.revisions.clone()
    };

    let target = upgrade(vcs)?;
    if !project.title.trim().is_empty() {
        target.set_project_name(&project.title);
    }

    let mut fetched = Vec::with_capacity(headers.len());
    for header in &headers {
        cancel.check()?;
        let dto = api
            .fetch_revision(project_id, &header.id)
            .with_context(|| format!("fetch revision {}", header.id))?;
        fetched.push(Revision::from_dto(&dto)?);
    }
    cancel.check()?;

    let cloned = target.apply_remote_revisions(fetched).len();
    target.update_remote_cache(headers);
    workspace.save_project(project_id)?;
    tracing::info!(project_id, revisions = cloned, "project cloned");
    Ok(cloned)
}
