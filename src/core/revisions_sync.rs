use std::collections::HashSet;
use std::sync::{Arc, Weak};

use anyhow::{Context, Result};
use serde::Serialize;

use crate::core::remote::SyncApi;
use crate::core::vcs::{Revision, SyncStatus, VersionControl};
use crate::core::workers::CancelFlag;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    pub pulled: Vec<String>,
    pub pushed: Vec<String>,
    pub skipped_unknown: Vec<String>,
}

impl SyncReport {
    pub fn nothing_to_sync(&self) -> bool {
        self.pulled.is_empty() && self.pushed.is_empty()
    }
}

pub(crate) fn upgrade(vcs: &Weak<VersionControl>) -> Result<Arc<VersionControl>> {
    vcs.upgrade().context("project is no longer loaded")
}

/// Refreshes the remote revision list kept in the project's version control.
pub fn fetch_revisions_info(
    api: &dyn SyncApi,
    vcs: &Weak<VersionControl>,
    project_id: &str,
) -> Result<SyncStatus> {
    let headers = api
        .fetch_revision_headers(project_id)
        .with_context(|| format!("fetch revisions of {project_id}"))?;
    let vcs = upgrade(vcs)?;
    vcs.update_remote_cache(headers);
    Ok(vcs.sync_status())
}

/// Pulls remote-only and pushes local-only revisions among `revision_ids`.
/// An empty list means every revision that is out of sync.
pub fn sync_revisions(
    api: &dyn SyncApi,
    vcs: &Weak<VersionControl>,
    project_id: &str,
    project_name: &str,
    revision_ids: &[String],
    cancel: &CancelFlag,
) -> Result<SyncReport> {
    let status = fetch_revisions_info(api, vcs, project_id)?;
    cancel.check()?;

    let wanted: Option<HashSet<&str>> = if revision_ids.is_empty() {
        None
    } else {
        Some(revision_ids.iter().map(|s| s.as_str()).collect())
    };
    let is_wanted = |id: &str| wanted.as_ref().map_or(true, |w| w.contains(id));

    let mut report = SyncReport::default();
    if let Some(w) = &wanted {
        let known: HashSet<&str> = status
            .local_only
            .iter()
            .chain(&status.remote_only)
            .chain(&status.shared)
            .map(|s| s.as_str())
            .collect();
        for id in revision_ids {
            if !known.contains(id.as_str()) && w.contains(id.as_str()) {
                tracing::warn!(project_id, revision = %id, "skipping unknown revision");
                report.skipped_unknown.push(id.clone());
            }
        }
    }

    let mut fetched = Vec::new();
    for id in status.remote_only.iter().filter(|id| is_wanted(id.as_str())) {
        cancel.check()?;
        let dto = api
            .fetch_revision(project_id, id)
            .with_context(|| format!("fetch revision {id}"))?;
        fetched.push(Revision::from_dto(&dto)?);
    }
    if !fetched.is_empty() {
        cancel.check()?;
        report.pulled = upgrade(vcs)?.apply_remote_revisions(fetched);
    }

    // local_only is in history order, so parents go up before children.
    for id in status.local_only.iter().filter(|id| is_wanted(id.as_str())) {
        cancel.check()?;
        let local = upgrade(vcs)?;
        let Some(revision) = local.revision(id) else {
            continue;
        };
        api.put_revision(project_id, project_name, &revision.to_dto())
            .with_context(|| format!("push revision {id}"))?;
        local.mark_pushed(id);
        report.pushed.push(id.clone());
    }

    tracing::info!(
        project_id,
        pulled = report.pulled.len(),
        pushed = report.pushed.len(),
        "revisions synced"
    );
    Ok(report)
}
