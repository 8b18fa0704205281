use std::collections::{BTreeSet, HashMap, HashSet};
use std::fs;
use std::path::Path;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Mutex, MutexGuard};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{bail, Context, Result};
use serde::Serialize;
use uuid::Uuid;

use crate::core::delta::{Delta, DELTA_TAG};
use crate::core::remote::{RevisionDto, RevisionHeader};
use crate::core::tree::TreeNode;

const PROJECT_TAG: &str = "project";
const REVISION_TAG: &str = "revision";
const REMOTE_CACHE_TAG: &str = "remoteCache";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Revision {
    pub id: String,
    pub message: String,
    pub timestamp_ms: i64,
    pub parent_id: Option<String>,
    pub deltas: Vec<Delta>,
}

impl Revision {
    pub fn header(&self) -> RevisionHeader {
        RevisionHeader {
            id: self.id.clone(),
            message: self.message.clone(),
            timestamp_ms: self.timestamp_ms,
            parent_id: self.parent_id.clone(),
        }
    }

    pub fn serialize(&self) -> TreeNode {
        let mut node = TreeNode::new(REVISION_TAG)
            .with_attribute("id", self.id.as_str())
            .with_attribute("message", self.message.as_str())
            .with_attribute("timestamp", self.timestamp_ms.to_string());
        if let Some(parent) = &self.parent_id {
            node.set_attribute("parent", parent.as_str());
        }
        for d in &self.deltas {
            node.add_child(d.serialize());
        }
        node
    }

    pub fn deserialize(tree: &TreeNode) -> Result<Self> {
        if !tree.has_tag(REVISION_TAG) {
            bail!("expected a '{REVISION_TAG}' element, found '{}'", tree.tag);
        }
        let id = tree
            .attribute("id")
            .filter(|s| !s.trim().is_empty())
            .context("revision without id")?
            .to_string();
        Ok(Self {
            id,
            message: tree.attribute_or("message", ""),
            timestamp_ms: tree
                .attribute("timestamp")
                .and_then(|s| s.parse().ok())
                .unwrap_or(0),
            parent_id: tree.attribute("parent").map(str::to_string),
            deltas: tree.children_by_name(DELTA_TAG).map(Delta::from_tree).collect(),
        })
    }

    pub fn to_dto(&self) -> RevisionDto {
        RevisionDto {
            header: self.header(),
            data: self.serialize(),
        }
    }

    pub fn from_dto(dto: &RevisionDto) -> Result<Self> {
        let rev = Self::deserialize(&dto.data)
            .with_context(|| format!("decode revision {}", dto.header.id))?;
        if rev.id != dto.header.id {
            bail!(
                "revision payload id {} does not match header id {}",
                rev.id,
                dto.header.id
            );
        }
        Ok(rev)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    pub local_only: Vec<String>,
    pub remote_only: Vec<String>,
    pub shared: Vec<String>,
}

impl SyncStatus {
    pub fn is_up_to_date(&self) -> bool {
        self.local_only.is_empty() && self.remote_only.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VcsChange {
    Committed,
    RemoteCacheUpdated,
    RevisionPulled,
    Loaded,
}

#[derive(Default)]
struct VcsState {
    project_name: String,
    revisions: Vec<Revision>,
    remote_cache: Vec<RevisionHeader>,
    remote_fetched: bool,
    change_count: u64,
    subscribers: Vec<Sender<VcsChange>>,
}

/// Local revision history of a single project plus what we last saw remotely.
pub struct VersionControl {
    project_id: String,
    state: Mutex<VcsState>,
}

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

impl VersionControl {
    pub fn new(project_id: impl Into<String>, project_name: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            state: Mutex::new(VcsState {
                project_name: project_name.into(),
                ..VcsState::default()
            }),
        }
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    pub fn project_name(&self) -> String {
        self.lock().project_name.clone()
    }

    pub fn set_project_name(&self, name: &str) {
        self.lock().project_name = name.to_string();
    }

    fn lock(&self) -> MutexGuard<'_, VcsState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn notify(state: &mut VcsState, change: VcsChange) {
        state.change_count += 1;
        state.subscribers.retain(|tx| tx.send(change).is_ok());
    }

    pub fn subscribe(&self) -> Receiver<VcsChange> {
        let (tx, rx) = mpsc::channel();
        self.lock().subscribers.push(tx);
        rx
    }

    pub fn change_count(&self) -> u64 {
        self.lock().change_count
    }

    pub fn commit(&self, message: &str, deltas: Vec<Delta>) -> Revision {
        let mut st = self.lock();
        let rev = Revision {
            id: Uuid::new_v4().to_string(),
            message: message.to_string(),
            timestamp_ms: now_ms(),
            parent_id: st.revisions.last().map(|r| r.id.clone()),
            deltas,
        };
        st.revisions.push(rev.clone());
        Self::notify(&mut st, VcsChange::Committed);
        rev
    }

    pub fn revisions(&self) -> Vec<Revision> {
        self.lock().revisions.clone()
    }

    pub fn head(&self) -> Option<Revision> {
        self.lock().revisions.last().cloned()
    }

    pub fn revision(&self, id: &str) -> Option<Revision> {
        self.lock().revisions.iter().find(|r| r.id == id).cloned()
    }

    pub fn has_revision(&self, id: &str) -> bool {
        self.lock().revisions.iter().any(|r| r.id == id)
    }

    pub fn update_remote_cache(&self, headers: Vec<RevisionHeader>) {
        let mut st = self.lock();
        st.remote_cache = headers;
        st.remote_fetched = true;
        Self::notify(&mut st, VcsChange::RemoteCacheUpdated);
    }

    pub fn remote_cache(&self) -> Vec<RevisionHeader> {
        self.lock().remote_cache.clone()
    }

    pub fn has_remote_info(&self) -> bool {
        self.lock().remote_fetched
    }

    pub fn sync_status(&self) -> SyncStatus {
        let st = self.lock();
        let local: BTreeSet<&str> = st.revisions.iter().map(|r| r.id.as_str()).collect();
        let remote: BTreeSet<&str> = st.remote_cache.iter().map(|h| h.id.as_str()).collect();

        // Keep history order rather than id order.
        let local_only = st
            .revisions
            .iter()
            .filter(|r| !remote.contains(r.id.as_str()))
            .map(|r| r.id.clone())
            .collect();
        let remote_only = st
            .remote_cache
            .iter()
            .filter(|h| !local.contains(h.id.as_str()))
            .map(|h| h.id.clone())
            .collect();
        let shared = st
            .revisions
            .iter()
            .filter(|r| remote.contains(r.id.as_str()))
            .map(|r| r.id.clone())
            .collect();

        SyncStatus {
            local_only,
            remote_only,
            shared,
        }
    }

    /// Adds every revision not present yet and orders the history once.
    /// Returns the ids that were actually added.
    pub fn apply_remote_revisions(&self, revisions: Vec<Revision>) -> Vec<String> {
        let mut st = self.lock();
        let mut known: HashSet<String> = st.revisions.iter().map(|r| r.id.clone()).collect();
        let mut added = Vec::new();
        for revision in revisions {
            if !known.insert(revision.id.clone()) {
                continue;
            }
            if !st.remote_cache.iter().any(|h| h.id == revision.id) {
                st.remote_cache.push(revision.header());
            }
            added.push(revision.id.clone());
            st.revisions.push(revision);
        }
        if !added.is_empty() {
            sort_by_ancestry(&mut st.revisions);
            Self::notify(&mut st, VcsChange::RevisionPulled);
        }
        added
    }

    /// Records that a local revision now also exists remotely.
    pub fn mark_pushed(&self, id: &str) {
        let mut st = self.lock();
        let Some(header) = st.revisions.iter().find(|r| r.id == id).map(|r| r.header()) else {
            return;
        };
        if !st.remote_cache.iter().any(|h| h.id == id) {
            st.remote_cache.push(header);
            Self::notify(&mut st, VcsChange::RemoteCacheUpdated);
        }
    }

    pub fn serialize(&self) -> TreeNode {
        let st = self.lock();
        let mut root = TreeNode::new(PROJECT_TAG)
            .with_attribute("id", self.project_id.as_str())
            .with_attribute("name", st.project_name.as_str());
        for r in &st.revisions {
            root.add_child(r.serialize());
        }
        let mut cache = TreeNode::new(REMOTE_CACHE_TAG);
        for h in &st.remote_cache {
            let mut node = TreeNode::new(REVISION_TAG)
                .with_attribute("id", h.id.as_str())
                .with_attribute("message", h.message.as_str())
                .with_attribute("timestamp", h.timestamp_ms.to_string());
            if let Some(p) = &h.parent_id {
                node.set_attribute("parent", p.as_str());
            }
            cache.add_child(node);
        }
        if st.remote_fetched {
            root.add_child(cache);
        }
        root
    }

    pub fn deserialize(tree: &TreeNode) -> Result<Self> {
        if !tree.has_tag(PROJECT_TAG) {
            bail!("expected a '{PROJECT_TAG}' element, found '{}'", tree.tag);
        }
        let id = tree.attribute("id").context("project without id")?;
        let vcs = Self::new(id, tree.attribute_or("name", ""));
        {
            let mut st = vcs.lock();
            for node in tree.children_by_name(REVISION_TAG) {
                st.revisions.push(Revision::deserialize(node)?);
            }
            if let Some(cache) = tree.child_by_name(REMOTE_CACHE_TAG) {
                st.remote_cache = cache
                    .children_by_name(REVISION_TAG)
                    .filter_map(|n| Revision::deserialize(n).ok())
                    .map(|r| r.header())
                    .collect();
                st.remote_fetched = true;
            }
            Self::notify(&mut st, VcsChange::Loaded);
        }
        Ok(vcs)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create dir {}", parent.display()))?;
        }
        let text = self.serialize().to_json_string()?;
        fs::write(path, format!("{text}\n")).with_context(|| format!("write {}", path.display()))?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text =
            fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
        let tree = TreeNode::from_json_str(&text)
            .with_context(|| format!("parse {}", path.display()))?;
        Self::deserialize(&tree)
    }
}

/// Parents before children; unrelated revisions keep timestamp order.
fn sort_by_ancestry(revisions: &mut Vec<Revision>) {
    revisions.sort_by_key(|r| r.timestamp_ms);

    let index: HashMap<String, usize> = revisions
        .iter()
        .enumerate()
        .map(|(i, r)| (r.id.clone(), i))
        .collect();
    let mut placed = vec![false; revisions.len()];
    let mut order = Vec::with_capacity(revisions.len());

    for i in 0..revisions.len() {
        // Walk up to the first placed ancestor, then emit the chain root-first.
        let mut chain = Vec::new();
        let mut cur = Some(i);
        while let Some(c) = cur {
            if placed[c] {
                break;
            }
            placed[c] = true;
            chain.push(c);
            cur = revisions[c].parent_id.as_ref().and_then(|p| index.get(p)).copied();
        }
        order.extend(chain.into_iter().rev());
    }

    let mut taken: Vec<Option<Revision>> = revisions.drain(..).map(Some).collect();
    revisions.extend(order.into_iter().filter_map(|i| taken[i].take()));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::delta::DeltaDescription;

    fn header(id: &str) -> RevisionHeader {
        RevisionHeader {
            id: id.to_string(),
            message: String::new(),
            timestamp_ms: 0,
            parent_id: None,
        }
    }

    #[test]
    fn commit_chains_parents() {
        let vcs = VersionControl::new("p", "Song");
        let a = vcs.commit("first", vec![]);
        let b = vcs.commit("second", vec![]);
        assert_eq!(a.parent_id, None);
        assert_eq!(b.parent_id.as_deref(), Some(a.id.as_str()));
        assert_eq!(vcs.head().map(|r| r.id), Some(b.id));
    }

    #[test]
    fn sync_status_splits_ids() {
        let vcs = VersionControl::new("p", "Song");
        let a = vcs.commit("a", vec![]);
        let b = vcs.commit("b", vec![]);
        vcs.update_remote_cache(vec![header(&a.id), header("remote-1")]);

        let status = vcs.sync_status();
        assert_eq!(status.shared, vec![a.id]);
        assert_eq!(status.local_only, vec![b.id]);
        assert_eq!(status.remote_only, vec!["remote-1".to_string()]);
        assert!(!status.is_up_to_date());
    }

    #[test]
    fn apply_remote_revisions_is_idempotent_and_orders_by_parent() {
        let vcs = VersionControl::new("p", "Song");
        let parent = Revision {
            id: "r1".into(),
            message: "one".into(),
            timestamp_ms: 50,
            parent_id: None,
            deltas: vec![],
        };
        let child = Revision {
            id: "r2".into(),
            message: "two".into(),
            timestamp_ms: 10,
            parent_id: Some("r1".into()),
            deltas: vec![],
        };

        assert_eq!(vcs.apply_remote_revisions(vec![child.clone()]), vec!["r2"]);
        assert_eq!(vcs.apply_remote_revisions(vec![parent, child]), vec!["r1"]);

        let ids: Vec<String> = vcs.revisions().into_iter().map(|r| r.id).collect();
        assert_eq!(ids, vec!["r1", "r2"]);
        assert!(vcs.sync_status().is_up_to_date());
    }

    #[test]
    fn long_remote_chain_is_ordered_parent_first() {
        let vcs = VersionControl::new("p", "Song");
        // Newest first with falling timestamps, so every parent sorts after its child.
        let batch: Vec<Revision> = (0..5000)
            .rev()
            .map(|i| Revision {
                id: format!("r{i}"),
                message: String::new(),
                timestamp_ms: 10_000 - i,
                parent_id: (i > 0).then(|| format!("r{}", i - 1)),
                deltas: vec![],
            })
            .collect();
        let rx = vcs.subscribe();

        let added = vcs.apply_remote_revisions(batch.clone());
        assert_eq!(added.len(), 5000);
        assert!(vcs.apply_remote_revisions(batch).is_empty());

        let ids: Vec<String> = vcs.revisions().into_iter().map(|r| r.id).collect();
        let expected: Vec<String> = (0..5000).map(|i| format!("r{i}")).collect();
        assert_eq!(ids, expected);
        assert_eq!(vcs.remote_cache().len(), 5000);
        assert_eq!(rx.try_iter().count(), 1, "one notification per batch");
    }

    #[test]
    fn subscribers_see_changes() {
        let vcs = VersionControl::new("p", "Song");
        let rx = vcs.subscribe();
        vcs.commit("a", vec![]);
        vcs.update_remote_cache(vec![]);
        assert_eq!(rx.try_recv().ok(), Some(VcsChange::Committed));
        assert_eq!(rx.try_recv().ok(), Some(VcsChange::RemoteCacheUpdated));
        assert_eq!(vcs.change_count(), 2);
    }

    #[test]
    fn revision_dto_round_trip_keeps_deltas() -> Result<()> {
        let vcs = VersionControl::new("p", "Song");
        let rev = vcs.commit(
            "notes",
            vec![Delta::new(DeltaDescription::with_int("{x} notes", 3), "notes")],
        );
        let back = Revision::from_dto(&rev.to_dto())?;
        assert_eq!(back, rev);
        Ok(())
    }

    #[test]
    fn mismatched_dto_id_is_rejected() {
        let vcs = VersionControl::new("p", "Song");
        let mut dto = vcs.commit("x", vec![]).to_dto();
        dto.header.id = "other".to_string();
        assert!(Revision::from_dto(&dto).is_err());
    }

    #[test]
    fn save_and_load_project() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("p").join("project.json");

        let vcs = VersionControl::new("p", "Song");
        let a = vcs.commit("a", vec![Delta::new(DeltaDescription::new("t"), "k")]);
        vcs.update_remote_cache(vec![a.header()]);
        vcs.save(&path)?;

        let loaded = VersionControl::load(&path)?;
        assert_eq!(loaded.project_id(), "p");
        assert_eq!(loaded.project_name(), "Song");
        assert_eq!(loaded.revisions(), vec![a.clone()]);
        assert_eq!(loaded.remote_cache(), vec![a.header()]);
        assert!(loaded.has_remote_info());
        Ok(())
    }
}
