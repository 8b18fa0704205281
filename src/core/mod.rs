pub mod delta;
pub mod project_clone;
pub mod remote;
pub mod resource_manager;
pub mod revisions_sync;
pub mod settings;
pub mod sync_service;
pub mod tree;
pub mod update_info;
pub mod updates_check;
pub mod vcs;
pub mod workers;
pub mod workspace;

#[cfg(test)]
pub(crate) mod testing;
