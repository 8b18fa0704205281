pub mod commands;
pub mod core;
pub mod events;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;

use crate::core::remote::HttpSyncApi;
use crate::core::resource_manager::ResourceManagerPool;
use crate::core::settings::{self, AppPaths, SyncConfig};
use crate::core::sync_service::{ResourceSyncService, SharedSyncService, SyncServiceDeps};
use crate::core::workspace::Workspace;
use crate::events::{ui_channel, UiQueue};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// `RUST_LOG` wins; otherwise info for this crate only.
pub fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let _ = fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("tracksync=info")),
        )
        .with_target(false)
        .with_thread_names(true)
        .try_init();
}

/// A started sync service plus the queue its UI feedback lands in.
/// Whoever owns the UI thread drains `ui`.
pub struct Runtime {
    pub paths: AppPaths,
    pub service: SharedSyncService,
    pub ui: UiQueue,
}

pub fn start(paths: AppPaths) -> Result<Runtime> {
    start_with(paths, |_| {})
}

/// Like [`start`], with a chance to adjust the sync config read from settings.
pub fn start_with(paths: AppPaths, tweak: impl FnOnce(&mut SyncConfig)) -> Result<Runtime> {
    let view = settings::settings_get(&paths)?;
    let mut config = settings::sync_config_from_settings(&view);
    tweak(&mut config);

    let api = HttpSyncApi::new(
        &view.server.base_url,
        view.server.api_token.clone(),
        Duration::from_millis(view.server.request_timeout_ms),
    )?;
    let projects_dir = settings::projects_dir_from_settings(&paths, &view);
    tracing::debug!(
        base_url = %view.server.base_url,
        projects_dir = %projects_dir.display(),
        "starting sync service"
    );

    let (sink, ui) = ui_channel();
    let service = ResourceSyncService::start(SyncServiceDeps {
        api: Arc::new(api),
        events: Arc::new(sink),
        resource_managers: ResourceManagerPool::with_defaults(&paths.resources_dir()),
        workspace: Arc::new(Workspace::new(projects_dir)),
        paths: paths.clone(),
        config,
    });

    Ok(Runtime { paths, service, ui })
}
