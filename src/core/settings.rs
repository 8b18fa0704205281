use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

// -----------------------------------------------------------------------------
// Paths. Everything lives under one root so tests can point it at a temp dir.
// -----------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct AppPaths {
    root: PathBuf,
}

impl AppPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// `~/.config/tracksync` (or the platform equivalent).
    pub fn from_system() -> Result<Self> {
        let base = dirs::config_dir().context("could not determine user config directory")?;
        Ok(Self::new(base.join("tracksync")))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn settings_path(&self) -> PathBuf {
        self.root.join("settings.json")
    }

    pub fn last_updates_info_path(&self) -> PathBuf {
        self.root.join("last_updates_info.json")
    }

    pub fn resources_dir(&self) -> PathBuf {
        self.root.join("resources")
    }

    pub fn default_projects_dir(&self) -> PathBuf {
        self.root.join("projects")
    }
}

// -----------------------------------------------------------------------------
// Disk schema (snake_case) matches `settings.json`.
// View schema (camelCase) is what hosts use over the command surface.
// -----------------------------------------------------------------------------

pub const DEFAULT_BASE_URL: &str = "https://api.helio.fm";
const SETTINGS_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", default)]
pub struct ServerDisk {
    pub base_url: String,
    pub api_token: Option<String>,
    pub request_timeout_ms: u64,
}

impl Default for ServerDisk {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            api_token: None,
            request_timeout_ms: 15_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", default)]
pub struct SyncDisk {
    pub check_updates_on_start: bool,
    pub update_check_delay_ms: u64,
    pub resource_fetch_max_delay_secs: u64,
}

impl Default for SyncDisk {
    fn default() -> Self {
        Self {
            check_updates_on_start: true,
            // Try to update resources and versions info a bit after startup.
            update_check_delay_ms: 10_000,
            resource_fetch_max_delay_secs: 5,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", default)]
pub struct PathsDisk {
    pub projects_dir: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", default)]
pub struct SettingsDisk {
    pub version: u32,
    pub server: ServerDisk,
    pub sync: SyncDisk,
    pub paths: PathsDisk,
}

impl Default for SettingsDisk {
    fn default() -> Self {
        Self {
            version: SETTINGS_VERSION,
            server: ServerDisk::default(),
            sync: SyncDisk::default(),
            paths: PathsDisk::default(),
        }
    }
}

// -----------------------------------------------------------------------------
// View schema (camelCase)
// -----------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerView {
    pub base_url: String,
    pub api_token: Option<String>,
    pub request_timeout_ms: u64,
}

impl Default for ServerView {
    fn default() -> Self {
        ServerDisk::default().into()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SyncView {
    pub check_updates_on_start: bool,
    pub update_check_delay_ms: u64,
    pub resource_fetch_max_delay_secs: u64,
}

impl Default for SyncView {
    fn default() -> Self {
        SyncDisk::default().into()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PathsView {
    pub projects_dir: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SettingsView {
    pub version: u32,
    pub server: ServerView,
    pub sync: SyncView,
    pub paths: PathsView,
}

impl Default for SettingsView {
    fn default() -> Self {
        SettingsDisk::default().into()
    }
}

macro_rules! trivial_from {
    ($disk:ty, $view:ty, { $($f:ident),* $(,)? }) => {
        impl From<$disk> for $view {
            fn from(v: $disk) -> Self {
                Self { $($f: v.$f),* }
            }
        }
        impl From<$view> for $disk {
            fn from(v: $view) -> Self {
                Self { $($f: v.$f),* }
            }
        }
    };
}

trivial_from!(ServerDisk, ServerView, { base_url, api_token, request_timeout_ms });
trivial_from!(SyncDisk, SyncView, {
    check_updates_on_start,
    update_check_delay_ms,
    resource_fetch_max_delay_secs,
});
trivial_from!(PathsDisk, PathsView, { projects_dir });

impl From<SettingsDisk> for SettingsView {
    fn from(v: SettingsDisk) -> Self {
        Self {
            version: v.version,
            server: v.server.into(),
            sync: v.sync.into(),
            paths: v.paths.into(),
        }
    }
}

impl From<SettingsView> for SettingsDisk {
    fn from(v: SettingsView) -> Self {
        Self {
            version: v.version,
            server: v.server.into(),
            sync: v.sync.into(),
            paths: v.paths.into(),
        }
    }
}

pub fn settings_get(paths: &AppPaths) -> Result<SettingsView> {
    let path = paths.settings_path();
    let text = match fs::read_to_string(&path) {
        Ok(s) => s,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(SettingsView::default()),
        Err(e) => return Err(e).with_context(|| format!("read {}", path.display())),
    };

    let disk: SettingsDisk = match serde_json::from_str(&text) {
        Ok(v) => v,
        Err(err) => {
            tracing::warn!(path = %path.display(), %err, "unreadable settings, using defaults");
            SettingsDisk::default()
        }
    };

    Ok(SettingsView::from(disk))
}

pub fn settings_set(paths: &AppPaths, view: SettingsView) -> Result<SettingsView> {
    let path = paths.settings_path();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create config dir {}", parent.display()))?;
    }

    // Normalize via disk schema so missing fields get defaults.
    let mut disk = SettingsDisk::from(view);
    if disk.version < SETTINGS_VERSION {
        disk.version = SETTINGS_VERSION;
    }
    disk.server.base_url = disk.server.base_url.trim().trim_end_matches('/').to_string();
    if disk.server.base_url.is_empty() {
        disk.server.base_url = DEFAULT_BASE_URL.to_string();
    }
    if disk
        .server
        .api_token
        .as_deref()
        .is_some_and(|t| t.trim().is_empty())
    {
        disk.server.api_token = None;
    }

    let text = serde_json::to_string_pretty(&disk).context("serialize settings.json")?;
    fs::write(&path, format!("{text}\n")).with_context(|| format!("write {}", path.display()))?;
    Ok(SettingsView::from(disk))
}

/// Runtime knobs for the sync service, derived from settings.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub check_updates_on_start: bool,
    pub update_check_delay: Duration,
    pub resource_fetch_max_delay_secs: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        sync_config_from_settings(&SettingsView::default())
    }
}

pub fn sync_config_from_settings(view: &SettingsView) -> SyncConfig {
    let s = &view.sync;
    SyncConfig {
        check_updates_on_start: s.check_updates_on_start,
        update_check_delay: Duration::from_millis(s.update_check_delay_ms),
        resource_fetch_max_delay_secs: s.resource_fetch_max_delay_secs,
    }
}

pub fn projects_dir_from_settings(paths: &AppPaths, view: &SettingsView) -> PathBuf {
    match view.paths.projects_dir.as_deref().map(str::trim) {
        Some(dir) if !dir.is_empty() => PathBuf::from(dir),
        _ => paths.default_projects_dir(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let paths = AppPaths::new(dir.path());
        let view = settings_get(&paths)?;
        assert_eq!(view.server.base_url, DEFAULT_BASE_URL);
        assert_eq!(view.sync.update_check_delay_ms, 10_000);
        assert_eq!(view.sync.resource_fetch_max_delay_secs, 5);
        Ok(())
    }

    #[test]
    fn set_normalizes_and_persists() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let paths = AppPaths::new(dir.path().join("cfg"));

        let mut view = SettingsView::default();
        view.server.base_url = " http://localhost:8080/ ".to_string();
        view.server.api_token = Some("  ".to_string());
        view.version = 0;
        let saved = settings_set(&paths, view)?;
        assert_eq!(saved.server.base_url, "http://localhost:8080");
        assert!(saved.server.api_token.is_none());
        assert_eq!(saved.version, SETTINGS_VERSION);

        let text = fs::read_to_string(paths.settings_path())?;
        assert!(text.ends_with('\n'));
        assert!(text.contains("\"base_url\""), "disk schema is snake_case");

        let loaded = settings_get(&paths)?;
        assert_eq!(loaded.server.base_url, "http://localhost:8080");
        Ok(())
    }

    #[test]
    fn partial_file_fills_defaults() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let paths = AppPaths::new(dir.path());
        fs::write(paths.settings_path(), r#"{"sync":{"update_check_delay_ms":5}}"#)?;

        let view = settings_get(&paths)?;
        assert_eq!(view.sync.update_check_delay_ms, 5);
        assert!(view.sync.check_updates_on_start);
        assert_eq!(view.server.base_url, DEFAULT_BASE_URL);

        let cfg = sync_config_from_settings(&view);
        assert_eq!(cfg.update_check_delay, Duration::from_millis(5));
        Ok(())
    }

    #[test]
    fn projects_dir_prefers_configured_value() {
        let paths = AppPaths::new("/tmp/ts-root");
        let mut view = SettingsView::default();
        assert_eq!(
            projects_dir_from_settings(&paths, &view),
            PathBuf::from("/tmp/ts-root/projects")
        );
        view.paths.projects_dir = Some("/data/projects".to_string());
        assert_eq!(
            projects_dir_from_settings(&paths, &view),
            PathBuf::from("/data/projects")
        );
    }
}
