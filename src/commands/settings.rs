use crate::core::settings::{AppPaths, SettingsView};

#[derive(Debug, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsSetArgs {
    pub settings: SettingsView,
}

pub fn settings_get(paths: &AppPaths) -> std::result::Result<SettingsView, String> {
    crate::core::settings::settings_get(paths).map_err(|e| format!("{e:#}"))
}

/// Takes effect on the next start; running workers keep their config.
pub fn settings_set(
    paths: &AppPaths,
    args: SettingsSetArgs,
) -> std::result::Result<SettingsView, String> {
    crate::core::settings::settings_set(paths, args.settings).map_err(|e| format!("{e:#}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_accepts_camel_case_view() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let paths = AppPaths::new(dir.path());
        let args: SettingsSetArgs = serde_json::from_value(serde_json::json!({
            "settings": {
                "server": { "baseUrl": "http://localhost:9000/" },
                "sync": { "checkUpdatesOnStart": false }
            }
        }))?;
        let saved = settings_set(&paths, args).map_err(anyhow::Error::msg)?;
        assert_eq!(saved.server.base_url, "http://localhost:9000");
        assert!(!saved.sync.check_updates_on_start);
        assert_eq!(saved.sync.update_check_delay_ms, 10_000);

        let loaded = settings_get(&paths).map_err(anyhow::Error::msg)?;
        assert_eq!(loaded.server.base_url, "http://localhost:9000");
        Ok(())
    }
}
