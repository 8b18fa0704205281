use std::time::Duration;

use anyhow::{Context, Result};
use rand::Rng;
use serde_json::Value;

use crate::core::remote::SyncApi;
use crate::core::update_info::{AppInfo, AppResourceInfo, AppVersionInfo};
use crate::core::workers::{CancelFlag, Cancelled};

/// What a fresh manifest means for this installation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpdatesOutcome {
    pub newer_version: Option<AppVersionInfo>,
    pub outdated: Vec<AppResourceInfo>,
}

impl UpdatesOutcome {
    pub fn everything_up_to_date(&self) -> bool {
        self.outdated.is_empty()
    }
}

/// Waits `delay`, then downloads the manifest.
pub fn fetch_updates_info(
    api: &dyn SyncApi,
    cancel: &CancelFlag,
    delay: Duration,
) -> Result<AppInfo> {
    if !cancel.sleep(delay) {
        return Err(Cancelled.into());
    }
    api.fetch_updates_info().context("fetch updates info")
}

pub fn evaluate_updates(
    fresh: &AppInfo,
    cached: &AppInfo,
    platform: &str,
    current_version: &str,
) -> UpdatesOutcome {
    UpdatesOutcome {
        newer_version: fresh.newer_version_for(platform, current_version).cloned(),
        outdated: cached
            .outdated_resources(fresh)
            .into_iter()
            .cloned()
            .collect(),
    }
}

/// Whole seconds in `0..max_secs`, so requests don't all fire at once.
pub fn resource_fetch_delay<R: Rng + ?Sized>(rng: &mut R, max_secs: u64) -> Duration {
    if max_secs == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(rng.gen_range(0..max_secs) * 1000)
}

/// Waits `delay`, then downloads one resource document.
pub fn request_resource(
    api: &dyn SyncApi,
    cancel: &CancelFlag,
    resource_type: &str,
    delay: Duration,
) -> Result<Value> {
    if !cancel.sleep(delay) {
        return Err(Cancelled.into());
    }
    api.request_resource(resource_type)
        .with_context(|| format!("request resource {resource_type}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::testing::FakeApi;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn manifest(resources: &[(&str, &str)], versions: &[(&str, &str)]) -> AppInfo {
        AppInfo {
            versions: versions
                .iter()
                .map(|(p, v)| AppVersionInfo {
                    platform_type: p.to_string(),
                    version: v.to_string(),
                    link: format!("https://example.test/{p}/{v}"),
                })
                .collect(),
            resources: resources
                .iter()
                .map(|(t, h)| AppResourceInfo {
                    resource_type: t.to_string(),
                    hash: h.to_string(),
                })
                .collect(),
        }
    }

    #[test]
    fn evaluate_flags_changed_resources_and_newer_build() {
        let cached = manifest(&[("scales", "1"), ("translations", "1")], &[]);
        let fresh = manifest(
            &[("scales", "1"), ("translations", "2"), ("arpeggiators", "1")],
            &[("linux64", "2.0"), ("mac", "9.0")],
        );

        let out = evaluate_updates(&fresh, &cached, "linux64", "1.5");
        let types: Vec<&str> = out.outdated.iter().map(|r| r.resource_type.as_str()).collect();
        assert_eq!(types, vec!["translations", "arpeggiators"]);
        assert_eq!(out.newer_version.map(|v| v.version), Some("2.0".to_string()));

        let same = evaluate_updates(&fresh, &fresh, "linux64", "2.0");
        assert!(same.everything_up_to_date());
        assert!(same.newer_version.is_none());
    }

    #[test]
    fn fetch_delay_stays_in_whole_seconds_below_max() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..100 {
            let d = resource_fetch_delay(&mut rng, 5);
            assert!(d < Duration::from_secs(5));
            assert_eq!(d.subsec_millis(), 0);
        }
        assert_eq!(resource_fetch_delay(&mut rng, 0), Duration::ZERO);
    }

    #[test]
    fn cancelled_before_delay_elapses_skips_request() {
        let api = FakeApi::default();
        let cancel = CancelFlag::new();
        cancel.signal();
        let err = fetch_updates_info(&api, &cancel, Duration::from_secs(10)).unwrap_err();
        assert!(err.downcast_ref::<Cancelled>().is_some());
        assert_eq!(api.calls().len(), 0);
    }

    #[test]
    fn request_resource_passes_through() -> Result<()> {
        let api = FakeApi::default();
        api.set_resource("scales", serde_json::json!({"v": 1}));
        let v = request_resource(&api, &CancelFlag::new(), "scales", Duration::ZERO)?;
        assert_eq!(v["v"], 1);
        assert!(request_resource(&api, &CancelFlag::new(), "missing", Duration::ZERO).is_err());
        Ok(())
    }
}
