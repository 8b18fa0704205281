use std::cmp::Ordering;
use std::fs;
use std::path::Path;
use std::sync::OnceLock;

use anyhow::{Context, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppVersionInfo {
    pub platform_type: String,
    pub version: String,
    #[serde(default)]
    pub link: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppResourceInfo {
    #[serde(rename = "type")]
    pub resource_type: String,
    pub hash: String,
}

/// Server manifest: available app builds and the current hash of each resource.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AppInfo {
    pub versions: Vec<AppVersionInfo>,
    pub resources: Vec<AppResourceInfo>,
}

impl AppInfo {
    /// `self` is the cached manifest. A resource is outdated unless the cache
    /// holds the same type with an identical hash.
    pub fn resource_seems_outdated(&self, resource: &AppResourceInfo) -> bool {
        !self
            .resources
            .iter()
            .any(|r| r.resource_type == resource.resource_type && r.hash == resource.hash)
    }

    pub fn outdated_resources<'a>(&self, fresh: &'a AppInfo) -> Vec<&'a AppResourceInfo> {
        fresh
            .resources
            .iter()
            .filter(|r| self.resource_seems_outdated(r))
            .collect()
    }

    pub fn versions_for_platform<'a>(
        &'a self,
        platform: &'a str,
    ) -> impl Iterator<Item = &'a AppVersionInfo> + 'a {
        self.versions
            .iter()
            .filter(move |v| v.platform_type.eq_ignore_ascii_case(platform))
    }

    /// Highest listed version for `platform` that is newer than `current`.
    pub fn newer_version_for<'a>(
        &'a self,
        platform: &'a str,
        current: &str,
    ) -> Option<&'a AppVersionInfo> {
        self.versions_for_platform(platform)
            .filter(|v| compare_versions(&v.version, current) == Ordering::Greater)
            .max_by(|a, b| compare_versions(&a.version, &b.version))
    }

    /// Missing file yields an empty manifest; so does an unparsable one.
    pub fn load(path: &Path) -> Result<Self> {
        let text = match fs::read_to_string(path) {
            Ok(s) => s,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => return Err(e).with_context(|| format!("read {}", path.display())),
        };
        Ok(serde_json::from_str(&text).unwrap_or_default())
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create dir {}", parent.display()))?;
        }
        let text = serde_json::to_string_pretty(self).context("serialize update info")?;
        fs::write(path, format!("{text}\n")).with_context(|| format!("write {}", path.display()))?;
        Ok(())
    }
}

pub fn platform_type() -> &'static str {
    if cfg!(target_os = "windows") {
        if cfg!(target_pointer_width = "64") {
            "windows64"
        } else {
            "windows32"
        }
    } else if cfg!(target_os = "linux") {
        if cfg!(target_pointer_width = "64") {
            "linux64"
        } else {
            "linux32"
        }
    } else if cfg!(target_os = "macos") {
        "mac"
    } else if cfg!(target_os = "ios") {
        "ios"
    } else if cfg!(target_os = "android") {
        "android"
    } else {
        "unknown"
    }
}

fn version_parts(v: &str) -> Vec<u64> {
    static NUM: OnceLock<Regex> = OnceLock::new();
    let re = NUM.get_or_init(|| Regex::new(r"\d+").expect("invalid regex"));
    re.find_iter(v)
        .filter_map(|m| m.as_str().parse().ok())
        .collect()
}

/// Numeric, segment-wise comparison; missing segments count as zero.
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    let pa = version_parts(a);
    let pb = version_parts(b);
    let len = pa.len().max(pb.len());
    for i in 0..len {
        let x = pa.get(i).copied().unwrap_or(0);
        let y = pb.get(i).copied().unwrap_or(0);
        match x.cmp(&y) {
            Ordering::Equal => continue,
            other => return other,
        }
    }
    Ordering::Equal
}
