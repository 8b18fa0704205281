use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::blocking::{Client, RequestBuilder, Response};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::tree::TreeNode;
use crate::core::update_info::{platform_type, AppInfo};

// -----------------------------------------------------------------------------
// Wire model
// -----------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RevisionHeader {
    pub id: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub timestamp_ms: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RevisionDto {
    #[serde(flatten)]
    pub header: RevisionHeader,
    pub data: TreeNode,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectDto {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub head: Option<String>,
    #[serde(default)]
    pub revisions: Vec<RevisionHeader>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PutRevisionBody<'a> {
    project_title: &'a str,
    #[serde(flatten)]
    revision: &'a RevisionDto,
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("server responded {status}: {}", .errors.join("; "))]
pub struct ApiError {
    pub status: u16,
    pub errors: Vec<String>,
}

/// Human-readable messages for a failed operation; the first one is what the
/// user gets to see.
pub fn error_messages(err: &anyhow::Error) -> Vec<String> {
    if let Some(api) = err.downcast_ref::<ApiError>() {
        if !api.errors.is_empty() {
            return api.errors.clone();
        }
    }
    vec![format!("{err:#}")]
}

// -----------------------------------------------------------------------------
// API
// -----------------------------------------------------------------------------

pub trait SyncApi: Send + Sync {
    fn fetch_updates_info(&self) -> Result<AppInfo>;
    fn request_resource(&self, resource_type: &str) -> Result<Value>;
    fn fetch_project(&self, project_id: &str) -> Result<ProjectDto>;
    fn fetch_revision_headers(&self, project_id: &str) -> Result<Vec<RevisionHeader>>;
    fn fetch_revision(&self, project_id: &str, revision_id: &str) -> Result<RevisionDto>;
    fn put_revision(
        &self,
        project_id: &str,
        project_title: &str,
        revision: &RevisionDto,
    ) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct HttpSyncApi {
    client: Client,
    base_url: String,
    token: Option<String>,
}

impl HttpSyncApi {
    pub fn new(base_url: &str, token: Option<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(format!(
                "tracksync/{} ({})",
                crate::VERSION,
                platform_type()
            ))
            .build()
            .context("build http client")?;
        Ok(Self {
            client,
            base_url: base_url.trim().trim_end_matches('/').to_string(),
            token: token.filter(|t| !t.trim().is_empty()),
        })
    }

    fn url(&self, segments: &[&str]) -> String {
        let mut out = self.base_url.clone();
        for s in segments {
            out.push('/');
            out.push_str(&urlencoding::encode(s));
        }
        out
    }

    fn authorize(&self, req: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(t) => req.bearer_auth(t),
            None => req,
        }
    }

    fn get_json<T: serde::de::DeserializeOwned>(&self, segments: &[&str]) -> Result<T> {
        let url = self.url(segments);
        let resp = self
            .authorize(self.client.get(&url))
            .send()
            .with_context(|| format!("GET {url}"))?;
        let resp = check_status(resp)?;
        resp.json::<T>()
            .with_context(|| format!("decode response of GET {url}"))
    }
}

fn check_status(resp: Response) -> Result<Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().unwrap_or_default();
    let mut errors = errors_from_body(&body);
    if errors.is_empty() {
        errors.push(format!(
            "HTTP {} {}",
            status.as_u16(),
            status.canonical_reason().unwrap_or("error")
        ));
    }
    Err(ApiError {
        status: status.as_u16(),
        errors,
    }
    .into())
}

/// Accepts `{"errors": [..]}`, `{"errors": {"field": ".." | [..]}}` or `{"message": ".."}`.
fn errors_from_body(body: &str) -> Vec<String> {
    let Ok(json) = serde_json::from_str::<Value>(body) else {
        return Vec::new();
    };

    let mut out = Vec::new();
    match json.get("errors") {
        Some(Value::Array(arr)) => {
            out.extend(arr.iter().filter_map(|v| v.as_str()).map(str::to_string));
        }
        Some(Value::Object(obj)) => {
            for v in obj.values() {
                match v {
                    Value::String(s) => out.push(s.clone()),
                    Value::Array(arr) => {
                        out.extend(arr.iter().filter_map(|v| v.as_str()).map(str::to_string))
                    }
                    _ => {}
                }
            }
        }
        Some(Value::String(s)) => out.push(s.clone()),
        _ => {}
    }

    if out.is_empty() {
        if let Some(msg) = json.get("message").and_then(|m| m.as_str()) {
            out.push(msg.to_string());
        }
    }
    out
}

impl SyncApi for HttpSyncApi {
    fn fetch_updates_info(&self) -> Result<AppInfo> {
        self.get_json(&["updates"])
    }

    fn request_resource(&self, resource_type: &str) -> Result<Value> {
        self.get_json(&["resources", resource_type])
    }

    fn fetch_project(&self, project_id: &str) -> Result<ProjectDto> {
        self.get_json(&["projects", project_id])
    }

    fn fetch_revision_headers(&self, project_id: &str) -> Result<Vec<RevisionHeader>> {
        self.get_json(&["projects", project_id, "revisions"])
    }

    fn fetch_revision(&self, project_id: &str, revision_id: &str) -> Result<RevisionDto> {
        self.get_json(&["projects", project_id, "revisions", revision_id])
    }

    fn put_revision(
        &self,
        project_id: &str,
        project_title: &str,
        revision: &RevisionDto,
    ) -> Result<()> {
        let url = self.url(&["projects", project_id, "revisions", &revision.header.id]);
        let body = PutRevisionBody {
            project_title,
            revision,
        };
        let resp = self
            .authorize(self.client.put(&url))
            .json(&body)
            .send()
            .with_context(|| format!("PUT {url}"))?;
        check_status(resp)?;
        Ok(())
    }
}
