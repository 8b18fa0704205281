use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Mutex;
use std::time::Duration;

use serde::Serialize;

use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

pub fn now_rfc3339() -> String {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_else(|_| "1970-01-01T00:00:00Z".to_string())
}

// -----------------------------------------------------------------------------
// UI feedback events. Workers post these; the UI thread drains and applies them.
// -----------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum UiAction {
    /// Modal progress indicator for a long-running operation.
    ShowProgress { cancellable: bool },
    HideModal,
    Tooltip { message: String },
    Success,
    Failure,
    UpdateAvailable {
        version: String,
        #[serde(skip_serializing_if = "String::is_empty")]
        link: String,
    },
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UiEvent {
    #[serde(flatten)]
    pub action: UiAction,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    pub timestamp: String, // RFC3339
}

impl UiEvent {
    pub fn new(action: UiAction) -> Self {
        Self {
            action,
            project_id: None,
            timestamp: now_rfc3339(),
        }
    }

    pub fn for_project(action: UiAction, project_id: &str) -> Self {
        Self {
            project_id: Some(project_id.to_string()),
            ..Self::new(action)
        }
    }
}

pub const SYNC_UP_TO_DATE_MESSAGE: &str = "Project is up to date";
pub const SYNC_DONE_MESSAGE: &str = "Sync done";

/// Where worker threads send UI feedback. Implementations must not touch UI
/// state directly; they hand the event to whatever owns the UI thread.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: UiEvent);
}

/// Channel-backed sink. The paired [`UiQueue`] lives on the UI thread.
pub struct ChannelSink {
    tx: Mutex<Sender<UiEvent>>,
}

impl EventSink for ChannelSink {
    fn emit(&self, event: UiEvent) {
        let tx = self.tx.lock().unwrap_or_else(|e| e.into_inner());
        if tx.send(event).is_err() {
            tracing::debug!("ui queue closed, dropping event");
        }
    }
}

pub struct UiQueue {
    rx: Receiver<UiEvent>,
}

impl UiQueue {
    /// `Ok(None)` on timeout; `Err` once every sender is gone.
    pub fn next_timeout(&self, timeout: Duration) -> Result<Option<UiEvent>, RecvTimeoutError> {
        match self.rx.recv_timeout(timeout) {
            Ok(ev) => Ok(Some(ev)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Everything queued right now, in order.
    pub fn drain(&self) -> Vec<UiEvent> {
        self.rx.try_iter().collect()
    }
}

pub fn ui_channel() -> (ChannelSink, UiQueue) {
    let (tx, rx) = mpsc::channel();
    (ChannelSink { tx: Mutex::new(tx) }, UiQueue { rx })
}
