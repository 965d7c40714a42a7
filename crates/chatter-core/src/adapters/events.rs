//! TracingAppEvents — implements the [`AppEvents`] port by logging.
//!
//! Used by headless nodes where there is no UI to surface alerts to.

use async_trait::async_trait;
use tracing::{debug, error, info, warn};

use crate::application::ports::{AlertSeverity, AppEvents};

#[derive(Debug, Clone, Default)]
pub struct TracingAppEvents {
    label: String,
}

impl TracingAppEvents {
    /// `label` tags every line, e.g. the local user id.
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
        }
    }
}

#[async_trait]
impl AppEvents for TracingAppEvents {
    async fn emit_alert(&self, text: &str, severity: AlertSeverity) {
        let label = &self.label;
        match severity {
            AlertSeverity::Success | AlertSeverity::Info => info!(%label, ?severity, "{text}"),
            AlertSeverity::Warning => warn!(%label, "{text}"),
            AlertSeverity::Error => error!(%label, "{text}"),
        }
    }

    async fn play_new_message_sound(&self) {
        debug!(label = %self.label, "New message sound");
    }

    async fn show_notification(&self, text: &str) {
        info!(label = %self.label, "Notification: {text}");
    }
}
