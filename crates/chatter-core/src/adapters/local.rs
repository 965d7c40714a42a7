//! Local, process-scoped implementations of the query ports.

use uuid::Uuid;

use crate::application::ports::{IdGenerator, PeerNames, SettingsSource, UserSettings};
use crate::domain::identity::MessageId;

/// Settings fixed at startup.
#[derive(Debug, Clone, Copy, Default)]
pub struct StaticSettings(pub UserSettings);

impl SettingsSource for StaticSettings {
    fn user_settings(&self) -> UserSettings {
        self.0
    }
}

/// Shows user ids as-is.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassThroughNames;

impl PeerNames for PassThroughNames {
    fn display_name(&self, user_id: &str) -> String {
        user_id.to_owned()
    }
}

/// Random v4 UUIDs.
#[derive(Debug, Clone, Copy, Default)]
pub struct UuidIds;

impl IdGenerator for UuidIds {
    fn next_id(&self) -> MessageId {
        MessageId(Uuid::new_v4().to_string())
    }
}
