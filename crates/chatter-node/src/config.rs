//! Node configuration: CLI flags and `CHATTER_*` env vars layered over an
//! optional TOML file.

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use serde::Deserialize;

use chatter_core::application::ports::UserSettings;
use chatter_core::domain::config::{MessagingConfig, RoomConfig};
use chatter_core::domain::identity::RoomId;

#[derive(Debug, Parser)]
#[command(name = "chatter-node", about = "Run a loopback chat room with simulated peers")]
pub struct Cli {
    /// TOML file with `[room]`, `[messaging]` and `[settings]` tables.
    #[arg(long, env = "CHATTER_CONFIG")]
    pub config: Option<PathBuf>,

    /// Overrides `room.app_id`.
    #[arg(long, env = "CHATTER_APP_ID")]
    pub app_id: Option<String>,

    #[arg(long, env = "CHATTER_ROOM", default_value = "lobby")]
    pub room: String,

    /// Makes the room private. Overrides `room.password`.
    #[arg(long, env = "CHATTER_PASSWORD")]
    pub password: Option<String>,

    /// Peers present before the late joiner arrives.
    #[arg(long, env = "CHATTER_PEERS", default_value_t = 2)]
    pub peers: usize,

    /// Messages the first peer sends.
    #[arg(long, env = "CHATTER_MESSAGES", default_value_t = 5)]
    pub messages: usize,

    /// Where downloaded files are saved.
    #[arg(long, env = "CHATTER_DOWNLOAD_DIR")]
    pub download_dir: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FileConfig {
    room: RoomConfig,
    messaging: MessagingConfig,
    settings: UserSettings,
}

#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub room_id: RoomId,
    pub room: RoomConfig,
    pub messaging: MessagingConfig,
    pub settings: UserSettings,
    pub peers: usize,
    pub messages: usize,
    pub download_dir: Option<PathBuf>,
}

impl NodeConfig {
    pub fn load(cli: Cli) -> anyhow::Result<Self> {
        let file = match &cli.config {
            Some(path) => {
                let raw = std::fs::read_to_string(path)
                    .with_context(|| format!("failed to read {}", path.display()))?;
                parse_file(&raw).with_context(|| format!("invalid config {}", path.display()))?
            }
            None => FileConfig::default(),
        };
        Ok(Self::merge(cli, file))
    }

    fn merge(cli: Cli, file: FileConfig) -> Self {
        let mut room = file.room;
        if let Some(app_id) = cli.app_id {
            room.app_id = app_id;
        }
        if room.app_id.is_empty() {
            room.app_id = "chatter".to_owned();
        }
        if cli.password.is_some() {
            room.password = cli.password;
        }

        Self {
            room_id: RoomId(cli.room),
            room,
            messaging: file.messaging,
            settings: file.settings,
            peers: cli.peers.max(1),
            messages: cli.messages,
            download_dir: cli.download_dir,
        }
    }
}

fn parse_file(raw: &str) -> anyhow::Result<FileConfig> {
    Ok(toml::from_str(raw)?)
}
