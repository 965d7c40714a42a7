//! Loopback chat node.
//!
//! Joins a handful of simulated peers to one in-process room, has the first
//! peer chat and share a file, then brings in a late joiner and logs the
//! transcript it was caught up with.

mod config;

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use chatter_core::adapters::events::TracingAppEvents;
use chatter_core::adapters::file_swarm::InMemoryFileSwarm;
use chatter_core::adapters::local::{PassThroughNames, StaticSettings, UuidIds};
use chatter_core::adapters::loopback::LoopbackNetwork;
use chatter_core::application::peer_room::PeerRoomGateway;
use chatter_core::application::ports::FileUpload;
use chatter_core::application::session::{SendOutcome, SessionOrchestrator, SessionPorts};
use chatter_core::domain::chat::TranscriptEntry;

use crate::config::{Cli, NodeConfig};

/// Long enough for loopback events to be reconciled.
const SETTLE: Duration = Duration::from_millis(100);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = NodeConfig::load(Cli::parse())?;
    info!(
        room_id = %config.room_id,
        app_id = %config.room.app_id,
        private = config.room.is_private(),
        peers = config.peers,
        "Chatter node starting"
    );

    let network = LoopbackNetwork::new();
    let mut swarm = InMemoryFileSwarm::new();
    if let Some(dir) = &config.download_dir {
        swarm = swarm.with_download_dir(dir);
    }

    let mut sessions = Vec::with_capacity(config.peers + 1);
    for n in 0..config.peers {
        sessions.push(join(&network, &swarm, &config, &format!("peer-{n}"))?);
    }
    tokio::time::sleep(SETTLE).await;

    let host = Arc::clone(&sessions[0]);
    for n in 1..=config.messages {
        let text = format!("Message {n} from {}", host.user_id());
        match host.send_message(&text).await? {
            SendOutcome::Sent(id) => info!(%id, "Sent"),
            SendOutcome::Busy => warn!("Send already in flight"),
        }
    }

    let notes = FileUpload {
        name: "notes.txt".to_owned(),
        bytes: Bytes::from(format!("Shared by {}\n", host.user_id())),
    };
    let content_id = host.offer_file(vec![notes]).await?;
    info!(%content_id, "Host is offering a file");
    tokio::time::sleep(SETTLE).await;

    if let Some(guest) = sessions.get(1) {
        let files = guest
            .download_peer_file(&host.gateway().self_id(), None)
            .await?;
        info!(user_id = guest.user_id(), files = files.len(), "Guest downloaded host's file");
    }

    let late = join(&network, &swarm, &config, "late-joiner")?;
    tokio::time::sleep(SETTLE).await;

    let transcript = late.transcript();
    info!(
        entries = transcript.len(),
        peers = late.number_of_peers(),
        "Late joiner caught up"
    );
    for entry in &transcript {
        match entry {
            TranscriptEntry::Message(m) => info!(id = %m.id, author = %m.author_id, "{}", m.text),
            TranscriptEntry::InlineMedia(m) => {
                info!(id = %m.id, author = %m.author_id, uri = %m.magnet_uri, "(media)")
            }
        }
    }
    sessions.push(late);

    for session in sessions.iter().rev() {
        session.leave();
    }
    tokio::time::sleep(SETTLE).await;
    info!("Chatter node finished");
    Ok(())
}

fn join(
    network: &LoopbackNetwork,
    swarm: &InMemoryFileSwarm,
    config: &NodeConfig,
    user_id: &str,
) -> anyhow::Result<Arc<SessionOrchestrator>> {
    let gateway = PeerRoomGateway::open(
        network,
        &config.room,
        config.room_id.clone(),
        config.messaging.stream_queue_add_delay(),
    )?;
    let ports = SessionPorts {
        file_transfer: Arc::new(swarm.handle()),
        app_events: Arc::new(TracingAppEvents::new(user_id)),
        settings: Arc::new(StaticSettings(config.settings)),
        names: Arc::new(PassThroughNames),
        ids: Arc::new(UuidIds),
    };
    Ok(SessionOrchestrator::spawn(
        gateway,
        user_id,
        config.messaging.clone(),
        ports,
    ))
}
