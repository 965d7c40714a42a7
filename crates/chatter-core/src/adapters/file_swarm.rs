//! In-memory content-addressed file swarm.
//!
//! Content ids are magnet-style URIs over the SHA-256 of the offered files.
//! Each [`InMemoryFileSwarm`] handle is one seeder: handles made with
//! [`InMemoryFileSwarm::handle`] share the seed table, but `is_offering` and
//! `rescind` only ever see the calling handle's own offers. Content stays
//! downloadable while at least one handle seeds it.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::application::ports::{DownloadOptions, FileTransfer, FileUpload};
use crate::domain::identity::{ContentId, RoomId};

const MAGNET_PREFIX: &str = "magnet:?xt=urn:sha256:";

type SeederId = u64;

struct Seed {
    room_id: RoomId,
    files: Vec<FileUpload>,
    seeders: HashSet<SeederId>,
}

pub struct InMemoryFileSwarm {
    seeds: Arc<Mutex<HashMap<ContentId, Seed>>>,
    seeder: SeederId,
    download_dir: Option<PathBuf>,
}

impl InMemoryFileSwarm {
    /// A fresh swarm with a single seeder handle.
    pub fn new() -> Self {
        Self {
            seeds: Arc::new(Mutex::new(HashMap::new())),
            seeder: rand::random(),
            download_dir: None,
        }
    }

    /// Another seeder on the same swarm, e.g. one per session.
    pub fn handle(&self) -> Self {
        Self {
            seeds: Arc::clone(&self.seeds),
            seeder: rand::random(),
            download_dir: self.download_dir.clone(),
        }
    }

    /// Where `save_to_disk` downloads are written. Without one, saving is
    /// skipped.
    pub fn with_download_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.download_dir = Some(dir.into());
        self
    }

    /// Stable content id for a set of files.
    pub fn content_id(files: &[FileUpload]) -> ContentId {
        let mut hasher = Sha256::new();
        for file in files {
            hasher.update((file.name.len() as u64).to_be_bytes());
            hasher.update(file.name.as_bytes());
            hasher.update((file.bytes.len() as u64).to_be_bytes());
            hasher.update(&file.bytes);
        }
        ContentId(format!("{MAGNET_PREFIX}{}", hex::encode(hasher.finalize())))
    }

    async fn save(&self, files: &[FileUpload]) -> anyhow::Result<()> {
        let Some(dir) = &self.download_dir else {
            debug!("No download directory configured, not saving");
            return Ok(());
        };
        tokio::fs::create_dir_all(dir).await?;
        for file in files {
            let name = std::path::Path::new(&file.name)
                .file_name()
                .ok_or_else(|| anyhow::anyhow!("invalid file name {:?}", file.name))?;
            let path = dir.join(name);
            tokio::fs::write(&path, &file.bytes).await?;
            info!(path = %path.display(), bytes = file.bytes.len(), "Saved download");
        }
        Ok(())
    }
}

impl Default for InMemoryFileSwarm {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FileTransfer for InMemoryFileSwarm {
    async fn offer(&self, files: Vec<FileUpload>, room_id: &RoomId) -> anyhow::Result<ContentId> {
        if files.is_empty() {
            anyhow::bail!("nothing to offer");
        }
        let content_id = Self::content_id(&files);
        let mut seeds = self.seeds.lock().unwrap();
        let seed = seeds.entry(content_id.clone()).or_insert_with(|| Seed {
            room_id: room_id.clone(),
            files,
            seeders: HashSet::new(),
        });
        seed.seeders.insert(self.seeder);
        info!(%content_id, %room_id, seeders = seed.seeders.len(), "Seeding");
        Ok(content_id)
    }

    async fn download(
        &self,
        content_id: &ContentId,
        room_id: &RoomId,
        options: DownloadOptions,
    ) -> anyhow::Result<Vec<FileUpload>> {
        let files = {
            let seeds = self.seeds.lock().unwrap();
            match seeds.get(content_id) {
                Some(seed) if &seed.room_id == room_id => seed.files.clone(),
                _ => anyhow::bail!("no peers are seeding {content_id} in room {room_id}"),
            }
        };
        if let Some(on_progress) = &options.on_progress {
            on_progress(1.0);
        }
        if options.save_to_disk {
            self.save(&files).await?;
        }
        Ok(files)
    }

    fn rescind(&self, content_id: &ContentId) {
        let mut seeds = self.seeds.lock().unwrap();
        let Some(seed) = seeds.get_mut(content_id) else {
            return;
        };
        if !seed.seeders.remove(&self.seeder) {
            return;
        }
        info!(%content_id, remaining = seed.seeders.len(), "Stopped seeding");
        if seed.seeders.is_empty() {
            seeds.remove(content_id);
        }
    }

    fn is_offering(&self, content_id: &ContentId) -> bool {
        self.seeds
            .lock()
            .unwrap()
            .get(content_id)
            .is_some_and(|seed| seed.seeders.contains(&self.seeder))
    }
}
