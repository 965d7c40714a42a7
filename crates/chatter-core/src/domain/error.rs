//! Errors surfaced to callers of the session.

use super::identity::PeerId;

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("message is empty")]
    EmptyMessage,
    #[error("message is {len} characters, limit is {limit}")]
    MessageTooLong { len: usize, limit: usize },
    #[error("peer {0} is not offering a file")]
    NoOfferedFile(PeerId),
    #[error("room has been left")]
    RoomClosed,
    #[error("transport error: {0}")]
    Transport(#[source] anyhow::Error),
    #[error("file transfer error: {0}")]
    FileTransfer(#[source] anyhow::Error),
}
