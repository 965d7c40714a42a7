//! chatter-core — peer-to-peer chat session core.
//!
//! # Architecture (Clean Architecture)
//!
//! - **domain**: chat entries, peers, identifiers, action namespaces, config
//!   (no I/O).
//! - **application**: room gateway, typed action channels, the session
//!   orchestrator, and the port traits they depend on.
//! - **adapters**: in-process loopback room, in-memory file swarm, tracing
//!   UI bridge, local settings and id generation.

pub mod adapters;
pub mod application;
pub mod domain;
