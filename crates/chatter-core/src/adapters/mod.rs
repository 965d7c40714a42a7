pub mod events;
pub mod file_swarm;
pub mod local;
pub mod loopback;
