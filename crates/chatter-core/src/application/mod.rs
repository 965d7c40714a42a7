pub mod ports;

pub mod action_channel;
pub mod codec;
pub mod peer_room;
pub mod registry;
pub mod roster;
pub mod session;
pub mod stream_queue;
pub mod transcript;

#[cfg(test)]
pub(crate) mod test_support;
