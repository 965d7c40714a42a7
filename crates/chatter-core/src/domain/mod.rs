pub mod action;
pub mod chat;
pub mod config;
pub mod error;
pub mod identity;
pub mod media;
