//! `StagePager` bridges a chat channel to a stage presentation screen.
//!
//! Volunteers type 4-digit pager codes into a chat channel; the bridge
//! batches them, pushes them onto the presentation software's message
//! layer over its websocket control protocol, and reacts back on each
//! chat message as its code progresses from queued to shown to cleared.

pub mod bridge;
pub mod chat;
pub mod config;
pub mod link;
pub mod tokens;
