//! Shared protocol definitions for the `StagePager` presentation control link.

pub mod discover;
pub mod payload;
pub mod remote;
