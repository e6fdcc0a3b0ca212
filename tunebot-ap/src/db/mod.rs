//! Database access for the queue and artifact tables
//!
//! Schema creation lives in `tunebot_common::db`.

pub mod artifacts;
pub mod queue;
