//! # tunebot Common Library
//!
//! Shared code for the tunebot services:
//! - Database bootstrap and row models
//! - Player event types and the broadcast `EventBus`
//! - Data folder and configuration file resolution

pub mod config;
pub mod db;
pub mod error;
pub mod events;

pub use error::{Error, Result};
pub use events::{EventBus, PlayerEvent, SessionState};
