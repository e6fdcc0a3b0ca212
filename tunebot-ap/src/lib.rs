//! tunebot-ap library
//!
//! Audio playback queue and cache service for the tunebot chat bot.
//!
//! - `cache`: url → downloaded file mapping with freshness checks
//! - `queue`: persisted per-session FIFO
//! - `resolver`: content resolution (yt-dlp) with bounded rate-limit retry
//! - `transport`: audio output boundary
//! - `playback`: per-session state machine and coordinator
//! - `api`: HTTP control API and SSE events

pub mod api;
pub mod cache;
pub mod config;
pub mod db;
pub mod error;
pub mod playback;
pub mod queue;
pub mod resolver;
pub mod transport;

pub use error::{Error, Result};
