//! snapcull: find near-duplicate shots and bursts in a photo library.
//!
//! Photos are scanned into a SQLite store, embedded by a pool of persistent
//! CLIP workers, then grouped by visual similarity inside temporal sessions
//! or by shot density into series.

pub mod analysis;
pub mod clip;
pub mod config;
pub mod db;
pub mod embedding;
pub mod error;
pub mod logging;
pub mod progress;
pub mod review;
pub mod scanner;
