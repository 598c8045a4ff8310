//! Storage module for parcelcam
//!
//! Scratch paths and library commits for recordings, plus a SQLite journal of
//! finished deliveries.

mod journal;
mod media;
mod models;

pub use journal::Journal;
pub use media::{sanitize_tracking_id, MediaStore, VIDEO_EXTENSION};
pub use models::{Delivery, DeliveryOutcome};
