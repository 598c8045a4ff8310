//! Recording session for parcelcam
//!
//! A single actor task owns the [`SessionState`] and drives the cycle
//! scan → confirm → record → save or upload → reset. Everything else talks to
//! it through a [`SessionHandle`].

mod gate;
mod machine;
mod state;

pub use gate::{parse_server_payload, BarcodeGate, Detection, ServerAddress, Symbology, DEBOUNCE};
pub use machine::{Session, SessionCommand, SessionHandle, SessionOptions};
pub use state::{Phase, ScanMode, SessionState, StateStore};
