//! Delivery of recordings to the LAN server
//!
//! One recording is one `POST /upload` multipart request carrying the tracking
//! number and the video. `GET /ping` checks that the server is up.

mod error;
mod progress;
mod transport;

pub use error::UploadError;
pub use progress::{ProgressThrottle, UploadEvent, PROGRESS_INTERVAL};
pub use transport::{
    ConnectionProbe, TransportConfig, UploadReceipt, UploadRequest, UploadTransport,
};
