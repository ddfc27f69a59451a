//! Client side of the medialift resumable upload protocol.
//!
//! An upload is driven by the [`Uploader`]: it creates a session on the
//! server, streams chunks strictly in ascending index order (one in flight),
//! reconciles with server-reported progress on every resume, and finalizes
//! the object. The session record survives process restarts through a
//! [`SessionSlot`] and is observable through a watch channel.

mod chunker;
mod error;
mod session;
mod slot;
mod transport;
mod uploader;

pub use chunker::{FileChunker, checksum_bytes};
pub use error::UploadError;
pub use session::{SessionStatus, UploadSession};
pub use slot::{JsonFileSlot, MemorySlot, SessionSlot};
pub use transport::{HttpTransport, TransportError, TransportFuture, UploadTransport};
pub use uploader::{CompleteCallback, Uploader};
