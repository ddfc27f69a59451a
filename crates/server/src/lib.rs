//! Server side of the medialift resumable upload protocol.
//!
//! The [`UploadStore`] tracks sessions and spools chunk bytes to disk, the
//! [`Finalizer`] assembles acknowledged chunks into one durable object, and
//! [`http::router`] exposes the whole protocol over HTTP.

pub mod config;
mod error;
mod finalizer;
pub mod http;
mod store;

pub use error::StoreError;
pub use finalizer::{
    Finalizer, FsObjectStorage, ObjectStorage, ObjectWriter, StorageFuture, StoredObject,
};
pub use store::{CompletedSession, UploadPolicy, UploadStore, spawn_sweeper};
