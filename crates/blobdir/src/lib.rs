//! # blobdir
//!
//! A virtual index directory stored inside an embedded SQLite database.
//!
//! An index engine sees an ordinary flat directory: it lists names, opens
//! random-access input and output streams, queries length and modified
//! time, deletes, renames and touches files, and takes a named lock before
//! acting as the exclusive writer. Underneath, every file is:
//! - a record in the metadata store (name, last-touched time, tombstone flag)
//! - a chunked blob in the blob store
//!
//! and every lock is a lease row that expires on its own if the holder dies.
//!
//! Several processes may open the same database file; SQLite transactions
//! keep lock acquisition mutually exclusive across all of them.

pub mod blob;
pub mod config;
pub mod constants;
pub mod directory;
pub mod error;
pub mod input;
pub mod lock;
pub mod meta;
pub mod output;
pub mod store;

pub use blob::BlobInfo;
pub use config::DirectoryConfig;
pub use directory::Directory;
pub use error::{DirError, DirResult};
pub use input::InputStream;
pub use lock::{Lock, LockManager, LockToken};
pub use meta::{FileRecord, LockRecord};
pub use output::OutputStream;
pub use store::Store;
