//! Object storage where extraction output is staged.
//!
//! The [`ObjectStore`] trait is the narrow interface the registry and the
//! stages use. [`FsObjectStore`] keeps a bucket in a local directory.

mod error;
mod fs_store;
mod traits;

pub use error::StorageError;
pub use fs_store::FsObjectStore;
pub use traits::ObjectStore;
