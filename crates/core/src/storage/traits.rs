//! Trait definitions for the storage module.

use async_trait::async_trait;

use super::error::StorageError;

/// A bucket of staged objects addressed by `/`-separated keys.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Returns the name of this store implementation.
    fn name(&self) -> &str;

    /// Lists the keys of every object whose key starts with `prefix`.
    async fn list_objects(&self, prefix: &str) -> Result<Vec<String>, StorageError>;

    /// Writes an object, replacing any existing object with the same key.
    async fn put_object(&self, key: &str, data: Vec<u8>) -> Result<(), StorageError>;

    /// Reads an object.
    async fn get_object(&self, key: &str) -> Result<Vec<u8>, StorageError>;
}
