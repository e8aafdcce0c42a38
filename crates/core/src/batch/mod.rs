//! Batches, data versions and the staged object naming convention.
//!
//! Every object written by one extraction run is named
//! `<dataset_id>__<YYYYMMDD_HH-MM-SS>.<ext>`; the shared token groups the
//! objects into one [`Batch`]. Loading a batch stamps its rows with the
//! matching [`DataVersion`].

mod token;
mod types;

pub use token::{BatchToken, BatchTokenError, DataVersion, TOKEN_FORMAT, VERSION_FORMAT};
pub use types::{
    group_batches, Batch, CategoryCount, StagedObject, StagedObjectCounts, NAME_DELIMITER,
};
