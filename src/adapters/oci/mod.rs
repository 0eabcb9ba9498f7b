//! Oracle Cloud adapters.

pub mod object_storage;

pub use object_storage::OciObjectStore;
