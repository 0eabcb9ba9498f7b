//! Adapters - Concrete implementations of ports.

pub mod local;
pub mod oci;
pub mod postgres;
pub mod vault;
