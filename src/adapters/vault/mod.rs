//! OCI Vault secrets.

pub mod mounted;

pub use mounted::MountedSecretSource;
