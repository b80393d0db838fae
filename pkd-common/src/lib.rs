// pkd-common/src/lib.rs
pub mod catalog;
pub mod config;
pub mod descriptor;
pub mod error;
pub mod lifecycle;
pub mod model;

// Re-export key types
pub use catalog::Catalog;
pub use config::Config;
pub use descriptor::{parse_descriptor, DescriptorBuilder};
pub use error::{ErrorKind, PkdError, Result};
pub use lifecycle::{InstallState, LifecycleEvent, Verification};
pub use model::Descriptor;
