// pkd-common/src/model/mod.rs
pub mod artifact;
pub mod descriptor;

pub use artifact::InstalledArtifact;
pub use descriptor::{Checksum, Descriptor, Directive, PkgTarget, RemovalSpec, UrlSpec};
