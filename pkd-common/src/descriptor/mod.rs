// pkd-common/src/descriptor/mod.rs
//! Loading, validating and rendering descriptor text.

mod builder;
pub(crate) mod layout;
mod parser;
pub mod value;

pub use builder::DescriptorBuilder;
pub use parser::{parse_descriptor, validate_token, validate_version};
