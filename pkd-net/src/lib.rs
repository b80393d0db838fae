// pkd-net/src/lib.rs
pub mod http;
pub mod validation;

pub use http::{build_http_client, fetch_artifact, FetchedArtifact};
pub use validation::{check_digest, validate_url};
