// pkd-net/src/http.rs
use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::StreamExt;
use pkd_common::config::Config;
use pkd_common::error::{PkdError, Result};
use pkd_common::lifecycle::Verification;
use pkd_common::model::{Checksum, Descriptor};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, USER_AGENT};
use reqwest::{Client, StatusCode};
use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;
use tokio::io::AsyncWriteExt;
use tracing::{debug, error, warn};
use url::Url;

use crate::validation::{check_digest, validate_url};

const USER_AGENT_STRING: &str = "pkd package interpreter (Rust; +https://github.com/alexykn/pkd)";
const MAX_REDIRECTS: usize = 10;

/// A downloaded artifact sitting in the staging directory.
#[derive(Debug, Clone)]
pub struct FetchedArtifact {
    pub path: PathBuf,
    /// SHA-256 of the downloaded bytes, computed for every fetch.
    pub sha256: String,
    pub size_bytes: u64,
    pub verification: Verification,
}

pub fn build_http_client(config: &Config) -> Result<Client> {
    let mut headers = HeaderMap::new();
    headers.insert(USER_AGENT, HeaderValue::from_static(USER_AGENT_STRING));
    headers.insert(ACCEPT, HeaderValue::from_static("*/*"));
    Client::builder()
        .timeout(config.download_timeout)
        .connect_timeout(config.connect_timeout)
        .default_headers(headers)
        .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
        .build()
        .map_err(PkdError::from)
}

/// Downloads the descriptor's artifact into `stage_dir` and checks it against
/// the declared checksum.
///
/// The body is streamed into an anonymous temp file in `stage_dir` and only
/// given its final name once verified. If this future is dropped, or any step
/// fails, the temp file is removed with it.
pub async fn fetch_artifact(
    client: &Client,
    descriptor: &Descriptor,
    stage_dir: &Path,
    config: &Config,
) -> Result<FetchedArtifact> {
    let token = descriptor.token.as_str();
    let url_str = descriptor.source_url();
    let url = validate_url(token, url_str, config.allow_http)?;
    let final_path = stage_dir.join(artifact_filename(&url, token));

    debug!("Fetching '{}' from {}", token, url_str);
    debug!("Staging download in {}", stage_dir.display());

    let temp = NamedTempFile::new_in(stage_dir).map_err(|e| {
        PkdError::IoError(format!(
            "Failed to create temp file in {}: {}",
            stage_dir.display(),
            e
        ))
    })?;

    let network_error = |detail: String| PkdError::NetworkError {
        token: token.to_string(),
        url: url_str.to_string(),
        detail,
    };

    let response = client.get(url).send().await.map_err(|e| {
        debug!("HTTP request failed for {url_str}: {e}");
        network_error(describe_reqwest_error(&e))
    })?;
    let status = response.status();
    debug!("Received HTTP status: {} for {}", status, url_str);

    if !status.is_success() {
        error!("HTTP error {} for URL {}", status, url_str);
        return match status {
            StatusCode::NOT_FOUND | StatusCode::GONE => Err(PkdError::ArtifactNotFound {
                token: token.to_string(),
                url: url_str.to_string(),
            }),
            _ => Err(network_error(format!("HTTP status {status}"))),
        };
    }

    let mut file = tokio::fs::File::from_std(temp.as_file().try_clone()?);
    let mut hasher = Sha256::new();
    let mut size_bytes: u64 = 0;
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| {
            network_error(format!(
                "download interrupted: {}",
                describe_reqwest_error(&e)
            ))
        })?;
        hasher.update(&chunk);
        size_bytes += chunk.len() as u64;
        file.write_all(&chunk).await.map_err(|e| {
            PkdError::IoError(format!(
                "Failed to write download stream to {}: {}",
                temp.path().display(),
                e
            ))
        })?;
    }
    file.flush().await?;
    drop(file);

    let actual = hex::encode(hasher.finalize());
    debug!("Downloaded {} bytes, SHA256 {}", size_bytes, actual);

    let verification = match &descriptor.sha256 {
        Checksum::Sha256(expected) => {
            check_digest(token, expected, &actual).inspect_err(|e| error!("{}", e))?;
            debug!("Checksum verified for '{}'", token);
            Verification::Verified
        }
        Checksum::NoCheck => {
            warn!(
                "Skipping checksum verification for '{}' (sha256 :no_check)",
                token
            );
            Verification::Unverified
        }
    };

    temp.persist(&final_path)
        .map_err(|e| PkdError::Io(Arc::new(e.error)))?;
    debug!("Moved download to {}", final_path.display());

    Ok(FetchedArtifact {
        path: final_path,
        sha256: actual,
        size_bytes,
        verification,
    })
}

/// Last non-empty URL path segment, or `<token>-download` when the URL has none.
fn artifact_filename(url: &Url, token: &str) -> String {
    url.path_segments()
        .and_then(|mut segments| segments.next_back())
        .filter(|name| !name.is_empty() && *name != "." && *name != "..")
        .map(str::to_string)
        .unwrap_or_else(|| format!("{token}-download"))
}

fn describe_reqwest_error(e: &reqwest::Error) -> String {
    if e.is_timeout() {
        format!("timed out: {e}")
    } else if e.is_connect() {
        format!("connection failed: {e}")
    } else if e.is_redirect() {
        format!("too many redirects: {e}")
    } else {
        e.to_string()
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::time::Duration;

    use httpmock::prelude::*;
    use pkd_common::descriptor::DescriptorBuilder;
    use pkd_common::error::ErrorKind;

    use super::*;

    const BODY: &str = "pretend disk image";

    fn body_sha256() -> String {
        hex::encode(Sha256::digest(BODY.as_bytes()))
    }

    fn test_config(root: &Path) -> Config {
        let mut config = Config::for_root(root);
        config.allow_http = true;
        config.download_timeout = Duration::from_secs(5);
        config
    }

    fn descriptor(url: &str, checksum: Option<&str>) -> Descriptor {
        let builder = DescriptorBuilder::new("font-demo")
            .version("1.0")
            .url(url)
            .name("Demo")
            .pkg("Demo.pkg")
            .uninstall_pkgutil("com.example.demo");
        match checksum {
            Some(hex) => builder.sha256(hex),
            None => builder.no_check(),
        }
        .build()
        .unwrap()
    }

    fn stage_is_empty(dir: &Path) -> bool {
        fs::read_dir(dir).unwrap().next().is_none()
    }

    #[tokio::test]
    async fn verified_download_lands_under_url_filename() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(GET).path("/fonts/Demo.dmg");
            then.status(200).body(BODY);
        });
        let root = tempfile::tempdir().unwrap();
        let stage = tempfile::tempdir().unwrap();
        let config = test_config(root.path());
        let client = build_http_client(&config).unwrap();
        let d = descriptor(&server.url("/fonts/Demo.dmg"), Some(&body_sha256()));

        let fetched = fetch_artifact(&client, &d, stage.path(), &config)
            .await
            .unwrap();

        mock.assert_calls(1);
        assert_eq!(fetched.path, stage.path().join("Demo.dmg"));
        assert_eq!(fs::read_to_string(&fetched.path).unwrap(), BODY);
        assert_eq!(fetched.verification, Verification::Verified);
        assert_eq!(fetched.size_bytes, BODY.len() as u64);
        assert_eq!(fetched.sha256, body_sha256());
    }

    #[tokio::test]
    async fn no_check_is_always_unverified() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/Demo.dmg");
            then.status(200).body("whatever the server sends");
        });
        let root = tempfile::tempdir().unwrap();
        let stage = tempfile::tempdir().unwrap();
        let config = test_config(root.path());
        let client = build_http_client(&config).unwrap();
        let d = descriptor(&server.url("/Demo.dmg"), None);

        let fetched = fetch_artifact(&client, &d, stage.path(), &config)
            .await
            .unwrap();
        assert_eq!(fetched.verification, Verification::Unverified);
        assert!(!fetched.sha256.is_empty());
    }

    #[tokio::test]
    async fn digest_mismatch_fails_and_leaves_nothing_behind() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/Demo.dmg");
            then.status(200).body("tampered");
        });
        let root = tempfile::tempdir().unwrap();
        let stage = tempfile::tempdir().unwrap();
        let config = test_config(root.path());
        let client = build_http_client(&config).unwrap();
        let d = descriptor(&server.url("/Demo.dmg"), Some(&body_sha256()));

        let err = fetch_artifact(&client, &d, stage.path(), &config)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ChecksumMismatch);
        assert_eq!(err.identifier(), Some("font-demo"));
        assert!(stage_is_empty(stage.path()));
    }

    #[tokio::test]
    async fn missing_artifact_and_server_errors_are_distinguished() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/gone.dmg");
            then.status(404);
        });
        server.mock(|when, then| {
            when.method(GET).path("/broken.dmg");
            then.status(500).body("internal error");
        });
        let root = tempfile::tempdir().unwrap();
        let stage = tempfile::tempdir().unwrap();
        let config = test_config(root.path());
        let client = build_http_client(&config).unwrap();

        let err = fetch_artifact(
            &client,
            &descriptor(&server.url("/gone.dmg"), None),
            stage.path(),
            &config,
        )
        .await
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ArtifactNotFound);

        let err = fetch_artifact(
            &client,
            &descriptor(&server.url("/broken.dmg"), None),
            stage.path(),
            &config,
        )
        .await
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NetworkError);
        assert!(err.to_string().contains("500"), "{err}");
        assert!(stage_is_empty(stage.path()));
    }

    #[tokio::test]
    async fn plain_http_is_refused_by_default() {
        let root = tempfile::tempdir().unwrap();
        let stage = tempfile::tempdir().unwrap();
        let config = Config::for_root(root.path());
        let client = build_http_client(&config).unwrap();
        let d = descriptor("http://127.0.0.1:9/Demo.dmg", None);

        let err = fetch_artifact(&client, &d, stage.path(), &config)
            .await
            .unwrap_err();
        assert!(matches!(err, PkdError::ValidationError(_)));
    }

    #[tokio::test]
    async fn cancelled_fetch_leaves_stage_empty() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/slow.dmg");
            then.status(200).delay(Duration::from_secs(2)).body(BODY);
        });
        let root = tempfile::tempdir().unwrap();
        let stage = tempfile::tempdir().unwrap();
        let config = test_config(root.path());
        let client = build_http_client(&config).unwrap();
        let d = descriptor(&server.url("/slow.dmg"), None);

        let outcome = tokio::time::timeout(
            Duration::from_millis(200),
            fetch_artifact(&client, &d, stage.path(), &config),
        )
        .await;
        assert!(outcome.is_err(), "fetch should still be waiting");
        assert!(stage_is_empty(stage.path()));
    }

    #[test]
    fn filename_falls_back_to_token() {
        let url = Url::parse("https://example.com/").unwrap();
        assert_eq!(artifact_filename(&url, "font-demo"), "font-demo-download");
        let url = Url::parse("https://example.com/a/SF-Arabic.dmg").unwrap();
        assert_eq!(artifact_filename(&url, "font-demo"), "SF-Arabic.dmg");
    }
}
