// pkd-net/src/validation.rs
use pkd_common::error::{PkdError, Result};
use url::Url;

/// Compares a computed digest against the expected one, case-insensitively.
pub fn check_digest(token: &str, expected: &str, actual: &str) -> Result<()> {
    if actual.eq_ignore_ascii_case(expected) {
        Ok(())
    } else {
        Err(PkdError::ChecksumMismatch {
            token: token.to_string(),
            expected: expected.to_ascii_lowercase(),
            actual: actual.to_ascii_lowercase(),
        })
    }
}

/// Parses an artifact URL and requires `https` (or `http` when allowed).
pub fn validate_url(token: &str, url_str: &str, allow_http: bool) -> Result<Url> {
    let url = Url::parse(url_str).map_err(|e| PkdError::NetworkError {
        token: token.to_string(),
        url: url_str.to_string(),
        detail: format!("invalid URL: {e}"),
    })?;
    match url.scheme() {
        "https" => Ok(url),
        "http" if allow_http => Ok(url),
        scheme => Err(PkdError::ValidationError(format!(
            "Invalid URL scheme for '{url_str}': Must be https, but got '{scheme}'"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pkd_common::error::ErrorKind;

    const HELLO_SHA256: &str = "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824";

    #[test]
    fn digests_compare_case_insensitively() {
        check_digest("demo", &HELLO_SHA256.to_ascii_uppercase(), HELLO_SHA256).unwrap();

        let err = check_digest("demo", &"0".repeat(64), HELLO_SHA256).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ChecksumMismatch);
        assert_eq!(err.identifier(), Some("demo"));
        assert!(err.to_string().contains(HELLO_SHA256));
    }

    #[test]
    fn plain_http_needs_opt_in() {
        assert!(validate_url("demo", "https://example.com/a.dmg", false).is_ok());
        assert!(validate_url("demo", "http://127.0.0.1:8080/a.dmg", false).is_err());
        assert!(validate_url("demo", "http://127.0.0.1:8080/a.dmg", true).is_ok());
        assert!(validate_url("demo", "ftp://example.com/a.dmg", true).is_err());
        assert!(validate_url("demo", "not a url", true).is_err());
    }
}
