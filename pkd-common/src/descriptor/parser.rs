// pkd-common/src/descriptor/parser.rs
use std::collections::HashMap;

use tracing::debug;
use url::Url;

use super::layout::{Layout, SourceLine};
use super::value::{is_ident_char, parse_args, split_comment, Args, Value};
use crate::error::{PkdError, Result, UNKNOWN_TOKEN};
use crate::model::descriptor::KEYWORDS;
use crate::model::{Checksum, Descriptor, Directive, PkgTarget, RemovalSpec, UrlSpec};

const UNINSTALL_KEYS: [&str; 3] = ["pkgutil", "delete", "rmdir"];
const ZAP_KEYS: [&str; 4] = ["trash", "delete", "rmdir", "pkgutil"];

/// Parses descriptor text into a validated [`Descriptor`].
///
/// Pure: performs no I/O. Errors name the identifier (or `unknown` before the
/// header is read) and the 1-based line the problem was found on.
pub fn parse_descriptor(text: &str) -> Result<Descriptor> {
    let final_newline = text.ends_with('\n');
    let body = if final_newline {
        &text[..text.len() - 1]
    } else {
        text
    };

    let mut layout = Layout::new(final_newline);
    let mut token: Option<String> = None;
    let mut closed = false;
    let mut stanzas: Vec<(usize, Directive)> = Vec::new();

    for (idx, line) in body.split('\n').enumerate() {
        let line_no = idx + 1;
        let (code, _) = split_comment(line);
        let code_trimmed = code.trim_start();

        if code_trimmed.is_empty() {
            layout.push(SourceLine::Verbatim(line.to_string()));
            continue;
        }

        let Some(current) = token.as_deref() else {
            token = Some(parse_header(code_trimmed, line_no)?);
            layout.push(SourceLine::Verbatim(line.to_string()));
            continue;
        };

        if closed {
            return Err(PkdError::malformed(
                current,
                format!("line {line_no}: unexpected content after `end`"),
            ));
        }
        if code_trimmed == "end" {
            closed = true;
            layout.push(SourceLine::Verbatim(line.to_string()));
            continue;
        }

        let (source_line, directive) = parse_stanza_line(current, line, code, line_no)?;
        layout.push(source_line);
        stanzas.push((line_no, directive));
    }

    let Some(token) = token else {
        return Err(PkdError::malformed(
            UNKNOWN_TOKEN,
            "missing `cask \"<token>\" do` header",
        ));
    };
    if !closed {
        return Err(PkdError::malformed(&token, "missing closing `end`"));
    }

    debug!("Parsed {} stanzas for descriptor '{}'", stanzas.len(), token);
    assemble(token, stanzas, layout)
}

fn parse_header(code: &str, line_no: usize) -> Result<String> {
    let header_err = || {
        PkdError::malformed(
            UNKNOWN_TOKEN,
            format!("line {line_no}: expected `cask \"<token>\" do` header"),
        )
    };
    let rest = code.strip_prefix("cask").ok_or_else(header_err)?;
    let inner = rest.strip_suffix("do").ok_or_else(header_err)?;
    if !rest.starts_with(char::is_whitespace) || !inner.ends_with(char::is_whitespace) {
        return Err(header_err());
    }
    let args = parse_args(inner)
        .map_err(|e| PkdError::malformed(UNKNOWN_TOKEN, format!("line {line_no}: {e}")))?;
    match (args.positional.as_slice(), args.named.is_empty()) {
        ([Value::Str(token)], true) => {
            validate_token(token).map_err(|e| {
                PkdError::malformed(UNKNOWN_TOKEN, format!("line {line_no}: {e}"))
            })?;
            Ok(token.clone())
        }
        _ => Err(header_err()),
    }
}

/// Identifiers: lowercase ASCII letters and digits, plus `.`, `_`, `@`, `+`, `-`
/// after the first character.
pub fn validate_token(token: &str) -> std::result::Result<(), String> {
    let mut chars = token.chars();
    match chars.next() {
        Some(c) if c.is_ascii_lowercase() || c.is_ascii_digit() => {}
        _ => return Err(format!("invalid identifier '{token}'")),
    }
    if chars.all(|c| {
        c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '.' | '_' | '@' | '+' | '-')
    }) {
        Ok(())
    } else {
        Err(format!("invalid identifier '{token}'"))
    }
}

/// Versions name the Caskroom version directory, so they must be a single
/// path component.
pub fn validate_version(version: &str) -> std::result::Result<(), String> {
    if version == "." || version == ".." || version.contains(['/', '\\', '\0']) {
        return Err(format!(
            "version '{}' cannot be used as a directory name",
            version.escape_default()
        ));
    }
    Ok(())
}

fn parse_stanza_line(
    token: &str,
    line: &str,
    code: &str,
    line_no: usize,
) -> Result<(SourceLine, Directive)> {
    let rest = code.trim_start();
    let indent = &code[..code.len() - rest.len()];
    let keyword_len = rest
        .char_indices()
        .find(|&(_, c)| !is_ident_char(c))
        .map_or(rest.len(), |(idx, _)| idx);
    let keyword = &rest[..keyword_len];
    if keyword.is_empty() {
        return Err(PkdError::malformed(
            token,
            format!("line {line_no}: expected a stanza keyword"),
        ));
    }
    let after = &rest[keyword_len..];
    let args_src = after.trim_start();
    let gap = &after[..after.len() - args_src.len()];

    if !KEYWORDS.contains(&keyword) {
        return Err(PkdError::UnsupportedDirective {
            token: token.to_string(),
            line: line_no,
            directive: keyword.to_string(),
        });
    }
    if args_src == "do" || args_src.ends_with(" do") {
        return Err(PkdError::malformed(
            token,
            format!("line {line_no}: `{keyword}` does not take a block"),
        ));
    }

    let args = parse_args(args_src)
        .map_err(|e| PkdError::malformed(token, format!("line {line_no}: {e}")))?;
    let directive = directive_from_args(token, keyword, args, line_no)?;

    let source_line = SourceLine::Stanza {
        indent: indent.to_string(),
        keyword: keyword.to_string(),
        gap: gap.to_string(),
        args: args_src.to_string(),
        trailing: line[code.len()..].to_string(),
    };
    Ok((source_line, directive))
}

fn directive_from_args(token: &str, keyword: &str, args: Args, line_no: usize) -> Result<Directive> {
    let malformed = |msg: String| PkdError::malformed(token, format!("line {line_no}: {msg}"));

    match keyword {
        "uninstall" | "zap" => {
            let allowed: &[&str] = if keyword == "zap" {
                &ZAP_KEYS
            } else {
                &UNINSTALL_KEYS
            };
            let spec = removal_spec(token, keyword, allowed, args, line_no)?;
            return Ok(if keyword == "zap" {
                Directive::Zap(spec)
            } else {
                Directive::Uninstall(spec)
            });
        }
        _ => {}
    }

    let mut positional = args.positional.into_iter();
    let first = positional
        .next()
        .ok_or_else(|| malformed(format!("`{keyword}` requires a value")))?;
    if positional.next().is_some() {
        return Err(malformed(format!("`{keyword}` takes a single value")));
    }

    let mut verified = None;
    let mut allow_untrusted = false;
    for (key, value) in args.named {
        match (keyword, key.as_str(), value) {
            ("url", "verified", Value::Str(v)) => verified = Some(v),
            ("pkg", "allow_untrusted", Value::Bool(b)) => allow_untrusted = b,
            (_, key, value) => {
                return Err(malformed(format!(
                    "unknown option `{key}:` ({}) for `{keyword}`",
                    value.type_name()
                )))
            }
        }
    }

    match (keyword, first) {
        ("version", Value::Str(v)) if !v.trim().is_empty() => {
            validate_version(&v).map_err(malformed)?;
            Ok(Directive::Version(v))
        }
        ("version", Value::Symbol(s)) if s == "latest" => {
            Ok(Directive::Version("latest".to_string()))
        }
        ("sha256", Value::Symbol(s)) if s == "no_check" => Ok(Directive::Sha256(Checksum::NoCheck)),
        ("sha256", Value::Str(hex)) => {
            if hex.len() == 64 && hex.chars().all(|c| c.is_ascii_hexdigit()) {
                Ok(Directive::Sha256(Checksum::Sha256(hex.to_ascii_lowercase())))
            } else {
                Err(malformed(format!(
                    "sha256 must be 64 hex characters or :no_check, got '{hex}'"
                )))
            }
        }
        ("url", Value::Str(url)) => {
            let parsed =
                Url::parse(&url).map_err(|e| malformed(format!("invalid url '{url}': {e}")))?;
            if !matches!(parsed.scheme(), "https" | "http") {
                return Err(malformed(format!(
                    "url must use https, got scheme '{}'",
                    parsed.scheme()
                )));
            }
            Ok(Directive::Url(UrlSpec { url, verified }))
        }
        ("name", Value::Str(s)) if !s.trim().is_empty() => Ok(Directive::Name(s)),
        ("desc", Value::Str(s)) => Ok(Directive::Desc(s)),
        ("homepage", Value::Str(s)) => Ok(Directive::Homepage(s)),
        ("pkg", Value::Str(path)) if !path.trim().is_empty() => Ok(Directive::Pkg(PkgTarget {
            path,
            allow_untrusted,
        })),
        (keyword, other) => Err(malformed(format!(
            "invalid {} value `{}` for `{keyword}`",
            other.type_name(),
            other.render()
        ))),
    }
}

fn removal_spec(
    token: &str,
    keyword: &str,
    allowed: &[&str],
    args: Args,
    line_no: usize,
) -> Result<RemovalSpec> {
    let malformed = |msg: String| PkdError::malformed(token, format!("line {line_no}: {msg}"));
    if !args.positional.is_empty() {
        return Err(malformed(format!("`{keyword}` only takes `key: value` pairs")));
    }
    if args.named.is_empty() {
        return Err(malformed(format!("`{keyword}` requires at least one key")));
    }

    let mut spec = RemovalSpec::default();
    let mut seen: Vec<String> = Vec::new();
    for (key, value) in args.named {
        if !allowed.contains(&key.as_str()) {
            return Err(PkdError::UnsupportedDirective {
                token: token.to_string(),
                line: line_no,
                directive: format!("{keyword} {key}:"),
            });
        }
        if seen.contains(&key) {
            return Err(PkdError::DuplicateField {
                token: token.to_string(),
                field: format!("{keyword} {key}:"),
                line: line_no,
                first_line: line_no,
            });
        }
        let values = match value {
            Value::Str(s) => vec![s],
            Value::Array(items) if !items.is_empty() => items
                .into_iter()
                .map(|item| match item {
                    Value::Str(s) => Ok(s),
                    other => Err(malformed(format!(
                        "`{key}:` entries must be strings, got {}",
                        other.type_name()
                    ))),
                })
                .collect::<Result<Vec<_>>>()?,
            other => {
                return Err(malformed(format!(
                    "`{key}:` expects a string or a non-empty array, got {}",
                    other.type_name()
                )))
            }
        };
        if let Some(slot) = spec.entry_mut(&key) {
            *slot = values;
        }
        seen.push(key);
    }
    Ok(spec)
}

/// Folds stanzas into a descriptor, enforcing required and non-repeatable fields.
pub(crate) fn assemble(
    token: String,
    stanzas: Vec<(usize, Directive)>,
    layout: Layout,
) -> Result<Descriptor> {
    let mut first_seen: HashMap<&'static str, usize> = HashMap::new();
    let mut version = None;
    let mut sha256 = None;
    let mut url = None;
    let mut names = Vec::new();
    let mut desc = None;
    let mut homepage = None;
    let mut pkgs = Vec::new();
    let mut uninstall = None;
    let mut zap = None;

    for (line, directive) in stanzas {
        let keyword = directive.keyword();
        if !directive.is_repeatable() {
            if let Some(&first_line) = first_seen.get(keyword) {
                return Err(PkdError::DuplicateField {
                    token,
                    field: keyword.to_string(),
                    line,
                    first_line,
                });
            }
            first_seen.insert(keyword, line);
        }
        match directive {
            Directive::Version(v) => version = Some(v),
            Directive::Sha256(c) => sha256 = Some(c),
            Directive::Url(u) => url = Some(u),
            Directive::Name(n) => names.push(n),
            Directive::Desc(d) => desc = Some(d),
            Directive::Homepage(h) => homepage = Some(h),
            Directive::Pkg(p) => pkgs.push(p),
            Directive::Uninstall(spec) => uninstall = Some(spec),
            Directive::Zap(spec) => zap = Some(spec),
        }
    }

    let missing = |field: &str| {
        PkdError::malformed(&token, format!("missing required `{field}` stanza"))
    };
    let version = version.ok_or_else(|| missing("version"))?;
    let sha256 = sha256.ok_or_else(|| missing("sha256"))?;
    let url = url.ok_or_else(|| missing("url"))?;
    if names.is_empty() {
        return Err(missing("name"));
    }
    if pkgs.is_empty() {
        return Err(missing("pkg"));
    }
    let uninstall = uninstall.ok_or_else(|| missing("uninstall"))?;

    Ok(Descriptor {
        token,
        version,
        sha256,
        url,
        names,
        desc,
        homepage,
        pkgs,
        uninstall,
        zap,
        layout,
    })
}
