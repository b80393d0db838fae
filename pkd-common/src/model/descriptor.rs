// pkd-common/src/model/descriptor.rs
use serde::{Deserialize, Serialize};

use crate::descriptor::layout::Layout;
use crate::descriptor::value::{quote, Value};

/// The `sha256` stanza: an expected digest, or the explicit `:no_check` opt-out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Checksum {
    Sha256(String),
    NoCheck,
}

impl Checksum {
    pub fn expected(&self) -> Option<&str> {
        match self {
            Checksum::Sha256(hex) => Some(hex),
            Checksum::NoCheck => None,
        }
    }

    pub fn is_no_check(&self) -> bool {
        matches!(self, Checksum::NoCheck)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UrlSpec {
    pub url: String,
    /// The `verified:` option: the part of the URL the author vouches for.
    #[serde(default)]
    pub verified: Option<String>,
}

/// One `pkg` stanza: a package file inside the fetched artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PkgTarget {
    pub path: String,
    #[serde(default)]
    pub allow_untrusted: bool,
}

/// Key/value removal directives shared by `uninstall` and `zap`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemovalSpec {
    #[serde(default)]
    pub pkgutil: Vec<String>,
    #[serde(default)]
    pub delete: Vec<String>,
    #[serde(default)]
    pub rmdir: Vec<String>,
    /// Only accepted in `zap`.
    #[serde(default)]
    pub trash: Vec<String>,
}

impl RemovalSpec {
    pub fn is_empty(&self) -> bool {
        self.pkgutil.is_empty()
            && self.delete.is_empty()
            && self.rmdir.is_empty()
            && self.trash.is_empty()
    }

    pub(crate) fn entries(&self) -> [(&'static str, &Vec<String>); 4] {
        [
            ("pkgutil", &self.pkgutil),
            ("delete", &self.delete),
            ("rmdir", &self.rmdir),
            ("trash", &self.trash),
        ]
    }

    pub(crate) fn entry_mut(&mut self, key: &str) -> Option<&mut Vec<String>> {
        match key {
            "pkgutil" => Some(&mut self.pkgutil),
            "delete" => Some(&mut self.delete),
            "rmdir" => Some(&mut self.rmdir),
            "trash" => Some(&mut self.trash),
            _ => None,
        }
    }

    fn render_args(&self) -> String {
        let parts: Vec<String> = self
            .entries()
            .into_iter()
            .filter(|(_, values)| !values.is_empty())
            .map(|(key, values)| {
                let value = if values.len() == 1 {
                    quote(&values[0])
                } else {
                    Value::Array(values.iter().cloned().map(Value::Str).collect()).render()
                };
                format!("{key}: {value}")
            })
            .collect();
        parts.join(", ")
    }
}

/// A single stanza inside a `cask` block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Directive {
    Version(String),
    Sha256(Checksum),
    Url(UrlSpec),
    Name(String),
    Desc(String),
    Homepage(String),
    Pkg(PkgTarget),
    Uninstall(RemovalSpec),
    Zap(RemovalSpec),
}

pub const KEYWORDS: [&str; 9] = [
    "version",
    "sha256",
    "url",
    "name",
    "desc",
    "homepage",
    "pkg",
    "uninstall",
    "zap",
];

impl Directive {
    pub fn keyword(&self) -> &'static str {
        match self {
            Directive::Version(_) => "version",
            Directive::Sha256(_) => "sha256",
            Directive::Url(_) => "url",
            Directive::Name(_) => "name",
            Directive::Desc(_) => "desc",
            Directive::Homepage(_) => "homepage",
            Directive::Pkg(_) => "pkg",
            Directive::Uninstall(_) => "uninstall",
            Directive::Zap(_) => "zap",
        }
    }

    pub fn is_repeatable(&self) -> bool {
        matches!(self, Directive::Name(_) | Directive::Pkg(_))
    }

    /// Canonical argument text for this stanza.
    pub fn render_args(&self) -> String {
        match self {
            Directive::Version(v) if v == "latest" => ":latest".to_string(),
            Directive::Version(v) => quote(v),
            Directive::Sha256(Checksum::Sha256(hex)) => quote(hex),
            Directive::Sha256(Checksum::NoCheck) => ":no_check".to_string(),
            Directive::Url(spec) => match &spec.verified {
                Some(verified) => format!("{}, verified: {}", quote(&spec.url), quote(verified)),
                None => quote(&spec.url),
            },
            Directive::Name(s) | Directive::Desc(s) | Directive::Homepage(s) => quote(s),
            Directive::Pkg(target) if target.allow_untrusted => {
                format!("{}, allow_untrusted: true", quote(&target.path))
            }
            Directive::Pkg(target) => quote(&target.path),
            Directive::Uninstall(spec) | Directive::Zap(spec) => spec.render_args(),
        }
    }
}

/// A validated package descriptor.
///
/// Descriptors are immutable once loaded; [`Descriptor::to_text`] reproduces
/// the text they were loaded from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Descriptor {
    pub token: String,
    pub version: String,
    pub sha256: Checksum,
    pub url: UrlSpec,
    /// Display names in declaration order; never empty.
    pub names: Vec<String>,
    pub desc: Option<String>,
    pub homepage: Option<String>,
    /// Install targets; never empty.
    pub pkgs: Vec<PkgTarget>,
    pub uninstall: RemovalSpec,
    pub zap: Option<RemovalSpec>,
    pub(crate) layout: Layout,
}

impl Descriptor {
    /// The canonical (first) display name.
    pub fn display_name(&self) -> &str {
        self.names.first().map(String::as_str).unwrap_or(&self.token)
    }

    pub fn source_url(&self) -> &str {
        &self.url.url
    }

    pub fn to_text(&self) -> String {
        self.layout.render()
    }

    /// Directives in the canonical stanza order.
    pub fn directives(&self) -> Vec<Directive> {
        let mut out = vec![
            Directive::Version(self.version.clone()),
            Directive::Sha256(self.sha256.clone()),
            Directive::Url(self.url.clone()),
        ];
        out.extend(self.names.iter().cloned().map(Directive::Name));
        if let Some(desc) = &self.desc {
            out.push(Directive::Desc(desc.clone()));
        }
        if let Some(homepage) = &self.homepage {
            out.push(Directive::Homepage(homepage.clone()));
        }
        out.extend(self.pkgs.iter().cloned().map(Directive::Pkg));
        out.push(Directive::Uninstall(self.uninstall.clone()));
        if let Some(zap) = &self.zap {
            out.push(Directive::Zap(zap.clone()));
        }
        out
    }
}
