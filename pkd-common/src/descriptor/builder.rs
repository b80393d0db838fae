// pkd-common/src/descriptor/builder.rs
use super::layout::Layout;
use super::parser::parse_descriptor;
use crate::error::Result;
use crate::model::{Checksum, Descriptor, Directive, PkgTarget, RemovalSpec, UrlSpec};

/// Assembles a descriptor in code.
///
/// `build` renders the stanzas in canonical layout and runs them through the
/// same validation as text loaded from disk, so a built descriptor always
/// renders to text that loads back to an equal descriptor.
#[derive(Debug, Clone, Default)]
pub struct DescriptorBuilder {
    token: String,
    directives: Vec<Directive>,
}

impl DescriptorBuilder {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            directives: Vec::new(),
        }
    }

    fn push(mut self, directive: Directive) -> Self {
        self.directives.push(directive);
        self
    }

    pub fn version(self, version: impl Into<String>) -> Self {
        self.push(Directive::Version(version.into()))
    }

    pub fn sha256(self, hex: impl Into<String>) -> Self {
        self.push(Directive::Sha256(Checksum::Sha256(hex.into())))
    }

    pub fn no_check(self) -> Self {
        self.push(Directive::Sha256(Checksum::NoCheck))
    }

    pub fn url(self, url: impl Into<String>) -> Self {
        self.push(Directive::Url(UrlSpec {
            url: url.into(),
            verified: None,
        }))
    }

    pub fn name(self, name: impl Into<String>) -> Self {
        self.push(Directive::Name(name.into()))
    }

    pub fn desc(self, desc: impl Into<String>) -> Self {
        self.push(Directive::Desc(desc.into()))
    }

    pub fn homepage(self, homepage: impl Into<String>) -> Self {
        self.push(Directive::Homepage(homepage.into()))
    }

    pub fn pkg(self, path: impl Into<String>) -> Self {
        self.push(Directive::Pkg(PkgTarget {
            path: path.into(),
            allow_untrusted: false,
        }))
    }

    pub fn uninstall(self, spec: RemovalSpec) -> Self {
        self.push(Directive::Uninstall(spec))
    }

    /// Shorthand for `uninstall pkgutil: <id>`.
    pub fn uninstall_pkgutil(self, id: impl Into<String>) -> Self {
        self.uninstall(RemovalSpec {
            pkgutil: vec![id.into()],
            ..Default::default()
        })
    }

    pub fn zap(self, spec: RemovalSpec) -> Self {
        self.push(Directive::Zap(spec))
    }

    pub fn build(self) -> Result<Descriptor> {
        let text = Layout::canonical(&self.token, &self.directives).render();
        parse_descriptor(&text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn built_descriptor_renders_canonically() {
        let d = DescriptorBuilder::new("font-demo")
            .version("1.2")
            .sha256("A".repeat(64))
            .url("https://example.com/demo.dmg")
            .name("Demo \"Font\"")
            .pkg("Demo Fonts.pkg")
            .uninstall_pkgutil("com.example.demo")
            .build()
            .unwrap();

        assert_eq!(d.sha256.expected(), Some("a".repeat(64).as_str()));
        assert_eq!(d.names[0], "Demo \"Font\"");
        let expected = format!(
            "cask \"font-demo\" do\n  version \"1.2\"\n  sha256 \"{}\"\n  url \"https://example.com/demo.dmg\"\n  name \"Demo \\\"Font\\\"\"\n  pkg \"Demo Fonts.pkg\"\n  uninstall pkgutil: \"com.example.demo\"\nend\n",
            "A".repeat(64)
        );
        assert_eq!(d.to_text(), expected);
        assert_eq!(parse_descriptor(&d.to_text()).unwrap(), d);
    }

    #[test]
    fn builder_applies_the_same_validation() {
        let err = DescriptorBuilder::new("font-demo")
            .version("1")
            .no_check()
            .url("ftp://example.com/demo.dmg")
            .name("Demo")
            .pkg("Demo.pkg")
            .uninstall_pkgutil("com.example.demo")
            .build()
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MalformedDescriptor);

        let err = DescriptorBuilder::new("font-demo")
            .version("1")
            .no_check()
            .url("https://example.com/demo.dmg")
            .pkg("Demo.pkg")
            .uninstall_pkgutil("com.example.demo")
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("`name`"), "{err}");
    }
}
