// pkd-common/src/descriptor/layout.rs
//! Line-level layout of a descriptor, kept so rendering reproduces the source.

use super::value::quote;
use crate::model::Directive;

const CANONICAL_INDENT: &str = "  ";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct Layout {
    lines: Vec<SourceLine>,
    final_newline: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum SourceLine {
    /// Header, `end`, blank and comment-only lines.
    Verbatim(String),
    /// `indent keyword gap args trailing`, where `trailing` holds any
    /// whitespace and comment after the arguments.
    Stanza {
        indent: String,
        keyword: String,
        gap: String,
        args: String,
        trailing: String,
    },
}

impl SourceLine {
    fn write_to(&self, out: &mut String) {
        match self {
            SourceLine::Verbatim(raw) => out.push_str(raw),
            SourceLine::Stanza {
                indent,
                keyword,
                gap,
                args,
                trailing,
            } => {
                out.push_str(indent);
                out.push_str(keyword);
                out.push_str(gap);
                out.push_str(args);
                out.push_str(trailing);
            }
        }
    }
}

impl Layout {
    pub(crate) fn new(final_newline: bool) -> Self {
        Self {
            lines: Vec::new(),
            final_newline,
        }
    }

    pub(crate) fn push(&mut self, line: SourceLine) {
        self.lines.push(line);
    }

    /// The layout a descriptor built in code renders with.
    pub(crate) fn canonical(token: &str, directives: &[Directive]) -> Self {
        let mut layout = Self::new(true);
        layout.push(SourceLine::Verbatim(format!("cask {} do", quote(token))));
        for directive in directives {
            layout.push(SourceLine::Stanza {
                indent: CANONICAL_INDENT.to_string(),
                keyword: directive.keyword().to_string(),
                gap: " ".to_string(),
                args: directive.render_args(),
                trailing: String::new(),
            });
        }
        layout.push(SourceLine::Verbatim("end".to_string()));
        layout
    }

    pub(crate) fn render(&self) -> String {
        let mut out = String::new();
        for (idx, line) in self.lines.iter().enumerate() {
            if idx > 0 {
                out.push('\n');
            }
            line.write_to(&mut out);
        }
        if self.final_newline {
            out.push('\n');
        }
        out
    }
}
