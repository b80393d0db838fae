// pkd-common/src/descriptor/value.rs
//! Literal values and argument lists of a single stanza.

use std::iter::Peekable;
use std::str::Chars;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Str(String),
    Symbol(String),
    Bool(bool),
    Array(Vec<Value>),
}

impl Value {
    pub fn render(&self) -> String {
        match self {
            Value::Str(s) => quote(s),
            Value::Symbol(s) => format!(":{s}"),
            Value::Bool(b) => b.to_string(),
            Value::Array(items) => {
                let inner: Vec<String> = items.iter().map(Value::render).collect();
                format!("[{}]", inner.join(", "))
            }
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Str(_) => "string",
            Value::Symbol(_) => "symbol",
            Value::Bool(_) => "boolean",
            Value::Array(_) => "array",
        }
    }
}

/// Parsed arguments of a stanza: `"a", "b", key: value, other: [..]`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Args {
    pub positional: Vec<Value>,
    pub named: Vec<(String, Value)>,
}

/// Renders `s` as a double-quoted literal that [`parse_args`] reads back unchanged.
pub fn quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            _ => out.push(c),
        }
    }
    out.push('"');
    out
}

/// Splits a line into its code part (trailing whitespace removed) and the rest,
/// which holds that whitespace plus an optional `#` comment.
pub fn split_comment(line: &str) -> (&str, &str) {
    let mut in_string = false;
    let mut escaped = false;
    let mut comment_at = line.len();
    for (idx, c) in line.char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '#' => {
                comment_at = idx;
                break;
            }
            _ => {}
        }
    }
    let code = line[..comment_at].trim_end();
    (code, &line[code.len()..])
}

pub(crate) fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

pub fn parse_args(src: &str) -> Result<Args, String> {
    let mut parser = ArgParser {
        chars: src.chars().peekable(),
    };
    let mut args = Args::default();

    parser.skip_ws();
    if parser.chars.peek().is_none() {
        return Ok(args);
    }

    loop {
        parser.skip_ws();
        match parser.chars.peek().copied() {
            Some(c) if c.is_ascii_alphabetic() || c == '_' => {
                let ident = parser.parse_ident();
                if parser.chars.peek() == Some(&':') {
                    parser.chars.next();
                    let value = parser.parse_value()?;
                    args.named.push((ident, value));
                } else {
                    if !args.named.is_empty() {
                        return Err("positional argument after keyword argument".to_string());
                    }
                    args.positional.push(bare_word(ident)?);
                }
            }
            _ => {
                if !args.named.is_empty() {
                    return Err("positional argument after keyword argument".to_string());
                }
                let value = parser.parse_value()?;
                args.positional.push(value);
            }
        }

        parser.skip_ws();
        match parser.chars.next() {
            None => break,
            Some(',') => continue,
            Some(c) => return Err(format!("expected ',' between arguments, found '{c}'")),
        }
    }

    Ok(args)
}

fn bare_word(ident: String) -> Result<Value, String> {
    match ident.as_str() {
        "true" => Ok(Value::Bool(true)),
        "false" => Ok(Value::Bool(false)),
        _ => Err(format!("unexpected bare word '{ident}'")),
    }
}

struct ArgParser<'a> {
    chars: Peekable<Chars<'a>>,
}

impl ArgParser<'_> {
    fn skip_ws(&mut self) {
        while matches!(self.chars.peek(), Some(c) if c.is_whitespace()) {
            self.chars.next();
        }
    }

    fn parse_ident(&mut self) -> String {
        let mut ident = String::new();
        while let Some(&c) = self.chars.peek() {
            if !is_ident_char(c) {
                break;
            }
            ident.push(c);
            self.chars.next();
        }
        ident
    }

    fn parse_value(&mut self) -> Result<Value, String> {
        self.skip_ws();
        match self.chars.peek().copied() {
            Some('"') => self.parse_string().map(Value::Str),
            Some(':') => {
                self.chars.next();
                let name = self.parse_ident();
                if name.is_empty() {
                    Err("expected a symbol name after ':'".to_string())
                } else {
                    Ok(Value::Symbol(name))
                }
            }
            Some('[') => self.parse_array(),
            Some(c) if c.is_ascii_alphabetic() => bare_word(self.parse_ident()),
            Some(c) => Err(format!("unexpected character '{c}'")),
            None => Err("expected a value".to_string()),
        }
    }

    fn parse_string(&mut self) -> Result<String, String> {
        self.chars.next(); // opening quote
        let mut out = String::new();
        loop {
            match self.chars.next() {
                None => return Err("unterminated string literal".to_string()),
                Some('"') => return Ok(out),
                Some('\\') => match self.chars.next() {
                    Some('"') => out.push('"'),
                    Some('\\') => out.push('\\'),
                    Some('n') => out.push('\n'),
                    Some('t') => out.push('\t'),
                    Some(c) => return Err(format!("unsupported escape sequence '\\{c}'")),
                    None => return Err("unterminated string literal".to_string()),
                },
                Some(c) => out.push(c),
            }
        }
    }

    fn parse_array(&mut self) -> Result<Value, String> {
        self.chars.next(); // '['
        let mut items = Vec::new();
        self.skip_ws();
        if self.chars.peek() == Some(&']') {
            self.chars.next();
            return Ok(Value::Array(items));
        }
        loop {
            items.push(self.parse_value()?);
            self.skip_ws();
            match self.chars.next() {
                Some(',') => continue,
                Some(']') => return Ok(Value::Array(items)),
                Some(c) => return Err(format!("expected ',' or ']' in array, found '{c}'")),
                None => return Err("unterminated array".to_string()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_positional_and_named_arguments() {
        let args = parse_args(r#""SF Arabic Fonts.pkg", allow_untrusted: true"#).unwrap();
        assert_eq!(
            args.positional,
            vec![Value::Str("SF Arabic Fonts.pkg".to_string())]
        );
        assert_eq!(
            args.named,
            vec![("allow_untrusted".to_string(), Value::Bool(true))]
        );
    }

    #[test]
    fn parses_symbols_and_arrays() {
        let args = parse_args(":no_check").unwrap();
        assert_eq!(args.positional, vec![Value::Symbol("no_check".to_string())]);

        let args = parse_args(r#"pkgutil: ["com.a", "com.b"], delete: "/Library/Fonts/x.otf""#)
            .unwrap();
        assert_eq!(args.named.len(), 2);
        assert_eq!(
            args.named[0].1,
            Value::Array(vec![
                Value::Str("com.a".to_string()),
                Value::Str("com.b".to_string())
            ])
        );
    }

    #[test]
    fn string_escapes_survive_quoting() {
        let args = parse_args(r#""Arabic extension of \"San Francisco\" by Apple""#).unwrap();
        let Value::Str(s) = &args.positional[0] else {
            panic!("expected a string");
        };
        assert_eq!(s, "Arabic extension of \"San Francisco\" by Apple");
        assert_eq!(
            quote(s),
            r#""Arabic extension of \"San Francisco\" by Apple""#
        );
    }

    #[test]
    fn rejects_broken_literals() {
        assert!(parse_args(r#""open"#).unwrap_err().contains("unterminated"));
        assert!(parse_args(r#""bad \q""#).unwrap_err().contains("escape"));
        assert!(parse_args("bareword").unwrap_err().contains("bare word"));
        assert!(parse_args(r#"key: "v", "late""#)
            .unwrap_err()
            .contains("positional argument after keyword"));
        assert!(parse_args(r#""a" "b""#).unwrap_err().contains("expected ','"));
    }

    #[test]
    fn split_comment_ignores_hash_inside_strings() {
        let (code, rest) = split_comment(r##"  name "C# Sharp"   # trailing"##);
        assert_eq!(code, r##"  name "C# Sharp""##);
        assert_eq!(rest, "   # trailing");

        let (code, rest) = split_comment("  # No zap stanza required");
        assert_eq!(code, "");
        assert_eq!(rest, "  # No zap stanza required");
    }
}
