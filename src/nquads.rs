//! The N-Quads wire format: escaping, line serialization, and parsing.

use thiserror::Error;

use crate::rdf::{GraphLabel, Literal, Object, Quad, RdfDataset, Subject, XSD_STRING};

#[derive(Debug, Error)]
#[error("N-Quads parse error at line {line}: {message}")]
pub struct NQuadsParseError {
    pub line: usize,
    pub message: String,
}

/// Escape a string value for N-Quads serialization.
///
/// Escapes `\t`, `\n`, `\r`, `\"`, `\\`; remaining control characters
/// become `\uXXXX`.
pub fn escape_nquads(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for ch in s.chars() {
        match ch {
            '\t' => out.push_str("\\t"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            c if c < '\u{0020}' => {
                out.push_str(&format!("\\u{:04X}", c as u32));
            }
            c => out.push(c),
        }
    }
    out
}

/// Unescape an N-Quads string value, handling `\uXXXX` (with surrogate
/// pairs) and `\UXXXXXXXX`.
pub fn unescape_nquads(s: &str) -> Result<String, String> {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        match chars.next() {
            Some('t') => out.push('\t'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('b') => out.push('\u{0008}'),
            Some('f') => out.push('\u{000C}'),
            Some('\'') => out.push('\''),
            Some('"') => out.push('"'),
            Some('\\') => out.push('\\'),
            Some('u') => {
                let hex: String = chars.by_ref().take(4).collect();
                if hex.len() != 4 {
                    return Err(format!("incomplete \\u escape: \\u{}", hex));
                }
                let cp = u32::from_str_radix(&hex, 16)
                    .map_err(|_| format!("invalid \\u escape: \\u{}", hex))?;
                if (0xD800..=0xDBFF).contains(&cp) {
                    // high surrogate, expect a low surrogate next
                    match (chars.next(), chars.next()) {
                        (Some('\\'), Some('u')) => {}
                        _ => return Err(format!("expected low surrogate after \\u{}", hex)),
                    }
                    let low_hex: String = chars.by_ref().take(4).collect();
                    if low_hex.len() != 4 {
                        return Err(format!("incomplete low surrogate: \\u{}", low_hex));
                    }
                    let low = u32::from_str_radix(&low_hex, 16)
                        .map_err(|_| format!("invalid low surrogate: \\u{}", low_hex))?;
                    if !(0xDC00..=0xDFFF).contains(&low) {
                        return Err(format!("invalid low surrogate: \\u{}", low_hex));
                    }
                    let combined = 0x10000 + ((cp - 0xD800) << 10) + (low - 0xDC00);
                    let c = char::from_u32(combined)
                        .ok_or_else(|| format!("invalid surrogate pair: \\u{}\\u{}", hex, low_hex))?;
                    out.push(c);
                } else {
                    let c = char::from_u32(cp)
                        .ok_or_else(|| format!("invalid unicode codepoint: \\u{}", hex))?;
                    out.push(c);
                }
            }
            Some('U') => {
                let hex: String = chars.by_ref().take(8).collect();
                if hex.len() != 8 {
                    return Err(format!("incomplete \\U escape: \\U{}", hex));
                }
                let cp = u32::from_str_radix(&hex, 16)
                    .map_err(|_| format!("invalid \\U escape: \\U{}", hex))?;
                let c = char::from_u32(cp)
                    .ok_or_else(|| format!("invalid unicode codepoint: \\U{}", hex))?;
                out.push(c);
            }
            Some(other) => return Err(format!("unknown escape sequence: \\{}", other)),
            None => return Err("trailing backslash".to_owned()),
        }
    }
    Ok(out)
}

/// Serialize a single quad to an N-Quads line (without trailing newline).
pub fn serialize_quad(quad: &Quad) -> String {
    let mut out = String::with_capacity(128);

    match &quad.subject {
        Subject::Iri(iri) => {
            out.push('<');
            out.push_str(iri);
            out.push('>');
        }
        Subject::Blank(label) => out.push_str(label),
    }

    out.push(' ');

    if quad.predicate.starts_with("_:") {
        out.push_str(&quad.predicate);
    } else {
        out.push('<');
        out.push_str(&quad.predicate);
        out.push('>');
    }

    out.push(' ');

    match &quad.object {
        Object::Iri(iri) => {
            out.push('<');
            out.push_str(iri);
            out.push('>');
        }
        Object::Blank(label) => out.push_str(label),
        Object::Literal(literal) => {
            out.push('"');
            out.push_str(&escape_nquads(&literal.value));
            out.push('"');
            if let Some(language) = &literal.language {
                out.push('@');
                out.push_str(language);
            } else if literal.datatype != XSD_STRING {
                out.push_str("^^<");
                out.push_str(&literal.datatype);
                out.push('>');
            }
        }
    }

    out.push(' ');

    match &quad.graph {
        GraphLabel::Iri(iri) => {
            out.push('<');
            out.push_str(iri);
            out.push_str("> ");
        }
        GraphLabel::Blank(label) => {
            out.push_str(label);
            out.push(' ');
        }
        GraphLabel::Default => {}
    }

    out.push('.');
    out
}

/// Serialize a dataset to N-Quads, one newline-terminated line per quad,
/// in dataset order.
pub fn serialize_dataset(dataset: &RdfDataset) -> String {
    let mut out = String::new();
    for quad in dataset.quads() {
        out.push_str(&serialize_quad(&quad));
        out.push('\n');
    }
    out
}

#[derive(Debug)]
enum Term {
    Iri(String),
    Blank(String),
    Literal(Literal),
}

struct Scanner<'a> {
    rest: &'a str,
    line: usize,
}

impl<'a> Scanner<'a> {
    fn error(&self, message: impl Into<String>) -> NQuadsParseError {
        NQuadsParseError {
            line: self.line,
            message: message.into(),
        }
    }

    fn skip_whitespace(&mut self) {
        self.rest = self.rest.trim_start();
    }

    fn at_end_of_statement(&mut self) -> bool {
        self.skip_whitespace();
        self.rest.starts_with('.')
    }

    fn term(&mut self) -> Result<Term, NQuadsParseError> {
        self.skip_whitespace();

        if let Some(rest) = self.rest.strip_prefix('<') {
            let end = rest
                .find('>')
                .ok_or_else(|| self.error("unterminated IRI"))?;
            let iri = unescape_nquads(&rest[..end]).map_err(|e| self.error(e))?;
            self.rest = &rest[end + 1..];
            return Ok(Term::Iri(iri));
        }

        if let Some(rest) = self.rest.strip_prefix("_:") {
            let end = rest
                .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_' || c == '-'))
                .unwrap_or(rest.len());
            if end == 0 {
                return Err(self.error("empty blank node label"));
            }
            let label = format!("_:{}", &rest[..end]);
            self.rest = &rest[end..];
            return Ok(Term::Blank(label));
        }

        if let Some(rest) = self.rest.strip_prefix('"') {
            // find the closing unescaped quote
            let mut escaped = false;
            let mut end = None;
            for (i, c) in rest.char_indices() {
                if escaped {
                    escaped = false;
                } else if c == '\\' {
                    escaped = true;
                } else if c == '"' {
                    end = Some(i);
                    break;
                }
            }
            let end = end.ok_or_else(|| self.error("unterminated literal"))?;
            let value = unescape_nquads(&rest[..end]).map_err(|e| self.error(e))?;
            self.rest = &rest[end + 1..];

            if let Some(rest) = self.rest.strip_prefix('@') {
                let end = rest
                    .find(|c: char| !(c.is_ascii_alphanumeric() || c == '-'))
                    .unwrap_or(rest.len());
                if end == 0 {
                    return Err(self.error("empty language tag"));
                }
                let language = rest[..end].to_owned();
                self.rest = &rest[end..];
                return Ok(Term::Literal(Literal::lang(value, language)));
            }

            if let Some(rest) = self.rest.strip_prefix("^^") {
                if let Some(rest) = rest.strip_prefix('<') {
                    let end = rest
                        .find('>')
                        .ok_or_else(|| self.error("unterminated datatype IRI"))?;
                    let datatype = unescape_nquads(&rest[..end]).map_err(|e| self.error(e))?;
                    self.rest = &rest[end + 1..];
                    return Ok(Term::Literal(Literal::typed(value, datatype)));
                }
                return Err(self.error("expected datatype IRI after ^^"));
            }

            return Ok(Term::Literal(Literal::string(value)));
        }

        Err(self.error(format!("unexpected token: {}", self.rest)))
    }
}

/// Parse an N-Quads document into a dataset. Blank lines and `#`
/// comments are skipped.
pub fn parse(input: &str) -> Result<RdfDataset, NQuadsParseError> {
    let mut dataset = RdfDataset::new();

    for (index, raw_line) in input.lines().enumerate() {
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        dataset.add_quad(parse_line(line, index + 1)?);
    }

    Ok(dataset)
}

fn parse_line(line: &str, line_number: usize) -> Result<Quad, NQuadsParseError> {
    let mut scanner = Scanner {
        rest: line,
        line: line_number,
    };

    let subject = match scanner.term()? {
        Term::Iri(iri) => Subject::Iri(iri),
        Term::Blank(label) => Subject::Blank(label),
        Term::Literal(_) => return Err(scanner.error("literal subject")),
    };

    let predicate = match scanner.term()? {
        Term::Iri(iri) => iri,
        // generalized RDF permits blank node predicates
        Term::Blank(label) => label,
        Term::Literal(_) => return Err(scanner.error("literal predicate")),
    };

    let object = match scanner.term()? {
        Term::Iri(iri) => Object::Iri(iri),
        Term::Blank(label) => Object::Blank(label),
        Term::Literal(literal) => Object::Literal(literal),
    };

    let graph = if scanner.at_end_of_statement() {
        GraphLabel::Default
    } else {
        match scanner.term()? {
            Term::Iri(iri) => GraphLabel::Iri(iri),
            Term::Blank(label) => GraphLabel::Blank(label),
            Term::Literal(_) => return Err(scanner.error("literal graph label")),
        }
    };

    scanner.skip_whitespace();
    match scanner.rest.strip_prefix('.') {
        Some(rest) if rest.trim().is_empty() => Ok(Quad {
            subject,
            predicate,
            object,
            graph,
        }),
        _ => Err(scanner.error("expected terminating '.'")),
    }
}
