// Copyright (c) 2025 - Cowboy AI, LLC.

//! Streaming LDIF parser and export helpers (RFC 2849)
//!
//! The parser is an iterator over entries so a 100-MB PKD bundle never has
//! to be materialized as a whole: continuation lines (leading space), `::`
//! base64 values (implicitly tagged `;binary`), comment lines, `version: 1`
//! headers, base64 DNs, and CRLF line endings are all handled.

use crate::error::{PkdError, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::BufRead;

/// One LDIF entry: a DN plus ordered attribute values
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LdifEntry {
    /// Entry distinguished name
    pub dn: String,
    /// Attribute name (with `;binary` suffix where applicable) to values,
    /// in file order per attribute
    pub attributes: BTreeMap<String, Vec<String>>,
}

impl LdifEntry {
    /// First value of an attribute, if present
    pub fn first(&self, attr: &str) -> Option<&str> {
        self.attributes.get(attr)?.first().map(String::as_str)
    }

    /// First value of `attr;binary` (falling back to the bare name),
    /// base64-decoded
    pub fn first_binary(&self, attr: &str) -> Option<Result<Vec<u8>>> {
        let value = self
            .first(&format!("{attr};binary"))
            .or_else(|| self.first(attr))?;
        Some(BASE64.decode(value.trim()).map_err(PkdError::from))
    }

    /// Whether the entry carries the attribute (bare or `;binary`)
    pub fn has(&self, attr: &str) -> bool {
        self.attributes.contains_key(attr)
            || self.attributes.contains_key(&format!("{attr};binary"))
    }
}

/// Streaming parser over any buffered reader
pub struct LdifParser<R: BufRead> {
    reader: R,
    /// Lookahead line carried between entries
    pending_line: Option<String>,
    done: bool,
}

impl<R: BufRead> LdifParser<R> {
    /// Create a parser over a buffered reader
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            pending_line: None,
            done: false,
        }
    }

    fn read_line(&mut self) -> Result<Option<String>> {
        if let Some(line) = self.pending_line.take() {
            return Ok(Some(line));
        }
        let mut buf = String::new();
        let n = self.reader.read_line(&mut buf)?;
        if n == 0 {
            return Ok(None);
        }
        while buf.ends_with('\n') || buf.ends_with('\r') {
            buf.pop();
        }
        Ok(Some(buf))
    }

    /// Read one logical (continuation-folded) line, or None at EOF
    fn read_logical_line(&mut self) -> Result<Option<String>> {
        let mut line = loop {
            match self.read_line()? {
                None => return Ok(None),
                Some(l) if l.starts_with('#') => continue,
                Some(l) => break l,
            }
        };
        if line.is_empty() {
            return Ok(Some(line));
        }
        loop {
            match self.read_line()? {
                None => break,
                Some(next) => {
                    if let Some(cont) = next.strip_prefix(' ') {
                        line.push_str(cont);
                    } else {
                        self.pending_line = Some(next);
                        break;
                    }
                }
            }
        }
        Ok(Some(line))
    }

    /// Parse the next entry, or Ok(None) at end of input
    pub fn next_entry(&mut self) -> Result<Option<LdifEntry>> {
        if self.done {
            return Ok(None);
        }

        let mut entry = LdifEntry::default();

        loop {
            let line = match self.read_logical_line()? {
                None => {
                    self.done = true;
                    break;
                }
                Some(l) => l,
            };

            if line.is_empty() {
                if entry.dn.is_empty() && entry.attributes.is_empty() {
                    continue; // leading blank lines
                }
                break;
            }

            let (attr, value) = parse_attr_line(&line)?;

            if attr.eq_ignore_ascii_case("version") && entry.dn.is_empty() {
                continue;
            }

            if attr == "dn" || attr == "dn;binary" {
                entry.dn = if attr.ends_with(";binary") {
                    String::from_utf8(BASE64.decode(value.trim())?)
                        .map_err(|e| PkdError::Parse(format!("base64 DN is not UTF-8: {e}")))?
                } else {
                    value
                };
                continue;
            }

            entry.attributes.entry(attr).or_default().push(value);
        }

        if entry.dn.is_empty() && entry.attributes.is_empty() {
            Ok(None)
        } else {
            Ok(Some(entry))
        }
    }
}

/// Split `attr: value` / `attr:: base64value`; `::` adds the `;binary`
/// suffix unless already present.
fn parse_attr_line(line: &str) -> Result<(String, String)> {
    let colon = line
        .find(':')
        .ok_or_else(|| PkdError::Parse(format!("LDIF line without colon: {line:.40}")))?;
    let mut attr = line[..colon].trim().to_string();
    let rest = &line[colon + 1..];

    let value = if let Some(b64) = rest.strip_prefix(':') {
        if !attr.ends_with(";binary") {
            attr.push_str(";binary");
        }
        b64.trim_start().to_string()
    } else {
        rest.trim_start().to_string()
    };

    Ok((attr, value))
}

impl<R: BufRead> Iterator for LdifParser<R> {
    type Item = Result<LdifEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_entry().transpose()
    }
}

/// Parse a full LDIF byte buffer into entries
pub fn parse_bytes(bytes: &[u8]) -> Result<Vec<LdifEntry>> {
    LdifParser::new(std::io::Cursor::new(bytes)).collect()
}

// --- export helpers ---

/// Fold a rendered LDIF line at 76 characters with space-prefixed
/// continuations, per RFC 2849
pub fn fold_line(line: &str) -> String {
    const WIDTH: usize = 76;
    if line.len() <= WIDTH {
        return line.to_string();
    }
    let floor_boundary = |mut idx: usize| {
        while idx > 0 && !line.is_char_boundary(idx) {
            idx -= 1;
        }
        idx
    };
    let mut out = String::with_capacity(line.len() + line.len() / WIDTH * 2);
    let mut pos = floor_boundary(WIDTH);
    out.push_str(&line[..pos]);
    while pos < line.len() {
        let end = floor_boundary((pos + WIDTH - 1).min(line.len()));
        out.push('\n');
        out.push(' ');
        out.push_str(&line[pos..end]);
        pos = end;
    }
    out
}

/// Render an attribute line, choosing `::` base64 form for binary values
pub fn render_attribute(attr: &str, value: &[u8]) -> String {
    match std::str::from_utf8(value) {
        Ok(text)
            if !attr.ends_with(";binary")
                && text.chars().all(|c| !c.is_control())
                && text.is_ascii()
                && !text.starts_with([' ', ':', '<']) =>
        {
            fold_line(&format!("{attr}: {text}"))
        }
        _ => fold_line(&format!("{attr}:: {}", BASE64.encode(value))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
version: 1
# a comment
dn: c=KR,dc=data,dc=pkd
objectClass: country
c: KR

dn: o=dsc,c=KR,dc=data,dc=pkd
objectClass: organization
o: dsc
";

    #[test]
    fn parses_multiple_entries() {
        let entries = parse_bytes(SAMPLE.as_bytes()).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].dn, "c=KR,dc=data,dc=pkd");
        assert_eq!(entries[0].first("c"), Some("KR"));
        assert_eq!(entries[1].first("o"), Some("dsc"));
    }

    #[test]
    fn continuation_lines_fold_into_value() {
        let ldif = "dn: cn=long,c=KR\ndescription: part one\n  and part two\n";
        let entries = parse_bytes(ldif.as_bytes()).unwrap();
        assert_eq!(entries[0].first("description"), Some("part one and part two"));
    }

    #[test]
    fn dn_continuation() {
        let ldif = "dn: cn=abc,\n c=KR\ncn: abc\n";
        let entries = parse_bytes(ldif.as_bytes()).unwrap();
        assert_eq!(entries[0].dn, "cn=abc,c=KR");
    }

    #[test]
    fn double_colon_marks_binary_and_decodes() {
        let payload = b"\x30\x03\x02\x01\x01";
        let ldif = format!("dn: cn=x\nuserCertificate:: {}\n", BASE64.encode(payload));
        let entries = parse_bytes(ldif.as_bytes()).unwrap();
        assert!(entries[0].has("userCertificate"));
        assert!(entries[0].attributes.contains_key("userCertificate;binary"));
        let decoded = entries[0].first_binary("userCertificate").unwrap().unwrap();
        assert_eq!(decoded, payload);
    }

    #[test]
    fn binary_suffix_not_doubled() {
        let ldif = format!("dn: cn=x\ncACertificate;binary:: {}\n", BASE64.encode(b"abc"));
        let entries = parse_bytes(ldif.as_bytes()).unwrap();
        assert!(entries[0].attributes.contains_key("cACertificate;binary"));
        assert!(!entries[0].attributes.contains_key("cACertificate;binary;binary"));
    }

    #[test]
    fn base64_dn() {
        let dn = "cn=ümlaut,c=DE";
        let ldif = format!("dn:: {}\ncn: x\n", BASE64.encode(dn.as_bytes()));
        let entries = parse_bytes(ldif.as_bytes()).unwrap();
        assert_eq!(entries[0].dn, dn);
    }

    #[test]
    fn crlf_and_trailing_blank_lines() {
        let ldif = "dn: cn=x\r\ncn: x\r\n\r\n\r\n";
        let entries = parse_bytes(ldif.as_bytes()).unwrap();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn streaming_iteration_is_lazy() {
        let ldif = "dn: cn=a\ncn: a\n\ndn: cn=b\ncn: b\n";
        let mut parser = LdifParser::new(std::io::Cursor::new(ldif.as_bytes()));
        let first = parser.next_entry().unwrap().unwrap();
        assert_eq!(first.dn, "cn=a");
        let second = parser.next_entry().unwrap().unwrap();
        assert_eq!(second.dn, "cn=b");
        assert!(parser.next_entry().unwrap().is_none());
    }

    #[test]
    fn fold_line_round_trips_through_parser() {
        let long_value = "x".repeat(200);
        let rendered = format!("dn: cn=t\ndescription: {long_value}\n");
        let folded: String = rendered
            .lines()
            .map(fold_line)
            .collect::<Vec<_>>()
            .join("\n");
        let entries = parse_bytes(format!("{folded}\n").as_bytes()).unwrap();
        assert_eq!(entries[0].first("description"), Some(long_value.as_str()));
    }

    #[test]
    fn render_attribute_emits_base64_for_binary() {
        let line = render_attribute("userCertificate;binary", &[0x00, 0x01, 0xFF]);
        assert!(line.starts_with("userCertificate;binary:: "));
        let line = render_attribute("o", b"dsc");
        assert_eq!(line, "o: dsc");
    }
}
