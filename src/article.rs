//! Article inspection and wire encoding
//!
//! Articles are raw bytes in wire form: header lines, a blank line, the body,
//! each line ending in `\n`. This module finds header values, checks the
//! headers a relay requires, and converts between that form and the
//! dot-stuffed, CRLF-terminated form used inside the offer protocol.

use std::io::{self, Write};

/// Headers an article must carry to be offered, in the order they are checked
pub const REQUIRED_HEADERS: [&str; 6] =
    ["Message-ID", "Newsgroups", "From", "Date", "Subject", "Path"];

/// Bytes of the Path header kept for duplicate notices
const PATH_EXCERPT_LEN: usize = 39;

/// Find the value of header `name` in the header block of `article`
///
/// The match is case-insensitive and anchored at the start of a line; the
/// search stops at the blank line that ends the headers. The returned slice
/// starts after the colon and any following blanks and runs to the end of the
/// article, so callers decide where the value ends.
pub fn find_header<'a>(article: &'a [u8], name: &str) -> Option<&'a [u8]> {
    let name = name.as_bytes();
    let mut pos = 0;
    while pos < article.len() {
        let line_end = article[pos..]
            .iter()
            .position(|&b| b == b'\n')
            .map(|i| pos + i)
            .unwrap_or(article.len());
        let line = &article[pos..line_end];
        if line.is_empty() || line == b"\r" {
            return None;
        }
        if line.len() > name.len()
            && line[name.len()] == b':'
            && line[..name.len()].eq_ignore_ascii_case(name)
        {
            let mut start = pos + name.len() + 1;
            while start < article.len() && matches!(article[start], b' ' | b'\t') {
                start += 1;
            }
            return Some(&article[start..]);
        }
        pos = line_end + 1;
    }
    None
}

/// The headers an offer needs, extracted from a validated article
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OfferHeaders {
    /// Message-ID value, without line terminator
    pub message_id: String,
    /// Start of the Path header value, for duplicate notices
    pub path: String,
}

/// Why an article cannot be offered
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HeaderProblem {
    /// A required header is absent
    Missing(&'static str),
    /// The Message-ID value has no terminating newline
    UnterminatedMessageId,
}

/// Check the required headers and pull out Message-ID and Path
pub fn offer_headers(article: &[u8]) -> Result<OfferHeaders, HeaderProblem> {
    let mut message_id = None;
    let mut path = None;
    for name in REQUIRED_HEADERS {
        let value = find_header(article, name).ok_or(HeaderProblem::Missing(name))?;
        match name {
            "Message-ID" => message_id = Some(value),
            "Path" => path = Some(value),
            _ => {}
        }
    }

    let id_value = message_id.ok_or(HeaderProblem::Missing("Message-ID"))?;
    let end = id_value
        .iter()
        .position(|&b| b == b'\n')
        .ok_or(HeaderProblem::UnterminatedMessageId)?;
    let message_id = String::from_utf8_lossy(&id_value[..end]).trim_end().to_string();

    let path = path
        .map(|value| {
            let end = value
                .iter()
                .take(PATH_EXCERPT_LEN)
                .position(|&b| b == b'\n')
                .unwrap_or(value.len().min(PATH_EXCERPT_LEN));
            String::from_utf8_lossy(&value[..end]).trim_end().to_string()
        })
        .unwrap_or_default();

    Ok(OfferHeaders { message_id, path })
}

/// Write `article` as a dot-stuffed body followed by the end-of-body marker
///
/// Every `\n`-terminated line goes out with `\r\n`; a line starting with `.`
/// gets a second `.` in front.
pub fn write_dot_stuffed<W: Write>(writer: &mut W, article: &[u8]) -> io::Result<()> {
    let mut lines = article.split(|&b| b == b'\n').peekable();
    while let Some(line) = lines.next() {
        // The final empty piece after the last newline is not a line.
        if lines.peek().is_none() && line.is_empty() {
            break;
        }
        let line = line.strip_suffix(b"\r").unwrap_or(line);
        if line.first() == Some(&b'.') {
            writer.write_all(b".")?;
        }
        writer.write_all(line)?;
        writer.write_all(b"\r\n")?;
    }
    writer.write_all(b".\r\n")
}

/// Encode an article into its dot-stuffed wire form
pub fn dot_stuff(article: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(article.len() + article.len() / 32 + 3);
    // Writing into a Vec cannot fail.
    let _ = write_dot_stuffed(&mut out, article);
    out
}

/// Decode a dot-stuffed body back into `\n`-terminated article bytes
///
/// Stops at the end-of-body marker; bytes after it are ignored.
pub fn dot_unstuff(wire: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(wire.len());
    for line in wire.split(|&b| b == b'\n') {
        let line = line.strip_suffix(b"\r").unwrap_or(line);
        if line == b"." {
            break;
        }
        let line = line.strip_prefix(b".").unwrap_or(line);
        out.extend_from_slice(line);
        out.push(b'\n');
    }
    out
}
