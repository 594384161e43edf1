//! Peer protocol
//!
//! Line-oriented status replies and the offer handshake. [`PeerSession`]
//! runs over any buffered reader and writer pair; [`connection`] opens one
//! over TCP.

pub mod connection;
pub mod offer;

pub use connection::connect;
pub use offer::PeerSession;

use std::io::{self, BufRead};

/// Greeting: posting allowed
pub const POSTING_OK: u16 = 200;
/// Greeting: posting not allowed
pub const NO_POSTING: u16 = 201;
/// Send the article
pub const SEND_IT: u16 = 335;
/// Already have the article
pub const HAVE_IT: u16 = 435;
/// Not now, try again later
pub const RESEND_IT: u16 = 436;
/// Article transferred
pub const TOOK_IT: u16 = 235;
/// Article posted (reply to an offer handled as a post)
pub const POSTED: u16 = 240;
/// Article rejected
pub const REJECT_IT: u16 = 437;
/// Posting failed
pub const POSTING_FAILED: u16 = 441;
/// Password required
pub const AUTH_CONTINUE: u16 = 381;
/// Authentication accepted
pub const AUTH_ACCEPTED: u16 = 281;

/// A status reply from the peer
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Reply {
    /// Numeric status code
    pub code: u16,
    /// The full reply line without its terminator
    pub line: String,
}

/// Parse a reply line
///
/// The line must start with a digit; the code is the run of leading digits.
/// Returns `None` for lines that do not start with a status code.
pub fn parse_reply(line: &str) -> Option<Reply> {
    let digits = line.bytes().take_while(u8::is_ascii_digit).count();
    if digits == 0 {
        return None;
    }
    let code = line[..digits].parse().unwrap_or(u16::MAX);
    Some(Reply {
        code,
        line: line.to_string(),
    })
}

/// Read one reply line, stripping `\r\n`
///
/// A closed connection is reported as [`io::ErrorKind::UnexpectedEof`].
pub fn read_line<R: BufRead>(reader: &mut R) -> io::Result<String> {
    let mut buf = Vec::new();
    if reader.read_until(b'\n', &mut buf)? == 0 {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "connection closed by peer",
        ));
    }
    while matches!(buf.last(), Some(b'\n' | b'\r')) {
        buf.pop();
    }
    Ok(String::from_utf8_lossy(&buf).into_owned())
}
