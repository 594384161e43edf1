//! TCP connection setup
//!
//! Dials the peer, checks the greeting and runs AUTHINFO when credentials
//! are configured.

use super::{
    AUTH_ACCEPTED, AUTH_CONTINUE, NO_POSTING, POSTING_OK, PeerSession, parse_reply, read_line,
};
use crate::config::PeerConfig;
use crate::error::PeerError;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::net::TcpStream;
use tracing::{debug, info};

/// Session type returned by [`connect`]
pub type TcpSession = PeerSession<BufReader<TcpStream>, BufWriter<TcpStream>>;

/// Connect to the configured peer and get it ready for offers
pub fn connect(config: &PeerConfig) -> Result<TcpSession, PeerError> {
    let addr = format!("{}:{}", config.host, config.port);
    let stream = TcpStream::connect(&addr).map_err(|source| PeerError::Connect {
        addr: addr.clone(),
        source,
    })?;
    stream
        .set_read_timeout(config.read_timeout)
        .map_err(|source| PeerError::Connect {
            addr: addr.clone(),
            source,
        })?;
    let write_half = stream.try_clone().map_err(|source| PeerError::Connect {
        addr: addr.clone(),
        source,
    })?;

    let mut reader = BufReader::new(stream);
    let mut writer = BufWriter::new(write_half);
    handshake(&mut reader, &mut writer, config)?;
    info!(%addr, "connected to peer");
    Ok(PeerSession::new(reader, writer))
}

/// Read the greeting and authenticate if credentials are set
pub fn handshake<R: BufRead, W: Write>(
    reader: &mut R,
    writer: &mut W,
    config: &PeerConfig,
) -> Result<(), PeerError> {
    let greeting = read_line(reader).map_err(|source| PeerError::Read {
        stage: "connect",
        source,
    })?;
    match parse_reply(&greeting) {
        Some(reply) if reply.code == POSTING_OK || reply.code == NO_POSTING => {
            debug!(greeting = %reply.line, "peer greeting");
        }
        _ => return Err(PeerError::Refused { reply: greeting }),
    }

    let Some(username) = &config.username else {
        return Ok(());
    };
    command(
        reader,
        writer,
        &format!("AUTHINFO USER {username}"),
        "authinfo user",
        AUTH_CONTINUE,
    )?;
    let password = config.password.as_deref().unwrap_or_default();
    command(
        reader,
        writer,
        &format!("AUTHINFO PASS {password}"),
        "authinfo pass",
        AUTH_ACCEPTED,
    )?;
    debug!(%username, "authenticated");
    Ok(())
}

fn command<R: BufRead, W: Write>(
    reader: &mut R,
    writer: &mut W,
    line: &str,
    stage: &'static str,
    expected: u16,
) -> Result<(), PeerError> {
    writer
        .write_all(format!("{line}\r\n").as_bytes())
        .and_then(|()| writer.flush())
        .map_err(PeerError::Write)?;
    let reply = read_line(reader).map_err(|source| PeerError::Read { stage, source })?;
    match parse_reply(&reply) {
        Some(parsed) if parsed.code == expected => Ok(()),
        Some(_) => Err(PeerError::AuthFailed { reply }),
        None => Err(PeerError::BadReply { stage, line: reply }),
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_greeting_accepted_without_credentials() {
        let mut reader = Cursor::new(b"200 news.example ready\r\n".to_vec());
        let mut writer = Vec::new();
        handshake(&mut reader, &mut writer, &PeerConfig::default()).unwrap();
        assert!(writer.is_empty());
    }

    #[test]
    fn test_refusal_keeps_greeting_text() {
        let mut reader = Cursor::new(b"502 go away\r\n".to_vec());
        let mut writer = Vec::new();
        match handshake(&mut reader, &mut writer, &PeerConfig::default()) {
            Err(PeerError::Refused { reply }) => assert_eq!(reply, "502 go away"),
            other => panic!("expected refusal, got {other:?}"),
        }
    }

    #[test]
    fn test_authinfo_exchange() {
        let config = PeerConfig {
            username: Some("news".into()),
            password: Some("secret".into()),
            ..Default::default()
        };
        let mut reader = Cursor::new(b"201 ready\r\n381 more\r\n281 ok\r\n".to_vec());
        let mut writer = Vec::new();
        handshake(&mut reader, &mut writer, &config).unwrap();
        assert_eq!(
            String::from_utf8(writer).unwrap(),
            "AUTHINFO USER news\r\nAUTHINFO PASS secret\r\n"
        );

        let mut reader = Cursor::new(b"200 ready\r\n381 more\r\n481 denied\r\n".to_vec());
        let mut writer = Vec::new();
        assert!(matches!(
            handshake(&mut reader, &mut writer, &config),
            Err(PeerError::AuthFailed { .. })
        ));
    }

    #[test]
    fn test_connect_failure_names_address() {
        let config = PeerConfig {
            host: "127.0.0.1".into(),
            port: 1,
            ..Default::default()
        };
        match connect(&config) {
            Err(PeerError::Connect { addr, .. }) => assert_eq!(addr, "127.0.0.1:1"),
            Err(other) => panic!("unexpected error {other:?}"),
            Ok(_) => println!("Skipping assertion: something listens on port 1"),
        }
    }
}
