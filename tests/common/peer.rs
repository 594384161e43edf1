//! Scripted peer: canned replies in, captured wire traffic out

use std::io::Cursor;
use usenet_rnews::PeerSession;

/// A session whose peer answers from a fixed script
pub type ScriptedSession = PeerSession<Cursor<Vec<u8>>, Vec<u8>>;

/// Build a session that answers with `replies`, one per line
pub fn scripted_peer(replies: &[&str]) -> ScriptedSession {
    let script: String = replies.iter().map(|r| format!("{r}\r\n")).collect();
    PeerSession::new(Cursor::new(script.into_bytes()), Vec::new())
}

/// Everything the engine wrote to the peer
pub fn sent_to_peer(session: ScriptedSession) -> String {
    String::from_utf8(session.into_parts().1).unwrap()
}

/// The `ihave` lines among the wire traffic
pub fn offers(wire: &str) -> Vec<&str> {
    wire.split("\r\n").filter(|line| line.starts_with("ihave ")).collect()
}
