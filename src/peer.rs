pub mod compact;

use std::fmt;

use rand::Rng;

/// Client prefix in Azureus style, followed by random bytes.
const PEER_ID_PREFIX: &[u8; 8] = b"-TA0001-";

/// Identifier this client presents to trackers and peers for one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PeerId([u8; 20]);

impl PeerId {
    pub fn generate() -> Self {
        let mut id = [0; 20];
        id[..PEER_ID_PREFIX.len()].copy_from_slice(PEER_ID_PREFIX);
        rand::rng().fill(&mut id[PEER_ID_PREFIX.len()..]);
        PeerId(id)
    }

    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }
}

impl From<[u8; 20]> for PeerId {
    fn from(bytes: [u8; 20]) -> Self {
        PeerId(bytes)
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}
