//! The compact peer list format: 4 bytes of IPv4 address followed by a
//! big-endian port, repeated once per peer.

use std::net::{Ipv4Addr, SocketAddrV4};

use thiserror::Error;

pub const PEER_LEN: usize = 6;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("compact peers byte length ({0}) is not a multiple of 6")]
pub struct MalformedPeers(pub usize);

pub fn decode(bytes: &[u8]) -> Result<Vec<SocketAddrV4>, MalformedPeers> {
    if bytes.len() % PEER_LEN != 0 {
        return Err(MalformedPeers(bytes.len()));
    }
    Ok(bytes
        .chunks_exact(PEER_LEN)
        .map(|record| {
            let ip = Ipv4Addr::new(record[0], record[1], record[2], record[3]);
            let port = u16::from_be_bytes([record[4], record[5]]);
            SocketAddrV4::new(ip, port)
        })
        .collect())
}

pub fn encode(peers: &[SocketAddrV4]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(peers.len() * PEER_LEN);
    for peer in peers {
        bytes.extend_from_slice(&peer.ip().octets());
        bytes.extend_from_slice(&peer.port().to_be_bytes());
    }
    bytes
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn decodes_a_single_peer() {
        let peers = decode(&[0x7f, 0x00, 0x00, 0x01, 0x1a, 0xe1]).unwrap();
        assert_eq!(peers, vec![SocketAddrV4::new(Ipv4Addr::LOCALHOST, 6881)]);
    }

    #[test]
    fn keeps_blob_order_and_duplicates() {
        let blob = [
            192, 168, 1, 100, 195, 80,
            10, 0, 0, 2, 0, 80,
            192, 168, 1, 100, 195, 80,
        ];
        let peers = decode(&blob).unwrap();
        assert_eq!(peers.len(), 3);
        assert_eq!(peers[0].to_string(), "192.168.1.100:50000");
        assert_eq!(peers[1].to_string(), "10.0.0.2:80");
        assert_eq!(peers[0], peers[2]);
    }

    #[test]
    fn empty_blob_has_no_peers() {
        assert_eq!(decode(&[]), Ok(Vec::new()));
    }

    #[test]
    fn rejects_partial_records() {
        assert_eq!(decode(&[0; 7]), Err(MalformedPeers(7)));
        assert_eq!(decode(&[127, 0, 0, 1, 26]), Err(MalformedPeers(5)));
    }

    proptest! {
        #[test]
        fn whole_records_round_trip(blob in (0usize..20).prop_flat_map(|n| prop::collection::vec(any::<u8>(), n * PEER_LEN))) {
            let peers = decode(&blob).unwrap();
            prop_assert_eq!(peers.len(), blob.len() / PEER_LEN);
            for (peer, record) in peers.iter().zip(blob.chunks_exact(PEER_LEN)) {
                prop_assert_eq!(encode(&[*peer]), record.to_vec());
            }
        }

        #[test]
        fn partial_records_are_rejected(blob in prop::collection::vec(any::<u8>(), 0..120)
            .prop_filter("not a whole number of records", |v| v.len() % PEER_LEN != 0)) {
            prop_assert_eq!(decode(&blob), Err(MalformedPeers(blob.len())));
        }
    }
}
