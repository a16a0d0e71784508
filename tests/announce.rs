use std::collections::BTreeMap;
use std::io::Write;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::time::Duration;

use percent_encoding::{percent_encode, NON_ALPHANUMERIC};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use torrent::metadata::bencode::BencodeValue;
use torrent::metadata::tracker::announce;
use torrent::peer::compact::MalformedPeers;
use torrent::{request_peers, start_session, AnnounceConfig, Error, PeerId, TorrentFile, TrackerError};

fn bytes(s: &str) -> BencodeValue {
    BencodeValue::ByteString(s.as_bytes().to_vec())
}

fn torrent_bytes(announce: &str) -> Vec<u8> {
    let mut info = BTreeMap::new();
    info.insert(b"length".to_vec(), BencodeValue::Integer(1000));
    info.insert(b"name".to_vec(), bytes("sample.bin"));
    info.insert(b"piece length".to_vec(), BencodeValue::Integer(512));
    info.insert(b"pieces".to_vec(), BencodeValue::ByteString(vec![0xaa; 40]));

    let mut items = BTreeMap::new();
    items.insert(b"announce".to_vec(), bytes(announce));
    items.insert(b"info".to_vec(), BencodeValue::Dictionary(info));
    Vec::from(&BencodeValue::Dictionary(items))
}

fn torrent(announce: &str) -> TorrentFile {
    TorrentFile::from_bytes(&torrent_bytes(announce)).unwrap()
}

fn http_response(status: &str, body: &[u8]) -> Vec<u8> {
    let mut response = format!(
        "HTTP/1.1 {status}\r\nContent-Type: text/plain\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        body.len()
    )
    .into_bytes();
    response.extend_from_slice(body);
    response
}

/// Answers exactly one request with `response` and hands back the request head it received.
async fn serve_once(response: Vec<u8>) -> (String, JoinHandle<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap();
    let handle = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let mut request = Vec::new();
        let mut buf = [0; 1024];
        while !request.windows(4).any(|w| w == b"\r\n\r\n") {
            let n = stream.read(&mut buf).await.unwrap();
            if n == 0 {
                break;
            }
            request.extend_from_slice(&buf[..n]);
        }
        stream.write_all(&response).await.unwrap();
        stream.shutdown().await.unwrap();
        String::from_utf8_lossy(&request).into_owned()
    });
    (format!("http://{address}/announce"), handle)
}

fn config(timeout: Duration) -> AnnounceConfig {
    AnnounceConfig::default().with_timeout(timeout)
}

#[tokio::test]
async fn returns_peers_from_compact_response() {
    let body = b"d8:intervali900e5:peers12:\x7f\x00\x00\x01\x1a\xe1\xc0\xa8\x01\x64\xc3\x50e";
    let (url, server) = serve_once(http_response("200 OK", body)).await;
    let file = torrent(&url);
    let peer_id = PeerId::from(*b"-TA0001-abcdefghijkl");

    let peers = request_peers(&file, &peer_id, &config(Duration::from_secs(5))).await.unwrap();
    assert_eq!(peers, vec![
        SocketAddrV4::new(Ipv4Addr::LOCALHOST, 6881),
        SocketAddrV4::new(Ipv4Addr::new(192, 168, 1, 100), 50000),
    ]);

    let request = server.await.unwrap();
    let request_line = request.lines().next().unwrap();
    assert!(request_line.starts_with("GET /announce?port=6881&uploaded=0&downloaded=0&left=1000&compact=1&info_hash="));
    assert!(request_line.contains("&peer_id=%2DTA0001%2Dabcdefghijkl "));
    let expected_hash = percent_encode(file.info_hash(), NON_ALPHANUMERIC).to_string();
    assert!(request_line.contains(&format!("info_hash={expected_hash}&")));
}

#[tokio::test]
async fn single_peer_scenario() {
    let body = b"d8:intervali1800e5:peers6:\x7f\x00\x00\x01\x1a\xe1e";
    let (url, server) = serve_once(http_response("200 OK", body)).await;

    let response = announce(&torrent(&url), &PeerId::generate(), &config(Duration::from_secs(5))).await.unwrap();
    assert_eq!(response.interval, 1800);
    assert_eq!(response.peers, vec![SocketAddrV4::new(Ipv4Addr::new(127, 0, 0, 1), 6881)]);
    server.await.unwrap();
}

#[tokio::test]
async fn partial_peer_record_fails_the_request() {
    let body = b"d8:intervali900e5:peers7:\x7f\x00\x00\x01\x1a\xe1\x00e";
    let (url, server) = serve_once(http_response("200 OK", body)).await;

    let result = request_peers(&torrent(&url), &PeerId::generate(), &config(Duration::from_secs(5))).await;
    assert!(matches!(result, Err(TrackerError::MalformedPeers(MalformedPeers(7)))));
    server.await.unwrap();
}

#[tokio::test]
async fn error_status_is_surfaced() {
    let (url, server) = serve_once(http_response("404 Not Found", b"not here")).await;

    let result = request_peers(&torrent(&url), &PeerId::generate(), &config(Duration::from_secs(5))).await;
    assert!(matches!(result, Err(TrackerError::HttpStatus(status)) if status.as_u16() == 404));
    server.await.unwrap();
}

#[tokio::test]
async fn failure_reason_is_surfaced() {
    let (url, server) = serve_once(http_response("200 OK", b"d14:failure reason12:unregisterede")).await;

    let result = request_peers(&torrent(&url), &PeerId::generate(), &config(Duration::from_secs(5))).await;
    assert!(matches!(result, Err(TrackerError::Failure(reason)) if reason == "unregistered"));
    server.await.unwrap();
}

#[tokio::test]
async fn slow_tracker_times_out() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap();
    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        tokio::time::sleep(Duration::from_secs(30)).await;
        drop(stream);
    });

    let file = torrent(&format!("http://{address}/announce"));
    let result = request_peers(&file, &PeerId::generate(), &config(Duration::from_millis(200))).await;
    match result {
        Err(e @ TrackerError::Network(_)) => assert!(e.is_timeout(), "expected a timeout, got {e}"),
        other => panic!("expected a network error, got {other:?}"),
    }
    server.abort();
}

#[tokio::test]
async fn unreachable_tracker_is_a_network_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap();
    drop(listener);

    let file = torrent(&format!("http://{address}/announce"));
    let result = request_peers(&file, &PeerId::generate(), &config(Duration::from_secs(5))).await;
    assert!(matches!(result, Err(TrackerError::Network(_))));
}

#[tokio::test]
async fn session_hands_off_descriptor_and_peers() {
    let body = b"d8:intervali600e5:peers6:\x0a\x00\x00\x07\x1a\xe2e";
    let (url, server) = serve_once(http_response("200 OK", body)).await;
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(&torrent_bytes(&url)).unwrap();

    let session = start_session(file.path(), &config(Duration::from_secs(5))).await.unwrap();
    assert_eq!(session.torrent.name(), "sample.bin");
    assert_eq!(session.torrent.piece_hashes().len(), 2);
    assert_eq!(session.peers, vec![SocketAddrV4::new(Ipv4Addr::new(10, 0, 0, 7), 6882)]);
    assert_eq!(session.interval, 600);
    assert_eq!(&session.peer_id.as_bytes()[..8], b"-TA0001-");
    server.await.unwrap();
}

#[tokio::test]
async fn session_reports_unreadable_files() {
    let dir = tempfile::tempdir().unwrap();
    let result = start_session(dir.path().join("absent.torrent"), &AnnounceConfig::default()).await;
    assert!(matches!(result, Err(Error::Torrent(torrent::TorrentFileError::Io(_)))));
}
