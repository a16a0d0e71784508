use core::fmt;
use std::net::SocketAddrV4;

use percent_encoding::{percent_encode, NON_ALPHANUMERIC};
use reqwest::StatusCode;
use thiserror::Error;
use tracing::{debug, warn};
use url::Url;

use crate::config::AnnounceConfig;
use crate::metadata::bencode::{BencodeError, BencodeValue};
use crate::metadata::file::{required_uint, optional_uint, TorrentFile, TorrentFileError};
use crate::peer::PeerId;
use crate::peer::compact::{self, MalformedPeers};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackerResponse {
    /// Seconds the tracker asks us to wait before announcing again.
    pub interval: u64,
    pub peers: Vec<SocketAddrV4>,
    pub complete: Option<u64>,
    pub incomplete: Option<u64>,
}

#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("announce url '{0}' is not a valid url")]
    InvalidAnnounceUrl(String),
    #[error("tracker scheme '{0}' is not supported, only http and https")]
    UnsupportedScheme(String),
    #[error("no response received from tracker: {0}")]
    Network(#[from] reqwest::Error),
    #[error("tracker responded with status {0}")]
    HttpStatus(StatusCode),
    #[error("tracker response is invalid bencode data: {0}")]
    Decode(#[from] BencodeError),
    #[error("tracker response is not a bencoded dictionary")]
    NotADictionary,
    #[error("tracker refused the announce: {0}")]
    Failure(String),
    #[error("tracker response missing interval key")]
    MissingInterval,
    #[error("tracker response interval malformed: {0}")]
    MalformedInterval(TorrentFileError),
    #[error("tracker response missing peers key")]
    MissingPeers,
    #[error("tracker response peers list is not a byte string")]
    MalformedPeersList,
    #[error(transparent)]
    MalformedPeers(#[from] MalformedPeers),
}

impl TrackerError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, TrackerError::Network(e) if e.is_timeout())
    }
}

const FAILURE_REASON: &[u8] = b"failure reason";
const INTERVAL: &[u8] = b"interval";
const PEERS: &[u8] = b"peers";
const COMPLETE: &[u8] = b"complete";
const INCOMPLETE: &[u8] = b"incomplete";

impl TryFrom<&BencodeValue> for TrackerResponse {
    type Error = TrackerError;

    fn try_from(value: &BencodeValue) -> Result<Self, TrackerError> {
        let items = value.as_dictionary().ok_or(TrackerError::NotADictionary)?;
        if let Some(reason) = items.get(FAILURE_REASON) {
            return Err(TrackerError::Failure(reason.to_string()));
        }
        let interval = required_uint(items.get(INTERVAL), "interval")
            .map_err(|e| match e {
                TorrentFileError::MissingRequiredKey(_) => TrackerError::MissingInterval,
                _ => TrackerError::MalformedInterval(e),
            })?;
        let peers = match items.get(PEERS) {
            Some(BencodeValue::ByteString(bytes)) => compact::decode(bytes)?,
            Some(_) => return Err(TrackerError::MalformedPeersList),
            None => return Err(TrackerError::MissingPeers),
        };
        let complete = swarm_counter(items.get(COMPLETE), "complete");
        let incomplete = swarm_counter(items.get(INCOMPLETE), "incomplete");
        Ok(TrackerResponse { interval, peers, complete, incomplete })
    }
}

fn swarm_counter(value: Option<&BencodeValue>, name: &'static str) -> Option<u64> {
    optional_uint(value, name)
        .inspect_err(|e| debug!(error = %e, "ignoring swarm counter"))
        .ok()
        .flatten()
}

impl TryFrom<&[u8]> for TrackerResponse {
    type Error = TrackerError;

    fn try_from(bytes: &[u8]) -> Result<Self, TrackerError> {
        let value = BencodeValue::try_from(bytes)?;
        TrackerResponse::try_from(&value)
    }
}

impl fmt::Display for TrackerResponse {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(f, "Interval (s): {}", self.interval)?;
        if let (Some(complete), Some(incomplete)) = (self.complete, self.incomplete) {
            writeln!(f, "Seeders: {complete}, leechers: {incomplete}")?;
        }
        for (i, socket) in self.peers.iter().enumerate() {
            writeln!(f, "{i:03}: {socket}")?;
        }
        Ok(())
    }
}

/// Builds the announce request for the start of a download.
///
/// The info hash and peer id are raw bytes, so they are percent-encoded by
/// hand and appended after the text parameters; `Url`'s own query encoding
/// would treat them as UTF-8.
pub fn build_announce_url(file: &TorrentFile, peer_id: &PeerId, port: u16) -> Result<Url, TrackerError> {
    let mut url = Url::parse(file.announce())
        .map_err(|_| TrackerError::InvalidAnnounceUrl(file.announce().to_string()))?;

    url.query_pairs_mut()
        .append_pair("port", &port.to_string())
        .append_pair("uploaded", "0")
        .append_pair("downloaded", "0")
        .append_pair("left", &file.length().to_string())
        .append_pair("compact", "1");

    let query = format!(
        "{}&info_hash={}&peer_id={}",
        url.query().unwrap_or_default(),
        percent_encode(file.info_hash(), NON_ALPHANUMERIC),
        percent_encode(peer_id.as_bytes(), NON_ALPHANUMERIC),
    );
    url.set_query(Some(&query));
    Ok(url)
}

/// Sends one announce and decodes the reply. Failures are returned as-is;
/// retrying is up to the caller.
pub async fn announce(file: &TorrentFile, peer_id: &PeerId, config: &AnnounceConfig) -> Result<TrackerResponse, TrackerError> {
    let url = build_announce_url(file, peer_id, config.port)?;
    match url.scheme() {
        "http" | "https" => (),
        other => return Err(TrackerError::UnsupportedScheme(other.to_string())),
    }

    debug!(%url, timeout = ?config.timeout, "announcing to tracker");
    let client = reqwest::Client::builder()
        .timeout(config.timeout)
        .build()?;
    let response = client.get(url).send().await?;

    let status = response.status();
    if !status.is_success() {
        warn!(%status, announce = file.announce(), "tracker returned an error status");
        return Err(TrackerError::HttpStatus(status));
    }
    let body = response.bytes().await?;

    let tracker_response = TrackerResponse::try_from(&body[..]).inspect_err(|e| {
        if let TrackerError::Failure(reason) = e {
            warn!(%reason, announce = file.announce(), "tracker refused announce");
        }
    })?;
    debug!(interval = tracker_response.interval, num_peers = tracker_response.peers.len(), "tracker responded");
    Ok(tracker_response)
}

pub async fn request_peers(file: &TorrentFile, peer_id: &PeerId, config: &AnnounceConfig) -> Result<Vec<SocketAddrV4>, TrackerError> {
    announce(file, peer_id, config).await.map(|response| response.peers)
}
