use std::net::SocketAddrV4;
use std::path::Path;

use thiserror::Error;
use tracing::info;

use crate::config::AnnounceConfig;
use crate::metadata::file::{TorrentFile, TorrentFileError};
use crate::metadata::tracker::{announce, TrackerError};
use crate::peer::PeerId;

/// Everything the peer engine needs to start downloading: the verified
/// descriptor, the identity we announced with, and the peers we were offered.
#[derive(Debug, Clone)]
pub struct Session {
    pub torrent: TorrentFile,
    pub peer_id: PeerId,
    pub peers: Vec<SocketAddrV4>,
    pub interval: u64,
}

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Torrent(#[from] TorrentFileError),
    #[error(transparent)]
    Tracker(#[from] TrackerError),
}

impl Session {
    /// Announces an already parsed torrent under the given peer id.
    pub async fn announce(torrent: TorrentFile, peer_id: PeerId, config: &AnnounceConfig) -> Result<Self, Error> {
        let response = announce(&torrent, &peer_id, config).await?;
        info!(
            name = torrent.name(),
            %peer_id,
            num_peers = response.peers.len(),
            interval = response.interval,
            "session ready"
        );
        Ok(Session { torrent, peer_id, peers: response.peers, interval: response.interval })
    }
}

/// Opens the torrent at `path`, picks a fresh peer id and asks the tracker for peers.
pub async fn start_session<P: AsRef<Path>>(path: P, config: &AnnounceConfig) -> Result<Session, Error> {
    let torrent = TorrentFile::open(path)?;
    Session::announce(torrent, PeerId::generate(), config).await
}
