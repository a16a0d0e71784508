use std::path::Path;

pub mod config;
pub mod metadata;
pub mod peer;
pub mod session;

pub use config::AnnounceConfig;
pub use metadata::file::{split_hashes, TorrentFile, TorrentFileError};
pub use metadata::tracker::{build_announce_url, request_peers, TrackerError, TrackerResponse};
pub use peer::PeerId;
pub use session::{start_session, Error, Session};

pub fn parse_torrent<P: AsRef<Path>>(path: P) -> Result<TorrentFile, TorrentFileError> {
    TorrentFile::open(path)
}
