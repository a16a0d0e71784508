use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use sha1::{Digest, Sha1};
use thiserror::Error;
use tracing::{debug, warn};

use crate::metadata::bencode::{BencodeDocument, BencodeError, BencodeValue};

/// Size of a SHA-1 digest, both for the info hash and for each piece hash.
pub const HASH_LEN: usize = 20;

/// A parsed single-file metainfo document.
///
/// Built once per download and never mutated afterwards; the fields are only
/// reachable through accessors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TorrentFile {
    announce: String,
    announce_list: Vec<Vec<String>>,
    creation_date: Option<u64>,
    comment: Option<String>,
    created_by: Option<String>,
    encoding: Option<String>,

    info_hash: [u8; HASH_LEN],
    piece_hashes: Vec<[u8; HASH_LEN]>,
    piece_length: u64,
    length: u64,
    name: String,
    private: bool,
}

#[derive(Debug, Error)]
pub enum TorrentFileError {
    #[error("unable to read torrent file: {0}")]
    Io(#[from] std::io::Error),
    #[error("torrent file is not valid bencode: {0}")]
    Decode(#[from] BencodeError),
    #[error("torrent file is not a bencoded dictionary")]
    FileIsNotDictionary,
    #[error("missing required key '{0}'")]
    MissingRequiredKey(&'static str),
    #[error("key '{0}' does not map to a UTF-8 string")]
    KeyDoesNotMapToString(&'static str),
    #[error("key '{0}' does not map to an integer")]
    KeyDoesNotMapToInteger(&'static str),
    #[error("key '{0}' does not map to a dictionary")]
    KeyDoesNotMapToDictionary(&'static str),
    #[error("key '{0}' does not map to a list")]
    KeyDoesNotMapToList(&'static str),
    #[error("key '{0}' maps to an empty list")]
    KeyMapsToAnEmptyList(&'static str),
    #[error("key '{0}' maps to a negative integer ({1})")]
    NegativeInteger(&'static str, i64),
    #[error("key '{0}' must be greater than zero")]
    ZeroInteger(&'static str),
    #[error("private flag must be 0 or 1, not {0}")]
    InvalidPrivateValue(u64),
    #[error("announce-list entries must be strings or lists of strings")]
    InvalidAnnounceListElement,
    #[error("multi-file torrents are not supported")]
    MultipleFilesUnsupported,
    #[error("pieces byte length ({0}) is not a multiple of 20")]
    MalformedPieces(usize),
}

type Result<T> = std::result::Result<T, TorrentFileError>;

const ANNOUNCE: &[u8] = b"announce";
const ANNOUNCE_LIST: &[u8] = b"announce-list";
const CREATION_DATE: &[u8] = b"creation date";
const COMMENT: &[u8] = b"comment";
const CREATED_BY: &[u8] = b"created by";
const ENCODING: &[u8] = b"encoding";
const INFO: &[u8] = b"info";
const PIECE_LENGTH: &[u8] = b"piece length";
const PIECES: &[u8] = b"pieces";
const PRIVATE: &[u8] = b"private";
const NAME: &[u8] = b"name";
const LENGTH: &[u8] = b"length";
const FILES: &[u8] = b"files";

type Items = BTreeMap<Vec<u8>, BencodeValue>;

impl fmt::Display for TorrentFile {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(f, "name: {}", self.name)?;
        writeln!(f, "announce: {}", self.announce)?;
        if !self.announce_list.is_empty() {
            writeln!(f, "announce list: [{}]", self.announce_list
                .iter()
                .map(|v| format!("[{}]", v.join(", ")))
                .collect::<Vec<_>>()
                .join(", "))?;
        }
        if let Some(date) = &self.creation_date {
            writeln!(f, "created: {} seconds since epoch", date)?;
        }
        if let Some(text) = &self.comment {
            writeln!(f, "comment: {}", text)?;
        }
        if let Some(author) = &self.created_by {
            writeln!(f, "created by: {}", author)?;
        }
        if let Some(e) = &self.encoding {
            writeln!(f, "encoding: {}", e)?;
        }
        writeln!(f, "private: {}", self.private)?;
        writeln!(f, "info hash: {}", hex::encode(self.info_hash))?;
        write!(f, "size: {} bytes ({} pieces of {} bytes each)", self.length, self.piece_hashes.len(), self.piece_length)
    }
}

impl TryFrom<&[u8]> for TorrentFile {
    type Error = TorrentFileError;

    fn try_from(bytes: &[u8]) -> Result<Self> {
        Self::from_bytes(bytes)
    }
}

impl TorrentFile {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let bytes = std::fs::read(path)?;
        debug!(path = %path.display(), num_bytes = bytes.len(), "read torrent file");
        Self::from_bytes(&bytes)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let document = BencodeDocument::parse(bytes)?;
        let items = document.value().as_dictionary().ok_or(TorrentFileError::FileIsNotDictionary)?;
        let info_items = match items.get(INFO) {
            Some(BencodeValue::Dictionary(info_items)) => info_items,
            Some(_) => return Err(TorrentFileError::KeyDoesNotMapToDictionary("info")),
            None => return Err(TorrentFileError::MissingRequiredKey("info")),
        };
        let raw_info = document.raw(INFO).ok_or(TorrentFileError::MissingRequiredKey("info"))?;
        let info_hash: [u8; HASH_LEN] = Sha1::digest(raw_info).into();

        if info_items.contains_key(FILES) {
            return Err(TorrentFileError::MultipleFilesUnsupported);
        }

        let piece_length = required_positive(info_items.get(PIECE_LENGTH), "piece length")?;
        let length = required_positive(info_items.get(LENGTH), "length")?;
        let piece_hashes = match info_items.get(PIECES) {
            Some(BencodeValue::ByteString(blob)) => split_hashes(blob)?,
            Some(_) => return Err(TorrentFileError::KeyDoesNotMapToString("pieces")),
            None => return Err(TorrentFileError::MissingRequiredKey("pieces")),
        };

        let expected = length.div_ceil(piece_length);
        if expected != piece_hashes.len() as u64 {
            warn!(expected, actual = piece_hashes.len(), "piece hash count does not match content length");
        }

        let file = TorrentFile {
            announce: required_string(items.get(ANNOUNCE), "announce")?,
            announce_list: extract_announce_list(items.get(ANNOUNCE_LIST))?,
            creation_date: optional_uint(items.get(CREATION_DATE), "creation date")?,
            comment: optional_string(items.get(COMMENT), "comment")?,
            created_by: optional_string(items.get(CREATED_BY), "created by")?,
            encoding: optional_string(items.get(ENCODING), "encoding")?,
            info_hash,
            piece_hashes,
            piece_length,
            length,
            name: required_lossy_string(info_items.get(NAME), "name")?,
            private: extract_private(info_items)?,
        };
        debug!(name = %file.name, info_hash = %hex::encode(file.info_hash), "parsed torrent file");
        Ok(file)
    }

    pub fn announce(&self) -> &str {
        &self.announce
    }

    pub fn announce_list(&self) -> &[Vec<String>] {
        &self.announce_list
    }

    pub fn creation_date(&self) -> Option<u64> {
        self.creation_date
    }

    pub fn comment(&self) -> Option<&str> {
        self.comment.as_deref()
    }

    pub fn created_by(&self) -> Option<&str> {
        self.created_by.as_deref()
    }

    pub fn encoding(&self) -> Option<&str> {
        self.encoding.as_deref()
    }

    /// SHA-1 of the info dictionary; identifies the content to peers and trackers.
    pub fn info_hash(&self) -> &[u8; HASH_LEN] {
        &self.info_hash
    }

    pub fn piece_hashes(&self) -> &[[u8; HASH_LEN]] {
        &self.piece_hashes
    }

    pub fn piece_length(&self) -> u64 {
        self.piece_length
    }

    pub fn length(&self) -> u64 {
        self.length
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn private(&self) -> bool {
        self.private
    }
}

/// Cuts a concatenation of SHA-1 digests into individual hashes, in order.
pub fn split_hashes(blob: &[u8]) -> Result<Vec<[u8; HASH_LEN]>> {
    if blob.len() % HASH_LEN != 0 {
        return Err(TorrentFileError::MalformedPieces(blob.len()));
    }
    Ok(blob
        .chunks_exact(HASH_LEN)
        .map(|chunk| {
            let mut hash = [0; HASH_LEN];
            hash.copy_from_slice(chunk);
            hash
        })
        .collect())
}

fn convert_string(value: &BencodeValue) -> Option<String> {
    match value {
        BencodeValue::ByteString(text) => std::str::from_utf8(text).map(str::to_owned).ok(),
        _ => None,
    }
}

fn optional_string(value: Option<&BencodeValue>, name: &'static str) -> Result<Option<String>> {
    value
        .map(|v| convert_string(v).ok_or(TorrentFileError::KeyDoesNotMapToString(name)))
        .transpose()
}

fn required_string(value: Option<&BencodeValue>, name: &'static str) -> Result<String> {
    optional_string(value, name)?.ok_or(TorrentFileError::MissingRequiredKey(name))
}

/// Legacy documents may spell the name in their declared `encoding`.
fn required_lossy_string(value: Option<&BencodeValue>, name: &'static str) -> Result<String> {
    match value {
        Some(BencodeValue::ByteString(text)) => Ok(String::from_utf8_lossy(text).into_owned()),
        Some(_) => Err(TorrentFileError::KeyDoesNotMapToString(name)),
        None => Err(TorrentFileError::MissingRequiredKey(name)),
    }
}

pub(crate) fn optional_uint(value: Option<&BencodeValue>, name: &'static str) -> Result<Option<u64>> {
    match value {
        Some(BencodeValue::Integer(num)) if *num < 0 => Err(TorrentFileError::NegativeInteger(name, *num)),
        Some(BencodeValue::Integer(num)) => Ok(Some(num.unsigned_abs())),
        Some(_) => Err(TorrentFileError::KeyDoesNotMapToInteger(name)),
        None => Ok(None),
    }
}

pub(crate) fn required_uint(value: Option<&BencodeValue>, name: &'static str) -> Result<u64> {
    optional_uint(value, name)?.ok_or(TorrentFileError::MissingRequiredKey(name))
}

fn required_positive(value: Option<&BencodeValue>, name: &'static str) -> Result<u64> {
    match required_uint(value, name)? {
        0 => Err(TorrentFileError::ZeroInteger(name)),
        n => Ok(n),
    }
}

fn extract_private(info_items: &Items) -> Result<bool> {
    match optional_uint(info_items.get(PRIVATE), "private")? {
        None | Some(0) => Ok(false),
        Some(1) => Ok(true),
        Some(v) => Err(TorrentFileError::InvalidPrivateValue(v)),
    }
}

fn extract_list_of_string(value: &BencodeValue, name: &'static str) -> Result<Vec<String>> {
    match value {
        BencodeValue::List(elements) => elements
            .iter()
            .map(|element| convert_string(element).ok_or(TorrentFileError::KeyDoesNotMapToString(name)))
            .collect(),
        _ => Err(TorrentFileError::KeyDoesNotMapToList(name)),
    }
}

fn extract_announce_list(value: Option<&BencodeValue>) -> Result<Vec<Vec<String>>> {
    let elements = match value {
        None => return Ok(Vec::new()),
        Some(BencodeValue::List(elements)) => elements,
        Some(_) => return Err(TorrentFileError::KeyDoesNotMapToList("announce-list")),
    };
    if elements.is_empty() {
        return Err(TorrentFileError::KeyMapsToAnEmptyList("announce-list"));
    }
    elements
        .iter()
        .map(|element| match element {
            BencodeValue::List(_) => extract_list_of_string(element, "announce-list"),
            BencodeValue::ByteString(_) => convert_string(element)
                .map(|url| vec![url])
                .ok_or(TorrentFileError::KeyDoesNotMapToString("announce-list")),
            _ => Err(TorrentFileError::InvalidAnnounceListElement),
        })
        .collect()
}
