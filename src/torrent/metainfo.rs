//! Converts a decoded bencode dictionary into a typed torrent descriptor.
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::instrument;

use crate::bencode::{self, Value};

use super::{InfoHash, TorrentError, TorrentResult};

/// Single-file vs. multi-file torrent layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mode {
    Single { length: i64 },
    Multiple { files: Vec<FileEntry> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    pub length: i64,
    pub path: Vec<Vec<u8>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Info {
    pub hash: InfoHash,
    pub name: Vec<u8>,
    pub piece_length: i64,
    pub pieces: Vec<[u8; 20]>,
    pub mode: Mode,
    pub private: bool,
}

impl Info {
    pub fn total_size(&self) -> i64 {
        match &self.mode {
            Mode::Single { length } => *length,
            Mode::Multiple { files } => files.iter().map(|f| f.length).sum(),
        }
    }

    pub fn num_pieces(&self) -> usize {
        self.pieces.len()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Metainfo {
    pub info: Info,
    pub announce_urls: Vec<String>,
    pub creation_date: Option<SystemTime>,
    pub comment: String,
    pub created_by: String,
    pub encoding: String,
}

impl Metainfo {
    pub fn total_size(&self) -> i64 {
        self.info.total_size()
    }
}

/// Parses raw `.torrent` bytes into a [`Metainfo`].
#[instrument(skip(bytes), level = "debug")]
pub fn parse(bytes: &[u8]) -> TorrentResult<Metainfo> {
    let top = bencode::decode(bytes)?;
    parse_value(top)
}

fn parse_value(top: Value) -> TorrentResult<Metainfo> {
    let mut dict = match top {
        Value::Dict(d) => d,
        _ => return Err(TorrentError::NotADictionary),
    };

    let info_value = dict.remove(b"info").ok_or(TorrentError::MissingInfo)?;
    let hash = InfoHash::of(&info_value);
    let info = parse_info(info_value, hash)?;

    let announce_urls = extract_announce_urls(&dict)?;

    let creation_date = match dict.get(b"creation date") {
        Some(Value::Integer(secs)) if *secs >= 0 => {
            Some(UNIX_EPOCH + std::time::Duration::from_secs(*secs as u64))
        }
        _ => None,
    };

    let comment = optional_string(&dict, b"comment");
    let created_by = optional_string(&dict, b"created by");
    let encoding = optional_string(&dict, b"encoding");

    Ok(Metainfo {
        info,
        announce_urls,
        creation_date,
        comment,
        created_by,
        encoding,
    })
}

fn optional_string(dict: &bencode::Dict, key: &[u8]) -> String {
    match dict.get(key) {
        Some(Value::String(s)) => String::from_utf8_lossy(s).into_owned(),
        _ => String::new(),
    }
}

/// Flattens `announce-list` tiers in order, dropping empty strings and
/// per-URL duplicates; falls back to the single `announce` string if the
/// list is absent. An empty result is allowed -- the tracker manager
/// rejects a torrent with no trackers at start-up, not the parser.
fn extract_announce_urls(dict: &bencode::Dict) -> TorrentResult<Vec<String>> {
    let mut urls = Vec::new();
    let mut seen = std::collections::HashSet::new();

    if let Some(Value::List(tiers)) = dict.get(b"announce-list") {
        for tier in tiers {
            let Value::List(trackers) = tier else {
                continue;
            };
            for tracker in trackers {
                let Value::String(raw) = tracker else {
                    continue;
                };
                if raw.is_empty() {
                    continue;
                }
                let url = String::from_utf8_lossy(raw).into_owned();
                if seen.insert(url.clone()) {
                    urls.push(url);
                }
            }
        }
        return Ok(urls);
    }

    if let Some(Value::String(raw)) = dict.get(b"announce") {
        if !raw.is_empty() {
            urls.push(String::from_utf8_lossy(raw).into_owned());
        }
    }
    Ok(urls)
}

fn parse_info(value: Value, hash: InfoHash) -> TorrentResult<Info> {
    let dict = match &value {
        Value::Dict(d) => d,
        _ => {
            return Err(TorrentError::InvalidFieldType(
                "info is not a dictionary".into(),
            ))
        }
    };

    let piece_length = match dict.get(b"piece length") {
        Some(Value::Integer(i)) if *i > 0 => *i,
        Some(Value::Integer(_)) => {
            return Err(TorrentError::InvalidFieldType("piece length must be > 0".into()))
        }
        _ => return Err(TorrentError::MissingField("piece length".into())),
    };

    let pieces_bytes = match dict.get(b"pieces") {
        Some(Value::String(s)) => s,
        _ => return Err(TorrentError::MissingField("pieces".into())),
    };
    if pieces_bytes.len() % 20 != 0 {
        return Err(TorrentError::InvalidPiecesLength(pieces_bytes.len()));
    }
    let pieces = pieces_bytes
        .chunks_exact(20)
        .map(|chunk| {
            let mut hash = [0u8; 20];
            hash.copy_from_slice(chunk);
            hash
        })
        .collect();

    let name = match dict.get(b"name") {
        Some(Value::String(s)) => s.clone(),
        _ => return Err(TorrentError::MissingField("name".into())),
    };

    let private = matches!(dict.get(b"private"), Some(Value::Integer(1)));

    let mode = match dict.get(b"files") {
        Some(Value::List(entries)) => Mode::Multiple {
            files: parse_file_entries(entries)?,
        },
        Some(_) => {
            return Err(TorrentError::InvalidFieldType("files is not a list".into()))
        }
        None => match dict.get(b"length") {
            Some(Value::Integer(length)) if *length >= 0 => Mode::Single { length: *length },
            _ => return Err(TorrentError::MissingField("length".into())),
        },
    };

    Ok(Info {
        hash,
        name,
        piece_length,
        pieces,
        mode,
        private,
    })
}

fn parse_file_entries(entries: &[Value]) -> TorrentResult<Vec<FileEntry>> {
    entries.iter().map(parse_file_entry).collect()
}

fn parse_file_entry(entry: &Value) -> TorrentResult<FileEntry> {
    let dict = match entry {
        Value::Dict(d) => d,
        _ => return Err(TorrentError::InvalidFieldType("file entry is not a dict".into())),
    };

    let length = match dict.get(b"length") {
        Some(Value::Integer(i)) if *i >= 0 => *i,
        _ => return Err(TorrentError::MissingField("file length".into())),
    };

    let path_list = match dict.get(b"path") {
        Some(Value::List(l)) if !l.is_empty() => l,
        _ => return Err(TorrentError::InvalidPath),
    };

    let mut path = Vec::with_capacity(path_list.len());
    for element in path_list {
        match element {
            Value::String(s) if !s.is_empty() => path.push(s.clone()),
            _ => return Err(TorrentError::InvalidPath),
        }
    }

    Ok(FileEntry { length, path })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_torrent(extra_announce_list: bool) -> Vec<u8> {
        if extra_announce_list {
            b"d8:announce9:http://t/13:announce-listll11:http://t1/a11:http://t1/bel11:http://t2/a11:http://t1/aee4:infod6:lengthi1e4:name1:x12:piece lengthi1e6:pieces20:00000000000000000000ee".to_vec()
        } else {
            b"d8:announce9:http://t/4:infod6:lengthi1e4:name1:x12:piece lengthi1e6:pieces20:00000000000000000000ee".to_vec()
        }
    }

    #[test]
    fn parses_single_file_torrent_and_stable_info_hash() {
        let bytes = minimal_torrent(false);
        let metainfo = parse(&bytes).unwrap();
        assert_eq!(metainfo.info.piece_length, 1);
        assert_eq!(metainfo.info.num_pieces(), 1);
        assert_eq!(metainfo.announce_urls, vec!["http://t/".to_string()]);
        assert_eq!(metainfo.total_size(), 1);

        let top = bencode::decode(&bytes).unwrap();
        let info_value = top.as_dict().unwrap().get(b"info").unwrap().clone();
        assert_eq!(InfoHash::of(&info_value), metainfo.info.hash);
    }

    #[test]
    fn flattens_and_dedupes_announce_list_tiers() {
        let bytes = minimal_torrent(true);
        let metainfo = parse(&bytes).unwrap();
        assert_eq!(
            metainfo.announce_urls,
            vec![
                "http://t1/a".to_string(),
                "http://t1/b".to_string(),
                "http://t2/a".to_string(),
            ]
        );
    }

    #[test]
    fn rejects_missing_info() {
        let err = parse(b"d8:announce9:http://t/e").unwrap_err();
        assert!(matches!(err, TorrentError::MissingInfo));
    }

    #[test]
    fn rejects_pieces_not_multiple_of_twenty() {
        let bytes =
            b"d4:infod6:lengthi1e4:name1:x12:piece lengthi1e6:pieces3:abcee".to_vec();
        let err = parse(&bytes).unwrap_err();
        assert!(matches!(err, TorrentError::InvalidPiecesLength(3)));
    }

    #[test]
    fn multi_file_mode_sums_total_size() {
        let bytes = b"d4:infod5:filesld6:lengthi10e4:pathl1:a1:beed6:lengthi5e4:pathl1:ceee4:name1:x12:piece lengthi1e6:pieces20:00000000000000000000ee".to_vec();
        let metainfo = parse(&bytes).unwrap();
        assert_eq!(metainfo.total_size(), 15);
        match &metainfo.info.mode {
            Mode::Multiple { files } => assert_eq!(files.len(), 2),
            Mode::Single { .. } => panic!("expected multi-file mode"),
        }
    }
}
