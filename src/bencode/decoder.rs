//! Bencode decoding: consume exactly one value from a byte slice, returning
//! the value and the unread remainder.
use super::{BencodeError, Dict, Result, Value};
use tracing::instrument;

/// Decodes one value from the front of `bytes`, returning it with whatever
/// bytes follow it unconsumed.
#[instrument(skip(bytes), level = "trace")]
pub fn decode_value(bytes: &[u8]) -> Result<(Value, &[u8])> {
    match bytes.first() {
        None => Err(BencodeError::UnexpectedEof),
        Some(b'i') => decode_integer(bytes).map(|(i, rest)| (Value::Integer(i), rest)),
        Some(b'l') => decode_list(bytes).map(|(l, rest)| (Value::List(l), rest)),
        Some(b'd') => decode_dict(bytes).map(|(d, rest)| (Value::Dict(d), rest)),
        Some(b'0'..=b'9') => {
            decode_string(bytes).map(|(s, rest)| (Value::String(s), rest))
        }
        Some(&other) => Err(BencodeError::BadPrefix(other)),
    }
}

/// Decodes a bencode byte string: `<ascii non-negative decimal>:<bytes>`.
#[instrument(skip(bytes), level = "trace")]
fn decode_string(bytes: &[u8]) -> Result<(Vec<u8>, &[u8])> {
    let colon = bytes
        .iter()
        .position(|&b| b == b':')
        .ok_or(BencodeError::UnexpectedEof)?;
    let len_str =
        std::str::from_utf8(&bytes[..colon]).map_err(|_| BencodeError::InvalidInteger)?;
    if len_str.starts_with('-') {
        return Err(BencodeError::NegativeLength);
    }
    let len: usize = len_str.parse().map_err(|_| BencodeError::InvalidInteger)?;

    let data_start = colon + 1;
    let available = bytes.len().saturating_sub(data_start);
    if available < len {
        return Err(BencodeError::TruncatedString {
            declared: len,
            available,
        });
    }
    let data_end = data_start + len;
    Ok((bytes[data_start..data_end].to_vec(), &bytes[data_end..]))
}

/// Decodes a bencode integer: `i<signed decimal>e`. Rejects leading zeros
/// (other than a lone `0`), `-0`, and an empty mantissa.
#[instrument(skip(bytes), level = "trace")]
fn decode_integer(bytes: &[u8]) -> Result<(i64, &[u8])> {
    debug_assert_eq!(bytes.first(), Some(&b'i'));
    let end = bytes
        .iter()
        .position(|&b| b == b'e')
        .ok_or(BencodeError::UnexpectedEof)?;
    let digits = &bytes[1..end];
    let num_str = std::str::from_utf8(digits).map_err(|_| BencodeError::InvalidInteger)?;

    if num_str.is_empty() {
        return Err(BencodeError::InvalidInteger);
    }
    if num_str == "-0" {
        return Err(BencodeError::InvalidInteger);
    }
    let digits_only = num_str.strip_prefix('-').unwrap_or(num_str);
    if digits_only.len() > 1 && digits_only.starts_with('0') {
        return Err(BencodeError::InvalidInteger);
    }

    let value = num_str.parse::<i64>().map_err(|_| BencodeError::InvalidInteger)?;
    Ok((value, &bytes[end + 1..]))
}

/// Decodes a bencode list: `l<value>*e`.
#[instrument(skip(bytes), level = "trace")]
fn decode_list(bytes: &[u8]) -> Result<(Vec<Value>, &[u8])> {
    debug_assert_eq!(bytes.first(), Some(&b'l'));
    let mut rest = &bytes[1..];
    let mut items = Vec::new();

    loop {
        match rest.first() {
            None => return Err(BencodeError::UnexpectedEof),
            Some(b'e') => {
                rest = &rest[1..];
                break;
            }
            _ => {
                let (item, remainder) = decode_value(rest)?;
                items.push(item);
                rest = remainder;
            }
        }
    }
    Ok((items, rest))
}

/// Decodes a bencode dictionary: `d(<string><value>)*e`. Keys must be byte
/// strings; duplicates overwrite (last wins) without disturbing the
/// insertion-order position of the first occurrence.
#[instrument(skip(bytes), level = "trace")]
fn decode_dict(bytes: &[u8]) -> Result<(Dict, &[u8])> {
    debug_assert_eq!(bytes.first(), Some(&b'd'));
    let mut rest = &bytes[1..];
    let mut dict = Dict::new();

    loop {
        match rest.first() {
            None => return Err(BencodeError::UnexpectedEof),
            Some(b'e') => {
                rest = &rest[1..];
                break;
            }
            Some(b'0'..=b'9') => {
                let (key, remainder) = decode_string(rest)?;
                let (value, remainder) = decode_value(remainder)?;
                dict.insert(key, value);
                rest = remainder;
            }
            _ => return Err(BencodeError::DictKeyNotString),
        }
    }
    Ok((dict, rest))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bencode::decode;

    #[test]
    fn decodes_integer_boundaries() {
        assert_eq!(decode(b"i0e").unwrap().as_integer(), Some(0));
        assert_eq!(decode(b"i-42e").unwrap().as_integer(), Some(-42));
        assert!(matches!(decode(b"i01e"), Err(BencodeError::InvalidInteger)));
        assert!(matches!(decode(b"i-0e"), Err(BencodeError::InvalidInteger)));
        assert!(matches!(decode(b"ie"), Err(BencodeError::InvalidInteger)));
    }

    #[test]
    fn decodes_nested_list_and_dict() {
        let value = decode(b"d4:listl1:a1:bee").unwrap();
        let dict = value.as_dict().unwrap();
        let list = dict.get(b"list").unwrap().as_list().unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].as_bytes(), Some(&b"a"[..]));
    }

    #[test]
    fn duplicate_keys_last_wins_in_place() {
        let value = decode(b"d1:ai1e1:bi2e1:ai3ee").unwrap();
        let dict = value.as_dict().unwrap();
        assert_eq!(dict.get(b"a").unwrap().as_integer(), Some(3));
        assert_eq!(dict.len(), 2);
    }

    #[test]
    fn rejects_truncated_string() {
        assert!(matches!(
            decode(b"5:ab"),
            Err(BencodeError::TruncatedString { .. })
        ));
    }

    #[test]
    fn trailing_data_rejected_only_at_top_level() {
        assert!(matches!(decode(b"i1ei2e"), Err(BencodeError::TrailingData(_))));
        let (_, rest) = super::decode_value(b"i1ei2e").unwrap();
        assert_eq!(rest, b"i2e");
    }
}
