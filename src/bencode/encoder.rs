//! Canonical bencode encoding.
//!
//! The encoder always sorts dictionary keys ascending by raw byte value
//! before emission; this is what makes two semantically equal values
//! serialize to the same bytes, which the info-hash depends on.
use super::Value;
use tracing::instrument;

#[instrument(skip(buf, s), level = "trace")]
fn encode_string(buf: &mut Vec<u8>, s: &[u8]) {
    buf.extend_from_slice(s.len().to_string().as_bytes());
    buf.push(b':');
    buf.extend_from_slice(s);
}

#[instrument(skip(buf), level = "trace")]
fn encode_integer(buf: &mut Vec<u8>, i: i64) {
    buf.push(b'i');
    buf.extend_from_slice(i.to_string().as_bytes());
    buf.push(b'e');
}

#[instrument(skip(buf, list), level = "trace")]
fn encode_list(buf: &mut Vec<u8>, list: &[Value]) {
    buf.push(b'l');
    for item in list {
        encode_value(buf, item);
    }
    buf.push(b'e');
}

#[instrument(skip(buf, dict), level = "trace")]
fn encode_dict(buf: &mut Vec<u8>, dict: &super::Dict) {
    buf.push(b'd');
    let mut entries: Vec<_> = dict.iter().collect();
    entries.sort_by(|(a, _), (b, _)| a.cmp(b));
    for (key, value) in entries {
        encode_string(buf, key);
        encode_value(buf, value);
    }
    buf.push(b'e');
}

#[instrument(skip(buf), level = "trace")]
pub(super) fn encode_value(buf: &mut Vec<u8>, value: &Value) {
    match value {
        Value::String(s) => encode_string(buf, s),
        Value::Integer(i) => encode_integer(buf, *i),
        Value::List(list) => encode_list(buf, list),
        Value::Dict(dict) => encode_dict(buf, dict),
    }
}

#[cfg(test)]
mod tests {
    use super::super::{decode, encode, Dict, Value};

    #[test]
    fn encodes_each_value_kind() {
        assert_eq!(encode(&Value::Integer(42)), b"i42e");
        assert_eq!(encode(&Value::String(b"spam".to_vec())), b"4:spam");
        assert_eq!(
            encode(&Value::List(vec![
                Value::Integer(1),
                Value::String(b"hello".to_vec())
            ])),
            b"li1e5:helloe"
        );
    }

    #[test]
    fn canonical_encoding_is_stable_across_insertion_order() {
        let mut a = Dict::new();
        a.insert(b"b".to_vec(), Value::Integer(1));
        a.insert(b"a".to_vec(), Value::Integer(2));

        let mut b = Dict::new();
        b.insert(b"a".to_vec(), Value::Integer(2));
        b.insert(b"b".to_vec(), Value::Integer(1));

        assert_eq!(encode(&Value::Dict(a)), encode(&Value::Dict(b)));
    }

    #[test]
    fn semantic_round_trip_through_decode_encode_decode() {
        let input = b"d3:bar4:spam3:fooi42e4:listl1:a1:beee";
        let decoded_once = decode(input).unwrap();
        let reencoded = encode(&decoded_once);
        let decoded_twice = decode(&reencoded).unwrap();
        assert_eq!(decoded_once, decoded_twice);
    }
}
