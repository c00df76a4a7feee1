use cfkv_store::{parse_float, parse_integer, RowRange, ValueType};

use crate::error::{IndexError, IndexResult};

/// Column family of every index table.
pub const INDEX_FAMILY: &str = "d";
/// Qualifier of the presence marker cell stored under each index entry.
pub const INDEX_MARKER_QUALIFIER: &str = "r";

const VALUE_TAG_INTEGER: u8 = 0x01;
const VALUE_TAG_FLOAT: u8 = 0x02;
const VALUE_TAG_BYTES: u8 = 0x03;
const BYTES_ESCAPE: u8 = 0x00;
const BYTES_ESCAPED_ZERO: u8 = 0xFF;
const BYTES_TERMINATOR: u8 = 0x01;
const ORDERED_NUMBER_LEN: usize = 8;
const SIGN_FLIP_MASK: u64 = 1u64 << 63;

fn encode_i64_ordered(value: i64) -> [u8; ORDERED_NUMBER_LEN] {
    (value as u64 ^ SIGN_FLIP_MASK).to_be_bytes()
}

fn encode_f64_ordered(value: f64) -> [u8; ORDERED_NUMBER_LEN] {
    // -0.0 and 0.0 compare equal and must share one entry.
    let value = if value == 0.0 { 0.0 } else { value };
    let bits = value.to_bits();
    let ordered = if bits & SIGN_FLIP_MASK != 0 {
        !bits
    } else {
        bits ^ SIGN_FLIP_MASK
    };
    ordered.to_be_bytes()
}

/// Encodes the value segment of an index entry key.
///
/// Design:
/// - Two cell values share a segment exactly when the predicate evaluator
///   considers them equal under `value_type`, so an equality lookup is a
///   prefix scan and returns the same rows a full-table filter would.
/// - Numeric types whose value parses become a tag plus 8 order-preserving
///   bytes; everything else (and unparseable numerics) is byte-escaped and
///   terminated so no segment is a prefix of another.
///
/// Outputs:
/// - Segment bytes; the row key is appended after them.
pub fn encode_index_value(value_type: ValueType, value: &[u8]) -> Vec<u8> {
    if value_type.is_integer() {
        if let Some(parsed) = parse_integer(value) {
            let mut out = Vec::with_capacity(1 + ORDERED_NUMBER_LEN);
            out.push(VALUE_TAG_INTEGER);
            out.extend_from_slice(&encode_i64_ordered(parsed));
            return out;
        }
    }
    if value_type.is_float() {
        if let Some(parsed) = parse_float(value) {
            let mut out = Vec::with_capacity(1 + ORDERED_NUMBER_LEN);
            out.push(VALUE_TAG_FLOAT);
            out.extend_from_slice(&encode_f64_ordered(parsed));
            return out;
        }
    }
    let mut out = Vec::with_capacity(value.len() + 3);
    out.push(VALUE_TAG_BYTES);
    for byte in value {
        out.push(*byte);
        if *byte == BYTES_ESCAPE {
            out.push(BYTES_ESCAPED_ZERO);
        }
    }
    out.push(BYTES_ESCAPE);
    out.push(BYTES_TERMINATOR);
    out
}

/// Full index entry key: value segment followed by the base row key.
pub fn encode_index_entry_key(value_type: ValueType, value: &[u8], row_key: &[u8]) -> Vec<u8> {
    let mut key = encode_index_value(value_type, value);
    key.extend_from_slice(row_key);
    key
}

/// Index-table range holding every entry whose value equals `value`.
pub fn index_lookup_range(value_type: ValueType, value: &[u8]) -> RowRange {
    RowRange::prefix(&encode_index_value(value_type, value))
}

/// Recovers the base row key from an index entry key.
pub fn decode_index_entry_row_key(key: &[u8]) -> IndexResult<Vec<u8>> {
    let malformed = || {
        IndexError::InvalidRequest(format!("malformed index entry key {}", hex::encode(key)))
    };
    let (tag, rest) = key.split_first().ok_or_else(malformed)?;
    match *tag {
        VALUE_TAG_INTEGER | VALUE_TAG_FLOAT => {
            if rest.len() < ORDERED_NUMBER_LEN {
                return Err(malformed());
            }
            Ok(rest[ORDERED_NUMBER_LEN..].to_vec())
        }
        VALUE_TAG_BYTES => {
            let mut idx = 0;
            while idx + 1 < rest.len() {
                if rest[idx] == BYTES_ESCAPE {
                    match rest[idx + 1] {
                        BYTES_TERMINATOR => return Ok(rest[idx + 2..].to_vec()),
                        BYTES_ESCAPED_ZERO => idx += 2,
                        _ => return Err(malformed()),
                    }
                } else {
                    idx += 1;
                }
            }
            Err(malformed())
        }
        _ => Err(malformed()),
    }
}
