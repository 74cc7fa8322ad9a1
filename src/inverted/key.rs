//! Order-preserving key encoding for posting lists
//!
//! Byte-wise comparison of two encoded keys matches the natural order of the
//! values they were produced from, as long as both have the same type.

use crate::object::PropertyValue;

const SIGN_BIT: u64 = 1 << 63;

/// Encode a property value as a sortable posting key
pub fn encode(value: &PropertyValue) -> Vec<u8> {
    match value {
        PropertyValue::Text(s) => s.as_bytes().to_vec(),
        PropertyValue::Int(v) => encode_i64(*v).to_vec(),
        PropertyValue::Number(v) => encode_f64(*v).to_vec(),
        PropertyValue::Boolean(b) => vec![*b as u8],
        PropertyValue::Date(d) => encode_i64(d.timestamp_micros()).to_vec(),
        PropertyValue::Uuid(u) => u.as_bytes().to_vec(),
    }
}

#[inline]
fn encode_i64(v: i64) -> [u8; 8] {
    ((v as u64) ^ SIGN_BIT).to_be_bytes()
}

#[inline]
fn encode_f64(v: f64) -> [u8; 8] {
    let bits = v.to_bits();
    let ordered = if bits & SIGN_BIT != 0 { !bits } else { bits ^ SIGN_BIT };
    ordered.to_be_bytes()
}
