//! Binary Canonical Serialization for Aptos transactions.
//!
//! Covers the subset the router payload needs: primitives, addresses,
//! nested vectors and options. Values arrive as `serde_json::Value` from
//! the swap API and are encoded against a Move type string.

use anyhow::{anyhow, bail, Context, Result};
use serde_json::Value;

pub const ADDRESS_LENGTH: usize = 32;

/// Append-only BCS output buffer
#[derive(Debug, Default)]
pub struct Serializer {
    buf: Vec<u8>,
}

impl Serializer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn output(self) -> Vec<u8> {
        self.buf
    }

    pub fn bool(&mut self, v: bool) {
        self.buf.push(v as u8);
    }

    pub fn u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    pub fn u64(&mut self, v: u64) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn u128(&mut self, v: u128) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    /// ULEB128 variable-length unsigned integer (vector lengths, enum variants)
    pub fn uleb128(&mut self, mut v: u64) {
        loop {
            let byte = (v & 0x7f) as u8;
            v >>= 7;
            if v == 0 {
                self.buf.push(byte);
                break;
            }
            self.buf.push(byte | 0x80);
        }
    }

    /// Raw bytes, no length prefix (addresses, signatures)
    pub fn fixed_bytes(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Length-prefixed byte string (identifiers, nested arg blobs)
    pub fn bytes(&mut self, bytes: &[u8]) {
        self.uleb128(bytes.len() as u64);
        self.buf.extend_from_slice(bytes);
    }

    pub fn str(&mut self, s: &str) {
        self.bytes(s.as_bytes());
    }
}

/// Parse a hex account address into its canonical 32-byte form (left-padded).
pub fn parse_address(s: &str) -> Result<[u8; ADDRESS_LENGTH]> {
    let hex_part = s.strip_prefix("0x").unwrap_or(s);
    if hex_part.is_empty() || hex_part.len() > ADDRESS_LENGTH * 2 {
        bail!("invalid address length: {:?}", s);
    }
    let padded = format!("{:0>64}", hex_part);
    let raw = hex::decode(&padded).with_context(|| format!("invalid address hex: {:?}", s))?;
    let mut out = [0u8; ADDRESS_LENGTH];
    out.copy_from_slice(&raw);
    Ok(out)
}

/// BCS-encode a single Move value given its type string.
///
/// Handles: bool, u8, u64, u128, address, vector<T>, Option<T>.
/// The `Option<signer>` position always encodes as none; the signer is
/// supplied implicitly by the VM.
pub fn encode_move_value(type_str: &str, value: &Value) -> Result<Vec<u8>> {
    let mut ser = Serializer::new();
    write_value(&mut ser, type_str.trim(), value)
        .with_context(|| format!("encoding {} from {}", type_str, value))?;
    Ok(ser.output())
}

fn write_value(ser: &mut Serializer, t: &str, v: &Value) -> Result<()> {
    let t = t.trim();
    match t {
        "bool" => ser.bool(value_as_bool(v)?),
        "u8" => ser.u8(value_as_u128(v)? as u8),
        "u64" => ser.u64(value_as_u128(v)? as u64),
        "u128" => ser.u128(value_as_u128(v)?),
        "address" => {
            let s = v
                .as_str()
                .ok_or_else(|| anyhow!("address must be a string, got {}", v))?;
            ser.fixed_bytes(&parse_address(s)?);
        }
        "0x1::option::Option<signer>" => {
            // Signer is passed implicitly by the VM; always none.
            ser.uleb128(0);
        }
        _ if t.starts_with("vector<") && t.ends_with('>') => {
            let inner = &t[7..t.len() - 1];
            write_vector(ser, inner, v)?;
        }
        _ if t.starts_with("0x1::option::Option<") && t.ends_with('>') => {
            let inner = &t[20..t.len() - 1];
            if v.is_null() {
                ser.uleb128(0);
            } else {
                ser.uleb128(1);
                write_value(ser, inner, v)?;
            }
        }
        _ => bail!("unsupported Move type: {:?}", t),
    }
    Ok(())
}

fn write_vector(ser: &mut Serializer, inner: &str, v: &Value) -> Result<()> {
    // vector<u8> may arrive as a hex string instead of an element array
    if inner.trim() == "u8" {
        if let Some(s) = v.as_str() {
            let hex_part = s.strip_prefix("0x").unwrap_or(s);
            let raw =
                hex::decode(hex_part).with_context(|| format!("invalid vector<u8> hex: {}", s))?;
            ser.bytes(&raw);
            return Ok(());
        }
    }

    let items = v
        .as_array()
        .ok_or_else(|| anyhow!("vector value must be an array, got {}", v))?;
    ser.uleb128(items.len() as u64);
    for item in items {
        write_value(ser, inner, item)?;
    }
    Ok(())
}

fn value_as_bool(v: &Value) -> Result<bool> {
    match v {
        Value::Bool(b) => Ok(*b),
        Value::String(s) => match s.as_str() {
            "true" => Ok(true),
            "false" => Ok(false),
            _ => bail!("invalid bool string: {:?}", s),
        },
        _ => bail!("expected bool, got {}", v),
    }
}

// Integers arrive as JSON numbers or decimal strings (u64/u128 don't fit
// in JSON numbers reliably, so the API stringifies them).
fn value_as_u128(v: &Value) -> Result<u128> {
    match v {
        Value::Number(n) => n
            .as_u64()
            .map(u128::from)
            .ok_or_else(|| anyhow!("non-integer number: {}", n)),
        Value::String(s) => s
            .parse::<u128>()
            .with_context(|| format!("invalid integer string: {:?}", s)),
        _ => bail!("expected integer, got {}", v),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_uleb128_edges() {
        for (v, expect) in [
            (0u64, vec![0x00]),
            (1, vec![0x01]),
            (127, vec![0x7f]),
            (128, vec![0x80, 0x01]),
            (300, vec![0xac, 0x02]),
            (16384, vec![0x80, 0x80, 0x01]),
        ] {
            let mut ser = Serializer::new();
            ser.uleb128(v);
            assert_eq!(ser.output(), expect, "uleb128({})", v);
        }
    }

    #[test]
    fn test_primitive_widths() {
        assert_eq!(encode_move_value("bool", &json!(true)).unwrap(), vec![1]);
        assert_eq!(encode_move_value("u8", &json!(7)).unwrap(), vec![7]);
        assert_eq!(
            encode_move_value("u64", &json!("258")).unwrap(),
            vec![2, 1, 0, 0, 0, 0, 0, 0]
        );
        assert_eq!(encode_move_value("u128", &json!(1)).unwrap().len(), 16);
    }

    #[test]
    fn test_address_is_left_padded() {
        let out = encode_move_value("address", &json!("0x1")).unwrap();
        assert_eq!(out.len(), 32);
        assert_eq!(out[31], 1);
        assert!(out[..31].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_address_rejects_garbage() {
        assert!(encode_move_value("address", &json!("0xzz")).is_err());
        assert!(encode_move_value("address", &json!(12)).is_err());
        assert!(parse_address(&"ff".repeat(33)).is_err());
    }

    #[test]
    fn test_nested_vectors() {
        // vector<vector<u64>> [[1], [2, 3]]
        let out = encode_move_value("vector<vector<u64>>", &json!([[1], ["2", 3]])).unwrap();
        let mut expect = vec![2u8, 1];
        expect.extend_from_slice(&1u64.to_le_bytes());
        expect.push(2);
        expect.extend_from_slice(&2u64.to_le_bytes());
        expect.extend_from_slice(&3u64.to_le_bytes());
        assert_eq!(out, expect);
    }

    #[test]
    fn test_vector_u8_accepts_hex_string() {
        let from_array = encode_move_value("vector<u8>", &json!([1, 2, 255])).unwrap();
        let from_hex = encode_move_value("vector<u8>", &json!("0x0102ff")).unwrap();
        assert_eq!(from_array, from_hex);
        assert_eq!(from_array, vec![3, 1, 2, 255]);
    }

    #[test]
    fn test_option_encodings() {
        assert_eq!(
            encode_move_value("0x1::option::Option<u64>", &Value::Null).unwrap(),
            vec![0]
        );
        let some = encode_move_value("0x1::option::Option<u64>", &json!(5)).unwrap();
        assert_eq!(some[0], 1);
        assert_eq!(some.len(), 9);
    }

    #[test]
    fn test_option_signer_always_none() {
        // Even a non-null value encodes as none
        assert_eq!(
            encode_move_value("0x1::option::Option<signer>", &json!("0xdead")).unwrap(),
            vec![0]
        );
        assert_eq!(
            encode_move_value("0x1::option::Option<signer>", &Value::Null).unwrap(),
            vec![0]
        );
    }

    #[test]
    fn test_unsupported_type_rejected() {
        assert!(encode_move_value("u256", &json!(1)).is_err());
        assert!(encode_move_value("signer", &json!("0x1")).is_err());
    }
}
