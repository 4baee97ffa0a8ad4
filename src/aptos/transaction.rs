//! Move type tags and transaction construction.
//!
//! Builds the BCS forms the fullnode expects: type tags parsed from the
//! swap API's type-argument strings, entry-function payloads, and the
//! raw/signed transaction envelopes.

use crate::aptos::bcs::{parse_address, Serializer, ADDRESS_LENGTH};
use anyhow::{anyhow, bail, Context, Result};

/// Domain-separation prefix hashed into every raw-transaction signing message
pub const RAW_TRANSACTION_SALT: &[u8] = b"APTOS::RawTransaction";

/// A parsed Move type tag
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeTag {
    Bool,
    U8,
    U64,
    U128,
    Address,
    Signer,
    Vector(Box<TypeTag>),
    Struct(Box<StructTag>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructTag {
    pub address: [u8; ADDRESS_LENGTH],
    pub module: String,
    pub name: String,
    pub type_params: Vec<TypeTag>,
}

impl TypeTag {
    /// Parse a type string such as `u64`, `vector<u8>`, or
    /// `0x1::coin::CoinStore<0x1::aptos_coin::AptosCoin>`.
    pub fn parse(s: &str) -> Result<TypeTag> {
        let s = s.trim();
        match s {
            "bool" => return Ok(TypeTag::Bool),
            "u8" => return Ok(TypeTag::U8),
            "u64" => return Ok(TypeTag::U64),
            "u128" => return Ok(TypeTag::U128),
            "address" => return Ok(TypeTag::Address),
            "signer" => return Ok(TypeTag::Signer),
            _ => {}
        }

        if let Some(inner) = s.strip_prefix("vector<").and_then(|r| r.strip_suffix('>')) {
            return Ok(TypeTag::Vector(Box::new(TypeTag::parse(inner)?)));
        }

        // Struct tag: addr::module::Name optionally followed by <T1, T2, …>
        let (head, params) = match s.find('<') {
            Some(open) => {
                if !s.ends_with('>') {
                    bail!("unbalanced type parameters in {:?}", s);
                }
                (&s[..open], split_type_params(&s[open + 1..s.len() - 1])?)
            }
            None => (s, Vec::new()),
        };

        let parts: Vec<&str> = head.split("::").collect();
        if parts.len() != 3 {
            bail!("invalid struct tag: {:?}", s);
        }
        let type_params = params
            .iter()
            .map(|p| TypeTag::parse(p))
            .collect::<Result<Vec<_>>>()?;

        Ok(TypeTag::Struct(Box::new(StructTag {
            address: parse_address(parts[0])?,
            module: parts[1].to_string(),
            name: parts[2].to_string(),
            type_params,
        })))
    }

    pub fn serialize(&self, ser: &mut Serializer) {
        match self {
            TypeTag::Bool => ser.uleb128(0),
            TypeTag::U8 => ser.uleb128(1),
            TypeTag::U64 => ser.uleb128(2),
            TypeTag::U128 => ser.uleb128(3),
            TypeTag::Address => ser.uleb128(4),
            TypeTag::Signer => ser.uleb128(5),
            TypeTag::Vector(inner) => {
                ser.uleb128(6);
                inner.serialize(ser);
            }
            TypeTag::Struct(tag) => {
                ser.uleb128(7);
                ser.fixed_bytes(&tag.address);
                ser.str(&tag.module);
                ser.str(&tag.name);
                ser.uleb128(tag.type_params.len() as u64);
                for p in &tag.type_params {
                    p.serialize(ser);
                }
            }
        }
    }
}

// Split `A, B<C, D>, E` on top-level commas only.
fn split_type_params(s: &str) -> Result<Vec<String>> {
    let mut out = Vec::new();
    let mut depth = 0usize;
    let mut current = String::new();
    for c in s.chars() {
        match c {
            '<' => {
                depth += 1;
                current.push(c);
            }
            '>' => {
                depth = depth
                    .checked_sub(1)
                    .ok_or_else(|| anyhow!("unbalanced '>' in {:?}", s))?;
                current.push(c);
            }
            ',' if depth == 0 => {
                out.push(current.trim().to_string());
                current.clear();
            }
            _ => current.push(c),
        }
    }
    if depth != 0 {
        bail!("unbalanced '<' in {:?}", s);
    }
    if !current.trim().is_empty() {
        out.push(current.trim().to_string());
    }
    Ok(out)
}

/// An entry-function call with pre-encoded BCS arguments
#[derive(Debug, Clone)]
pub struct EntryFunction {
    pub module_address: [u8; ADDRESS_LENGTH],
    pub module_name: String,
    pub function_name: String,
    pub type_args: Vec<TypeTag>,
    pub args: Vec<Vec<u8>>,
}

impl EntryFunction {
    /// Build from a fully-qualified name `addr::module::function`.
    pub fn from_qualified_name(
        func: &str,
        type_args: Vec<TypeTag>,
        args: Vec<Vec<u8>>,
    ) -> Result<Self> {
        let parts: Vec<&str> = func.split("::").collect();
        if parts.len() != 3 {
            bail!("invalid entry function name: {:?}", func);
        }
        Ok(Self {
            module_address: parse_address(parts[0])
                .with_context(|| format!("entry function address in {:?}", func))?,
            module_name: parts[1].to_string(),
            function_name: parts[2].to_string(),
            type_args,
            args,
        })
    }

    // TransactionPayload::EntryFunction (variant 2)
    fn serialize_payload(&self, ser: &mut Serializer) {
        ser.uleb128(2);
        ser.fixed_bytes(&self.module_address);
        ser.str(&self.module_name);
        ser.str(&self.function_name);
        ser.uleb128(self.type_args.len() as u64);
        for t in &self.type_args {
            t.serialize(ser);
        }
        ser.uleb128(self.args.len() as u64);
        for arg in &self.args {
            ser.bytes(arg);
        }
    }
}

/// Unsigned transaction envelope
#[derive(Debug, Clone)]
pub struct RawTransaction {
    pub sender: [u8; ADDRESS_LENGTH],
    pub sequence_number: u64,
    pub payload: EntryFunction,
    pub max_gas_amount: u64,
    pub gas_unit_price: u64,
    pub expiration_timestamp_secs: u64,
    pub chain_id: u8,
}

impl RawTransaction {
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut ser = Serializer::new();
        ser.fixed_bytes(&self.sender);
        ser.u64(self.sequence_number);
        self.payload.serialize_payload(&mut ser);
        ser.u64(self.max_gas_amount);
        ser.u64(self.gas_unit_price);
        ser.u64(self.expiration_timestamp_secs);
        ser.u8(self.chain_id);
        ser.output()
    }

    /// `sha3_256(salt) ‖ bcs(raw_txn)`, the bytes the account signs
    pub fn signing_message(&self) -> Vec<u8> {
        use sha3::{Digest, Sha3_256};
        let mut out = Sha3_256::digest(RAW_TRANSACTION_SALT).to_vec();
        out.extend_from_slice(&self.to_bytes());
        out
    }

    /// Attach an ed25519 authenticator and produce the submit-ready BCS blob.
    pub fn into_signed_bytes(self, public_key: &[u8; 32], signature: &[u8; 64]) -> Vec<u8> {
        let mut ser = Serializer::new();
        ser.fixed_bytes(&self.to_bytes());
        // TransactionAuthenticator::Ed25519 (variant 0)
        ser.uleb128(0);
        ser.bytes(public_key);
        ser.bytes(signature);
        ser.output()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_primitives() {
        assert_eq!(TypeTag::parse("u64").unwrap(), TypeTag::U64);
        assert_eq!(TypeTag::parse(" address ").unwrap(), TypeTag::Address);
        assert_eq!(
            TypeTag::parse("vector<u8>").unwrap(),
            TypeTag::Vector(Box::new(TypeTag::U8))
        );
    }

    #[test]
    fn test_parse_struct_tag() {
        let tag = TypeTag::parse("0x1::aptos_coin::AptosCoin").unwrap();
        match tag {
            TypeTag::Struct(s) => {
                assert_eq!(s.module, "aptos_coin");
                assert_eq!(s.name, "AptosCoin");
                assert_eq!(s.address[31], 1);
                assert!(s.type_params.is_empty());
            }
            other => panic!("expected struct tag, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_generic_struct_tag() {
        let tag =
            TypeTag::parse("0x1::coin::CoinStore<0x1::aptos_coin::AptosCoin, vector<u8>>").unwrap();
        match tag {
            TypeTag::Struct(s) => {
                assert_eq!(s.name, "CoinStore");
                assert_eq!(s.type_params.len(), 2);
                assert_eq!(s.type_params[1], TypeTag::Vector(Box::new(TypeTag::U8)));
            }
            other => panic!("expected struct tag, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!(TypeTag::parse("0x1::coin").is_err());
        assert!(TypeTag::parse("0x1::coin::CoinStore<u8").is_err());
        assert!(TypeTag::parse("u256").is_err());
    }

    #[test]
    fn test_type_tag_serialization() {
        let mut ser = Serializer::new();
        TypeTag::U64.serialize(&mut ser);
        assert_eq!(ser.output(), vec![2]);

        let mut ser = Serializer::new();
        TypeTag::Vector(Box::new(TypeTag::U8)).serialize(&mut ser);
        assert_eq!(ser.output(), vec![6, 1]);
    }

    #[test]
    fn test_entry_function_name_parsing() {
        let ef = EntryFunction::from_qualified_name(
            "0x1c3206329806286fd2223647c9f9b130e66baeb6d7224a18c1f642ffe48f3b4c::router_entry::swap",
            vec![],
            vec![vec![1, 2, 3]],
        )
        .unwrap();
        assert_eq!(ef.module_name, "router_entry");
        assert_eq!(ef.function_name, "swap");

        assert!(EntryFunction::from_qualified_name("swap", vec![], vec![]).is_err());
    }

    #[test]
    fn test_raw_transaction_layout() {
        let ef = EntryFunction::from_qualified_name("0x1::m::f", vec![TypeTag::U8], vec![vec![9]])
            .unwrap();
        let raw = RawTransaction {
            sender: [0u8; 32],
            sequence_number: 7,
            payload: ef,
            max_gas_amount: 200_000,
            gas_unit_price: 100,
            expiration_timestamp_secs: 1_700_000_000,
            chain_id: 1,
        };

        let bytes = raw.to_bytes();
        // sender(32) + seq(8) prefix, chain id is the last byte
        assert_eq!(&bytes[32..40], &7u64.to_le_bytes());
        assert_eq!(*bytes.last().unwrap(), 1);

        let msg = raw.signing_message();
        // 32-byte salt hash followed by the raw bytes
        assert_eq!(msg.len(), 32 + bytes.len());
        assert_eq!(&msg[32..], &bytes[..]);
    }

    #[test]
    fn test_signed_bytes_append_authenticator() {
        let ef = EntryFunction::from_qualified_name("0x1::m::f", vec![], vec![]).unwrap();
        let raw = RawTransaction {
            sender: [0u8; 32],
            sequence_number: 0,
            payload: ef,
            max_gas_amount: 1,
            gas_unit_price: 1,
            expiration_timestamp_secs: 1,
            chain_id: 1,
        };
        let raw_len = raw.to_bytes().len();
        let signed = raw.into_signed_bytes(&[1u8; 32], &[2u8; 64]);
        // variant byte + (1+32) pubkey + (1+64) signature
        assert_eq!(signed.len(), raw_len + 1 + 33 + 65);
        assert_eq!(signed[raw_len], 0);
    }
}
