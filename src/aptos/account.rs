//! Local Aptos account: ed25519 key handling and address derivation.

use anyhow::{bail, Context, Result};
use ed25519_dalek::{Signer, SigningKey};
use sha3::{Digest, Sha3_256};

use crate::aptos::bcs::{parse_address, ADDRESS_LENGTH};

// Single-key ed25519 authentication scheme identifier
const ED25519_SCHEME: u8 = 0x00;

/// An account loaded from a raw ed25519 private key.
pub struct LocalAccount {
    signing_key: SigningKey,
    address: [u8; ADDRESS_LENGTH],
}

impl LocalAccount {
    /// Load from a hex private key (`0x`-prefixed or bare; the AIP-80
    /// `ed25519-priv-` prefix is tolerated). The account address is derived
    /// from the public key unless overridden with `with_address`.
    pub fn from_private_key_hex(key: &str) -> Result<Self> {
        let trimmed = key.trim();
        let trimmed = trimmed.strip_prefix("ed25519-priv-").unwrap_or(trimmed);
        let trimmed = trimmed.strip_prefix("0x").unwrap_or(trimmed);

        let raw = hex::decode(trimmed).context("private key is not valid hex")?;
        if raw.len() != 32 {
            bail!("private key must be 32 bytes, got {}", raw.len());
        }
        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(&raw);

        let signing_key = SigningKey::from_bytes(&bytes);
        let address = derive_address(&signing_key);
        Ok(Self {
            signing_key,
            address,
        })
    }

    /// Override the derived address (APTOS_WALLET_ADDRESS env var, e.g. a
    /// rotated authentication key).
    pub fn with_address(mut self, address: &str) -> Result<Self> {
        self.address = parse_address(address)?;
        Ok(self)
    }

    pub fn address_bytes(&self) -> [u8; ADDRESS_LENGTH] {
        self.address
    }

    /// Canonical `0x`-prefixed 64-hex-char address
    pub fn address(&self) -> String {
        format!("0x{}", hex::encode(self.address))
    }

    pub fn public_key_bytes(&self) -> [u8; 32] {
        self.signing_key.verifying_key().to_bytes()
    }

    pub fn sign(&self, message: &[u8]) -> [u8; 64] {
        self.signing_key.sign(message).to_bytes()
    }
}

// auth_key = sha3_256(pubkey ‖ scheme_byte)
fn derive_address(key: &SigningKey) -> [u8; ADDRESS_LENGTH] {
    let mut hasher = Sha3_256::new();
    hasher.update(key.verifying_key().to_bytes());
    hasher.update([ED25519_SCHEME]);
    let digest = hasher.finalize();
    let mut out = [0u8; ADDRESS_LENGTH];
    out.copy_from_slice(&digest);
    out
}
