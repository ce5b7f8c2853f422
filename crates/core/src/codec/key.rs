//! Passphrase handling and key derivation
//!
//! Keys are derived with the OpenPGP iterated+salted S2K construction over
//! SHA-256: `salt || passphrase` is hashed repeatedly until the coded byte
//! count has been fed to the digest.

use rand::RngCore;
use sha2::{Digest, Sha256};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Salt length stored in every stream header
pub const SALT_LEN: usize = 16;

/// Coded S2K count used for new streams (720,896 bytes hashed)
pub const DEFAULT_S2K_COUNT: u8 = 0x96;

/// A job passphrase, wiped from memory on drop
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct Passphrase(Vec<u8>);

impl Passphrase {
    pub fn new(passphrase: &str) -> Self {
        Self(passphrase.as_bytes().to_vec())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl std::fmt::Debug for Passphrase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Passphrase([REDACTED])")
    }
}

/// 256-bit symmetric key
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct StreamKey(pub(crate) [u8; 32]);

impl std::fmt::Debug for StreamKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "StreamKey([REDACTED])")
    }
}

/// Number of bytes hashed for a coded S2K count byte
pub fn decode_count(coded: u8) -> usize {
    (16 + (coded as usize & 15)) << ((coded as usize >> 4) + 6)
}

/// Derive a stream key from a passphrase and salt
pub fn derive_key(passphrase: &Passphrase, salt: &[u8; SALT_LEN], coded_count: u8) -> StreamKey {
    let pass = passphrase.as_bytes();
    let mut remaining = decode_count(coded_count).max(SALT_LEN + pass.len());

    let mut hasher = Sha256::new();
    while remaining > 0 {
        let take = remaining.min(SALT_LEN);
        hasher.update(&salt[..take]);
        remaining -= take;

        let take = remaining.min(pass.len());
        hasher.update(&pass[..take]);
        remaining -= take;
    }

    StreamKey(hasher.finalize().into())
}

/// Fresh random bytes for salts and nonce prefixes
pub fn random_bytes<const N: usize>() -> [u8; N] {
    let mut bytes = [0u8; N];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes
}
