//! Shadowsocks AEAD primitives: cipher suites, key derivation, and the
//! per-direction AEAD cipher with its nonce counter.

pub mod framer;

pub use framer::{Decryptor, Encryptor, MAX_PAYLOAD_SIZE};

use crate::{Error, Result};
use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes128Gcm, Aes256Gcm, Nonce,
};
use chacha20poly1305::ChaCha20Poly1305;
use hkdf::Hkdf;
use md5::{Digest, Md5};
use sha1::Sha1;
use zeroize::Zeroize;

/// Shadowsocks AEAD cipher suite
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CipherKind {
    Aes128Gcm,
    Aes256Gcm,
    ChaCha20Poly1305,
}

impl CipherKind {
    pub fn key_size(&self) -> usize {
        match self {
            CipherKind::Aes128Gcm => 16,
            CipherKind::Aes256Gcm => 32,
            CipherKind::ChaCha20Poly1305 => 32,
        }
    }

    /// Salt length equals key length for all supported suites
    pub fn salt_size(&self) -> usize {
        self.key_size()
    }

    pub fn tag_size(&self) -> usize {
        16
    }

    pub fn nonce_size(&self) -> usize {
        12
    }
}

impl TryFrom<&str> for CipherKind {
    type Error = Error;

    fn try_from(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "aes-128-gcm" => Ok(CipherKind::Aes128Gcm),
            "aes-256-gcm" => Ok(CipherKind::Aes256Gcm),
            "chacha20-ietf-poly1305" | "chacha20-poly1305" => Ok(CipherKind::ChaCha20Poly1305),
            _ => Err(Error::config(format!("Unsupported cipher: {}", s))),
        }
    }
}

/// Derive the master key from a password using EVP_BytesToKey (compatible
/// with the original Shadowsocks key stretch):
/// `d_0 = MD5(password)`, `d_i = MD5(d_{i-1} || password)`, concatenated
/// and truncated to `key_size`.
pub fn derive_key(password: &[u8], key_size: usize) -> Vec<u8> {
    let mut key = Vec::with_capacity(key_size);
    let mut prev: Vec<u8> = Vec::new();

    while key.len() < key_size {
        let mut hasher = Md5::new();
        hasher.update(&prev);
        hasher.update(password);
        let digest = hasher.finalize();
        prev = digest.to_vec();
        key.extend_from_slice(&prev);
    }

    key.truncate(key_size);
    key
}

/// Derive the per-session subkey using HKDF-SHA1 with info `"ss-subkey"`
/// (per the Shadowsocks AEAD spec)
pub fn derive_subkey(key: &[u8], salt: &[u8]) -> Vec<u8> {
    let hk = Hkdf::<Sha1>::new(Some(salt), key);
    let mut subkey = vec![0u8; key.len()];
    hk.expand(b"ss-subkey", &mut subkey).unwrap();
    subkey
}

/// AEAD cipher for one direction of one tunnel.
///
/// Owns the subkey and the nonce counter. The nonce is a 12-byte
/// little-endian counter starting at zero, incremented once per AEAD
/// operation; only the low 8 bytes ever vary. This layout is a wire
/// contract shared with every Shadowsocks AEAD implementation.
pub struct AeadCipher {
    kind: CipherKind,
    key: Vec<u8>,
    nonce: u64,
}

impl AeadCipher {
    pub fn new(kind: CipherKind, subkey: Vec<u8>) -> Self {
        AeadCipher {
            kind,
            key: subkey,
            nonce: 0,
        }
    }

    /// Number of AEAD operations performed so far
    pub fn nonce(&self) -> u64 {
        self.nonce
    }

    fn next_nonce(&mut self) -> [u8; 12] {
        let mut nonce = [0u8; 12];
        nonce[..8].copy_from_slice(&self.nonce.to_le_bytes());
        self.nonce += 1;
        nonce
    }

    /// Seal `plaintext` under the current nonce, returning ciphertext
    /// with the 16-byte tag appended. Increments the nonce.
    pub fn encrypt(&mut self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let nonce = self.next_nonce();

        match self.kind {
            CipherKind::Aes128Gcm => {
                let cipher = Aes128Gcm::new_from_slice(&self.key)
                    .map_err(|e| Error::crypto(e.to_string()))?;
                cipher
                    .encrypt(&Nonce::from(nonce), plaintext)
                    .map_err(|e| Error::crypto(e.to_string()))
            }
            CipherKind::Aes256Gcm => {
                let cipher = Aes256Gcm::new_from_slice(&self.key)
                    .map_err(|e| Error::crypto(e.to_string()))?;
                cipher
                    .encrypt(&Nonce::from(nonce), plaintext)
                    .map_err(|e| Error::crypto(e.to_string()))
            }
            CipherKind::ChaCha20Poly1305 => {
                let cipher = ChaCha20Poly1305::new_from_slice(&self.key)
                    .map_err(|e| Error::crypto(e.to_string()))?;
                cipher
                    .encrypt(&Nonce::from(nonce), plaintext)
                    .map_err(|e| Error::crypto(e.to_string()))
            }
        }
    }

    /// Open `ciphertext` (with appended tag) under the current nonce,
    /// returning the plaintext. Increments the nonce. A tag mismatch is
    /// fatal for the stream this cipher belongs to.
    pub fn decrypt(&mut self, ciphertext: &[u8]) -> Result<Vec<u8>> {
        if ciphertext.len() < self.kind.tag_size() {
            return Err(Error::crypto(format!(
                "Ciphertext too short: {} bytes",
                ciphertext.len()
            )));
        }

        let nonce = self.next_nonce();

        match self.kind {
            CipherKind::Aes128Gcm => {
                let cipher = Aes128Gcm::new_from_slice(&self.key)
                    .map_err(|e| Error::crypto(e.to_string()))?;
                cipher
                    .decrypt(&Nonce::from(nonce), ciphertext)
                    .map_err(|_| Error::crypto("AEAD tag verification failed"))
            }
            CipherKind::Aes256Gcm => {
                let cipher = Aes256Gcm::new_from_slice(&self.key)
                    .map_err(|e| Error::crypto(e.to_string()))?;
                cipher
                    .decrypt(&Nonce::from(nonce), ciphertext)
                    .map_err(|_| Error::crypto("AEAD tag verification failed"))
            }
            CipherKind::ChaCha20Poly1305 => {
                let cipher = ChaCha20Poly1305::new_from_slice(&self.key)
                    .map_err(|e| Error::crypto(e.to_string()))?;
                cipher
                    .decrypt(&Nonce::from(nonce), ciphertext)
                    .map_err(|_| Error::crypto("AEAD tag verification failed"))
            }
        }
    }
}

impl Drop for AeadCipher {
    fn drop(&mut self) {
        self.key.zeroize();
    }
}
