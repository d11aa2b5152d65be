//! AEAD chunk framing for the Shadowsocks TCP stream.
//!
//! Each direction of a tunnel is an independent byte-in/byte-out engine:
//! the [`Encryptor`] turns plaintext into `salt || chunk || chunk || ...`
//! and the [`Decryptor`] reverses it. A chunk is two AEAD operations on
//! consecutive nonces: the sealed 2-byte big-endian payload length, then
//! the sealed payload. The engines are synchronous; the I/O layer drives
//! them, so a stalled writer naturally pauses the upstream reader.

use super::{derive_subkey, AeadCipher, CipherKind};
use crate::{Error, Result};
use bytes::BytesMut;
use zeroize::Zeroize;

/// Maximum payload bytes per chunk (0x3FFF per the Shadowsocks AEAD spec)
pub const MAX_PAYLOAD_SIZE: usize = 0x3FFF;

/// Encrypting half of one tunnel.
///
/// Starts without a salt; the salt is generated and emitted ahead of the
/// first chunk once the first non-empty payload arrives, and the subkey
/// is derived from it at that point.
pub struct Encryptor {
    kind: CipherKind,
    master_key: Vec<u8>,
    cipher: Option<AeadCipher>,
}

impl Encryptor {
    /// Create an encryptor from a password (derives the master key)
    pub fn new(kind: CipherKind, password: &[u8]) -> Self {
        Self::with_key(kind, super::derive_key(password, kind.key_size()))
    }

    /// Create an encryptor from an already-derived master key
    pub fn with_key(kind: CipherKind, master_key: Vec<u8>) -> Self {
        Encryptor {
            kind,
            master_key,
            cipher: None,
        }
    }

    /// Encrypt `plaintext`, returning the wire bytes to send.
    ///
    /// The first call with non-empty input prepends the salt. Inputs
    /// larger than [`MAX_PAYLOAD_SIZE`] are split into ordered sub-chunks
    /// at the encryption boundary. Empty input produces empty output.
    pub fn push(&mut self, plaintext: &[u8]) -> Result<Vec<u8>> {
        if plaintext.is_empty() {
            return Ok(Vec::new());
        }

        let mut out = Vec::with_capacity(self.kind.salt_size() + plaintext.len() + 64);

        if self.cipher.is_none() {
            let mut salt = vec![0u8; self.kind.salt_size()];
            getrandom::getrandom(&mut salt).map_err(|e| Error::crypto(e.to_string()))?;
            out.extend_from_slice(&salt);
            self.cipher = Some(AeadCipher::new(
                self.kind,
                derive_subkey(&self.master_key, &salt),
            ));
        }
        let cipher = self
            .cipher
            .as_mut()
            .ok_or_else(|| Error::internal("Encryptor not initialized"))?;

        for chunk in plaintext.chunks(MAX_PAYLOAD_SIZE) {
            let len_bytes = (chunk.len() as u16).to_be_bytes();
            out.extend_from_slice(&cipher.encrypt(&len_bytes)?);
            out.extend_from_slice(&cipher.encrypt(chunk)?);
        }

        Ok(out)
    }
}

impl Drop for Encryptor {
    fn drop(&mut self) {
        self.master_key.zeroize();
    }
}

enum DecryptState {
    /// Waiting for the peer's salt
    Salt,
    /// Waiting for a sealed length frame (2 + tag bytes)
    Length,
    /// Waiting for a sealed payload frame (`len` + tag bytes)
    Payload { len: usize },
}

/// Decrypting half of one tunnel.
///
/// Accepts arbitrarily-split input buffers and carries partial frames
/// across calls. Any authentication failure or out-of-range length is
/// fatal: the error must terminate the whole tunnel and no plaintext
/// from the failed chunk is ever emitted.
pub struct Decryptor {
    kind: CipherKind,
    master_key: Vec<u8>,
    cipher: Option<AeadCipher>,
    buf: BytesMut,
    state: DecryptState,
}

impl Decryptor {
    /// Create a decryptor from a password (derives the master key)
    pub fn new(kind: CipherKind, password: &[u8]) -> Self {
        Self::with_key(kind, super::derive_key(password, kind.key_size()))
    }

    /// Create a decryptor from an already-derived master key
    pub fn with_key(kind: CipherKind, master_key: Vec<u8>) -> Self {
        Decryptor {
            kind,
            master_key,
            cipher: None,
            buf: BytesMut::with_capacity(4096),
            state: DecryptState::Salt,
        }
    }

    /// Decrypt as much buffered ciphertext as possible, returning the
    /// plaintext recovered from every complete chunk.
    pub fn push(&mut self, input: &[u8]) -> Result<Vec<u8>> {
        self.buf.extend_from_slice(input);
        let mut out = Vec::new();
        let tag_size = self.kind.tag_size();

        loop {
            match self.state {
                DecryptState::Salt => {
                    let salt_size = self.kind.salt_size();
                    if self.buf.len() < salt_size {
                        break;
                    }
                    let salt = self.buf.split_to(salt_size);
                    self.cipher = Some(AeadCipher::new(
                        self.kind,
                        derive_subkey(&self.master_key, &salt),
                    ));
                    self.state = DecryptState::Length;
                }
                DecryptState::Length => {
                    if self.buf.len() < 2 + tag_size {
                        break;
                    }
                    let frame = self.buf.split_to(2 + tag_size);
                    let cipher = self
                        .cipher
                        .as_mut()
                        .ok_or_else(|| Error::internal("Decryptor not initialized"))?;
                    let len_plain = cipher.decrypt(&frame)?;
                    let len = u16::from_be_bytes([len_plain[0], len_plain[1]]) as usize;
                    if len == 0 || len > MAX_PAYLOAD_SIZE {
                        return Err(Error::crypto(format!("Invalid chunk length: {}", len)));
                    }
                    self.state = DecryptState::Payload { len };
                }
                DecryptState::Payload { len } => {
                    if self.buf.len() < len + tag_size {
                        break;
                    }
                    let frame = self.buf.split_to(len + tag_size);
                    let cipher = self
                        .cipher
                        .as_mut()
                        .ok_or_else(|| Error::internal("Decryptor not initialized"))?;
                    out.extend_from_slice(&cipher.decrypt(&frame)?);
                    self.state = DecryptState::Length;
                }
            }
        }

        Ok(out)
    }

    /// True when no partial frame is buffered, i.e. EOF here is a clean
    /// end of stream rather than a truncated chunk.
    pub fn is_idle(&self) -> bool {
        self.buf.is_empty() && !matches!(self.state, DecryptState::Payload { .. })
    }
}

impl Drop for Decryptor {
    fn drop(&mut self) {
        self.master_key.zeroize();
    }
}
