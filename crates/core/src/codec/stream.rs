//! Chunked authenticated encryption
//!
//! Plaintext is cut into fixed-size chunks that are sealed independently.
//! The 12-byte nonce is `prefix[7] || counter (u32 BE) || last flag`, so
//! reordered, dropped, truncated or appended chunks all fail authentication.
//! A stream always ends with exactly one chunk flagged last, which may be
//! empty.

use super::key::StreamKey;
use crate::error::{Error, Result};
use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::Aes256Gcm;
use chacha20poly1305::ChaCha20Poly1305;
use std::io::{self, Read, Write};

/// Random per-stream part of every nonce
pub const NONCE_PREFIX_LEN: usize = 7;

/// AEAD tag appended to every sealed chunk
pub const TAG_LEN: usize = 16;

/// Plaintext chunk size used for new streams
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// Upper bound accepted for a chunk size read from a header
pub const MAX_CHUNK_SIZE: usize = 64 * 1024 * 1024;

/// AEAD cipher selection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Algorithm {
    /// AES-256-GCM, used by the armored codec
    AesGcm256,
    /// ChaCha20-Poly1305, used by the error-resistant codec
    ChaCha20Poly1305,
}

enum CipherImpl {
    Aes(Box<Aes256Gcm>),
    ChaCha(ChaCha20Poly1305),
}

/// A keyed cipher bound to one stream's nonce prefix
pub(crate) struct ChunkCipher {
    inner: CipherImpl,
    prefix: [u8; NONCE_PREFIX_LEN],
}

impl ChunkCipher {
    pub(crate) fn new(algo: Algorithm, key: &StreamKey, prefix: [u8; NONCE_PREFIX_LEN]) -> Self {
        let inner = match algo {
            Algorithm::AesGcm256 => CipherImpl::Aes(Box::new(Aes256Gcm::new(
                aes_gcm::Key::<Aes256Gcm>::from_slice(&key.0),
            ))),
            Algorithm::ChaCha20Poly1305 => CipherImpl::ChaCha(ChaCha20Poly1305::new(
                chacha20poly1305::Key::from_slice(&key.0),
            )),
        };
        Self { inner, prefix }
    }

    fn nonce(&self, counter: u32, last: bool) -> [u8; 12] {
        let mut nonce = [0u8; 12];
        nonce[..NONCE_PREFIX_LEN].copy_from_slice(&self.prefix);
        nonce[NONCE_PREFIX_LEN..11].copy_from_slice(&counter.to_be_bytes());
        nonce[11] = u8::from(last);
        nonce
    }

    pub(crate) fn seal(&self, counter: u32, last: bool, plaintext: &[u8]) -> Result<Vec<u8>> {
        let nonce = self.nonce(counter, last);
        let sealed = match &self.inner {
            CipherImpl::Aes(cipher) => cipher.encrypt(aes_gcm::Nonce::from_slice(&nonce), plaintext),
            CipherImpl::ChaCha(cipher) => {
                cipher.encrypt(chacha20poly1305::Nonce::from_slice(&nonce), plaintext)
            }
        };
        sealed.map_err(|_| Error::Io(io::Error::new(io::ErrorKind::Other, "chunk encryption failed")))
    }

    pub(crate) fn open(&self, counter: u32, last: bool, sealed: &[u8]) -> Result<Vec<u8>> {
        let nonce = self.nonce(counter, last);
        let opened = match &self.inner {
            CipherImpl::Aes(cipher) => cipher.decrypt(aes_gcm::Nonce::from_slice(&nonce), sealed),
            CipherImpl::ChaCha(cipher) => {
                cipher.decrypt(chacha20poly1305::Nonce::from_slice(&nonce), sealed)
            }
        };
        opened.map_err(|_| {
            Error::DecryptionFailed(format!("chunk {counter} failed authentication"))
        })
    }
}

/// Encrypting writer: buffers one chunk of plaintext at a time
pub(crate) struct SealWriter<W: Write> {
    inner: W,
    cipher: ChunkCipher,
    chunk_size: usize,
    buf: Vec<u8>,
    counter: u32,
}

impl<W: Write> SealWriter<W> {
    pub(crate) fn new(inner: W, cipher: ChunkCipher, chunk_size: usize) -> Self {
        Self {
            inner,
            cipher,
            chunk_size,
            buf: Vec::with_capacity(chunk_size),
            counter: 0,
        }
    }

    fn seal_buffered(&mut self, last: bool) -> Result<()> {
        let sealed = self.cipher.seal(self.counter, last, &self.buf)?;
        self.inner.write_all(&sealed)?;
        self.buf.clear();
        self.counter = self
            .counter
            .checked_add(1)
            .ok_or_else(|| Error::Io(io::Error::new(io::ErrorKind::Other, "stream too long")))?;
        Ok(())
    }

    /// Seal the final chunk and hand back the inner writer
    pub(crate) fn finish(mut self) -> Result<W> {
        self.seal_buffered(true)?;
        self.inner.flush()?;
        Ok(self.inner)
    }
}

impl<W: Write> Write for SealWriter<W> {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        let mut written = 0;
        while written < data.len() {
            // A full chunk is only sealed once more data proves it is not the last.
            if self.buf.len() == self.chunk_size {
                self.seal_buffered(false).map_err(Error::into_io)?;
            }
            let take = (self.chunk_size - self.buf.len()).min(data.len() - written);
            self.buf.extend_from_slice(&data[written..written + take]);
            written += take;
        }
        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Decrypting reader: opens one chunk at a time
pub(crate) struct OpenReader<R: Read> {
    inner: R,
    cipher: ChunkCipher,
    chunk_size: usize,
    plain: Vec<u8>,
    pos: usize,
    counter: u32,
    lookahead: Option<u8>,
    done: bool,
}

impl<R: Read> OpenReader<R> {
    /// Build a reader and authenticate the first chunk immediately, so a
    /// wrong passphrase is reported before any plaintext is consumed.
    pub(crate) fn open(inner: R, cipher: ChunkCipher, chunk_size: usize) -> Result<Self> {
        let mut reader = Self {
            inner,
            cipher,
            chunk_size,
            plain: Vec::new(),
            pos: 0,
            counter: 0,
            lookahead: None,
            done: false,
        };
        reader.next_chunk()?;
        Ok(reader)
    }

    fn next_chunk(&mut self) -> Result<()> {
        let sealed_len = self.chunk_size + TAG_LEN;
        let mut sealed = Vec::with_capacity(sealed_len + 1);
        if let Some(byte) = self.lookahead.take() {
            sealed.push(byte);
        }

        // Read one byte past a full chunk to learn whether another follows.
        let want = (sealed_len + 1 - sealed.len()) as u64;
        (&mut self.inner).take(want).read_to_end(&mut sealed)?;

        let last = sealed.len() <= sealed_len;
        if !last {
            self.lookahead = sealed.pop();
        }
        if sealed.len() < TAG_LEN {
            return Err(Error::DecryptionFailed(format!(
                "stream truncated at chunk {}",
                self.counter
            )));
        }

        self.plain = self.cipher.open(self.counter, last, &sealed)?;
        self.pos = 0;
        self.counter = self
            .counter
            .checked_add(1)
            .ok_or_else(|| Error::DecryptionFailed("chunk counter overflow".into()))?;
        self.done = last;
        Ok(())
    }
}

impl<R: Read> Read for OpenReader<R> {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        if out.is_empty() {
            return Ok(0);
        }
        loop {
            if self.pos < self.plain.len() {
                let n = (self.plain.len() - self.pos).min(out.len());
                out[..n].copy_from_slice(&self.plain[self.pos..self.pos + n]);
                self.pos += n;
                return Ok(n);
            }
            if self.done {
                return Ok(0);
            }
            self.next_chunk().map_err(Error::into_io)?;
        }
    }
}
