//! Symmetric, ASCII-armored codec
//!
//! ```text
//! -----BEGIN KEEPSAKE MESSAGE-----
//! Comment: keepsake
//!
//! <base64, 64 columns>
//! -----END KEEPSAKE MESSAGE-----
//! ```
//!
//! The base64 body is a binary header followed by AES-256-GCM chunks:
//!
//! | field        | size |
//! |--------------|------|
//! | magic `KSA1` | 4    |
//! | mode         | 1    |
//! | s2k count    | 1    |
//! | salt         | 16   |
//! | nonce prefix | 7    |
//! | chunk size   | 4 BE |

use super::key::{derive_key, random_bytes, Passphrase, DEFAULT_S2K_COUNT, SALT_LEN};
use super::stream::{
    Algorithm, ChunkCipher, OpenReader, SealWriter, DEFAULT_CHUNK_SIZE, MAX_CHUNK_SIZE,
    NONCE_PREFIX_LEN,
};
use crate::error::{Error, Result};
use base64::engine::general_purpose::{GeneralPurpose, STANDARD};
use base64::read::DecoderReader;
use base64::write::EncoderWriter;
use std::io::{self, BufRead, BufReader, Read, Write};

/// Armor type tag; decoding rejects any other tag
pub const ARMOR_TYPE: &str = "KEEPSAKE MESSAGE";

const MAGIC: &[u8; 4] = b"KSA1";
const LINE_WIDTH: usize = 64;
const HEADER_LEN: usize = 4 + 1 + 1 + SALT_LEN + NONCE_PREFIX_LEN + 4;

/// How the body is protected
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageMode {
    /// Plain literal data
    Literal = 0,
    /// Passphrase-encrypted
    Symmetric = 1,
    /// Encrypted to a public key
    PublicKey = 2,
}

impl MessageMode {
    fn from_byte(byte: u8) -> Result<Self> {
        match byte {
            0 => Ok(Self::Literal),
            1 => Ok(Self::Symmetric),
            2 => Ok(Self::PublicKey),
            other => Err(Error::FormatMismatch(format!("unknown message mode {other}"))),
        }
    }
}

/// Passphrase-encrypted, ASCII-armored codec
#[derive(Debug, Clone)]
pub struct ArmoredCodec {
    passphrase: Passphrase,
    chunk_size: usize,
}

impl ArmoredCodec {
    pub fn new(passphrase: &str) -> Self {
        Self {
            passphrase: Passphrase::new(passphrase),
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }

    /// Override the plaintext chunk size used for new streams
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.clamp(1, MAX_CHUNK_SIZE);
        self
    }

    pub fn wrap_writer<W: Write>(&self, mut sink: W) -> Result<ArmorWriter<W>> {
        write!(sink, "-----BEGIN {ARMOR_TYPE}-----\nComment: keepsake\n\n")?;

        let salt: [u8; SALT_LEN] = random_bytes();
        let prefix: [u8; NONCE_PREFIX_LEN] = random_bytes();

        let mut header = Vec::with_capacity(HEADER_LEN);
        header.extend_from_slice(MAGIC);
        header.push(MessageMode::Symmetric as u8);
        header.push(DEFAULT_S2K_COUNT);
        header.extend_from_slice(&salt);
        header.extend_from_slice(&prefix);
        header.extend_from_slice(&(self.chunk_size as u32).to_be_bytes());

        let mut body = EncoderWriter::new(LineWrap::new(sink), &STANDARD);
        body.write_all(&header)?;

        let key = derive_key(&self.passphrase, &salt, DEFAULT_S2K_COUNT);
        let cipher = ChunkCipher::new(Algorithm::AesGcm256, &key, prefix);
        Ok(ArmorWriter {
            seal: SealWriter::new(body, cipher, self.chunk_size),
        })
    }

    pub fn wrap_reader<R: Read>(&self, source: R) -> Result<ArmorReader<R>> {
        let mut lines = BufReader::new(source);
        let armor_type = read_begin_line(&mut lines)?;
        if armor_type != ARMOR_TYPE {
            return Err(Error::FormatMismatch(format!(
                "unexpected armor type {armor_type:?}"
            )));
        }
        skip_armor_headers(&mut lines)?;

        let mut body = DecoderReader::new(ArmorBody::new(lines), &STANDARD);
        let mut header = [0u8; HEADER_LEN];
        body.read_exact(&mut header).map_err(|e| match e.kind() {
            io::ErrorKind::UnexpectedEof => Error::FormatMismatch("armor body too short".into()),
            _ => Error::from(e),
        })?;

        if &header[..4] != MAGIC {
            return Err(Error::FormatMismatch("bad message magic".into()));
        }
        match MessageMode::from_byte(header[4])? {
            MessageMode::Symmetric => {}
            MessageMode::Literal => {
                return Err(Error::UnsupportedMessage("message is not encrypted".into()))
            }
            MessageMode::PublicKey => {
                return Err(Error::UnsupportedMessage(
                    "expected symmetric encryption".into(),
                ))
            }
        }

        let coded_count = header[5];
        let mut salt = [0u8; SALT_LEN];
        salt.copy_from_slice(&header[6..6 + SALT_LEN]);
        let mut prefix = [0u8; NONCE_PREFIX_LEN];
        prefix.copy_from_slice(&header[6 + SALT_LEN..6 + SALT_LEN + NONCE_PREFIX_LEN]);
        let chunk_size = u32::from_be_bytes([
            header[HEADER_LEN - 4],
            header[HEADER_LEN - 3],
            header[HEADER_LEN - 2],
            header[HEADER_LEN - 1],
        ]) as usize;
        if chunk_size == 0 || chunk_size > MAX_CHUNK_SIZE {
            return Err(Error::FormatMismatch(format!("bad chunk size {chunk_size}")));
        }

        let key = derive_key(&self.passphrase, &salt, coded_count);
        let cipher = ChunkCipher::new(Algorithm::AesGcm256, &key, prefix);
        Ok(ArmorReader {
            open: OpenReader::open(body, cipher, chunk_size)?,
        })
    }
}

fn read_begin_line<B: BufRead>(lines: &mut B) -> Result<String> {
    let mut raw = Vec::new();
    loop {
        raw.clear();
        // Binary input must surface as a format mismatch, not a UTF-8 error.
        if lines.by_ref().take(256).read_until(b'\n', &mut raw)? == 0 {
            return Err(Error::FormatMismatch("missing armor header".into()));
        }
        let line = String::from_utf8_lossy(&raw);
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        return trimmed
            .strip_prefix("-----BEGIN ")
            .and_then(|rest| rest.strip_suffix("-----"))
            .map(str::to_string)
            .ok_or_else(|| Error::FormatMismatch("missing armor header".into()));
    }
}

fn skip_armor_headers<B: BufRead>(lines: &mut B) -> Result<()> {
    let mut raw = Vec::new();
    loop {
        raw.clear();
        if lines.read_until(b'\n', &mut raw)? == 0 {
            return Err(Error::FormatMismatch("truncated armor headers".into()));
        }
        if armor_text(&raw)?.trim().is_empty() {
            return Ok(());
        }
    }
}

/// One armor line as text; armor is ASCII, so anything else is not ours
fn armor_text(raw: &[u8]) -> Result<&str> {
    std::str::from_utf8(raw).map_err(|_| Error::FormatMismatch("armor contains non-text bytes".into()))
}

fn is_base64_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '+' | '/' | '=') || c.is_ascii_whitespace()
}

/// Inserts a newline every [`LINE_WIDTH`] base64 characters
pub struct LineWrap<W: Write> {
    inner: W,
    column: usize,
}

impl<W: Write> LineWrap<W> {
    fn new(inner: W) -> Self {
        Self { inner, column: 0 }
    }

    fn finish(mut self) -> io::Result<W> {
        if self.column > 0 {
            self.inner.write_all(b"\n")?;
        }
        write!(self.inner, "-----END {ARMOR_TYPE}-----\n")?;
        self.inner.flush()?;
        Ok(self.inner)
    }
}

impl<W: Write> Write for LineWrap<W> {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        let mut rest = data;
        while !rest.is_empty() {
            let take = (LINE_WIDTH - self.column).min(rest.len());
            self.inner.write_all(&rest[..take])?;
            self.column += take;
            rest = &rest[take..];
            if self.column == LINE_WIDTH {
                self.inner.write_all(b"\n")?;
                self.column = 0;
            }
        }
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Yields the base64 characters between the armor headers and the END line
pub struct ArmorBody<B: BufRead> {
    lines: B,
    pending: Vec<u8>,
    pos: usize,
    ended: bool,
}

impl<B: BufRead> ArmorBody<B> {
    fn new(lines: B) -> Self {
        Self {
            lines,
            pending: Vec::new(),
            pos: 0,
            ended: false,
        }
    }

    fn refill(&mut self) -> Result<()> {
        let mut raw = Vec::new();
        while self.pos >= self.pending.len() && !self.ended {
            raw.clear();
            if self.lines.read_until(b'\n', &mut raw)? == 0 {
                return Err(Error::FormatMismatch("armor END line missing".into()));
            }
            let trimmed = armor_text(&raw)?.trim();
            if let Some(rest) = trimmed.strip_prefix("-----END ") {
                if rest.strip_suffix("-----") != Some(ARMOR_TYPE) {
                    return Err(Error::FormatMismatch(format!("mismatched armor END line {trimmed:?}")));
                }
                self.ended = true;
            } else if let Some(bad) = trimmed.chars().find(|c| !is_base64_char(*c)) {
                return Err(Error::FormatMismatch(format!("unexpected {bad:?} in armor body")));
            } else {
                self.pending.clear();
                self.pending.extend(trimmed.bytes().filter(|b| !b.is_ascii_whitespace()));
                self.pos = 0;
            }
        }
        Ok(())
    }
}

impl<B: BufRead> Read for ArmorBody<B> {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        self.refill().map_err(Error::into_io)?;
        let n = (self.pending.len() - self.pos).min(out.len());
        out[..n].copy_from_slice(&self.pending[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

type BodyEncoder<W> = EncoderWriter<'static, GeneralPurpose, LineWrap<W>>;
type BodyDecoder<R> = DecoderReader<'static, GeneralPurpose, ArmorBody<BufReader<R>>>;

/// Writer half of the armored codec
pub struct ArmorWriter<W: Write> {
    seal: SealWriter<BodyEncoder<W>>,
}

impl<W: Write> ArmorWriter<W> {
    /// Seal the last chunk, close the base64 body and write the END line
    pub fn finish(self) -> Result<W> {
        let mut body = self.seal.finish()?;
        let wrap = body.finish()?;
        Ok(wrap.finish()?)
    }
}

impl<W: Write> Write for ArmorWriter<W> {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.seal.write(data)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.seal.flush()
    }
}

/// Reader half of the armored codec
pub struct ArmorReader<R: Read> {
    open: OpenReader<BodyDecoder<R>>,
}

impl<R: Read> Read for ArmorReader<R> {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        self.open.read(out)
    }
}
