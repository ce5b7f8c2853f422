//! Error-resistant binary codec
//!
//! ChaCha20-Poly1305 chunks are spread over Reed-Solomon protected blocks.
//! Every block holds `data_shards` data shards and `parity_shards` parity
//! shards; each shard carries a 4-byte BLAKE3 checksum so damaged shards are
//! treated as erasures and rebuilt on read. The stream header is stored three
//! times, each copy with its own checksum.
//!
//! Layout:
//!
//! ```text
//! header x3 | block 0 | block 1 | ...
//! block    = (shard || checksum[4]) x (data_shards + parity_shards)
//! ```

use super::key::{derive_key, random_bytes, Passphrase, DEFAULT_S2K_COUNT, SALT_LEN};
use super::stream::{
    Algorithm, ChunkCipher, OpenReader, SealWriter, DEFAULT_CHUNK_SIZE, MAX_CHUNK_SIZE,
    NONCE_PREFIX_LEN,
};
use crate::error::{Error, Result};
use reed_solomon_erasure::galois_8::ReedSolomon;
use std::io::{self, Read, Seek, SeekFrom, Write};
use tracing::{debug, warn};

const MAGIC: &[u8; 4] = b"KSR1";
const HEADER_COPIES: usize = 3;
const HEADER_CHECKSUM_LEN: usize = 8;
const SHARD_CHECKSUM_LEN: usize = 4;
const HEADER_BODY_LEN: usize = 4 // magic
    + 1 // s2k count
    + SALT_LEN
    + NONCE_PREFIX_LEN
    + 4 // chunk size
    + 4 // shard size
    + 1 // data shards
    + 1 // parity shards
    + 8; // payload length
const HEADER_LEN: usize = HEADER_BODY_LEN + HEADER_CHECKSUM_LEN;

/// Reed-Solomon shape of an error-resistant stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResistParams {
    /// Bytes per shard, excluding its checksum
    pub shard_size: usize,
    pub data_shards: usize,
    pub parity_shards: usize,
}

impl Default for ResistParams {
    fn default() -> Self {
        Self {
            shard_size: 508,
            data_shards: 8,
            parity_shards: 1,
        }
    }
}

impl ResistParams {
    pub fn validate(&self) -> Result<()> {
        if self.shard_size == 0 || self.shard_size > u32::MAX as usize {
            return Err(Error::FormatMismatch(format!("bad shard size {}", self.shard_size)));
        }
        if self.data_shards == 0 || self.parity_shards == 0 {
            return Err(Error::FormatMismatch("shard counts must be positive".into()));
        }
        if self.data_shards + self.parity_shards > 256 {
            return Err(Error::FormatMismatch("more than 256 shards per block".into()));
        }
        Ok(())
    }

    fn block_data_len(&self) -> usize {
        self.shard_size * self.data_shards
    }

    fn block_stored_len(&self) -> usize {
        (self.shard_size + SHARD_CHECKSUM_LEN) * (self.data_shards + self.parity_shards)
    }

    fn encoder(&self) -> Result<ReedSolomon> {
        ReedSolomon::new(self.data_shards, self.parity_shards)
            .map_err(|e| Error::FormatMismatch(format!("reed-solomon setup: {e:?}")))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct StreamHeader {
    s2k_count: u8,
    salt: [u8; SALT_LEN],
    prefix: [u8; NONCE_PREFIX_LEN],
    chunk_size: usize,
    params: ResistParams,
    payload_len: u64,
}

impl StreamHeader {
    fn encode(&self) -> [u8; HEADER_LEN] {
        let mut out = [0u8; HEADER_LEN];
        let mut at = 0;
        let mut put = |bytes: &[u8]| {
            out[at..at + bytes.len()].copy_from_slice(bytes);
            at += bytes.len();
        };
        put(MAGIC);
        put(&[self.s2k_count]);
        put(&self.salt);
        put(&self.prefix);
        put(&(self.chunk_size as u32).to_be_bytes());
        put(&(self.params.shard_size as u32).to_be_bytes());
        put(&[(self.params.data_shards - 1) as u8]);
        put(&[(self.params.parity_shards - 1) as u8]);
        put(&self.payload_len.to_be_bytes());

        let digest = blake3::hash(&out[..HEADER_BODY_LEN]);
        out[HEADER_BODY_LEN..].copy_from_slice(&digest.as_bytes()[..HEADER_CHECKSUM_LEN]);
        out
    }

    /// Decode one header copy; `None` when its checksum does not hold
    fn decode(raw: &[u8; HEADER_LEN]) -> Option<Self> {
        let digest = blake3::hash(&raw[..HEADER_BODY_LEN]);
        if raw[HEADER_BODY_LEN..] != digest.as_bytes()[..HEADER_CHECKSUM_LEN] || &raw[..4] != MAGIC {
            return None;
        }

        let mut at = 4;
        let mut take = |n: usize| field(raw, &mut at, n);
        let s2k_count = take(1)[0];
        let mut salt = [0u8; SALT_LEN];
        salt.copy_from_slice(take(SALT_LEN));
        let mut prefix = [0u8; NONCE_PREFIX_LEN];
        prefix.copy_from_slice(take(NONCE_PREFIX_LEN));
        let chunk_size = be_u32(take(4)) as usize;
        let shard_size = be_u32(take(4)) as usize;
        let data_shards = take(1)[0] as usize + 1;
        let parity_shards = take(1)[0] as usize + 1;
        let mut len = [0u8; 8];
        len.copy_from_slice(take(8));

        Some(Self {
            s2k_count,
            salt,
            prefix,
            chunk_size,
            params: ResistParams {
                shard_size,
                data_shards,
                parity_shards,
            },
            payload_len: u64::from_be_bytes(len),
        })
    }
}

fn field<'a>(raw: &'a [u8], at: &mut usize, n: usize) -> &'a [u8] {
    let start = *at;
    *at += n;
    &raw[start..start + n]
}

fn be_u32(bytes: &[u8]) -> u32 {
    u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

fn shard_checksum(shard: &[u8]) -> [u8; SHARD_CHECKSUM_LEN] {
    let digest = blake3::hash(shard);
    let mut out = [0u8; SHARD_CHECKSUM_LEN];
    out.copy_from_slice(&digest.as_bytes()[..SHARD_CHECKSUM_LEN]);
    out
}

/// Passphrase-encrypted codec with forward error correction
#[derive(Debug, Clone)]
pub struct ResistantCodec {
    passphrase: Passphrase,
    params: ResistParams,
    chunk_size: usize,
}

impl ResistantCodec {
    pub fn new(passphrase: &str) -> Self {
        Self {
            passphrase: Passphrase::new(passphrase),
            params: ResistParams::default(),
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }

    pub fn with_params(mut self, params: ResistParams) -> Result<Self> {
        params.validate()?;
        self.params = params;
        Ok(self)
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.clamp(1, MAX_CHUNK_SIZE);
        self
    }

    pub fn wrap_writer<W: Write + Seek>(&self, sink: W) -> Result<ResistWriter<W>> {
        let header = StreamHeader {
            s2k_count: DEFAULT_S2K_COUNT,
            salt: random_bytes(),
            prefix: random_bytes(),
            chunk_size: self.chunk_size,
            params: self.params,
            payload_len: 0,
        };
        let key = derive_key(&self.passphrase, &header.salt, header.s2k_count);
        let cipher = ChunkCipher::new(Algorithm::ChaCha20Poly1305, &key, header.prefix);
        let fec = FecWriter::new(sink, header)?;
        Ok(ResistWriter {
            seal: SealWriter::new(fec, cipher, self.chunk_size),
        })
    }

    pub fn wrap_reader<R: Read + Seek>(&self, source: R) -> Result<ResistReader<R>> {
        let fec = FecReader::open(source)?;
        let header = fec.header.clone();
        let key = derive_key(&self.passphrase, &header.salt, header.s2k_count);
        let cipher = ChunkCipher::new(Algorithm::ChaCha20Poly1305, &key, header.prefix);
        Ok(ResistReader {
            open: OpenReader::open(fec, cipher, header.chunk_size)?,
        })
    }
}

/// Splits ciphertext into protected blocks
pub struct FecWriter<W: Write + Seek> {
    inner: W,
    rs: ReedSolomon,
    header: StreamHeader,
    start: u64,
    block: Vec<u8>,
}

impl<W: Write + Seek> FecWriter<W> {
    fn new(mut inner: W, header: StreamHeader) -> Result<Self> {
        let rs = header.params.encoder()?;
        let start = inner.stream_position()?;
        let encoded = header.encode();
        for _ in 0..HEADER_COPIES {
            inner.write_all(&encoded)?;
        }
        let block = Vec::with_capacity(header.params.block_data_len());
        Ok(Self {
            inner,
            rs,
            header,
            start,
            block,
        })
    }

    fn write_block(&mut self) -> Result<()> {
        let params = self.header.params;
        self.block.resize(params.block_data_len(), 0);

        let mut shards: Vec<Vec<u8>> = self
            .block
            .chunks(params.shard_size)
            .map(<[u8]>::to_vec)
            .collect();
        shards.resize(params.data_shards + params.parity_shards, vec![0u8; params.shard_size]);
        self.rs
            .encode(&mut shards)
            .map_err(|e| Error::Io(io::Error::new(io::ErrorKind::Other, format!("{e:?}"))))?;

        for shard in &shards {
            self.inner.write_all(shard)?;
            self.inner.write_all(&shard_checksum(shard))?;
        }
        self.block.clear();
        Ok(())
    }

    /// Flush the final block and patch the payload length into every header copy
    fn finish(mut self) -> Result<W> {
        if !self.block.is_empty() {
            self.write_block()?;
        }
        let encoded = self.header.encode();
        self.inner.seek(SeekFrom::Start(self.start))?;
        for _ in 0..HEADER_COPIES {
            self.inner.write_all(&encoded)?;
        }
        self.inner.seek(SeekFrom::End(0))?;
        self.inner.flush()?;
        Ok(self.inner)
    }
}

impl<W: Write + Seek> Write for FecWriter<W> {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        let block_len = self.header.params.block_data_len();
        let mut rest = data;
        while !rest.is_empty() {
            let take = (block_len - self.block.len()).min(rest.len());
            self.block.extend_from_slice(&rest[..take]);
            rest = &rest[take..];
            self.header.payload_len += take as u64;
            if self.block.len() == block_len {
                self.write_block().map_err(Error::into_io)?;
            }
        }
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Reassembles and repairs protected blocks
pub struct FecReader<R: Read + Seek> {
    inner: R,
    rs: ReedSolomon,
    header: StreamHeader,
    remaining: u64,
    block: Vec<u8>,
    pos: usize,
    block_index: u64,
}

impl<R: Read + Seek> FecReader<R> {
    fn open(mut inner: R) -> Result<Self> {
        let start = inner.stream_position()?;

        let mut chosen = None;
        let mut damaged = 0;
        for _ in 0..HEADER_COPIES {
            let mut raw = [0u8; HEADER_LEN];
            match inner.read_exact(&mut raw) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(e.into()),
            }
            match StreamHeader::decode(&raw) {
                Some(header) if chosen.is_none() => chosen = Some(header),
                Some(_) => {}
                None => damaged += 1,
            }
        }
        let header = chosen
            .ok_or_else(|| Error::FormatMismatch("no intact error-resistant header".into()))?;
        if damaged > 0 {
            warn!(damaged, "recovered stream header from a backup copy");
        }
        header.params.validate()?;
        if header.chunk_size == 0 || header.chunk_size > MAX_CHUNK_SIZE {
            return Err(Error::FormatMismatch(format!(
                "bad chunk size {}",
                header.chunk_size
            )));
        }

        let block_data = header.params.block_data_len() as u64;
        let blocks = header.payload_len.div_ceil(block_data);
        let data_start = start + (HEADER_COPIES * HEADER_LEN) as u64;
        let expected_end = blocks
            .checked_mul(header.params.block_stored_len() as u64)
            .and_then(|stored| stored.checked_add(data_start))
            .ok_or_else(|| {
                Error::FormatMismatch(format!("payload length {} out of range", header.payload_len))
            })?;
        let actual_end = inner.seek(SeekFrom::End(0))?;
        if actual_end < expected_end {
            return Err(Error::DecryptionFailed(format!(
                "stream truncated: {} of {} bytes present",
                actual_end - start,
                expected_end - start
            )));
        }
        inner.seek(SeekFrom::Start(data_start))?;

        debug!(blocks, payload = header.payload_len, "opened error-resistant stream");
        Ok(Self {
            inner,
            rs: header.params.encoder()?,
            remaining: header.payload_len,
            header,
            block: Vec::new(),
            pos: 0,
            block_index: 0,
        })
    }

    fn read_block(&mut self) -> Result<()> {
        let params = self.header.params;
        let total = params.data_shards + params.parity_shards;
        let mut stored = vec![0u8; params.block_stored_len()];
        self.inner.read_exact(&mut stored)?;

        let mut shards: Vec<Option<Vec<u8>>> = stored
            .chunks(params.shard_size + SHARD_CHECKSUM_LEN)
            .map(|raw| {
                let (shard, sum) = raw.split_at(params.shard_size);
                (shard_checksum(shard) == sum).then(|| shard.to_vec())
            })
            .collect();

        let lost = shards.iter().filter(|s| s.is_none()).count();
        if lost > params.parity_shards {
            return Err(Error::DecryptionFailed(format!(
                "block {} has {lost} damaged shards of {total}, only {} recoverable",
                self.block_index, params.parity_shards
            )));
        }
        if lost > 0 {
            self.rs.reconstruct_data(&mut shards).map_err(|e| {
                Error::DecryptionFailed(format!("block {} repair failed: {e:?}", self.block_index))
            })?;
            warn!(block = self.block_index, lost, "repaired damaged shards");
        }

        self.block.clear();
        for shard in shards.into_iter().take(params.data_shards).flatten() {
            self.block.extend_from_slice(&shard);
        }
        let keep = (params.block_data_len() as u64).min(self.remaining) as usize;
        self.block.truncate(keep);
        self.remaining -= keep as u64;
        self.pos = 0;
        self.block_index += 1;
        Ok(())
    }
}

impl<R: Read + Seek> Read for FecReader<R> {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        if self.pos >= self.block.len() {
            if self.remaining == 0 {
                return Ok(0);
            }
            self.read_block().map_err(Error::into_io)?;
        }
        let n = (self.block.len() - self.pos).min(out.len());
        out[..n].copy_from_slice(&self.block[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

/// Writer half of the error-resistant codec
pub struct ResistWriter<W: Write + Seek> {
    seal: SealWriter<FecWriter<W>>,
}

impl<W: Write + Seek> ResistWriter<W> {
    pub fn finish(self) -> Result<W> {
        self.seal.finish()?.finish()
    }
}

impl<W: Write + Seek> Write for ResistWriter<W> {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.seal.write(data)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.seal.flush()
    }
}

/// Reader half of the error-resistant codec
pub struct ResistReader<R: Read + Seek> {
    open: OpenReader<FecReader<R>>,
}

impl<R: Read + Seek> Read for ResistReader<R> {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        self.open.read(out)
    }
}
