//! Codec abstraction
//!
//! A codec wraps a byte sink or source with passphrase-based authenticated
//! encryption. Two variants exist:
//!
//! - [`ArmoredCodec`]: AES-256-GCM chunks inside an ASCII armor envelope
//! - [`ResistantCodec`]: ChaCha20-Poly1305 chunks spread over Reed-Solomon
//!   blocks, so isolated damage is repaired on read
//!
//! Archives and the seen ledger are both stored through a codec.

pub mod armor;
pub mod key;
pub mod resist;
pub mod stream;

pub use armor::ArmoredCodec;
pub use resist::{ResistParams, ResistantCodec};

use crate::error::Result;
use armor::{ArmorReader, ArmorWriter};
use resist::{ResistReader, ResistWriter};
use serde::{Deserialize, Serialize};
use std::io::{self, Read, Seek, Write};

/// Codec selector as written in job files
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CodecKind {
    #[default]
    Armored,
    Resistant,
}

impl CodecKind {
    /// Build the codec for this kind
    pub fn with_passphrase(self, passphrase: &str) -> Codec {
        match self {
            CodecKind::Armored => Codec::armored(passphrase),
            CodecKind::Resistant => Codec::resistant(passphrase),
        }
    }
}

/// A configured codec
#[derive(Debug, Clone)]
pub enum Codec {
    Armored(ArmoredCodec),
    Resistant(ResistantCodec),
}

impl Codec {
    pub fn armored(passphrase: &str) -> Self {
        Codec::Armored(ArmoredCodec::new(passphrase))
    }

    pub fn resistant(passphrase: &str) -> Self {
        Codec::Resistant(ResistantCodec::new(passphrase))
    }

    pub fn kind(&self) -> CodecKind {
        match self {
            Codec::Armored(_) => CodecKind::Armored,
            Codec::Resistant(_) => CodecKind::Resistant,
        }
    }

    /// File name suffix of archives written with this codec
    pub fn archive_suffix(&self) -> &'static str {
        match self {
            Codec::Armored(_) => ".tar.gz.asc",
            Codec::Resistant(_) => ".tar.gz.ksr",
        }
    }

    pub fn wrap_writer<W: Write + Seek>(&self, sink: W) -> Result<CodecWriter<W>> {
        Ok(match self {
            Codec::Armored(codec) => CodecWriter::Armored(codec.wrap_writer(sink)?),
            Codec::Resistant(codec) => CodecWriter::Resistant(codec.wrap_writer(sink)?),
        })
    }

    /// Wrap a source for decoding
    ///
    /// The first chunk is authenticated here, so a wrong passphrase or a
    /// foreign file is reported before any plaintext is handed out.
    pub fn wrap_reader<R: Read + Seek>(&self, source: R) -> Result<CodecReader<R>> {
        Ok(match self {
            Codec::Armored(codec) => CodecReader::Armored(codec.wrap_reader(source)?),
            Codec::Resistant(codec) => CodecReader::Resistant(codec.wrap_reader(source)?),
        })
    }
}

/// Encoding half of a codec
pub enum CodecWriter<W: Write + Seek> {
    Armored(ArmorWriter<W>),
    Resistant(ResistWriter<W>),
}

impl<W: Write + Seek> CodecWriter<W> {
    /// Seal the final chunk, close the framing and return the sink
    ///
    /// Dropping a writer without calling `finish` leaves an incomplete
    /// stream that will fail to decode.
    pub fn finish(self) -> Result<W> {
        match self {
            CodecWriter::Armored(writer) => writer.finish(),
            CodecWriter::Resistant(writer) => writer.finish(),
        }
    }
}

impl<W: Write + Seek> Write for CodecWriter<W> {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        match self {
            CodecWriter::Armored(writer) => writer.write(data),
            CodecWriter::Resistant(writer) => writer.write(data),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            CodecWriter::Armored(writer) => writer.flush(),
            CodecWriter::Resistant(writer) => writer.flush(),
        }
    }
}

/// Decoding half of a codec
pub enum CodecReader<R: Read + Seek> {
    Armored(ArmorReader<R>),
    Resistant(ResistReader<R>),
}

impl<R: Read + Seek> Read for CodecReader<R> {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        match self {
            CodecReader::Armored(reader) => reader.read(out),
            CodecReader::Resistant(reader) => reader.read(out),
        }
    }
}
