//! Codec identification from the first packet of a logical stream.
//!
//! Every Ogg mapping starts its stream with an identification header that
//! begins with a fixed magic. [`probe`] matches the magic and, where the
//! header carries them, reads the channel count and sample rate.

use std::fmt::Display;
use std::io::{self, Cursor};

use bitstream_io::{BigEndian, BitRead, BitReader, Endianness, LittleEndian};

use crate::utils::errors::ProbeError;

const VORBIS_MAGIC: &[u8] = b"\x01vorbis";
const OPUS_MAGIC: &[u8] = b"OpusHead";
const FLAC_MAGIC: &[u8] = b"\x7fFLAC";
const THEORA_MAGIC: &[u8] = b"\x80theora";
const SPEEX_MAGIC: &[u8] = b"Speex   ";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Codec {
    Vorbis,
    Opus,
    Flac,
    Theora,
    Speex,
    Unknown,
}

impl Codec {
    /// Matches the identification magic at the start of a packet.
    pub fn detect(packet: &[u8]) -> Self {
        [
            (VORBIS_MAGIC, Codec::Vorbis),
            (OPUS_MAGIC, Codec::Opus),
            (FLAC_MAGIC, Codec::Flac),
            (THEORA_MAGIC, Codec::Theora),
            (SPEEX_MAGIC, Codec::Speex),
        ]
        .into_iter()
        .find(|(magic, _)| packet.starts_with(magic))
        .map_or(Codec::Unknown, |(_, codec)| codec)
    }
}

impl Display for Codec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Codec::Vorbis => write!(f, "Vorbis"),
            Codec::Opus => write!(f, "Opus"),
            Codec::Flac => write!(f, "FLAC"),
            Codec::Theora => write!(f, "Theora"),
            Codec::Speex => write!(f, "Speex"),
            Codec::Unknown => write!(f, "Unknown"),
        }
    }
}

/// Fields read from an identification header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamHeader {
    pub codec: Codec,
    pub channels: Option<u8>,
    pub sample_rate: Option<u32>,
    /// Opus only: samples to discard at the start of decoding.
    pub pre_skip: Option<u16>,
}

impl StreamHeader {
    fn bare(codec: Codec) -> Self {
        Self {
            codec,
            channels: None,
            sample_rate: None,
            pre_skip: None,
        }
    }
}

/// Identifies the codec of a logical stream from its first packet.
///
/// Unrecognized packets yield [`Codec::Unknown`]. A recognized magic
/// followed by a header too short for its fields is
/// [`ProbeError::Truncated`].
///
/// ```rust
/// use oggframe::process::probe::{Codec, probe};
///
/// let mut head = b"OpusHead".to_vec();
/// head.extend_from_slice(&[1, 2, 0x38, 0x01, 0x80, 0xBB, 0, 0, 0, 0, 0]);
///
/// let header = probe(&head)?;
/// assert_eq!(header.codec, Codec::Opus);
/// assert_eq!(header.channels, Some(2));
/// assert_eq!(header.sample_rate, Some(48000));
/// # Ok::<(), oggframe::utils::errors::ProbeError>(())
/// ```
pub fn probe(packet: &[u8]) -> Result<StreamHeader, ProbeError> {
    let codec = Codec::detect(packet);
    let header = match codec {
        Codec::Vorbis => parse_vorbis(&packet[VORBIS_MAGIC.len()..]),
        Codec::Opus => parse_opus(&packet[OPUS_MAGIC.len()..]),
        Codec::Flac => parse_flac(&packet[FLAC_MAGIC.len()..]),
        Codec::Speex => parse_speex(&packet[SPEEX_MAGIC.len()..]),
        Codec::Theora | Codec::Unknown => Ok(StreamHeader::bare(codec)),
    };

    header.map_err(|e| match e {
        ProbeError::Io(e) if e.kind() == io::ErrorKind::UnexpectedEof => ProbeError::Truncated,
        e => e,
    })
}

fn reader<E: Endianness>(data: &[u8]) -> BitReader<Cursor<&[u8]>, E> {
    BitReader::new(Cursor::new(data))
}

fn invalid(msg: &str) -> ProbeError {
    ProbeError::Io(io::Error::new(io::ErrorKind::InvalidData, msg.to_string()))
}

fn parse_vorbis(data: &[u8]) -> Result<StreamHeader, ProbeError> {
    let mut bs = reader::<LittleEndian>(data);

    let version: u32 = bs.read_unsigned_var(32)?;
    let channels: u8 = bs.read_unsigned_var(8)?;
    let sample_rate: u32 = bs.read_unsigned_var(32)?;
    // Maximum, nominal and minimum bitrate.
    bs.skip(96)?;
    let blocksize_0: u8 = bs.read_unsigned_var(4)?;
    let blocksize_1: u8 = bs.read_unsigned_var(4)?;
    let framing = bs.read_bit()?;

    if version != 0 {
        return Err(invalid("Vorbis version is not 0"));
    }
    if channels == 0 || sample_rate == 0 {
        return Err(invalid("Vorbis header has no channels or sample rate"));
    }
    if !(6..=13).contains(&blocksize_0) || !(6..=13).contains(&blocksize_1) {
        return Err(invalid("Vorbis block sizes out of range"));
    }
    if blocksize_0 > blocksize_1 {
        return Err(invalid("Vorbis short block larger than long block"));
    }
    if !framing {
        return Err(invalid("Vorbis framing bit not set"));
    }

    Ok(StreamHeader {
        channels: Some(channels),
        sample_rate: Some(sample_rate),
        ..StreamHeader::bare(Codec::Vorbis)
    })
}

fn parse_opus(data: &[u8]) -> Result<StreamHeader, ProbeError> {
    let mut bs = reader::<LittleEndian>(data);

    let version: u8 = bs.read_unsigned_var(8)?;
    let channels: u8 = bs.read_unsigned_var(8)?;
    let pre_skip: u16 = bs.read_unsigned_var(16)?;
    let sample_rate: u32 = bs.read_unsigned_var(32)?;
    // Output gain and channel mapping family.
    bs.skip(24)?;

    // Minor versions are compatible; major version 0 is the only one defined.
    if version >> 4 != 0 {
        return Err(invalid("Unsupported Opus major version"));
    }
    if channels == 0 {
        return Err(invalid("Opus header has no channels"));
    }

    Ok(StreamHeader {
        channels: Some(channels),
        sample_rate: Some(sample_rate),
        pre_skip: Some(pre_skip),
        ..StreamHeader::bare(Codec::Opus)
    })
}

fn parse_flac(data: &[u8]) -> Result<StreamHeader, ProbeError> {
    let mut bs = reader::<BigEndian>(data);

    // Mapping version and header packet count.
    bs.skip(32)?;
    let mut native = [0u8; 4];
    bs.read_bytes(&mut native)?;
    if &native != b"fLaC" {
        return Err(invalid("FLAC mapping without native signature"));
    }

    let block_type: u8 = bs.read_unsigned_var(8)?;
    if block_type & 0x7F != 0 {
        return Err(invalid("First FLAC metadata block is not STREAMINFO"));
    }
    // Block length, block sizes and frame sizes.
    bs.skip(24 + 32 + 48)?;
    let sample_rate: u32 = bs.read_unsigned_var(20)?;
    let channels: u8 = bs.read_unsigned_var(3)?;

    Ok(StreamHeader {
        channels: Some(channels + 1),
        sample_rate: Some(sample_rate),
        ..StreamHeader::bare(Codec::Flac)
    })
}

fn parse_speex(data: &[u8]) -> Result<StreamHeader, ProbeError> {
    let mut bs = reader::<LittleEndian>(data);

    // Version string, version id and header size.
    bs.skip((20 + 4 + 4) * 8)?;
    let sample_rate: u32 = bs.read_unsigned_var(32)?;
    // Mode and mode bitstream version.
    bs.skip(64)?;
    let channels: u32 = bs.read_unsigned_var(32)?;

    let channels = u8::try_from(channels)
        .ok()
        .filter(|&channels| channels > 0)
        .ok_or_else(|| invalid("Speex channel count out of range"))?;

    Ok(StreamHeader {
        channels: Some(channels),
        sample_rate: Some(sample_rate),
        ..StreamHeader::bare(Codec::Speex)
    })
}
