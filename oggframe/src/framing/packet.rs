//! Logical packets exchanged with the codec layer.

/// Granule position of a segment that does not end a packet.
pub const NO_GRANULEPOS: i64 = -1;

/// Borrowed packet.
///
/// Packets returned by [`StreamState::packetout`](crate::framing::stream::StreamState::packetout)
/// point into the stream's body buffer and stay valid until the next
/// mutating call on that stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Packet<'a> {
    pub data: &'a [u8],
    /// First packet of the logical stream.
    pub bos: bool,
    /// Last packet of the logical stream.
    pub eos: bool,
    pub granulepos: i64,
    /// Sequence number; gaps in the physical stream still advance it.
    pub packetno: i64,
}

impl<'a> Packet<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            bos: false,
            eos: false,
            granulepos: NO_GRANULEPOS,
            packetno: 0,
        }
    }

    pub fn with_granulepos(mut self, granulepos: i64) -> Self {
        self.granulepos = granulepos;
        self
    }

    pub fn with_bos(mut self, bos: bool) -> Self {
        self.bos = bos;
        self
    }

    pub fn with_eos(mut self, eos: bool) -> Self {
        self.eos = eos;
        self
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn to_owned_packet(&self) -> OwnedPacket {
        OwnedPacket {
            data: self.data.to_vec(),
            bos: self.bos,
            eos: self.eos,
            granulepos: self.granulepos,
            packetno: self.packetno,
        }
    }
}

impl AsRef<[u8]> for Packet<'_> {
    fn as_ref(&self) -> &[u8] {
        self.data
    }
}

/// Packet detached from the stream buffer it was read from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnedPacket {
    pub data: Vec<u8>,
    pub bos: bool,
    pub eos: bool,
    pub granulepos: i64,
    pub packetno: i64,
}

impl OwnedPacket {
    pub fn as_packet(&self) -> Packet<'_> {
        Packet {
            data: &self.data,
            bos: self.bos,
            eos: self.eos,
            granulepos: self.granulepos,
            packetno: self.packetno,
        }
    }
}

impl AsRef<[u8]> for OwnedPacket {
    fn as_ref(&self) -> &[u8] {
        &self.data
    }
}
