use std::collections::BTreeMap;

use log::{Level, debug, trace};

use crate::framing::packet::{NO_GRANULEPOS, OwnedPacket, Packet};
use crate::framing::stream::StreamState;
use crate::framing::sync::SyncState;
use crate::log_or_err;
use crate::utils::errors::{DemuxError, StreamError, SyncError};

/// Splits a physical Ogg stream into the packets of its logical streams.
///
/// Bytes are framed into pages by a [`SyncState`]; each page is routed to the
/// [`StreamState`] for its serial number, created on first sight. Packets come
/// out in page order across streams.
///
/// # Example
///
/// ```rust
/// use oggframe::process::EXAMPLE_DATA;
/// use oggframe::process::demux::Demuxer;
///
/// let mut demuxer = Demuxer::default();
/// demuxer.push_bytes(EXAMPLE_DATA);
///
/// let packets: Vec<_> = demuxer.by_ref().filter_map(Result::ok).collect();
/// assert_eq!(packets.len(), 2);
/// assert_eq!(packets[0].serialno, 0x5EED);
/// assert!(packets[0].packet.bos);
/// assert!(packets[1].packet.eos);
/// ```
///
/// # Error Recovery
///
/// Lost sync and holes in a stream's page sequence are logged and counted
/// in [`StreamStats`]. They are only returned as errors when their level is
/// at or above the fail level (see [`Demuxer::set_fail_level`]); the
/// iterator keeps going either way.
#[derive(Debug)]
pub struct Demuxer {
    sync: SyncState,
    streams: BTreeMap<u32, DemuxStream>,
    current: Option<u32>,
    fail_level: Level,
    pages: u64,
    lost_sync: u64,
}

#[derive(Debug)]
struct DemuxStream {
    state: StreamState,
    stats: StreamStats,
}

/// Counters for one logical stream.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamStats {
    pub serialno: u32,
    pub pages: u64,
    pub rejected_pages: u64,
    pub packets: u64,
    pub packet_bytes: u64,
    pub gaps: u64,
    pub bos_seen: bool,
    pub eos_seen: bool,
    pub first_granulepos: Option<i64>,
    pub last_granulepos: Option<i64>,
}

impl StreamStats {
    fn record(&mut self, packet: &Packet) {
        self.packets += 1;
        self.packet_bytes += packet.data.len() as u64;
        if packet.granulepos != NO_GRANULEPOS {
            self.first_granulepos.get_or_insert(packet.granulepos);
            self.last_granulepos = Some(packet.granulepos);
        }
    }
}

/// A packet together with the serial number of its logical stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DemuxedPacket {
    pub serialno: u32,
    pub packet: OwnedPacket,
}

impl Default for Demuxer {
    fn default() -> Self {
        Self {
            sync: SyncState::new(),
            streams: BTreeMap::new(),
            current: None,
            fail_level: Level::Error,
            pages: 0,
            lost_sync: 0,
        }
    }
}

impl Demuxer {
    /// Adds raw bitstream data.
    pub fn push_bytes(&mut self, data: &[u8]) {
        self.sync.write(data);
    }

    /// Reserves space for the caller to read into directly; see
    /// [`SyncState::buffer`].
    pub fn buffer(&mut self, size: usize) -> &mut [u8] {
        self.sync.buffer(size)
    }

    /// Commits bytes written into [`Demuxer::buffer`].
    pub fn wrote(&mut self, bytes: usize) -> Result<(), SyncError> {
        self.sync.wrote(bytes)
    }

    /// Sets the failure level for recoverable conditions.
    ///
    /// - `log::Level::Error`: lost sync and data gaps are only logged (default)
    /// - `log::Level::Warn`: they are returned as errors (strict mode)
    pub fn set_fail_level(&mut self, level: Level) {
        self.fail_level = level;
    }

    /// Drops buffered bytes and partial packets, e.g. after a seek.
    ///
    /// Streams keep their statistics. The first page each stream sees
    /// afterwards is accepted without reporting a gap.
    pub fn reset(&mut self) {
        self.sync.reset();
        for stream in self.streams.values_mut() {
            stream.state.reset();
        }
        self.current = None;
        debug!("Demuxer reset, {} streams kept", self.streams.len());
    }

    pub fn stream_stats(&self, serialno: u32) -> Option<&StreamStats> {
        self.streams.get(&serialno).map(|stream| &stream.stats)
    }

    /// Statistics for every stream seen so far, ordered by serial number.
    pub fn streams(&self) -> impl Iterator<Item = &StreamStats> {
        self.streams.values().map(|stream| &stream.stats)
    }

    /// Pages accepted by their stream.
    pub fn page_count(&self) -> u64 {
        self.pages
    }

    /// Number of separate runs of unframed data.
    pub fn lost_sync_count(&self) -> u64 {
        self.lost_sync
    }

    pub fn skipped_bytes(&self) -> u64 {
        self.sync.skipped_total()
    }

    /// Bytes buffered but not yet framed.
    pub fn pending_bytes(&self) -> usize {
        self.sync.buffer_offset() - self.sync.data_offset()
    }

    fn next_packet(&mut self) -> Result<Option<DemuxedPacket>, DemuxError> {
        loop {
            if let Some(serialno) = self.current {
                if let Some(packet) = self.drain_stream(serialno)? {
                    return Ok(Some(packet));
                }
                self.current = None;
            }

            let page = match self.sync.pageout() {
                Ok(page) => page,
                Err(SyncError::LostSync { skipped }) => {
                    self.lost_sync += 1;
                    log_or_err!(self, Level::Warn, DemuxError::LostSync { skipped });
                    continue;
                }
                Err(SyncError::InsufficientData | SyncError::BufferOverrun { .. }) => {
                    return Ok(None);
                }
            };

            let serialno = page.serialno();
            let stream = self.streams.entry(serialno).or_insert_with(|| {
                let mut state = StreamState::new(serialno);
                if !page.bos() {
                    // Joined mid-stream: take whatever page comes first.
                    state.reset();
                }
                debug!(
                    "New logical stream {serialno:#010X} at page {} (bos: {})",
                    page.pageno(),
                    page.bos()
                );
                DemuxStream {
                    state,
                    stats: StreamStats {
                        serialno,
                        ..Default::default()
                    },
                }
            });

            stream.stats.bos_seen |= page.bos();
            stream.stats.eos_seen |= page.eos();

            if let Err(source) = stream.state.pagein(&page) {
                stream.stats.rejected_pages += 1;
                log_or_err!(self, Level::Error, DemuxError::Stream { serialno, source });
                continue;
            }

            trace!(
                "Page {} of stream {serialno:#010X}, granule {}",
                page.pageno(),
                page.granulepos()
            );
            stream.stats.pages += 1;
            self.pages += 1;
            self.current = Some(serialno);
        }
    }

    fn drain_stream(&mut self, serialno: u32) -> Result<Option<DemuxedPacket>, DemuxError> {
        let Some(stream) = self.streams.get_mut(&serialno) else {
            return Ok(None);
        };

        loop {
            match stream.state.packetout() {
                Ok(packet) => {
                    stream.stats.record(&packet);
                    return Ok(Some(DemuxedPacket {
                        serialno,
                        packet: packet.to_owned_packet(),
                    }));
                }
                Err(StreamError::DataGap { packetno }) => {
                    stream.stats.gaps += 1;
                    log_or_err!(self, Level::Warn, DemuxError::DataGap { serialno, packetno });
                }
                Err(_) => return Ok(None),
            }
        }
    }
}

impl Iterator for Demuxer {
    type Item = Result<DemuxedPacket, DemuxError>;

    /// Returns `None` once more input is needed; push more bytes and
    /// iterate again.
    fn next(&mut self) -> Option<Self::Item> {
        self.next_packet().transpose()
    }
}
