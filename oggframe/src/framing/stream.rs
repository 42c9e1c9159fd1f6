//! Per-stream packet assembly and disassembly.
//!
//! A [`StreamState`] is bound to one serial number and works in either
//! direction:
//!
//! - **Decode**: [`StreamState::pagein`] splits pages into lacing segments,
//!   [`StreamState::packetout`] regroups the segments into packets.
//! - **Encode**: [`StreamState::packetin`] laces packets into segments,
//!   [`StreamState::pageout`] and [`StreamState::flush`] pack the segments
//!   into checksummed pages.
//!
//! Body bytes and lacing values live in FIFOs. Consumed prefixes are only
//! compacted on the next call that appends, because the packet or page
//! returned by the previous call still points into them.

use log::{debug, trace};

use crate::framing::packet::{NO_GRANULEPOS, Packet};
use crate::framing::page::{
    CHECKSUM_OFFSET, CONTINUED_SEGMENT, FLAG_BOS, FLAG_CONTINUED, FLAG_EOS, MAX_HEADER_SIZE,
    MAX_SEGMENTS, Page, write_header,
};
use crate::utils::errors::StreamError;

/// Nominal body size of an encoded page.
///
/// Segments are added while the running body size is at most this value,
/// so a page body can exceed it by up to one segment.
pub const MAX_PAGE_BODY: usize = 4096;

const INITIAL_BODY_STORAGE: usize = 16 * 1024;
const INITIAL_LACING_STORAGE: usize = 1024;

/// One segment table entry plus the flags the framing layer tracks for it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Lacing {
    /// Segment length; 255 continues into the next segment.
    pub len: u8,
    /// First segment of a packet. On decode only set for the first packet of
    /// a stream.
    pub start: bool,
    /// Segment of the last page of the stream.
    pub eos: bool,
    /// Placeholder for pages missing from the sequence.
    pub gap: bool,
}

impl Lacing {
    fn segment(len: u8) -> Self {
        Self {
            len,
            ..Default::default()
        }
    }

    fn gap() -> Self {
        Self {
            gap: true,
            ..Default::default()
        }
    }

    /// A segment shorter than 255 bytes ends its packet.
    pub fn is_terminal(&self) -> bool {
        self.len < CONTINUED_SEGMENT
    }
}

#[derive(Debug)]
pub struct StreamState {
    body_data: Vec<u8>,
    body_returned: usize,

    lacing_vals: Vec<Lacing>,
    // Only meaningful on a packet's terminal segment.
    granule_vals: Vec<i64>,
    lacing_packet: usize,
    lacing_returned: usize,

    header: Vec<u8>,

    /// The last packet of the stream has been buffered.
    eos: bool,
    /// The first page has been written.
    bos: bool,
    serialno: u32,
    /// Next expected or assigned page sequence number; `None` after a reset.
    pageno: Option<u32>,
    packetno: i64,
    granulepos: i64,
}

impl StreamState {
    pub fn new(serialno: u32) -> Self {
        Self {
            body_data: Vec::with_capacity(INITIAL_BODY_STORAGE),
            body_returned: 0,
            lacing_vals: Vec::with_capacity(INITIAL_LACING_STORAGE),
            granule_vals: Vec::with_capacity(INITIAL_LACING_STORAGE),
            lacing_packet: 0,
            lacing_returned: 0,
            header: Vec::with_capacity(MAX_HEADER_SIZE),
            eos: false,
            bos: false,
            serialno,
            pageno: Some(0),
            packetno: 0,
            granulepos: 0,
        }
    }

    pub fn serialno(&self) -> u32 {
        self.serialno
    }

    /// Sequence number of the next packet handed out or accepted.
    pub fn packetno(&self) -> i64 {
        self.packetno
    }

    pub fn pageno(&self) -> Option<u32> {
        self.pageno
    }

    /// The final packet of the stream has been buffered.
    pub fn eof(&self) -> bool {
        self.eos
    }

    /// Bytes of packet data buffered and not yet returned.
    pub fn buffered_bytes(&self) -> usize {
        self.body_data.len() - self.body_returned
    }

    /// Drops all buffered data and counters, keeping the serial number.
    ///
    /// The next page accepted by [`StreamState::pagein`] is taken as in
    /// sequence whatever its number, which is what a seek needs.
    pub fn reset(&mut self) {
        self.body_data.clear();
        self.body_returned = 0;

        self.lacing_vals.clear();
        self.granule_vals.clear();
        self.lacing_packet = 0;
        self.lacing_returned = 0;

        self.header.clear();

        self.eos = false;
        self.bos = false;
        self.pageno = None;
        self.packetno = 0;
        self.granulepos = 0;
    }

    pub fn reset_serialno(&mut self, serialno: u32) {
        self.reset();
        self.serialno = serialno;
    }

    // Decode

    /// Adds a page to the stream, splitting it into lacing segments.
    ///
    /// Pages from another stream or with a non-zero version are rejected.
    /// Out of sequence pages are accepted: any partially assembled packet is
    /// dropped, a gap marker is queued for [`StreamState::packetout`], and
    /// the tail of a packet continued from a missing page is skipped.
    pub fn pagein(&mut self, page: &Page) -> Result<(), StreamError> {
        if page.serialno() != self.serialno {
            return Err(StreamError::SerialMismatch {
                expected: self.serialno,
                found: page.serialno(),
            });
        }
        if page.version() > 0 {
            return Err(StreamError::UnsupportedVersion(page.version()));
        }

        let segments = page.segments();
        let mut body = page.body();
        let laced: usize = segments.iter().map(|&lacing| lacing as usize).sum();
        if laced != body.len() {
            return Err(StreamError::BodyLengthMismatch {
                laced,
                body: body.len(),
            });
        }

        self.compact_body();
        self.compact_lacing();
        self.lacing_vals.reserve(segments.len() + 1);
        self.granule_vals.reserve(segments.len() + 1);

        let pageno = page.pageno();
        let mut bos = page.bos();
        let mut segptr = 0;

        if self.pageno != Some(pageno) {
            let partial: usize = self.lacing_vals[self.lacing_packet..]
                .iter()
                .map(|lacing| lacing.len as usize)
                .sum();
            self.body_data.truncate(self.body_data.len() - partial);
            self.lacing_vals.truncate(self.lacing_packet);
            self.granule_vals.truncate(self.lacing_packet);

            if let Some(expected) = self.pageno {
                debug!(
                    "Stream {:#010X}: expected page {expected}, got {pageno}",
                    self.serialno
                );
                self.lacing_vals.push(Lacing::gap());
                self.granule_vals.push(NO_GRANULEPOS);
                self.lacing_packet += 1;
            }

            if page.continued() {
                bos = false;
                while segptr < segments.len() {
                    let val = segments[segptr];
                    body = &body[val as usize..];
                    segptr += 1;
                    if val < CONTINUED_SEGMENT {
                        break;
                    }
                }
            }
        }

        self.body_data.extend_from_slice(body);

        let mut saved = None;
        for &val in &segments[segptr..] {
            let mut lacing = Lacing::segment(val);
            if bos {
                lacing.start = true;
                bos = false;
            }

            self.lacing_vals.push(lacing);
            self.granule_vals.push(NO_GRANULEPOS);

            if lacing.is_terminal() {
                saved = Some(self.lacing_vals.len() - 1);
                self.lacing_packet = self.lacing_vals.len();
            }
        }

        // The page granule position belongs to the last packet completed on it.
        if let Some(saved) = saved {
            self.granule_vals[saved] = page.granulepos();
        }

        if page.eos() {
            self.eos = true;
            if let Some(last) = self.lacing_vals.last_mut() {
                last.eos = true;
            }
        }

        trace!(
            "Stream {:#010X}: page {pageno} in, {} segments, {} bytes",
            self.serialno,
            segments.len(),
            page.body().len()
        );

        self.pageno = Some(pageno.wrapping_add(1));
        Ok(())
    }

    /// Returns the next complete packet.
    ///
    /// [`StreamError::DataGap`] reports a hole in the page sequence; it
    /// consumes a packet number and the following call continues with the
    /// next packet. [`StreamError::InsufficientData`] means more pages are
    /// needed.
    pub fn packetout(&mut self) -> Result<Packet<'_>, StreamError> {
        let mut ptr = self.lacing_returned;
        if self.lacing_packet <= ptr {
            return Err(StreamError::InsufficientData);
        }

        let packetno = self.packetno;
        self.packetno += 1;

        let first = self.lacing_vals[ptr];
        if first.gap {
            self.lacing_returned += 1;
            return Err(StreamError::DataGap { packetno });
        }

        let mut size = first.len;
        let mut bytes = size as usize;
        let mut eos = first.eos;
        while size == CONTINUED_SEGMENT {
            ptr += 1;
            let lacing = self.lacing_vals[ptr];
            size = lacing.len;
            eos |= lacing.eos;
            bytes += size as usize;
        }

        let start = self.body_returned;
        self.body_returned += bytes;
        self.lacing_returned = ptr + 1;

        Ok(Packet {
            data: &self.body_data[start..start + bytes],
            bos: first.start,
            eos,
            granulepos: self.granule_vals[ptr],
            packetno,
        })
    }

    // Encode

    /// Queues a packet for page assembly.
    ///
    /// The packet is laced into `len / 255` full segments and one final
    /// segment of `len % 255` bytes, which is zero when the length is a
    /// multiple of 255.
    pub fn packetin(&mut self, packet: &Packet) {
        let lacing_val = packet.data.len() / 255 + 1;

        self.compact_body();
        self.body_data.extend_from_slice(packet.data);

        self.lacing_vals.reserve(lacing_val);
        self.granule_vals.reserve(lacing_val);

        let first = self.lacing_vals.len();
        for _ in 0..lacing_val - 1 {
            self.lacing_vals.push(Lacing::segment(CONTINUED_SEGMENT));
            self.granule_vals.push(self.granulepos);
        }
        self.lacing_vals
            .push(Lacing::segment((packet.data.len() % 255) as u8));
        self.granule_vals.push(packet.granulepos);
        self.granulepos = packet.granulepos;

        self.lacing_vals[first].start = true;

        trace!(
            "Stream {:#010X}: packet {} in, {} bytes, {lacing_val} segments",
            self.serialno,
            self.packetno,
            packet.data.len()
        );

        self.packetno += 1;
        if packet.eos {
            self.eos = true;
        }
    }

    /// Writes buffered segments into a page even if it would be undersized.
    ///
    /// The first page of a stream carries exactly the first packet with a
    /// granule position of 0. Later pages take segments while the body is
    /// at most [`MAX_PAGE_BODY`] bytes, up to [`MAX_SEGMENTS`]. Only
    /// [`StreamError::InsufficientData`] means everything has been flushed.
    pub fn flush(&mut self) -> Result<Page<'_>, StreamError> {
        let maxvals = self.lacing_vals.len().min(MAX_SEGMENTS);
        if maxvals == 0 {
            return Err(StreamError::InsufficientData);
        }

        let mut granulepos = self.granule_vals[0];
        let mut vals = 0;

        if !self.bos {
            granulepos = 0;
            vals = self.lacing_vals[..maxvals]
                .iter()
                .position(Lacing::is_terminal)
                .map_or(maxvals, |terminal| terminal + 1);
        } else {
            let mut acc = 0;
            while vals < maxvals {
                if acc > MAX_PAGE_BODY {
                    break;
                }
                acc += self.lacing_vals[vals].len as usize;
                granulepos = self.granule_vals[vals];
                vals += 1;
            }
        }

        let mut flags = 0;
        if !self.lacing_vals[0].start {
            flags |= FLAG_CONTINUED;
        }
        if !self.bos {
            flags |= FLAG_BOS;
        }
        if self.eos && self.lacing_vals.len() == vals {
            flags |= FLAG_EOS;
        }
        self.bos = true;

        let pageno = self.pageno.unwrap_or(0);
        self.pageno = Some(pageno.wrapping_add(1));

        let mut segments = [0u8; MAX_SEGMENTS];
        let mut bytes = 0;
        for (segment, lacing) in segments.iter_mut().zip(&self.lacing_vals[..vals]) {
            *segment = lacing.len;
            bytes += lacing.len as usize;
        }

        self.header.clear();
        write_header(
            &mut self.header,
            flags,
            granulepos,
            self.serialno,
            pageno,
            &segments[..vals],
        );

        self.lacing_vals.drain(..vals);
        self.granule_vals.drain(..vals);
        let start = self.body_returned;
        self.body_returned += bytes;

        let body = &self.body_data[start..start + bytes];
        let crc = Page::checksum_of(&self.header, body);
        self.header[CHECKSUM_OFFSET..CHECKSUM_OFFSET + 4].copy_from_slice(&crc.to_le_bytes());

        trace!(
            "Stream {:#010X}: page {pageno} out, {vals} segments, {bytes} bytes, granule {granulepos}",
            self.serialno
        );

        Ok(Page::new(&self.header, &self.body_data[start..start + bytes]))
    }

    /// Returns a page once enough data is buffered to be worth one.
    ///
    /// A page is produced when the stream has ended, when more than
    /// [`MAX_PAGE_BODY`] bytes are buffered, when the segment table is full,
    /// or when the header page has not been written yet. Otherwise
    /// [`StreamError::InsufficientData`] lets packets accumulate.
    pub fn pageout(&mut self) -> Result<Page<'_>, StreamError> {
        let lacing_fill = self.lacing_vals.len();

        if (self.eos && lacing_fill > 0)
            || self.buffered_bytes() > MAX_PAGE_BODY
            || lacing_fill >= MAX_SEGMENTS
            || (lacing_fill > 0 && !self.bos)
        {
            return self.flush();
        }

        Err(StreamError::InsufficientData)
    }

    fn compact_body(&mut self) {
        if self.body_returned != 0 {
            self.body_data.drain(..self.body_returned);
            self.body_returned = 0;
        }
    }

    fn compact_lacing(&mut self) {
        let returned = self.lacing_returned;
        if returned != 0 {
            self.lacing_vals.drain(..returned);
            self.granule_vals.drain(..returned);
            self.lacing_packet -= returned;
            self.lacing_returned = 0;
        }
    }
}
