//! Physical Ogg pages.
//!
//! ```text
//! offset size  field
//! 0      4     capture pattern "OggS"
//! 4      1     stream structure version (0)
//! 5      1     header type flags
//! 6      8     granule position, LE
//! 14     4     serial number, LE
//! 18     4     page sequence number, LE
//! 22     4     CRC-32 of the page with this field zeroed, LE
//! 26     1     segment count N
//! 27     N     segment table
//! 27+N   ...   body
//! ```

use crate::utils::crc::OGG_PAGE_CRC;

/// Capture pattern at the start of every page.
pub const CAPTURE_PATTERN: [u8; 4] = *b"OggS";

/// Size of the fixed part of a page header, without the segment table.
pub const HEADER_SIZE: usize = 27;

/// A segment table holds at most this many lacing values.
pub const MAX_SEGMENTS: usize = 255;

/// Largest possible header: fixed part plus a full segment table.
pub const MAX_HEADER_SIZE: usize = HEADER_SIZE + MAX_SEGMENTS;

/// Lacing value that marks a segment continuing into the next one.
pub const CONTINUED_SEGMENT: u8 = 255;

pub const FLAG_CONTINUED: u8 = 0x01;
pub const FLAG_BOS: u8 = 0x02;
pub const FLAG_EOS: u8 = 0x04;

pub(crate) const CHECKSUM_OFFSET: usize = 22;
pub(crate) const SEGMENT_COUNT_OFFSET: usize = 26;

/// Borrowed view of one page.
///
/// Pages handed out by [`SyncState`](crate::framing::sync::SyncState) and
/// [`StreamState`](crate::framing::stream::StreamState) alias their internal
/// buffers, so the borrow checker ties the view to the next mutating call.
/// Use [`Page::copy`] to keep a page around longer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page<'a> {
    header: &'a [u8],
    body: &'a [u8],
}

impl<'a> Page<'a> {
    /// `header` must hold the fixed header and its complete segment table.
    pub(crate) fn new(header: &'a [u8], body: &'a [u8]) -> Self {
        debug_assert!(header.len() >= HEADER_SIZE);
        debug_assert_eq!(header.len(), HEADER_SIZE + header[SEGMENT_COUNT_OFFSET] as usize);
        Self { header, body }
    }

    pub fn header(&self) -> &'a [u8] {
        self.header
    }

    pub fn body(&self) -> &'a [u8] {
        self.body
    }

    /// Total size of the page on the wire.
    pub fn len(&self) -> usize {
        self.header.len() + self.body.len()
    }

    /// Whether the body is empty. The header is always present, so this does
    /// not mean [`Page::len`] is zero.
    pub fn is_empty(&self) -> bool {
        self.body.is_empty()
    }

    pub fn version(&self) -> u8 {
        self.header[4]
    }

    pub fn flags(&self) -> u8 {
        self.header[5]
    }

    /// First packet on this page continues one from the previous page.
    pub fn continued(&self) -> bool {
        self.flags() & FLAG_CONTINUED != 0
    }

    pub fn bos(&self) -> bool {
        self.flags() & FLAG_BOS != 0
    }

    pub fn eos(&self) -> bool {
        self.flags() & FLAG_EOS != 0
    }

    pub fn granulepos(&self) -> i64 {
        i64::from_le_bytes(self.le_bytes(6))
    }

    pub fn serialno(&self) -> u32 {
        u32::from_le_bytes(self.le_bytes(14))
    }

    pub fn pageno(&self) -> u32 {
        u32::from_le_bytes(self.le_bytes(18))
    }

    /// Checksum as stored in the header.
    pub fn checksum_field(&self) -> u32 {
        u32::from_le_bytes(self.le_bytes(CHECKSUM_OFFSET))
    }

    pub fn segment_count(&self) -> usize {
        self.header[SEGMENT_COUNT_OFFSET] as usize
    }

    pub fn segments(&self) -> &'a [u8] {
        &self.header[HEADER_SIZE..]
    }

    /// Number of packets that end on this page.
    pub fn packets_completed(&self) -> usize {
        self.segments()
            .iter()
            .filter(|&&lacing| lacing < CONTINUED_SEGMENT)
            .count()
    }

    /// Computes the page CRC as if the checksum field were zero.
    ///
    /// Nothing is written; the stored checksum bytes are skipped and fed to
    /// the CRC as zeros.
    pub fn checksum_of(header: &[u8], body: &[u8]) -> u32 {
        let crc = &OGG_PAGE_CRC;
        let mut reg = crc.update(crc.init, &header[..CHECKSUM_OFFSET]);
        reg = crc.update_zeros(reg, 4);
        reg = crc.update(reg, &header[CHECKSUM_OFFSET + 4..]);
        crc.update(reg, body)
    }

    pub fn compute_checksum(&self) -> u32 {
        Self::checksum_of(self.header, self.body)
    }

    pub fn verify_checksum(&self) -> bool {
        self.compute_checksum() == self.checksum_field()
    }

    /// Deep-copies header and body into freshly owned storage.
    pub fn copy(&self) -> OwnedPage {
        let mut page = OwnedPage::default();
        self.copy_into(&mut page);
        page
    }

    /// Deep-copies into `dst`, reusing its allocations.
    pub fn copy_into(&self, dst: &mut OwnedPage) {
        dst.header.clear();
        dst.header.extend_from_slice(self.header);
        dst.body.clear();
        dst.body.extend_from_slice(self.body);
    }

    fn le_bytes<const N: usize>(&self, offset: usize) -> [u8; N] {
        let mut bytes = [0u8; N];
        bytes.copy_from_slice(&self.header[offset..offset + N]);
        bytes
    }
}

/// A page that owns its header and body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnedPage {
    header: Vec<u8>,
    body: Vec<u8>,
}

impl Default for OwnedPage {
    fn default() -> Self {
        Self {
            header: empty_header(),
            body: Vec::new(),
        }
    }
}

impl OwnedPage {
    /// Assembles a version 0 page from its fields and seals it with a checksum.
    ///
    /// The segment table is taken as given, so callers can build pages that
    /// disagree with the body length; the framer must cope with those too.
    pub fn build(
        flags: u8,
        granulepos: i64,
        serialno: u32,
        pageno: u32,
        segments: &[u8],
        body: &[u8],
    ) -> Self {
        let segments = &segments[..segments.len().min(MAX_SEGMENTS)];

        let mut header = Vec::with_capacity(HEADER_SIZE + segments.len());
        write_header(&mut header, flags, granulepos, serialno, pageno, segments);

        let mut page = Self {
            header,
            body: body.to_vec(),
        };
        page.checksum();
        page
    }

    pub fn as_page(&self) -> Page<'_> {
        Page::new(&self.header, &self.body)
    }

    pub fn header(&self) -> &[u8] {
        &self.header
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Mutable header bytes, for tests and tools that patch fields by hand.
    ///
    /// The length is fixed; call [`OwnedPage::checksum`] afterwards to reseal.
    pub fn header_mut(&mut self) -> &mut [u8] {
        &mut self.header
    }

    pub fn body_mut(&mut self) -> &mut [u8] {
        &mut self.body
    }

    /// Recomputes the CRC and writes it into the checksum field.
    pub fn checksum(&mut self) {
        let crc = Page::checksum_of(&self.header, &self.body);
        self.header[CHECKSUM_OFFSET..CHECKSUM_OFFSET + 4].copy_from_slice(&crc.to_le_bytes());
    }

    /// Serialises header followed by body.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.header.len() + self.body.len());
        bytes.extend_from_slice(&self.header);
        bytes.extend_from_slice(&self.body);
        bytes
    }
}

impl<'a> From<&Page<'a>> for OwnedPage {
    fn from(page: &Page<'a>) -> Self {
        page.copy()
    }
}

fn empty_header() -> Vec<u8> {
    let mut header = Vec::with_capacity(HEADER_SIZE);
    write_header(&mut header, 0, 0, 0, 0, &[]);
    header
}

/// Appends a complete header with a zeroed checksum field to `dst`.
pub(crate) fn write_header(
    dst: &mut Vec<u8>,
    flags: u8,
    granulepos: i64,
    serialno: u32,
    pageno: u32,
    segments: &[u8],
) {
    dst.extend_from_slice(&CAPTURE_PATTERN);
    dst.push(0x00);
    dst.push(flags);
    dst.extend_from_slice(&granulepos.to_le_bytes());
    dst.extend_from_slice(&serialno.to_le_bytes());
    dst.extend_from_slice(&pageno.to_le_bytes());
    dst.extend_from_slice(&[0; 4]);
    dst.push(segments.len() as u8);
    dst.extend_from_slice(segments);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_page() -> OwnedPage {
        OwnedPage::build(
            FLAG_BOS | FLAG_EOS,
            0x0102_0304_0506_0708,
            0xDEAD_BEEF,
            7,
            &[255, 10],
            &[0x5A; 265],
        )
    }

    #[test]
    fn header_fields() {
        let owned = sample_page();
        let page = owned.as_page();

        assert_eq!(&page.header()[..4], b"OggS");
        assert_eq!(page.version(), 0);
        assert!(!page.continued());
        assert!(page.bos());
        assert!(page.eos());
        assert_eq!(page.granulepos(), 0x0102_0304_0506_0708);
        assert_eq!(page.serialno(), 0xDEAD_BEEF);
        assert_eq!(page.pageno(), 7);
        assert_eq!(page.segment_count(), 2);
        assert_eq!(page.segments(), &[255, 10]);
        assert_eq!(page.header().len(), HEADER_SIZE + 2);
        assert_eq!(page.len(), HEADER_SIZE + 2 + 265);
        assert_eq!(page.packets_completed(), 1);
    }

    #[test]
    fn negative_granulepos_roundtrips() {
        let owned = OwnedPage::build(0, -1, 1, 0, &[0], &[]);
        assert_eq!(owned.as_page().granulepos(), -1);
        assert_eq!(&owned.header()[6..14], &[0xFF; 8]);
    }

    #[test]
    fn checksum_verifies_and_detects_bit_flips() {
        let owned = sample_page();
        assert!(owned.as_page().verify_checksum());

        let bytes = owned.to_bytes();
        let header_len = owned.header().len();
        for bit in 0..bytes.len() * 8 {
            let mut flipped = bytes.clone();
            flipped[bit / 8] ^= 1 << (bit % 8);

            let (header, body) = flipped.split_at(header_len);
            let stored = u32::from_le_bytes([header[22], header[23], header[24], header[25]]);
            assert_ne!(
                Page::checksum_of(header, body),
                stored,
                "bit {bit} flip went unnoticed"
            );
        }
    }

    #[test]
    fn checksum_ignores_stored_field() {
        let mut owned = sample_page();
        let expected = owned.as_page().checksum_field();

        owned.header_mut()[CHECKSUM_OFFSET..CHECKSUM_OFFSET + 4].copy_from_slice(&[1, 2, 3, 4]);
        assert_eq!(owned.as_page().compute_checksum(), expected);

        owned.checksum();
        assert_eq!(owned.as_page().checksum_field(), expected);
    }

    #[test]
    fn copy_detaches_from_source() {
        let mut buffer = sample_page().to_bytes();
        let header_len = HEADER_SIZE + 2;

        let copy = {
            let page = Page::new(&buffer[..header_len], &buffer[header_len..]);
            page.copy()
        };
        buffer.fill(0);

        let page = copy.as_page();
        assert!(page.verify_checksum());
        assert_eq!(page.serialno(), 0xDEAD_BEEF);

        let mut reused = OwnedPage::default();
        page.copy_into(&mut reused);
        assert_eq!(reused, copy);
    }

    #[test]
    fn owned_from_view_and_body_patch() {
        let source = sample_page();
        let mut owned = OwnedPage::from(&source.as_page());
        assert_eq!(owned, source);

        owned.body_mut()[100] ^= 0x01;
        assert!(!owned.as_page().verify_checksum());
        assert!(!owned.as_page().is_empty());

        owned.checksum();
        assert!(owned.as_page().verify_checksum());
        assert_ne!(owned.body(), source.body());
    }

    #[test]
    fn header_only_page_is_empty_but_not_zero_length() {
        let owned = OwnedPage::build(0, 0, 1, 0, &[], &[]);
        let page = owned.as_page();
        assert!(page.is_empty());
        assert_eq!(page.len(), HEADER_SIZE);
    }
}
