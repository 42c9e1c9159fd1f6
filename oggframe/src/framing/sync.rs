//! Page synchronisation over an arbitrary byte stream.
//!
//! The caller reserves space with [`SyncState::buffer`], fills it, commits it
//! with [`SyncState::wrote`] and then pulls pages with [`SyncState::pageout`].
//! Anything that is not a checksummed page is skipped by scanning forward for
//! the next capture pattern, so truncated files, mid-stream seeks and
//! corrupted bytes all recover on their own.

use log::trace;

use crate::framing::page::{CAPTURE_PATTERN, HEADER_SIZE, Page, SEGMENT_COUNT_OFFSET};
use crate::utils::errors::SyncError;

/// Extra room added whenever the buffer has to grow, roughly one page.
pub const BUFFER_SLACK: usize = 4096;

/// Result of a single [`SyncState::pageseek`] step.
#[derive(Debug, PartialEq, Eq)]
pub enum PageSeek<'a> {
    /// A verified page starts at the cursor.
    Synced(Page<'a>),
    /// The candidate at the cursor is incomplete; nothing was consumed.
    NeedMoreData,
    /// This many bytes were skipped without finding a page.
    Skipped(usize),
}

#[derive(Debug, Clone, Copy)]
enum Seek {
    Synced {
        start: usize,
        header_len: usize,
        body_len: usize,
    },
    NeedMoreData,
    Skipped(usize),
}

#[derive(Debug, Default)]
pub struct SyncState {
    data: Vec<u8>,
    fill: usize,
    returned: usize,

    unsynced: bool,
    headerbytes: usize,
    bodybytes: usize,

    skipped_total: u64,
}

impl SyncState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserves at least `size` writable bytes and returns them.
    ///
    /// Bytes already handed out are discarded first. The returned slice
    /// begins at [`SyncState::buffer_offset`] and may be longer than `size`.
    /// Pages previously returned are invalidated.
    pub fn buffer(&mut self, size: usize) -> &mut [u8] {
        if self.returned != 0 {
            self.data.copy_within(self.returned..self.fill, 0);
            self.fill -= self.returned;
            self.returned = 0;
        }

        if size > self.data.len() - self.fill {
            let new_size = size + self.fill + BUFFER_SLACK;
            trace!("Growing sync buffer {} -> {new_size} bytes", self.data.len());
            self.data.resize(new_size, 0);
        }

        &mut self.data[self.fill..]
    }

    /// Commits `bytes` bytes written into the space from [`SyncState::buffer`].
    pub fn wrote(&mut self, bytes: usize) -> Result<(), SyncError> {
        let available = self.data.len() - self.fill;
        if bytes > available {
            return Err(SyncError::BufferOverrun {
                requested: bytes,
                available,
            });
        }

        self.fill += bytes;
        Ok(())
    }

    /// Copies `data` into the buffer and commits it.
    pub fn write(&mut self, data: &[u8]) {
        let len = data.len();
        self.buffer(len)[..len].copy_from_slice(data);
        self.fill += len;
    }

    /// Tries to frame one page at the cursor.
    ///
    /// A page is only returned once its checksum matches. On a bad capture
    /// pattern or checksum the cursor moves to the next `'O'` byte (or the end
    /// of buffered data) and the number of skipped bytes is reported.
    pub fn pageseek(&mut self) -> PageSeek<'_> {
        match self.seek() {
            Seek::Synced {
                start,
                header_len,
                body_len,
            } => PageSeek::Synced(self.page_at(start, header_len, body_len)),
            Seek::NeedMoreData => PageSeek::NeedMoreData,
            Seek::Skipped(skipped) => PageSeek::Skipped(skipped),
        }
    }

    /// Returns the next page, skipping over anything unframed.
    ///
    /// [`SyncError::LostSync`] is reported once per run of garbage; further
    /// skips are silent until a page is recovered. The count it carries is
    /// the first skip of the run. [`SyncError::InsufficientData`] means more
    /// input is required.
    pub fn pageout(&mut self) -> Result<Page<'_>, SyncError> {
        loop {
            match self.seek() {
                Seek::Synced {
                    start,
                    header_len,
                    body_len,
                } => return Ok(self.page_at(start, header_len, body_len)),
                Seek::NeedMoreData => return Err(SyncError::InsufficientData),
                Seek::Skipped(skipped) => {
                    if !self.unsynced {
                        self.unsynced = true;
                        return Err(SyncError::LostSync { skipped });
                    }
                }
            }
        }
    }

    /// Forgets all buffered data and parse state, keeping the allocation.
    ///
    /// Call this before feeding data from a new position after a seek.
    pub fn reset(&mut self) {
        self.fill = 0;
        self.returned = 0;
        self.unsynced = false;
        self.headerbytes = 0;
        self.bodybytes = 0;
    }

    /// Resets and releases the buffer.
    pub fn clear(&mut self) {
        self.reset();
        self.data = Vec::new();
    }

    /// Bytes already returned or skipped.
    pub fn data_offset(&self) -> usize {
        self.returned
    }

    /// Bytes written into the buffer.
    pub fn buffer_offset(&self) -> usize {
        self.fill
    }

    /// Allocated buffer size.
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Bytes skipped while hunting for pages since construction.
    pub fn skipped_total(&self) -> u64 {
        self.skipped_total
    }

    fn seek(&mut self) -> Seek {
        let page = self.returned;
        let bytes = self.fill - self.returned;

        if self.headerbytes == 0 {
            if bytes < HEADER_SIZE {
                return Seek::NeedMoreData;
            }

            if self.data[page..page + 4] != CAPTURE_PATTERN {
                return self.skip_to_capture();
            }

            let headerbytes = HEADER_SIZE + self.data[page + SEGMENT_COUNT_OFFSET] as usize;
            if bytes < headerbytes {
                return Seek::NeedMoreData;
            }

            self.bodybytes = self.data[page + HEADER_SIZE..page + headerbytes]
                .iter()
                .map(|&lacing| lacing as usize)
                .sum();
            self.headerbytes = headerbytes;
        }

        if self.headerbytes + self.bodybytes > bytes {
            return Seek::NeedMoreData;
        }

        let header = &self.data[page..page + self.headerbytes];
        let body = &self.data[page + self.headerbytes..page + self.headerbytes + self.bodybytes];
        let stored = u32::from_le_bytes([header[22], header[23], header[24], header[25]]);
        let computed = Page::checksum_of(header, body);

        if computed != stored {
            trace!(
                "Checksum mismatch at offset {page}: read {stored:#010X}, calculated {computed:#010X}"
            );
            self.headerbytes = 0;
            self.bodybytes = 0;
            return self.skip_to_capture();
        }

        let (header_len, body_len) = (self.headerbytes, self.bodybytes);
        self.unsynced = false;
        self.returned += header_len + body_len;
        self.headerbytes = 0;
        self.bodybytes = 0;

        Seek::Synced {
            start: page,
            header_len,
            body_len,
        }
    }

    fn skip_to_capture(&mut self) -> Seek {
        let page = self.returned;
        let next = self.data[page + 1..self.fill]
            .iter()
            .position(|&byte| byte == CAPTURE_PATTERN[0])
            .map_or(self.fill, |offset| page + 1 + offset);

        let skipped = next - page;
        self.returned = next;
        self.skipped_total += skipped as u64;
        trace!("Skipped {skipped} bytes at offset {page}");

        Seek::Skipped(skipped)
    }

    fn page_at(&self, start: usize, header_len: usize, body_len: usize) -> Page<'_> {
        let body_start = start + header_len;
        Page::new(
            &self.data[start..body_start],
            &self.data[body_start..body_start + body_len],
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::framing::page::{FLAG_BOS, OwnedPage};

    fn test_page(serialno: u32, pageno: u32, len: usize) -> Vec<u8> {
        let body: Vec<u8> = (0..len).map(|i| (i * 7 + pageno as usize) as u8).collect();
        let mut segments = vec![255u8; len / 255];
        segments.push((len % 255) as u8);
        OwnedPage::build(FLAG_BOS, pageno as i64 * 1000, serialno, pageno, &segments, &body)
            .to_bytes()
    }

    /// Deterministic bytes that never contain a capture pattern.
    fn garbage(len: usize) -> Vec<u8> {
        (0..len).map(|i| ((i * 37 + 123) % 256) as u8).collect()
    }

    fn drain(sync: &mut SyncState) -> (Vec<u32>, usize) {
        let mut pagenos = Vec::new();
        let mut lost = 0;
        loop {
            match sync.pageout() {
                Ok(page) => pagenos.push(page.pageno()),
                Err(SyncError::LostSync { .. }) => lost += 1,
                Err(SyncError::InsufficientData) => break,
                Err(e) => panic!("unexpected error: {e}"),
            }
        }
        (pagenos, lost)
    }

    #[test]
    fn pages_from_clean_stream() {
        let mut sync = SyncState::new();
        for pageno in 0..3 {
            sync.write(&test_page(1, pageno, 500));
        }

        let (pagenos, lost) = drain(&mut sync);
        assert_eq!(pagenos, [0, 1, 2]);
        assert_eq!(lost, 0);
        assert_eq!(sync.data_offset(), sync.buffer_offset());
    }

    #[test]
    fn byte_at_a_time_feeding() {
        let stream = [test_page(9, 0, 40), test_page(9, 1, 600)].concat();
        let mut sync = SyncState::new();
        let mut pagenos = Vec::new();

        for &byte in &stream {
            let buf = sync.buffer(1);
            buf[0] = byte;
            sync.wrote(1).unwrap();
            if let Ok(page) = sync.pageout() {
                assert!(page.verify_checksum());
                pagenos.push(page.pageno());
            }
        }
        assert_eq!(pagenos, [0, 1]);
    }

    #[test]
    fn pageseek_reports_lengths() {
        let page = test_page(3, 0, 100);
        let mut sync = SyncState::new();
        sync.write(&page[..30]);
        assert_eq!(sync.pageseek(), PageSeek::NeedMoreData);
        assert_eq!(sync.data_offset(), 0);

        sync.write(&page[30..]);
        match sync.pageseek() {
            PageSeek::Synced(p) => assert_eq!(p.len(), page.len()),
            other => panic!("expected a page, got {other:?}"),
        }

        sync.write(b"xxOggS");
        sync.write(&garbage(40));
        assert_eq!(sync.pageseek(), PageSeek::Skipped(2));
    }

    #[test]
    fn lost_sync_reported_once_per_run() {
        let mut stream = garbage(3000);
        stream.extend(test_page(5, 0, 200));
        stream.extend(garbage(100));
        stream.extend(test_page(5, 1, 200));

        let mut sync = SyncState::new();
        sync.write(&stream);
        let (pagenos, lost) = drain(&mut sync);

        assert_eq!(pagenos, [0, 1]);
        assert_eq!(lost, 2);
    }

    #[test]
    fn corrupted_page_is_skipped_without_altering_data() {
        let good = test_page(2, 0, 300);
        let mut bad = test_page(2, 1, 300);
        bad[100] ^= 0x10;
        let tail = test_page(2, 2, 300);

        let mut sync = SyncState::new();
        sync.write(&[good.clone(), bad.clone(), tail].concat());

        assert_eq!(sync.pageout().map(|p| p.pageno()), Ok(0));
        assert!(matches!(sync.pageout(), Err(SyncError::LostSync { .. })));
        // The corrupted bytes are still in place, checksum field included.
        assert_eq!(
            &sync.data[good.len()..good.len() + bad.len()],
            bad.as_slice()
        );
        assert_eq!(sync.pageout().map(|p| p.pageno()), Ok(2));
    }

    #[test]
    fn garbage_is_consumed_with_bounded_memory() {
        let mut sync = SyncState::new();
        let chunk = garbage(4096);

        for _ in 0..256 {
            let buf = sync.buffer(chunk.len());
            buf[..chunk.len()].copy_from_slice(&chunk);
            sync.wrote(chunk.len()).unwrap();
            let (pagenos, _) = drain(&mut sync);
            assert!(pagenos.is_empty());
            assert!(sync.buffer_offset() - sync.data_offset() < HEADER_SIZE);
        }

        assert!(sync.capacity() <= 2 * (chunk.len() + BUFFER_SLACK));
        assert!(sync.skipped_total() > 255 * 4096);
    }

    #[test]
    fn truncated_page_then_resync() {
        let first = test_page(4, 0, 1000);
        let second = test_page(4, 1, 1000);

        let mut sync = SyncState::new();
        sync.write(&first[..700]);
        sync.write(&second);

        // The truncated page swallows part of the second one and fails its
        // checksum; the second page is recovered by rescanning.
        let (pagenos, lost) = drain(&mut sync);
        assert_eq!(pagenos, [1]);
        assert_eq!(lost, 1);
    }

    #[test]
    fn wrote_rejects_unreserved_bytes() {
        let mut sync = SyncState::new();
        let available = sync.buffer(10).len();
        assert_eq!(
            sync.wrote(available + 1),
            Err(SyncError::BufferOverrun {
                requested: available + 1,
                available,
            })
        );
        assert_eq!(sync.wrote(available), Ok(()));
    }

    #[test]
    fn reset_drops_partial_state() {
        let page = test_page(8, 0, 100);
        let mut sync = SyncState::new();
        sync.write(&page[..60]);
        assert_eq!(sync.pageout(), Err(SyncError::InsufficientData));

        sync.reset();
        sync.write(&page);
        assert_eq!(sync.pageout().map(|p| p.serialno()), Ok(8));
    }

    #[test]
    fn clear_releases_storage() {
        let mut sync = SyncState::new();
        sync.write(&test_page(4, 0, 3000));
        sync.write(&test_page(4, 1, 20)[..10]);
        assert_eq!(sync.pageout().map(|p| p.pageno()), Ok(0));
        assert!(sync.capacity() > 0);

        sync.clear();
        assert_eq!(sync.capacity(), 0);
        assert_eq!(sync.buffer_offset(), 0);
        assert_eq!(sync.data_offset(), 0);

        sync.write(&test_page(4, 2, 50));
        assert_eq!(sync.pageout().map(|p| p.pageno()), Ok(2));
    }
}
