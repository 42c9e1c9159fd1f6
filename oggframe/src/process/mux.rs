use std::collections::BTreeMap;
use std::io::Write;

use anyhow::{Context, Result};
use log::{debug, trace};

use crate::framing::packet::Packet;
use crate::framing::page::Page;
use crate::framing::stream::StreamState;

/// Writes packets of one or more logical streams as Ogg pages.
///
/// Each serial number gets its own [`StreamState`]. Pages are written as
/// soon as [`StreamState::pageout`] produces them, so streams interleave at
/// page granularity in the order their packets arrive.
///
/// # Example
///
/// ```rust
/// use oggframe::framing::packet::Packet;
/// use oggframe::process::mux::Muxer;
///
/// let mut muxer = Muxer::new(Vec::new());
/// muxer.write_packet(1, &Packet::new(b"header").with_bos(true).with_granulepos(0))?;
/// muxer.write_packet(1, &Packet::new(b"audio").with_granulepos(960).with_eos(true))?;
///
/// let bytes = muxer.finish()?;
/// assert_eq!(&bytes[..4], b"OggS");
/// # Ok::<(), anyhow::Error>(())
/// ```
#[derive(Debug)]
pub struct Muxer<W: Write> {
    writer: W,
    streams: BTreeMap<u32, StreamState>,
    pages_written: u64,
    bytes_written: u64,
}

impl<W: Write> Muxer<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            streams: BTreeMap::new(),
            pages_written: 0,
            bytes_written: 0,
        }
    }

    /// Queues a packet and writes any pages that became ready.
    pub fn write_packet(&mut self, serialno: u32, packet: &Packet) -> Result<()> {
        let stream = self.streams.entry(serialno).or_insert_with(|| {
            debug!("Muxing new logical stream {serialno:#010X}");
            StreamState::new(serialno)
        });

        stream.packetin(packet);
        while let Ok(page) = stream.pageout() {
            write_page(&mut self.writer, &page)?;
            self.pages_written += 1;
            self.bytes_written += page.len() as u64;
        }

        Ok(())
    }

    /// Writes everything buffered for one stream, ending the current page.
    pub fn flush(&mut self, serialno: u32) -> Result<()> {
        let Some(stream) = self.streams.get_mut(&serialno) else {
            return Ok(());
        };

        while let Ok(page) = stream.flush() {
            write_page(&mut self.writer, &page)?;
            self.pages_written += 1;
            self.bytes_written += page.len() as u64;
        }

        Ok(())
    }

    /// Flushes every stream and returns the writer.
    pub fn finish(mut self) -> Result<W> {
        let serials: Vec<u32> = self.streams.keys().copied().collect();
        for serialno in serials {
            self.flush(serialno)?;
        }

        self.writer.flush().context("Failed to flush muxer output")?;
        debug!(
            "Muxer finished: {} pages, {} bytes",
            self.pages_written, self.bytes_written
        );
        Ok(self.writer)
    }

    pub fn pages_written(&self) -> u64 {
        self.pages_written
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    /// Whether every stream that received packets has ended.
    pub fn all_streams_ended(&self) -> bool {
        self.streams.values().all(StreamState::eof)
    }
}

fn write_page<W: Write>(writer: &mut W, page: &Page) -> Result<()> {
    trace!(
        "Writing page {} of stream {:#010X}, {} bytes",
        page.pageno(),
        page.serialno(),
        page.len()
    );

    writer.write_all(page.header()).with_context(|| {
        format!(
            "Failed to write header of page {} (stream {:#010X})",
            page.pageno(),
            page.serialno()
        )
    })?;
    writer.write_all(page.body()).with_context(|| {
        format!(
            "Failed to write body of page {} (stream {:#010X})",
            page.pageno(),
            page.serialno()
        )
    })?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::demux::Demuxer;

    #[test]
    fn muxed_output_demuxes() -> Result<()> {
        let mut muxer = Muxer::new(Vec::new());
        let sizes = [10usize, 300, 5, 7000, 255, 0, 510];

        for (i, &len) in sizes.iter().enumerate() {
            for serialno in [100, 200] {
                let data = vec![(i as u8).wrapping_add(serialno as u8); len];
                let packet = Packet::new(&data)
                    .with_granulepos(i as i64 * 480)
                    .with_bos(i == 0)
                    .with_eos(i + 1 == sizes.len());
                muxer.write_packet(serialno, &packet)?;
            }
        }
        assert!(muxer.all_streams_ended());

        let pages = muxer.pages_written();
        let bytes = muxer.finish()?;
        assert!(pages >= 4);

        let mut demuxer = Demuxer::default();
        demuxer.push_bytes(&bytes);
        let packets = demuxer.by_ref().collect::<Result<Vec<_>, _>>()?;
        assert_eq!(packets.len(), sizes.len() * 2);
        assert_eq!(demuxer.lost_sync_count(), 0);

        for serialno in [100u32, 200] {
            let lens: Vec<usize> = packets
                .iter()
                .filter(|p| p.serialno == serialno)
                .map(|p| p.packet.data.len())
                .collect();
            assert_eq!(lens, sizes);

            let stats = demuxer.stream_stats(serialno).unwrap();
            assert!(stats.bos_seen && stats.eos_seen);
            assert_eq!(stats.last_granulepos, Some(6 * 480));
        }
        Ok(())
    }

    #[test]
    fn finish_flushes_partial_pages() -> Result<()> {
        let mut muxer = Muxer::new(Vec::new());
        muxer.write_packet(9, &Packet::new(&[1; 40]))?;
        muxer.write_packet(9, &Packet::new(&[2; 40]).with_granulepos(40))?;
        // Header page only; the second packet is still buffered.
        assert_eq!(muxer.pages_written(), 1);
        assert!(!muxer.all_streams_ended());

        let bytes = muxer.finish()?;
        let mut demuxer = Demuxer::default();
        demuxer.push_bytes(&bytes);
        assert_eq!(demuxer.by_ref().count(), 2);
        assert_eq!(demuxer.page_count(), 2);
        Ok(())
    }

    #[test]
    fn write_errors_carry_context() {
        struct Broken;
        impl Write for Broken {
            fn write(&mut self, _: &[u8]) -> std::io::Result<usize> {
                Err(std::io::Error::other("disk full"))
            }
            fn flush(&mut self) -> std::io::Result<()> {
                Ok(())
            }
        }

        let mut muxer = Muxer::new(Broken);
        let err = muxer
            .write_packet(3, &Packet::new(&[0; 8]))
            .unwrap_err();
        assert!(err.to_string().contains("page 0"));
        assert!(format!("{err:#}").contains("disk full"));
    }
}
