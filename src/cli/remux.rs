use std::fs::File;
use std::io::{BufWriter, Write};

use anyhow::{Context, Result};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};

use super::command::{Cli, RemuxArgs};
use crate::input::InputReader;
use oggframe::framing::packet::NO_GRANULEPOS;
use oggframe::process::demux::Demuxer;
use oggframe::process::mux::Muxer;

pub fn cmd_remux(args: &RemuxArgs, cli: &Cli, multi: Option<&MultiProgress>) -> Result<()> {
    log::info!(
        "Remuxing {} to {}",
        args.input.display(),
        args.output.display()
    );

    let input = InputReader::new(&args.input)?;
    let file = File::create(&args.output)
        .with_context(|| format!("Failed to create output {}", args.output.display()))?;

    let pb = match multi {
        Some(multi) => {
            let pb = multi.add(ProgressBar::new_spinner());
            pb.set_style(ProgressStyle::with_template(
                "{spinner:.green} {pos} packets\n{msg} | elapsed: {elapsed_precise}",
            )?);
            pb.enable_steady_tick(std::time::Duration::from_millis(100));
            Some(pb)
        }
        None => None,
    };

    let summary = remux_stream(input, BufWriter::new(file), cli.fail_level(), pb.as_ref())?;

    if let Some(pb) = pb {
        pb.finish_and_clear();
    }

    log::info!(
        "Wrote {} packets of {} streams in {} pages ({} bytes)",
        summary.packets,
        summary.streams,
        summary.pages,
        summary.bytes
    );

    Ok(())
}

#[derive(Debug, Default, PartialEq, Eq)]
struct RemuxSummary {
    streams: usize,
    packets: u64,
    pages: u64,
    bytes: u64,
}

/// Demuxes `input` and writes every packet back out through a [`Muxer`].
///
/// A page is closed after each packet that carried a granule position, so
/// output pages end where the input pages completed packets.
fn remux_stream<W: Write>(
    mut input: InputReader,
    writer: W,
    fail_level: log::Level,
    pb: Option<&ProgressBar>,
) -> Result<RemuxSummary> {
    let mut demuxer = Demuxer::default();
    demuxer.set_fail_level(fail_level);
    let mut muxer = Muxer::new(writer);
    let mut packets = 0u64;

    input.process_chunks(&mut demuxer, |demuxer| {
        for result in demuxer.by_ref() {
            let demuxed = match result {
                Ok(demuxed) => demuxed,
                Err(e) if fail_level == log::Level::Warn => return Err(e.into()),
                Err(e) => {
                    log::warn!("{e}");
                    continue;
                }
            };

            muxer.write_packet(demuxed.serialno, &demuxed.packet.as_packet())?;
            if demuxed.packet.granulepos != NO_GRANULEPOS {
                muxer.flush(demuxed.serialno)?;
            }

            packets += 1;
            if let Some(pb) = pb {
                pb.set_position(packets);
                pb.set_message(format!("{} pages written", muxer.pages_written()));
            }
        }
        Ok(true)
    })?;

    if demuxer.pending_bytes() > 0 {
        log::warn!(
            "Discarding {} trailing bytes that do not form a page",
            demuxer.pending_bytes()
        );
    }
    if !muxer.all_streams_ended() {
        log::warn!("Input ended before every logical stream was closed");
    }

    let mut streams = 0;
    for serialno in demuxer.streams().map(|stats| stats.serialno) {
        muxer.flush(serialno)?;
        streams += 1;
    }

    let pages = muxer.pages_written();
    let bytes = muxer.bytes_written();
    muxer.finish()?;

    Ok(RemuxSummary {
        streams,
        packets,
        pages,
        bytes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use oggframe::framing::packet::Packet;
    use oggframe::process::EXAMPLE_DATA;
    use std::cell::RefCell;
    use std::io::Cursor;
    use std::rc::Rc;

    /// Writer whose contents stay reachable after the muxer consumes it.
    #[derive(Clone, Default)]
    struct SharedBuffer(Rc<RefCell<Vec<u8>>>);

    impl Write for SharedBuffer {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.borrow_mut().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn remux(data: Vec<u8>) -> Result<(RemuxSummary, Vec<u8>)> {
        let out = SharedBuffer::default();
        let input = InputReader::from_reader(Cursor::new(data));
        let summary = remux_stream(input, out.clone(), log::Level::Error, None)?;
        let bytes = out.0.borrow().clone();
        Ok((summary, bytes))
    }

    #[test]
    fn example_data_is_reproduced() -> Result<()> {
        let (summary, bytes) = remux(EXAMPLE_DATA.to_vec())?;
        assert_eq!(bytes, EXAMPLE_DATA);
        assert_eq!(
            summary,
            RemuxSummary {
                streams: 1,
                packets: 2,
                pages: 2,
                bytes: EXAMPLE_DATA.len() as u64,
            }
        );
        Ok(())
    }

    #[test]
    fn garbage_is_dropped_and_pages_renumbered() -> Result<()> {
        let mut muxer = Muxer::new(Vec::new());
        for i in 0..6u8 {
            let data = vec![i; 100];
            let packet = Packet::new(&data)
                .with_granulepos(i as i64 * 100)
                .with_eos(i == 5);
            muxer.write_packet(0xAB, &packet)?;
            muxer.flush(0xAB)?;
        }
        let clean = muxer.finish()?;
        let page_len = clean.len() / 6;

        // Drop the third page and wedge noise between the others.
        let mut damaged = clean[..2 * page_len].to_vec();
        damaged.extend_from_slice(&[0x55; 40]);
        damaged.extend_from_slice(&clean[3 * page_len..]);

        let (summary, bytes) = remux(damaged)?;
        assert_eq!(summary.packets, 5);
        assert_eq!(summary.pages, 5);

        let mut demuxer = Demuxer::default();
        demuxer.push_bytes(&bytes);
        let packets = demuxer.by_ref().collect::<Result<Vec<_>, _>>()?;
        assert_eq!(packets.len(), 5);
        assert_eq!(demuxer.lost_sync_count(), 0);
        assert_eq!(demuxer.stream_stats(0xAB).unwrap().gaps, 0);
        assert_eq!(packets[2].packet.data, vec![3; 100]);
        Ok(())
    }

    #[test]
    fn strict_mode_stops_on_gap() {
        let mut muxer = Muxer::new(Vec::new());
        for i in 0..4u8 {
            muxer.write_packet(1, &Packet::new(&[i; 50]).with_granulepos(i as i64)).unwrap();
            muxer.flush(1).unwrap();
        }
        let clean = muxer.finish().unwrap();
        let page_len = clean.len() / 4;
        let mut damaged = clean[..page_len].to_vec();
        damaged.extend_from_slice(&clean[2 * page_len..]);

        let out = SharedBuffer::default();
        let input = InputReader::from_reader(Cursor::new(damaged));
        assert!(remux_stream(input, out, log::Level::Warn, None).is_err());
    }
}
