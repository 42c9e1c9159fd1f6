use std::collections::BTreeMap;

use anyhow::Result;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use serde::Serialize;

use super::command::{Cli, InfoArgs, OutputFormat};
use crate::input::InputReader;
use oggframe::framing::packet::NO_GRANULEPOS;
use oggframe::process::demux::{DemuxedPacket, Demuxer, StreamStats};
use oggframe::process::probe::{Codec, StreamHeader, probe};

/// Opus granule positions always count 48 kHz samples.
const OPUS_GRANULE_RATE: u32 = 48000;

pub fn cmd_info(args: &InfoArgs, cli: &Cli, multi: Option<&MultiProgress>) -> Result<()> {
    log::info!("Analyzing Ogg stream: {}", args.input.display());

    let input = InputReader::new(&args.input)?;
    if input.is_pipe() {
        log::debug!("Reading Ogg data from stdin");
    }
    let pb = match multi {
        Some(multi) => Some(create_spinner(multi)?),
        None => None,
    };

    let report = analyze_stream(input, cli.fail_level(), pb.as_ref())?;

    if let Some(pb) = pb {
        pb.finish_and_clear();
    }

    if report.streams.is_empty() {
        println!("No Ogg pages found in the input.");
        println!("This doesn't appear to be a valid Ogg stream.");
        return Ok(());
    }

    match args.format {
        OutputFormat::Text => display_report(&report),
        OutputFormat::Yaml => print!("{}", serde_yaml_ng::to_string(&report)?),
    }

    Ok(())
}

fn create_spinner(multi: &MultiProgress) -> Result<ProgressBar> {
    let pb = multi.add(ProgressBar::new_spinner());
    pb.set_style(ProgressStyle::with_template("{spinner:.green} {msg}")?);
    pb.enable_steady_tick(std::time::Duration::from_millis(100));
    pb.set_message("Analyzing pages...");
    Ok(pb)
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Report {
    bytes: u64,
    pages: u64,
    lost_sync: u64,
    skipped_bytes: u64,
    streams: Vec<StreamReport>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct StreamReport {
    serialno: String,
    codec: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    channels: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    sample_rate: Option<u32>,
    pages: u64,
    rejected_pages: u64,
    packets: u64,
    packet_bytes: u64,
    gaps: u64,
    complete: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    first_granulepos: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    last_granulepos: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    duration: Option<String>,
}

impl StreamReport {
    fn new(stats: &StreamStats, header: Option<&StreamHeader>) -> Self {
        let codec = header.map_or(Codec::Unknown, |header| header.codec);

        Self {
            serialno: format!("{:08X}", stats.serialno),
            codec: codec.to_string(),
            channels: header.and_then(|header| header.channels),
            sample_rate: header.and_then(|header| header.sample_rate),
            pages: stats.pages,
            rejected_pages: stats.rejected_pages,
            packets: stats.packets,
            packet_bytes: stats.packet_bytes,
            gaps: stats.gaps,
            complete: stats.bos_seen && stats.eos_seen && stats.gaps == 0,
            first_granulepos: stats.first_granulepos,
            last_granulepos: stats.last_granulepos,
            duration: header
                .and_then(|header| duration_secs(header, stats.last_granulepos))
                .map(time_str),
        }
    }
}

/// Playback time at the last granule position of an audio stream.
fn duration_secs(header: &StreamHeader, last_granulepos: Option<i64>) -> Option<f64> {
    let granulepos = last_granulepos.filter(|&granulepos| granulepos != NO_GRANULEPOS)?;

    let (rate, skip) = match header.codec {
        Codec::Opus => (OPUS_GRANULE_RATE, header.pre_skip.unwrap_or(0)),
        Codec::Vorbis | Codec::Flac | Codec::Speex => (header.sample_rate?, 0),
        Codec::Theora | Codec::Unknown => return None,
    };
    if rate == 0 {
        return None;
    }

    let samples = (granulepos - skip as i64).max(0);
    Some(samples as f64 / rate as f64)
}

fn time_str(secs: f64) -> String {
    let total_ms = (secs * 1000.0).round() as u64;
    let (hours, rest) = (total_ms / 3_600_000, total_ms % 3_600_000);
    let (minutes, rest) = (rest / 60_000, rest % 60_000);
    let (seconds, millis) = (rest / 1000, rest % 1000);

    format!("{hours:02}:{minutes:02}:{seconds:02}.{millis:03}")
}

#[derive(Default)]
struct AnalysisContext {
    headers: BTreeMap<u32, StreamHeader>,
    packet_count: u64,
    pb: Option<ProgressBar>,
}

impl AnalysisContext {
    fn process_packet(&mut self, demuxed: &DemuxedPacket) {
        self.headers.entry(demuxed.serialno).or_insert_with(|| {
            match probe(&demuxed.packet.data) {
                Ok(header) => {
                    log::debug!("Stream {:08X} carries {}", demuxed.serialno, header.codec);
                    header
                }
                Err(e) => {
                    log::warn!("Stream {:08X}: {e}", demuxed.serialno);
                    StreamHeader {
                        codec: Codec::detect(&demuxed.packet.data),
                        channels: None,
                        sample_rate: None,
                        pre_skip: None,
                    }
                }
            }
        });

        self.packet_count += 1;

        if self.packet_count.is_multiple_of(1000) {
            if let Some(ref pb) = self.pb {
                pb.set_message(format!("Analyzing packets...       {}", self.packet_count));
                pb.tick();
            }
        }
    }
}

fn analyze_stream(
    mut input: InputReader,
    fail_level: log::Level,
    pb: Option<&ProgressBar>,
) -> Result<Report> {
    let mut demuxer = Demuxer::default();
    demuxer.set_fail_level(fail_level);

    let mut context = AnalysisContext {
        pb: pb.cloned(),
        ..Default::default()
    };

    input.process_chunks(&mut demuxer, |demuxer| {
        for result in demuxer.by_ref() {
            match result {
                Ok(demuxed) => context.process_packet(&demuxed),
                Err(e) if fail_level == log::Level::Warn => return Err(e.into()),
                Err(e) => log::warn!("{e}"),
            }
        }
        Ok(true)
    })?;

    let streams = demuxer
        .streams()
        .map(|stats| StreamReport::new(stats, context.headers.get(&stats.serialno)))
        .collect();

    Ok(Report {
        bytes: input.total_bytes(),
        pages: demuxer.page_count(),
        lost_sync: demuxer.lost_sync_count(),
        skipped_bytes: demuxer.skipped_bytes(),
        streams,
    })
}

fn display_report(report: &Report) {
    println!();
    println!("Ogg Stream Information");
    println!("======================");
    println!();

    for stream in &report.streams {
        display_stream(stream);
    }

    println!("Analysis Summary");
    println!("  Pages processed           {}", report.pages);
    let size_mb = report.bytes as f64 / 1_000_000.0;
    println!("  Size                      {size_mb:.2} MB ({} bytes)", report.bytes);
    if report.lost_sync > 0 {
        println!(
            "  Lost sync                 {} times, {} bytes skipped",
            report.lost_sync, report.skipped_bytes
        );
    }
    println!();
}

fn display_stream(stream: &StreamReport) {
    println!("Logical Stream {}", stream.serialno);
    println!("  Codec                     {}", stream.codec);
    if let Some(channels) = stream.channels {
        println!("  Channels                  {channels}");
    }
    if let Some(sample_rate) = stream.sample_rate {
        println!("  Sampling rate             {sample_rate} Hz");
    }
    println!("  Pages                     {}", stream.pages);
    if stream.rejected_pages > 0 {
        println!("  Rejected pages            {}", stream.rejected_pages);
    }
    println!(
        "  Packets                   {} ({} bytes)",
        stream.packets, stream.packet_bytes
    );
    if let (Some(first), Some(last)) = (stream.first_granulepos, stream.last_granulepos) {
        println!("  Granule positions         {first} to {last}");
    }
    if let Some(duration) = &stream.duration {
        println!("  Duration                  {duration}");
    }
    println!("  Gaps                      {}", stream.gaps);
    println!("  Complete                  {}", stream.complete);
    println!();
}
