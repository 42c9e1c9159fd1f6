#![doc = include_str!("../README.md")]
//!
//! ## Technical Overview
//!
//! Framing layer of the Ogg container: the part that turns codec packets
//! into a checksummed, resynchronisable byte stream and back.
//!
//! ### Bitstream Organization
//!
//! **Physical stream**: a sequence of pages, each starting with the `OggS`
//! capture pattern and protected by a CRC-32.
//! **Logical streams**: pages carry a serial number; pages of several
//! logical streams may be interleaved.
//! **Packets**: split into segments of at most 255 bytes. A segment shorter
//! than 255 bytes ends a packet, so packets may span pages.
//!
//! ### Error Recovery
//!
//! Corrupted or truncated pages are skipped by scanning for the next capture
//! pattern. Missing pages are reported once per hole and never surface a
//! packet assembled across the hole.
//!
//! ## Quick Start
//!
//! Steps for reading a physical stream:
//!
//! 1. Push raw bytes into a [`process::demux::Demuxer`]
//! 2. Iterate over it to receive the packets of every logical stream
//! 3. Identify each stream from its first packet with [`process::probe::probe`]
//!
//! ```rust
//! use oggframe::process::{EXAMPLE_DATA, demux::Demuxer, probe::probe};
//!
//! let mut demuxer = Demuxer::default();
//! demuxer.push_bytes(EXAMPLE_DATA);
//!
//! for result in demuxer.by_ref() {
//!     match result {
//!         Ok(demuxed) if demuxed.packet.bos => {
//!             let header = probe(&demuxed.packet.data)?;
//!             println!("stream {:#010X}: {}", demuxed.serialno, header.codec);
//!         }
//!         Ok(demuxed) => {
//!             let granulepos = demuxed.packet.granulepos;
//!             println!("{} bytes, granule {granulepos}", demuxed.packet.data.len());
//!         }
//!         Err(demux_error) => {
//!             // Reported once per problem; iteration continues
//!             eprintln!("Demux error: {demux_error}");
//!         }
//!     }
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! Writing goes the other way through [`process::mux::Muxer`], or page by
//! page through [`framing::stream::StreamState`].

/// Framing primitives: pages, packets, sync and per-stream state.
///
/// - **Pages** ([`framing::page`]): header accessors and checksums
/// - **Packets** ([`framing::packet`]): borrowed and owned packets
/// - **Sync** ([`framing::sync`]): page capture from arbitrary input
/// - **Streams** ([`framing::stream`]): lacing, gap detection and pagination
pub mod framing;

/// Processing of whole physical streams.
///
/// 1. **Demultiplexing** ([`process::demux`]): bytes to per-stream packets.
///
/// 2. **Multiplexing** ([`process::mux`]): packets to pages in a writer.
///
/// 3. **Probing** ([`process::probe`]): codec identification headers.
pub mod process;

/// Utility functions and supporting infrastructure.
///
/// - **CRC Validation** ([`utils::crc`]): page checksums
/// - **Error Handling** ([`utils::errors`]): Error types
pub mod utils;
