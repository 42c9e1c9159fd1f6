/// Physical stream demultiplexing.
///
/// Provides the [`Demuxer`](demux::Demuxer) that frames pages from raw bytes
/// and routes them to one [`StreamState`](crate::framing::stream::StreamState)
/// per serial number, yielding [`DemuxedPacket`](demux::DemuxedPacket)s.
pub mod demux;

/// Physical stream multiplexing.
///
/// Provides the [`Muxer`](mux::Muxer) that paginates packets from any number
/// of logical streams into a writer.
pub mod mux;

/// Codec identification from the first packet of a logical stream.
pub mod probe;

/// Two pages of a logical stream with serial number `0x5EED`: an Opus
/// identification header on the first page and a three byte packet with
/// granule position 960 on the last.
pub const EXAMPLE_DATA: &[u8] = &[
    0x4F, 0x67, 0x67, 0x53, 0x00, 0x02, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0xED, 0x5E,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x1F, 0x17, 0x06, 0x55, 0x01, 0x13, 0x4F, 0x70, 0x75, 0x73,
    0x48, 0x65, 0x61, 0x64, 0x01, 0x02, 0x38, 0x01, 0x80, 0xBB, 0x00, 0x00, 0x00, 0x00, 0x00, 0x4F,
    0x67, 0x67, 0x53, 0x00, 0x04, 0xC0, 0x03, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0xED, 0x5E, 0x00,
    0x00, 0x01, 0x00, 0x00, 0x00, 0xC1, 0x6B, 0x84, 0x78, 0x01, 0x03, 0xFC, 0xFF, 0xFE,
];

#[test]
fn example_data_frames() {
    use crate::framing::sync::SyncState;

    let mut sync = SyncState::new();
    sync.write(EXAMPLE_DATA);

    let first = sync.pageout().unwrap();
    assert!(first.bos());
    assert_eq!(first.serialno(), 0x5EED);
    assert_eq!(first.body().len(), 19);

    let last = sync.pageout().unwrap();
    assert!(last.eos());
    assert_eq!(last.pageno(), 1);
    assert_eq!(last.granulepos(), 960);
    assert_eq!(last.body(), &[0xFC, 0xFF, 0xFE]);
}
