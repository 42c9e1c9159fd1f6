#[macro_export]
macro_rules! log_or_err {
    ($state:expr, $level:expr, $err:expr $(,)?) => {{
        if $level <= $state.fail_level {
            return Err($err);
        } else {
            match $level {
                ::log::Level::Error => ::log::error!("{}", $err),
                ::log::Level::Warn => ::log::warn!("{}", $err),
                ::log::Level::Info => ::log::info!("{}", $err),
                ::log::Level::Debug => ::log::debug!("{}", $err),
                ::log::Level::Trace => ::log::trace!("{}", $err),
            }
        }
    }};
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    #[error("Insufficient buffered data for a complete page")]
    InsufficientData,

    #[error("Lost sync: skipped {skipped} bytes looking for a capture pattern")]
    LostSync { skipped: usize },

    #[error("Wrote {requested} bytes but only {available} bytes were reserved")]
    BufferOverrun { requested: usize, available: usize },
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum StreamError {
    #[error("Page belongs to stream {found:#010X}, expected {expected:#010X}")]
    SerialMismatch { expected: u32, found: u32 },

    #[error("Unsupported stream structure version {0}")]
    UnsupportedVersion(u8),

    #[error("Segment table laces {laced} bytes but the page body holds {body}")]
    BodyLengthMismatch { laced: usize, body: usize },

    #[error("Insufficient buffered data for a complete packet or page")]
    InsufficientData,

    #[error("Hole in data before packet {packetno}")]
    DataGap { packetno: i64 },
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum DemuxError {
    #[error("Lost sync: skipped {skipped} bytes of unframed data")]
    LostSync { skipped: usize },

    #[error("Stream {serialno:#010X}: hole in data before packet {packetno}")]
    DataGap { serialno: u32, packetno: i64 },

    #[error("Stream {serialno:#010X}: {source}")]
    Stream {
        serialno: u32,
        #[source]
        source: StreamError,
    },
}

#[derive(thiserror::Error, Debug)]
pub enum ProbeError {
    #[error("Identification header is truncated")]
    Truncated,

    #[error("Malformed identification header: {0}")]
    Io(#[from] std::io::Error),
}
