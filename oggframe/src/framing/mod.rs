//! Framing primitives.
//!
//! - **Pages** ([`page`]): checksummed physical units of the bitstream
//! - **Packets** ([`packet`]): logical units handed to and from codecs
//! - **Sync** ([`sync`]): locating pages in an arbitrary byte stream
//! - **Streams** ([`stream`]): lacing packets into pages and back

pub mod packet;
pub mod page;
pub mod stream;
pub mod sync;
