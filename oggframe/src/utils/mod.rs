//! Utility functions and supporting infrastructure.
//!
//! Provides the page CRC and the error types shared by the framing layer.

pub mod crc;
pub mod errors;
