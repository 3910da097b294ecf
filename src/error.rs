// SPDX-License-Identifier: GPL-3.0-or-later
//! Typed errors for the analysis core.
//!
//! Structural violations (`Malformed`, `Unsupported`) are fatal to the object
//! being processed; the driver decides whether to abort the whole run.
//! Undecodable instructions and prologue-matcher bailouts are *not* errors:
//! they are recorded on the affected function and analysis continues.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DisasmError {
    /// A structural violation in a container, link table, or linked word.
    #[error("malformed {what} at segment {seg}, word offset {offset:#x}")]
    Malformed {
        what: String,
        seg: usize,
        offset: usize,
    },

    /// A structural violation without a meaningful segment location.
    #[error("malformed {0}")]
    MalformedContainer(String),

    /// Unknown object version, segment count, or link opcode.
    #[error("unsupported {0}")]
    Unsupported(String),

    /// Read past the end of a buffer.
    #[error("out of bounds: {wanted} bytes at offset {at:#x} of {len:#x}")]
    OutOfBounds { at: usize, wanted: usize, len: usize },

    /// Error in the compressed container stream.
    #[error("decompression failed: {0}")]
    Decompress(String),

    /// Missing or invalid configuration fields.
    #[error("bad configuration: {0}")]
    Config(String),
}

impl DisasmError {
    pub fn malformed(what: impl Into<String>, seg: usize, offset: usize) -> Self {
        DisasmError::Malformed {
            what: what.into(),
            seg,
            offset,
        }
    }
}

pub type Result<T, E = DisasmError> = std::result::Result<T, E>;
