//! Readable-to-indexed term encoding
//!
//! Keys read from the external store are readable text. Before a key can be
//! looked up in a term dictionary it must be converted to the exact bytes the
//! index stored for that field, so lookups are exact-match rather than
//! analyzed full-text matches.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// How a field's readable values are turned into indexed terms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TermEncoding {
    /// UTF-8 bytes of the value, unchanged
    #[default]
    Text,
    /// 32-bit signed integer, big-endian with the sign bit flipped
    Int,
    /// 64-bit signed integer, big-endian with the sign bit flipped
    Long,
}

impl TermEncoding {
    /// Encode `readable` into `out`, replacing its contents.
    ///
    /// # Errors
    ///
    /// Returns `MalformedEntry` if the value is not valid for a numeric
    /// encoding.
    pub fn encode(&self, readable: &str, out: &mut Vec<u8>) -> Result<()> {
        out.clear();
        match self {
            TermEncoding::Text => out.extend_from_slice(readable.as_bytes()),
            TermEncoding::Int => {
                let v: i32 = readable.parse().map_err(|_| {
                    Error::malformed(format!("'{}' is not a valid int term", readable))
                })?;
                out.extend_from_slice(&((v as u32) ^ 0x8000_0000).to_be_bytes());
            }
            TermEncoding::Long => {
                let v: i64 = readable.parse().map_err(|_| {
                    Error::malformed(format!("'{}' is not a valid long term", readable))
                })?;
                out.extend_from_slice(&((v as u64) ^ 0x8000_0000_0000_0000).to_be_bytes());
            }
        }
        Ok(())
    }

    /// Convenience wrapper returning a fresh buffer
    pub fn encode_to_vec(&self, readable: &str) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        self.encode(readable, &mut out)?;
        Ok(out)
    }
}
