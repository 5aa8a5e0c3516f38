//! Scan value encoding and result types

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// Byte width of a scanned or read numeric value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValueWidth {
    W1,
    W2,
    W4,
    W8,
}

impl ValueWidth {
    /// Parse a wire `width` field; only 1, 2, 4 and 8 are supported
    pub fn from_u64(width: u64) -> Result<Self> {
        match width {
            1 => Ok(Self::W1),
            2 => Ok(Self::W2),
            4 => Ok(Self::W4),
            8 => Ok(Self::W8),
            other => Err(Error::UnsupportedWidth(other)),
        }
    }

    pub fn size(&self) -> usize {
        match self {
            Self::W1 => 1,
            Self::W2 => 2,
            Self::W4 => 4,
            Self::W8 => 8,
        }
    }

    /// Little-endian encoding of `value` truncated to this width.
    ///
    /// Two's complement makes the signed and unsigned encodings identical,
    /// so signedness only matters when decoding.
    pub fn encode(&self, value: i64) -> Vec<u8> {
        (value as u64).to_le_bytes()[..self.size()].to_vec()
    }

    /// Decode `bytes` (little-endian) with the given signedness.
    ///
    /// Returns a JSON number; short input is zero-padded.
    pub fn decode(&self, bytes: &[u8], signed: bool) -> serde_json::Value {
        let mut buf = [0u8; 8];
        let n = bytes.len().min(self.size());
        buf[..n].copy_from_slice(&bytes[..n]);
        let raw = u64::from_le_bytes(buf);

        if signed {
            let shift = 64 - (self.size() * 8) as u32;
            let value = ((raw << shift) as i64) >> shift;
            serde_json::json!(value)
        } else {
            serde_json::json!(raw)
        }
    }
}

/// One scan result entry: an address and its current value
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanHit {
    pub address: String,
    pub value: serde_json::Value,
}

/// One page of scan results
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanResultsPage {
    pub results: Vec<ScanHit>,
    pub total: usize,
    pub page: usize,
    #[serde(rename = "pageSize")]
    pub page_size: usize,
    #[serde(rename = "totalPages")]
    pub total_pages: usize,
}
