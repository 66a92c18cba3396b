//! UDP payload header stamped at the front of every datagram.
//!
//! ```text
//! 32-bit variant (12 bytes)          64-bit variant (16 bytes)
//! [0..4]   seconds      (u32 BE)     [0..4]   seconds      (u32 BE)
//! [4..8]   microseconds (u32 BE)     [4..8]   microseconds (u32 BE)
//! [8..12]  packet count (u32 BE)     [8..16]  packet count (u64 BE)
//! ```

use std::time::Duration;

/// Header wire variant, chosen once per test.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderFormat {
    Counter32,
    Counter64,
}

impl HeaderFormat {
    pub fn from_flag(counters_64bit: bool) -> Self {
        if counters_64bit {
            Self::Counter64
        } else {
            Self::Counter32
        }
    }

    /// Encoded size in bytes.
    pub const fn encoded_len(self) -> usize {
        match self {
            Self::Counter32 => 12,
            Self::Counter64 => 16,
        }
    }

    /// Write the header into the front of `buf`.
    ///
    /// The counter is truncated to 32 bits in the 32-bit variant.
    ///
    /// # Panics
    /// Panics if `buf` is shorter than [`HeaderFormat::encoded_len`]. Payload sizes
    /// are validated against the header when the connection is set up.
    pub fn stamp(self, buf: &mut [u8], timestamp: Duration, counter: u64) {
        buf[0..4].copy_from_slice(&(timestamp.as_secs() as u32).to_be_bytes());
        buf[4..8].copy_from_slice(&timestamp.subsec_micros().to_be_bytes());
        match self {
            Self::Counter32 => buf[8..12].copy_from_slice(&(counter as u32).to_be_bytes()),
            Self::Counter64 => buf[8..16].copy_from_slice(&counter.to_be_bytes()),
        }
    }

    /// Parse a header from the front of a datagram. Returns None if too short.
    pub fn decode(self, data: &[u8]) -> Option<PayloadHeader> {
        if data.len() < self.encoded_len() {
            return None;
        }
        let seconds = u32::from_be_bytes(data[0..4].try_into().ok()?);
        let microseconds = u32::from_be_bytes(data[4..8].try_into().ok()?);
        let counter = match self {
            Self::Counter32 => u32::from_be_bytes(data[8..12].try_into().ok()?) as u64,
            Self::Counter64 => u64::from_be_bytes(data[8..16].try_into().ok()?),
        };
        Some(PayloadHeader {
            seconds,
            microseconds,
            counter,
        })
    }
}

/// Parsed UDP payload header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PayloadHeader {
    pub seconds: u32,
    pub microseconds: u32,
    pub counter: u64,
}

/// Current `CLOCK_MONOTONIC` reading, the clock receivers compare against.
#[cfg(unix)]
pub fn monotonic_timestamp() -> Duration {
    let mut ts = libc::timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    // SAFETY: `ts` is a valid, writable timespec for the duration of the call.
    let rc = unsafe { libc::clock_gettime(libc::CLOCK_MONOTONIC, &mut ts) };
    if rc != 0 {
        return Duration::ZERO;
    }
    Duration::new(ts.tv_sec as u64, ts.tv_nsec as u32)
}

#[cfg(not(unix))]
pub fn monotonic_timestamp() -> Duration {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
}
