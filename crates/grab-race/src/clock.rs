//! # Clock Synchronizer
//!
//! Estimates `trusted time - local time` by sampling an SNTP server.
//!
//! ## Sampling
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  sample 1 ──gap──► sample 2 ──gap──► sample 3                           │
//! │     │                 │                 │                               │
//! │     ▼                 ▼                 ▼                               │
//! │  remote - local    (timeout,         remote - local                     │
//! │                     discarded)                                          │
//! │                                                                         │
//! │  offset = mean(successful samples)                                      │
//! │  no successful samples → offset 0, degraded (warning, never an error)   │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## SNTP Packet (48 bytes)
//! - byte 0: `LI=0, VN=3, Mode=3` (client) → `0x1B`
//! - bytes 40..48: transmit timestamp, seconds since 1900 + 32-bit fraction

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use tokio::net::UdpSocket;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use grab_core::ClockOffset;

use crate::error::{RaceError, RaceResult};

/// Seconds between 1900-01-01 and 1970-01-01.
pub const NTP_UNIX_EPOCH_DELTA: i64 = 2_208_988_800;

const SNTP_PACKET_LEN: usize = 48;
const SNTP_CLIENT_HEADER: u8 = 0x1B;
const SNTP_MODE_SERVER: u8 = 4;

// =============================================================================
// Time Source
// =============================================================================

/// A remote clock that can be sampled.
#[async_trait]
pub trait TimeSource: Send + Sync {
    /// One sample: remote timestamp minus local timestamp at request.
    async fn sample(&self) -> RaceResult<TimeDelta>;

    /// Human-readable name for logs.
    fn describe(&self) -> String;
}

/// SNTP v3 client over UDP.
#[derive(Debug, Clone)]
pub struct SntpTimeSource {
    server: String,
}

impl SntpTimeSource {
    /// `server` is `host:port`.
    pub fn new(server: impl Into<String>) -> Self {
        SntpTimeSource {
            server: server.into(),
        }
    }
}

#[async_trait]
impl TimeSource for SntpTimeSource {
    async fn sample(&self) -> RaceResult<TimeDelta> {
        let socket = UdpSocket::bind("0.0.0.0:0")
            .await
            .map_err(|e| RaceError::Clock(e.to_string()))?;
        socket
            .connect(self.server.as_str())
            .await
            .map_err(|e| RaceError::Clock(format!("{}: {}", self.server, e)))?;

        let mut request = [0u8; SNTP_PACKET_LEN];
        request[0] = SNTP_CLIENT_HEADER;

        let local = Utc::now();
        socket
            .send(&request)
            .await
            .map_err(|e| RaceError::Clock(e.to_string()))?;

        let mut buf = [0u8; 64];
        let len = socket
            .recv(&mut buf)
            .await
            .map_err(|e| RaceError::Clock(e.to_string()))?;

        let remote = parse_transmit_timestamp(&buf[..len])?;
        Ok(remote - local)
    }

    fn describe(&self) -> String {
        self.server.clone()
    }
}

/// Decodes the server transmit timestamp of an SNTP reply.
pub fn parse_transmit_timestamp(packet: &[u8]) -> RaceResult<DateTime<Utc>> {
    if packet.len() < SNTP_PACKET_LEN {
        return Err(RaceError::Clock(format!(
            "short reply: {} bytes",
            packet.len()
        )));
    }
    if packet[0] & 0x07 != SNTP_MODE_SERVER {
        return Err(RaceError::Clock(format!(
            "unexpected mode {}",
            packet[0] & 0x07
        )));
    }

    let seconds = u32::from_be_bytes([packet[40], packet[41], packet[42], packet[43]]);
    let fraction = u32::from_be_bytes([packet[44], packet[45], packet[46], packet[47]]);
    if seconds == 0 {
        return Err(RaceError::Clock("empty transmit timestamp".into()));
    }

    let unix_seconds = i64::from(seconds) - NTP_UNIX_EPOCH_DELTA;
    let nanos = ((u64::from(fraction) * 1_000_000_000) >> 32) as u32;
    DateTime::from_timestamp(unix_seconds, nanos)
        .ok_or_else(|| RaceError::Clock("timestamp out of range".into()))
}

// =============================================================================
// Synchronizer
// =============================================================================

/// Sample count, spacing and per-sample timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncPolicy {
    pub samples: u32,
    pub sample_gap: Duration,
    pub sample_timeout: Duration,
}

impl Default for SyncPolicy {
    fn default() -> Self {
        SyncPolicy {
            samples: 3,
            sample_gap: Duration::from_millis(500),
            sample_timeout: Duration::from_secs(5),
        }
    }
}

/// Result of one synchronization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClockReading {
    pub offset: ClockOffset,
    pub samples_used: u32,
    /// True when no sample succeeded and the local clock is trusted as-is.
    pub degraded: bool,
}

/// Computes a [`ClockOffset`] from a [`TimeSource`].
#[derive(Clone)]
pub struct ClockSynchronizer {
    source: Arc<dyn TimeSource>,
    policy: SyncPolicy,
}

impl ClockSynchronizer {
    pub fn new(source: Arc<dyn TimeSource>, policy: SyncPolicy) -> Self {
        ClockSynchronizer { source, policy }
    }

    /// SNTP-backed synchronizer.
    pub fn sntp(server: impl Into<String>, policy: SyncPolicy) -> Self {
        Self::new(Arc::new(SntpTimeSource::new(server)), policy)
    }

    /// Samples the source and averages the successful samples.
    ///
    /// Never fails: with zero usable samples the offset is zero and the
    /// reading is marked degraded.
    pub async fn synchronize(&self) -> ClockReading {
        let total = self.policy.samples.max(1);
        let mut samples = Vec::with_capacity(total as usize);

        for i in 1..=total {
            match timeout(self.policy.sample_timeout, self.source.sample()).await {
                Ok(Ok(sample)) => {
                    debug!(
                        sample = i,
                        offset_ms = sample.num_milliseconds(),
                        "Clock sample"
                    );
                    samples.push(sample);
                }
                Ok(Err(e)) => {
                    warn!(sample = i, error = %e, "Clock sample failed");
                }
                Err(_) => {
                    warn!(
                        sample = i,
                        timeout_ms = self.policy.sample_timeout.as_millis() as u64,
                        "Clock sample timed out"
                    );
                }
            }

            if i < total {
                tokio::time::sleep(self.policy.sample_gap).await;
            }
        }

        match ClockOffset::mean(&samples) {
            Some(offset) => {
                info!(
                    source = %self.source.describe(),
                    %offset,
                    samples = samples.len(),
                    "Clock synchronized"
                );
                ClockReading {
                    offset,
                    samples_used: samples.len() as u32,
                    degraded: false,
                }
            }
            None => {
                warn!(
                    source = %self.source.describe(),
                    "All clock samples failed, trusting local clock"
                );
                ClockReading {
                    offset: ClockOffset::zero(),
                    samples_used: 0,
                    degraded: true,
                }
            }
        }
    }
}
