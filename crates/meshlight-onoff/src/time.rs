//! Compact 8-bit encoding of transition and remaining times.
//!
//! The top two bits select a step resolution, the low six bits count steps:
//!
//! ```text
//!   7 6 5 4 3 2 1 0
//!  +---+-----------+
//!  |res|   steps   |
//!  +---+-----------+
//! ```
//!
//! | res | unit      |
//! |-----|-----------|
//! | 0   | 100 ms    |
//! | 1   | 1 s       |
//! | 2   | 10 s      |
//! | 3   | 10 min    |
//!
//! `steps == 63` means the time is indefinite (unknown or too long).

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Step unit in milliseconds for each resolution index.
pub const RESOLUTION_MS: [u64; 4] = [100, 1_000, 10_000, 600_000];

/// Step count reserved for the indefinite sentinel.
pub const INDEFINITE_STEPS: u8 = 0x3F;

/// Largest step count a finite time may use.
pub const MAX_STEPS: u8 = INDEFINITE_STEPS - 1;

/// Encoded indefinite time.
pub const INDEFINITE: u8 = (3 << 6) | INDEFINITE_STEPS;

/// Unit of the delay field carried in SET messages.
pub const DELAY_STEP_MS: u64 = 5;

/// Finite encodable ceiling: anything at or above saturates to indefinite.
pub const CEILING_MS: u64 = INDEFINITE_STEPS as u64 * RESOLUTION_MS[3];

/// A transition or remaining time as carried by the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModelTime {
    /// A known duration.
    Finite(Duration),
    /// No timeout, or a time too long to represent.
    Indefinite,
}

impl ModelTime {
    /// Zero duration.
    pub const ZERO: Self = Self::Finite(Duration::ZERO);

    /// Construct from milliseconds.
    pub const fn from_millis(ms: u64) -> Self {
        Self::Finite(Duration::from_millis(ms))
    }

    /// The finite duration, if any.
    pub const fn duration(self) -> Option<Duration> {
        match self {
            Self::Finite(d) => Some(d),
            Self::Indefinite => None,
        }
    }

    /// Check if this is the indefinite sentinel.
    pub const fn is_indefinite(self) -> bool {
        matches!(self, Self::Indefinite)
    }
}

impl std::fmt::Display for ModelTime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Finite(d) => write!(f, "{} ms", d.as_millis()),
            Self::Indefinite => write!(f, "indefinite"),
        }
    }
}

impl From<Duration> for ModelTime {
    fn from(d: Duration) -> Self {
        Self::Finite(d)
    }
}

/// Decode an encoded time byte.
pub const fn decode(byte: u8) -> ModelTime {
    let resolution = (byte >> 6) as usize;
    let steps = byte & INDEFINITE_STEPS;

    if steps == INDEFINITE_STEPS {
        return ModelTime::Indefinite;
    }

    ModelTime::from_millis(steps as u64 * RESOLUTION_MS[resolution])
}

/// Encode a time into its byte representation.
///
/// Picks the finest resolution whose range holds the duration and rounds the
/// step count up, capped at [`MAX_STEPS`] so a finite time never reads back as
/// indefinite. Durations at or above [`CEILING_MS`] saturate to [`INDEFINITE`].
pub fn encode(time: ModelTime) -> u8 {
    let ms = match time {
        ModelTime::Finite(d) => d.as_millis(),
        ModelTime::Indefinite => return INDEFINITE,
    };

    for (index, &unit) in RESOLUTION_MS.iter().enumerate() {
        let unit = u128::from(unit);
        if ms >= u128::from(INDEFINITE_STEPS) * unit {
            continue;
        }

        // ms < 63 * unit here, so the quotient fits in u8
        let steps = (ms.div_ceil(unit) as u8).min(MAX_STEPS);
        return ((index as u8) << 6) | steps;
    }

    INDEFINITE
}

/// Decode the SET delay field (5 ms per step).
pub const fn decode_delay(byte: u8) -> Duration {
    Duration::from_millis(byte as u64 * DELAY_STEP_MS)
}

/// Encode a delay, rounding up and saturating at 255 steps.
pub fn encode_delay(delay: Duration) -> u8 {
    let steps = delay.as_millis().div_ceil(u128::from(DELAY_STEP_MS));
    u8::try_from(steps).unwrap_or(u8::MAX)
}
