/*
 *  Copyright (C) 2025 Michael Bachmann
 *
 *  This program is free software: you can redistribute it and/or modify
 *  it under the terms of the GNU Affero General Public License as published by
 *  the Free Software Foundation, either version 3 of the License, or
 *  (at your option) any later version.
 *
 *  This program is distributed in the hope that it will be useful,
 *  but WITHOUT ANY WARRANTY; without even the implied warranty of
 *  MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 *  GNU Affero General Public License for more details.
 *
 *  You should have received a copy of the GNU Affero General Public License
 *  along with this program.  If not, see <https://www.gnu.org/licenses/>.
 */

//! Tracks how far the sender's stream sits ahead of the playout head and
//! stages a soft skip/duplicate correction once that drift has sat outside
//! the hysteresis band long enough to be a trend rather than jitter. The
//! *hard* resync path (a single wildly out-of-range packet) is not this
//! controller's job — it lives in [`crate::ring::Ring::place`] and the
//! receive loop, since it has to fire on the very packet that caused it, not
//! after thousands of ticks of a barely-moving EWMA. See `SPEC_FULL.md` §4.3.

use tracing::{info, warn};

/// Blend factor for the drift EWMA, `localPositionBlend` in the original.
/// Small on purpose: the controller should react to a sustained trend, not
/// to any single packet's jitter.
pub const DEFAULT_BLEND: f64 = 0.0002;

/// Rounds a signed byte count down toward zero to the nearest whole frame,
/// mirroring `frameAlign(f) = ((int)f)/4*4` for a signed quantity.
pub fn frame_align_signed(bytes: i64) -> i64 {
    (bytes / 4) * 4
}

/// What the controller recommends after observing the latest packet.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Correction {
    /// Drift is within the hysteresis band; nothing to do.
    None,
    /// Drift has sat outside the band: stage this many bytes to add to (or,
    /// if negative, subtract from) the next period's consume amount. The
    /// receive loop clears this back to zero once it has been applied.
    Stage(i64),
}

/// EWMA-based drift tracker over raw `localPosition` (sender position minus
/// ring base position), not a derived "drift from target" quantity —
/// matching `localPositionAvg` in the original verbatim so the hysteresis
/// comparison against `desiredLocalPosition` reads the same way.
pub struct DriftController {
    blend: f64,
    desired_local_position: i64,
    max_drift_bytes: i64,
    avg: f64,
    initialized: bool,
}

impl DriftController {
    pub fn new(desired_local_position: i64, max_drift_bytes: i64) -> Self {
        Self::with_blend(desired_local_position, max_drift_bytes, DEFAULT_BLEND)
    }

    pub fn with_blend(desired_local_position: i64, max_drift_bytes: i64, blend: f64) -> Self {
        Self {
            blend,
            desired_local_position,
            max_drift_bytes,
            avg: 0.0,
            initialized: false,
        }
    }

    /// Folds the newest packet's `localPosition` (its sender position minus
    /// the ring's base position, after placement) into the running average.
    /// Callers must only invoke this for packets that were actually placed —
    /// late-dropped packets and packets that triggered an immediate resync
    /// never reach here (see `SPEC_FULL.md` §4.3 scenario S4, and the reset
    /// path below for S5).
    pub fn observe(&mut self, local_position: i64) {
        let sample = local_position as f64;
        if !self.initialized {
            self.avg = sample;
            self.initialized = true;
        } else {
            self.avg = (1.0 - self.blend) * self.avg + self.blend * sample;
        }
    }

    /// Current smoothed `localPosition` estimate, in bytes.
    pub fn local_position_estimate(&self) -> f64 {
        self.avg
    }

    /// Checks the smoothed estimate against the hysteresis band around
    /// `desiredLocalPosition` and, if it has drifted outside, stages a
    /// correction and damps the average back toward the target — exactly
    /// `samplesTooMuch`/`localPositionAvg` update in `alsa-receiver.c:275-289`,
    /// run once per successfully placed packet.
    pub fn correction(&mut self) -> Correction {
        if !self.initialized {
            return Correction::None;
        }

        let desired = self.desired_local_position as f64;
        let max_drift = self.max_drift_bytes as f64;

        if self.avg > desired + max_drift || self.avg < desired - max_drift {
            let staged = frame_align_signed((self.avg - desired) as i64);
            self.avg = 0.1 * desired + 0.9 * self.avg;
            warn!(
                staged,
                avg = self.avg,
                desired = self.desired_local_position,
                "drift outside hysteresis band, staging correction"
            );
            Correction::Stage(staged)
        } else {
            Correction::None
        }
    }

    /// Re-seeds the average after an immediate hard resync: the ring's base
    /// position has just been recomputed so that the triggering packet's
    /// `localPosition` equals `frameAlign(desiredLocalPosition)` exactly, so
    /// the average is seeded there rather than to zero.
    pub fn reset_after_resync(&mut self) {
        info!("drift controller reset after resync");
        self.avg = frame_align_signed(self.desired_local_position) as f64;
        self.initialized = true;
    }
}
