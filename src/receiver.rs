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

//! Receiver: a single cooperative event loop that reads a framed PCM stream
//! from an untrusted byte source, lands it in a jitter buffer sized for a
//! configured target latency, corrects for sender clock drift, and plays it
//! out. No extra threads, locks, or atomics here beyond the one shutdown
//! flag set by the Ctrl-C handler; see `SPEC_FULL.md` §5.

use crate::config::ConcealmentMode;
use crate::device::{BYTES_PER_FRAME, PlaybackDevice, SAMPLE_RATE};
use crate::drift::{Correction, DriftController};
use crate::error::RelayResult;
use crate::ring::{PlaceOutcome, Ring, align_frames};
use crate::time::{set_realtime_priority, wall_clock_nanos};
use crate::wire::{DataPacket, ReadOutcome, WireReader};
use std::io::Read;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// Playback period: how many bytes we try to hand the device per loop
/// iteration. 20ms at the fixed wire rate.
pub const PERIOD_BYTES: usize = SAMPLE_RATE as usize * BYTES_PER_FRAME / 50;

/// How wide the hysteresis band around the target latency is, as a
/// fraction of the target latency itself, before the drift controller
/// stages a correction.
const MAX_DRIFT_FRACTION: f64 = 0.125;

const IDLE_SLEEP: Duration = Duration::from_micros(500);

/// Ring starts anchored here instead of at position 0, so the very first
/// packet's implied offset is always negative and naturally triggers the
/// same immediate-resync path a stream restart would — no separate
/// "have we resynced yet" flag needed. `SPEC_FULL.md` §4.1 scenario S1.
const COLD_START_SENTINEL: u64 = 1u64 << 62;

/// Converts a target latency in seconds to a frame-aligned byte count at
/// the fixed wire rate.
pub fn latency_to_bytes(target_latency_secs: f64) -> usize {
    align_frames((target_latency_secs * SAMPLE_RATE as f64 * BYTES_PER_FRAME as f64) as usize)
        .max(BYTES_PER_FRAME)
}

pub struct Receiver<D: PlaybackDevice> {
    device: D,
    ring: Ring,
    wire: WireReader,
    drift: DriftController,
    concealment: ConcealmentMode,
    target_latency_nanos: u64,
    /// How far ahead of the ring base a packet should land once placed,
    /// `desiredLocalPosition` in the original. Also where a resync re-anchors
    /// the ring relative to the triggering packet's sender position.
    desired_local_position: i64,
    /// Correction staged by the drift controller but not yet applied to a
    /// consume amount. Cleared to 0 once a period applies it.
    staged_correction: i64,
}

impl<D: PlaybackDevice> Receiver<D> {
    pub fn new(device: D, target_latency_secs: f64, ring_bytes: Option<usize>, concealment: ConcealmentMode) -> Self {
        let target_latency_bytes = latency_to_bytes(target_latency_secs);
        let capacity = ring_bytes.map(align_frames).unwrap_or(target_latency_bytes * 2).max(target_latency_bytes);
        let max_drift_bytes = (target_latency_bytes as f64 * MAX_DRIFT_FRACTION) as i64;
        let mut ring = Ring::new(capacity);
        ring.resync(COLD_START_SENTINEL, concealment);

        Self {
            device,
            ring,
            wire: WireReader::new(),
            drift: DriftController::new(target_latency_bytes as i64, max_drift_bytes.max(BYTES_PER_FRAME as i64)),
            concealment,
            target_latency_nanos: (target_latency_secs * 1_000_000_000.0) as u64,
            desired_local_position: target_latency_bytes as i64,
            staged_correction: 0,
        }
    }

    /// Runs the receive/playout loop until the input stream closes or a
    /// shutdown is requested. Blocks the calling thread.
    #[instrument(skip(self, input))]
    pub fn run(mut self, mut input: impl Read) -> RelayResult<()> {
        set_realtime_priority();

        let shutdown = Arc::new(AtomicBool::new(false));
        {
            let shutdown = shutdown.clone();
            if let Err(e) = ctrlc::set_handler(move || shutdown.store(true, Ordering::SeqCst)) {
                warn!("failed to install Ctrl-C handler: {e}");
            }
        }

        loop {
            if shutdown.load(Ordering::SeqCst) {
                info!("shutdown requested, stopping");
                break;
            }

            match self.wire.poll(&mut input) {
                ReadOutcome::Eof => {
                    info!("input stream closed, stopping");
                    break;
                }
                ReadOutcome::Packets(packets) => {
                    for packet in packets {
                        self.handle_packet(packet)?;
                    }
                }
            }

            self.play_one_period()?;
            thread::sleep(IDLE_SLEEP);
        }

        Ok(())
    }

    /// Classifies and applies one incoming packet: dropped if it has already
    /// missed its play-out deadline, hard-resynced if its implied ring
    /// offset is out of range, otherwise placed and fed to the drift
    /// controller. Mirrors the `packetToPlayIn`/`localPosition` branches in
    /// `receiveInput()` (`alsa-receiver.c:218-265`).
    fn handle_packet(&mut self, packet: DataPacket) -> RelayResult<()> {
        let now = wall_clock_nanos()?;
        let play_deadline = packet.time.wrapping_add(self.target_latency_nanos);
        if play_deadline < now {
            warn!(position = packet.position, "packet arrived too late, dropping");
            return Ok(());
        }

        match self.ring.place(packet.position, &packet.payload) {
            PlaceOutcome::OutOfRange => {
                warn!(position = packet.position, "packet out of range, resyncing");
                let aligned_target = crate::drift::frame_align_signed(self.desired_local_position);
                let new_base = packet.position.wrapping_sub(aligned_target as u64);
                self.resync_to(new_base, packet.position);
            }
            PlaceOutcome::Placed => {
                let local_position = packet.position.wrapping_sub(self.ring.base_position()) as i64;
                self.drift.observe(local_position);
                if let Correction::Stage(staged) = self.drift.correction() {
                    self.staged_correction = staged;
                }
            }
        }

        Ok(())
    }

    fn resync_to(&mut self, new_base: u64, triggering_position: u64) {
        self.ring.resync(new_base, self.concealment);
        self.drift.reset_after_resync();
        self.staged_correction = 0;
        debug!(new_base, triggering_position, "ring resynced");
    }

    fn play_one_period(&mut self) -> RelayResult<()> {
        let play_len = align_frames(self.device.writable().min(PERIOD_BYTES));
        if play_len == 0 {
            return Ok(());
        }

        let samples = self.ring.play_window(play_len);
        if let Err(e) = self.device.write(&samples) {
            warn!("playback write failed: {e}, attempting recovery");
            self.device.recover()?;
        }

        let requested = play_len as i64 + self.staged_correction;
        self.staged_correction = 0;
        let consume_len = align_frames(requested.clamp(0, self.ring.capacity() as i64) as usize);
        self.ring.advance(consume_len, self.concealment);

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::NullPlaybackDevice;
    use std::io::Cursor;

    fn encode(position: u64, time: u64, payload: &[u8]) -> Vec<u8> {
        let length = (crate::wire::HEADER_LEN + payload.len()) as u64;
        let mut buf = Vec::new();
        buf.extend_from_slice(&length.to_le_bytes());
        buf.extend_from_slice(&position.to_le_bytes());
        buf.extend_from_slice(&time.to_le_bytes());
        buf.extend_from_slice(payload);
        buf
    }

    #[test]
    fn latency_to_bytes_is_frame_aligned() {
        let bytes = latency_to_bytes(0.1);
        assert_eq!(bytes % BYTES_PER_FRAME, 0);
        assert!(bytes > 0);
    }

    #[test]
    fn runs_to_completion_on_eof() {
        let device = NullPlaybackDevice::new(PERIOD_BYTES);
        let receiver = Receiver::new(device, 0.02, None, ConcealmentMode::Silent);
        let now = wall_clock_nanos().unwrap();
        let mut stream = encode(0, now, &[0u8; 256]);
        stream.extend(encode(256, now, &[0u8; 256]));
        let mut input = Cursor::new(stream);
        receiver.run(&mut input).expect("run should finish cleanly on eof");
    }

    #[test]
    fn first_packet_triggers_cold_start_resync() {
        let device = NullPlaybackDevice::new(PERIOD_BYTES);
        let mut receiver = Receiver::new(device, 0.02, None, ConcealmentMode::Silent);
        let now = wall_clock_nanos().unwrap();
        let packet = crate::wire::DataPacket {
            position: 10_000,
            time: now,
            payload: vec![0u8; 16],
        };
        receiver.handle_packet(packet).unwrap();
        // base_position should now sit one target latency behind 10_000,
        // not at the cold-start sentinel anymore.
        assert_ne!(receiver.ring.base_position(), COLD_START_SENTINEL);
        assert!(receiver.ring.base_position() <= 10_000);
    }

    #[test]
    fn stale_packet_is_dropped_with_no_state_change() {
        let device = NullPlaybackDevice::new(PERIOD_BYTES);
        let mut receiver = Receiver::new(device, 0.02, None, ConcealmentMode::Silent);
        let base_before = receiver.ring.base_position();
        let ancient_time = 1u64; // far in the past relative to wall_clock_nanos()
        let packet = crate::wire::DataPacket {
            position: 10_000,
            time: ancient_time,
            payload: vec![0u8; 16],
        };
        receiver.handle_packet(packet).unwrap();
        assert_eq!(receiver.ring.base_position(), base_before);
    }
}
