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

//! A linear playout ring: incoming packet payloads are placed at the byte
//! offset their sender-side `position` implies. The region about to be
//! exposed at the tail is painted with a concealment pattern the moment it
//! is shifted into view, so whatever the device ends up playing before real
//! data arrives there is never raw garbage. See `SPEC_FULL.md` §4.2/§4.4 and
//! `examples/original_source/alsa-receiver.c`'s `failureSound`/`writeAudio`.

use crate::config::ConcealmentMode;
use tracing::debug;

/// Bytes per stereo S16LE frame (2 channels * 2 bytes).
pub const FRAME_BYTES: usize = 4;

/// Rounds `bytes` down to the nearest whole frame.
pub fn align_frames(bytes: usize) -> usize {
    (bytes / FRAME_BYTES) * FRAME_BYTES
}

/// Outcome of placing a packet's payload into the ring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaceOutcome {
    Placed,
    /// The packet's implied offset is negative (playback has run ahead of
    /// the sender) or its end falls beyond `capacity` (the sender has
    /// fallen far behind playback). Either way the caller must resync.
    OutOfRange,
}

/// The playout ring. `position` bookkeeping uses wrapping `u64` arithmetic,
/// reinterpreted as a signed byte offset once subtracted from `base_position`
/// — the same convention the wire format and drift controller use.
pub struct Ring {
    buf: Vec<u8>,
    capacity: usize,
    /// Sender position corresponding to `buf[0]`.
    base_position: u64,
}

impl Ring {
    pub fn new(capacity: usize) -> Self {
        let capacity = align_frames(capacity).max(FRAME_BYTES);
        Self {
            buf: vec![0u8; capacity],
            capacity,
            base_position: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Sender position corresponding to the front of the ring.
    pub fn base_position(&self) -> u64 {
        self.base_position
    }

    /// Hard-resyncs the ring to start fresh at `position`: the entire
    /// buffer is repainted with concealment (there is no more reason to
    /// trust whatever was in it) and `base_position` is re-anchored.
    pub fn resync(&mut self, position: u64, concealment: ConcealmentMode) {
        debug!(position, "ring resync");
        self.paint_concealment(0, self.capacity, concealment);
        self.base_position = position;
    }

    /// Places a packet's payload at the offset implied by its sender
    /// position, relative to `base_position`. Returns
    /// [`PlaceOutcome::OutOfRange`] without writing anything if the offset
    /// is negative or the payload would run past capacity — the caller is
    /// expected to resync in that case.
    pub fn place(&mut self, position: u64, data: &[u8]) -> PlaceOutcome {
        let offset = position.wrapping_sub(self.base_position) as i64;
        if offset < 0 {
            return PlaceOutcome::OutOfRange;
        }

        let offset = offset as usize;
        let Some(end) = offset.checked_add(data.len()) else {
            return PlaceOutcome::OutOfRange;
        };
        if end > self.capacity {
            return PlaceOutcome::OutOfRange;
        }

        self.buf[offset..end].copy_from_slice(data);
        PlaceOutcome::Placed
    }

    /// Returns the next `n` bytes from the front of the ring without
    /// shifting anything — the window about to be handed to the playback
    /// device this period.
    pub fn play_window(&self, n: usize) -> Vec<u8> {
        let n = n.min(self.capacity);
        self.buf[..n].to_vec()
    }

    /// Shifts the ring left by `n` bytes (the correction-adjusted consume
    /// amount, which may differ from what was just played) and paints the
    /// newly exposed tail with concealment, since it holds no real data
    /// yet.
    pub fn advance(&mut self, n: usize, concealment: ConcealmentMode) {
        let n = n.min(self.capacity);
        if n == 0 {
            return;
        }

        self.buf.copy_within(n.., 0);
        let tail_start = self.capacity - n;
        self.paint_concealment(tail_start, self.capacity, concealment);
        self.base_position = self.base_position.wrapping_add(n as u64);
    }

    /// Paints `buf[from..to]` from a single reference byte — the byte
    /// immediately preceding the region, or `buf[0]` if the region starts
    /// at the front. Silent mode repeats the reference; beep mode nudges
    /// every 4th byte by 4 toward zero, matching `failureSound` exactly.
    fn paint_concealment(&mut self, from: usize, to: usize, mode: ConcealmentMode) {
        if from >= to {
            return;
        }

        let reference = if from == 0 { self.buf[0] } else { self.buf[from - 1] } as i8;

        match mode {
            ConcealmentMode::Silent => {
                for b in &mut self.buf[from..to] {
                    *b = reference as u8;
                }
            }
            ConcealmentMode::Beep => {
                for (i, b) in self.buf[from..to].iter_mut().enumerate() {
                    let perturb: i8 = if i % 4 == 0 { 4 } else { 0 };
                    *b = if reference > 0 {
                        reference.wrapping_sub(perturb) as u8
                    } else {
                        reference.wrapping_add(perturb) as u8
                    };
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_ring_plays_silence() {
        let ring = Ring::new(64);
        assert_eq!(ring.play_window(16), vec![0u8; 16]);
    }

    #[test]
    fn place_then_play_returns_real_data() {
        let mut ring = Ring::new(64);
        assert_eq!(ring.place(0, &[1, 2, 3, 4, 5, 6, 7, 8]), PlaceOutcome::Placed);
        assert_eq!(ring.play_window(8), vec![1, 2, 3, 4, 5, 6, 7, 8]);
    }

    #[test]
    fn advance_paints_newly_exposed_tail() {
        let mut ring = Ring::new(16);
        assert_eq!(ring.place(0, &[1, 2, 3, 4]), PlaceOutcome::Placed);
        ring.advance(4, ConcealmentMode::Silent);
        // Front now holds what used to be at [4..16), all still zero, and
        // the new tail [12..16) is painted from the reference at [11].
        assert_eq!(ring.play_window(16), vec![0u8; 16]);
    }

    #[test]
    fn gap_is_concealed_with_reference_byte_not_garbage() {
        let mut ring = Ring::new(16);
        assert_eq!(ring.place(0, &[9, 9, 9, 9]), PlaceOutcome::Placed);
        // Advancing by 4 exposes [12..16) as new tail; reference byte is
        // buf[11] which is still 0 at this point (never written).
        ring.advance(4, ConcealmentMode::Silent);
        let window = ring.play_window(12);
        assert_eq!(&window[0..4], &[9, 9, 9, 9]);
        assert_eq!(&window[4..12], &[0u8; 8]);
    }

    #[test]
    fn negative_offset_is_out_of_range() {
        let mut ring = Ring::new(64);
        ring.advance(8, ConcealmentMode::Silent);
        // base_position is now 8; position 0 is behind the ring's base.
        assert_eq!(ring.place(0, &[1, 2, 3, 4]), PlaceOutcome::OutOfRange);
    }

    #[test]
    fn payload_past_capacity_is_out_of_range() {
        let mut ring = Ring::new(16);
        assert_eq!(ring.place(12, &[1, 2, 3, 4, 5, 6, 7, 8]), PlaceOutcome::OutOfRange);
    }

    #[test]
    fn packet_landing_one_byte_past_capacity_is_out_of_range() {
        let mut ring = Ring::new(16);
        assert_eq!(ring.place(13, &[1, 2, 3, 4]), PlaceOutcome::OutOfRange);
    }

    #[test]
    fn resync_repaints_whole_buffer_and_reanchors() {
        let mut ring = Ring::new(16);
        assert_eq!(ring.place(0, &[1, 2, 3, 4]), PlaceOutcome::Placed);
        ring.resync(1_000, ConcealmentMode::Silent);
        assert_eq!(ring.base_position(), 1_000);
        assert_eq!(ring.place(1_000, &[5, 6, 7, 8]), PlaceOutcome::Placed);
        assert_eq!(&ring.play_window(4), &[5, 6, 7, 8]);
    }

    #[test]
    fn beep_perturbs_every_fourth_byte_toward_zero_from_positive_reference() {
        let mut ring = Ring::new(16);
        assert_eq!(ring.place(8, &[100; 8]), PlaceOutcome::Placed);
        // Shifting by 8 moves the 100s to the front; the reference byte for
        // the newly exposed tail is buf[7], the last shifted-in byte (100).
        ring.advance(8, ConcealmentMode::Beep);
        let window = ring.play_window(16);
        assert_eq!(&window[0..8], &[100u8; 8]);
        for (i, b) in window[8..16].iter().enumerate() {
            let expected: u8 = if i % 4 == 0 { 96 } else { 100 };
            assert_eq!(*b, expected);
        }
    }

    #[test]
    fn beep_perturbs_every_fourth_byte_toward_zero_from_negative_reference() {
        let mut ring = Ring::new(16);
        assert_eq!(ring.place(8, &[(-100i8) as u8; 8]), PlaceOutcome::Placed);
        ring.advance(8, ConcealmentMode::Beep);
        let window = ring.play_window(16);
        for (i, b) in window[8..16].iter().enumerate() {
            let expected = if i % 4 == 0 { (-100i8).wrapping_add(4) } else { -100i8 };
            assert_eq!(*b as i8, expected);
        }
    }

    #[test]
    fn align_frames_rounds_down_to_frame_boundary() {
        assert_eq!(align_frames(10), 8);
        assert_eq!(align_frames(8), 8);
        assert_eq!(align_frames(0), 0);
    }
}
