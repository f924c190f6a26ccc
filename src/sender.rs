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

//! Sender: captures audio and frames it onto standard output as a sequence
//! of length-prefixed packets carrying a running byte position and a
//! wall-clock capture timestamp. The sender does no buffering or drift
//! correction of its own — all of that lives on the receiving end. See
//! `SPEC_FULL.md` §4.5.

use crate::device::{BYTES_PER_FRAME, CaptureDevice, SAMPLE_RATE};
use crate::error::RelayResult;
use crate::time::{set_realtime_priority, wall_clock_nanos};
use crate::wire::HEADER_LEN;
use std::io::Write;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;
use tracing::{info, instrument, warn};

/// Capture chunk size: 20ms at the fixed wire rate, same cadence as the
/// receiver's playout period.
pub const CHUNK_BYTES: usize = SAMPLE_RATE as usize * BYTES_PER_FRAME / 50;

const IDLE_SLEEP: Duration = Duration::from_micros(500);

pub struct Sender<C: CaptureDevice> {
    device: C,
    position: u64,
}

impl<C: CaptureDevice> Sender<C> {
    pub fn new(device: C) -> Self {
        Self { device, position: 0 }
    }

    /// Runs the capture/emit loop until a shutdown is requested. Blocks the
    /// calling thread.
    #[instrument(skip(self, output))]
    pub fn run(mut self, mut output: impl Write) -> RelayResult<()> {
        set_realtime_priority();

        let shutdown = Arc::new(AtomicBool::new(false));
        {
            let shutdown = shutdown.clone();
            if let Err(e) = ctrlc::set_handler(move || shutdown.store(true, Ordering::SeqCst)) {
                warn!("failed to install Ctrl-C handler: {e}");
            }
        }

        let mut chunk = vec![0u8; CHUNK_BYTES];

        loop {
            if shutdown.load(Ordering::SeqCst) {
                info!("shutdown requested, stopping");
                break;
            }

            let n = self.device.read_chunk(&mut chunk)?;
            if n > 0 {
                if let Err(e) = self.emit(&mut output, &chunk[..n]) {
                    warn!("failed to write packet to output: {e}");
                    break;
                }
            } else {
                thread::sleep(IDLE_SLEEP);
            }
        }

        Ok(())
    }

    fn emit(&mut self, output: &mut impl Write, payload: &[u8]) -> RelayResult<()> {
        let length = (HEADER_LEN + payload.len()) as u64;
        let time = wall_clock_nanos()?;

        let mut packet = Vec::with_capacity(length as usize);
        packet.extend_from_slice(&length.to_le_bytes());
        packet.extend_from_slice(&self.position.to_le_bytes());
        packet.extend_from_slice(&time.to_le_bytes());
        packet.extend_from_slice(payload);

        output.write_all(&packet)?;
        output.flush()?;

        self.position = self.position.wrapping_add(payload.len() as u64);

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::NullCaptureDevice;
    use crate::wire::{ReadOutcome, WireReader};

    #[test]
    fn emits_correctly_framed_packets() {
        let mut sender = Sender::new(NullCaptureDevice);
        let mut output = Vec::new();

        sender.emit(&mut output, &[1, 2, 3, 4]).unwrap();
        sender.emit(&mut output, &[5, 6, 7, 8]).unwrap();

        let mut reader = WireReader::new();
        let mut cursor = std::io::Cursor::new(output);
        match reader.poll(&mut cursor) {
            ReadOutcome::Packets(packets) => {
                assert_eq!(packets.len(), 2);
                assert_eq!(packets[0].position, 0);
                assert_eq!(packets[0].payload, vec![1, 2, 3, 4]);
                assert_eq!(packets[1].position, 4);
                assert_eq!(packets[1].payload, vec![5, 6, 7, 8]);
            }
            ReadOutcome::Eof => panic!("expected packets"),
        }
    }

    #[test]
    fn position_advances_by_payload_length() {
        let mut sender = Sender::new(NullCaptureDevice);
        let mut sink = Vec::new();
        for _ in 0..5 {
            sender.emit(&mut sink, &[0u8; 16]).unwrap();
        }
        assert_eq!(sender.position, 80);
    }
}
