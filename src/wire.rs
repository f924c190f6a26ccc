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

//! Parses the framed byte stream coming in on standard input into discrete
//! [`DataPacket`]s. See `SPEC_FULL.md` §4.1 and §6 for the wire contract.

use std::io::{self, Read};
use tracing::{debug, warn};

/// Size of the fixed-width `length`/`position`/`time` header, in bytes.
pub const HEADER_LEN: usize = 24;

/// Largest payload we are willing to stage. The original implementation
/// fixed this at 4096 bytes per packet; we keep the same ceiling so a
/// corrupted `length` field can be detected before it forces an unbounded
/// allocation.
pub const MAX_PAYLOAD_LEN: usize = 4_096;

/// Upper bound on a single record, header included.
pub const MAX_PACKET_LEN: usize = HEADER_LEN + MAX_PAYLOAD_LEN;

/// A fully parsed wire record: absolute sender byte position of the first
/// payload byte, sender wall-clock capture time in nanoseconds, and the
/// S16LE stereo payload itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataPacket {
    pub position: u64,
    pub time: u64,
    pub payload: Vec<u8>,
}

impl DataPacket {
    pub fn payload_len(&self) -> usize {
        self.payload.len()
    }
}

/// Outcome of draining the input source for one event-loop tick.
pub enum ReadOutcome {
    /// Whole packets parsed in arrival order. May be empty if nothing new
    /// has arrived yet.
    Packets(Vec<DataPacket>),
    /// The input source returned zero bytes: the sender has closed the
    /// stream. The loop should finish the current tick and shut down.
    Eof,
}

/// Buffers partial packets and hands whole ones to the caller in arrival
/// order. Owns no I/O source itself — `poll` is handed a `Read` each tick,
/// which in the receiver binary is standard input placed in non-blocking
/// mode.
pub struct WireReader {
    staging: Vec<u8>,
}

impl WireReader {
    pub fn new() -> Self {
        Self {
            staging: Vec::with_capacity(MAX_PACKET_LEN * 2),
        }
    }

    /// Reads as many bytes as are currently available from `source` and
    /// returns every whole packet that can now be parsed out of the staging
    /// buffer, in arrival order.
    pub fn poll(&mut self, source: &mut impl Read) -> ReadOutcome {
        let mut read_buf = [0u8; 65_536];

        loop {
            match source.read(&mut read_buf) {
                Ok(0) => return ReadOutcome::Eof,
                Ok(n) => self.staging.extend_from_slice(&read_buf[..n]),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    warn!("failed to read from input source: {e}");
                    break;
                }
            }
        }

        ReadOutcome::Packets(self.drain_packets())
    }

    fn drain_packets(&mut self) -> Vec<DataPacket> {
        let mut packets = Vec::new();

        loop {
            if self.staging.len() < 8 {
                break;
            }

            let length = u64::from_le_bytes(self.staging[0..8].try_into().expect("8 bytes")) as usize;

            if length < HEADER_LEN || length > MAX_PACKET_LEN {
                warn!(
                    "framing error: packet length {length} out of range [{HEADER_LEN}, {MAX_PACKET_LEN}], discarding staging buffer"
                );
                self.staging.clear();
                break;
            }

            if self.staging.len() < length {
                break;
            }

            let position = u64::from_le_bytes(self.staging[8..16].try_into().expect("8 bytes"));
            let time = u64::from_le_bytes(self.staging[16..24].try_into().expect("8 bytes"));
            let payload = self.staging[HEADER_LEN..length].to_vec();

            debug!(length, position, time, payload_len = payload.len(), "parsed packet");

            packets.push(DataPacket {
                position,
                time,
                payload,
            });

            self.staging.drain(0..length);
        }

        packets
    }
}

impl Default for WireReader {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn encode(position: u64, time: u64, payload: &[u8]) -> Vec<u8> {
        let length = (HEADER_LEN + payload.len()) as u64;
        let mut buf = Vec::new();
        buf.extend_from_slice(&length.to_le_bytes());
        buf.extend_from_slice(&position.to_le_bytes());
        buf.extend_from_slice(&time.to_le_bytes());
        buf.extend_from_slice(payload);
        buf
    }

    #[test]
    fn parses_single_packet() {
        let bytes = encode(100, 42, &[1, 2, 3, 4]);
        let mut source = Cursor::new(bytes);
        let mut reader = WireReader::new();

        match reader.poll(&mut source) {
            ReadOutcome::Packets(packets) => {
                assert_eq!(packets.len(), 1);
                assert_eq!(packets[0].position, 100);
                assert_eq!(packets[0].time, 42);
                assert_eq!(packets[0].payload, vec![1, 2, 3, 4]);
            }
            ReadOutcome::Eof => panic!("expected packets"),
        }
    }

    #[test]
    fn parses_back_to_back_packets() {
        let mut bytes = encode(0, 1, &[0u8; 8]);
        bytes.extend(encode(8, 2, &[1u8; 8]));
        let mut source = Cursor::new(bytes);
        let mut reader = WireReader::new();

        match reader.poll(&mut source) {
            ReadOutcome::Packets(packets) => {
                assert_eq!(packets.len(), 2);
                assert_eq!(packets[0].position, 0);
                assert_eq!(packets[1].position, 8);
            }
            ReadOutcome::Eof => panic!("expected packets"),
        }
    }

    #[test]
    fn holds_partial_packet_until_complete() {
        let bytes = encode(0, 1, &[0u8; 8]);
        let (head, tail) = bytes.split_at(10);
        let mut reader = WireReader::new();

        let mut first = Cursor::new(head.to_vec());
        match reader.poll(&mut first) {
            ReadOutcome::Packets(packets) => assert!(packets.is_empty()),
            ReadOutcome::Eof => panic!("unexpected eof"),
        }

        let mut second = Cursor::new(tail.to_vec());
        match reader.poll(&mut second) {
            ReadOutcome::Packets(packets) => assert_eq!(packets.len(), 1),
            ReadOutcome::Eof => panic!("unexpected eof"),
        }
    }

    #[test]
    fn degenerate_zero_length_payload_is_a_no_op_packet() {
        let bytes = encode(0, 1, &[]);
        let mut source = Cursor::new(bytes);
        let mut reader = WireReader::new();

        match reader.poll(&mut source) {
            ReadOutcome::Packets(packets) => {
                assert_eq!(packets.len(), 1);
                assert!(packets[0].payload.is_empty());
            }
            ReadOutcome::Eof => panic!("expected packets"),
        }
    }

    #[test]
    fn framing_error_discards_staging_buffer() {
        let mut bad = Vec::new();
        bad.extend_from_slice(&4u64.to_le_bytes()); // length < HEADER_LEN
        bad.extend_from_slice(&[0u8; 16]);
        let mut source = Cursor::new(bad);
        let mut reader = WireReader::new();

        match reader.poll(&mut source) {
            ReadOutcome::Packets(packets) => assert!(packets.is_empty()),
            ReadOutcome::Eof => panic!("unexpected eof"),
        }
        assert!(reader.staging.is_empty());
    }

    #[test]
    fn eof_reported_on_zero_byte_read() {
        let mut source = Cursor::new(Vec::new());
        let mut reader = WireReader::new();
        match reader.poll(&mut source) {
            ReadOutcome::Eof => {}
            ReadOutcome::Packets(_) => panic!("expected eof"),
        }
    }
}
