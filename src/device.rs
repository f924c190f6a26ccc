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

//! Device backends sit behind the [`PlaybackDevice`] and [`CaptureDevice`]
//! traits so the single-threaded event loops in [`crate::receiver`] and
//! [`crate::sender`] never have to know whether audio is coming from a real
//! sound card or a headless stand-in. The cpal-backed default backend is the
//! one place in this crate that owns an extra thread and a lock-free ring:
//! it lives entirely behind the trait boundary (`SPEC_FULL.md` §5).

use crate::error::{RelayError, RelayResult};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, Stream, StreamConfig};
use ringbuf::traits::{Consumer, Observer, Producer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};
use tracing::{error, warn};

/// Fixed wire/device format: CD-quality stereo S16LE.
pub const SAMPLE_RATE: u32 = 44_100;
pub const CHANNELS: u16 = 2;
pub const BYTES_PER_FRAME: usize = 4;

/// Output side of the relay. Implementors accept frame-aligned S16LE stereo
/// bytes and play them at the fixed wire rate.
pub trait PlaybackDevice {
    /// Bytes the device is currently willing to accept without blocking.
    fn writable(&self) -> usize;
    /// Writes `data` to the device. Callers must not pass more than
    /// `writable()` bytes.
    fn write(&mut self, data: &[u8]) -> RelayResult<()>;
    /// Attempts to recover after the device reported a fault (e.g. an
    /// underrun). Returns an error if the device could not be reopened.
    fn recover(&mut self) -> RelayResult<()>;
}

/// Input side of the relay.
pub trait CaptureDevice {
    /// Reads up to `buf.len()` bytes of freshly captured audio into `buf`,
    /// returning the number of bytes written. `0` means no data is
    /// available yet (non-blocking contract), not end of stream — capture
    /// backends in this crate never signal EOF on their own.
    fn read_chunk(&mut self, buf: &mut [u8]) -> RelayResult<usize>;
}

const RING_CAPACITY_BYTES: usize = 64 * 1024;

/// Default playback backend: opens the host's default output device and
/// bridges its callback-driven API to the pump's poll-style contract via a
/// lock-free byte ring, the same pattern used by cpal-backed sinks in the
/// wider ecosystem (see `other_examples/19bac268_haileys-bark__bark-device-src-sink.rs.rs`).
pub struct CpalPlaybackDevice {
    producer: HeapProd<u8>,
    stream: Stream,
}

impl CpalPlaybackDevice {
    pub fn open() -> RelayResult<Self> {
        let host = cpal::default_host();
        let device = host.default_output_device().ok_or(RelayError::NoOutputDevice)?;
        let config = fixed_stream_config(&device, true)?;

        let ring = HeapRb::<u8>::new(RING_CAPACITY_BYTES);
        let (producer, mut consumer) = ring.split();

        let stream = device.build_output_stream(
            &config,
            move |data: &mut [i16], _info: &cpal::OutputCallbackInfo| {
                let bytes_needed = data.len() * 2;
                let mut raw = vec![0u8; bytes_needed];
                let n = consumer.pop_slice(&mut raw);
                if n < bytes_needed {
                    warn!(missing = bytes_needed - n, "playback underrun, padding with silence");
                }
                for (sample, chunk) in data.iter_mut().zip(raw.chunks_exact(2)) {
                    *sample = i16::from_le_bytes([chunk[0], chunk[1]]);
                }
            },
            |err| error!("playback stream error: {err}"),
            None,
        )?;
        stream.play()?;

        Ok(Self { producer, stream })
    }
}

impl PlaybackDevice for CpalPlaybackDevice {
    fn writable(&self) -> usize {
        self.producer.vacant_len()
    }

    fn write(&mut self, data: &[u8]) -> RelayResult<()> {
        let n = self.producer.push_slice(data);
        if n < data.len() {
            warn!(dropped = data.len() - n, "playback ring full, dropping tail of write");
        }
        Ok(())
    }

    fn recover(&mut self) -> RelayResult<()> {
        self.stream.play().map_err(RelayError::from)
    }
}

/// Default capture backend: mirrors [`CpalPlaybackDevice`] on the input
/// side for the sender binary.
pub struct CpalCaptureDevice {
    consumer: HeapCons<u8>,
    stream: Stream,
}

impl CpalCaptureDevice {
    pub fn open() -> RelayResult<Self> {
        let host = cpal::default_host();
        let device = host.default_input_device().ok_or(RelayError::NoInputDevice)?;
        let config = fixed_stream_config(&device, false)?;

        let ring = HeapRb::<u8>::new(RING_CAPACITY_BYTES);
        let (mut producer, consumer) = ring.split();

        let stream = device.build_input_stream(
            &config,
            move |data: &[i16], _info: &cpal::InputCallbackInfo| {
                let mut raw = Vec::with_capacity(data.len() * 2);
                for sample in data {
                    raw.extend_from_slice(&sample.to_le_bytes());
                }
                let n = producer.push_slice(&raw);
                if n < raw.len() {
                    warn!(dropped = raw.len() - n, "capture ring full, dropping samples");
                }
            },
            |err| error!("capture stream error: {err}"),
            None,
        )?;
        stream.play()?;

        Ok(Self { consumer, stream })
    }
}

impl CaptureDevice for CpalCaptureDevice {
    fn read_chunk(&mut self, buf: &mut [u8]) -> RelayResult<usize> {
        Ok(self.consumer.pop_slice(buf))
    }
}

impl Drop for CpalCaptureDevice {
    fn drop(&mut self) {
        let _ = self.stream.pause();
    }
}

fn fixed_stream_config(device: &cpal::Device, output: bool) -> RelayResult<StreamConfig> {
    let supported = if output {
        device.supported_output_configs()
    } else {
        device.supported_input_configs()
    }
    .map_err(|e| RelayError::DeviceError(e.to_string()))?;

    supported
        .filter(|c| c.channels() == CHANNELS && c.sample_format() == SampleFormat::I16)
        .find(|c| c.min_sample_rate().0 <= SAMPLE_RATE && SAMPLE_RATE <= c.max_sample_rate().0)
        .ok_or(RelayError::UnsupportedDeviceFormat)
        .map(|_range| StreamConfig {
            channels: CHANNELS,
            sample_rate: cpal::SampleRate(SAMPLE_RATE),
            buffer_size: cpal::BufferSize::Default,
        })
}

/// Headless playback backend used for tests and for running without a
/// sound card: accepts everything immediately and discards it.
pub struct NullPlaybackDevice {
    period_bytes: usize,
}

impl NullPlaybackDevice {
    pub fn new(period_bytes: usize) -> Self {
        Self { period_bytes }
    }
}

impl PlaybackDevice for NullPlaybackDevice {
    fn writable(&self) -> usize {
        self.period_bytes
    }

    fn write(&mut self, _data: &[u8]) -> RelayResult<()> {
        Ok(())
    }

    fn recover(&mut self) -> RelayResult<()> {
        Ok(())
    }
}

/// Headless capture backend used for tests and for running without a
/// microphone: synthesizes silence at the fixed wire rate.
pub struct NullCaptureDevice;

impl CaptureDevice for NullCaptureDevice {
    fn read_chunk(&mut self, buf: &mut [u8]) -> RelayResult<usize> {
        buf.fill(0);
        Ok(buf.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_playback_accepts_everything() {
        let mut dev = NullPlaybackDevice::new(1024);
        assert_eq!(dev.writable(), 1024);
        dev.write(&[0u8; 1024]).unwrap();
        dev.recover().unwrap();
    }

    #[test]
    fn null_capture_fills_silence() {
        let mut dev = NullCaptureDevice;
        let mut buf = [0xFFu8; 16];
        let n = dev.read_chunk(&mut buf).unwrap();
        assert_eq!(n, 16);
        assert_eq!(buf, [0u8; 16]);
    }
}
