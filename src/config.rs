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

use crate::error::{RelayError, RelayResult};
use clap::{Parser, ValueEnum};

/// How the playback pump fills ring positions it has no real samples for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Default)]
pub enum ConcealmentMode {
    /// Hold the last real sample value (inaudible click, audible hold).
    #[default]
    Silent,
    /// Alternate a faint square wave, useful while debugging drop-outs.
    Beep,
}

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Receive a PCM audio stream and play it back with jitter-buffered, drift-corrected timing"
)]
pub struct ReceiverArgs {
    /// Target end-to-end latency from capture to playback, in seconds.
    pub target_latency: f64,

    /// Human-readable device/instance name, used only in diagnostics.
    pub name: Option<String>,

    /// How to fill ring positions that have no real samples yet.
    #[arg(long, value_enum, default_value_t = ConcealmentMode::Silent)]
    pub concealment: ConcealmentMode,

    /// Override the ring size in bytes (default: derived from sample rate).
    #[arg(long)]
    pub ring_bytes: Option<usize>,

    /// Increase log verbosity (repeatable).
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Use the null playback backend instead of opening a real device.
    #[arg(long)]
    pub null_device: bool,
}

impl ReceiverArgs {
    pub fn validate(&self) -> RelayResult<()> {
        if !self.target_latency.is_finite() || self.target_latency <= 0.0 {
            return Err(RelayError::InvalidLatency(format!(
                "target latency must be a positive, finite number of seconds, got {}",
                self.target_latency
            )));
        }
        Ok(())
    }
}

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Capture local PCM audio and emit it on stdout as a framed byte stream"
)]
pub struct SenderArgs {
    /// Human-readable device/instance name, used only in diagnostics.
    pub name: Option<String>,

    /// Increase log verbosity (repeatable).
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Use the null capture backend (emits silence) instead of a real device.
    #[arg(long)]
    pub null_device: bool,
}

pub fn init_tracing(verbosity: u8) {
    use tracing_subscriber::{EnvFilter, fmt};

    let default_level = match verbosity {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
}
