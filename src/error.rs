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

use miette::Diagnostic;
use std::io;
use thiserror::Error;

#[derive(Error, Debug, Diagnostic)]
pub enum RelayError {
    #[error("I/O error: {0}")]
    IoError(#[from] io::Error),
    #[error("could not read system clock: {0}")]
    ClockError(String),
    #[error("no output device available")]
    NoOutputDevice,
    #[error("no input device available")]
    NoInputDevice,
    #[error("device does not support the required format (S16LE, stereo, 44100Hz)")]
    UnsupportedDeviceFormat,
    #[error("audio device error: {0}")]
    DeviceError(String),
    #[error("audio stream build error: {0}")]
    StreamBuildError(#[from] cpal::BuildStreamError),
    #[error("audio stream play error: {0}")]
    StreamPlayError(#[from] cpal::PlayStreamError),
    #[error("audio device config query failed: {0}")]
    DeviceConfigError(#[from] cpal::DefaultStreamConfigError),
    #[error("invalid target latency: {0}")]
    InvalidLatency(String),
}

pub type RelayResult<T> = Result<T, RelayError>;
