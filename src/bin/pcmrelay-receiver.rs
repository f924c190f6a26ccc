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

use clap::Parser;
use pcmrelay::config::{ReceiverArgs, init_tracing};
use pcmrelay::device::{CpalPlaybackDevice, NullPlaybackDevice, PlaybackDevice};
use pcmrelay::error::{RelayError, RelayResult};
use pcmrelay::receiver::Receiver;
use std::io::{self, Stdin};
use std::os::fd::AsRawFd;
use tracing::{error, info};

fn main() {
    let args = ReceiverArgs::parse();
    init_tracing(args.verbose);

    if let Err(e) = run(args) {
        error!("{e:?}");
        std::process::exit(1);
    }
}

fn run(args: ReceiverArgs) -> RelayResult<()> {
    args.validate()?;

    let name = args.name.as_deref().unwrap_or("receiver");
    info!(name, target_latency = args.target_latency, "starting pcmrelay receiver");

    let stdin = io::stdin();
    set_nonblocking(&stdin)?;

    if args.null_device {
        let device = NullPlaybackDevice::new(pcmrelay::receiver::PERIOD_BYTES);
        run_with_device(args, device, stdin)
    } else {
        let device = CpalPlaybackDevice::open()?;
        run_with_device(args, device, stdin)
    }
}

fn run_with_device(args: ReceiverArgs, device: impl PlaybackDevice, stdin: Stdin) -> RelayResult<()> {
    let receiver = Receiver::new(device, args.target_latency, args.ring_bytes, args.concealment);
    receiver.run(stdin)
}

fn set_nonblocking(stdin: &Stdin) -> RelayResult<()> {
    let fd = stdin.as_raw_fd();
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL, 0) };
    if flags == -1 {
        return Err(RelayError::IoError(io::Error::last_os_error()));
    }
    if unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) } == -1 {
        return Err(RelayError::IoError(io::Error::last_os_error()));
    }
    Ok(())
}
