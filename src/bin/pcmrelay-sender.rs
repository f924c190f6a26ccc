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
use pcmrelay::config::{SenderArgs, init_tracing};
use pcmrelay::device::{CaptureDevice, CpalCaptureDevice, NullCaptureDevice};
use pcmrelay::error::RelayResult;
use pcmrelay::sender::Sender;
use std::io;
use tracing::{error, info};

fn main() {
    let args = SenderArgs::parse();
    init_tracing(args.verbose);

    if let Err(e) = run(args) {
        error!("{e:?}");
        std::process::exit(1);
    }
}

fn run(args: SenderArgs) -> RelayResult<()> {
    let name = args.name.as_deref().unwrap_or("sender");
    info!(name, "starting pcmrelay sender");

    let stdout = io::stdout();

    if args.null_device {
        run_with_device(NullCaptureDevice, stdout.lock())
    } else {
        run_with_device(CpalCaptureDevice::open()?, stdout.lock())
    }
}

fn run_with_device(device: impl CaptureDevice, output: impl io::Write) -> RelayResult<()> {
    Sender::new(device).run(output)
}
