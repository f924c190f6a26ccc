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
use libc::{CLOCK_REALTIME, clock_gettime, clockid_t, timespec};
use thread_priority::{
    RealtimeThreadSchedulePolicy, ThreadPriority, ThreadSchedulePolicy,
    set_thread_priority_and_policy, thread_native_id,
};
use tracing::warn;

/// Wall-clock nanoseconds since the Unix epoch, as carried on the wire in
/// `DataPacket::time`.
pub fn wall_clock_nanos() -> RelayResult<u64> {
    let ts = clock_time(CLOCK_REALTIME)?;
    Ok(ts.tv_sec as u64 * 1_000_000_000 + ts.tv_nsec as u64)
}

fn clock_time(clock_id: clockid_t) -> RelayResult<timespec> {
    let mut tp = timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    if unsafe { clock_gettime(clock_id, &mut tp) } == -1 {
        Err(RelayError::ClockError(
            "clock_gettime(CLOCK_REALTIME) failed".to_owned(),
        ))
    } else {
        Ok(tp)
    }
}

/// Ask the scheduler for real-time priority on the calling thread. This is a
/// best-effort request: on systems where the caller lacks the privilege, we
/// log and keep running at normal priority rather than failing the process.
pub fn set_realtime_priority() {
    let tid = thread_native_id();
    if let Err(e) = set_thread_priority_and_policy(
        tid,
        ThreadPriority::Max,
        ThreadSchedulePolicy::Realtime(RealtimeThreadSchedulePolicy::Fifo),
    ) {
        warn!("could not set real-time thread priority: {e}");
    }
}
