use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use anyhow::Result;

use crate::timer::engine::{TimerEngine, TimerStatus};
use crate::timer::model::{DisplayState, format_countdown};
use crate::timer::poller::sleep_unless_stopped;

pub const TICK_INTERVAL: Duration = Duration::from_secs(1);

pub fn countdown_line(display: &DisplayState) -> String {
    format!(
        "{}  until dairy ({})",
        format_countdown(display.seconds_remaining),
        display.category.headline().to_lowercase()
    )
}

/// Terminal countdown: one line per tick until the timer expires, is
/// cancelled elsewhere, or `stop` is set.
///
/// Ticks are paced against an `Instant` deadline. After a suspension the
/// schedule restarts from now instead of replaying the missed ticks; the
/// value shown is recomputed from the stored deadline either way.
pub fn run_countdown<W: Write>(
    engine: &mut TimerEngine,
    tick_interval: Duration,
    stop: &AtomicBool,
    out: &mut W,
) -> Result<TimerStatus> {
    let mut status = engine.resume()?;
    let mut next_tick = Instant::now() + tick_interval;
    loop {
        let display = match &status {
            TimerStatus::Running(display) => *display,
            TimerStatus::Idle | TimerStatus::Expired(_) => return Ok(status),
        };
        writeln!(out, "{}", countdown_line(&display))?;
        out.flush()?;
        if stop.load(Ordering::Relaxed) {
            return Ok(status);
        }

        sleep_unless_stopped(next_tick.saturating_duration_since(Instant::now()), stop);
        let now = Instant::now();
        next_tick += tick_interval;
        if next_tick <= now {
            next_tick = now + tick_interval;
        }
        status = engine.tick()?;
    }
}
