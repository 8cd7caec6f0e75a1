use chrono::{DateTime, Local, TimeZone, Utc};

/// Wall-clock source for deadlines. Deadlines are absolute epoch
/// milliseconds, so every context that shares a clock agrees on what is left.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> i64;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        Utc::now().timestamp_millis()
    }
}

pub fn epoch_ms_to_local(epoch_ms: i64) -> Option<DateTime<Local>> {
    Local.timestamp_millis_opt(epoch_ms).single()
}

pub fn format_local_hm(epoch_ms: i64) -> String {
    match epoch_ms_to_local(epoch_ms) {
        Some(dt) => dt.format("%H:%M").to_string(),
        None => "-".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_clock_moves_forward() {
        let clock = SystemClock;
        let first = clock.now_ms();
        std::thread::sleep(std::time::Duration::from_millis(2));
        assert!(clock.now_ms() >= first);
    }

    #[test]
    fn formats_epoch_as_local_hours_and_minutes() {
        let text = format_local_hm(1_700_000_000_000);
        assert_eq!(text.len(), 5);
        assert_eq!(&text[2..3], ":");
    }
}
