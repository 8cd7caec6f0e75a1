use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub const MS_PER_MINUTE: i64 = 60_000;

#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Meat,
    Chicken,
}

impl Category {
    pub fn as_str(self) -> &'static str {
        match self {
            Category::Meat => "meat",
            Category::Chicken => "chicken",
        }
    }

    pub fn food_label(self) -> &'static str {
        match self {
            Category::Meat => "beef",
            Category::Chicken => "chicken",
        }
    }

    pub fn headline(self) -> &'static str {
        match self {
            Category::Meat => "You ate beef",
            Category::Chicken => "You ate chicken",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input.trim().to_ascii_lowercase().as_str() {
            "meat" | "beef" => Ok(Category::Meat),
            "chicken" | "poultry" => Ok(Category::Chicken),
            other => Err(format!(
                "unknown category '{other}', expected 'meat' or 'chicken'"
            )),
        }
    }
}

/// The single persisted countdown. Written once, never mutated, deleted once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimerState {
    #[serde(rename = "type")]
    pub category: Category,
    #[serde(rename = "name", default, skip_serializing_if = "Option::is_none")]
    pub owner_name: Option<String>,
    #[serde(rename = "endTime")]
    pub end_time_epoch_ms: i64,
}

impl TimerState {
    pub fn starting_at(
        category: Category,
        owner_name: Option<&str>,
        now_ms: i64,
        duration_minutes: u32,
    ) -> Self {
        let duration_ms = i64::from(duration_minutes).saturating_mul(MS_PER_MINUTE);
        Self {
            category,
            owner_name: owner_name
                .map(str::trim)
                .filter(|name| !name.is_empty())
                .map(str::to_string),
            end_time_epoch_ms: now_ms.saturating_add(duration_ms),
        }
    }

    pub fn is_expired(&self, now_ms: i64) -> bool {
        now_ms >= self.end_time_epoch_ms
    }

    pub fn seconds_remaining(&self, now_ms: i64) -> u64 {
        remaining_seconds(self.end_time_epoch_ms, now_ms)
    }
}

/// What a view shows for the running countdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DisplayState {
    pub category: Category,
    pub seconds_remaining: u64,
    pub end_time_epoch_ms: i64,
}

/// `max(0, round((end - now) / 1000))`, computed in integers.
pub fn remaining_seconds(end_time_epoch_ms: i64, now_ms: i64) -> u64 {
    let delta_ms = end_time_epoch_ms.saturating_sub(now_ms);
    if delta_ms <= 0 {
        return 0;
    }
    ((delta_ms + 500) / 1_000) as u64
}

pub fn format_countdown(seconds: u64) -> String {
    let hours = seconds / 3_600;
    let minutes = (seconds % 3_600) / 60;
    let secs = seconds % 60;
    format!("{hours}:{minutes:02}:{secs:02}")
}
