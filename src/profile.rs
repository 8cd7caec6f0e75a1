use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::store::{KeyValueStore, StoreError, USER_PROFILE_KEY, get_typed, set_typed};
use crate::timer::model::Category;

pub const MAX_WAIT_MINUTES: u32 = 24 * 60;
pub const DEFAULT_MEAT_WAIT_MINUTES: u32 = 360;
pub const DEFAULT_CHICKEN_WAIT_MINUTES: u32 = 180;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitPreset {
    pub label: &'static str,
    pub minutes: u32,
}

pub const WAIT_PRESETS: [WaitPreset; 2] = [
    WaitPreset {
        label: "3 hours",
        minutes: 180,
    },
    WaitPreset {
        label: "6 hours",
        minutes: 360,
    },
];

#[derive(Debug, Error)]
pub enum ProfileError {
    #[error("name must not be empty")]
    EmptyName,
    #[error("wait of {minutes} minutes is out of range; expected 0 to {max}", max = MAX_WAIT_MINUTES)]
    WaitOutOfRange { minutes: u64 },
    #[error("invalid wait '{0}'; use minutes (90), H:MM (1:30), 6h, 45m or 3h30m")]
    InvalidWait(String),
    #[error("no profile saved yet; run `fleishig profile set --name <NAME>` first")]
    Missing,
    #[error(transparent)]
    Storage(#[from] StoreError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaitingTimes {
    pub meat: u32,
    pub chicken: u32,
}

impl Default for WaitingTimes {
    fn default() -> Self {
        Self {
            meat: DEFAULT_MEAT_WAIT_MINUTES,
            chicken: DEFAULT_CHICKEN_WAIT_MINUTES,
        }
    }
}

impl WaitingTimes {
    pub fn for_category(&self, category: Category) -> u32 {
        match category {
            Category::Meat => self.meat,
            Category::Chicken => self.chicken,
        }
    }

    pub fn set(&mut self, category: Category, minutes: u32) {
        match category {
            Category::Meat => self.meat = minutes,
            Category::Chicken => self.chicken = minutes,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub name: String,
    #[serde(default)]
    pub waiting_times: WaitingTimes,
}

impl UserProfile {
    pub fn new(name: &str) -> Result<Self, ProfileError> {
        let profile = Self {
            name: name.trim().to_string(),
            waiting_times: WaitingTimes::default(),
        };
        profile.validate()?;
        Ok(profile)
    }

    pub fn validate(&self) -> Result<(), ProfileError> {
        if self.name.trim().is_empty() {
            return Err(ProfileError::EmptyName);
        }
        for minutes in [self.waiting_times.meat, self.waiting_times.chicken] {
            check_wait_range(u64::from(minutes))?;
        }
        Ok(())
    }
}

/// Partial update; fields left as `None` keep their saved value.
#[derive(Debug, Clone, Default)]
pub struct ProfileUpdate {
    pub name: Option<String>,
    pub meat_minutes: Option<u32>,
    pub chicken_minutes: Option<u32>,
}

pub fn load_profile(store: &dyn KeyValueStore) -> Result<Option<UserProfile>, ProfileError> {
    Ok(get_typed(store, USER_PROFILE_KEY)?)
}

pub fn require_profile(store: &dyn KeyValueStore) -> Result<UserProfile, ProfileError> {
    load_profile(store)?.ok_or(ProfileError::Missing)
}

pub fn save_profile(store: &dyn KeyValueStore, profile: &UserProfile) -> Result<(), ProfileError> {
    profile.validate()?;
    set_typed(store, USER_PROFILE_KEY, profile)?;
    info!(
        name = %profile.name,
        meat = profile.waiting_times.meat,
        chicken = profile.waiting_times.chicken,
        "profile saved"
    );
    Ok(())
}

/// Applies `update` on top of the saved profile. Creating a profile requires
/// a name; the waits fall back to the defaults.
pub fn update_profile(
    store: &dyn KeyValueStore,
    update: ProfileUpdate,
) -> Result<UserProfile, ProfileError> {
    let mut profile = match (load_profile(store)?, update.name.as_deref()) {
        (Some(mut existing), Some(name)) => {
            existing.name = name.trim().to_string();
            existing
        }
        (Some(existing), None) => existing,
        (None, Some(name)) => UserProfile::new(name)?,
        (None, None) => return Err(ProfileError::Missing),
    };
    if let Some(minutes) = update.meat_minutes {
        profile.waiting_times.set(Category::Meat, minutes);
    }
    if let Some(minutes) = update.chicken_minutes {
        profile.waiting_times.set(Category::Chicken, minutes);
    }
    save_profile(store, &profile)?;
    Ok(profile)
}

pub fn parse_wait_minutes(input: &str) -> Result<u32, ProfileError> {
    let text = input
        .chars()
        .filter(|ch| !ch.is_whitespace())
        .collect::<String>()
        .to_ascii_lowercase();
    let invalid = || ProfileError::InvalidWait(input.trim().to_string());
    if text.is_empty() {
        return Err(invalid());
    }

    let total = if let Some((hours, minutes)) = text.split_once(':') {
        if minutes.len() != 2 {
            return Err(invalid());
        }
        let minutes = parse_count(minutes).ok_or_else(invalid)?;
        if minutes >= 60 {
            return Err(invalid());
        }
        combine(parse_count(hours).ok_or_else(invalid)?, minutes)
    } else if text.ends_with('h') || text.ends_with('m') {
        let (hours, rest) = match text.split_once('h') {
            Some((hours, rest)) => (parse_count(hours).ok_or_else(invalid)?, rest),
            None => (0, text.as_str()),
        };
        let minutes = if rest.is_empty() {
            0
        } else {
            let digits = rest.strip_suffix('m').ok_or_else(invalid)?;
            parse_count(digits).ok_or_else(invalid)?
        };
        combine(hours, minutes)
    } else {
        parse_count(&text).ok_or_else(invalid)?
    };

    check_wait_range(total)?;
    Ok(total as u32)
}

pub fn format_wait(minutes: u32) -> String {
    let hours = minutes / 60;
    let rest = minutes % 60;
    let unit = |count: u32, singular: &str| {
        if count == 1 {
            format!("1 {singular}")
        } else {
            format!("{count} {singular}s")
        }
    };
    match (hours, rest) {
        (0, rest) => unit(rest, "minute"),
        (hours, 0) => unit(hours, "hour"),
        (hours, rest) => format!("{} {}", unit(hours, "hour"), unit(rest, "minute")),
    }
}

fn parse_count(digits: &str) -> Option<u64> {
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

fn combine(hours: u64, minutes: u64) -> u64 {
    hours.saturating_mul(60).saturating_add(minutes)
}

fn check_wait_range(minutes: u64) -> Result<(), ProfileError> {
    if minutes > u64::from(MAX_WAIT_MINUTES) {
        return Err(ProfileError::WaitOutOfRange { minutes });
    }
    Ok(())
}
