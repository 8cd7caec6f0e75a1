use rand::Rng;
use thiserror::Error;
use tracing::{info, warn};

use crate::timer::model::Category;

const APP_NAME: &str = "fleishig";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpiryNotification {
    pub title: String,
    pub body: String,
    pub sound: bool,
}

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("notification backend failed: {0}")]
    Backend(String),
}

/// One-shot, fire-and-forget alert delivery.
pub trait Notifier: Send + Sync {
    fn dispatch(&self, notification: &ExpiryNotification) -> Result<(), NotifyError>;
}

struct MessageVariant {
    title: &'static str,
    named_body: &'static str,
    anonymous_body: &'static str,
}

// `{name}` and `{food}` are substituted at selection time.
const MESSAGE_POOL: [MessageVariant; 5] = [
    MessageVariant {
        title: "Dairy time!",
        named_body: "{name}, your wait after {food} is over. Enjoy your dairy!",
        anonymous_body: "Your wait after {food} is over. Enjoy your dairy!",
    },
    MessageVariant {
        title: "The wait is over",
        named_body: "Good news {name}: the waiting period after {food} has ended.",
        anonymous_body: "Good news: the waiting period after {food} has ended.",
    },
    MessageVariant {
        title: "Cheese is back on the menu",
        named_body: "{name}, you can have dairy again.",
        anonymous_body: "You can have dairy again.",
    },
    MessageVariant {
        title: "Milk o'clock",
        named_body: "Coffee with milk, {name}? The {food} wait just finished.",
        anonymous_body: "Coffee with milk? The {food} wait just finished.",
    },
    MessageVariant {
        title: "Time's up!",
        named_body: "{name}, the countdown after {food} reached zero. Dairy is fine now.",
        anonymous_body: "The countdown after {food} reached zero. Dairy is fine now.",
    },
];

/// Builds the pool entry at `index` (wrapped into range).
pub fn notification_at(
    index: usize,
    category: Category,
    owner_name: Option<&str>,
) -> ExpiryNotification {
    let variant = &MESSAGE_POOL[index % MESSAGE_POOL.len()];
    let name = owner_name.map(str::trim).filter(|name| !name.is_empty());
    let template = match name {
        Some(_) => variant.named_body,
        None => variant.anonymous_body,
    };
    let body = template
        .replace("{name}", name.unwrap_or_default())
        .replace("{food}", category.food_label());
    ExpiryNotification {
        title: variant.title.to_string(),
        body,
        sound: true,
    }
}

pub fn random_notification(category: Category, owner_name: Option<&str>) -> ExpiryNotification {
    let index = rand::thread_rng().gen_range(0..MESSAGE_POOL.len());
    notification_at(index, category, owner_name)
}

/// Desktop notification through the platform notification service.
#[derive(Debug, Default)]
pub struct DesktopNotifier;

impl Notifier for DesktopNotifier {
    fn dispatch(&self, notification: &ExpiryNotification) -> Result<(), NotifyError> {
        let mut builder = notify_rust::Notification::new();
        builder
            .appname(APP_NAME)
            .summary(&notification.title)
            .body(&notification.body)
            .icon("alarm-clock");

        #[cfg(all(unix, not(target_os = "macos")))]
        {
            if notification.sound {
                builder.hint(notify_rust::Hint::SoundName(
                    "message-new-instant".to_string(),
                ));
            }
        }
        #[cfg(any(target_os = "macos", target_os = "windows"))]
        {
            if notification.sound {
                builder.sound_name("default");
            }
        }

        builder
            .show()
            .map(|_| ())
            .map_err(|err| NotifyError::Backend(err.to_string()))
    }
}

/// Prints the alert to stdout. Used on headless machines and in scripts.
#[derive(Debug, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn dispatch(&self, notification: &ExpiryNotification) -> Result<(), NotifyError> {
        info!(title = %notification.title, "notification dispatched to log");
        println!("notification: {} | {}", notification.title, notification.body);
        Ok(())
    }
}

/// Tries the desktop first and falls back to the log notifier, so a missing
/// notification daemon never hides the end of a wait.
#[derive(Debug, Default)]
pub struct FallbackNotifier {
    desktop: DesktopNotifier,
    log: LogNotifier,
}

impl Notifier for FallbackNotifier {
    fn dispatch(&self, notification: &ExpiryNotification) -> Result<(), NotifyError> {
        match self.desktop.dispatch(notification) {
            Ok(()) => Ok(()),
            Err(err) => {
                warn!(error = %err, "desktop notification failed; writing to log instead");
                self.log.dispatch(notification)
            }
        }
    }
}
