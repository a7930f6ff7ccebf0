//! Push notifications.

use elghella_core::NotificationConfig;
use serde::Deserialize;
use tracing::{info, warn};

pub const DEFAULT_TITLE: &str = "Elghella";
pub const DEFAULT_BODY: &str = "You have a new update";

/// Display options for a notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationOptions {
    pub body: String,
    pub icon: String,
    pub badge: String,
    /// Notifications sharing a tag replace each other.
    pub tag: String,
}

/// Shows notifications. Fire-and-forget.
pub trait Notifier: Send + Sync {
    fn show(&self, title: &str, options: NotificationOptions);
}

/// Writes notifications to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn show(&self, title: &str, options: NotificationOptions) {
        info!(
            title,
            body = %options.body,
            icon = %options.icon,
            tag = %options.tag,
            "Notification"
        );
    }
}

/// Decoded push payload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct PushPayload {
    pub title: Option<String>,
    pub body: Option<String>,
}

impl PushPayload {
    /// Decode raw push data. Absent or malformed data yields an empty payload.
    pub fn parse(data: Option<&[u8]>) -> Self {
        let Some(data) = data else {
            return Self::default();
        };
        match serde_json::from_slice(data) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(error = %e, "Malformed push payload");
                Self::default()
            }
        }
    }

    /// Title and options for display, with defaults filled in.
    pub fn to_notification(&self, config: &NotificationConfig) -> (String, NotificationOptions) {
        let title = self.title.clone().unwrap_or_else(|| DEFAULT_TITLE.to_string());
        let options = NotificationOptions {
            body: self.body.clone().unwrap_or_else(|| DEFAULT_BODY.to_string()),
            icon: config.icon.clone(),
            badge: config.badge.clone(),
            tag: config.tag.clone(),
        };
        (title, options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_payload() {
        let payload = PushPayload::parse(Some(br#"{"title":"New offer","body":"Tractor for rent"}"#));
        assert_eq!(payload.title.as_deref(), Some("New offer"));
        assert_eq!(payload.body.as_deref(), Some("Tractor for rent"));
    }

    #[test]
    fn test_missing_and_malformed_payloads_use_defaults() {
        let config = NotificationConfig::default();
        for data in [None, Some(&b"not json"[..]), Some(&b"{}"[..])] {
            let (title, options) = PushPayload::parse(data).to_notification(&config);
            assert_eq!(title, DEFAULT_TITLE);
            assert_eq!(options.body, DEFAULT_BODY);
        }
    }

    #[test]
    fn test_options_use_configured_tag() {
        let config = NotificationConfig::default();
        let (_, options) = PushPayload::default().to_notification(&config);
        assert_eq!(options.tag, config.tag);
        assert_eq!(options.icon, config.icon);
        assert_eq!(options.badge, config.badge);
    }
}
