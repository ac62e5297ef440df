//! Daily check-in prompt and its once-a-day reminder

use anyhow::Result;
use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::capabilities::Notifier;
use crate::mood::{MoodEntry, is_same_day};
use crate::store::KeyValueStore;

pub const LAST_DISMISSED_KEY: &str = "reflect_last_dismissed";
pub const LAST_NOTIFIED_KEY: &str = "reflect_last_notified";

const NOTIFICATION_TITLE: &str = "Reflect";
const NOTIFICATION_BODY: &str = "Time to check in with yourself.";

async fn read_stamp(kv: &dyn KeyValueStore, key: &str) -> Result<Option<DateTime<Utc>>> {
    let Some(raw) = kv.get(key).await? else {
        return Ok(None);
    };
    match DateTime::parse_from_rfc3339(&raw) {
        Ok(t) => Ok(Some(t.with_timezone(&Utc))),
        Err(e) => {
            warn!("Ignoring unreadable {} timestamp {:?}: {}", key, raw, e);
            Ok(None)
        }
    }
}

/// Due unless dismissed today or a mood was already logged today.
/// `recent` is newest first.
pub async fn is_due(kv: &dyn KeyValueStore, recent: &[MoodEntry], now: DateTime<Utc>) -> Result<bool> {
    if let Some(dismissed) = read_stamp(kv, LAST_DISMISSED_KEY).await?
        && is_same_day(dismissed, now)
    {
        debug!("Check-in dismissed for today");
        return Ok(false);
    }

    Ok(match recent.first() {
        Some(latest) => !is_same_day(latest.logged_at, now),
        None => true,
    })
}

/// Hide the check-in for the rest of the day
pub async fn dismiss(kv: &dyn KeyValueStore, now: DateTime<Utc>) -> Result<()> {
    kv.set(LAST_DISMISSED_KEY, &now.to_rfc3339()).await
}

/// Send the reminder notification when a check-in is due and no reminder
/// went out today. `recent` is newest first. Returns whether a notification
/// was sent; notifier failures are logged and leave the stamp untouched so
/// a later call can try again.
pub async fn notify_if_due(
    kv: &dyn KeyValueStore,
    notifier: &dyn Notifier,
    recent: &[MoodEntry],
    now: DateTime<Utc>,
) -> Result<bool> {
    if !is_due(kv, recent, now).await? {
        return Ok(false);
    }
    if let Some(last) = read_stamp(kv, LAST_NOTIFIED_KEY).await?
        && is_same_day(last, now)
    {
        return Ok(false);
    }

    if let Err(e) = notifier.notify(NOTIFICATION_TITLE, NOTIFICATION_BODY).await {
        warn!("Check-in notification not sent: {}", e);
        return Ok(false);
    }
    kv.set(LAST_NOTIFIED_KEY, &now.to_rfc3339()).await?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::{CapabilityError, Unsupported};
    use crate::mood::Mood;
    use crate::store::InMemoryStore;
    use async_trait::async_trait;
    use chrono::Duration;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingNotifier {
        sent: AtomicUsize,
    }

    #[async_trait]
    impl Notifier for CountingNotifier {
        async fn notify(&self, _title: &str, _body: &str) -> Result<(), CapabilityError> {
            self.sent.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn logged(days_ago: i64) -> MoodEntry {
        let mut e = MoodEntry::new(Mood::Calm, "fine").unwrap();
        e.logged_at = Utc::now() - Duration::days(days_ago);
        e
    }

    #[tokio::test]
    async fn test_due_without_logs() {
        let kv = InMemoryStore::new();
        assert!(is_due(&kv, &[], Utc::now()).await.unwrap());
    }

    #[tokio::test]
    async fn test_not_due_after_logging_today() {
        let kv = InMemoryStore::new();
        assert!(!is_due(&kv, &[logged(0), logged(3)], Utc::now()).await.unwrap());
        assert!(is_due(&kv, &[logged(2)], Utc::now()).await.unwrap());
    }

    #[tokio::test]
    async fn test_dismissal_lasts_until_tomorrow() {
        let kv = InMemoryStore::new();
        let now = Utc::now();
        dismiss(&kv, now).await.unwrap();
        assert!(!is_due(&kv, &[], now).await.unwrap());
        assert!(is_due(&kv, &[], now + Duration::days(1)).await.unwrap());
    }

    #[tokio::test]
    async fn test_garbage_stamp_is_ignored() {
        let kv = InMemoryStore::new();
        kv.set(LAST_DISMISSED_KEY, "yesterday-ish").await.unwrap();
        assert!(is_due(&kv, &[], Utc::now()).await.unwrap());
    }

    #[tokio::test]
    async fn test_notification_at_most_once_per_day() {
        let kv = InMemoryStore::new();
        let notifier = CountingNotifier::default();
        let now = Utc::now();

        assert!(notify_if_due(&kv, &notifier, &[], now).await.unwrap());
        assert!(!notify_if_due(&kv, &notifier, &[], now).await.unwrap());
        assert!(
            notify_if_due(&kv, &notifier, &[], now + Duration::days(1))
                .await
                .unwrap()
        );
        assert_eq!(notifier.sent.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_no_reminder_after_logging_today() {
        let kv = InMemoryStore::new();
        let notifier = CountingNotifier::default();

        assert!(!notify_if_due(&kv, &notifier, &[logged(0)], Utc::now()).await.unwrap());
        assert_eq!(notifier.sent.load(Ordering::SeqCst), 0);
        assert_eq!(kv.get(LAST_NOTIFIED_KEY).await.unwrap(), None);

        assert!(notify_if_due(&kv, &notifier, &[logged(1)], Utc::now()).await.unwrap());
        assert_eq!(notifier.sent.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_no_reminder_after_dismissal() {
        let kv = InMemoryStore::new();
        let notifier = CountingNotifier::default();
        let now = Utc::now();
        dismiss(&kv, now).await.unwrap();

        assert!(!notify_if_due(&kv, &notifier, &[], now).await.unwrap());
        assert_eq!(notifier.sent.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_unsupported_notifier_leaves_stamp_unset() {
        let kv = InMemoryStore::new();
        assert!(!notify_if_due(&kv, &Unsupported, &[], Utc::now()).await.unwrap());
        assert_eq!(kv.get(LAST_NOTIFIED_KEY).await.unwrap(), None);
    }
}
