pub mod report;

pub use report::{FileReporter, ReportSink};

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::reasoner::IntervalSnapshot;

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_info, log_warn};

/// Key prefix for interval tuples: `HMP.<model>`.
pub const INTERVAL_KEY_PREFIX: &str = "HMP";

/// One named string fact on the tuple bus.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub key: String,
    pub value: String,
}

impl Notification {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }

    /// `HMP.<model>` carrying the interval as JSON.
    pub fn interval(snapshot: &IntervalSnapshot) -> Self {
        let key = format!("{INTERVAL_KEY_PREFIX}.{}", snapshot.model);
        let value = json_or_else(&key, snapshot, || snapshot.report_line());
        Self::new(key, value)
    }
}

/// JSON for `value`, or `fallback()` with a warning when encoding fails.
fn json_or_else<T, F>(key: &str, value: &T, fallback: F) -> String
where
    T: Serialize + ?Sized,
    F: FnOnce() -> String,
{
    match serde_json::to_string(value) {
        Ok(json) => json,
        Err(err) => {
            log_warn!("{key}: JSON encoding failed ({err}), publishing plain text value");
            fallback()
        }
    }
}

/// Publish side of the host platform's pub/sub tuple bus.
///
/// Delivery is at-most-once and unacknowledged.
pub trait TupleBus: Send + Sync {
    fn publish(&self, notification: Notification);
}

/// Writes every tuple to the log. Stand-in for a tuple viewer.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogBus;

impl TupleBus for LogBus {
    fn publish(&self, notification: Notification) {
        log_info!("{} = {}", notification.key, notification.value);
    }
}

/// Forwards tuples into a tokio channel for an in-process subscriber.
#[derive(Debug, Clone)]
pub struct ChannelBus {
    sender: mpsc::UnboundedSender<Notification>,
}

impl ChannelBus {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Notification>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl TupleBus for ChannelBus {
    fn publish(&self, notification: Notification) {
        if let Err(err) = self.sender.send(notification) {
            log_warn!("tuple bus subscriber gone, dropping {}", err.0.key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reasoner::Interval;

    #[test]
    fn interval_notification_is_keyed_by_model() {
        let mut interval = Interval::open("Drink", 3, 0.7);
        interval.close(5).unwrap();

        let notification = Notification::interval(&interval.describe());
        assert_eq!(notification.key, "HMP.Drink");

        let decoded: IntervalSnapshot = serde_json::from_str(&notification.value).unwrap();
        assert_eq!(decoded, interval.describe());
    }

    struct Unencodable;

    impl Serialize for Unencodable {
        fn serialize<S: serde::Serializer>(&self, _: S) -> std::result::Result<S::Ok, S::Error> {
            Err(serde::ser::Error::custom("no JSON form"))
        }
    }

    #[test]
    fn unencodable_value_falls_back_to_plain_text() {
        let value = json_or_else("HMP.Sit", &Unencodable, || "Sit 1 2 0.9000 0".to_string());
        assert_eq!(value, "Sit 1 2 0.9000 0");

        let value = json_or_else("HMP.Sit", &[1, 2], || unreachable!());
        assert_eq!(value, "[1,2]");
    }

    #[test]
    fn channel_bus_delivers_in_order() {
        let (bus, mut rx) = ChannelBus::new();
        bus.publish(Notification::new("Fall.Alarm", "Fall"));
        bus.publish(Notification::new("Fall.Posture", "Lying"));

        assert_eq!(rx.try_recv().unwrap().key, "Fall.Alarm");
        assert_eq!(rx.try_recv().unwrap().value, "Lying");
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn channel_bus_survives_dropped_receiver() {
        let (bus, rx) = ChannelBus::new();
        drop(rx);
        bus.publish(Notification::new("Fall.Alarm", "Fall"));
    }
}
