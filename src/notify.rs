use dashmap::DashMap;
use tokio::sync::broadcast;

use crate::model::{Day, Event};

const CHANNEL_CAPACITY: usize = 256;

/// Fire-and-forget dispatch hub for allotment events.
///
/// Two channel families: one per calendar day (calendar watchers) and one
/// per requester (owner notices; cancellation events carry the settlement
/// flag). Delivery beyond this process is a downstream collaborator's job.
pub struct NotifyHub {
    channels: DashMap<String, broadcast::Sender<Event>>,
}

fn date_channel(date: Day) -> String {
    format!("date:{date}")
}

fn requester_channel(name: &str) -> String {
    format!("requester:{name}")
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
        }
    }

    /// Subscribe to every event touching a calendar day.
    pub fn subscribe_date(&self, date: Day) -> broadcast::Receiver<Event> {
        self.subscribe(date_channel(date))
    }

    /// Subscribe to every event touching one requester's bookings.
    pub fn subscribe_requester(&self, name: &str) -> broadcast::Receiver<Event> {
        self.subscribe(requester_channel(name))
    }

    fn subscribe(&self, key: String) -> broadcast::Receiver<Event> {
        let sender = self
            .channels
            .entry(key)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    /// Publish an event. No-op on channels nobody listens to.
    pub fn publish(&self, date: Day, owner: Option<&str>, event: &Event) {
        self.send_to(&date_channel(date), event);
        if let Some(name) = owner {
            self.send_to(&requester_channel(name), event);
        }
    }

    fn send_to(&self, key: &str, event: &Event) {
        if let Some(sender) = self.channels.get(key) {
            let _ = sender.send(event.clone());
        }
    }

    /// Drop a day channel (when the reaper retires the day).
    pub fn remove_date(&self, date: Day) {
        self.channels.remove(&date_channel(date));
    }
}

/// JSON payload for downstream dispatchers.
pub fn payload(event: &Event) -> String {
    serde_json::to_string(event).unwrap_or_default()
}
