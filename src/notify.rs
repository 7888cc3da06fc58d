use dashmap::DashMap;
use tokio::sync::broadcast;
use ulid::Ulid;

use crate::model::Booking;
use crate::store::BookingFilter;

const CHANNEL_CAPACITY: usize = 256;

/// An updated booking record pushed by the store.
#[derive(Debug, Clone, PartialEq)]
pub enum BookingChange {
    Upserted(Booking),
    Removed { id: Ulid, customer_id: Ulid },
}

impl BookingChange {
    pub fn customer_id(&self) -> Ulid {
        match self {
            BookingChange::Upserted(b) => b.customer_id,
            BookingChange::Removed { customer_id, .. } => *customer_id,
        }
    }
}

/// Broadcast hub for booking changes: one firehose plus one channel per customer.
pub struct BookingFeed {
    all: broadcast::Sender<BookingChange>,
    by_customer: DashMap<Ulid, broadcast::Sender<BookingChange>>,
}

impl Default for BookingFeed {
    fn default() -> Self {
        Self::new()
    }
}

impl BookingFeed {
    pub fn new() -> Self {
        Self {
            all: broadcast::channel(CHANNEL_CAPACITY).0,
            by_customer: DashMap::new(),
        }
    }

    pub fn subscribe_all(&self) -> broadcast::Receiver<BookingChange> {
        self.all.subscribe()
    }

    /// Subscribe to one customer's bookings. Creates the channel if needed.
    pub fn subscribe(&self, customer_id: Ulid) -> broadcast::Receiver<BookingChange> {
        let sender = self
            .by_customer
            .entry(customer_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    /// Publish a change. No-op if nobody is listening.
    pub fn send(&self, change: &BookingChange) {
        let _ = self.all.send(change.clone());
        if let Some(sender) = self.by_customer.get(&change.customer_id()) {
            let _ = sender.send(change.clone());
        }
    }
}

/// Fold a received change into a snapshot, returning the new snapshot.
///
/// An upserted record that no longer passes `filter` (archived, moved out of
/// the date range) drops out, the same as a removal.
pub fn apply_change(
    snapshot: &[Booking],
    change: &BookingChange,
    filter: &BookingFilter,
) -> Vec<Booking> {
    match change {
        BookingChange::Upserted(updated) => {
            let keep = filter.matches(updated);
            let mut replaced = false;
            let mut next: Vec<Booking> = snapshot
                .iter()
                .filter_map(|b| {
                    if b.id != updated.id {
                        return Some(b.clone());
                    }
                    replaced = true;
                    keep.then(|| updated.clone())
                })
                .collect();
            if !replaced && keep {
                next.push(updated.clone());
            }
            next
        }
        BookingChange::Removed { id, .. } => {
            snapshot.iter().filter(|b| b.id != *id).cloned().collect()
        }
    }
}
