use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use ulid::Ulid;

use super::*;
use crate::notify::{BookingChange, BookingFeed};
use crate::wal::Wal;

/// In-process store backed by an optional journal.
///
/// Writes are serialized through the journal lock: check, journal, apply,
/// publish. Reads go straight to the maps.
pub struct MemoryStore {
    bookings: DashMap<Ulid, Booking>,
    /// service_type → packages
    catalogs: DashMap<String, Vec<ServicePackage>>,
    journal: Mutex<Option<Wal>>,
    feed: Arc<BookingFeed>,
    offline: AtomicBool,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// A store that keeps nothing on disk.
    pub fn new() -> Self {
        Self {
            bookings: DashMap::new(),
            catalogs: DashMap::new(),
            journal: Mutex::new(None),
            feed: Arc::new(BookingFeed::new()),
            offline: AtomicBool::new(false),
        }
    }

    /// Replay the journal at `path`, then keep appending to it.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let (wal, replay) = Wal::recover(path).map_err(journal_err)?;
        if let Some(damage) = replay.damage {
            warn!(
                path = %path.display(),
                offset = damage.offset,
                discarded = damage.discarded,
                "journal tail dropped: {}",
                damage.fault
            );
        }
        let mut store = Self::new();
        for event in &replay.events {
            store.apply(event);
        }
        info!(
            path = %path.display(),
            events = replay.events.len(),
            bookings = store.bookings.len(),
            "store replayed"
        );
        *store.journal.get_mut() = Some(wal);
        Ok(store)
    }

    pub fn feed(&self) -> Arc<BookingFeed> {
        self.feed.clone()
    }

    /// Simulate an outage: every call fails with `Unavailable` until cleared.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn booking(&self, id: Ulid) -> Option<Booking> {
        self.bookings.get(&id).map(|b| b.clone())
    }

    pub fn booking_count(&self) -> usize {
        self.bookings.len()
    }

    pub async fn upsert_booking(&self, booking: Booking) -> Result<(), StoreError> {
        self.commit(StoreEvent::BookingUpserted(booking)).await
    }

    pub async fn upsert_package(&self, package: ServicePackage) -> Result<(), StoreError> {
        self.commit(StoreEvent::PackageUpserted(package)).await
    }

    /// Writes since the journal was last rewritten. Zero without a journal.
    pub async fn appends_since_compact(&self) -> u64 {
        self.journal
            .lock()
            .await
            .as_ref()
            .map_or(0, Wal::appends_since_compact)
    }

    /// Rewrite the journal as one upsert per live record.
    pub async fn compact(&self) -> Result<(), StoreError> {
        let mut journal = self.journal.lock().await;
        let Some(wal) = journal.as_mut() else {
            return Ok(());
        };
        let mut events: Vec<StoreEvent> = Vec::new();
        for entry in self.catalogs.iter() {
            events.extend(entry.value().iter().cloned().map(StoreEvent::PackageUpserted));
        }
        let mut bookings: Vec<Booking> = self.bookings.iter().map(|e| e.value().clone()).collect();
        bookings.sort_by_key(|b| b.id);
        events.extend(bookings.into_iter().map(StoreEvent::BookingUpserted));

        let count = events.len();
        wal.compact(&events).map_err(journal_err)?;
        info!(records = count, "journal compacted");
        Ok(())
    }

    fn ensure_online(&self) -> Result<(), StoreError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("store is offline".into()));
        }
        Ok(())
    }

    async fn commit(&self, event: StoreEvent) -> Result<(), StoreError> {
        self.commit_if(event, None).await
    }

    async fn commit_if(&self, event: StoreEvent, expect: Option<Expect>) -> Result<(), StoreError> {
        self.ensure_online()?;
        let mut journal = self.journal.lock().await;
        if let Some(id) = target_of(&event) {
            let current = self.bookings.get(&id).ok_or(StoreError::NotFound(id))?;
            if let Some(expect) = expect {
                expect.check(&current)?;
            }
        }
        if let Some(wal) = journal.as_mut() {
            wal.append(&event).map_err(journal_err)?;
        }
        let change = self.apply(&event);
        drop(journal);
        if let Some(change) = change {
            self.feed.send(&change);
        }
        Ok(())
    }

    /// Apply one event to the maps. Events naming a missing booking are
    /// ignored so that a replayed journal never fails half way.
    fn apply(&self, event: &StoreEvent) -> Option<BookingChange> {
        match event {
            StoreEvent::BookingUpserted(booking) => {
                self.bookings.insert(booking.id, booking.clone());
                Some(BookingChange::Upserted(booking.clone()))
            }
            StoreEvent::StatusChanged { id, status } => {
                let mut entry = self.bookings.get_mut(id)?;
                entry.status = *status;
                Some(BookingChange::Upserted(entry.value().clone()))
            }
            StoreEvent::PaymentChanged { id, status, fields } => {
                let mut entry = self.bookings.get_mut(id)?;
                entry.payment_status = *status;
                fields.apply_to(&mut entry);
                Some(BookingChange::Upserted(entry.value().clone()))
            }
            StoreEvent::Archived { id, at } => {
                let mut entry = self.bookings.get_mut(id)?;
                entry.archived_at = Some(*at);
                Some(BookingChange::Upserted(entry.value().clone()))
            }
            StoreEvent::Deleted { id } => {
                let (_, removed) = self.bookings.remove(id)?;
                Some(BookingChange::Removed {
                    id: removed.id,
                    customer_id: removed.customer_id,
                })
            }
            StoreEvent::PackageUpserted(package) => {
                // a package may move between service types
                for mut other in self.catalogs.iter_mut() {
                    if *other.key() != package.service_type {
                        other.retain(|p| p.id != package.id);
                    }
                }
                let mut list = self
                    .catalogs
                    .entry(package.service_type.clone())
                    .or_default();
                match list.iter_mut().find(|p| p.id == package.id) {
                    Some(existing) => *existing = package.clone(),
                    None => list.push(package.clone()),
                }
                None
            }
        }
    }
}

/// Precondition on the stored booking, checked under the journal lock.
#[derive(Debug, Clone, Copy)]
enum Expect {
    Status(BookingStatus),
    Payment(PaymentStatus),
}

impl Expect {
    fn check(self, current: &Booking) -> Result<(), StoreError> {
        let (expected, found) = match self {
            Expect::Status(s) if s != current.status => (s.to_string(), current.status.to_string()),
            Expect::Payment(p) if p != current.payment_status => {
                (p.to_string(), current.payment_status.to_string())
            }
            _ => return Ok(()),
        };
        Err(StoreError::Conflict {
            booking_id: current.id,
            expected,
            found,
        })
    }
}

fn target_of(event: &StoreEvent) -> Option<Ulid> {
    match event {
        StoreEvent::StatusChanged { id, .. }
        | StoreEvent::PaymentChanged { id, .. }
        | StoreEvent::Archived { id, .. }
        | StoreEvent::Deleted { id } => Some(*id),
        StoreEvent::BookingUpserted(_) | StoreEvent::PackageUpserted(_) => None,
    }
}

fn journal_err(e: std::io::Error) -> StoreError {
    StoreError::Journal(e.to_string())
}

#[async_trait]
impl BookingStore for MemoryStore {
    async fn fetch_bookings(&self, filter: &BookingFilter) -> Result<Vec<Booking>, StoreError> {
        self.ensure_online()?;
        let mut out: Vec<Booking> = self
            .bookings
            .iter()
            .filter(|e| filter.matches(e.value()))
            .map(|e| e.value().clone())
            .collect();
        out.sort_by(|a, b| (a.created_at, a.id).cmp(&(b.created_at, b.id)));
        debug!(count = out.len(), "bookings fetched");
        Ok(out)
    }

    async fn fetch_booking(&self, booking_id: Ulid) -> Result<Booking, StoreError> {
        self.ensure_online()?;
        self.booking(booking_id)
            .ok_or(StoreError::NotFound(booking_id))
    }

    async fn persist_status_change(
        &self,
        booking_id: Ulid,
        expected: BookingStatus,
        to: BookingStatus,
    ) -> Result<(), StoreError> {
        let event = StoreEvent::StatusChanged {
            id: booking_id,
            status: to,
        };
        self.commit_if(event, Some(Expect::Status(expected))).await
    }

    async fn persist_payment_change(
        &self,
        booking_id: Ulid,
        expected: PaymentStatus,
        to: PaymentStatus,
        fields: &PaymentFields,
    ) -> Result<(), StoreError> {
        let event = StoreEvent::PaymentChanged {
            id: booking_id,
            status: to,
            fields: fields.clone(),
        };
        self.commit_if(event, Some(Expect::Payment(expected))).await
    }

    async fn archive_booking(&self, booking_id: Ulid) -> Result<(), StoreError> {
        self.commit(StoreEvent::Archived {
            id: booking_id,
            at: Utc::now(),
        })
        .await
    }

    async fn delete_booking(&self, booking_id: Ulid) -> Result<(), StoreError> {
        self.commit(StoreEvent::Deleted { id: booking_id }).await
    }
}

#[async_trait]
impl CatalogSource for MemoryStore {
    async fn fetch_package_catalog(
        &self,
        service_type: &str,
    ) -> Result<Vec<ServicePackage>, StoreError> {
        self.ensure_online()?;
        Ok(self
            .catalogs
            .get(service_type)
            .map(|list| list.clone())
            .unwrap_or_default())
    }
}
