use std::sync::Arc;

use chrono::{NaiveDateTime, Utc};
use tracing::{info, warn};
use ulid::Ulid;

use crate::grouping::{DisplayPage, build_page};
use crate::lifecycle::*;
use crate::model::{Booking, BookingStatus};
use crate::observability;
use crate::store::{BookingFilter, BookingStore, StoreError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeskError {
    Transition(TransitionError),
    Store(StoreError),
}

impl std::fmt::Display for DeskError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeskError::Transition(e) => write!(f, "{e}"),
            DeskError::Store(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for DeskError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            DeskError::Transition(e) => Some(e),
            DeskError::Store(e) => Some(e),
        }
    }
}

impl From<TransitionError> for DeskError {
    fn from(e: TransitionError) -> Self {
        DeskError::Transition(e)
    }
}

impl From<StoreError> for DeskError {
    fn from(e: StoreError) -> Self {
        DeskError::Store(e)
    }
}

/// What a lifecycle request did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Written; carries the operator-facing description.
    Applied(String),
    /// Already in the requested state. Nothing was written.
    Unchanged,
}

/// Plans lifecycle requests against the stored booking, then hands the
/// resulting write to the store along with the state it was planned from.
pub struct BookingDesk<S> {
    store: Arc<S>,
    table: TransitionTable,
}

impl<S: BookingStore> BookingDesk<S> {
    pub fn new(store: Arc<S>, table: TransitionTable) -> Self {
        Self { store, table }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn table(&self) -> &TransitionTable {
        &self.table
    }

    /// Look a booking up by id, archived ones included.
    pub async fn find(&self, id: Ulid) -> Result<Booking, DeskError> {
        Ok(self.store.fetch_booking(id).await?)
    }

    async fn current(&self, kind: &'static str, id: Ulid) -> Result<Booking, DeskError> {
        self.store
            .fetch_booking(id)
            .await
            .inspect_err(|e| failed(kind, id, e))
            .map_err(DeskError::from)
    }

    pub async fn change_status(
        &self,
        booking_id: Ulid,
        requested: BookingStatus,
    ) -> Result<Outcome, DeskError> {
        const KIND: &str = "status";
        let booking = self.current(KIND, booking_id).await?;
        let change = plan_status_change(&self.table, &booking, requested)
            .inspect_err(|e| rejected(KIND, e))?;
        match change {
            StatusChange::Unchanged => {
                record(KIND, "noop");
                Ok(Outcome::Unchanged)
            }
            StatusChange::Apply {
                booking_id,
                from,
                to,
                description,
            } => {
                self.store
                    .persist_status_change(booking_id, from, to)
                    .await
                    .inspect_err(|e| failed(KIND, booking_id, e))?;
                info!(%booking_id, %from, %to, "status changed");
                record(KIND, "applied");
                Ok(Outcome::Applied(description))
            }
        }
    }

    pub async fn apply_payment(
        &self,
        booking_id: Ulid,
        event: &PaymentEvent,
    ) -> Result<Outcome, DeskError> {
        const KIND: &str = "payment";
        let booking = self.current(KIND, booking_id).await?;
        let change =
            plan_payment(&booking, event, Utc::now()).inspect_err(|e| rejected(KIND, e))?;
        self.store
            .persist_payment_change(change.booking_id, change.from, change.to, &change.fields)
            .await
            .inspect_err(|e| failed(KIND, change.booking_id, e))?;
        info!(
            booking_id = %change.booking_id,
            from = %change.from,
            to = %change.to,
            "payment status changed"
        );
        record(KIND, "applied");
        Ok(Outcome::Applied(change.description))
    }

    pub async fn archive(&self, booking_id: Ulid) -> Result<Outcome, DeskError> {
        self.remove(booking_id, RemovalKind::Archive, Authority::Operator)
            .await
    }

    pub async fn delete(
        &self,
        booking_id: Ulid,
        authority: Authority,
    ) -> Result<Outcome, DeskError> {
        self.remove(booking_id, RemovalKind::Delete, authority).await
    }

    async fn remove(
        &self,
        booking_id: Ulid,
        kind: RemovalKind,
        authority: Authority,
    ) -> Result<Outcome, DeskError> {
        let label = match kind {
            RemovalKind::Archive => "archive",
            RemovalKind::Delete => "delete",
        };
        let booking = self.current(label, booking_id).await?;
        let removal =
            plan_removal(&booking, kind, authority).inspect_err(|e| rejected(label, e))?;
        let (booking_id, description) = match removal {
            Removal::Unchanged => {
                record(label, "noop");
                return Ok(Outcome::Unchanged);
            }
            Removal::Apply {
                booking_id,
                description,
                ..
            } => (booking_id, description),
        };
        let written = match kind {
            RemovalKind::Archive => self.store.archive_booking(booking_id).await,
            RemovalKind::Delete => self.store.delete_booking(booking_id).await,
        };
        written.inspect_err(|e| failed(label, booking_id, e))?;
        info!(%booking_id, operation = label, "booking removed from active view");
        record(label, "applied");
        Ok(Outcome::Applied(description))
    }

    /// Fetch a snapshot and cut one display page out of it.
    pub async fn page(
        &self,
        filter: &BookingFilter,
        page: usize,
        page_size: usize,
        now: NaiveDateTime,
    ) -> Result<DisplayPage, DeskError> {
        let bookings = self.store.fetch_bookings(filter).await?;
        let built = build_page(&bookings, page, page_size, now);
        metrics::counter!(observability::PAGE_BUILDS_TOTAL).increment(1);
        Ok(built)
    }
}

fn record(kind: &'static str, result: &'static str) {
    metrics::counter!(observability::TRANSITIONS_TOTAL, "kind" => kind, "result" => result)
        .increment(1);
}

fn rejected(kind: &'static str, e: &TransitionError) {
    warn!(operation = kind, "rejected: {e}");
    record(kind, "rejected");
}

fn failed(kind: &'static str, booking_id: Ulid, e: &StoreError) {
    warn!(operation = kind, %booking_id, "store call failed: {e}");
    let result = match e {
        StoreError::Conflict { .. } => "conflict",
        StoreError::NotFound(_) => "not_found",
        StoreError::Unavailable(_) | StoreError::Journal(_) => "failed",
    };
    record(kind, result);
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveDate, NaiveTime};

    use super::*;
    use crate::model::{PaymentMethod, PaymentStatus};
    use crate::store::MemoryStore;

    fn booking() -> Booking {
        Booking::new(
            Ulid::new(),
            Ulid::new(),
            NaiveDate::from_ymd_opt(2026, 7, 1).unwrap(),
            NaiveTime::from_hms_opt(13, 0, 0).unwrap(),
            NaiveTime::from_hms_opt(15, 0, 0).unwrap(),
            2200,
            Utc::now(),
        )
    }

    async fn desk_with(b: &Booking) -> BookingDesk<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        store.upsert_booking(b.clone()).await.unwrap();
        BookingDesk::new(store, TransitionTable::standard())
    }

    #[tokio::test]
    async fn status_change_is_persisted() {
        let b = booking();
        let desk = desk_with(&b).await;
        let outcome = desk.change_status(b.id, BookingStatus::Confirmed).await.unwrap();
        assert!(matches!(outcome, Outcome::Applied(ref d) if d.starts_with("Confirm booking")));
        assert_eq!(desk.find(b.id).await.unwrap().status, BookingStatus::Confirmed);
    }

    #[tokio::test]
    async fn same_status_writes_nothing() {
        let b = booking();
        let desk = desk_with(&b).await;
        let mut rx = desk.store().feed().subscribe_all();
        assert_eq!(
            desk.change_status(b.id, BookingStatus::Pending).await,
            Ok(Outcome::Unchanged)
        );
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn illegal_status_is_rejected_before_the_store() {
        let mut b = booking();
        b.status = BookingStatus::Completed;
        let desk = desk_with(&b).await;
        let err = desk.change_status(b.id, BookingStatus::Pending).await.unwrap_err();
        assert!(matches!(err, DeskError::Transition(TransitionError::IllegalStatus { .. })));
        assert_eq!(desk.find(b.id).await.unwrap().status, BookingStatus::Completed);
    }

    #[tokio::test]
    async fn store_failure_surfaces_as_store_error() {
        let b = booking();
        let desk = desk_with(&b).await;
        desk.store().set_offline(true);
        let err = desk.change_status(b.id, BookingStatus::Confirmed).await.unwrap_err();
        assert!(matches!(err, DeskError::Store(StoreError::Unavailable(_))));
        desk.store().set_offline(false);
        assert_eq!(desk.find(b.id).await.unwrap().status, BookingStatus::Pending);
    }

    #[tokio::test]
    async fn status_change_plans_from_the_stored_booking() {
        let b = booking();
        let desk = desk_with(&b).await;
        // Another desk finished the job after this operator loaded the list.
        for (from, to) in [
            (BookingStatus::Pending, BookingStatus::Confirmed),
            (BookingStatus::Confirmed, BookingStatus::InProgress),
            (BookingStatus::InProgress, BookingStatus::Completed),
        ] {
            desk.store().persist_status_change(b.id, from, to).await.unwrap();
        }

        let err = desk.change_status(b.id, BookingStatus::Cancelled).await.unwrap_err();
        assert!(matches!(
            err,
            DeskError::Transition(TransitionError::IllegalStatus {
                current: BookingStatus::Completed,
                requested: BookingStatus::Cancelled,
                ..
            })
        ));
        assert_eq!(desk.find(b.id).await.unwrap().status, BookingStatus::Completed);
    }

    #[tokio::test]
    async fn second_mark_paid_is_rejected() {
        let b = booking();
        let desk = desk_with(&b).await;
        let cash = PaymentEvent::MarkPaid {
            method: PaymentMethod::Cash,
        };
        desk.apply_payment(b.id, &cash).await.unwrap();
        let err = desk
            .apply_payment(
                b.id,
                &PaymentEvent::MarkPaid {
                    method: PaymentMethod::CreditCard,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, DeskError::Transition(TransitionError::IllegalPayment { .. })));
        assert_eq!(
            desk.find(b.id).await.unwrap().payment_method,
            Some(PaymentMethod::Cash)
        );
    }

    #[tokio::test]
    async fn unknown_booking_is_not_found() {
        let desk = desk_with(&booking()).await;
        let id = Ulid::new();
        assert_eq!(
            desk.archive(id).await,
            Err(DeskError::Store(StoreError::NotFound(id)))
        );
    }

    #[tokio::test]
    async fn mark_paid_records_method_and_time() {
        let b = booking();
        let desk = desk_with(&b).await;
        desk.apply_payment(
            b.id,
            &PaymentEvent::MarkPaid {
                method: PaymentMethod::PromptPay,
            },
        )
        .await
        .unwrap();
        let stored = desk.find(b.id).await.unwrap();
        assert_eq!(stored.payment_status, PaymentStatus::Paid);
        assert_eq!(stored.payment_method, Some(PaymentMethod::PromptPay));
        assert!(stored.paid_at.is_some());
    }

    #[tokio::test]
    async fn delete_needs_privilege_archive_does_not() {
        let b = booking();
        let desk = desk_with(&b).await;
        let err = desk.delete(b.id, Authority::Operator).await.unwrap_err();
        assert!(matches!(err, DeskError::Transition(TransitionError::NotPermitted { .. })));

        assert!(matches!(desk.archive(b.id).await, Ok(Outcome::Applied(_))));
        let archived = desk.find(b.id).await.unwrap();
        assert!(archived.is_archived());
        assert_eq!(desk.archive(b.id).await, Ok(Outcome::Unchanged));

        assert!(matches!(
            desk.delete(b.id, Authority::Privileged).await,
            Ok(Outcome::Applied(_))
        ));
        assert!(matches!(
            desk.find(b.id).await,
            Err(DeskError::Store(StoreError::NotFound(_)))
        ));
    }

    #[tokio::test]
    async fn page_excludes_archived_by_default() {
        let a = booking();
        let b = booking();
        let desk = desk_with(&a).await;
        desk.store().upsert_booking(b.clone()).await.unwrap();
        desk.archive(b.id).await.unwrap();

        let now = NaiveDate::from_ymd_opt(2026, 6, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        let page = desk.page(&BookingFilter::default(), 1, 10, now).await.unwrap();
        assert_eq!(page.booking_count(), 1);
        assert_eq!(page.total_pages, 1);
    }
}
