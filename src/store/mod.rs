mod memory;

pub use memory::MemoryStore;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::model::*;

/// Which bookings to fetch. The core passes it through untouched; only the
/// store implementation interprets it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BookingFilter {
    pub customer_id: Option<Ulid>,
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
    pub include_archived: bool,
}

impl BookingFilter {
    pub fn matches(&self, booking: &Booking) -> bool {
        if !self.include_archived && booking.is_archived() {
            return false;
        }
        if let Some(cid) = self.customer_id
            && booking.customer_id != cid
        {
            return false;
        }
        if let Some(from) = self.from
            && booking.booking_date < from
        {
            return false;
        }
        if let Some(to) = self.to
            && booking.booking_date > to
        {
            return false;
        }
        true
    }
}

/// Payment columns written alongside a payment status change. `None` means
/// "leave as is".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentFields {
    pub payment_method: Option<PaymentMethod>,
    pub paid_at: Option<DateTime<Utc>>,
    pub payment_evidence: Option<String>,
    pub refund_reason: Option<String>,
}

impl PaymentFields {
    pub fn apply_to(&self, booking: &mut Booking) {
        if let Some(method) = self.payment_method {
            booking.payment_method = Some(method);
        }
        if let Some(at) = self.paid_at {
            booking.paid_at = Some(at);
        }
        if let Some(ref evidence) = self.payment_evidence {
            booking.payment_evidence = Some(evidence.clone());
        }
        if let Some(ref reason) = self.refund_reason {
            booking.refund_reason = Some(reason.clone());
        }
    }
}

/// Journal record format for the bundled store. Flat, one write per record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StoreEvent {
    BookingUpserted(Booking),
    StatusChanged {
        id: Ulid,
        status: BookingStatus,
    },
    PaymentChanged {
        id: Ulid,
        status: PaymentStatus,
        fields: PaymentFields,
    },
    Archived {
        id: Ulid,
        at: DateTime<Utc>,
    },
    Deleted {
        id: Ulid,
    },
    PackageUpserted(ServicePackage),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    NotFound(Ulid),
    /// The stored booking moved on since the caller read it.
    Conflict {
        booking_id: Ulid,
        expected: String,
        found: String,
    },
    Unavailable(String),
    Journal(String),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::NotFound(id) => write!(f, "booking not found: {id}"),
            StoreError::Conflict {
                booking_id,
                expected,
                found,
            } => write!(
                f,
                "booking {booking_id} changed underneath: expected {expected}, found {found}"
            ),
            StoreError::Unavailable(msg) => write!(f, "store unavailable: {msg}"),
            StoreError::Journal(msg) => write!(f, "journal error: {msg}"),
        }
    }
}

impl std::error::Error for StoreError {}

/// The write and read surface the booking core relies on. Every write is a
/// single logical update of one booking.
#[async_trait]
pub trait BookingStore: Send + Sync {
    async fn fetch_bookings(&self, filter: &BookingFilter) -> Result<Vec<Booking>, StoreError>;

    /// Current state of one booking, archived or not.
    async fn fetch_booking(&self, booking_id: Ulid) -> Result<Booking, StoreError>;

    /// Write `to` only if the stored status is still `expected`, otherwise
    /// fail with `Conflict`.
    async fn persist_status_change(
        &self,
        booking_id: Ulid,
        expected: BookingStatus,
        to: BookingStatus,
    ) -> Result<(), StoreError>;

    /// Same compare-and-set contract as `persist_status_change`, on the
    /// payment status.
    async fn persist_payment_change(
        &self,
        booking_id: Ulid,
        expected: PaymentStatus,
        to: PaymentStatus,
        fields: &PaymentFields,
    ) -> Result<(), StoreError>;

    /// Soft removal: the booking stays queryable with `include_archived`.
    async fn archive_booking(&self, booking_id: Ulid) -> Result<(), StoreError>;

    /// Permanent removal.
    async fn delete_booking(&self, booking_id: Ulid) -> Result<(), StoreError>;
}

#[async_trait]
pub trait CatalogSource: Send + Sync {
    async fn fetch_package_catalog(
        &self,
        service_type: &str,
    ) -> Result<Vec<ServicePackage>, StoreError>;
}
