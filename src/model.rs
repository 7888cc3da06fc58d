use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Money in minor currency units.
pub type Price = i64;

// ── Booking status ───────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookingStatus {
    Pending,
    Confirmed,
    InProgress,
    Completed,
    Cancelled,
    NoShow,
}

impl BookingStatus {
    pub const ALL: [BookingStatus; 6] = [
        BookingStatus::Pending,
        BookingStatus::Confirmed,
        BookingStatus::InProgress,
        BookingStatus::Completed,
        BookingStatus::Cancelled,
        BookingStatus::NoShow,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Pending => "pending",
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::InProgress => "in_progress",
            BookingStatus::Completed => "completed",
            BookingStatus::Cancelled => "cancelled",
            BookingStatus::NoShow => "no_show",
        }
    }
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            BookingStatus::Pending => "Pending",
            BookingStatus::Confirmed => "Confirmed",
            BookingStatus::InProgress => "In Progress",
            BookingStatus::Completed => "Completed",
            BookingStatus::Cancelled => "Cancelled",
            BookingStatus::NoShow => "No Show",
        };
        f.write_str(label)
    }
}

impl FromStr for BookingStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace(['-', ' '], "_");
        BookingStatus::ALL
            .into_iter()
            .find(|st| st.as_str() == normalized)
            .ok_or_else(|| ParseEnumError::new("booking status", s))
    }
}

// ── Payment ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Unpaid,
    PendingVerification,
    Paid,
    Partial,
    RefundPending,
    Refunded,
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            PaymentStatus::Unpaid => "Unpaid",
            PaymentStatus::PendingVerification => "Pending Verification",
            PaymentStatus::Paid => "Paid",
            PaymentStatus::Partial => "Partially Paid",
            PaymentStatus::RefundPending => "Refund Pending",
            PaymentStatus::Refunded => "Refunded",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Cash,
    BankTransfer,
    PromptPay,
    CreditCard,
}

impl fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            PaymentMethod::Cash => "cash",
            PaymentMethod::BankTransfer => "bank transfer",
            PaymentMethod::PromptPay => "PromptPay",
            PaymentMethod::CreditCard => "credit card",
        };
        f.write_str(label)
    }
}

impl FromStr for PaymentMethod {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace(['-', ' '], "_").as_str() {
            "cash" => Ok(PaymentMethod::Cash),
            "bank_transfer" | "transfer" => Ok(PaymentMethod::BankTransfer),
            "promptpay" | "prompt_pay" => Ok(PaymentMethod::PromptPay),
            "credit_card" | "card" => Ok(PaymentMethod::CreditCard),
            _ => Err(ParseEnumError::new("payment method", s)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseEnumError {
    kind: &'static str,
    input: String,
}

impl ParseEnumError {
    fn new(kind: &'static str, input: &str) -> Self {
        Self {
            kind,
            input: input.to_string(),
        }
    }
}

impl fmt::Display for ParseEnumError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown {}: {:?}", self.kind, self.input)
    }
}

impl std::error::Error for ParseEnumError {}

// ── Booking ──────────────────────────────────────────────────────

/// Who is sent to do the job. A booking is assigned to one staff member,
/// one team, or nobody yet, never both.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum Assignee {
    #[default]
    Unassigned,
    Staff(Ulid),
    Team(Ulid),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecurrencePattern {
    Weekly,
    Biweekly,
    Monthly,
}

/// Read model of a booking as fetched from the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Booking {
    pub id: Ulid,
    pub customer_id: Ulid,
    pub package_id: Option<Ulid>,
    pub booking_date: NaiveDate,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub status: BookingStatus,
    pub payment_status: PaymentStatus,
    pub payment_method: Option<PaymentMethod>,
    pub paid_at: Option<DateTime<Utc>>,
    /// Reference to an uploaded payment slip, if the customer submitted one.
    pub payment_evidence: Option<String>,
    pub refund_reason: Option<String>,
    pub total_price: Price,
    pub assignee: Assignee,
    /// Only set when priced from a tiered package.
    pub area: Option<f64>,
    pub frequency: Option<u32>,
    pub is_recurring: bool,
    pub recurring_group_id: Option<Ulid>,
    pub recurring_sequence: Option<u32>,
    pub recurring_total: Option<u32>,
    pub recurring_pattern: Option<RecurrencePattern>,
    pub created_at: DateTime<Utc>,
    pub archived_at: Option<DateTime<Utc>>,
}

impl Booking {
    /// A fresh, unpaid, pending one-off booking.
    pub fn new(
        id: Ulid,
        customer_id: Ulid,
        booking_date: NaiveDate,
        start_time: NaiveTime,
        end_time: NaiveTime,
        total_price: Price,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            customer_id,
            package_id: None,
            booking_date,
            start_time,
            end_time,
            status: BookingStatus::Pending,
            payment_status: PaymentStatus::Unpaid,
            payment_method: None,
            paid_at: None,
            payment_evidence: None,
            refund_reason: None,
            total_price,
            assignee: Assignee::Unassigned,
            area: None,
            frequency: None,
            is_recurring: false,
            recurring_group_id: None,
            recurring_sequence: None,
            recurring_total: None,
            recurring_pattern: None,
            created_at,
            archived_at: None,
        }
    }

    pub fn starts_at(&self) -> NaiveDateTime {
        self.booking_date.and_time(self.start_time)
    }

    pub fn is_archived(&self) -> bool {
        self.archived_at.is_some()
    }

    /// Group id of the recurring series this booking belongs to.
    /// A recurring booking without a group id is treated as standalone.
    pub fn series_id(&self) -> Option<Ulid> {
        if self.is_recurring {
            self.recurring_group_id
        } else {
            None
        }
    }
}

// ── Service catalog ──────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PricingKind {
    Fixed,
    Tiered,
}

impl fmt::Display for PricingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PricingKind::Fixed => f.write_str("fixed"),
            PricingKind::Tiered => f.write_str("tiered"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrequencyPrice {
    /// Visits per billing cycle (conventionally 1, 2, 4 or 8).
    pub frequency: u32,
    pub price: Price,
}

/// A priced area bracket. Both ends of `[area_min, area_max]` are inclusive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricingTier {
    pub area_min: f64,
    pub area_max: f64,
    pub required_staff: u32,
    pub estimated_hours: Option<f64>,
    /// Kept as a list rather than a map so malformed duplicate keys survive
    /// loading and can be reported.
    pub prices: Vec<FrequencyPrice>,
}

impl PricingTier {
    pub fn covers(&self, area: f64) -> bool {
        self.area_min <= area && area <= self.area_max
    }

    pub fn overlaps(&self, other: &PricingTier) -> bool {
        self.area_min <= other.area_max && other.area_min <= self.area_max
    }

    /// Exact-match frequency lookup. First entry wins on duplicate keys.
    pub fn price_for(&self, frequency: u32) -> Option<Price> {
        self.prices
            .iter()
            .find(|p| p.frequency == frequency)
            .map(|p| p.price)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PricingModel {
    Fixed {
        base_price: Price,
        duration_minutes: Option<u32>,
    },
    Tiered {
        tiers: Vec<PricingTier>,
    },
}

impl PricingModel {
    pub fn kind(&self) -> PricingKind {
        match self {
            PricingModel::Fixed { .. } => PricingKind::Fixed,
            PricingModel::Tiered { .. } => PricingKind::Tiered,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServicePackage {
    pub id: Ulid,
    pub name: String,
    pub service_type: String,
    pub model: PricingModel,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn time(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn tier(min: f64, max: f64, prices: &[(u32, Price)]) -> PricingTier {
        PricingTier {
            area_min: min,
            area_max: max,
            required_staff: 2,
            estimated_hours: Some(3.0),
            prices: prices
                .iter()
                .map(|&(frequency, price)| FrequencyPrice { frequency, price })
                .collect(),
        }
    }

    #[test]
    fn status_parse_accepts_common_spellings() {
        assert_eq!("in_progress".parse::<BookingStatus>().unwrap(), BookingStatus::InProgress);
        assert_eq!("In Progress".parse::<BookingStatus>().unwrap(), BookingStatus::InProgress);
        assert_eq!("no-show".parse::<BookingStatus>().unwrap(), BookingStatus::NoShow);
        assert!("archived".parse::<BookingStatus>().is_err());
    }

    #[test]
    fn payment_method_parse() {
        assert_eq!("card".parse::<PaymentMethod>().unwrap(), PaymentMethod::CreditCard);
        assert_eq!("PromptPay".parse::<PaymentMethod>().unwrap(), PaymentMethod::PromptPay);
        let err = "cheque".parse::<PaymentMethod>().unwrap_err();
        assert!(err.to_string().contains("payment method"));
    }

    #[test]
    fn tier_bounds_are_inclusive() {
        let t = tier(100.0, 199.0, &[(1, 1000)]);
        assert!(t.covers(100.0));
        assert!(t.covers(199.0));
        assert!(!t.covers(99.9));
        assert!(!t.covers(199.5));
    }

    #[test]
    fn tier_overlap() {
        let a = tier(0.0, 99.0, &[]);
        let b = tier(100.0, 199.0, &[]);
        let c = tier(99.0, 150.0, &[]);
        assert!(!a.overlaps(&b));
        assert!(a.overlaps(&c)); // shared endpoint counts
        assert!(b.overlaps(&c));
    }

    #[test]
    fn price_for_first_duplicate_wins() {
        let t = tier(0.0, 50.0, &[(1, 500), (4, 1800), (1, 700)]);
        assert_eq!(t.price_for(1), Some(500));
        assert_eq!(t.price_for(4), Some(1800));
        assert_eq!(t.price_for(2), None);
    }

    #[test]
    fn series_id_requires_recurring_flag() {
        let mut b = Booking::new(
            Ulid::new(),
            Ulid::new(),
            date(2026, 3, 1),
            time(9, 0),
            time(12, 0),
            1500,
            Utc::now(),
        );
        let gid = Ulid::new();
        b.recurring_group_id = Some(gid);
        assert_eq!(b.series_id(), None);
        b.is_recurring = true;
        assert_eq!(b.series_id(), Some(gid));
        b.recurring_group_id = None;
        assert_eq!(b.series_id(), None);
    }

    #[test]
    fn starts_at_combines_date_and_time() {
        let b = Booking::new(
            Ulid::new(),
            Ulid::new(),
            date(2026, 3, 1),
            time(9, 30),
            time(12, 0),
            0,
            Utc::now(),
        );
        assert_eq!(b.starts_at(), date(2026, 3, 1).and_time(time(9, 30)));
    }

    #[test]
    fn booking_bincode_roundtrip() {
        let mut b = Booking::new(
            Ulid::new(),
            Ulid::new(),
            date(2026, 3, 1),
            time(9, 0),
            time(12, 0),
            3200,
            Utc::now(),
        );
        b.assignee = Assignee::Team(Ulid::new());
        b.area = Some(150.0);
        b.frequency = Some(4);
        let bytes = bincode::serialize(&b).unwrap();
        let decoded: Booking = bincode::deserialize(&bytes).unwrap();
        assert_eq!(b, decoded);
    }
}
