mod paginate;

pub use paginate::{Page, paginate_by_weight};

use std::collections::HashMap;

use chrono::{DateTime, NaiveDateTime, Utc};
use ulid::Ulid;

use crate::model::*;

/// Per-status member counts for a recurring series.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusTally {
    pub pending: usize,
    pub confirmed: usize,
    pub in_progress: usize,
    pub completed: usize,
    pub cancelled: usize,
    pub no_show: usize,
    /// Still ahead of `now` and not completed, cancelled or a no-show.
    pub upcoming: usize,
}

impl StatusTally {
    fn record(&mut self, booking: &Booking, now: NaiveDateTime) {
        match booking.status {
            BookingStatus::Pending => self.pending += 1,
            BookingStatus::Confirmed => self.confirmed += 1,
            BookingStatus::InProgress => self.in_progress += 1,
            BookingStatus::Completed => self.completed += 1,
            BookingStatus::Cancelled => self.cancelled += 1,
            BookingStatus::NoShow => self.no_show += 1,
        }
        let closed = matches!(
            booking.status,
            BookingStatus::Completed | BookingStatus::Cancelled | BookingStatus::NoShow
        );
        if !closed && booking.starts_at() > now {
            self.upcoming += 1;
        }
    }

    pub fn total(&self) -> usize {
        self.pending + self.confirmed + self.in_progress + self.completed + self.cancelled + self.no_show
    }
}

/// A recurring series rebuilt from its member bookings.
#[derive(Debug, Clone, PartialEq)]
pub struct RecurringGroup {
    pub group_id: Ulid,
    /// Sorted by date, then start time.
    pub members: Vec<Booking>,
    pub tally: StatusTally,
    pub pattern: Option<RecurrencePattern>,
    /// Creation time of the earliest member.
    pub created_at: DateTime<Utc>,
}

impl RecurringGroup {
    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Grouped {
    /// In order of first appearance in the input.
    pub groups: Vec<RecurringGroup>,
    pub standalone: Vec<Booking>,
}

/// Split a snapshot into recurring series and standalone bookings.
///
/// A booking flagged recurring but missing its group id is standalone.
/// The input is never modified.
pub fn group_bookings(bookings: &[Booking], now: NaiveDateTime) -> Grouped {
    let mut index: HashMap<Ulid, usize> = HashMap::new();
    let mut buckets: Vec<(Ulid, Vec<Booking>)> = Vec::new();
    let mut standalone = Vec::new();

    for booking in bookings {
        match booking.series_id() {
            Some(gid) => {
                let slot = *index.entry(gid).or_insert_with(|| {
                    buckets.push((gid, Vec::new()));
                    buckets.len() - 1
                });
                buckets[slot].1.push(booking.clone());
            }
            None => standalone.push(booking.clone()),
        }
    }

    let groups = buckets
        .into_iter()
        .filter_map(|(group_id, mut members)| {
            members.sort_by(|a, b| {
                (a.booking_date, a.start_time, a.recurring_sequence, a.id).cmp(&(
                    b.booking_date,
                    b.start_time,
                    b.recurring_sequence,
                    b.id,
                ))
            });
            let first = members.first()?;
            let pattern = first.recurring_pattern;
            let created_at = first.created_at;
            let mut tally = StatusTally::default();
            for m in &members {
                tally.record(m, now);
            }
            Some(RecurringGroup {
                group_id,
                members,
                tally,
                pattern,
                created_at,
            })
        })
        .collect();

    Grouped { groups, standalone }
}

/// A row in the combined listing.
#[derive(Debug, Clone, PartialEq)]
pub enum DisplayUnit {
    Group(RecurringGroup),
    Single(Booking),
}

impl DisplayUnit {
    /// Number of underlying bookings.
    pub fn size(&self) -> usize {
        match self {
            DisplayUnit::Group(g) => g.len(),
            DisplayUnit::Single(_) => 1,
        }
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        match self {
            DisplayUnit::Group(g) => g.created_at,
            DisplayUnit::Single(b) => b.created_at,
        }
    }
}

pub type DisplayPage = Page<DisplayUnit>;

impl DisplayPage {
    pub fn booking_count(&self) -> usize {
        self.items.iter().map(DisplayUnit::size).sum()
    }
}

/// Merge groups and standalone bookings, newest first.
pub fn unify(grouped: Grouped) -> Vec<DisplayUnit> {
    let mut units: Vec<DisplayUnit> = grouped
        .groups
        .into_iter()
        .map(DisplayUnit::Group)
        .chain(grouped.standalone.into_iter().map(DisplayUnit::Single))
        .collect();
    // stable: ties keep groups ahead of singles, each in input order
    units.sort_by(|a, b| b.created_at().cmp(&a.created_at()));
    units
}

/// Group, order and cut one page out of a booking snapshot.
pub fn build_page(
    bookings: &[Booking],
    page: usize,
    page_size: usize,
    now: NaiveDateTime,
) -> DisplayPage {
    let units = unify(group_bookings(bookings, now));
    paginate_by_weight(&units, page, page_size, DisplayUnit::size)
}
