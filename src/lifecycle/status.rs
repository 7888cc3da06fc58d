use ulid::Ulid;

use crate::model::{Booking, BookingStatus};

use super::TransitionError;

use BookingStatus::*;

/// Strict graph: Completed, Cancelled and NoShow are terminal.
const STANDARD_EDGES: &[(BookingStatus, BookingStatus)] = &[
    (Pending, Confirmed),
    (Pending, Cancelled),
    (Pending, NoShow),
    (Confirmed, InProgress),
    (Confirmed, Cancelled),
    (Confirmed, NoShow),
    (InProgress, Completed),
    (InProgress, Cancelled),
];

const REOPEN_EDGES: &[(BookingStatus, BookingStatus)] = &[(Cancelled, Pending), (NoShow, Pending)];

/// The booking status graph, held as data. Self-transitions are always
/// allowed and treated as no-ops.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionTable {
    edges: Vec<(BookingStatus, BookingStatus)>,
}

impl Default for TransitionTable {
    fn default() -> Self {
        Self::standard()
    }
}

impl TransitionTable {
    pub fn standard() -> Self {
        Self {
            edges: STANDARD_EDGES.to_vec(),
        }
    }

    /// Standard graph plus Cancelled/NoShow → Pending.
    pub fn with_reopen() -> Self {
        let mut edges = STANDARD_EDGES.to_vec();
        edges.extend_from_slice(REOPEN_EDGES);
        Self { edges }
    }

    pub fn from_config(allow_reopen: bool) -> Self {
        if allow_reopen {
            Self::with_reopen()
        } else {
            Self::standard()
        }
    }

    pub fn allows(&self, from: BookingStatus, to: BookingStatus) -> bool {
        from == to || self.edges.contains(&(from, to))
    }

    /// Every status reachable in one step, including `from` itself.
    pub fn allowed_from(&self, from: BookingStatus) -> Vec<BookingStatus> {
        BookingStatus::ALL
            .into_iter()
            .filter(|&to| self.allows(from, to))
            .collect()
    }

    pub fn is_terminal(&self, status: BookingStatus) -> bool {
        self.allowed_from(status) == [status]
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusChange {
    /// Requested status equals the current one; nothing to write.
    Unchanged,
    Apply {
        booking_id: Ulid,
        from: BookingStatus,
        to: BookingStatus,
        description: String,
    },
}

pub fn plan_status_change(
    table: &TransitionTable,
    booking: &Booking,
    requested: BookingStatus,
) -> Result<StatusChange, TransitionError> {
    let current = booking.status;
    if current == requested {
        return Ok(StatusChange::Unchanged);
    }
    if !table.allows(current, requested) {
        return Err(TransitionError::IllegalStatus {
            booking_id: booking.id,
            current,
            requested,
        });
    }
    Ok(StatusChange::Apply {
        booking_id: booking.id,
        from: current,
        to: requested,
        description: describe(booking, current, requested),
    })
}

fn describe(booking: &Booking, from: BookingStatus, to: BookingStatus) -> String {
    let when = format!(
        "{} {}",
        booking.booking_date.format("%Y-%m-%d"),
        booking.start_time.format("%H:%M")
    );
    match to {
        Confirmed => format!("Confirm booking on {when} (was {from})"),
        InProgress => format!("Start the job booked for {when}"),
        Completed => format!("Mark the job on {when} as completed"),
        Cancelled => format!("Cancel booking on {when} (was {from})"),
        NoShow => format!("Record a no-show for {when}"),
        Pending => format!("Reopen booking on {when} as pending (was {from})"),
    }
}
