use ulid::Ulid;

use crate::model::Booking;

use super::TransitionError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemovalKind {
    /// Hidden from active views, kept for history and reporting.
    Archive,
    /// Gone for good.
    Delete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Authority {
    #[default]
    Operator,
    Privileged,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Removal {
    /// Archiving an already archived booking.
    Unchanged,
    Apply {
        booking_id: Ulid,
        kind: RemovalKind,
        description: String,
    },
}

/// Archive is open to every operator and leaves status and payment
/// untouched. Delete is irreversible and needs `Authority::Privileged`.
pub fn plan_removal(
    booking: &Booking,
    kind: RemovalKind,
    authority: Authority,
) -> Result<Removal, TransitionError> {
    let when = booking.booking_date.format("%Y-%m-%d");
    match kind {
        RemovalKind::Archive => {
            if booking.is_archived() {
                return Ok(Removal::Unchanged);
            }
            Ok(Removal::Apply {
                booking_id: booking.id,
                kind,
                description: format!(
                    "Archive booking on {when} ({}, {}); it stays available in history",
                    booking.status, booking.payment_status
                ),
            })
        }
        RemovalKind::Delete => {
            if authority != Authority::Privileged {
                return Err(TransitionError::NotPermitted {
                    booking_id: booking.id,
                    operation: "permanent deletion",
                });
            }
            Ok(Removal::Apply {
                booking_id: booking.id,
                kind,
                description: format!(
                    "Permanently delete booking on {when}; this cannot be undone"
                ),
            })
        }
    }
}
