mod payment;
mod removal;
mod status;

pub use payment::{PaymentChange, PaymentEvent, plan_payment};
pub use removal::{Authority, Removal, RemovalKind, plan_removal};
pub use status::{StatusChange, TransitionTable, plan_status_change};

use ulid::Ulid;

use crate::model::{BookingStatus, PaymentStatus};

/// A rejected lifecycle operation. Nothing is persisted when one of these is
/// returned; the message is meant to be shown to the operator as is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionError {
    IllegalStatus {
        booking_id: Ulid,
        current: BookingStatus,
        requested: BookingStatus,
    },
    IllegalPayment {
        booking_id: Ulid,
        current: PaymentStatus,
        event: &'static str,
    },
    MissingEvidence(Ulid),
    NotPermitted {
        booking_id: Ulid,
        operation: &'static str,
    },
}

impl std::fmt::Display for TransitionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransitionError::IllegalStatus {
                booking_id,
                current,
                requested,
            } => write!(
                f,
                "booking {booking_id} cannot move from {current} to {requested}"
            ),
            TransitionError::IllegalPayment {
                booking_id,
                current,
                event,
            } => write!(
                f,
                "cannot {event} for booking {booking_id}: payment is {current}"
            ),
            TransitionError::MissingEvidence(id) => {
                write!(f, "booking {id} has no submitted payment slip to verify")
            }
            TransitionError::NotPermitted {
                booking_id,
                operation,
            } => write!(f, "{operation} of booking {booking_id} requires elevated rights"),
        }
    }
}

impl std::error::Error for TransitionError {}
