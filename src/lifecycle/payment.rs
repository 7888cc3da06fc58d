use chrono::{DateTime, Utc};
use ulid::Ulid;

use crate::model::{Booking, PaymentMethod, PaymentStatus};
use crate::store::PaymentFields;

use super::TransitionError;

/// Payment bookkeeping events. Each is legal from exactly one status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentEvent {
    /// Customer uploaded a transfer slip: Unpaid → PendingVerification.
    SubmitEvidence { artifact: String },
    /// Paid at the counter or confirmed out of band: Unpaid → Paid.
    MarkPaid { method: PaymentMethod },
    /// Staff checked the slip: PendingVerification → Paid.
    Verify,
    /// Paid → RefundPending.
    RequestRefund { reason: String },
    /// RefundPending → Refunded.
    CompleteRefund,
    /// RefundPending → Paid.
    CancelRefund,
}

impl PaymentEvent {
    pub fn name(&self) -> &'static str {
        match self {
            PaymentEvent::SubmitEvidence { .. } => "submit payment evidence",
            PaymentEvent::MarkPaid { .. } => "mark as paid",
            PaymentEvent::Verify => "verify payment",
            PaymentEvent::RequestRefund { .. } => "request a refund",
            PaymentEvent::CompleteRefund => "complete the refund",
            PaymentEvent::CancelRefund => "cancel the refund",
        }
    }

    fn edge(&self) -> (PaymentStatus, PaymentStatus) {
        use PaymentStatus::*;
        match self {
            PaymentEvent::SubmitEvidence { .. } => (Unpaid, PendingVerification),
            PaymentEvent::MarkPaid { .. } => (Unpaid, Paid),
            PaymentEvent::Verify => (PendingVerification, Paid),
            PaymentEvent::RequestRefund { .. } => (Paid, RefundPending),
            PaymentEvent::CompleteRefund => (RefundPending, Refunded),
            PaymentEvent::CancelRefund => (RefundPending, Paid),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentChange {
    pub booking_id: Ulid,
    pub from: PaymentStatus,
    pub to: PaymentStatus,
    pub fields: PaymentFields,
    pub description: String,
}

pub fn plan_payment(
    booking: &Booking,
    event: &PaymentEvent,
    now: DateTime<Utc>,
) -> Result<PaymentChange, TransitionError> {
    let (from, to) = event.edge();
    let current = booking.payment_status;
    if current != from {
        return Err(TransitionError::IllegalPayment {
            booking_id: booking.id,
            current,
            event: event.name(),
        });
    }

    let mut fields = PaymentFields::default();
    let description = match event {
        PaymentEvent::SubmitEvidence { artifact } => {
            fields.payment_evidence = Some(artifact.clone());
            "Payment slip submitted, awaiting verification".to_string()
        }
        PaymentEvent::MarkPaid { method } => {
            fields.payment_method = Some(*method);
            fields.paid_at = Some(now);
            format!("Record payment of {} by {method}", booking.total_price)
        }
        PaymentEvent::Verify => {
            if booking.payment_evidence.is_none() {
                return Err(TransitionError::MissingEvidence(booking.id));
            }
            fields.paid_at = Some(now);
            "Verify submitted payment slip and mark as paid".to_string()
        }
        PaymentEvent::RequestRefund { reason } => {
            fields.refund_reason = Some(reason.clone());
            format!("Request refund of {}: {reason}", booking.total_price)
        }
        PaymentEvent::CompleteRefund => format!("Mark {} as refunded", booking.total_price),
        PaymentEvent::CancelRefund => "Withdraw refund request; payment stays".to_string(),
    };

    Ok(PaymentChange {
        booking_id: booking.id,
        from,
        to,
        fields,
        description,
    })
}
