//! HTTP emulation layer.
//!
//! Maps stateless HTTP request/response interactions onto the push-based
//! channel model:
//!
//! ```text
//! HTTP client          HttpTransportListener            Hosting server
//!     |                        |                              |
//!     |-- POST /messages/ ---->| get-or-create transport      |
//!     |   (Basic auth)         |--- accept_transport() ------>| ServerChannel::establish
//!     |                        |    input queue  ===========> | receive_message
//!     |                        | <== output queue ========    | send_notification
//!     |<-- 201 Created --------| output pump correlates by id |
//! ```
//!
//! Each authenticated `(name, password)` pair maps to one cached
//! [`ServerHttpTransport`]; the hosting server establishes a regular LIME
//! session over it. Requests that await an asynchronous outcome (a
//! notification or a command response) register the envelope id in a
//! pending-response map consulted by the output pump; unmatched envelopes
//! fall back to [`EnvelopeStorage`](crate::storage::EnvelopeStorage) for
//! later polling.

mod auth;
mod listener;
mod pump;
mod transport;

pub use auth::transport_key;
pub use listener::HttpTransportListener;
pub use transport::ServerHttpTransport;

use axum::http::StatusCode;

use crate::envelope::{Command, CommandStatus, Notification, NotificationEvent, Reason};

/// HTTP status for a reason code.
///
/// Ranges: 10-19 session errors and 30-39 authorization errors map to 401,
/// 20-29 validation errors map to 400, everything else to 403.
pub(crate) fn reason_to_status(reason: &Reason) -> StatusCode {
    match reason.code {
        20..=29 => StatusCode::BAD_REQUEST,
        10..=19 | 30..=39 => StatusCode::UNAUTHORIZED,
        _ => StatusCode::FORBIDDEN,
    }
}

/// HTTP status for a notification closing a pending response, or `None`
/// for intermediate events that keep it pending.
pub(crate) fn notification_status(notification: &Notification) -> Option<StatusCode> {
    match notification.event {
        NotificationEvent::Dispatched => Some(StatusCode::CREATED),
        NotificationEvent::Failed => Some(
            notification
                .reason
                .as_ref()
                .map(reason_to_status)
                .unwrap_or(StatusCode::FORBIDDEN),
        ),
        _ => None,
    }
}

/// HTTP status for a command response closing a pending response, or
/// `None` while the command is still pending.
pub(crate) fn command_status(command: &Command) -> Option<StatusCode> {
    match command.status {
        Some(CommandStatus::Success) => Some(StatusCode::CREATED),
        Some(CommandStatus::Failure) => Some(
            command
                .reason
                .as_ref()
                .map(reason_to_status)
                .unwrap_or(StatusCode::FORBIDDEN),
        ),
        Some(CommandStatus::Pending) | None => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_reason_code_ranges() {
        for code in 20..30 {
            assert_eq!(
                reason_to_status(&Reason::from_code(code)),
                StatusCode::BAD_REQUEST
            );
        }
        for code in (10..20).chain(30..40) {
            assert_eq!(
                reason_to_status(&Reason::from_code(code)),
                StatusCode::UNAUTHORIZED
            );
        }
        assert_eq!(
            reason_to_status(&Reason::from_code(1)),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            reason_to_status(&Reason::from_code(61)),
            StatusCode::FORBIDDEN
        );
    }

    #[test]
    fn test_notification_status_mapping() {
        let id = Uuid::new_v4();
        let dispatched = Notification::new(id, NotificationEvent::Dispatched);
        assert_eq!(notification_status(&dispatched), Some(StatusCode::CREATED));

        let failed = Notification::failed(id, Reason::from_code(25));
        assert_eq!(
            notification_status(&failed),
            Some(StatusCode::BAD_REQUEST)
        );

        for event in [
            NotificationEvent::Accepted,
            NotificationEvent::Validated,
            NotificationEvent::Authorized,
            NotificationEvent::Received,
            NotificationEvent::Consumed,
        ] {
            assert_eq!(notification_status(&Notification::new(id, event)), None);
        }
    }

    #[test]
    fn test_command_status_mapping() {
        let request = Command::ping();
        let success = request.success_response(None);
        assert_eq!(command_status(&success), Some(StatusCode::CREATED));

        let failure = request.failure_response(Reason::from_code(33));
        assert_eq!(command_status(&failure), Some(StatusCode::UNAUTHORIZED));

        let mut pending = request.success_response(None);
        pending.status = Some(CommandStatus::Pending);
        assert_eq!(command_status(&pending), None);
        assert_eq!(command_status(&request), None);
    }
}
