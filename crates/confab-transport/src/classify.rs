//! Mapping of transport-native failures into the client error taxonomy.
//!
//! Both transports route every native error through here before it crosses
//! the port boundary, so the session runtime only ever sees
//! [`ClientError`] values with a correct retryable hint. The substring
//! demotion rule ("cancel" → `Cancelled`, "deadline" → non-retryable
//! `Timeout`) is applied last, after the structural mapping.

use std::time::Duration;

use tokio_tungstenite::tungstenite;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tonic::Code;

use confab_core::ClientError;

/// Map a gRPC status into the taxonomy.
#[must_use]
pub fn classify_status(status: &tonic::Status) -> ClientError {
    let message = status.message().to_string();
    let err = match status.code() {
        Code::Cancelled => ClientError::Cancelled,
        Code::DeadlineExceeded => ClientError::Timeout {
            context: message,
            elapsed: Duration::ZERO,
            retryable: false,
        },
        Code::Unauthenticated | Code::PermissionDenied => ClientError::Auth(message),
        Code::InvalidArgument => ClientError::Config(message),
        Code::Unavailable | Code::Aborted | Code::ResourceExhausted | Code::Internal => {
            ClientError::server_retryable(format!("{}: {message}", status.code()))
        }
        _ => ClientError::server_fatal(format!("{}: {message}", status.code())),
    };
    err.demoted()
}

/// Map a WebSocket close code into the taxonomy.
///
/// `None` means the close was orderly and should surface as end-of-stream.
#[must_use]
pub fn classify_close_code(code: CloseCode, reason: &str) -> Option<ClientError> {
    let code_num = u16::from(code);
    let err = match code {
        CloseCode::Normal | CloseCode::Away => return None,
        CloseCode::Policy => ClientError::Auth(format!("closed by policy: {reason}")),
        // Server-side trouble: reconnectable.
        CloseCode::Error | CloseCode::Restart | CloseCode::Again | CloseCode::Abnormal => {
            ClientError::server_retryable(format!("connection closed ({code_num}): {reason}"))
        }
        CloseCode::Protocol | CloseCode::Unsupported | CloseCode::Invalid | CloseCode::Size => {
            ClientError::Protocol(format!("connection closed ({code_num}): {reason}"))
        }
        // Private-use codes (4000-4999) are vendor policy rejections,
        // e.g. 4001 for a revoked or over-quota key.
        _ if (4000..=4999).contains(&code_num) => {
            ClientError::Auth(format!("closed by policy ({code_num}): {reason}"))
        }
        _ => ClientError::server_fatal(format!("connection closed ({code_num}): {reason}")),
    };
    Some(err.demoted())
}

/// Map a tungstenite error into the taxonomy.
#[must_use]
pub fn classify_ws_error(err: &tungstenite::Error) -> ClientError {
    let mapped = match err {
        tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed => {
            ClientError::TransportClosed
        }
        // An abrupt socket drop is the classic idle-connection failure.
        tungstenite::Error::Io(io) => {
            ClientError::server_retryable(format!("socket error: {io}"))
        }
        tungstenite::Error::Protocol(p) => ClientError::Protocol(p.to_string()),
        tungstenite::Error::Capacity(c) => ClientError::Protocol(c.to_string()),
        tungstenite::Error::Tls(tls) => {
            ClientError::TransportInit(format!("TLS handshake failed: {tls}"))
        }
        tungstenite::Error::Url(u) => ClientError::Config(u.to_string()),
        tungstenite::Error::Http(response) => classify_http_status(
            response.status().as_u16(),
            "WebSocket handshake rejected",
        ),
        other => ClientError::TransportInit(other.to_string()),
    };
    mapped.demoted()
}

/// Map an HTTP status (handshake rejection) into the taxonomy.
#[must_use]
pub fn classify_http_status(status: u16, context: &str) -> ClientError {
    let err = match status {
        401 | 403 => ClientError::Auth(format!("{context}: HTTP {status}")),
        400 => ClientError::Config(format!("{context}: HTTP {status}")),
        500..=599 => ClientError::server_retryable(format!("{context}: HTTP {status}")),
        _ => ClientError::server_fatal(format!("{context}: HTTP {status}")),
    };
    err.demoted()
}

#[cfg(test)]
mod tests {
    use super::*;
    use confab_core::ErrorKind;

    #[test]
    fn unavailable_is_retryable() {
        let err = classify_status(&tonic::Status::unavailable("try again"));
        assert!(err.is_retryable());
    }

    #[test]
    fn unauthenticated_maps_to_auth() {
        let err = classify_status(&tonic::Status::unauthenticated("no key"));
        assert_eq!(err.kind(), ErrorKind::Auth);
        assert!(!err.is_retryable());
    }

    #[test]
    fn invalid_argument_maps_to_config() {
        let err = classify_status(&tonic::Status::invalid_argument("bad schema"));
        assert_eq!(err.kind(), ErrorKind::Config);
    }

    #[test]
    fn cancelled_status_is_never_retryable() {
        let err = classify_status(&tonic::Status::cancelled("caller went away"));
        assert_eq!(err.kind(), ErrorKind::Cancelled);
        assert!(!err.is_retryable());
    }

    #[test]
    fn nested_cancel_message_demotes() {
        let err = classify_status(&tonic::Status::unavailable("stream canceled upstream"));
        assert_eq!(err.kind(), ErrorKind::Cancelled);
    }

    #[test]
    fn orderly_close_codes_are_end_of_stream() {
        assert!(classify_close_code(CloseCode::Normal, "").is_none());
        assert!(classify_close_code(CloseCode::Away, "").is_none());
    }

    #[test]
    fn server_restart_close_is_retryable() {
        let err = classify_close_code(CloseCode::Restart, "maintenance").unwrap();
        assert!(err.is_retryable());
    }

    #[test]
    fn policy_close_maps_to_auth() {
        let err = classify_close_code(CloseCode::Policy, "key revoked").unwrap();
        assert_eq!(err.kind(), ErrorKind::Auth);
    }

    #[test]
    fn private_use_close_codes_map_to_auth() {
        let err = classify_close_code(CloseCode::from(4001), "quota exceeded").unwrap();
        assert_eq!(err.kind(), ErrorKind::Auth);
        assert!(!err.is_retryable());

        let err = classify_close_code(CloseCode::from(4999), "").unwrap();
        assert_eq!(err.kind(), ErrorKind::Auth);
    }

    #[test]
    fn http_5xx_is_retryable_4xx_is_not() {
        assert!(classify_http_status(503, "handshake").is_retryable());
        assert!(!classify_http_status(404, "handshake").is_retryable());
        assert_eq!(
            classify_http_status(401, "handshake").kind(),
            ErrorKind::Auth
        );
    }
}
