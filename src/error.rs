//! Error types shared by the link, codec and client layers.
//!
//! Every layer has its own error enum; [`ClientError`] is what the public
//! client API returns and wraps the lower layers through `#[from]`.

use thiserror::Error;

use crate::alert::Alert;

/// Failures of the byte-oriented duplex channel.
#[derive(Debug, Error)]
pub enum LinkError {
    /// A blocking read did not complete within the link timeout.
    #[error("link timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// The peer closed the channel or the device was removed.
    #[error("link disconnected")]
    Disconnected,

    /// An operation that needs an open link was called on a closed one.
    #[error("link not connected")]
    NotConnected,

    /// The link does not implement the requested operation (e.g. baud change on a socket).
    #[error("operation not supported by {0} link")]
    Unsupported(&'static str),

    /// Device specific failure (serial driver, permissions, ...).
    #[error("device error: {0}")]
    Device(String),

    #[error("link I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Register catalog, lookup and value codec errors.
#[derive(Debug, Error)]
pub enum RegisterError {
    #[error("unknown register: {0}")]
    Unknown(String),

    #[error("ambiguous register {key}: matches {candidates:?}")]
    Ambiguous {
        key: String,
        candidates: Vec<String>,
    },

    #[error("can't encode {value} for register {register}: {reason}")]
    Encode {
        register: String,
        value: String,
        reason: String,
    },

    #[error("can't decode register {register}: {reason}")]
    Decode { register: String, reason: String },

    #[error("register {0} is not writable")]
    NotWritable(String),

    #[error("register {0} is not readable")]
    NotReadable(String),

    /// The packaged register description could not be parsed.
    #[error("malformed register catalog: {0}")]
    Catalog(String),
}

/// Framing and message-level protocol errors.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("invalid frame ({0})")]
    InvalidFrame(&'static str),

    #[error("invalid frame and could not recover")]
    Unrecoverable,

    #[error("unknown packet type 0x{0:02X}")]
    UnknownPacket(u8),

    #[error("truncated packet: {0}")]
    Truncated(&'static str),

    #[error("unexpected packet: expected {expected}, got {got}")]
    UnexpectedPacket {
        expected: &'static str,
        got: String,
    },

    #[error("malformed json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("malformed response: {0}")]
    Malformed(String),

    #[error("unknown status {0:?}")]
    UnknownStatus(String),

    #[error("payload of {got} bytes does not fit {expected}")]
    PayloadSize { expected: String, got: usize },

    #[error("{what} of {len} bytes does not fit a 16-bit length field")]
    TooLong { what: &'static str, len: usize },
}

/// Errors surfaced by the client API.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Link(#[from] LinkError),

    #[error(transparent)]
    Register(#[from] RegisterError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Operation called in a state that violates its precondition.
    #[error("{0}")]
    State(&'static str),

    /// The server reported `status: error` or a status-register error bit.
    #[error("server error: {0}")]
    Server(String),

    /// The server answered with a status other than the expected one.
    #[error("unexpected response: expected status {expected}, got {got}")]
    UnexpectedResponse { expected: String, got: String },

    #[error("session ended")]
    SessionEnded,

    #[error("unsupported server version: {0}")]
    UnsupportedVersion(String),

    #[error("connected to {found} sensor, client is built for {expected}")]
    WrongGeneration {
        expected: &'static str,
        found: String,
    },

    #[error("mode {0} is not supported by the server")]
    UnsupportedMode(String),

    #[error("illegal config: {}", format_alerts(.0))]
    IllegalConfig(Vec<Alert>),

    #[error("invalid value for {param}: {reason}")]
    InvalidValue {
        param: &'static str,
        reason: String,
    },

    /// Generic client-side failure (handshake failed, worker gone, ...).
    #[error("{0}")]
    Client(String),
}

fn format_alerts(alerts: &[Alert]) -> String {
    alerts
        .iter()
        .map(|a| a.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::Severity;

    #[test]
    fn illegal_config_lists_every_alert() {
        let err = ClientError::IllegalConfig(vec![
            Alert::new(Severity::Error, Some("range_interval"), "start must be below end"),
            Alert::new(Severity::Error, None, "no sensors"),
        ]);
        let text = err.to_string();
        assert!(text.contains("start must be below end"));
        assert!(text.contains("no sensors"));
    }

    #[test]
    fn link_errors_convert_into_client_errors() {
        let err: ClientError = LinkError::Disconnected.into();
        assert!(matches!(err, ClientError::Link(LinkError::Disconnected)));
    }
}
