//! Routing and delivery errors.
//!
//! None of these are fatal: the connection that produced a [`RouteError`]
//! stays open, and a [`DeliveryError`] only skips one recipient.

/// Why an inbound frame was not acted on.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum RouteError {
    /// Unparseable JSON or a required field is missing.
    #[error("malformed frame: {0}")]
    Decode(String),
    /// The frame arrived on a connection the router does not know (already closed).
    #[error("unknown connection: {0}")]
    UnknownConnection(String),
    /// Relay from an anonymous connection while logins are required.
    #[error("login required before relaying")]
    LoginRequired,
}

impl RouteError {
    /// Short classification string for logging/metrics.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::Decode(_) => "decode",
            Self::UnknownConnection(_) => "unknown_connection",
            Self::LoginRequired => "login_required",
        }
    }
}

impl From<serde_json::Error> for RouteError {
    fn from(e: serde_json::Error) -> Self {
        Self::Decode(e.to_string())
    }
}

/// Failure to hand one outbound frame to one session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
pub enum DeliveryError {
    /// The session's bounded outbound queue is full (slow client).
    #[error("send queue full")]
    QueueFull,
    /// The session's writer has gone away.
    #[error("session closed")]
    Closed,
}

impl DeliveryError {
    /// Short classification string for logging/metrics.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::QueueFull => "queue_full",
            Self::Closed => "closed",
        }
    }
}
