/// Error taxonomy shared across the session, transport, and message-fabric
/// layers. Transport-level failures surface as `OnClose(errorCode, sslCode)`
/// upcalls rather than as this type directly; this enum is for callers that
/// need to reason about *why* a session ended.
#[derive(Debug, thiserror::Error)]
pub enum ProNetError {
    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("authentication failed: {0}")]
    AuthFailed(AuthFailureReason),

    #[error("peer closed the connection")]
    PeerClosed,

    #[error("transport error (code {error_code}, ssl {ssl_code})")]
    TransportError { error_code: i32, ssl_code: i32 },

    #[error("timeout: {0}")]
    Timeout(TimeoutKind),

    #[error("send queue over redline")]
    Backpressure,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum AuthFailureReason {
    #[error("wrong password")]
    WrongPassword,
    #[error("ip binding mismatch")]
    IpMismatch,
    #[error("too many instances for this user")]
    TooManyInstances,
    #[error("requested user id out of the static range")]
    InvalidId,
    #[error("internal error evaluating credentials")]
    Internal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum TimeoutKind {
    #[error("handshake did not complete in time")]
    Handshake,
    #[error("no heartbeat observed within the liveness window")]
    Heartbeat,
}
