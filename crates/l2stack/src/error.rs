use thiserror::Error;

/// Errors raised by the RLC-AM and PDCP entities.
///
/// Everything internal to a single `read_pdu`/`write_pdu` call is recovered locally
/// (no unwinding). `MaxRetxExceeded` and `ProtocolFailure`
/// are the only terminal kinds that surface to the upper layer as a single
/// notification; the rest are logged and the bearer continues.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum L2Error {
    /// Malformed header or truncated PDU. Dropped silently by the caller; callers
    /// should bump a metric counter rather than propagate further.
    #[error("parse error: {0}")]
    ParseError(String),

    /// MAC verification failed on receive.
    #[error("integrity verification failed")]
    IntegrityFailure,

    /// The byte-buffer arena is exhausted.
    #[error("buffer pool out of memory")]
    OutOfMemory,

    /// The SDU or retransmission queue is at capacity.
    #[error("queue full")]
    QueueFull,

    /// `retx_count` exceeded `max_retx_threshold` for some SN; terminal for the bearer.
    #[error("max retransmissions exceeded for sn {sn}")]
    MaxRetxExceeded { sn: u32 },

    /// A peer status PDU was inconsistent with local state (e.g. NACK outside the
    /// advertised ACK window).
    #[error("protocol failure: {0}")]
    ProtocolFailure(String),

    /// Returned synchronously from `configure()`.
    #[error("configuration error: {0}")]
    ConfigError(String),
}

impl L2Error {
    pub fn parse(msg: impl Into<String>) -> Self {
        L2Error::ParseError(msg.into())
    }

    pub fn protocol(msg: impl Into<String>) -> Self {
        L2Error::ProtocolFailure(msg.into())
    }
}
