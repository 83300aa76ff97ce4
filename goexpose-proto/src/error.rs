/// Shared error taxonomy (spec §7): `Config`, `Bind`, `Protocol`,
/// `Transport`, `Policy`. Tasks convert these into a log line plus a
/// cancellation — they never unwind across a spawned task boundary.
use crate::protocol::ProtoError;
use std::io;

#[derive(Debug, thiserror::Error)]
pub enum GoExposeError {
    /// Missing/unreadable TLS material, malformed config paths. Fatal at startup.
    #[error("configuration error: {0}")]
    Config(String),

    /// A control or external port could not be bound.
    #[error("failed to bind {addr}: {source}")]
    Bind { addr: String, #[source] source: io::Error },

    /// Malformed frame, unexpected typ, payload shape mismatch.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtoError),

    /// Underlying socket error or EOF.
    #[error("transport error: {0}")]
    Transport(#[from] io::Error),

    /// Out-of-range port, duplicate exposure, exhausted proxy pool, IP mismatch.
    #[error("policy violation: {0}")]
    Policy(String),
}
