//! Shared wire types and plumbing for the GoExpose control protocol:
//! frame codec, proxy port pool, error taxonomy, config schema, TLS
//! material loading, the command-source contract and shutdown signal.

pub mod command;
pub mod config;
pub mod error;
pub mod portqueue;
pub mod protocol;
pub mod relay;
pub mod shutdown;
pub mod tls;

pub use command::CommandSource;
pub use error::GoExposeError;
pub use portqueue::PortQueue;
pub use protocol::{ControlFrame, FrameCodec, FrameType, ProtoError};
pub use relay::{relay, relay_pair};
