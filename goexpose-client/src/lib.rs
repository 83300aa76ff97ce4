//! Client-side building blocks: the control loop and the rendezvous
//! responder session. Split out of the binary so integration tests can
//! drive the control loop directly over loopback.

pub mod controller;
pub mod session;
