//! Message layer between pose observers and the arm's actuation channel.
//!
//! This crate owns the wire protocol (newline-delimited JSON requests and
//! commands) and the [`Session`] that turns inbound messages into solved
//! poses. Transport stays outside: the host reads lines from wherever its
//! observer publishes and writes command lines to wherever the rig listens.

pub mod protocol;
pub mod session;

pub use protocol::{
    CommandParams, JointAngleMap, JointCommand, Keypoint, KeypointParams, KeypointSet, Request,
};
pub use session::Session;
