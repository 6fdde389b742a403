//! Wire layer for the worker/supervisor socket.
//!
//! - **protocol**: [`ProgressUpdate`](protocol::ProgressUpdate) and wire constants
//! - **codec**: progress line encoding and strict command line splitting
//! - **transport**: socket binding and socket file ownership

pub mod codec;
pub mod protocol;
pub mod transport;
