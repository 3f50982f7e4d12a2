//! hopper-protocol: Wire framing for the hopper state server
//!
//! Every message exchanged over the server socket is a single UTF-8 JSON
//! object terminated by a newline. This crate provides the tokio codec that
//! splits a byte stream into such frames and serializes outbound values.

pub mod codec;
pub mod error;
pub mod frame;

pub use codec::JsonLinesCodec;
pub use error::ProtocolError;
pub use frame::{Frame, MAX_FRAME_SIZE};
