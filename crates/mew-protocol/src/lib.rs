// SPDX-License-Identifier: MIT OR Apache-2.0
//! mew-protocol
#![deny(unsafe_code)]
#![warn(missing_docs)]
//!
//! Wire format handling for the MEW gateway: one JSON envelope per
//! WebSocket text frame, except stream data frames (`#<stream_id>#<bytes>`),
//! which bypass JSON entirely.

pub mod codec;
pub mod frame;
pub mod validate;

pub use codec::{DecodeError, Inbound, decode_text, encode};
pub use frame::StreamFrame;
pub use validate::{ValidateError, check_size, validate_inbound};
