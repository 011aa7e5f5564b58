//! Wire types for the drover driver protocol.
//!
//! This crate holds everything that crosses the byte stream to the driver
//! subprocess, with no async machinery attached:
//!
//! - [`message`] - Request/Response/Event envelopes and their serde forms
//! - [`casing`] - snake_case <-> camelCase key translation applied at the
//!   transport boundary
//! - [`remote_value`] - the tagged encoding for values passed into and out of
//!   evaluated driver expressions
//!
//! The runtime crate (`drover-runtime`) owns the transport and connection
//! layers that move these types around.

pub mod casing;
pub mod message;
pub mod remote_value;

pub use message::{
    ErrorPayload, ErrorWrapper, Event, Location, Message, Metadata, Request, Response,
};
pub use remote_value::{ValueError, WireValue, parse_value, parse_wire, serialize_value};
