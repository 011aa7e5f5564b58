//! Drover runtime - driver lifecycle, transport, and connection.
//!
//! This crate provides the low-level plumbing for talking to an external
//! automation driver over a single duplex byte stream:
//!
//! - **Driver management**: locating and launching the driver executable
//! - **Transport**: length-prefixed JSON frames over the subprocess's stdio
//!   pipes, with key-case translation at the boundary
//! - **Connection**: handshake, request/response correlation, the
//!   guid-addressed initializer and subscriber registries, and event fan-out
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐
//! │   callers    │  Per-resource operation wrappers (not this crate)
//! └──────┬───────┘
//!        │ send / subscribe / initializer
//! ┌──────▼───────┐
//! │ drover-      │  This crate
//! │ runtime      │
//! │  ┌────────┐  │
//! │  │ Conn   │  │  Correlation, registries, event fan-out
//! │  └────────┘  │
//! │  ┌────────┐  │
//! │  │ Trans  │  │  Frame codec over stdio pipes
//! │  └────────┘  │
//! │  ┌────────┐  │
//! │  │ Driver │  │  Process management
//! │  └────────┘  │
//! └──────────────┘
//! ```
//!
//! Wire-level types and the tagged value codec live in `drover-protocol`.

pub mod connection;
pub mod driver;
pub mod error;
pub mod server;
pub mod transport;

// Re-export key types at crate root.
pub use connection::{Connection, DEFAULT_TIMEOUT, DriverLogger, ROOT_GUID};
pub use driver::find_driver_executable;
pub use drover_protocol::{
    ErrorPayload, ErrorWrapper, Event, Message, Metadata, Request, Response, WireValue,
    parse_value, parse_wire, serialize_value,
};
pub use error::{Error, Result};
pub use server::{DriverProcess, DriverSession};
pub use transport::{
    FrameDecoder, PipeTransport, PipeTransportReceiver, PipeTransportSender, Transport,
    TransportParts, TransportReceiver,
};
