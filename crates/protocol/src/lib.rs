//! # nbexec Protocol Library
//!
//! This crate defines how the nbexec host talks to its interpreter backend.
//!
//! ## Overview
//!
//! A backend is an interpreter process running the embedded driver
//! program. The host writes requests to the child's stdin and reads events
//! from its stdout:
//!
//! - **Message Definitions**: [`Request`] and [`Event`] types
//! - **Line Codec**: newline-delimited JSON framing with a size limit
//! - **Driver**: the Python program that executes cells on the other side
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   execute / shutdown    ┌──────────────────────┐
//! │              │ ──────────────────────▶ │                      │
//! │     Host     │        (stdin)          │   Interpreter with   │
//! │   (nbexec)   │                         │   kernel_driver.py   │
//! │              │ ◀────────────────────── │                      │
//! └──────────────┘  ready / stream / ...   └──────────────────────┘
//!                        (stdout)
//! ```
//!
//! ## Example Usage
//!
//! ```rust
//! use protocol::{Event, LineCodec, Request};
//!
//! let codec = LineCodec::new();
//! let line = codec.encode(&Request::execute("msg-1", "print('hi')")).unwrap();
//! assert_eq!(line.last(), Some(&b'\n'));
//!
//! let event: Event = codec
//!     .decode(br#"{"type":"execute_reply","parent":"msg-1","status":"ok","execution_count":1}"#)
//!     .unwrap();
//! assert!(event.is_completion());
//! ```
//!
//! ## Modules
//!
//! - [`messages`]: Protocol message definitions
//! - [`codec`]: Line codec
//! - [`driver`]: Embedded interpreter driver
//! - [`error`]: Error types

pub mod codec;
pub mod driver;
pub mod error;
pub mod messages;

pub use codec::{LineCodec, LINE_DELIMITER, MAX_LINE_SIZE};
pub use driver::{driver_args, DRIVER_SOURCE};
pub use error::{ProtocolError, Result};
pub use messages::{
    DisplayData, ErrorReport, Event, ExecuteReply, ExecuteRequest, ExecuteResult, MimeBundle,
    Ready, ReplyStatus, Request, Stream, StreamName, MIME_IMAGE_PNG, MIME_TEXT_HTML,
    MIME_TEXT_PLAIN, PROTOCOL_VERSION,
};
