//! # Filedock Core
//!
//! Protocol vocabulary shared by the Filedock server and client.
//!
//! The wire protocol is newline-terminated UTF-8 text over plain TCP:
//!
//! - `HELLO <username> <role>` opens a session
//! - one request line per command (`/list`, `/read`, `/upload`, ...)
//! - one reply line per request, except `/read` which streams lines up to
//!   the [`READ_SENTINEL`]

pub mod error;
pub mod protocol;
pub mod role;

pub use error::{ProtocolError, Result};
pub use protocol::{
    BUSY_REPLY, Handshake, READ_SENTINEL, Request, TIMEOUT_NOTICE, Verb, format_download,
    format_info, parse_download,
};
pub use role::{Access, Role};
