//! Protocol parse errors

use thiserror::Error;

/// Result type alias for protocol parsing
pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Errors raised while parsing protocol lines
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// The first line was not a well-formed `HELLO <username> <role>`
    #[error("Bad handshake: {0}")]
    BadHandshake(String),

    /// The verb is not part of the command table
    #[error("Unknown command: {0}")]
    UnknownCommand(String),

    /// The verb was recognised but its arguments are missing
    #[error("Missing argument, usage: {usage}")]
    MissingArgument {
        /// Usage text of the verb
        usage: &'static str,
    },

    /// Nothing but whitespace on the line
    #[error("Empty command line")]
    EmptyLine,
}
