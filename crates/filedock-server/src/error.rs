//! Error types for Filedock server and client operations
//!
//! Every per-command failure is turned into exactly one protocol reply line
//! by [`Error::reply_line`]; only transport failures end a session.

use filedock_core::ProtocolError;
use thiserror::Error;

/// Result type alias for Filedock operations
pub type Result<T> = std::result::Result<T, Error>;

/// Filedock error types
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid or unreadable configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Malformed handshake or command line
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// File does not exist in the storage root
    #[error("File not found: {0}")]
    FileNotFound(String),

    /// The session's role does not allow the command
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// File name is empty or would escape the flat storage root
    #[error("Invalid file name: {0}")]
    InvalidName(String),

    /// Upload payload is not valid base64
    #[error("Bad payload: {0}")]
    BadPayload(String),

    /// Operation exceeded its time limit
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// Connection refused, closed or unusable
    #[error("Connection error: {0}")]
    Connection(String),

    /// The server answered with an `ERR:` line
    #[error("Server error: {0}")]
    Remote(String),

    /// The server answered with a line the client could not interpret
    #[error("Unexpected reply: {0}")]
    UnexpectedReply(String),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Protocol line sent back to the client for this error
    pub fn reply_line(&self) -> String {
        let message = match self {
            Error::FileNotFound(_) => "File not found".to_string(),
            Error::PermissionDenied(_) => "Permission denied".to_string(),
            Error::BadPayload(_) => "Bad base64 payload".to_string(),
            Error::InvalidName(_) => "Invalid file name".to_string(),
            Error::Protocol(ProtocolError::UnknownCommand(_) | ProtocolError::EmptyLine) => {
                "Unknown command".to_string()
            }
            Error::Protocol(ProtocolError::MissingArgument { usage }) => format!("Usage: {usage}"),
            _ => "Exception".to_string(),
        };
        format!("ERR:{message}")
    }

    /// Check if error was caused by client input rather than a server fault
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Error::Protocol(_)
                | Error::FileNotFound(_)
                | Error::PermissionDenied(_)
                | Error::InvalidName(_)
                | Error::BadPayload(_)
        )
    }

    /// Check if error means the peer is gone
    pub fn is_disconnect(&self) -> bool {
        match self {
            Error::Connection(_) => true,
            Error::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::BrokenPipe
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::NotConnected
                    | std::io::ErrorKind::UnexpectedEof
            ),
            _ => false,
        }
    }
}

// Additional error constructors and helpers
impl Error {
    /// Create timeout error with context
    pub fn timeout(context: impl Into<String>) -> Self {
        Error::Timeout(context.into())
    }

    /// Create connection error with context
    pub fn connection(context: impl Into<String>) -> Self {
        Error::Connection(context.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reply_lines() {
        assert_eq!(
            Error::FileNotFound("a.txt".into()).reply_line(),
            "ERR:File not found"
        );
        assert_eq!(
            Error::PermissionDenied("/delete".into()).reply_line(),
            "ERR:Permission denied"
        );
        assert_eq!(
            Error::BadPayload("invalid byte".into()).reply_line(),
            "ERR:Bad base64 payload"
        );
        assert_eq!(
            Error::Protocol(ProtocolError::UnknownCommand("/x".into())).reply_line(),
            "ERR:Unknown command"
        );
        assert_eq!(
            Error::Protocol(ProtocolError::MissingArgument {
                usage: "/read <name>"
            })
            .reply_line(),
            "ERR:Usage: /read <name>"
        );
    }

    #[test]
    fn test_unexpected_faults_are_generic() {
        let io = Error::Io(std::io::Error::other("disk on fire"));
        assert_eq!(io.reply_line(), "ERR:Exception");
        assert_eq!(Error::Other("boom".into()).reply_line(), "ERR:Exception");
        assert_eq!(Error::timeout("write").reply_line(), "ERR:Exception");
    }

    #[test]
    fn test_is_client_error() {
        assert!(Error::InvalidName("..".into()).is_client_error());
        assert!(Error::FileNotFound("x".into()).is_client_error());
        assert!(Error::Protocol(ProtocolError::EmptyLine).is_client_error());
        assert!(!Error::Other("x".into()).is_client_error());
        assert!(!Error::timeout("x").is_client_error());
    }

    #[test]
    fn test_is_disconnect() {
        assert!(Error::connection("closed").is_disconnect());
        assert!(Error::Io(std::io::ErrorKind::BrokenPipe.into()).is_disconnect());
        assert!(!Error::Io(std::io::ErrorKind::PermissionDenied.into()).is_disconnect());
    }
}
