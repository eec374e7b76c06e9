//! Line protocol: handshake, command table and reply formats

use crate::error::{ProtocolError, Result};
use crate::role::{Access, Role};

/// Terminates the body streamed back by `/read`
pub const READ_SENTINEL: &str = "<<EOF>>";

/// Sent to connections refused because the server is at capacity
pub const BUSY_REPLY: &str = "BUSY:Server at capacity. Try later.";

/// Sent to a session right before it is dropped for inactivity
pub const TIMEOUT_NOTICE: &str = "TIMEOUT:No activity, disconnecting.";

/// Reply to a successful `/upload`
pub const OK_UPLOADED: &str = "OK:Uploaded";
/// Reply to a successful `/delete`
pub const OK_DELETED: &str = "OK:Deleted";
/// Prefix of every failure reply
pub const ERR_PREFIX: &str = "ERR:";
/// Prefix of the `/search` reply
pub const SEARCH_PREFIX: &str = "SEARCHRESULT:";
/// Prefix of the `/info` reply
pub const INFO_PREFIX: &str = "INFO:";
/// Prefix of the `/stats` reply
pub const STATS_PREFIX: &str = "STATS:";
/// Prefix of the capacity rejection line
pub const BUSY_PREFIX: &str = "BUSY:";
/// Prefix of the idle disconnect notice
pub const TIMEOUT_PREFIX: &str = "TIMEOUT:";

/// Separator used by `/list`, `/search` and `/stats` replies
pub const LIST_SEPARATOR: char = '|';

const HELLO: &str = "HELLO";

/// Command verbs understood by the dispatcher
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verb {
    /// `/list`
    List,
    /// `/read`
    Read,
    /// `/upload`
    Upload,
    /// `/download`
    Download,
    /// `/delete`
    Delete,
    /// `/search`
    Search,
    /// `/info`
    Info,
    /// `/stats`
    Stats,
}

struct CommandEntry {
    verb: Verb,
    keyword: &'static str,
    access: Access,
    usage: &'static str,
}

/// Permission matrix: every verb and the access level it requires.
///
/// This table is the only place role requirements are declared.
const COMMAND_TABLE: [CommandEntry; 8] = [
    CommandEntry {
        verb: Verb::List,
        keyword: "/list",
        access: Access::Any,
        usage: "/list",
    },
    CommandEntry {
        verb: Verb::Read,
        keyword: "/read",
        access: Access::Any,
        usage: "/read <name>",
    },
    CommandEntry {
        verb: Verb::Upload,
        keyword: "/upload",
        access: Access::Any,
        usage: "/upload <name> <base64>",
    },
    CommandEntry {
        verb: Verb::Download,
        keyword: "/download",
        access: Access::Administrator,
        usage: "/download <name>",
    },
    CommandEntry {
        verb: Verb::Delete,
        keyword: "/delete",
        access: Access::Administrator,
        usage: "/delete <name>",
    },
    CommandEntry {
        verb: Verb::Search,
        keyword: "/search",
        access: Access::Administrator,
        usage: "/search <keyword>",
    },
    CommandEntry {
        verb: Verb::Info,
        keyword: "/info",
        access: Access::Administrator,
        usage: "/info <name>",
    },
    CommandEntry {
        verb: Verb::Stats,
        keyword: "/stats",
        access: Access::Administrator,
        usage: "/stats",
    },
];

impl Verb {
    /// All verbs, in command table order
    pub const ALL: [Verb; 8] = [
        Verb::List,
        Verb::Read,
        Verb::Upload,
        Verb::Download,
        Verb::Delete,
        Verb::Search,
        Verb::Info,
        Verb::Stats,
    ];

    fn entry(self) -> &'static CommandEntry {
        // Every variant has exactly one row, enforced by test_command_table_complete
        let index = COMMAND_TABLE.iter().position(|e| e.verb == self).unwrap_or(0);
        &COMMAND_TABLE[index]
    }

    /// Look up a verb by its keyword, ignoring ASCII case
    pub fn from_keyword(token: &str) -> Option<Self> {
        COMMAND_TABLE
            .iter()
            .find(|e| e.keyword.eq_ignore_ascii_case(token))
            .map(|e| e.verb)
    }

    /// Canonical lower-case keyword, e.g. `/list`
    pub fn keyword(self) -> &'static str {
        self.entry().keyword
    }

    /// Access level a session needs to run this verb
    pub fn required_access(self) -> Access {
        self.entry().access
    }

    /// Usage text quoted in `ERR:Usage:` replies
    pub fn usage(self) -> &'static str {
        self.entry().usage
    }

    /// Split a raw command line into its verb and the untouched argument text.
    ///
    /// # Errors
    ///
    /// [`ProtocolError::EmptyLine`] for blank lines and
    /// [`ProtocolError::UnknownCommand`] when the first token is not a verb.
    pub fn split(line: &str) -> Result<(Self, &str)> {
        let line = line.trim();
        if line.is_empty() {
            return Err(ProtocolError::EmptyLine);
        }

        let (token, rest) = match line.split_once(char::is_whitespace) {
            Some((token, rest)) => (token, rest),
            None => (line, ""),
        };

        Self::from_keyword(token)
            .map(|verb| (verb, rest))
            .ok_or_else(|| ProtocolError::UnknownCommand(token.to_string()))
    }
}

/// A fully parsed command line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    /// Names of all stored files
    List,
    /// Stream a file line by line
    Read {
        /// File to read
        name: String,
    },
    /// Store a file, replacing any existing one
    Upload {
        /// Target file name
        name: String,
        /// Base64 encoded content
        payload: String,
    },
    /// Fetch a file as base64
    Download {
        /// File to fetch
        name: String,
    },
    /// Remove a file
    Delete {
        /// File to remove
        name: String,
    },
    /// Case-insensitive substring match on file names
    Search {
        /// Substring to look for
        keyword: String,
    },
    /// Size and timestamps of a file
    Info {
        /// File to describe
        name: String,
    },
    /// Server traffic statistics
    Stats,
}

impl Request {
    /// Parse a complete command line
    pub fn parse(line: &str) -> Result<Self> {
        let (verb, args) = Verb::split(line)?;
        Self::from_parts(verb, args)
    }

    /// Parse the arguments of an already recognised verb
    pub fn from_parts(verb: Verb, args: &str) -> Result<Self> {
        let args = args.trim();
        let missing = || ProtocolError::MissingArgument {
            usage: verb.usage(),
        };
        let single = || {
            if args.is_empty() {
                Err(missing())
            } else {
                Ok(args.to_string())
            }
        };

        let request = match verb {
            Verb::List => Request::List,
            Verb::Stats => Request::Stats,
            Verb::Read => Request::Read { name: single()? },
            Verb::Download => Request::Download { name: single()? },
            Verb::Delete => Request::Delete { name: single()? },
            Verb::Info => Request::Info { name: single()? },
            Verb::Search => Request::Search { keyword: single()? },
            Verb::Upload => {
                let (name, payload) = args.split_once(char::is_whitespace).ok_or_else(missing)?;
                let payload = payload.trim();
                if payload.is_empty() {
                    return Err(missing());
                }
                Request::Upload {
                    name: name.to_string(),
                    payload: payload.to_string(),
                }
            }
        };

        Ok(request)
    }

    /// Verb this request was parsed from
    pub fn verb(&self) -> Verb {
        match self {
            Request::List => Verb::List,
            Request::Read { .. } => Verb::Read,
            Request::Upload { .. } => Verb::Upload,
            Request::Download { .. } => Verb::Download,
            Request::Delete { .. } => Verb::Delete,
            Request::Search { .. } => Verb::Search,
            Request::Info { .. } => Verb::Info,
            Request::Stats => Verb::Stats,
        }
    }

    /// Render the request as a protocol line (without the newline)
    pub fn to_line(&self) -> String {
        let keyword = self.verb().keyword();
        match self {
            Request::List | Request::Stats => keyword.to_string(),
            Request::Read { name }
            | Request::Download { name }
            | Request::Delete { name }
            | Request::Info { name } => format!("{keyword} {name}"),
            Request::Search { keyword: term } => format!("{keyword} {term}"),
            Request::Upload { name, payload } => format!("{keyword} {name} {payload}"),
        }
    }
}

/// The opening `HELLO <username> <role>` line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handshake {
    /// Name the client announced
    pub username: String,
    /// Declared role; unknown tokens map to read-only
    pub role: Role,
}

impl Handshake {
    /// Handshake for `username` with `role`
    pub fn new(username: impl Into<String>, role: Role) -> Self {
        Self {
            username: username.into(),
            role,
        }
    }

    /// Parse a handshake line.
    ///
    /// Exactly three whitespace separated tokens are accepted: the literal
    /// `HELLO`, the username and the role token.
    pub fn parse(line: &str) -> Result<Self> {
        let mut tokens = line.split_whitespace();
        let bad = || ProtocolError::BadHandshake(line.chars().take(64).collect());

        if tokens.next() != Some(HELLO) {
            return Err(bad());
        }
        let username = tokens.next().ok_or_else(bad)?;
        let role = tokens.next().ok_or_else(bad)?;
        if tokens.next().is_some() {
            return Err(bad());
        }

        Ok(Self::new(username, Role::from_token(role)))
    }

    /// Render as the `HELLO` line a client sends
    pub fn to_line(&self) -> String {
        let token = match self.role {
            Role::Administrator => "admin",
            Role::ReadOnly => "readonly",
        };
        format!("{HELLO} {} {token}", self.username)
    }

    /// Reply sent once the handshake is accepted
    pub fn welcome_line(&self) -> String {
        format!("WELCOME {}. Role={}", self.username, self.role)
    }
}

/// `OK<TAB><name><TAB><base64>`
pub fn format_download(name: &str, encoded: &str) -> String {
    format!("OK\t{name}\t{encoded}")
}

/// Split a `/download` reply into file name and base64 payload
pub fn parse_download(line: &str) -> Option<(&str, &str)> {
    let mut parts = line.splitn(3, '\t');
    match (parts.next(), parts.next(), parts.next()) {
        (Some("OK"), Some(name), Some(encoded)) => Some((name, encoded)),
        _ => None,
    }
}

/// `INFO:Size=..;Created=..;Modified=..`
pub fn format_info(size: u64, created: &str, modified: &str) -> String {
    format!("{INFO_PREFIX}Size={size};Created={created};Modified={modified}")
}
