//! Filedock client
//!
//! Thin async wrapper over the line protocol. One request is in flight at a
//! time; every reply read is bounded by the client's reply timeout.

use crate::{Error, Result};
use base64::{Engine as _, engine::general_purpose::STANDARD};
use filedock_core::protocol::{
    BUSY_PREFIX, ERR_PREFIX, LIST_SEPARATOR, OK_DELETED, OK_UPLOADED, SEARCH_PREFIX, STATS_PREFIX,
    TIMEOUT_PREFIX,
};
use filedock_core::{Handshake, READ_SENTINEL, Request, Role, parse_download};
use futures::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio_util::codec::{Framed, LinesCodec, LinesCodecError};
use tracing::{debug, info};

const DEFAULT_REPLY_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_REPLY_LENGTH: usize = 64 * 1024 * 1024;

/// Filedock client connection
#[derive(Debug)]
pub struct Client {
    lines: Framed<TcpStream, LinesCodec>,
    welcome: String,
    reply_timeout: Duration,
}

impl Client {
    /// Connect and perform the `HELLO` handshake
    pub async fn connect(addr: impl ToSocketAddrs, username: &str, role: Role) -> Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        let peer = stream.peer_addr()?;
        let mut client = Self {
            lines: Framed::new(stream, LinesCodec::new_with_max_length(MAX_REPLY_LENGTH)),
            welcome: String::new(),
            reply_timeout: DEFAULT_REPLY_TIMEOUT,
        };

        let handshake = Handshake::new(username, role);
        client.send(&handshake.to_line()).await?;

        let welcome = client.next_line().await?;
        if welcome.starts_with(BUSY_PREFIX) {
            return Err(Error::connection(welcome));
        }
        if !welcome.starts_with("WELCOME ") {
            return Err(Error::UnexpectedReply(welcome));
        }

        info!(server = %peer, username, role = %role, "Connected to Filedock server");
        client.welcome = welcome;
        Ok(client)
    }

    /// Bound every reply read by `timeout`
    pub fn with_reply_timeout(mut self, timeout: Duration) -> Self {
        self.reply_timeout = timeout;
        self
    }

    /// The `WELCOME` line received at connect time
    pub fn welcome(&self) -> &str {
        &self.welcome
    }

    /// Names of every stored file
    pub async fn list(&mut self) -> Result<Vec<String>> {
        let reply = self.call(&Request::List).await?;
        Ok(split_names(&reply))
    }

    /// Text lines of a stored file
    pub async fn read(&mut self, name: &str) -> Result<Vec<String>> {
        let request = Request::Read {
            name: name.to_string(),
        };
        self.send(&request.to_line()).await?;

        let first = self.next_line().await?;
        if let Some(message) = first.strip_prefix(ERR_PREFIX) {
            return Err(Error::Remote(message.to_string()));
        }

        let mut lines = Vec::new();
        let mut line = first;
        while line != READ_SENTINEL {
            lines.push(line);
            line = self.next_line().await?;
        }

        Ok(lines)
    }

    /// Store `bytes` under `name`, replacing any existing file
    pub async fn upload(&mut self, name: &str, bytes: &[u8]) -> Result<()> {
        let request = Request::Upload {
            name: name.to_string(),
            payload: STANDARD.encode(bytes),
        };
        let reply = self.call(&request).await?;
        expect(&reply, OK_UPLOADED)
    }

    /// Fetch the raw bytes of a stored file
    pub async fn download(&mut self, name: &str) -> Result<Vec<u8>> {
        let reply = self
            .call(&Request::Download {
                name: name.to_string(),
            })
            .await?;

        let (_, encoded) =
            parse_download(&reply).ok_or_else(|| Error::UnexpectedReply(reply.clone()))?;
        STANDARD
            .decode(encoded)
            .map_err(|e| Error::BadPayload(e.to_string()))
    }

    /// Delete a file (administrator only)
    pub async fn delete(&mut self, name: &str) -> Result<()> {
        let reply = self
            .call(&Request::Delete {
                name: name.to_string(),
            })
            .await?;
        expect(&reply, OK_DELETED)
    }

    /// Names containing `keyword`, case-insensitively
    pub async fn search(&mut self, keyword: &str) -> Result<Vec<String>> {
        let reply = self
            .call(&Request::Search {
                keyword: keyword.to_string(),
            })
            .await?;
        let names = reply
            .strip_prefix(SEARCH_PREFIX)
            .ok_or_else(|| Error::UnexpectedReply(reply.clone()))?;
        Ok(split_names(names))
    }

    /// The full `INFO:Size=..;Created=..;Modified=..` reply
    pub async fn info(&mut self, name: &str) -> Result<String> {
        self.call(&Request::Info {
            name: name.to_string(),
        })
        .await
    }

    /// Server statistics, without the `STATS:` prefix
    pub async fn stats(&mut self) -> Result<String> {
        let reply = self.call(&Request::Stats).await?;
        reply
            .strip_prefix(STATS_PREFIX)
            .map(str::to_string)
            .ok_or(Error::UnexpectedReply(reply))
    }

    /// Send a raw line and return the first reply line untouched
    pub async fn request(&mut self, line: &str) -> Result<String> {
        self.send(line).await?;
        self.next_line().await
    }

    /// Close the connection
    pub async fn close(mut self) -> Result<()> {
        debug!("Closing connection");
        SinkExt::<&str>::close(&mut self.lines)
            .await
            .map_err(codec_error)
    }

    /// Send a request and read its single reply, mapping `ERR:` to an error
    async fn call(&mut self, request: &Request) -> Result<String> {
        self.send(&request.to_line()).await?;
        let reply = self.next_line().await?;

        match reply.strip_prefix(ERR_PREFIX) {
            Some(message) => Err(Error::Remote(message.to_string())),
            None => Ok(reply),
        }
    }

    async fn send(&mut self, line: &str) -> Result<()> {
        self.lines.send(line).await.map_err(codec_error)
    }

    async fn next_line(&mut self) -> Result<String> {
        let frame = tokio::time::timeout(self.reply_timeout, self.lines.next())
            .await
            .map_err(|_| Error::timeout("waiting for server reply"))?;

        match frame {
            Some(Ok(line)) if line.starts_with(TIMEOUT_PREFIX) => Err(Error::connection(line)),
            Some(Ok(line)) => Ok(line),
            Some(Err(e)) => Err(codec_error(e)),
            None => Err(Error::connection("server closed the connection")),
        }
    }
}

fn split_names(joined: &str) -> Vec<String> {
    if joined.is_empty() {
        return Vec::new();
    }
    joined.split(LIST_SEPARATOR).map(str::to_string).collect()
}

fn expect(reply: &str, wanted: &str) -> Result<()> {
    if reply == wanted {
        Ok(())
    } else {
        Err(Error::UnexpectedReply(reply.to_string()))
    }
}

fn codec_error(e: LinesCodecError) -> Error {
    match e {
        LinesCodecError::Io(e) => Error::Io(e),
        other => Error::connection(other.to_string()),
    }
}
