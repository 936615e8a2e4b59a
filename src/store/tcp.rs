//! TCP store client
//!
//! Talks to a lease store served by [`crate::network::Server`].
//!
//! One connection per client, opened lazily and dropped after any transport
//! error so the next call reconnects. Calls are serialized on that connection.

use std::io::{BufReader, BufWriter, ErrorKind};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

use parking_lot::Mutex;

use crate::error::{Result, StoreError};
use crate::protocol::{read_response, write_command, Command, Response};

use super::StoreClient;

/// Buffered halves of an open connection
struct Link {
    reader: BufReader<TcpStream>,
    writer: BufWriter<TcpStream>,
}

/// Client for one remote lease store
pub struct TcpStore {
    /// Store id (defaults to the address)
    id: String,

    addr: String,

    /// Connect, read and write timeout
    timeout: Duration,

    link: Mutex<Option<Link>>,
}

impl TcpStore {
    /// Create a client for `addr`; no connection is made yet
    pub fn new(addr: impl Into<String>, timeout: Duration) -> Self {
        let addr = addr.into();
        Self {
            id: addr.clone(),
            addr,
            timeout,
            link: Mutex::new(None),
        }
    }

    /// Override the store id
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Remote address
    pub fn addr(&self) -> &str {
        &self.addr
    }

    fn resolve(&self) -> Result<SocketAddr> {
        self.addr
            .to_socket_addrs()
            .map_err(|e| StoreError::Unavailable(format!("cannot resolve {}: {}", self.addr, e)))?
            .next()
            .ok_or_else(|| StoreError::Unavailable(format!("no address for {}", self.addr)))
    }

    fn connect(&self) -> Result<Link> {
        let addr = self.resolve()?;
        let stream = TcpStream::connect_timeout(&addr, self.timeout).map_err(transport_error)?;

        // Disable Nagle's algorithm for low latency
        stream.set_nodelay(true)?;
        stream.set_read_timeout(Some(self.timeout))?;
        stream.set_write_timeout(Some(self.timeout))?;

        let read_stream = stream.try_clone()?;
        tracing::debug!(store = %self.id, addr = %self.addr, "connected");

        Ok(Link {
            reader: BufReader::new(read_stream),
            writer: BufWriter::new(stream),
        })
    }

    /// Send one command and wait for its response
    fn call(&self, command: Command) -> Result<Response> {
        let mut guard = self.link.lock();
        if guard.is_none() {
            *guard = Some(self.connect()?);
        }

        let result = match guard.as_mut() {
            Some(link) => write_command(&mut link.writer, &command)
                .and_then(|_| read_response(&mut link.reader)),
            None => Err(StoreError::Unavailable(format!("{} not connected", self.addr))),
        };

        match result {
            Ok(Response::Error(message)) => Err(StoreError::Rejected(message)),
            Ok(response) => Ok(response),
            Err(e) => {
                // The stream may be mid-frame; never reuse it
                *guard = None;
                tracing::warn!(store = %self.id, error = %e, "store call failed");
                Err(match e {
                    StoreError::Io(io) => transport_error(io),
                    other => other,
                })
            }
        }
    }

    fn expect_bool(&self, command: Command) -> Result<bool> {
        match self.call(command)? {
            Response::Bool(b) => Ok(b),
            other => Err(unexpected(other)),
        }
    }
}

fn transport_error(err: std::io::Error) -> StoreError {
    match err.kind() {
        ErrorKind::WouldBlock | ErrorKind::TimedOut => StoreError::Timeout,
        _ => StoreError::Unavailable(err.to_string()),
    }
}

fn unexpected(response: Response) -> StoreError {
    StoreError::Protocol(format!("unexpected response: {:?}", response))
}

impl StoreClient for TcpStore {
    fn id(&self) -> &str {
        &self.id
    }

    fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool> {
        self.expect_bool(Command::SetIfAbsent {
            key: key.to_string(),
            value: value.to_string(),
            ttl_ms: ttl_millis(ttl),
        })
    }

    fn get(&self, key: &str) -> Result<Option<String>> {
        match self.call(Command::Get {
            key: key.to_string(),
        })? {
            Response::Value(v) => Ok(v),
            other => Err(unexpected(other)),
        }
    }

    fn delete_if_equals(&self, key: &str, expected: &str) -> Result<bool> {
        self.expect_bool(Command::DeleteIfEquals {
            key: key.to_string(),
            value: expected.to_string(),
        })
    }

    fn expire_if_equals(&self, key: &str, expected: &str, ttl: Duration) -> Result<bool> {
        self.expect_bool(Command::ExpireIfEquals {
            key: key.to_string(),
            value: expected.to_string(),
            ttl_ms: ttl_millis(ttl),
        })
    }

    fn ping(&self) -> Result<()> {
        match self.call(Command::Ping)? {
            Response::Pong => Ok(()),
            other => Err(unexpected(other)),
        }
    }
}

/// TTL in whole milliseconds, rounding sub-millisecond leases up to 1ms
fn ttl_millis(ttl: Duration) -> u64 {
    let ms = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX);
    if ms == 0 && !ttl.is_zero() {
        1
    } else {
        ms
    }
}
