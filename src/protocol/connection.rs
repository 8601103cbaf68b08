// Copyright (c) the neo4j-client contributors
// SPDX-License-Identifier: Apache-2.0

use std::collections::VecDeque;
use std::io::{self, BufReader, Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::debug;
use rustls::client::ServerName;
use rustls::{ClientConfig, ClientConnection, StreamOwned};

use super::frame;
use super::messages::{self, Await, Request, Response};
use super::state::ServerState;
use super::version::{Version, MAGIC};
use crate::address::Address;
use crate::errors::{Error, Result};
use crate::summary::ServerInfo;
use crate::value::{Value, ValueMap};

/// One Bolt conversation: a socket, the negotiated protocol version, and
/// the server-state bookkeeping.
///
/// Requests are buffered locally and go out together on [`Connection::flush`]
/// (that is what makes BEGIN/RUN/PULL pipelining possible); responses come
/// back one by one through [`Connection::recv_response`], matched against
/// the queue of outstanding requests.
pub(crate) struct Connection {
    reader: BufReader<Stream>,
    /// Raw handle to the same socket, for timeouts and shutdown.
    socket: TcpStream,
    outbox: Vec<u8>,
    awaiting: VecDeque<Await>,
    state: ServerState,
    version: Version,
    address: Arc<Address>,
    server_agent: String,
    connection_id: String,
    last_qid: Option<i64>,
    idle_since: Instant,
    defunct: bool,
    farewell_sent: bool,
}

pub(crate) struct ConnectOptions<'a> {
    pub(crate) connect_timeout: Option<Duration>,
    pub(crate) tls: Option<&'a Arc<ClientConfig>>,
    pub(crate) deadline: Option<Instant>,
}

pub(crate) fn open(address: Arc<Address>, options: ConnectOptions<'_>) -> Result<Connection> {
    let socket = connect_socket(&address, connect_budget(&options))?;
    set_io_deadline(&socket, options.deadline)?;
    let raw = socket
        .try_clone()
        .map_err(|e| Error::io("could not clone the socket handle", e))?;
    let mut stream = Stream::wrap(socket, address.host(), options.tls)?;

    debug!("[{address}] C: <handshake> magic + {:02X?}", Version::proposal());
    let handshake: io::Result<[u8; 4]> = (|| {
        stream.write_all(&MAGIC)?;
        stream.write_all(&Version::proposal())?;
        stream.flush()?;
        let mut reply = [0u8; 4];
        stream.read_exact(&mut reply)?;
        Ok(reply)
    })();
    let reply = match handshake {
        Ok(reply) => reply,
        Err(e) => {
            let _ = raw.shutdown(Shutdown::Both);
            return Err(Error::io("handshake failed", e));
        }
    };
    let version = Version::from_handshake(reply)?;
    debug!("[{address}] S: <handshake> agreed on {:?}", version.tuple());

    Ok(Connection {
        reader: BufReader::new(stream),
        socket: raw,
        outbox: Vec::new(),
        awaiting: VecDeque::new(),
        state: ServerState::Connected,
        version,
        address,
        server_agent: String::new(),
        connection_id: String::new(),
        last_qid: None,
        idle_since: Instant::now(),
        defunct: false,
        farewell_sent: false,
    })
}

impl Connection {
    pub(crate) fn version(&self) -> Version {
        self.version
    }

    pub(crate) fn address(&self) -> &Arc<Address> {
        &self.address
    }

    pub(crate) fn is_defunct(&self) -> bool {
        self.defunct
    }

    pub(crate) fn idled_longer_than(&self, threshold: Duration) -> bool {
        self.idle_since.elapsed() >= threshold
    }

    pub(crate) fn server_info(&self) -> ServerInfo {
        ServerInfo {
            address: (*self.address).clone(),
            agent: self.server_agent.clone(),
            protocol_version: self.version.tuple(),
        }
    }

    /// Queues `request`; nothing goes on the wire before
    /// [`Connection::flush`].
    pub(crate) fn send(&mut self, request: &Request<'_>) -> Result<()> {
        if self.defunct {
            return Err(Error::connection("connection is defunct"));
        }
        let payload = messages::encode(request, self.version, self.last_qid)?;
        debug!("{}C: {}", self.log_prefix(), request.describe());
        frame::enframe(&mut self.outbox, &payload);
        if let Some(awaited) = request.awaits() {
            self.awaiting.push_back(awaited);
        }
        if matches!(request, Request::Goodbye) {
            self.farewell_sent = true;
        }
        Ok(())
    }

    pub(crate) fn flush(&mut self, deadline: Option<Instant>) -> Result<()> {
        if self.outbox.is_empty() {
            return Ok(());
        }
        set_io_deadline(&self.socket, deadline)?;
        let outbox = std::mem::take(&mut self.outbox);
        let stream = self.reader.get_mut();
        let outcome = stream.write_all(&outbox).and_then(|_| stream.flush());
        if let Err(e) = outcome {
            return Err(self.broke("write failed", e));
        }
        self.idle_since = Instant::now();
        Ok(())
    }

    /// Receives exactly one server message and advances the state machine.
    ///
    /// Server FAILUREs are returned as a [`Response::Failure`] value, not as
    /// an `Err`; only transport and protocol breakage is an `Err` (and
    /// renders the connection defunct).
    pub(crate) fn recv_response(&mut self, deadline: Option<Instant>) -> Result<Response> {
        set_io_deadline(&self.socket, deadline)?;
        let payload = match frame::deframe(&mut self.reader) {
            Ok(payload) => payload,
            Err(e) => return Err(self.broke("read failed", e)),
        };
        let response = match messages::decode_response(&payload) {
            Ok(response) => response,
            Err(e) => {
                // a garbled stream cannot be re-synchronised
                self.defunct = true;
                let _ = self.socket.shutdown(Shutdown::Both);
                return Err(e);
            }
        };
        match &response {
            Response::Record(values) => {
                debug!("{}S: RECORD ({} fields)", self.log_prefix(), values.len());
            }
            Response::Success(meta) => {
                let Some(awaited) = self.awaiting.pop_front() else {
                    self.defunct = true;
                    let _ = self.socket.shutdown(Shutdown::Both);
                    return Err(Error::protocol("unsolicited SUCCESS from the server"));
                };
                debug!("{}S: SUCCESS {meta:?}", self.log_prefix());
                self.digest_success(awaited, meta);
            }
            Response::Failure(error) => {
                debug!("{}S: FAILURE {error}", self.log_prefix());
                let _ = self.awaiting.pop_front();
                self.state = self.state.on_failure();
            }
            Response::Ignored => {
                debug!("{}S: IGNORED", self.log_prefix());
                let _ = self.awaiting.pop_front();
            }
        }
        self.idle_since = Instant::now();
        Ok(response)
    }

    fn digest_success(&mut self, awaited: Await, meta: &ValueMap) {
        match awaited {
            Await::Hello => {
                if let Some(agent) = meta.get("server").and_then(Value::as_str) {
                    self.server_agent = agent.into();
                }
                if let Some(id) = meta.get("connection_id").and_then(Value::as_str) {
                    self.connection_id = id.into();
                }
            }
            Await::Run => {
                self.last_qid = meta.get("qid").and_then(Value::as_int);
            }
            _ => {}
        }
        let has_more = meta
            .get("has_more")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        self.state = self.state.on_success(awaited, has_more);
    }

    /// Like [`Connection::recv_response`], but treats anything other than a
    /// SUCCESS as an error.
    pub(crate) fn recv_success(&mut self, deadline: Option<Instant>) -> Result<ValueMap> {
        match self.recv_response(deadline)? {
            Response::Success(meta) => Ok(meta),
            Response::Failure(error) => Err(error.into()),
            Response::Ignored => Err(Error::protocol(
                "the server ignored a request that was expected to succeed",
            )),
            Response::Record(_) => Err(Error::protocol(
                "received a RECORD where a summary message was expected",
            )),
        }
    }

    /// Reads until no response is outstanding, discarding whatever arrives.
    pub(crate) fn settle(&mut self, deadline: Option<Instant>) -> Result<()> {
        while !self.awaiting.is_empty() {
            self.recv_response(deadline)?;
        }
        Ok(())
    }

    pub(crate) fn needs_tidy(&self) -> bool {
        self.defunct
            || self.state != ServerState::Ready
            || !self.awaiting.is_empty()
            || !self.outbox.is_empty()
    }

    /// Drives the connection back to a quiet READY, draining left-over
    /// streams via RESET. An `Err` means the connection is beyond saving.
    pub(crate) fn tidy(&mut self, deadline: Option<Instant>) -> Result<()> {
        if self.defunct {
            return Err(Error::connection("connection is defunct"));
        }
        if !self.needs_tidy() {
            return Ok(());
        }
        self.ping(deadline)
    }

    /// A RESET round trip, also used as the liveness probe for connections
    /// that sat idle for a while.
    pub(crate) fn ping(&mut self, deadline: Option<Instant>) -> Result<()> {
        self.send(&Request::Reset)?;
        self.flush(deadline)?;
        self.settle(deadline)?;
        if self.state != ServerState::Ready {
            self.defunct = true;
            let _ = self.socket.shutdown(Shutdown::Both);
            return Err(Error::protocol(
                "connection did not return to READY after RESET",
            ));
        }
        Ok(())
    }

    fn broke(&mut self, context: &str, source: io::Error) -> Error {
        self.defunct = true;
        let _ = self.socket.shutdown(Shutdown::Both);
        Error::io(context, source)
    }

    fn log_prefix(&self) -> String {
        match self.connection_id.is_empty() {
            true => format!("[{}] ", self.address),
            false => format!("[{} {}] ", self.address, self.connection_id),
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if !self.defunct
            && !self.farewell_sent
            && self.state == ServerState::Ready
            && self.awaiting.is_empty()
            && self.outbox.is_empty()
        {
            // a farewell is only owed on a quiet connection
            let _ = self.send(&Request::Goodbye);
            let _ = self.flush(Some(Instant::now() + Duration::from_millis(100)));
        }
        let _ = self.socket.shutdown(Shutdown::Both);
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("address", &self.address)
            .field("version", &self.version)
            .field("state", &self.state)
            .field("awaiting", &self.awaiting)
            .field("defunct", &self.defunct)
            .finish()
    }
}

enum Stream {
    Plain(TcpStream),
    Tls(Box<StreamOwned<ClientConnection, TcpStream>>),
}

impl Stream {
    fn wrap(socket: TcpStream, host: &str, tls: Option<&Arc<ClientConfig>>) -> Result<Self> {
        match tls {
            None => Ok(Stream::Plain(socket)),
            Some(config) => {
                let name = ServerName::try_from(host).map_err(|e| {
                    Error::config(format!("host {host:?} is not a valid TLS server name: {e}"))
                })?;
                let session = ClientConnection::new(Arc::clone(config), name)
                    .map_err(|e| Error::config(format!("could not start a TLS session: {e}")))?;
                Ok(Stream::Tls(Box::new(StreamOwned::new(session, socket))))
            }
        }
    }
}

impl Read for Stream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Stream::Plain(inner) => inner.read(buf),
            Stream::Tls(inner) => inner.read(buf),
        }
    }
}

impl Write for Stream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Stream::Plain(inner) => inner.write(buf),
            Stream::Tls(inner) => inner.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Stream::Plain(inner) => inner.flush(),
            Stream::Tls(inner) => inner.flush(),
        }
    }
}

fn connect_budget(options: &ConnectOptions<'_>) -> Option<Duration> {
    let remaining = options
        .deadline
        .map(|deadline| deadline.saturating_duration_since(Instant::now()));
    match (options.connect_timeout, remaining) {
        (Some(timeout), Some(remaining)) => Some(timeout.min(remaining)),
        (Some(timeout), None) => Some(timeout),
        (None, remaining) => remaining,
    }
}

fn connect_socket(address: &Address, timeout: Option<Duration>) -> Result<TcpStream> {
    let resolved = address
        .to_socket_addrs()
        .map_err(|e| Error::io("address resolution failed", e))?;
    let mut last_error = None;
    for candidate in resolved {
        let attempt = match timeout {
            Some(timeout) => TcpStream::connect_timeout(&candidate, timeout.max(MIN_TIMEOUT)),
            None => TcpStream::connect(candidate),
        };
        match attempt {
            Ok(socket) => return Ok(socket),
            Err(e) => last_error = Some(e),
        }
    }
    Err(match last_error {
        Some(e) => Error::io("could not connect", e),
        None => Error::connection(format!("{address} did not resolve to any address")),
    })
}

const MIN_TIMEOUT: Duration = Duration::from_nanos(1);

/// Arms (or disarms) the socket timeouts so that blocking calls give up at
/// `deadline`. A deadline in the past degenerates to the smallest timeout
/// the platform accepts.
fn set_io_deadline(socket: &TcpStream, deadline: Option<Instant>) -> Result<()> {
    let timeout = deadline.map(|deadline| {
        deadline
            .saturating_duration_since(Instant::now())
            .max(MIN_TIMEOUT)
    });
    socket
        .set_read_timeout(timeout)
        .and_then(|_| socket.set_write_timeout(timeout))
        .map_err(|e| Error::io("could not arm the io deadline", e))
}
