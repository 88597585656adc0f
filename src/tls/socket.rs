use std::io::{self, Read, Write};
use std::net::{IpAddr, Ipv4Addr};
use std::os::fd::RawFd;
use std::sync::Arc;

use parking_lot::Mutex;
use rustls::pki_types::ServerName;
use rustls::server::Acceptor;
use rustls::{ClientConnection, HandshakeKind, ProtocolVersion, ServerConnection};

use super::context::TlsContext;
use super::hooks::{Counter, HandshakeScope};
use super::{Direction, TicketGeneration, verify};
use crate::socket::{Failure, MAX_STACK_BUF, Socket, Transport};
use crate::{Error, Result};

const SERVER: u32 = 1;
const HANDSHAKED: u32 = 2;
const HAS_TICKET: u32 = 4;
const HAS_OLD_TICKET: u32 = 8;
const EARLY_DATA_ENABLED: u32 = 16;
const EARLY_DATA_FINISHED: u32 = 32;
const NEW_TICKET: u32 = 64;

const RECORD_HEADER_LEN: usize = 5;
const CONTENT_HANDSHAKE: u8 = 22;

/// Runs `$body` against whichever connection type the engine holds.
macro_rules! dispatch {
	($engine:expr, $conn:ident => $body:expr, $idle:expr) => {
		match $engine {
			Engine::Server($conn) => $body,
			Engine::Client($conn) => $body,
			_ => $idle,
		}
	};
}

enum Engine {
	/// Client not started: the server name is still open.
	Pending,
	/// Server waiting for the ClientHello to pick a configuration.
	Accepting(Box<Acceptor>),
	Server(Box<ServerConnection>),
	Client(Box<ClientConnection>),
	Released,
}

struct Session {
	engine: Engine,
	flags: u32,
	/// Moved onto the runtime's dead descriptor after a renegotiation attempt.
	detached: bool,
	blocked: Option<Direction>,
	early_accepted: bool,
	/// Context that served the handshake; differs from the socket's after SNI.
	active: Arc<TlsContext>,
	server_name: Option<ServerName<'static>>,
	records: RecordScanner,
	/// OCSP response stapled by the server (client side).
	ocsp: Option<Vec<u8>>,
}

impl Session {
	fn io_fd(&self, socket: &Socket) -> Result<RawFd> {
		if self.detached {
			return Ok(socket.runtime().dead_fd());
		}
		socket.fd()
	}
}

enum Step {
	Done,
	Progress,
	Blocked,
}

// ==================================================================================
// Record framing
// ==================================================================================

/// Follows TLS record boundaries in the inbound byte stream.
///
/// Once armed, any record of content type handshake is flagged. In TLS 1.2
/// such a record after the handshake is the start of a renegotiation.
#[derive(Default)]
struct RecordScanner {
	header: [u8; RECORD_HEADER_LEN],
	filled: usize,
	remaining: usize,
	armed: bool,
	handshake_seen: bool,
}

impl RecordScanner {
	fn feed(&mut self, mut bytes: &[u8]) {
		while !bytes.is_empty() {
			if self.remaining > 0 {
				let n = self.remaining.min(bytes.len());
				self.remaining -= n;
				bytes = &bytes[n..];
				continue;
			}
			let n = (RECORD_HEADER_LEN - self.filled).min(bytes.len());
			self.header[self.filled..self.filled + n].copy_from_slice(&bytes[..n]);
			self.filled += n;
			bytes = &bytes[n..];
			if self.filled == RECORD_HEADER_LEN {
				self.filled = 0;
				self.remaining = u16::from_be_bytes([self.header[3], self.header[4]]) as usize;
				if self.armed && self.header[0] == CONTENT_HANDSHAKE {
					self.handshake_seen = true;
				}
			}
		}
	}
}

// ==================================================================================
// Transport adapter
// ==================================================================================

/// `Read`/`Write` over the socket descriptor for rustls.
///
/// Would-block surfaces as `ErrorKind::WouldBlock`; any other failure is
/// kept as a crate error so it survives the trip through rustls.
struct FdIo<'a> {
	socket: &'a Socket,
	fd: RawFd,
	records: &'a mut RecordScanner,
	failure: Option<Error>,
}

impl<'a> FdIo<'a> {
	fn new(socket: &'a Socket, fd: RawFd, records: &'a mut RecordScanner) -> Self {
		Self { socket, fd, records, failure: None }
	}

	fn fail(&mut self, err: Error) -> io::Error {
		let io_err = io::Error::other(err.to_string());
		self.failure = Some(err);
		io_err
	}

	/// `None` for would-block, otherwise the failure to surface.
	fn failure(&mut self, err: io::Error) -> Option<Error> {
		if let Some(failure) = self.failure.take() {
			return Some(failure);
		}
		if err.kind() == io::ErrorKind::WouldBlock {
			return None;
		}
		Some(Error::from_io(&err, self.socket.is_blocking()))
	}

	fn retry(&mut self, n: isize) -> Option<io::Result<usize>> {
		if n >= 0 {
			return Some(Ok(n as usize));
		}
		match self.socket.classify_failure() {
			Failure::Retry => None,
			Failure::WouldBlock => Some(Err(io::ErrorKind::WouldBlock.into())),
			Failure::Fatal(err) => Some(Err(self.fail(err))),
		}
	}
}

impl Read for FdIo<'_> {
	fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
		let len = buf.len().min(MAX_STACK_BUF);
		loop {
			if self.socket.is_closed() {
				return Err(self.fail(Error::SocketClosed));
			}
			let n = unsafe { libc::recv(self.fd, buf.as_mut_ptr() as *mut libc::c_void, len, 0) };
			if n > 0 {
				self.records.feed(&buf[..n as usize]);
			}
			if let Some(result) = self.retry(n) {
				return result;
			}
		}
	}
}

impl Write for FdIo<'_> {
	fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
		let len = buf.len().min(MAX_STACK_BUF);
		loop {
			if self.socket.is_closed() {
				return Err(self.fail(Error::SocketClosed));
			}
			let n = unsafe { libc::send(self.fd, buf.as_ptr() as *const libc::c_void, len, libc::MSG_NOSIGNAL) };
			if let Some(result) = self.retry(n) {
				return result;
			}
		}
	}

	fn flush(&mut self) -> io::Result<()> {
		Ok(())
	}
}

/// Pushes queued TLS records out. `Ok(false)` when the socket would block.
fn flush(engine: &mut Engine, io: &mut FdIo<'_>) -> Result<bool> {
	while dispatch!(&*engine, c => c.wants_write(), false) {
		if let Err(err) = dispatch!(&mut *engine, c => c.write_tls(&mut *io), Ok(0)) {
			return match io.failure(err) {
				None => Ok(false),
				Some(err) => Err(err),
			};
		}
	}
	Ok(true)
}

// ==================================================================================
// TlsSocket
// ==================================================================================

/// One TLS session over a [`Socket`].
///
/// Reads and writes drive the handshake on demand. On a nonblocking socket
/// `Ok(0)` means no progress; [`blocked_on`](Self::blocked_on) then tells
/// which readiness to wait for.
pub struct TlsSocket {
	socket: Socket,
	context: Arc<TlsContext>,
	session: Mutex<Session>,
}

impl TlsSocket {
	pub fn new(socket: Socket, context: Arc<TlsContext>, server: bool) -> Self {
		let mut flags = 0;
		let engine = if server {
			flags |= SERVER;
			if context.max_early_data() > 0 {
				flags |= EARLY_DATA_ENABLED;
			}
			context.count(Counter::Accept);
			Engine::Accepting(Box::default())
		} else {
			Engine::Pending
		};
		let session = Session {
			engine,
			flags,
			detached: false,
			blocked: None,
			early_accepted: false,
			active: context.clone(),
			server_name: None,
			records: RecordScanner::default(),
			ocsp: None,
		};
		Self { socket, context, session: Mutex::new(session) }
	}

	pub fn server(socket: Socket, context: Arc<TlsContext>) -> Self {
		Self::new(socket, context, true)
	}

	pub fn client(socket: Socket, context: Arc<TlsContext>) -> Self {
		Self::new(socket, context, false)
	}

	pub fn socket(&self) -> &Socket {
		&self.socket
	}

	pub fn context(&self) -> &Arc<TlsContext> {
		&self.context
	}

	pub fn is_server(&self) -> bool {
		self.session.lock().flags & SERVER != 0
	}

	/// Drives the handshake as far as the socket allows.
	///
	/// `server_name` is sent as SNI by a client unless it is an IP literal;
	/// it is ignored on the server side and after the first call.
	/// Returns `Ok(true)` once established, `Ok(false)` on would-block.
	pub fn handshake(&self, server_name: Option<&str>) -> Result<bool> {
		let mut s = self.session.lock();
		self.start(&mut s, server_name)?;
		loop {
			if s.flags & HANDSHAKED != 0 {
				return Ok(true);
			}
			match self.step(&mut s)? {
				Step::Done => return Ok(true),
				Step::Progress => continue,
				Step::Blocked => return Ok(false),
			}
		}
	}

	pub fn is_handshake_done(&self) -> bool {
		self.session.lock().flags & HANDSHAKED != 0
	}

	/// Readiness the last no-progress outcome is waiting for.
	pub fn blocked_on(&self) -> Option<Direction> {
		self.session.lock().blocked
	}

	/// Host name a client sends as SNI and checks the server certificate
	/// against, for handshakes started implicitly by `read` or `write`.
	/// Only valid before the handshake starts.
	pub fn set_server_name(&self, host: &str) -> Result<()> {
		let mut s = self.session.lock();
		if s.flags & SERVER != 0 || !matches!(s.engine, Engine::Pending) {
			return Err(Error::IllegalArgument("server name must be set on a client before the handshake".into()));
		}
		s.server_name = Some(parse_server_name(host)?);
		Ok(())
	}

	fn start(&self, s: &mut Session, server_name: Option<&str>) -> Result<()> {
		if !matches!(s.engine, Engine::Pending) {
			return Ok(());
		}
		let name = match (server_name, s.server_name.take()) {
			(Some(host), _) => parse_server_name(host)?,
			(None, Some(name)) => name,
			(None, None) => {
				let ip = match self.socket.peer_address() {
					Ok(Some(addr)) => addr.to_std().map(|a| a.ip()),
					_ => None,
				};
				ServerName::IpAddress(ip.unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST)).into())
			}
		};
		let config = self.context.client_config()?;
		let conn = ClientConnection::new(config, name.clone()).map_err(|e| Error::TlsHandshake(e.to_string()))?;
		self.context.count(Counter::Connect);
		if self.context.debug() {
			log::debug!("fd {:?}: client handshake start, server name {:?}", self.socket.fd().ok(), name);
		}
		s.server_name = Some(name);
		s.engine = Engine::Client(Box::new(conn));
		Ok(())
	}

	/// One handshake step: a read and its processing, or a flush.
	fn step(&self, s: &mut Session) -> Result<Step> {
		let fd = s.io_fd(&self.socket)?;
		let scope = HandshakeScope::enter(fd);
		let result = self.step_inner(s, fd);
		match scope.ticket() {
			TicketGeneration::Primary => s.flags |= HAS_TICKET,
			TicketGeneration::Secondary => s.flags |= HAS_OLD_TICKET,
			TicketGeneration::New => s.flags |= NEW_TICKET,
			TicketGeneration::None => {}
		}
		if let Some(ocsp) = scope.take_ocsp() {
			s.ocsp = Some(ocsp);
		}
		result
	}

	fn step_inner(&self, s: &mut Session, fd: RawFd) -> Result<Step> {
		let mut io = FdIo::new(&self.socket, fd, &mut s.records);
		s.blocked = None;

		if let Engine::Accepting(acceptor) = &mut s.engine {
			match acceptor.read_tls(&mut io) {
				Ok(0) => return Err(Error::SocketClosed),
				Ok(_) => {}
				Err(err) => match io.failure(err) {
					None => {
						s.blocked = Some(Direction::Read);
						return Ok(Step::Blocked);
					}
					Some(err) => return Err(err),
				},
			}
			let accepted = match acceptor.accept() {
				Ok(None) => return Ok(Step::Progress),
				Ok(Some(accepted)) => accepted,
				Err((err, mut alert)) => {
					let _ = alert.write_all(&mut io);
					return Err(self.handshake_failed(err));
				}
			};
			let host = accepted.client_hello().server_name().map(str::to_string);
			let active = host
				.as_deref()
				.and_then(|h| self.context.select_sni(h))
				.unwrap_or_else(|| self.context.clone());
			if self.context.debug() {
				log::debug!("fd {}: client hello, server name {:?}, sni switch {}", fd, host,
					!Arc::ptr_eq(&active, &self.context));
			}
			let config = active.server_config()?;
			match accepted.into_connection(config) {
				Ok(conn) => {
					s.engine = Engine::Server(Box::new(conn));
					s.active = active;
					return Ok(Step::Progress);
				}
				Err((err, mut alert)) => {
					let _ = alert.write_all(&mut io);
					return Err(self.handshake_failed(err));
				}
			}
		}

		if !matches!(s.engine, Engine::Server(_) | Engine::Client(_)) {
			return Err(Error::SocketClosed);
		}
		if !flush(&mut s.engine, &mut io)? {
			s.blocked = Some(Direction::Write);
			return Ok(Step::Blocked);
		}
		if !dispatch!(&s.engine, c => c.is_handshaking(), false) {
			self.established(s);
			return Ok(Step::Done);
		}

		match dispatch!(&mut s.engine, c => c.read_tls(&mut io), Ok(0)) {
			Ok(0) => return Err(Error::SocketClosed),
			Ok(_) => {}
			Err(err) => match io.failure(err) {
				None => {
					s.blocked = Some(Direction::Read);
					return Ok(Step::Blocked);
				}
				Some(err) => return Err(err),
			},
		}
		if let Err(err) = dispatch!(&mut s.engine, c => c.process_new_packets().map(|_| ()), Ok(())) {
			let _ = flush(&mut s.engine, &mut io);
			return Err(self.handshake_failed(err));
		}
		Ok(Step::Progress)
	}

	fn handshake_failed(&self, err: rustls::Error) -> Error {
		if self.context.debug() {
			log::debug!("fd {:?}: handshake failed: {}", self.socket.fd().ok(), err);
		}
		Error::TlsHandshake(err.to_string())
	}

	fn established(&self, s: &mut Session) {
		s.flags |= HANDSHAKED;
		s.records.armed = dispatch!(&s.engine, c => c.protocol_version(), None) == Some(ProtocolVersion::TLSv1_2);
		let resumed = dispatch!(&s.engine, c => c.handshake_kind() == Some(HandshakeKind::Resumed), false);
		if s.flags & SERVER != 0 {
			self.context.count(Counter::AcceptGood);
			if resumed {
				self.context.count(Counter::Hits);
			}
		} else {
			self.context.count(Counter::ConnectGood);
			if let Engine::Client(c) = &s.engine {
				s.early_accepted = c.is_early_data_accepted();
			}
		}
		if self.context.debug() {
			let version = dispatch!(&s.engine, c => c.protocol_version(), None);
			let suite = dispatch!(&s.engine, c => c.negotiated_cipher_suite(), None);
			log::debug!(
				"fd {:?}: handshake done: {:?} {:?} resumed={}",
				self.socket.fd().ok(),
				version,
				suite.map(|s| s.suite()),
				resumed
			);
		}
	}

	/// Detaches the session from the socket after the peer started a second
	/// handshake on an established TLS 1.2 session.
	fn reject_renegotiation(&self, s: &mut Session) -> Error {
		s.detached = true;
		let counter = if s.flags & SERVER != 0 { Counter::AcceptRenegotiate } else { Counter::ConnectRenegotiate };
		self.context.count(counter);
		log::warn!("fd {:?}: renegotiation attempt rejected", self.socket.fd().ok());
		Error::SocketClosed
	}

	// ====================================================================
	// Application data
	// ====================================================================

	/// Server side 0-RTT: serves bytes from the early data buffer until it
	/// runs dry after the handshake, then marks early data finished.
	fn read_early(&self, s: &mut Session, buf: &mut [u8]) -> Result<Option<usize>> {
		if s.flags & EARLY_DATA_ENABLED == 0 || s.flags & EARLY_DATA_FINISHED != 0 {
			return Ok(None);
		}
		if let Engine::Server(conn) = &mut s.engine {
			if let Some(mut early) = conn.early_data() {
				s.early_accepted = true;
				let n = early.read(buf).map_err(|e| Error::TlsProtocol(e.to_string()))?;
				if n > 0 {
					return Ok(Some(n));
				}
			}
		}
		if s.flags & HANDSHAKED != 0 {
			s.flags |= EARLY_DATA_FINISHED;
		}
		Ok(None)
	}

	/// Reads decrypted bytes, up to 64 KiB.
	pub fn read(&self, buf: &mut [u8]) -> Result<usize> {
		let mut s = self.session.lock();
		self.read_locked(&mut s, buf)
	}

	fn read_locked(&self, s: &mut Session, buf: &mut [u8]) -> Result<usize> {
		if buf.is_empty() {
			self.socket.fd()?;
			return Ok(0);
		}
		let len = buf.len().min(MAX_STACK_BUF);
		let buf = &mut buf[..len];
		self.start(s, None)?;
		loop {
			if let Some(n) = self.read_early(s, buf)? {
				return Ok(n);
			}
			if s.flags & HANDSHAKED != 0 {
				return self.read_established(s, buf);
			}
			match self.step(s)? {
				Step::Blocked => return Ok(0),
				Step::Done | Step::Progress => continue,
			}
		}
	}

	fn read_established(&self, s: &mut Session, buf: &mut [u8]) -> Result<usize> {
		let fd = s.io_fd(&self.socket)?;
		let mut io = FdIo::new(&self.socket, fd, &mut s.records);
		s.blocked = None;
		let mut eof = false;
		loop {
			let read = dispatch!(&mut s.engine, c => c.reader().read(buf), Err(io::ErrorKind::NotConnected.into()));
			match read {
				Ok(0) => return Err(Error::SocketClosed),
				Ok(n) => return Ok(n),
				Err(e) if e.kind() == io::ErrorKind::WouldBlock && !eof => {}
				Err(e) if matches!(
					e.kind(),
					io::ErrorKind::WouldBlock | io::ErrorKind::UnexpectedEof | io::ErrorKind::NotConnected
				) =>
				{
					return Err(Error::SocketClosed);
				}
				Err(e) => return Err(Error::TlsProtocol(e.to_string())),
			}

			match dispatch!(&mut s.engine, c => c.read_tls(&mut io), Ok(0)) {
				Ok(0) => eof = true,
				Ok(_) => {}
				Err(err) => match io.failure(err) {
					None => {
						s.blocked = Some(Direction::Read);
						return Ok(0);
					}
					Some(err) => return Err(err),
				},
			}
			if io.records.handshake_seen {
				return Err(self.reject_renegotiation(s));
			}
			if let Err(err) = dispatch!(&mut s.engine, c => c.process_new_packets().map(|_| ()), Ok(())) {
				let _ = flush(&mut s.engine, &mut io);
				if self.context.debug() {
					log::debug!("fd {}: protocol error: {}", fd, err);
				}
				return Err(Error::TlsProtocol(err.to_string()));
			}
			// key updates and the like queue a reply
			flush(&mut s.engine, &mut io)?;
		}
	}

	/// Writes up to 64 KiB. Before the handshake completes a resuming
	/// client sends the bytes as early data when the session allows it.
	pub fn write(&self, buf: &[u8]) -> Result<usize> {
		let mut s = self.session.lock();
		self.write_locked(&mut s, buf)
	}

	fn write_locked(&self, s: &mut Session, buf: &[u8]) -> Result<usize> {
		if buf.is_empty() {
			self.socket.fd()?;
			return Ok(0);
		}
		let buf = &buf[..buf.len().min(MAX_STACK_BUF)];
		self.start(s, None)?;

		if s.flags & HANDSHAKED == 0 {
			if let Some(n) = self.write_early(s, buf)? {
				return Ok(n);
			}
			loop {
				match self.step(s)? {
					Step::Done => break,
					Step::Progress => continue,
					Step::Blocked => return Ok(0),
				}
			}
		}

		let fd = s.io_fd(&self.socket)?;
		let mut io = FdIo::new(&self.socket, fd, &mut s.records);
		s.blocked = None;
		if !flush(&mut s.engine, &mut io)? {
			s.blocked = Some(Direction::Write);
			return Ok(0);
		}
		let n = dispatch!(&mut s.engine, c => c.writer().write(buf), Err(io::ErrorKind::NotConnected.into()))
			.map_err(|e| match e.kind() {
				io::ErrorKind::NotConnected => Error::SocketClosed,
				_ => Error::TlsProtocol(e.to_string()),
			})?;
		if !flush(&mut s.engine, &mut io)? || n == 0 {
			s.blocked = Some(Direction::Write);
		}
		Ok(n)
	}

	fn write_early(&self, s: &mut Session, buf: &[u8]) -> Result<Option<usize>> {
		let Engine::Client(conn) = &mut s.engine else {
			return Ok(None);
		};
		let Some(mut early) = conn.early_data() else {
			return Ok(None);
		};
		let n = early.write(buf).map_err(|e| Error::TlsProtocol(e.to_string()))?;
		if n == 0 {
			return Ok(None);
		}
		let fd = s.io_fd(&self.socket)?;
		let mut io = FdIo::new(&self.socket, fd, &mut s.records);
		flush(&mut s.engine, &mut io)?;
		Ok(Some(n))
	}

	fn wait(&self, s: &Session) -> Result<()> {
		let direction = s.blocked.unwrap_or(Direction::Read);
		self.socket.poll_ready(self.socket.fd()?, direction.poll_events())
	}

	pub fn read_fully(&self, buf: &mut [u8]) -> Result<()> {
		let mut s = self.session.lock();
		let mut offset = 0;
		while offset < buf.len() {
			match self.read_locked(&mut s, &mut buf[offset..])? {
				0 => self.wait(&s)?,
				n => offset += n,
			}
		}
		Ok(())
	}

	/// Sends all of `buf` and flushes it to the socket.
	pub fn write_fully(&self, buf: &[u8]) -> Result<()> {
		let mut s = self.session.lock();
		let mut offset = 0;
		while offset < buf.len() {
			match self.write_locked(&mut s, &buf[offset..])? {
				0 => self.wait(&s)?,
				n => offset += n,
			}
		}
		let s = &mut *s;
		loop {
			let fd = s.io_fd(&self.socket)?;
			let mut io = FdIo::new(&self.socket, fd, &mut s.records);
			if flush(&mut s.engine, &mut io)? {
				return Ok(());
			}
			s.blocked = Some(Direction::Write);
			self.wait(&s)?;
		}
	}

	pub fn set_blocking(&self, blocking: bool) -> Result<()> {
		self.socket.set_blocking(blocking)
	}

	/// Sends close_notify if the handshake completed, then closes the socket.
	/// Safe to call from another thread while a read or write is blocked.
	pub fn close(&self) {
		match self.session.try_lock() {
			Some(mut s) => {
				self.release(&mut s, true);
				self.socket.close();
			}
			None => {
				self.socket.close();
				let mut s = self.session.lock();
				self.release(&mut s, false);
			}
		}
	}

	fn release(&self, s: &mut Session, graceful: bool) {
		if matches!(s.engine, Engine::Released) {
			return;
		}
		if graceful && s.flags & HANDSHAKED != 0 && !s.detached {
			if let Ok(fd) = self.socket.fd() {
				let mut io = FdIo::new(&self.socket, fd, &mut s.records);
				dispatch!(&mut s.engine, c => c.send_close_notify(), ());
				let _ = flush(&mut s.engine, &mut io);
			}
		}
		s.engine = Engine::Released;
	}

	// ====================================================================
	// Session metadata
	// ====================================================================

	/// Leaf certificate of the peer, DER encoded.
	pub fn peer_certificate(&self) -> Option<Vec<u8>> {
		let s = self.session.lock();
		dispatch!(&s.engine, c => c.peer_certificates().and_then(|certs| certs.first()).map(|c| c.to_vec()), None)
	}

	pub fn peer_certificate_chain(&self) -> Vec<Vec<u8>> {
		let s = self.session.lock();
		dispatch!(&s.engine, c => c.peer_certificates().map(|certs| certs.iter().map(|c| c.to_vec()).collect()), None)
			.unwrap_or_default()
	}

	pub fn peer_subject(&self) -> Option<String> {
		let der = self.peer_certificate()?;
		let (_, cert) = x509_parser::parse_x509_certificate(&der).ok()?;
		Some(cert.subject().to_string())
	}

	pub fn peer_issuer(&self) -> Option<String> {
		let der = self.peer_certificate()?;
		let (_, cert) = x509_parser::parse_x509_certificate(&der).ok()?;
		Some(cert.issuer().to_string())
	}

	/// Verification of the peer chain against the context's CA list.
	/// A peer without certificate verifies as `Ok`.
	pub fn verify_result(&self) -> std::result::Result<(), String> {
		let s = self.session.lock();
		let chain = dispatch!(&s.engine, c => c.peer_certificates().map(|certs| certs.to_vec()), None)
			.unwrap_or_default();
		let server_name = if s.flags & SERVER == 0 { s.server_name.as_ref() } else { None };
		verify::check_chain(&chain, s.active.roots(), s.active.provider(), server_name)
	}

	/// IANA name of the negotiated suite.
	pub fn cipher_suite(&self) -> Option<&'static str> {
		let s = self.session.lock();
		dispatch!(&s.engine, c => c.negotiated_cipher_suite().and_then(|suite| suite.suite().as_str()), None)
	}

	pub fn protocol_version(&self) -> Option<&'static str> {
		let s = self.session.lock();
		dispatch!(&s.engine, c => c.protocol_version().and_then(|v| v.as_str()), None)
	}

	pub fn application_protocol(&self) -> Option<Vec<u8>> {
		let s = self.session.lock();
		dispatch!(&s.engine, c => c.alpn_protocol().map(<[u8]>::to_vec), None)
	}

	/// Host name the client asked for (server side).
	pub fn server_name(&self) -> Option<String> {
		let s = self.session.lock();
		match &s.engine {
			Engine::Server(conn) => conn.server_name().map(str::to_string),
			_ => None,
		}
	}

	pub fn session_reused(&self) -> bool {
		let s = self.session.lock();
		dispatch!(&s.engine, c => c.handshake_kind() == Some(HandshakeKind::Resumed), false)
	}

	pub fn ticket_generation(&self) -> TicketGeneration {
		let flags = self.session.lock().flags;
		if flags & HAS_TICKET != 0 {
			TicketGeneration::Primary
		} else if flags & HAS_OLD_TICKET != 0 {
			TicketGeneration::Secondary
		} else if flags & NEW_TICKET != 0 {
			TicketGeneration::New
		} else {
			TicketGeneration::None
		}
	}

	/// OCSP response the server stapled to its certificate (client side).
	pub fn ocsp_response(&self) -> Option<Vec<u8>> {
		self.session.lock().ocsp.clone()
	}

	/// Whether 0-RTT data was accepted for this session.
	pub fn early_data_accepted(&self) -> bool {
		self.session.lock().early_accepted
	}

	/// Server side: all early data has been read and reads now come from
	/// the regular stream.
	pub fn early_data_finished(&self) -> bool {
		self.session.lock().flags & EARLY_DATA_FINISHED != 0
	}
}

fn parse_server_name(host: &str) -> Result<ServerName<'static>> {
	ServerName::try_from(host.to_string()).map_err(|_| Error::IllegalArgument(format!("invalid server name: {}", host)))
}

impl Drop for TlsSocket {
	fn drop(&mut self) {
		self.close();
	}
}

impl std::fmt::Debug for TlsSocket {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("TlsSocket").field("socket", &self.socket).finish_non_exhaustive()
	}
}

impl Transport for TlsSocket {
	fn fd(&self) -> Result<RawFd> {
		self.socket.fd()
	}

	fn read(&self, buf: &mut [u8]) -> Result<usize> {
		TlsSocket::read(self, buf)
	}

	fn write(&self, buf: &[u8]) -> Result<usize> {
		TlsSocket::write(self, buf)
	}

	fn read_fully(&self, buf: &mut [u8]) -> Result<()> {
		TlsSocket::read_fully(self, buf)
	}

	fn write_fully(&self, buf: &[u8]) -> Result<()> {
		TlsSocket::write_fully(self, buf)
	}

	fn set_blocking(&self, blocking: bool) -> Result<()> {
		TlsSocket::set_blocking(self, blocking)
	}

	fn is_blocking(&self) -> bool {
		self.socket.is_blocking()
	}

	fn close(&self) {
		TlsSocket::close(self)
	}
}
