//! Raw sockets.
//!
//! A [`Socket`] owns one descriptor. The descriptor lives in an atomic so
//! `close()` can publish `-1` while another thread is still inside a call;
//! every operation reads it once and fails with `SocketClosed` on `-1`.

mod builder;
mod datagram;
mod options;
mod raw;
mod stream;

use std::os::fd::{AsRawFd, RawFd};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};

use crate::runtime::NetRuntime;
use crate::{Error, Result};

pub use self::builder::{BufferConfig, ConnectorBuilder, DatagramBuilder, KeepaliveConfig,
						ListenerBuilder, ReuseConfig, TcpConfig};
pub use self::datagram::{Control, ControlKind, Msg, MAX_CONTROL_VALUES, MAX_MSG_PAYLOAD};

/// Largest chunk moved by one send/recv call of the buffered I/O family.
pub const MAX_STACK_BUF: usize = 65536;

/// Address family requested at `open()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Family {
	/// IPv6 if the runtime probe found it, IPv4 otherwise.
	Inet,
	/// Always AF_INET.
	Ipv4,
	/// Always AF_INET6.
	Ipv6,
	Unix,
}

/// Socket type requested at `open()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SockKind {
	/// Reliable byte stream (TCP or Unix stream).
	Stream,
	/// Packets (UDP or Unix datagram).
	Datagram,
}

impl SockKind {
	#[inline]
	fn raw(self) -> libc::c_int {
		match self {
			SockKind::Stream => libc::SOCK_STREAM,
			SockKind::Datagram => libc::SOCK_DGRAM,
		}
	}
}

/// Operations shared by plaintext and TLS connections.
///
/// Reads and writes follow one contract: `Ok(n > 0)` on progress, `Ok(0)`
/// when a nonblocking descriptor would block, `Err(SocketClosed)` once the
/// connection is gone.
pub trait Transport: Send + Sync {
	fn fd(&self) -> Result<RawFd>;
	fn read(&self, buf: &mut [u8]) -> Result<usize>;
	fn write(&self, buf: &[u8]) -> Result<usize>;
	fn read_fully(&self, buf: &mut [u8]) -> Result<()>;
	fn write_fully(&self, buf: &[u8]) -> Result<()>;
	fn set_blocking(&self, blocking: bool) -> Result<()>;
	fn is_blocking(&self) -> bool;
	fn close(&self);
}

/// One owned OS socket descriptor.
pub struct Socket {
	fd: AtomicI32,
	blocking: AtomicBool,
	kind: SockKind,
	family: libc::c_int,
	runtime: Arc<NetRuntime>,
}

impl Socket {
	pub(crate) fn from_raw_parts(
		runtime: Arc<NetRuntime>,
		fd: RawFd,
		family: libc::c_int,
		kind: SockKind,
		blocking: bool,
	) -> Self {
		Self {
			fd: AtomicI32::new(fd),
			blocking: AtomicBool::new(blocking),
			kind,
			family,
			runtime,
		}
	}

	/// Current descriptor, or `SocketClosed` after `close()`.
	#[inline]
	pub fn fd(&self) -> Result<RawFd> {
		match self.fd.load(Ordering::Acquire) {
			-1 => Err(Error::SocketClosed),
			fd => Ok(fd),
		}
	}

	pub fn is_closed(&self) -> bool {
		self.fd.load(Ordering::Acquire) == -1
	}

	pub fn kind(&self) -> SockKind {
		self.kind
	}

	/// Native address family (AF_INET, AF_INET6 or AF_UNIX).
	pub fn family(&self) -> libc::c_int {
		self.family
	}

	pub fn is_blocking(&self) -> bool {
		self.blocking.load(Ordering::Relaxed)
	}

	pub fn runtime(&self) -> &Arc<NetRuntime> {
		&self.runtime
	}

	/// Maps the current errno with this socket's blocking mode.
	#[inline]
	pub(crate) fn last_error(&self) -> Error {
		Error::last_os(self.is_blocking())
	}

	/// What to do after a failed syscall: retry on EINTR unless the socket
	/// was closed meanwhile, report would-block as no progress.
	#[inline]
	pub(crate) fn classify_failure(&self) -> Failure {
		let code = crate::error::errno();
		if code == libc::EINTR {
			if self.is_closed() {
				return Failure::Fatal(Error::SocketClosed);
			}
			return Failure::Retry;
		}
		if (code == libc::EAGAIN || code == libc::EWOULDBLOCK) && !self.is_blocking() {
			return Failure::WouldBlock;
		}
		Failure::Fatal(Error::from_errno(code, self.is_blocking()))
	}
}

pub(crate) enum Failure {
	Retry,
	WouldBlock,
	Fatal(Error),
}

impl AsRawFd for Socket {
	/// Returns -1 once closed.
	fn as_raw_fd(&self) -> RawFd {
		self.fd.load(Ordering::Acquire)
	}
}

impl Drop for Socket {
	fn drop(&mut self) {
		self.close();
	}
}

impl std::fmt::Debug for Socket {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Socket")
			.field("fd", &self.fd.load(Ordering::Relaxed))
			.field("kind", &self.kind)
			.field("family", &self.family)
			.field("blocking", &self.is_blocking())
			.finish()
	}
}

impl Transport for Socket {
	fn fd(&self) -> Result<RawFd> {
		Socket::fd(self)
	}

	fn read(&self, buf: &mut [u8]) -> Result<usize> {
		Socket::read(self, buf)
	}

	fn write(&self, buf: &[u8]) -> Result<usize> {
		Socket::write(self, buf)
	}

	fn read_fully(&self, buf: &mut [u8]) -> Result<()> {
		Socket::read_fully(self, buf)
	}

	fn write_fully(&self, buf: &[u8]) -> Result<()> {
		Socket::write_fully(self, buf)
	}

	fn set_blocking(&self, blocking: bool) -> Result<()> {
		Socket::set_blocking(self, blocking)
	}

	fn is_blocking(&self) -> bool {
		Socket::is_blocking(self)
	}

	fn close(&self) {
		Socket::close(self)
	}
}
