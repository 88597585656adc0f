use std::net::Shutdown;
use std::os::fd::RawFd;
use std::sync::Arc;

use crate::addr::{self, RawSockAddr, SockAddr};
use crate::error::errno;
use crate::runtime::NetRuntime;
use crate::{Error, Result};
use super::{Failure, Family, SockKind, Socket};

impl Socket {
	/// Creates a socket.
	///
	/// The descriptor is created with `SOCK_CLOEXEC` and in blocking mode.
	pub fn open(runtime: &Arc<NetRuntime>, family: Family, kind: SockKind) -> Result<Self> {
		let af = match family {
			Family::Inet if runtime.ipv6() => libc::AF_INET6,
			Family::Inet | Family::Ipv4 => libc::AF_INET,
			Family::Ipv6 => libc::AF_INET6,
			Family::Unix => libc::AF_UNIX,
		};
		let fd = unsafe { libc::socket(af, kind.raw() | libc::SOCK_CLOEXEC, 0) };
		if fd == -1 {
			return Err(Error::last_os(true));
		}
		log::trace!("opened fd {} (family {}, {:?})", fd, af, kind);
		Ok(Self::from_raw_parts(runtime.clone(), fd, af, kind, true))
	}

	/// Creates a connected pair of Unix sockets.
	pub fn pair(runtime: &Arc<NetRuntime>, kind: SockKind) -> Result<(Self, Self)> {
		let mut fds = [0 as libc::c_int; 2];
		let rc = unsafe {
			libc::socketpair(libc::AF_UNIX, kind.raw() | libc::SOCK_CLOEXEC, 0, fds.as_mut_ptr())
		};
		if rc == -1 {
			return Err(Error::last_os(true));
		}
		Ok((
			Self::from_raw_parts(runtime.clone(), fds[0], libc::AF_UNIX, kind, true),
			Self::from_raw_parts(runtime.clone(), fds[1], libc::AF_UNIX, kind, true),
		))
	}

	/// Takes ownership of an existing descriptor.
	///
	/// # Safety
	/// `fd` must be an open socket not owned by anything else.
	pub unsafe fn from_raw_fd(runtime: &Arc<NetRuntime>, fd: RawFd, kind: SockKind) -> Self {
		let mut raw = RawSockAddr::empty();
		unsafe { libc::getsockname(fd, raw.as_mut_ptr(), raw.len_mut()) };
		let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
		let blocking = flags == -1 || flags & libc::O_NONBLOCK == 0;
		Self::from_raw_parts(runtime.clone(), fd, raw.family(), kind, blocking)
	}

	/// Encodes `addr` for this socket's family.
	fn encode(&self, addr: &SockAddr) -> RawSockAddr {
		addr::encode(addr, self.family == libc::AF_INET6)
	}

	/// Connects to `addr`.
	///
	/// Returns `Ok(true)` once connected. A nonblocking socket returns
	/// `Ok(false)` while the connection is in progress; poll for writability
	/// and call [`finish_connect`](Self::finish_connect).
	pub fn connect(&self, addr: &SockAddr) -> Result<bool> {
		let fd = self.fd()?;
		let raw = self.encode(addr);
		let _call = self.is_blocking().then(|| self.runtime.registry().begin(fd));

		loop {
			if self.is_closed() {
				return Err(Error::SocketClosed);
			}
			if unsafe { libc::connect(fd, raw.as_ptr(), raw.len()) } == 0 {
				return Ok(true);
			}
			match errno() {
				libc::EINTR => continue,
				libc::EISCONN => return Ok(true),
				libc::EINPROGRESS if !self.is_blocking() => return Ok(false),
				// An interrupted blocking connect keeps going in the kernel.
				libc::EALREADY if self.is_blocking() => return self.wait_connected(fd),
				libc::EALREADY => return Ok(false),
				code => return Err(self.closed_or(code)),
			}
		}
	}

	/// Completes a nonblocking connect after the socket became writable.
	pub fn finish_connect(&self) -> Result<()> {
		match self.get_int_option(libc::SOL_SOCKET, libc::SO_ERROR)? {
			0 => Ok(()),
			code => Err(Error::from_errno(code, self.is_blocking())),
		}
	}

	fn wait_connected(&self, fd: RawFd) -> Result<bool> {
		self.poll_ready(fd, libc::POLLOUT)?;
		self.finish_connect()?;
		Ok(true)
	}

	/// Blocks in poll() until `fd` reports `events`, honouring close().
	pub(crate) fn poll_ready(&self, fd: RawFd, events: libc::c_short) -> Result<()> {
		let mut pfd = libc::pollfd { fd, events, revents: 0 };
		let _call = self.runtime.registry().begin(fd);
		loop {
			if self.is_closed() {
				return Err(Error::SocketClosed);
			}
			let rc = unsafe { libc::poll(&mut pfd, 1, -1) };
			if rc >= 0 {
				return Ok(());
			}
			match errno() {
				libc::EINTR => continue,
				code => return Err(self.closed_or(code)),
			}
		}
	}

	pub fn bind(&self, addr: &SockAddr) -> Result<()> {
		let fd = self.fd()?;
		let raw = self.encode(addr);
		while unsafe { libc::bind(fd, raw.as_ptr(), raw.len()) } != 0 {
			match errno() {
				libc::EINTR => continue,
				code => return Err(Error::from_errno(code, true)),
			}
		}
		Ok(())
	}

	pub fn listen(&self, backlog: i32) -> Result<()> {
		let fd = self.fd()?;
		if unsafe { libc::listen(fd, backlog) } != 0 {
			return Err(Error::last_os(true));
		}
		Ok(())
	}

	/// Accepts one connection.
	///
	/// `nonblocking` sets O_NONBLOCK on the accepted descriptor atomically.
	/// Returns `Ok(None)` when this listener is nonblocking and nothing is
	/// pending. A concurrent `close()` makes a blocked accept return
	/// `SocketClosed`.
	pub fn accept(&self, nonblocking: bool) -> Result<Option<Socket>> {
		let fd = self.fd()?;
		let mut flags = libc::SOCK_CLOEXEC;
		if nonblocking {
			flags |= libc::SOCK_NONBLOCK;
		}

		loop {
			let call = self.runtime.registry().begin(fd);
			if self.is_closed() {
				return Err(Error::SocketClosed);
			}
			let client = unsafe { libc::accept4(fd, std::ptr::null_mut(), std::ptr::null_mut(), flags) };
			drop(call);

			if client >= 0 {
				log::trace!("fd {} accepted fd {}", fd, client);
				return Ok(Some(Socket::from_raw_parts(
					self.runtime.clone(),
					client,
					self.family,
					self.kind,
					!nonblocking,
				)));
			}
			match self.classify_failure() {
				Failure::Retry => continue,
				Failure::WouldBlock => return Ok(None),
				Failure::Fatal(_) if self.is_closed() => return Err(Error::SocketClosed),
				Failure::Fatal(err) => return Err(err),
			}
		}
	}

	/// Closes the socket. Safe to call repeatedly and from any thread.
	///
	/// Publishes `-1` first, then shuts the connection down, then wakes a
	/// thread blocked on the descriptor, and only then releases it.
	pub fn close(&self) {
		let fd = self.fd.swap(-1, std::sync::atomic::Ordering::AcqRel);
		if fd == -1 {
			return;
		}
		unsafe { libc::shutdown(fd, libc::SHUT_RDWR) };
		self.runtime.registry().interrupt(fd);
		unsafe { libc::close(fd) };
		log::trace!("closed fd {}", fd);
	}

	pub fn shutdown(&self, how: Shutdown) -> Result<()> {
		let fd = self.fd()?;
		let how = match how {
			Shutdown::Read => libc::SHUT_RD,
			Shutdown::Write => libc::SHUT_WR,
			Shutdown::Both => libc::SHUT_RDWR,
		};
		if unsafe { libc::shutdown(fd, how) } != 0 {
			return Err(self.last_error());
		}
		Ok(())
	}

	/// Address this socket is bound to.
	pub fn local_address(&self) -> Result<Option<SockAddr>> {
		let fd = self.fd()?;
		let mut raw = RawSockAddr::empty();
		if unsafe { libc::getsockname(fd, raw.as_mut_ptr(), raw.len_mut()) } != 0 {
			return Err(self.last_error());
		}
		Ok(addr::decode(&raw))
	}

	/// Address of the connected peer.
	pub fn peer_address(&self) -> Result<Option<SockAddr>> {
		let fd = self.fd()?;
		let mut raw = RawSockAddr::empty();
		if unsafe { libc::getpeername(fd, raw.as_mut_ptr(), raw.len_mut()) } != 0 {
			return Err(self.last_error());
		}
		Ok(addr::decode(&raw))
	}

	/// Error for `code`, or `SocketClosed` if the socket was closed meanwhile.
	fn closed_or(&self, code: i32) -> Error {
		if self.is_closed() {
			Error::SocketClosed
		} else {
			Error::from_errno(code, self.is_blocking())
		}
	}
}
