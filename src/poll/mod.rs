//! Readiness multiplexer over epoll.

mod event;

use std::os::fd::RawFd;
use std::sync::Arc;
use std::sync::atomic::{AtomicI32, Ordering};

use crate::error::errno;
use crate::runtime::NetRuntime;
use crate::{Error, Result};

pub use self::event::{Event, EventBuffer, Interest};

/// Upper bound on events returned by one wait.
pub const MAX_EVENTS: usize = 1000;

/// Tag carried by the internal wakeup registration.
const WAKEUP_TAG: u32 = u32::MAX;

/// One epoll instance.
///
/// `wait` blocks until something is ready or the selector is closed from
/// another thread.
pub struct Selector {
	epfd: AtomicI32,
	/// Unconnected UDP socket, always writable.
	wakeup_fd: RawFd,
	_runtime: Arc<NetRuntime>,
}

impl Selector {
	pub fn new(runtime: &Arc<NetRuntime>) -> Result<Self> {
		let epfd = unsafe { libc::epoll_create1(libc::EPOLL_CLOEXEC) };
		if epfd == -1 {
			return Err(Error::last_os(true));
		}
		let wakeup_fd = unsafe { libc::socket(libc::AF_INET, libc::SOCK_DGRAM | libc::SOCK_CLOEXEC, 0) };
		if wakeup_fd == -1 {
			let err = Error::last_os(true);
			unsafe { libc::close(epfd) };
			return Err(err);
		}
		log::debug!("selector epfd={} created", epfd);
		Ok(Self {
			epfd: AtomicI32::new(epfd),
			wakeup_fd,
			_runtime: runtime.clone(),
		})
	}

	fn epfd(&self) -> Result<RawFd> {
		match self.epfd.load(Ordering::Acquire) {
			-1 => Err(Error::SocketClosed),
			fd => Ok(fd),
		}
	}

	pub fn is_open(&self) -> bool {
		self.epfd.load(Ordering::Acquire) != -1
	}

	fn ctl(&self, op: libc::c_int, fd: RawFd, interest: Interest, tag: u32) -> Result<()> {
		if tag == WAKEUP_TAG && op != libc::EPOLL_CTL_DEL {
			return Err(Error::IllegalArgument(format!("tag {:#x} is reserved", tag)));
		}
		let epfd = self.epfd()?;
		let mut event = libc::epoll_event {
			events: interest.0,
			u64: tag as u64,
		};
		if unsafe { libc::epoll_ctl(epfd, op, fd, &mut event) } == -1 {
			return Err(Error::last_os(true));
		}
		Ok(())
	}

	/// Starts watching `fd`. `tag` comes back verbatim in ready events;
	/// the usual choice is the descriptor itself. `u32::MAX` is reserved
	/// for the close wakeup.
	pub fn register(&self, fd: RawFd, interest: Interest, tag: u32) -> Result<()> {
		self.ctl(libc::EPOLL_CTL_ADD, fd, interest, tag)
	}

	pub fn modify(&self, fd: RawFd, interest: Interest, tag: u32) -> Result<()> {
		self.ctl(libc::EPOLL_CTL_MOD, fd, interest, tag)
	}

	pub fn deregister(&self, fd: RawFd) -> Result<()> {
		self.ctl(libc::EPOLL_CTL_DEL, fd, Interest::NONE, 0)
	}

	/// Waits for at least one ready descriptor, without timeout.
	///
	/// Fills `buffer` with up to `min(buffer.capacity(), MAX_EVENTS)` events
	/// and returns their count. Returns 0 once the selector is closed.
	pub fn wait(&self, buffer: &mut EventBuffer) -> Result<usize> {
		let max = buffer.capacity().min(MAX_EVENTS) as libc::c_int;
		loop {
			let Ok(epfd) = self.epfd() else {
				buffer.len = 0;
				return Ok(0);
			};
			let n = unsafe { libc::epoll_wait(epfd, buffer.events.as_mut_ptr(), max, -1) };
			buffer.last_wakeup = event::monotonic_nanos();

			if !self.is_open() {
				buffer.len = 0;
				return Ok(0);
			}
			if n >= 0 {
				buffer.len = n as usize;
				return Ok(buffer.len);
			}
			match errno() {
				libc::EINTR => continue,
				libc::EBADF | libc::EINVAL if !self.is_open() => {
					buffer.len = 0;
					return Ok(0);
				}
				code => return Err(Error::from_errno(code, true)),
			}
		}
	}

	/// Closes the selector and wakes every thread blocked in `wait`.
	pub fn close(&self) {
		let epfd = self.epfd.swap(-1, Ordering::AcqRel);
		if epfd == -1 {
			return;
		}
		let mut event = libc::epoll_event {
			events: libc::EPOLLOUT as u32,
			u64: WAKEUP_TAG as u64,
		};
		unsafe {
			libc::epoll_ctl(epfd, libc::EPOLL_CTL_ADD, self.wakeup_fd, &mut event);
			libc::close(epfd);
		}
		log::debug!("selector epfd={} closed", epfd);
	}
}

impl Drop for Selector {
	fn drop(&mut self) {
		self.close();
		unsafe { libc::close(self.wakeup_fd) };
	}
}
