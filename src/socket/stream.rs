use std::os::fd::RawFd;

use crate::{Error, Result};
use super::{Failure, MAX_STACK_BUF, SockKind, Socket};

impl Socket {
	/// Runs one send/recv-style syscall with the retry protocol.
	///
	/// Returns `Some(n)` on success and `None` when a nonblocking descriptor
	/// would block.
	#[inline]
	pub(crate) fn io_loop(&self, mut op: impl FnMut(RawFd) -> isize) -> Result<Option<usize>> {
		let fd = self.fd()?;
		loop {
			let n = op(fd);
			if n >= 0 {
				return Ok(Some(n as usize));
			}
			match self.classify_failure() {
				Failure::Retry => continue,
				Failure::WouldBlock => return Ok(None),
				Failure::Fatal(err) => return Err(err),
			}
		}
	}

	/// Receives up to 64 KiB.
	///
	/// `Ok(0)` means the nonblocking socket has nothing to read yet. A stream
	/// whose peer shut down yields `SocketClosed`.
	pub fn read(&self, buf: &mut [u8]) -> Result<usize> {
		self.read_with_flags(buf, 0)
	}

	pub fn read_with_flags(&self, buf: &mut [u8], flags: i32) -> Result<usize> {
		if buf.is_empty() {
			self.fd()?;
			return Ok(0);
		}
		let len = buf.len().min(MAX_STACK_BUF);
		unsafe { self.read_raw(buf.as_mut_ptr(), len, flags) }
	}

	/// Receives into caller-managed memory, without the 64 KiB cap.
	///
	/// # Safety
	/// `ptr` must be valid for writes of `len` bytes.
	pub unsafe fn read_raw(&self, ptr: *mut u8, len: usize, flags: i32) -> Result<usize> {
		let received = self.io_loop(|fd| unsafe {
			libc::recv(fd, ptr as *mut libc::c_void, len, flags)
		})?;
		match received {
			Some(0) if len > 0 && self.kind == SockKind::Stream => Err(Error::SocketClosed),
			Some(n) => Ok(n),
			None => Ok(0),
		}
	}

	/// Sends up to 64 KiB. `Ok(0)` means the nonblocking socket is full.
	pub fn write(&self, buf: &[u8]) -> Result<usize> {
		self.write_with_flags(buf, 0)
	}

	pub fn write_with_flags(&self, buf: &[u8], flags: i32) -> Result<usize> {
		let len = buf.len().min(MAX_STACK_BUF);
		unsafe { self.write_raw(buf.as_ptr(), len, flags) }
	}

	/// Sends from caller-managed memory, without the 64 KiB cap.
	///
	/// # Safety
	/// `ptr` must be valid for reads of `len` bytes.
	pub unsafe fn write_raw(&self, ptr: *const u8, len: usize, flags: i32) -> Result<usize> {
		let flags = flags | libc::MSG_NOSIGNAL;
		let sent = self.io_loop(|fd| unsafe {
			libc::send(fd, ptr as *const libc::c_void, len, flags)
		})?;
		Ok(sent.unwrap_or(0))
	}

	/// Fills `buf` completely or fails.
	///
	/// On a nonblocking socket, waits for readability whenever the kernel
	/// buffer runs dry and resumes at the same offset.
	pub fn read_fully(&self, buf: &mut [u8]) -> Result<()> {
		let mut offset = 0;
		while offset < buf.len() {
			let len = (buf.len() - offset).min(MAX_STACK_BUF);
			let chunk = &mut buf[offset..offset + len];
			let received = self.io_loop(|fd| unsafe {
				libc::recv(fd, chunk.as_mut_ptr() as *mut libc::c_void, len, 0)
			})?;
			match received {
				Some(0) => return Err(Error::SocketClosed),
				Some(n) => offset += n,
				None => self.poll_ready(self.fd()?, libc::POLLIN)?,
			}
		}
		Ok(())
	}

	/// Sends all of `buf` or fails; partial progress is never reported.
	pub fn write_fully(&self, buf: &[u8]) -> Result<()> {
		let mut offset = 0;
		while offset < buf.len() {
			let len = (buf.len() - offset).min(MAX_STACK_BUF);
			let chunk = &buf[offset..offset + len];
			let sent = self.io_loop(|fd| unsafe {
				libc::send(fd, chunk.as_ptr() as *const libc::c_void, len, libc::MSG_NOSIGNAL)
			})?;
			match sent {
				Some(n) => offset += n,
				None => self.poll_ready(self.fd()?, libc::POLLOUT)?,
			}
		}
		Ok(())
	}

	/// Copies `count` bytes of `source` starting at `offset` to the socket
	/// without passing through user space. Returns bytes sent.
	pub fn send_file(&self, source: RawFd, offset: u64, count: u64) -> Result<u64> {
		if count == 0 {
			self.fd()?;
			return Ok(0);
		}
		let mut off = offset as libc::off_t;
		let sent = self.io_loop(|fd| unsafe {
			libc::sendfile(fd, source, &mut off, count as usize)
		})?;
		match sent {
			Some(0) => Err(Error::SocketClosed),
			Some(n) => Ok(n as u64),
			None => Ok(0),
		}
	}

	/// Switches O_NONBLOCK on or off.
	pub fn set_blocking(&self, blocking: bool) -> Result<()> {
		let fd = self.fd()?;
		let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
		if flags == -1 {
			return Err(self.last_error());
		}
		let new_flags = if blocking {
			flags & !libc::O_NONBLOCK
		} else {
			flags | libc::O_NONBLOCK
		};
		if unsafe { libc::fcntl(fd, libc::F_SETFL, new_flags) } == -1 {
			return Err(self.last_error());
		}
		self.blocking.store(blocking, std::sync::atomic::Ordering::Relaxed);
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use crate::runtime::NetRuntime;
	use crate::socket::{SockKind, Socket};
	use crate::Error;

	#[test]
	fn empty_read_is_noop() {
		let rt = NetRuntime::init().unwrap();
		let (a, _b) = Socket::pair(&rt, SockKind::Stream).unwrap();
		assert_eq!(a.read(&mut []).unwrap(), 0);
	}

	#[test]
	fn read_caps_at_chunk_size() {
		let rt = NetRuntime::init().unwrap();
		let (a, b) = Socket::pair(&rt, SockKind::Stream).unwrap();
		b.set_send_buffer(1 << 20).unwrap();
		a.set_recv_buffer(1 << 20).unwrap();
		let data = vec![7u8; 100_000];
		let writer = std::thread::spawn(move || {
			b.write_fully(&data).unwrap();
			b
		});
		let mut buf = vec![0u8; 100_000];
		let mut total = 0;
		while total < buf.len() {
			let n = a.read(&mut buf[total..]).unwrap();
			assert!(n <= super::MAX_STACK_BUF);
			total += n;
		}
		writer.join().unwrap();
		assert!(buf.iter().all(|&b| b == 7));
	}

	#[test]
	fn peer_shutdown_is_socket_closed() {
		let rt = NetRuntime::init().unwrap();
		let (a, b) = Socket::pair(&rt, SockKind::Stream).unwrap();
		b.close();
		let mut buf = [0u8; 8];
		assert!(matches!(a.read(&mut buf), Err(Error::SocketClosed)));
		assert!(matches!(a.read_fully(&mut buf), Err(Error::SocketClosed)));
	}
}
