use crate::{Error, Result};
use super::Socket;

/// Scratch size for raw option reads.
const RAW_OPTION_BUF: usize = 1024;

impl Socket {
	pub(crate) fn set_int_option(&self, level: libc::c_int, name: libc::c_int, value: libc::c_int) -> Result<()> {
		let fd = self.fd()?;
		let rc = unsafe {
			libc::setsockopt(
				fd,
				level,
				name,
				&value as *const _ as *const libc::c_void,
				std::mem::size_of::<libc::c_int>() as libc::socklen_t,
			)
		};
		if rc == -1 {
			return Err(self.last_error());
		}
		Ok(())
	}

	pub(crate) fn get_int_option(&self, level: libc::c_int, name: libc::c_int) -> Result<libc::c_int> {
		let fd = self.fd()?;
		let mut value: libc::c_int = 0;
		let mut len = std::mem::size_of::<libc::c_int>() as libc::socklen_t;
		let rc = unsafe {
			libc::getsockopt(fd, level, name, &mut value as *mut _ as *mut libc::c_void, &mut len)
		};
		if rc == -1 {
			return Err(self.last_error());
		}
		Ok(value)
	}

	fn set_bool_option(&self, level: libc::c_int, name: libc::c_int, enable: bool) -> Result<()> {
		self.set_int_option(level, name, enable as libc::c_int)
	}

	fn get_bool_option(&self, level: libc::c_int, name: libc::c_int) -> Result<bool> {
		Ok(self.get_int_option(level, name)? != 0)
	}

	/// Sets SO_RCVBUF. The kernel doubles the value for bookkeeping.
	pub fn set_recv_buffer(&self, size: usize) -> Result<()> {
		self.set_int_option(libc::SOL_SOCKET, libc::SO_RCVBUF, clamp_int(size))
	}

	/// Receive buffer size as requested, i.e. half of what the kernel reports.
	pub fn recv_buffer(&self) -> Result<usize> {
		Ok(self.get_int_option(libc::SOL_SOCKET, libc::SO_RCVBUF)? as usize / 2)
	}

	pub fn set_send_buffer(&self, size: usize) -> Result<()> {
		self.set_int_option(libc::SOL_SOCKET, libc::SO_SNDBUF, clamp_int(size))
	}

	/// Send buffer size as requested, i.e. half of what the kernel reports.
	pub fn send_buffer(&self) -> Result<usize> {
		Ok(self.get_int_option(libc::SOL_SOCKET, libc::SO_SNDBUF)? as usize / 2)
	}

	pub fn set_keepalive(&self, enable: bool) -> Result<()> {
		self.set_bool_option(libc::SOL_SOCKET, libc::SO_KEEPALIVE, enable)
	}

	pub fn keepalive(&self) -> Result<bool> {
		self.get_bool_option(libc::SOL_SOCKET, libc::SO_KEEPALIVE)
	}

	/// Idle time before the first keepalive probe (TCP_KEEPIDLE).
	pub fn set_keepalive_idle(&self, seconds: u32) -> Result<()> {
		self.set_int_option(libc::IPPROTO_TCP, libc::TCP_KEEPIDLE, clamp_int(seconds as usize))
	}

	pub fn set_keepalive_interval(&self, seconds: u32) -> Result<()> {
		self.set_int_option(libc::IPPROTO_TCP, libc::TCP_KEEPINTVL, clamp_int(seconds as usize))
	}

	pub fn set_keepalive_count(&self, count: u32) -> Result<()> {
		self.set_int_option(libc::IPPROTO_TCP, libc::TCP_KEEPCNT, clamp_int(count as usize))
	}

	/// Disables Nagle's algorithm.
	pub fn set_no_delay(&self, enable: bool) -> Result<()> {
		self.set_bool_option(libc::IPPROTO_TCP, libc::TCP_NODELAY, enable)
	}

	pub fn no_delay(&self) -> Result<bool> {
		self.get_bool_option(libc::IPPROTO_TCP, libc::TCP_NODELAY)
	}

	/// Wakes `accept` only once data has arrived (TCP_DEFER_ACCEPT).
	pub fn set_defer_accept(&self, enable: bool) -> Result<()> {
		self.set_bool_option(libc::IPPROTO_TCP, libc::TCP_DEFER_ACCEPT, enable)
	}

	pub fn defer_accept(&self) -> Result<bool> {
		self.get_bool_option(libc::IPPROTO_TCP, libc::TCP_DEFER_ACCEPT)
	}

	/// Sets SO_REUSEADDR and SO_REUSEPORT.
	pub fn set_reuse_addr(&self, reuse_addr: bool, reuse_port: bool) -> Result<()> {
		self.set_bool_option(libc::SOL_SOCKET, libc::SO_REUSEADDR, reuse_addr)?;
		self.set_bool_option(libc::SOL_SOCKET, libc::SO_REUSEPORT, reuse_port)
	}

	pub fn reuse_addr(&self) -> Result<bool> {
		self.get_bool_option(libc::SOL_SOCKET, libc::SO_REUSEADDR)
	}

	pub fn reuse_port(&self) -> Result<bool> {
		self.get_bool_option(libc::SOL_SOCKET, libc::SO_REUSEPORT)
	}

	/// IP type-of-service byte.
	pub fn set_tos(&self, tos: i32) -> Result<()> {
		self.set_int_option(libc::IPPROTO_IP, libc::IP_TOS, tos)
	}

	pub fn tos(&self) -> Result<i32> {
		self.get_int_option(libc::IPPROTO_IP, libc::IP_TOS)
	}

	/// Enables TCP Fast Open on a listener (queue of 1) or disables it.
	pub fn set_tcp_fast_open(&self, enable: bool) -> Result<()> {
		self.set_bool_option(libc::IPPROTO_TCP, libc::TCP_FASTOPEN, enable)
	}

	pub fn tcp_fast_open(&self) -> Result<bool> {
		self.get_bool_option(libc::IPPROTO_TCP, libc::TCP_FASTOPEN)
	}

	pub fn set_notsent_lowat(&self, lowat: i32) -> Result<()> {
		self.set_int_option(libc::IPPROTO_TCP, libc::TCP_NOTSENT_LOWAT, lowat)
	}

	pub fn notsent_lowat(&self) -> Result<i32> {
		self.get_int_option(libc::IPPROTO_TCP, libc::TCP_NOTSENT_LOWAT)
	}

	pub fn set_thin_linear_timeouts(&self, enable: bool) -> Result<()> {
		self.set_bool_option(libc::IPPROTO_TCP, libc::TCP_THIN_LINEAR_TIMEOUTS, enable)
	}

	pub fn thin_linear_timeouts(&self) -> Result<bool> {
		self.get_bool_option(libc::IPPROTO_TCP, libc::TCP_THIN_LINEAR_TIMEOUTS)
	}

	/// Sets SO_LINGER; `None` turns lingering off.
	pub fn set_linger(&self, seconds: Option<u32>) -> Result<()> {
		let fd = self.fd()?;
		let value = libc::linger {
			l_onoff: seconds.is_some() as libc::c_int,
			l_linger: seconds.map(|s| clamp_int(s as usize)).unwrap_or(0),
		};
		let rc = unsafe {
			libc::setsockopt(
				fd,
				libc::SOL_SOCKET,
				libc::SO_LINGER,
				&value as *const _ as *const libc::c_void,
				std::mem::size_of::<libc::linger>() as libc::socklen_t,
			)
		};
		if rc == -1 {
			return Err(self.last_error());
		}
		Ok(())
	}

	/// Kernel-enforced deadline for blocking reads and writes, in
	/// milliseconds. 0 disables it.
	pub fn set_timeout(&self, millis: u32) -> Result<()> {
		let fd = self.fd()?;
		let tv = libc::timeval {
			tv_sec: (millis / 1000) as libc::time_t,
			tv_usec: ((millis % 1000) * 1000) as libc::suseconds_t,
		};
		for name in [libc::SO_RCVTIMEO, libc::SO_SNDTIMEO] {
			let rc = unsafe {
				libc::setsockopt(
					fd,
					libc::SOL_SOCKET,
					name,
					&tv as *const _ as *const libc::c_void,
					std::mem::size_of::<libc::timeval>() as libc::socklen_t,
				)
			};
			if rc == -1 {
				return Err(self.last_error());
			}
		}
		Ok(())
	}

	/// Receive deadline in milliseconds, 0 if none.
	pub fn timeout(&self) -> Result<u32> {
		let fd = self.fd()?;
		let mut tv: libc::timeval = unsafe { std::mem::zeroed() };
		let mut len = std::mem::size_of::<libc::timeval>() as libc::socklen_t;
		let rc = unsafe {
			libc::getsockopt(fd, libc::SOL_SOCKET, libc::SO_RCVTIMEO, &mut tv as *mut _ as *mut libc::c_void, &mut len)
		};
		if rc == -1 {
			return Err(self.last_error());
		}
		Ok((tv.tv_sec as u32) * 1000 + (tv.tv_usec as u32) / 1000)
	}

	/// Reads any option as raw bytes (at most 1024).
	pub fn get_option(&self, level: i32, name: i32) -> Result<Vec<u8>> {
		let fd = self.fd()?;
		let mut buf = [0u8; RAW_OPTION_BUF];
		let mut len = buf.len() as libc::socklen_t;
		let rc = unsafe {
			libc::getsockopt(fd, level, name, buf.as_mut_ptr() as *mut libc::c_void, &mut len)
		};
		if rc == -1 {
			return Err(self.last_error());
		}
		Ok(buf[..len as usize].to_vec())
	}

	/// Sets any option from raw bytes. Returns false if the kernel refused it.
	pub fn set_option(&self, level: i32, name: i32, value: &[u8]) -> Result<bool> {
		let fd = self.fd()?;
		if value.len() > RAW_OPTION_BUF {
			return Err(Error::IllegalArgument(format!("option value exceeds {} bytes", RAW_OPTION_BUF)));
		}
		let rc = unsafe {
			libc::setsockopt(
				fd,
				level,
				name,
				value.as_ptr() as *const libc::c_void,
				value.len() as libc::socklen_t,
			)
		};
		Ok(rc == 0)
	}
}

fn clamp_int(value: usize) -> libc::c_int {
	value.min(libc::c_int::MAX as usize) as libc::c_int
}
