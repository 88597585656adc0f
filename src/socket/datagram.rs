use crate::addr::{self, RawSockAddr, SockAddr};
use crate::{Error, Result};
use super::{MAX_STACK_BUF, Socket};

/// Payload bytes accepted by one `send_msg`/`recv_msg` call.
pub const MAX_MSG_PAYLOAD: usize = MAX_STACK_BUF - 4096;

/// Integers carried by one control message.
pub const MAX_CONTROL_VALUES: usize = 1000;

/// Ancillary message type (SOL_SOCKET level).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlKind {
	/// File descriptors (SCM_RIGHTS).
	Rights,
	/// pid, uid, gid of the sender (SCM_CREDENTIALS).
	Credentials,
}

impl ControlKind {
	fn raw(self) -> libc::c_int {
		match self {
			ControlKind::Rights => libc::SCM_RIGHTS,
			ControlKind::Credentials => libc::SCM_CREDENTIALS,
		}
	}

	fn from_raw(raw: libc::c_int) -> Option<Self> {
		match raw {
			libc::SCM_RIGHTS => Some(ControlKind::Rights),
			libc::SCM_CREDENTIALS => Some(ControlKind::Credentials),
			_ => None,
		}
	}
}

/// One control message: a type tag and its integer payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Control {
	pub kind: ControlKind,
	pub values: Vec<i32>,
}

/// Message for `send_msg`/`recv_msg`.
///
/// For `recv_msg`, `data.len()` is the receive capacity; it is truncated to
/// the bytes actually received, or to zero when the receive would block.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Msg {
	pub data: Vec<u8>,
	pub control: Option<Control>,
}

impl Msg {
	pub fn new(data: impl Into<Vec<u8>>) -> Self {
		Self { data: data.into(), control: None }
	}

	/// Empty message able to receive `capacity` bytes.
	pub fn with_capacity(capacity: usize) -> Self {
		Self { data: vec![0; capacity], control: None }
	}

	/// Attaches descriptors to pass to the peer process.
	pub fn with_rights(mut self, fds: &[i32]) -> Self {
		self.control = Some(Control { kind: ControlKind::Rights, values: fds.to_vec() });
		self
	}

	/// Attaches sender credentials (the kernel checks them).
	pub fn with_credentials(mut self, pid: i32, uid: u32, gid: u32) -> Self {
		self.control = Some(Control {
			kind: ControlKind::Credentials,
			values: vec![pid, uid as i32, gid as i32],
		});
		self
	}
}

#[repr(C)]
struct ControlBuf {
	hdr: libc::cmsghdr,
	data: [i32; MAX_CONTROL_VALUES],
}

impl Socket {
	/// Sends one datagram to `target`. Returns `Ok(0)` if it would block.
	pub fn send_to(&self, buf: &[u8], target: &SockAddr, flags: i32) -> Result<usize> {
		let raw = addr::encode(target, self.family == libc::AF_INET6);
		let len = buf.len().min(MAX_STACK_BUF);
		let flags = flags | libc::MSG_NOSIGNAL;
		let sent = self.io_loop(|fd| unsafe {
			libc::sendto(fd, buf.as_ptr() as *const libc::c_void, len, flags, raw.as_ptr(), raw.len())
		})?;
		Ok(sent.unwrap_or(0))
	}

	/// Receives one datagram and its sender.
	///
	/// `Ok(None)` means nothing was pending on a nonblocking socket. An empty
	/// datagram is `Ok(Some((0, _)))`, never `SocketClosed`.
	pub fn recv_from(&self, buf: &mut [u8], flags: i32) -> Result<Option<(usize, Option<SockAddr>)>> {
		let mut raw = RawSockAddr::empty();
		let len = buf.len().min(MAX_STACK_BUF);
		let received = self.io_loop(|fd| {
			*raw.len_mut() = std::mem::size_of::<libc::sockaddr_storage>() as libc::socklen_t;
			unsafe {
				libc::recvfrom(fd, buf.as_mut_ptr() as *mut libc::c_void, len, flags, raw.as_mut_ptr(), raw.len_mut())
			}
		})?;
		Ok(received.map(|n| (n, addr::decode(&raw))))
	}

	/// Sends a payload with an optional control message.
	///
	/// Payload beyond `MAX_MSG_PAYLOAD` bytes and control values beyond
	/// `MAX_CONTROL_VALUES` are dropped.
	pub fn send_msg(&self, msg: &Msg, flags: i32) -> Result<usize> {
		let len = msg.data.len().min(MAX_MSG_PAYLOAD);
		let mut iov = libc::iovec {
			iov_base: msg.data.as_ptr() as *mut libc::c_void,
			iov_len: len,
		};
		let mut control: ControlBuf = unsafe { std::mem::zeroed() };
		let mut hdr: libc::msghdr = unsafe { std::mem::zeroed() };
		hdr.msg_iov = &mut iov;
		hdr.msg_iovlen = 1;

		if let Some(ctrl) = &msg.control {
			let count = ctrl.values.len().min(MAX_CONTROL_VALUES);
			control.data[..count].copy_from_slice(&ctrl.values[..count]);
			let bytes = (count * std::mem::size_of::<i32>()) as libc::c_uint;
			control.hdr.cmsg_level = libc::SOL_SOCKET;
			control.hdr.cmsg_type = ctrl.kind.raw();
			control.hdr.cmsg_len = unsafe { libc::CMSG_LEN(bytes) } as _;
			hdr.msg_control = &mut control as *mut _ as *mut libc::c_void;
			hdr.msg_controllen = unsafe { libc::CMSG_SPACE(bytes) } as _;
		}

		let flags = flags | libc::MSG_NOSIGNAL;
		let sent = self.io_loop(|fd| unsafe { libc::sendmsg(fd, &hdr, flags) })?;
		Ok(sent.unwrap_or(0))
	}

	/// Receives a payload into `msg.data` plus the first control message.
	pub fn recv_msg(&self, msg: &mut Msg, flags: i32) -> Result<usize> {
		let len = msg.data.len().min(MAX_MSG_PAYLOAD);
		let mut iov = libc::iovec {
			iov_base: msg.data.as_mut_ptr() as *mut libc::c_void,
			iov_len: len,
		};
		let mut control: ControlBuf = unsafe { std::mem::zeroed() };
		let mut hdr: libc::msghdr = unsafe { std::mem::zeroed() };
		hdr.msg_iov = &mut iov;
		hdr.msg_iovlen = 1;
		hdr.msg_control = &mut control as *mut _ as *mut libc::c_void;
		hdr.msg_controllen = std::mem::size_of::<ControlBuf>() as _;

		let received = self.io_loop(|fd| unsafe { libc::recvmsg(fd, &mut hdr, flags) })?;
		let Some(n) = received else {
			msg.data.clear();
			msg.control = None;
			return Ok(0);
		};
		msg.data.truncate(n);
		msg.control = None;

		let first = unsafe { libc::CMSG_FIRSTHDR(&hdr) };
		if !first.is_null() {
			let cmsg = unsafe { &*first };
			if cmsg.cmsg_level == libc::SOL_SOCKET {
				let header = unsafe { libc::CMSG_LEN(0) } as usize;
				let count = (cmsg.cmsg_len as usize).saturating_sub(header) / std::mem::size_of::<i32>();
				let count = count.min(MAX_CONTROL_VALUES);
				msg.control = ControlKind::from_raw(cmsg.cmsg_type).map(|kind| Control {
					kind,
					values: control.data[..count].to_vec(),
				});
			}
		}
		Ok(n)
	}
}

impl Msg {
	/// Takes the descriptors out of an SCM_RIGHTS control message.
	pub fn take_rights(&mut self) -> Result<Vec<i32>> {
		match self.control.take() {
			Some(Control { kind: ControlKind::Rights, values }) => Ok(values),
			Some(other) => {
				self.control = Some(other);
				Err(Error::IllegalArgument("control message does not carry descriptors".into()))
			}
			None => Ok(Vec::new()),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::runtime::NetRuntime;
	use crate::socket::SockKind;

	#[test]
	fn passes_descriptor() {
		let rt = NetRuntime::init().unwrap();
		let (a, b) = Socket::pair(&rt, SockKind::Stream).unwrap();
		let (x, y) = Socket::pair(&rt, SockKind::Stream).unwrap();

		let msg = Msg::new(b"fd".to_vec()).with_rights(&[x.fd().unwrap()]);
		assert_eq!(a.send_msg(&msg, 0).unwrap(), 2);

		let mut received = Msg::with_capacity(16);
		assert_eq!(b.recv_msg(&mut received, 0).unwrap(), 2);
		assert_eq!(received.data, b"fd");
		let fds = received.take_rights().unwrap();
		assert_eq!(fds.len(), 1);

		let passed = unsafe { Socket::from_raw_fd(&rt, fds[0], SockKind::Stream) };
		passed.write_fully(b"hi").unwrap();
		let mut buf = [0u8; 2];
		y.read_fully(&mut buf).unwrap();
		assert_eq!(&buf, b"hi");
	}
}
