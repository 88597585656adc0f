use std::ffi::CStr;

/// Failure kinds surfaced by sockets, TLS sessions and the multiplexer.
///
/// Transient conditions (EINTR on connect/bind, would-block on a nonblocking
/// descriptor) never show up here; they are retried or reported as a
/// zero-length result.
#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error("connection timed out")]
	Timeout,

	#[error("connection reset by peer")]
	ConnectionReset,

	#[error("broken pipe")]
	BrokenPipe,

	#[error("connection refused")]
	ConnectionRefused,

	#[error("address already in use")]
	AddressInUse,

	#[error("host unreachable")]
	HostUnreachable,

	#[error("interrupted system call")]
	Interrupted,

	/// Peer closed the connection or the socket was closed locally.
	///
	/// Unit variant: raised on the hot path, carries nothing.
	#[error("socket closed")]
	SocketClosed,

	#[error("{message}")]
	Io { errno: i32, message: String },

	#[error("TLS configuration: {0}")]
	TlsConfig(String),

	#[error("TLS protocol: {0}")]
	TlsProtocol(String),

	#[error("TLS handshake: {0}")]
	TlsHandshake(String),

	#[error("illegal argument: {0}")]
	IllegalArgument(String),

	#[error("unsupported: {0}")]
	Unsupported(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Returns current errno value.
#[inline]
pub fn errno() -> i32 {
	unsafe { *libc::__errno_location() }
}

/// Converts errno to the OS message string.
pub(crate) fn errno_to_str(errno: i32) -> String {
	let mut buf = [0 as libc::c_char; 256];
	let rc = unsafe { libc::strerror_r(errno, buf.as_mut_ptr(), buf.len()) };
	if rc != 0 {
		return format!("errno {}", errno);
	}
	unsafe { CStr::from_ptr(buf.as_ptr()) }.to_string_lossy().into_owned()
}

impl Error {
	/// Maps an OS error code to a failure kind.
	///
	/// `blocking` tells whether the descriptor was in blocking mode: a
	/// would-block result there means SO_RCVTIMEO/SO_SNDTIMEO expired.
	pub fn from_errno(errno: i32, blocking: bool) -> Self {
		match errno {
			libc::ETIMEDOUT | libc::EINPROGRESS => Error::Timeout,
			libc::EWOULDBLOCK if blocking => Error::Timeout,
			libc::ECONNABORTED | libc::ECONNRESET => Error::ConnectionReset,
			libc::EPIPE => Error::BrokenPipe,
			libc::ECONNREFUSED => Error::ConnectionRefused,
			libc::EADDRINUSE => Error::AddressInUse,
			libc::EHOSTUNREACH | libc::ENETUNREACH => Error::HostUnreachable,
			libc::EINTR => Error::Interrupted,
			_ => Error::Io { errno, message: errno_to_str(errno) },
		}
	}

	/// Maps the calling thread's current errno.
	#[inline]
	pub fn last_os(blocking: bool) -> Self {
		Self::from_errno(errno(), blocking)
	}

	/// Translates a transport-level `std::io::Error` raised underneath the TLS engine.
	pub(crate) fn from_io(err: &std::io::Error, blocking: bool) -> Self {
		match err.raw_os_error() {
			Some(code) => Self::from_errno(code, blocking),
			None => match err.kind() {
				std::io::ErrorKind::UnexpectedEof => Error::SocketClosed,
				std::io::ErrorKind::WouldBlock if blocking => Error::Timeout,
				_ => Error::Io { errno: 0, message: err.to_string() },
			},
		}
	}

	/// True for the "give up and tear down" outcome of a closed connection.
	pub fn is_closed(&self) -> bool {
		matches!(self, Error::SocketClosed)
	}

	pub fn is_tls(&self) -> bool {
		matches!(self, Error::TlsConfig(_) | Error::TlsProtocol(_) | Error::TlsHandshake(_))
	}

	/// Returns the OS error code when the failure came from a syscall.
	pub fn raw_os_error(&self) -> Option<i32> {
		match self {
			Error::Timeout => Some(libc::ETIMEDOUT),
			Error::ConnectionReset => Some(libc::ECONNRESET),
			Error::BrokenPipe => Some(libc::EPIPE),
			Error::ConnectionRefused => Some(libc::ECONNREFUSED),
			Error::AddressInUse => Some(libc::EADDRINUSE),
			Error::HostUnreachable => Some(libc::EHOSTUNREACH),
			Error::Interrupted => Some(libc::EINTR),
			Error::Io { errno, .. } if *errno != 0 => Some(*errno),
			_ => None,
		}
	}
}

/// Maps errno to std::io::ErrorKind.
fn errno_to_kind(errno: i32) -> std::io::ErrorKind {
	match errno {
		libc::EACCES | libc::EPERM => std::io::ErrorKind::PermissionDenied,
		libc::EADDRINUSE => std::io::ErrorKind::AddrInUse,
		libc::EADDRNOTAVAIL => std::io::ErrorKind::AddrNotAvailable,
		libc::EAGAIN => std::io::ErrorKind::WouldBlock,
		libc::ECONNREFUSED => std::io::ErrorKind::ConnectionRefused,
		libc::ECONNRESET | libc::ECONNABORTED => std::io::ErrorKind::ConnectionReset,
		libc::EINTR => std::io::ErrorKind::Interrupted,
		libc::EINVAL => std::io::ErrorKind::InvalidInput,
		libc::ENOTCONN => std::io::ErrorKind::NotConnected,
		libc::EPIPE => std::io::ErrorKind::BrokenPipe,
		libc::ETIMEDOUT => std::io::ErrorKind::TimedOut,
		_ => std::io::ErrorKind::Other,
	}
}

impl From<Error> for std::io::Error {
	fn from(err: Error) -> Self {
		let kind = match &err {
			Error::SocketClosed => std::io::ErrorKind::UnexpectedEof,
			Error::HostUnreachable => std::io::ErrorKind::HostUnreachable,
			Error::IllegalArgument(_) => std::io::ErrorKind::InvalidInput,
			Error::Unsupported(_) => std::io::ErrorKind::Unsupported,
			Error::TlsConfig(_) | Error::TlsProtocol(_) | Error::TlsHandshake(_) => {
				std::io::ErrorKind::InvalidData
			}
			other => match other.raw_os_error() {
				Some(code) => errno_to_kind(code),
				None => std::io::ErrorKind::Other,
			},
		};
		std::io::Error::new(kind, err)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn timeout_class() {
		assert!(matches!(Error::from_errno(libc::ETIMEDOUT, false), Error::Timeout));
		assert!(matches!(Error::from_errno(libc::EINPROGRESS, false), Error::Timeout));
		assert!(matches!(Error::from_errno(libc::EWOULDBLOCK, true), Error::Timeout));
	}

	#[test]
	fn would_block_when_nonblocking_is_generic() {
		match Error::from_errno(libc::EWOULDBLOCK, false) {
			Error::Io { errno, .. } => assert_eq!(errno, libc::EWOULDBLOCK),
			other => panic!("unexpected {:?}", other),
		}
	}

	#[test]
	fn exact_mapping() {
		assert!(matches!(Error::from_errno(libc::ECONNABORTED, false), Error::ConnectionReset));
		assert!(matches!(Error::from_errno(libc::ECONNRESET, false), Error::ConnectionReset));
		assert!(matches!(Error::from_errno(libc::EPIPE, false), Error::BrokenPipe));
		assert!(matches!(Error::from_errno(libc::ECONNREFUSED, false), Error::ConnectionRefused));
		assert!(matches!(Error::from_errno(libc::EADDRINUSE, false), Error::AddressInUse));
		assert!(matches!(Error::from_errno(libc::EHOSTUNREACH, false), Error::HostUnreachable));
		assert!(matches!(Error::from_errno(libc::ENETUNREACH, false), Error::HostUnreachable));
		assert!(matches!(Error::from_errno(libc::EINTR, false), Error::Interrupted));
	}

	#[test]
	fn generic_carries_os_message() {
		let err = Error::from_errno(libc::EBADF, false);
		assert_eq!(err.raw_os_error(), Some(libc::EBADF));
		assert!(!err.to_string().is_empty());
		assert!(!err.to_string().starts_with("errno"));
	}

	#[test]
	fn io_error_kinds() {
		let io: std::io::Error = Error::SocketClosed.into();
		assert_eq!(io.kind(), std::io::ErrorKind::UnexpectedEof);
		let io: std::io::Error = Error::ConnectionRefused.into();
		assert_eq!(io.kind(), std::io::ErrorKind::ConnectionRefused);
		let io: std::io::Error = Error::TlsConfig("bad".into()).into();
		assert_eq!(io.kind(), std::io::ErrorKind::InvalidData);
	}
}
