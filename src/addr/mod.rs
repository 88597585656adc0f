//! Address codec.
//!
//! Converts between [`SockAddr`] and the kernel `sockaddr` encoding:
//! - `V4`: 4-byte address + port, optionally promoted to `::ffff:a.b.c.d`
//! - `V6`: 16-byte address + port; mapped addresses decode back to `V4`
//! - `Unix`: filesystem path or abstract name, truncated to `sun_path`

mod ipv4;
mod ipv6;
mod unix;
pub use self::ipv4::SocketAddrV4;
pub use self::ipv6::SocketAddrV6;
pub use self::unix::UnixAddr;

/// Address types that can be written into a `sockaddr_storage`.
pub trait ToSockAddr {
	/// Writes the native form into `storage`, returning the length to pass
	/// to the syscall.
	fn encode_into(&self, storage: &mut libc::sockaddr_storage) -> libc::socklen_t;
}

/// Any address a socket can be bound or connected to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SockAddr {
	V4(SocketAddrV4),
	V6(SocketAddrV6),
	Unix(UnixAddr),
}

impl SockAddr {
	/// Native address family of this address.
	pub fn family(&self) -> libc::c_int {
		match self {
			SockAddr::V4(_) => libc::AF_INET,
			SockAddr::V6(_) => libc::AF_INET6,
			SockAddr::Unix(_) => libc::AF_UNIX,
		}
	}

	pub fn port(&self) -> Option<u16> {
		match self {
			SockAddr::V4(a) => Some(a.port()),
			SockAddr::V6(a) => Some(a.port()),
			SockAddr::Unix(_) => None,
		}
	}

	/// Converts to a std address; Unix addresses have no std counterpart.
	pub fn to_std(&self) -> Option<std::net::SocketAddr> {
		match self {
			SockAddr::V4(a) => Some(std::net::SocketAddr::V4((*a).into())),
			SockAddr::V6(a) => Some(std::net::SocketAddr::V6((*a).into())),
			SockAddr::Unix(_) => None,
		}
	}
}

impl From<std::net::SocketAddr> for SockAddr {
	fn from(addr: std::net::SocketAddr) -> Self {
		match addr {
			std::net::SocketAddr::V4(a) => SockAddr::V4(a.into()),
			std::net::SocketAddr::V6(a) => SockAddr::V6(a.into()),
		}
	}
}

impl From<SocketAddrV4> for SockAddr {
	fn from(addr: SocketAddrV4) -> Self {
		SockAddr::V4(addr)
	}
}

impl From<SocketAddrV6> for SockAddr {
	fn from(addr: SocketAddrV6) -> Self {
		SockAddr::V6(addr)
	}
}

impl From<UnixAddr> for SockAddr {
	fn from(addr: UnixAddr) -> Self {
		SockAddr::Unix(addr)
	}
}

impl std::fmt::Display for SockAddr {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			SockAddr::V4(a) => std::fmt::Display::fmt(a, f),
			SockAddr::V6(a) => std::fmt::Display::fmt(a, f),
			SockAddr::Unix(a) => std::fmt::Display::fmt(a, f),
		}
	}
}

/// Native socket address ready for a syscall.
pub struct RawSockAddr {
	storage: libc::sockaddr_storage,
	len: libc::socklen_t,
}

impl RawSockAddr {
	/// Zeroed storage with full capacity, for accept/getsockname/recvfrom.
	pub fn empty() -> Self {
		Self {
			storage: unsafe { std::mem::zeroed() },
			len: std::mem::size_of::<libc::sockaddr_storage>() as libc::socklen_t,
		}
	}

	pub fn as_ptr(&self) -> *const libc::sockaddr {
		&self.storage as *const _ as *const libc::sockaddr
	}

	pub fn as_mut_ptr(&mut self) -> *mut libc::sockaddr {
		&mut self.storage as *mut _ as *mut libc::sockaddr
	}

	pub fn len(&self) -> libc::socklen_t {
		self.len
	}

	pub fn len_mut(&mut self) -> &mut libc::socklen_t {
		&mut self.len
	}

	pub fn family(&self) -> libc::c_int {
		self.storage.ss_family as libc::c_int
	}
}

/// Encodes `addr` for a syscall.
///
/// With `prefer_v6` set, IPv4 addresses are promoted to their IPv4-mapped
/// IPv6 form so they can be used on an `AF_INET6` socket.
pub fn encode(addr: &SockAddr, prefer_v6: bool) -> RawSockAddr {
	let mut raw = RawSockAddr::empty();
	raw.len = match addr {
		SockAddr::V4(v4) if prefer_v6 => {
			SocketAddrV6::new(v4.to_mapped_v6(), v4.port()).encode_into(&mut raw.storage)
		}
		SockAddr::V4(v4) => v4.encode_into(&mut raw.storage),
		SockAddr::V6(v6) => v6.encode_into(&mut raw.storage),
		SockAddr::Unix(unix) => unix.encode_into(&mut raw.storage),
	};
	raw
}

/// Decodes a kernel-filled address.
///
/// IPv4-mapped IPv6 addresses come back as `V4`. Unnamed Unix sockets and
/// unknown families yield `None`.
pub fn decode(raw: &RawSockAddr) -> Option<SockAddr> {
	let storage = &raw.storage as *const libc::sockaddr_storage;
	match raw.family() {
		libc::AF_INET => {
			let sin = unsafe { &*(storage as *const libc::sockaddr_in) };
			Some(SockAddr::V4(SocketAddrV4::from_raw(sin)))
		}
		libc::AF_INET6 => {
			let sin6 = unsafe { &*(storage as *const libc::sockaddr_in6) };
			let v6 = SocketAddrV6::from_raw(sin6);
			match v6.to_ipv4_mapped() {
				Some(v4) => Some(SockAddr::V4(v4)),
				None => Some(SockAddr::V6(v6)),
			}
		}
		libc::AF_UNIX => {
			let sun = unsafe { &*(storage as *const libc::sockaddr_un) };
			UnixAddr::from_raw(sun, raw.len).map(SockAddr::Unix)
		}
		_ => None,
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn v4_promoted_in_v6_mode() {
		let addr = SockAddr::V4(SocketAddrV4::new([127, 0, 0, 1], 80));
		let raw = encode(&addr, true);
		assert_eq!(raw.family(), libc::AF_INET6);
		assert_eq!(raw.len() as usize, std::mem::size_of::<libc::sockaddr_in6>());
		assert_eq!(decode(&raw), Some(addr));
	}

	#[test]
	fn v4_stays_v4() {
		let addr = SockAddr::V4(SocketAddrV4::new([10, 1, 2, 3], 443));
		let raw = encode(&addr, false);
		assert_eq!(raw.family(), libc::AF_INET);
		assert_eq!(decode(&raw), Some(addr));
	}

	#[test]
	fn unknown_family_is_none() {
		let mut raw = RawSockAddr::empty();
		raw.storage.ss_family = libc::AF_PACKET as libc::sa_family_t;
		assert_eq!(decode(&raw), None);
	}
}
