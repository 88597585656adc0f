use crate::addr::{SocketAddrV4, ToSockAddr};

/// IPv6 socket address (IP + port + scope).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SocketAddrV6 {
	ip: [u8; 16],
	port: u16,
	/// Interface index for link-local (fe80::) addresses, 0 otherwise.
	scope_id: u32,
}

impl SocketAddrV6 {
	/// Creates a new IPv6 address.
	pub fn new(ip: [u8; 16], port: u16) -> Self {
		Self { ip, port, scope_id: 0 }
	}

	/// Creates with explicit scope ID.
	pub fn with_scope(ip: [u8; 16], port: u16, scope_id: u32) -> Self {
		Self { ip, port, scope_id }
	}

	/// ::1 with the given port.
	pub fn loopback(port: u16) -> Self {
		let mut ip = [0u8; 16];
		ip[15] = 1;
		Self::new(ip, port)
	}

	pub fn ip(&self) -> [u8; 16] {
		self.ip
	}

	pub fn port(&self) -> u16 {
		self.port
	}

	pub fn scope_id(&self) -> u32 {
		self.scope_id
	}

	/// Returns the embedded IPv4 address if this is `::ffff:a.b.c.d`.
	pub fn to_ipv4_mapped(&self) -> Option<SocketAddrV4> {
		match self.ip {
			[0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0xff, 0xff, a, b, c, d] => {
				Some(SocketAddrV4::new([a, b, c, d], self.port))
			}
			_ => None,
		}
	}

	/// Converts to the raw sockaddr_in6 for syscalls.
	pub(crate) fn to_raw(&self) -> libc::sockaddr_in6 {
		libc::sockaddr_in6 {
			sin6_family: libc::AF_INET6 as libc::sa_family_t,
			sin6_port: self.port.to_be(),
			sin6_flowinfo: 0,
			sin6_addr: libc::in6_addr {
				s6_addr: self.ip,
			},
			sin6_scope_id: self.scope_id,
		}
	}

	/// Creates from raw sockaddr_in6.
	pub(crate) fn from_raw(raw: &libc::sockaddr_in6) -> Self {
		Self {
			ip: raw.sin6_addr.s6_addr,
			port: u16::from_be(raw.sin6_port),
			scope_id: raw.sin6_scope_id,
		}
	}
}

impl ToSockAddr for SocketAddrV6 {
	fn encode_into(&self, storage: &mut libc::sockaddr_storage) -> libc::socklen_t {
		let raw = self.to_raw();
		unsafe { std::ptr::write(storage as *mut _ as *mut libc::sockaddr_in6, raw) };
		std::mem::size_of::<libc::sockaddr_in6>() as libc::socklen_t
	}
}

impl From<std::net::SocketAddrV6> for SocketAddrV6 {
	fn from(addr: std::net::SocketAddrV6) -> Self {
		Self::with_scope(addr.ip().octets(), addr.port(), addr.scope_id())
	}
}

impl From<SocketAddrV6> for std::net::SocketAddrV6 {
	fn from(addr: SocketAddrV6) -> Self {
		std::net::SocketAddrV6::new(addr.ip.into(), addr.port, 0, addr.scope_id)
	}
}

impl std::fmt::Display for SocketAddrV6 {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		std::fmt::Display::fmt(&std::net::SocketAddrV6::from(*self), f)
	}
}
