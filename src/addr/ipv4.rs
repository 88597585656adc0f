use crate::addr::ToSockAddr;

/// IPv4 socket address (IP + port).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SocketAddrV4 {
	ip: [u8; 4],
	port: u16,
}

impl SocketAddrV4 {
	/// Creates a new IPv4 address.
	pub fn new(ip: [u8; 4], port: u16) -> Self {
		Self { ip, port }
	}

	/// 127.0.0.1 with the given port.
	pub fn loopback(port: u16) -> Self {
		Self::new([127, 0, 0, 1], port)
	}

	/// Creates from raw sockaddr_in.
	pub(crate) fn from_raw(raw: &libc::sockaddr_in) -> Self {
		Self {
			ip: raw.sin_addr.s_addr.to_ne_bytes(),
			port: u16::from_be(raw.sin_port),
		}
	}

	/// Returns the IP bytes.
	pub fn ip(&self) -> [u8; 4] {
		self.ip
	}

	/// Returns the port.
	pub fn port(&self) -> u16 {
		self.port
	}

	/// Converts to the raw sockaddr_in for syscalls.
	pub(crate) fn to_raw(&self) -> libc::sockaddr_in {
		libc::sockaddr_in {
			sin_family: libc::AF_INET as libc::sa_family_t,
			sin_port: self.port.to_be(),
			sin_addr: libc::in_addr {
				s_addr: u32::from_be_bytes(self.ip).to_be(),
			},
			sin_zero: [0; 8],
		}
	}

	/// Returns the `::ffff:a.b.c.d` form of this address.
	pub fn to_mapped_v6(&self) -> [u8; 16] {
		let mut ip = [0u8; 16];
		ip[10] = 0xff;
		ip[11] = 0xff;
		ip[12..].copy_from_slice(&self.ip);
		ip
	}
}

impl ToSockAddr for SocketAddrV4 {
	fn encode_into(&self, storage: &mut libc::sockaddr_storage) -> libc::socklen_t {
		let raw = self.to_raw();
		unsafe { std::ptr::write(storage as *mut _ as *mut libc::sockaddr_in, raw) };
		std::mem::size_of::<libc::sockaddr_in>() as libc::socklen_t
	}
}

impl From<std::net::SocketAddrV4> for SocketAddrV4 {
	fn from(addr: std::net::SocketAddrV4) -> Self {
		Self::new(addr.ip().octets(), addr.port())
	}
}

impl From<SocketAddrV4> for std::net::SocketAddrV4 {
	fn from(addr: SocketAddrV4) -> Self {
		std::net::SocketAddrV4::new(addr.ip.into(), addr.port)
	}
}

impl std::fmt::Display for SocketAddrV4 {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		let [a, b, c, d] = self.ip;
		write!(f, "{}.{}.{}.{}:{}", a, b, c, d, self.port)
	}
}
