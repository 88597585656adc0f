use crate::addr::ToSockAddr;

/// Unix domain socket address (file path or abstract name).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UnixAddr {
	path: Vec<u8>,
	/// Linux abstract namespace: no filesystem entry.
	is_abstract: bool,
}

impl UnixAddr {
	/// Creates a new Unix address from a filesystem path.
	pub fn new<P: AsRef<[u8]>>(path: P) -> Self {
		Self {
			path: path.as_ref().to_vec(),
			is_abstract: false,
		}
	}

	/// Creates an abstract socket address (Linux-only).
	pub fn abstract_socket<P: AsRef<[u8]>>(name: P) -> Self {
		Self {
			path: name.as_ref().to_vec(),
			is_abstract: true,
		}
	}

	pub fn is_abstract(&self) -> bool {
		self.is_abstract
	}

	/// Returns the path bytes.
	pub fn path(&self) -> &[u8] {
		&self.path
	}

	/// Converts to the raw sockaddr_un for syscalls.
	///
	/// Paths that do not fit `sun_path` are truncated, leaving room for the
	/// terminating NUL.
	pub(crate) fn to_raw(&self) -> libc::sockaddr_un {
		let mut addr: libc::sockaddr_un = unsafe { std::mem::zeroed() };
		addr.sun_family = libc::AF_UNIX as libc::sa_family_t;

		let offset = if self.is_abstract { 1 } else { 0 };
		let room = addr.sun_path.len() - 1 - offset;
		for (i, &byte) in self.path.iter().take(room).enumerate() {
			addr.sun_path[i + offset] = byte as libc::c_char;
		}
		addr
	}

	/// Creates from raw sockaddr_un. `len` is the length the kernel reported.
	///
	/// Returns None for unnamed sockets (nothing past the family field).
	pub(crate) fn from_raw(raw: &libc::sockaddr_un, len: libc::socklen_t) -> Option<Self> {
		let header = std::mem::size_of::<libc::sa_family_t>();
		let len = (len as usize).min(std::mem::size_of::<libc::sockaddr_un>());
		if len <= header {
			return None;
		}
		let bytes: Vec<u8> = raw.sun_path[..len - header].iter().map(|&c| c as u8).collect();

		if bytes[0] == 0 {
			let name = &bytes[1..];
			let end = name.iter().position(|&c| c == 0).unwrap_or(name.len());
			if end == 0 {
				return None;
			}
			return Some(Self::abstract_socket(&name[..end]));
		}
		let end = bytes.iter().position(|&c| c == 0).unwrap_or(bytes.len());
		Some(Self::new(&bytes[..end]))
	}
}

impl ToSockAddr for UnixAddr {
	fn encode_into(&self, storage: &mut libc::sockaddr_storage) -> libc::socklen_t {
		let raw = self.to_raw();
		unsafe { std::ptr::write(storage as *mut _ as *mut libc::sockaddr_un, raw) };
		if self.is_abstract {
			// Abstract names are length-delimited, not NUL-terminated.
			let used = (self.path.len() + 1).min(raw.sun_path.len() - 1);
			(std::mem::size_of::<libc::sa_family_t>() + used) as libc::socklen_t
		} else {
			std::mem::size_of::<libc::sockaddr_un>() as libc::socklen_t
		}
	}
}

impl std::fmt::Display for UnixAddr {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		if self.is_abstract {
			write!(f, "@")?;
		}
		write!(f, "{}", String::from_utf8_lossy(&self.path))
	}
}
