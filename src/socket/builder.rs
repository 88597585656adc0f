use std::sync::Arc;

use serde::Deserialize;

use crate::addr::SockAddr;
use crate::runtime::NetRuntime;
use crate::Result;
use super::{Family, SockKind, Socket};

// ============================================================================
// Shared Configuration Structs
// ============================================================================

/// Buffer size configuration.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(default)]
pub struct BufferConfig {
	pub recv: Option<usize>,
	pub send: Option<usize>,
}

impl BufferConfig {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn recv(mut self, size: usize) -> Self {
		self.recv = Some(size);
		self
	}

	pub fn send(mut self, size: usize) -> Self {
		self.send = Some(size);
		self
	}

	pub fn both(mut self, size: usize) -> Self {
		self.recv = Some(size);
		self.send = Some(size);
		self
	}

	fn apply(&self, socket: &Socket) -> Result<()> {
		if let Some(size) = self.recv {
			socket.set_recv_buffer(size)?;
		}
		if let Some(size) = self.send {
			socket.set_send_buffer(size)?;
		}
		Ok(())
	}
}

/// Address reuse configuration.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct ReuseConfig {
	pub addr: bool,
	pub port: bool,
}

impl Default for ReuseConfig {
	fn default() -> Self {
		Self {
			addr: true,
			port: false,
		}
	}
}

impl ReuseConfig {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn addr(mut self, enable: bool) -> Self {
		self.addr = enable;
		self
	}

	pub fn port(mut self, enable: bool) -> Self {
		self.port = enable;
		self
	}

	/// SO_REUSEADDR plus SO_REUSEPORT, for one listener per worker thread.
	pub fn both(mut self) -> Self {
		self.addr = true;
		self.port = true;
		self
	}

	fn apply(&self, socket: &Socket) -> Result<()> {
		if self.addr || self.port {
			socket.set_reuse_addr(self.addr, self.port)?;
		}
		Ok(())
	}
}

/// TCP-specific configuration.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct TcpConfig {
	pub nodelay: bool,
	pub keepalive: Option<KeepaliveConfig>,
	pub linger: Option<u32>,
	pub defer_accept: bool,
	pub fast_open: bool,
}

impl Default for TcpConfig {
	fn default() -> Self {
		Self {
			nodelay: true,
			keepalive: None,
			linger: None,
			defer_accept: false,
			fast_open: false,
		}
	}
}

impl TcpConfig {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn nodelay(mut self, enable: bool) -> Self {
		self.nodelay = enable;
		self
	}

	pub fn keepalive(mut self, config: KeepaliveConfig) -> Self {
		self.keepalive = Some(config);
		self
	}

	pub fn linger(mut self, seconds: Option<u32>) -> Self {
		self.linger = seconds;
		self
	}

	pub fn defer_accept(mut self, enable: bool) -> Self {
		self.defer_accept = enable;
		self
	}

	pub fn fast_open(mut self, enable: bool) -> Self {
		self.fast_open = enable;
		self
	}

	/// TCP options are skipped on Unix sockets.
	fn apply(&self, socket: &Socket, listening: bool) -> Result<()> {
		if socket.family() == libc::AF_UNIX {
			return Ok(());
		}
		if self.nodelay {
			socket.set_no_delay(true)?;
		}
		if let Some(config) = self.keepalive {
			socket.set_keepalive(true)?;
			socket.set_keepalive_idle(config.idle_secs)?;
			socket.set_keepalive_interval(config.interval_secs)?;
			socket.set_keepalive_count(config.count)?;
		}
		if self.linger.is_some() {
			socket.set_linger(self.linger)?;
		}
		if listening && self.defer_accept {
			socket.set_defer_accept(true)?;
		}
		if listening && self.fast_open {
			socket.set_tcp_fast_open(true)?;
		}
		Ok(())
	}
}

/// Keep-alive timing configuration.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct KeepaliveConfig {
	pub idle_secs: u32,
	pub interval_secs: u32,
	pub count: u32,
}

impl Default for KeepaliveConfig {
	fn default() -> Self {
		Self {
			idle_secs: 60,
			interval_secs: 10,
			count: 5,
		}
	}
}

impl KeepaliveConfig {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn idle(mut self, secs: u32) -> Self {
		self.idle_secs = secs;
		self
	}

	pub fn interval(mut self, secs: u32) -> Self {
		self.interval_secs = secs;
		self
	}

	pub fn count(mut self, count: u32) -> Self {
		self.count = count;
		self
	}
}

/// Family used when the builder was not told one.
fn family_of(addr: &SockAddr) -> Family {
	match addr {
		SockAddr::V4(_) => Family::Ipv4,
		SockAddr::V6(_) => Family::Ipv6,
		SockAddr::Unix(_) => Family::Unix,
	}
}

// ============================================================================
// Listener Builder
// ============================================================================

/// Builder for TCP/Unix stream listeners.
///
/// # Example
/// ```ignore
/// use netlane::{ListenerBuilder, NetRuntime, ReuseConfig, SocketAddrV4, TcpConfig};
///
/// let runtime = NetRuntime::init()?;
/// let listener = ListenerBuilder::new()
///     .reuse(ReuseConfig::new().both())
///     .tcp(TcpConfig::new().defer_accept(true))
///     .backlog(4096)
///     .bind(&runtime, &SocketAddrV4::new([0, 0, 0, 0], 8080).into())?;
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ListenerBuilder {
	reuse: ReuseConfig,
	tcp: TcpConfig,
	buffers: BufferConfig,
	backlog: i32,
	nonblocking: bool,
	#[serde(skip)]
	family: Option<Family>,
}

impl Default for ListenerBuilder {
	fn default() -> Self {
		Self::new()
	}
}

impl ListenerBuilder {
	pub fn new() -> Self {
		Self {
			reuse: ReuseConfig::default(),
			tcp: TcpConfig::default(),
			buffers: BufferConfig::default(),
			backlog: 128,
			nonblocking: false,
			family: None,
		}
	}

	pub fn reuse(mut self, config: ReuseConfig) -> Self {
		self.reuse = config;
		self
	}

	/// TCP options (ignored for Unix sockets).
	pub fn tcp(mut self, config: TcpConfig) -> Self {
		self.tcp = config;
		self
	}

	pub fn buffers(mut self, config: BufferConfig) -> Self {
		self.buffers = config;
		self
	}

	/// Listen backlog. Default: 128.
	pub fn backlog(mut self, backlog: i32) -> Self {
		self.backlog = backlog;
		self
	}

	pub fn nonblocking(mut self, enable: bool) -> Self {
		self.nonblocking = enable;
		self
	}

	/// Overrides the family derived from the bind address.
	pub fn family(mut self, family: Family) -> Self {
		self.family = Some(family);
		self
	}

	/// Binds and starts listening.
	pub fn bind(&self, runtime: &Arc<NetRuntime>, addr: &SockAddr) -> Result<Socket> {
		let family = self.family.unwrap_or_else(|| family_of(addr));
		let socket = Socket::open(runtime, family, SockKind::Stream)?;

		if family != Family::Unix {
			self.reuse.apply(&socket)?;
		}
		self.tcp.apply(&socket, true)?;
		self.buffers.apply(&socket)?;
		if self.nonblocking {
			socket.set_blocking(false)?;
		}

		socket.bind(addr)?;
		socket.listen(self.backlog)?;
		Ok(socket)
	}
}

// ============================================================================
// Connector Builder
// ============================================================================

/// Builder for TCP/Unix stream connections.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ConnectorBuilder {
	tcp: TcpConfig,
	buffers: BufferConfig,
	timeout_millis: u32,
	#[serde(skip)]
	family: Option<Family>,
}

impl ConnectorBuilder {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn tcp(mut self, config: TcpConfig) -> Self {
		self.tcp = config;
		self
	}

	pub fn buffers(mut self, config: BufferConfig) -> Self {
		self.buffers = config;
		self
	}

	/// SO_RCVTIMEO/SO_SNDTIMEO applied before connecting.
	pub fn timeout(mut self, millis: u32) -> Self {
		self.timeout_millis = millis;
		self
	}

	pub fn family(mut self, family: Family) -> Self {
		self.family = Some(family);
		self
	}

	/// Connects in blocking mode.
	pub fn connect(&self, runtime: &Arc<NetRuntime>, addr: &SockAddr) -> Result<Socket> {
		let family = self.family.unwrap_or_else(|| family_of(addr));
		let socket = Socket::open(runtime, family, SockKind::Stream)?;

		self.tcp.apply(&socket, false)?;
		self.buffers.apply(&socket)?;
		if self.timeout_millis > 0 {
			socket.set_timeout(self.timeout_millis)?;
		}

		socket.connect(addr)?;
		Ok(socket)
	}
}

// ============================================================================
// Datagram Builder
// ============================================================================

/// Builder for UDP/Unix datagram sockets.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatagramBuilder {
	reuse: ReuseConfig,
	buffers: BufferConfig,
	nonblocking: bool,
	#[serde(skip)]
	family: Option<Family>,
}

impl Default for DatagramBuilder {
	fn default() -> Self {
		Self::new()
	}
}

impl DatagramBuilder {
	pub fn new() -> Self {
		Self {
			reuse: ReuseConfig { addr: false, port: false },
			buffers: BufferConfig::default(),
			nonblocking: false,
			family: None,
		}
	}

	pub fn reuse(mut self, config: ReuseConfig) -> Self {
		self.reuse = config;
		self
	}

	pub fn buffers(mut self, config: BufferConfig) -> Self {
		self.buffers = config;
		self
	}

	pub fn nonblocking(mut self, enable: bool) -> Self {
		self.nonblocking = enable;
		self
	}

	pub fn family(mut self, family: Family) -> Self {
		self.family = Some(family);
		self
	}

	/// Binds to an address.
	pub fn bind(&self, runtime: &Arc<NetRuntime>, addr: &SockAddr) -> Result<Socket> {
		let family = self.family.unwrap_or_else(|| family_of(addr));
		let socket = Socket::open(runtime, family, SockKind::Datagram)?;

		if family != Family::Unix {
			self.reuse.apply(&socket)?;
		}
		self.buffers.apply(&socket)?;
		if self.nonblocking {
			socket.set_blocking(false)?;
		}

		socket.bind(addr)?;
		Ok(socket)
	}
}
