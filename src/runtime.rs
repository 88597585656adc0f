use std::sync::{Arc, OnceLock};

use serde::Deserialize;

use crate::blocking::{self, BlockingRegistry};
use crate::{Error, Result};

const MAX_REGISTRY_SLOTS: usize = 1 << 20;
const FALLBACK_REGISTRY_SLOTS: usize = 65536;

/// Process-level networking settings.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
	/// Skip the IPv6 probe and create IPv4 sockets for `Family::Inet`.
	pub prefer_ipv4: bool,
	/// Size of the blocking-call table. Defaults to RLIMIT_NOFILE.
	pub max_descriptors: Option<usize>,
}

/// Shared state every socket, TLS session and selector is handed.
///
/// Built once by the process entry point and passed down as `Arc<NetRuntime>`.
pub struct NetRuntime {
	ipv6: bool,
	registry: BlockingRegistry,
	/// Unconnected socket kept open for the lifetime of the runtime.
	/// TLS sessions are moved onto it when a renegotiation is detected.
	dead_fd: libc::c_int,
}

static WAKEUP_HANDLER: OnceLock<std::result::Result<(), String>> = OnceLock::new();

impl NetRuntime {
	pub fn new(config: RuntimeConfig) -> Result<Arc<Self>> {
		WAKEUP_HANDLER
			.get_or_init(|| blocking::install_wakeup_handler().map_err(|e| e.to_string()))
			.clone()
			.map_err(|message| Error::Io { errno: 0, message })?;

		let ipv6 = !config.prefer_ipv4 && probe_ipv6();
		let slots = config.max_descriptors.unwrap_or_else(descriptor_limit);

		let dead_fd = unsafe { libc::socket(libc::AF_INET, libc::SOCK_STREAM | libc::SOCK_CLOEXEC, 0) };
		if dead_fd == -1 {
			return Err(Error::last_os(true));
		}

		log::debug!("network runtime ready: ipv6={} registry={}", ipv6, slots);
		Ok(Arc::new(Self {
			ipv6,
			registry: BlockingRegistry::new(slots),
			dead_fd,
		}))
	}

	/// Runtime with default settings.
	pub fn init() -> Result<Arc<Self>> {
		Self::new(RuntimeConfig::default())
	}

	/// Whether `Family::Inet` sockets are created as AF_INET6.
	pub fn ipv6(&self) -> bool {
		self.ipv6
	}

	pub fn registry(&self) -> &BlockingRegistry {
		&self.registry
	}

	pub(crate) fn dead_fd(&self) -> libc::c_int {
		self.dead_fd
	}
}

impl Drop for NetRuntime {
	fn drop(&mut self) {
		unsafe { libc::close(self.dead_fd) };
	}
}

fn probe_ipv6() -> bool {
	let fd = unsafe { libc::socket(libc::AF_INET6, libc::SOCK_STREAM | libc::SOCK_CLOEXEC, 0) };
	if fd == -1 {
		return false;
	}
	unsafe { libc::close(fd) };
	true
}

fn descriptor_limit() -> usize {
	let mut limit: libc::rlimit = unsafe { std::mem::zeroed() };
	if unsafe { libc::getrlimit(libc::RLIMIT_NOFILE, &mut limit) } != 0 {
		return FALLBACK_REGISTRY_SLOTS;
	}
	if limit.rlim_max == libc::RLIM_INFINITY {
		return MAX_REGISTRY_SLOTS;
	}
	(limit.rlim_max as usize).clamp(1, MAX_REGISTRY_SLOTS)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn prefer_ipv4_skips_probe() {
		let rt = NetRuntime::new(RuntimeConfig { prefer_ipv4: true, max_descriptors: Some(128) }).unwrap();
		assert!(!rt.ipv6());
		assert_eq!(rt.registry().capacity(), 128);
	}

	#[test]
	fn runtime_can_be_built_twice() {
		let a = NetRuntime::init().unwrap();
		let b = NetRuntime::init().unwrap();
		assert!(a.registry().capacity() > 0);
		assert_ne!(a.dead_fd(), b.dead_fd());
	}
}
