//! TLS on top of [`Socket`](crate::Socket), driven by rustls.
//!
//! A [`TlsContext`] carries configuration shared by many connections; a
//! [`TlsSocket`] runs one session over a socket descriptor with the same
//! would-block contract as the plaintext socket.

mod cache;
mod context;
mod hooks;
mod keys;
mod resolver;
mod socket;
mod ticket;
mod verify;

pub use self::cache::SessionCache;
pub use self::context::TlsContext;
pub use self::hooks::{Counter, FileKeyLog, KeyLogSink};
pub use self::socket::TlsSocket;

/// Peer certificate policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VerifyMode {
	/// Do not ask for (server) or check (client) certificates.
	#[default]
	None,
	/// Ask for a client certificate, verify it if given.
	Optional,
	/// Require and verify the peer certificate.
	Required,
}

/// Where server-side session state for resumption lives.
#[derive(Clone, Default)]
pub enum CacheMode {
	Off,
	/// In-process LRU bounded by `set_cache_size`, expiring after `set_timeout`.
	#[default]
	Internal,
	/// Delegated to an external store, called synchronously during handshakes.
	External(std::sync::Arc<dyn SessionCache>),
}

impl std::fmt::Debug for CacheMode {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			CacheMode::Off => write!(f, "Off"),
			CacheMode::Internal => write!(f, "Internal"),
			CacheMode::External(_) => write!(f, "External"),
		}
	}
}

/// Ticket key involvement in a session's handshake.
///
/// A resumed session reports the key that opened its ticket even when a
/// fresh ticket was minted afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TicketGeneration {
	#[default]
	None,
	/// Resumed from a ticket opened by the first key of the ring, the one
	/// minting new tickets.
	Primary,
	/// Resumed from a ticket opened by a later key, kept only for decryption.
	Secondary,
	/// Full handshake that minted a ticket with the primary key.
	New,
}

/// Direction a TLS operation is waiting on after returning no progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
	Read,
	Write,
}

impl Direction {
	pub(crate) fn poll_events(self) -> libc::c_short {
		match self {
			Direction::Read => libc::POLLIN,
			Direction::Write => libc::POLLOUT,
		}
	}
}

/// Size of one ticket key record: 16-byte name, AES key, HMAC key.
pub const TICKET_KEY_LEN: usize = 48;

/// Default number of sessions in the internal cache.
pub const DEFAULT_CACHE_SIZE: usize = 262_144;

/// Longest accepted session id context.
pub const MAX_SESSION_ID_CONTEXT: usize = 32;

/// Default session lifetime in seconds.
pub const DEFAULT_TIMEOUT_SECS: u32 = 300;
