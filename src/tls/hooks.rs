//! Per-handshake state shared with rustls callbacks.
//!
//! rustls calls ticket, cache and key-log hooks synchronously on the thread
//! driving the handshake. A thread-local scope tells those hooks which
//! descriptor they are serving and collects what they observed.

use std::cell::RefCell;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::os::fd::RawFd;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::addr::{self, RawSockAddr, SockAddr};
use super::TicketGeneration;

#[derive(Clone)]
struct ScopeData {
	fd: RawFd,
	ticket: TicketGeneration,
	ocsp: Option<Vec<u8>>,
}

thread_local! {
	static SCOPE: RefCell<Option<ScopeData>> = const { RefCell::new(None) };
}

/// Active while a handshake step runs on this thread.
pub(crate) struct HandshakeScope {
	previous: Option<ScopeData>,
}

impl HandshakeScope {
	pub(crate) fn enter(fd: RawFd) -> Self {
		let data = ScopeData { fd, ticket: TicketGeneration::None, ocsp: None };
		let previous = SCOPE.with(|s| s.replace(Some(data)));
		Self { previous }
	}

	/// Ticket key involvement observed in this scope.
	pub(crate) fn ticket(&self) -> TicketGeneration {
		SCOPE.with(|s| s.borrow().as_ref().map(|d| d.ticket).unwrap_or_default())
	}

	/// OCSP response the server stapled, if seen in this scope.
	pub(crate) fn take_ocsp(&self) -> Option<Vec<u8>> {
		SCOPE.with(|s| s.borrow_mut().as_mut().and_then(|d| d.ocsp.take()))
	}
}

impl Drop for HandshakeScope {
	fn drop(&mut self) {
		let previous = self.previous.take();
		SCOPE.with(|s| *s.borrow_mut() = previous);
	}
}

/// Records ticket key use. A decrypting key is not masked by a later mint.
pub(crate) fn note_ticket(generation: TicketGeneration) {
	SCOPE.with(|s| {
		if let Some(data) = s.borrow_mut().as_mut() {
			let resumed = matches!(data.ticket, TicketGeneration::Primary | TicketGeneration::Secondary);
			if !(resumed && generation == TicketGeneration::New) {
				data.ticket = generation;
			}
		}
	});
}

pub(crate) fn note_ocsp(response: &[u8]) {
	if response.is_empty() {
		return;
	}
	SCOPE.with(|s| {
		if let Some(data) = s.borrow_mut().as_mut() {
			data.ocsp = Some(response.to_vec());
		}
	});
}

/// Peer address of the connection whose handshake is running.
pub(crate) fn current_peer() -> Option<SockAddr> {
	let fd = SCOPE.with(|s| s.borrow().as_ref().map(|d| d.fd))?;
	let mut raw = RawSockAddr::empty();
	if unsafe { libc::getpeername(fd, raw.as_mut_ptr(), raw.len_mut()) } != 0 {
		return None;
	}
	addr::decode(&raw)
}

/// Receives NSS key-log lines (`LABEL client_random secret`).
pub trait KeyLogSink: Send + Sync {
	fn log(&self, line: &str, peer: Option<&SockAddr>);
}

/// Appends key-log lines to a file, in the format Wireshark reads.
pub struct FileKeyLog {
	file: Mutex<File>,
}

impl FileKeyLog {
	pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
		let file = OpenOptions::new().create(true).append(true).open(path)?;
		Ok(Self { file: Mutex::new(file) })
	}
}

impl KeyLogSink for FileKeyLog {
	fn log(&self, line: &str, peer: Option<&SockAddr>) {
		let mut file = self.file.lock();
		let result = match peer {
			Some(peer) => writeln!(file, "# {}\n{}", peer, line),
			None => writeln!(file, "{}", line),
		};
		if let Err(err) = result {
			log::warn!("key log write failed: {}", err);
		}
	}
}

pub(crate) fn key_log_line(label: &str, client_random: &[u8], secret: &[u8]) -> String {
	use std::fmt::Write;
	let mut line = String::with_capacity(label.len() + 2 + 2 * (client_random.len() + secret.len()));
	line.push_str(label);
	line.push(' ');
	for b in client_random {
		let _ = write!(line, "{:02x}", b);
	}
	line.push(' ');
	for b in secret {
		let _ = write!(line, "{:02x}", b);
	}
	line
}

/// Session statistics, in reporting order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Counter {
	/// Sessions currently held by the internal cache.
	Number,
	Connect,
	ConnectGood,
	ConnectRenegotiate,
	Accept,
	AcceptGood,
	AcceptRenegotiate,
	Hits,
	/// Hits served by an external cache.
	CbHits,
	Misses,
	Timeouts,
	/// Evictions because the internal cache was full.
	CacheFull,
}

impl Counter {
	pub const ALL: [Counter; 12] = [
		Counter::Number,
		Counter::Connect,
		Counter::ConnectGood,
		Counter::ConnectRenegotiate,
		Counter::Accept,
		Counter::AcceptGood,
		Counter::AcceptRenegotiate,
		Counter::Hits,
		Counter::CbHits,
		Counter::Misses,
		Counter::Timeouts,
		Counter::CacheFull,
	];

	/// Bit selecting this counter in `session_counters`.
	pub fn bit(self) -> u32 {
		1 << self as u8
	}
}

#[derive(Default)]
pub(crate) struct Counters {
	values: [AtomicU64; 12],
}

impl Counters {
	#[inline]
	pub(crate) fn incr(&self, counter: Counter) {
		self.values[counter as usize].fetch_add(1, Ordering::Relaxed);
	}

	pub(crate) fn get(&self, counter: Counter) -> u64 {
		self.values[counter as usize].load(Ordering::Relaxed)
	}
}
