use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use rustls::server::StoresServerSessions;

use super::CacheMode;
use super::context::Shared;
use super::hooks::Counter;

/// External server-side session store.
///
/// Calls happen on the handshaking thread, with the session id as key and
/// the serialized session as value.
pub trait SessionCache: Send + Sync {
	fn add(&self, id: &[u8], session: &[u8]);
	fn get(&self, id: &[u8]) -> Option<Vec<u8>>;
	fn remove(&self, id: &[u8]);
}

struct Entry {
	value: Vec<u8>,
	created: Instant,
	stamp: u64,
}

/// Lookup outcome of the internal cache.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Lookup {
	Hit(Vec<u8>),
	Miss,
	Expired,
}

/// Least-recently-used session map with per-entry expiry.
///
/// Recency is kept in a queue of `(key, stamp)` pairs; entries whose stamp
/// no longer matches are skipped on eviction.
pub(crate) struct SessionLru {
	entries: HashMap<Vec<u8>, Entry>,
	order: VecDeque<(Vec<u8>, u64)>,
	next_stamp: u64,
	capacity: usize,
	timeout: Duration,
}

impl SessionLru {
	pub(crate) fn new(capacity: usize, timeout_secs: u32) -> Self {
		Self {
			entries: HashMap::new(),
			order: VecDeque::new(),
			next_stamp: 0,
			capacity,
			timeout: Duration::from_secs(timeout_secs as u64),
		}
	}

	pub(crate) fn len(&self) -> usize {
		self.entries.len()
	}

	pub(crate) fn set_capacity(&mut self, capacity: usize) -> usize {
		self.capacity = capacity;
		self.evict_to(capacity)
	}

	pub(crate) fn set_timeout(&mut self, timeout_secs: u32) {
		self.timeout = Duration::from_secs(timeout_secs as u64);
	}

	pub(crate) fn clear(&mut self) {
		self.entries.clear();
		self.order.clear();
	}

	fn touch(&mut self, key: &[u8]) -> u64 {
		if self.order.len() > 2 * self.entries.len() + 64 {
			let entries = &self.entries;
			self.order.retain(|(k, s)| entries.get(k).is_some_and(|e| e.stamp == *s));
		}
		let stamp = self.next_stamp;
		self.next_stamp += 1;
		self.order.push_back((key.to_vec(), stamp));
		stamp
	}

	/// Drops least recently used entries until at most `limit` remain.
	fn evict_to(&mut self, limit: usize) -> usize {
		let mut evicted = 0;
		while self.entries.len() > limit {
			let Some((key, stamp)) = self.order.pop_front() else {
				break;
			};
			if self.entries.get(&key).is_some_and(|e| e.stamp == stamp) {
				self.entries.remove(&key);
				evicted += 1;
			}
		}
		evicted
	}

	/// Inserts a session; returns how many older sessions were evicted.
	pub(crate) fn put(&mut self, key: Vec<u8>, value: Vec<u8>) -> usize {
		if self.capacity == 0 {
			return 0;
		}
		let evicted = if self.entries.contains_key(&key) { 0 } else { self.evict_to(self.capacity - 1) };
		let stamp = self.touch(&key);
		self.entries.insert(key, Entry { value, created: Instant::now(), stamp });
		evicted
	}

	pub(crate) fn get(&mut self, key: &[u8]) -> Lookup {
		let expired = match self.entries.get(key) {
			None => return Lookup::Miss,
			Some(entry) => entry.created.elapsed() > self.timeout,
		};
		if expired {
			self.entries.remove(key);
			return Lookup::Expired;
		}
		let stamp = self.touch(key);
		match self.entries.get_mut(key) {
			Some(entry) => {
				entry.stamp = stamp;
				Lookup::Hit(entry.value.clone())
			}
			None => Lookup::Miss,
		}
	}

	pub(crate) fn take(&mut self, key: &[u8]) -> Lookup {
		match self.entries.remove(key) {
			None => Lookup::Miss,
			Some(entry) if entry.created.elapsed() > self.timeout => Lookup::Expired,
			Some(entry) => Lookup::Hit(entry.value),
		}
	}
}

/// rustls session storage dispatching on the context's cache mode.
pub(crate) struct SessionStore {
	pub(crate) shared: Arc<Shared>,
}

impl std::fmt::Debug for SessionStore {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("SessionStore").finish_non_exhaustive()
	}
}

impl SessionStore {
	fn mode(&self) -> CacheMode {
		self.shared.state.read().cache_mode.clone()
	}

	/// `key` bound to the context's session id context.
	fn scoped(&self, key: &[u8]) -> Vec<u8> {
		let state = self.shared.state.read();
		let mut scoped = Vec::with_capacity(state.session_id_context.len() + key.len());
		scoped.extend_from_slice(&state.session_id_context);
		scoped.extend_from_slice(key);
		scoped
	}

	fn anti_replay(&self) -> bool {
		self.shared.state.read().anti_replay
	}

	fn account(&self, lookup: Lookup) -> Option<Vec<u8>> {
		let counters = &self.shared.counters;
		match lookup {
			Lookup::Hit(value) => Some(value),
			Lookup::Miss => {
				counters.incr(Counter::Misses);
				None
			}
			Lookup::Expired => {
				counters.incr(Counter::Timeouts);
				counters.incr(Counter::Misses);
				None
			}
		}
	}

	fn external_get(&self, cache: &dyn SessionCache, key: &[u8]) -> Option<Vec<u8>> {
		match cache.get(key) {
			Some(value) => {
				self.shared.counters.incr(Counter::CbHits);
				Some(value)
			}
			None => {
				self.shared.counters.incr(Counter::Misses);
				None
			}
		}
	}
}

impl StoresServerSessions for SessionStore {
	fn put(&self, key: Vec<u8>, value: Vec<u8>) -> bool {
		let key = self.scoped(&key);
		match self.mode() {
			CacheMode::Off => false,
			CacheMode::Internal => {
				let evicted = self.shared.cache.lock().put(key, value);
				for _ in 0..evicted {
					self.shared.counters.incr(Counter::CacheFull);
				}
				true
			}
			CacheMode::External(cache) => {
				cache.add(&key, &value);
				true
			}
		}
	}

	fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
		let key = self.scoped(key);
		match self.mode() {
			CacheMode::Off => None,
			CacheMode::Internal => {
				let lookup = self.shared.cache.lock().get(&key);
				self.account(lookup)
			}
			CacheMode::External(cache) => self.external_get(cache.as_ref(), &key),
		}
	}

	/// Single-use lookup; a plain `get` when anti-replay is off.
	fn take(&self, key: &[u8]) -> Option<Vec<u8>> {
		if !self.anti_replay() {
			return self.get(key);
		}
		let key = self.scoped(key);
		match self.mode() {
			CacheMode::Off => None,
			CacheMode::Internal => {
				let lookup = self.shared.cache.lock().take(&key);
				self.account(lookup)
			}
			CacheMode::External(cache) => {
				let value = self.external_get(cache.as_ref(), &key)?;
				cache.remove(&key);
				Some(value)
			}
		}
	}

	fn can_cache(&self) -> bool {
		!matches!(self.mode(), CacheMode::Off)
	}
}
