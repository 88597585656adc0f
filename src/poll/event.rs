/// Readiness interest / readiness report, in epoll bit values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Interest(pub u32);

impl Interest {
	pub const NONE: Interest = Interest(0);
	pub const READABLE: Interest = Interest(libc::EPOLLIN as u32);
	pub const WRITABLE: Interest = Interest(libc::EPOLLOUT as u32);
	pub const ERROR: Interest = Interest(libc::EPOLLERR as u32);
	pub const HANGUP: Interest = Interest(libc::EPOLLHUP as u32);
	pub const READ_HANGUP: Interest = Interest(libc::EPOLLRDHUP as u32);
	/// Edge-triggered instead of level-triggered.
	pub const EDGE: Interest = Interest(libc::EPOLLET as u32);
	pub const ONESHOT: Interest = Interest(libc::EPOLLONESHOT as u32);

	#[inline]
	pub fn contains(self, other: Interest) -> bool {
		self.0 & other.0 == other.0
	}

	#[inline]
	pub fn is_readable(self) -> bool {
		self.0 & libc::EPOLLIN as u32 != 0
	}

	#[inline]
	pub fn is_writable(self) -> bool {
		self.0 & libc::EPOLLOUT as u32 != 0
	}

	/// Error or hangup: the descriptor is done.
	#[inline]
	pub fn is_closed(self) -> bool {
		self.0 & (libc::EPOLLERR | libc::EPOLLHUP) as u32 != 0
	}
}

impl std::ops::BitOr for Interest {
	type Output = Interest;

	fn bitor(self, rhs: Interest) -> Interest {
		Interest(self.0 | rhs.0)
	}
}

impl std::ops::BitAnd for Interest {
	type Output = Interest;

	fn bitand(self, rhs: Interest) -> Interest {
		Interest(self.0 & rhs.0)
	}
}

impl std::ops::BitOrAssign for Interest {
	fn bitor_assign(&mut self, rhs: Interest) {
		self.0 |= rhs.0;
	}
}

/// One ready descriptor: the registration tag and what it is ready for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Event {
	pub tag: u32,
	pub ready: Interest,
}

/// Storage filled by [`Selector::wait`](super::Selector::wait).
///
/// Besides the events it keeps the CLOCK_MONOTONIC reading taken when the
/// last wait returned.
pub struct EventBuffer {
	pub(super) events: Vec<libc::epoll_event>,
	pub(super) len: usize,
	pub(super) last_wakeup: u64,
}

impl EventBuffer {
	pub fn with_capacity(capacity: usize) -> Self {
		Self {
			events: vec![libc::epoll_event { events: 0, u64: 0 }; capacity.max(1)],
			len: 0,
			last_wakeup: 0,
		}
	}

	pub fn capacity(&self) -> usize {
		self.events.len()
	}

	pub fn len(&self) -> usize {
		self.len
	}

	pub fn is_empty(&self) -> bool {
		self.len == 0
	}

	/// Monotonic nanoseconds at the end of the last wait.
	pub fn last_wakeup_nanos(&self) -> u64 {
		self.last_wakeup
	}

	pub fn get(&self, index: usize) -> Option<Event> {
		if index >= self.len {
			return None;
		}
		let raw = self.events[index];
		let (events, data) = (raw.events, raw.u64);
		Some(Event { tag: data as u32, ready: Interest(events) })
	}

	pub fn iter(&self) -> impl Iterator<Item = Event> + '_ {
		(0..self.len).filter_map(move |i| self.get(i))
	}
}

pub(super) fn monotonic_nanos() -> u64 {
	let mut ts = libc::timespec { tv_sec: 0, tv_nsec: 0 };
	unsafe { libc::clock_gettime(libc::CLOCK_MONOTONIC, &mut ts) };
	ts.tv_sec as u64 * 1_000_000_000 + ts.tv_nsec as u64
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn interest_bits() {
		let both = Interest::READABLE | Interest::WRITABLE;
		assert!(both.is_readable());
		assert!(both.is_writable());
		assert!(both.contains(Interest::READABLE));
		assert!(!Interest::READABLE.contains(both));
		assert!((Interest::HANGUP | Interest::EDGE).is_closed());
	}

	#[test]
	fn empty_buffer() {
		let buf = EventBuffer::with_capacity(4);
		assert_eq!(buf.capacity(), 4);
		assert!(buf.is_empty());
		assert!(buf.get(0).is_none());
	}
}
