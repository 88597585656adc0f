//! Per-descriptor record of the thread blocked in a syscall.
//!
//! A slot holds the `pthread_t` of the thread currently inside a blocking
//! call on that descriptor, or 0. `close()` swaps the slot to 0 and signals
//! the recorded thread so its syscall returns with EINTR.

use std::sync::atomic::{AtomicU64, Ordering};

/// Signal used to kick a thread out of a blocking syscall.
pub(crate) fn wakeup_signal() -> libc::c_int {
	libc::SIGRTMAX() - 2
}

pub struct BlockingRegistry {
	slots: Box<[AtomicU64]>,
}

impl BlockingRegistry {
	pub fn new(capacity: usize) -> Self {
		let slots = (0..capacity).map(|_| AtomicU64::new(0)).collect::<Vec<_>>();
		Self { slots: slots.into_boxed_slice() }
	}

	pub fn capacity(&self) -> usize {
		self.slots.len()
	}

	fn slot(&self, fd: libc::c_int) -> Option<&AtomicU64> {
		usize::try_from(fd).ok().and_then(|i| self.slots.get(i))
	}

	/// Records the calling thread against `fd` until the returned guard drops.
	///
	/// Descriptors beyond the table are not tracked; closing them cannot
	/// interrupt an in-flight call.
	pub fn begin(&self, fd: libc::c_int) -> BlockingCall<'_> {
		let thread = unsafe { libc::pthread_self() } as u64;
		let slot = self.slot(fd);
		if let Some(slot) = slot {
			slot.store(thread, Ordering::Release);
		}
		BlockingCall { slot, thread }
	}

	/// Interrupts the thread blocked on `fd`, if any.
	///
	/// Returns true if a thread was registered and signalled.
	pub fn interrupt(&self, fd: libc::c_int) -> bool {
		let Some(slot) = self.slot(fd) else {
			return false;
		};
		let thread = slot.swap(0, Ordering::AcqRel);
		if thread == 0 {
			return false;
		}
		log::trace!("interrupting blocked call on fd {}", fd);
		unsafe { libc::pthread_kill(thread as libc::pthread_t, wakeup_signal()) };
		true
	}

	#[cfg(test)]
	fn is_blocked(&self, fd: libc::c_int) -> bool {
		self.slot(fd).is_some_and(|s| s.load(Ordering::Acquire) != 0)
	}
}

/// Registration of one in-flight blocking call. Dropping it ends the call.
#[must_use]
pub struct BlockingCall<'a> {
	slot: Option<&'a AtomicU64>,
	thread: u64,
}

impl Drop for BlockingCall<'_> {
	fn drop(&mut self) {
		if let Some(slot) = self.slot {
			// Leave the slot alone if a concurrent interrupt already cleared it.
			let _ = slot.compare_exchange(self.thread, 0, Ordering::AcqRel, Ordering::Relaxed);
		}
	}
}

/// No-op handler: delivery only has to make the syscall return EINTR.
extern "C" fn wakeup_handler(_sig: libc::c_int) {}

/// Installs the wakeup handler without SA_RESTART.
pub(crate) fn install_wakeup_handler() -> crate::Result<()> {
	unsafe {
		let mut sa: libc::sigaction = std::mem::zeroed();
		sa.sa_sigaction = wakeup_handler as extern "C" fn(libc::c_int) as libc::sighandler_t;
		sa.sa_flags = 0;
		libc::sigemptyset(&mut sa.sa_mask);
		if libc::sigaction(wakeup_signal(), &sa, std::ptr::null_mut()) != 0 {
			return Err(crate::Error::last_os(true));
		}
	}
	Ok(())
}
