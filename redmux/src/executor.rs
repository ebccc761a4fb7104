//! Single-threaded callback executor over epoll.
//!
//! The [`Executor`] owns one epoll instance and a fixed-capacity table of
//! callback slots. User code arms a callback against a [`Trigger`]
//! (readable/writable interest on a descriptor) and receives a move-only
//! [`Callback`] handle; dropping the handle is the only cancellation
//! mechanism and deregisters the epoll entry before the destructor
//! returns. One thread, no locks: the only suspension point in the whole
//! crate is the `epoll_wait` inside [`Executor::poll_once`].
//!
//! # Dispatch tokens
//!
//! The epoll user tag is not a pointer. It packs a slot index and a
//! per-slot generation counter into the `u64`, so a handle can move freely
//! in memory without re-arming anything, and a slot that is freed and
//! reused cannot be confused with its previous occupant — even inside a
//! single dispatch batch. Stale tokens are simply skipped.
//!
//! # Reentrancy
//!
//! During dispatch the closure is moved out of its slot for the call and
//! restored only if the slot's generation is unchanged. A callback may
//! therefore cancel sibling registrations (by dropping handles it owns)
//! or create new ones when it holds a `&'static` executor reference; new
//! registrations take effect on the next [`Executor::poll_once`].

use std::cell::RefCell;
use std::os::fd::{BorrowedFd, RawFd};
use std::thread;
use std::time::{Duration, Instant};

use nix::errno::Errno;
use nix::sys::epoll::{Epoll, EpollCreateFlags, EpollEvent, EpollFlags, EpollTimeout};
use tracing::{debug, trace};

use crate::error::{ExecResult, ExecutorError};

/// Maximum number of simultaneously live callback registrations.
///
/// Two registrations per media direction times the redundancy factor
/// leaves ample margin at 16.
pub const MAX_CALLBACKS: usize = 16;

/// Readiness condition a callback is armed against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// Fire when the descriptor becomes readable.
    Readable(RawFd),
    /// Fire when the descriptor becomes writable.
    Writable(RawFd),
}

impl Trigger {
    fn fd(self) -> RawFd {
        match self {
            Self::Readable(fd) | Self::Writable(fd) => fd,
        }
    }

    fn interest(self) -> EpollFlags {
        match self {
            Self::Readable(_) => EpollFlags::EPOLLIN,
            Self::Writable(_) => EpollFlags::EPOLLOUT,
        }
    }
}

/// Boxed unit of deferred work, invoked with the dispatch timestamp.
pub type CallbackFn = Box<dyn FnMut(Instant)>;

/// One entry in the fixed callback table.
///
/// `live` distinguishes a vacant slot from a live slot whose closure is
/// temporarily taken out during dispatch.
struct Slot {
    generation: u32,
    fd: RawFd,
    live: bool,
    func: Option<CallbackFn>,
}

/// Pack a slot index and generation into an epoll user tag.
fn token(index: usize, generation: u32) -> u64 {
    ((generation as u64) << 32) | index as u64
}

/// Inverse of [`token`].
fn untoken(tag: u64) -> (usize, u32) {
    ((tag & 0xFFFF_FFFF) as usize, (tag >> 32) as u32)
}

/// Longest wait one epoll call can express (i32 milliseconds).
const MAX_WAIT: Duration = Duration::from_millis(i32::MAX as u64);

/// Clamp a timeout to the millisecond range epoll accepts.
///
/// Sub-millisecond residuals truncate to an immediate return; anything
/// beyond [`MAX_WAIT`] (~24.8 days) clamps to it, and the caller's loop
/// recomputes.
fn clamp_wait(timeout: Duration) -> EpollTimeout {
    EpollTimeout::try_from(timeout.min(MAX_WAIT)).unwrap_or(EpollTimeout::ZERO)
}

struct Registry {
    slots: heapless::Vec<Slot, MAX_CALLBACKS>,
    active: usize,
}

/// Single-threaded I/O multiplexing executor.
///
/// Owns the epoll handle exclusively; lifetime is scoped to wherever the
/// application instantiates it (typically once, for the process). Not
/// `Sync` — all coordination is cooperative on one thread.
pub struct Executor {
    epoll: Epoll,
    registry: RefCell<Registry>,
}

impl Executor {
    /// Create the executor and its epoll instance.
    ///
    /// A failure here is fatal for the would-be instance: no usable
    /// executor exists, so callers must check before first use.
    pub fn new() -> ExecResult<Self> {
        let epoll = Epoll::new(EpollCreateFlags::EPOLL_CLOEXEC)?;
        Ok(Self {
            epoll,
            registry: RefCell::new(Registry {
                slots: heapless::Vec::new(),
                active: 0,
            }),
        })
    }

    /// Number of live registrations.
    ///
    /// Equals the number of not-yet-dropped [`Callback`] handles at every
    /// observation point.
    pub fn active_count(&self) -> usize {
        self.registry.borrow().active
    }

    /// Arm `func` against `trigger` and return the owning handle.
    ///
    /// The caller must keep the descriptor open for as long as the
    /// returned handle is alive; the registration borrows it, it does not
    /// own it.
    pub fn register_callback(
        &self,
        trigger: Trigger,
        func: impl FnMut(Instant) + 'static,
    ) -> ExecResult<Callback<'_>> {
        let (index, generation) = {
            let mut reg = self.registry.borrow_mut();
            let index = match reg.slots.iter().position(|s| !s.live) {
                Some(i) => i,
                None => {
                    if reg.slots.is_full() {
                        return Err(ExecutorError::CapacityExhausted {
                            capacity: MAX_CALLBACKS,
                        });
                    }
                    let _ = reg.slots.push(Slot {
                        generation: 0,
                        fd: -1,
                        live: false,
                        func: None,
                    });
                    reg.slots.len() - 1
                }
            };
            let slot = &mut reg.slots[index];
            slot.generation = slot.generation.wrapping_add(1);
            slot.fd = trigger.fd();
            slot.live = true;
            slot.func = Some(Box::new(func));
            let generation = slot.generation;
            reg.active += 1;
            (index, generation)
        };

        let event = EpollEvent::new(trigger.interest(), token(index, generation));
        // The descriptor stays open while the registration is alive
        // (caller contract above), so borrowing it here is sound.
        let fd = unsafe { BorrowedFd::borrow_raw(trigger.fd()) };
        if let Err(e) = self.epoll.add(fd, event) {
            let mut reg = self.registry.borrow_mut();
            let slot = &mut reg.slots[index];
            slot.live = false;
            slot.func = None;
            reg.active -= 1;
            return Err(e.into());
        }

        trace!(index, ?trigger, "callback registered");
        Ok(Callback {
            executor: self,
            index,
            generation,
        })
    }

    /// Wait once for readiness and dispatch the ready callbacks.
    ///
    /// Returns the number of callbacks invoked. Behavior by state:
    ///
    /// - zero registrations, no timeout: [`ExecutorError::NothingToAwait`]
    ///   — the call would sleep forever with nothing to wake it;
    /// - zero registrations, with timeout: degrades to a plain sleep for
    ///   that duration and returns `Ok(0)`;
    /// - otherwise: one `epoll_wait`, timeout clamped to the representable
    ///   millisecond range. A zero timeout returns immediately.
    ///
    /// Interruption by a transient signal returns `Ok(0)`; the caller
    /// recomputes the timeout and retries. Any other OS failure is
    /// returned and not retried internally. Ready callbacks are invoked
    /// sequentially in OS-reported order, each stamped with one shared
    /// "now" timestamp.
    pub fn poll_once(&self, timeout: Option<Duration>) -> ExecResult<usize> {
        if self.registry.borrow().active == 0 {
            let Some(t) = timeout else {
                return Err(ExecutorError::NothingToAwait);
            };
            thread::sleep(t);
            return Ok(0);
        }

        let wait_timeout = match timeout {
            None => EpollTimeout::NONE,
            Some(t) => clamp_wait(t),
        };

        let mut events = [EpollEvent::empty(); MAX_CALLBACKS];
        let ready = match self.epoll.wait(&mut events, wait_timeout) {
            Ok(n) => n,
            // A transient signal is not an error; zero events, retry above.
            Err(Errno::EINTR) => return Ok(0),
            Err(e) => return Err(e.into()),
        };

        let now = Instant::now();
        let mut dispatched = 0;
        for event in events.iter().take(ready) {
            let (index, generation) = untoken(event.data());
            // Take the closure out of its slot so the callback may
            // register or cancel other registrations while it runs.
            let taken = {
                let mut reg = self.registry.borrow_mut();
                match reg.slots.get_mut(index) {
                    Some(s) if s.live && s.generation == generation => s.func.take(),
                    // Cancelled earlier in this batch, or a stale token.
                    _ => None,
                }
            };
            let Some(mut func) = taken else { continue };
            func(now);
            dispatched += 1;

            let mut reg = self.registry.borrow_mut();
            if let Some(slot) = reg.slots.get_mut(index) {
                if slot.live && slot.generation == generation {
                    slot.func = Some(func);
                }
            }
        }

        trace!(ready, dispatched, "poll cycle");
        Ok(dispatched)
    }

    /// Tear down one registration. Called from [`Callback::drop`] only.
    fn deregister(&self, index: usize, generation: u32) {
        let fd = {
            let mut reg = self.registry.borrow_mut();
            let Some(slot) = reg.slots.get_mut(index) else {
                return;
            };
            if !slot.live || slot.generation != generation {
                return;
            }
            slot.live = false;
            slot.func = None;
            let fd = slot.fd;
            reg.active -= 1;
            fd
        };

        // Best effort: if the owner already closed the descriptor the
        // kernel dropped the entry itself and delete reports EBADF.
        let borrowed = unsafe { BorrowedFd::borrow_raw(fd) };
        if let Err(e) = self.epoll.delete(borrowed) {
            debug!(fd, error = %e, "epoll entry already gone on deregistration");
        }
    }
}

/// Live association between a callback and an armed epoll entry.
///
/// Move-only: exactly one owner at a time, because the registration is a
/// physical resource (an epoll entry plus a table slot). Moving the handle
/// is free — the epoll tag is a stable index, not an address — and
/// preserves exactly-once dispatch. Dropping the handle deregisters
/// synchronously; there is no other cancellation mechanism and no
/// quiescence period, because there is only one thread.
#[must_use = "dropping the handle cancels the registration"]
pub struct Callback<'e> {
    executor: &'e Executor,
    index: usize,
    generation: u32,
}

impl std::fmt::Debug for Callback<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Callback")
            .field("index", &self.index)
            .field("generation", &self.generation)
            .finish()
    }
}

impl Drop for Callback<'_> {
    fn drop(&mut self) {
        self.executor.deregister(self.index, self.generation);
    }
}
