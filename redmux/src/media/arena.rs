//! Fixed-capacity staging pool for outgoing payloads.
//!
//! Every buffer is allocated once at construction; afterwards the pool
//! only recycles. Exhaustion is a distinguished `None`, not an error —
//! the caller backs off the same way it does on a would-block push.

use std::cell::RefCell;
use std::ops::{Deref, DerefMut};

/// Number of transmit buffers each media pre-allocates.
pub const TX_POOL_DEPTH: usize = 8;

/// Pool of MTU-sized byte buffers with deterministic allocation behavior.
pub struct TxArena {
    mtu: usize,
    free: RefCell<heapless::Vec<Box<[u8]>, TX_POOL_DEPTH>>,
}

impl TxArena {
    /// Pre-allocate [`TX_POOL_DEPTH`] buffers of `mtu` bytes each.
    pub fn new(mtu: usize) -> Self {
        let mut free = heapless::Vec::new();
        for _ in 0..TX_POOL_DEPTH {
            let _ = free.push(vec![0u8; mtu].into_boxed_slice());
        }
        Self {
            mtu,
            free: RefCell::new(free),
        }
    }

    /// Buffer size this pool hands out.
    pub fn mtu(&self) -> usize {
        self.mtu
    }

    /// Buffers currently available for allocation.
    pub fn available(&self) -> usize {
        self.free.borrow().len()
    }

    /// Lease one buffer, or `None` when the pool is exhausted.
    pub fn allocate(&self) -> Option<TxBuffer<'_>> {
        let buf = self.free.borrow_mut().pop()?;
        Some(TxBuffer {
            arena: self,
            buf: Some(buf),
        })
    }

    fn recycle(&self, buf: Box<[u8]>) {
        let _ = self.free.borrow_mut().push(buf);
    }
}

impl std::fmt::Debug for TxArena {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TxArena")
            .field("mtu", &self.mtu)
            .field("available", &self.available())
            .finish()
    }
}

/// Exclusive lease on one pool buffer; returns to the pool on drop.
///
/// Move-only, single owner — the ownership model of every resource in
/// this crate.
pub struct TxBuffer<'a> {
    arena: &'a TxArena,
    buf: Option<Box<[u8]>>,
}

impl Deref for TxBuffer<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        // Invariant: `buf` is Some until drop.
        self.buf.as_deref().unwrap_or(&[])
    }
}

impl DerefMut for TxBuffer<'_> {
    fn deref_mut(&mut self) -> &mut [u8] {
        self.buf.as_deref_mut().unwrap_or(&mut [])
    }
}

impl Drop for TxBuffer<'_> {
    fn drop(&mut self) {
        if let Some(buf) = self.buf.take() {
            self.arena.recycle(buf);
        }
    }
}
