//! Transport media contract and shared types.
//!
//! A media is one logical network interface endpoint offering non-blocking
//! push/pop of protocol frames. Concrete variants (datagram-oriented
//! [`udp::UdpMedia`], frame-oriented [`can::CanMedia`]) are selected at
//! construction time and all implement the same [`Media`] capability
//! trait, which is what the upper transport layer consumes — including
//! through `&mut dyn Media` for the redundant ensemble.

pub mod arena;
#[cfg(target_os = "linux")]
pub mod can;
pub mod udp;

use std::time::Instant;

use crate::error::{ExecResult, MediaError, MediaResult};
use crate::executor::{Callback, CallbackFn, Executor};
use crate::media::arena::TxArena;

/// Maximum length of a textual interface identifier.
pub const MAX_IFACE_NAME: usize = 48;

/// Metadata of one received frame or datagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RxMetadata {
    /// Receive timestamp (monotonic).
    pub timestamp: Instant,
    /// Transport-level identifier: the raw CAN id for frame media, a
    /// source-endpoint discriminator for datagram media.
    pub id: u32,
    /// Number of payload bytes written into the caller's buffer.
    pub len: usize,
}

/// Acceptance filter for frame-oriented transports.
///
/// A frame is accepted when `received_id & mask == id & mask`. Datagram
/// transports have no filter concept and treat installation as a no-op;
/// they use multicast group membership instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Filter {
    /// Identifier bits to match.
    pub id: u32,
    /// Mask selecting the significant identifier bits.
    pub mask: u32,
}

/// One logical transport endpoint (one network interface).
///
/// Every operation is synchronous and returns immediately; blocking never
/// happens here, only inside the executor's wait. Each media owns two
/// independent OS handles (receive and transmit directions) so read and
/// write readiness register independently.
pub trait Media {
    /// Largest payload one push can carry.
    fn mtu(&self) -> usize;

    /// The textual interface identifier the media was opened from.
    fn iface(&self) -> &str;

    /// Install acceptance filters. No-op for datagram transports.
    fn set_filters(&mut self, filters: &[Filter]) -> MediaResult<()>;

    /// Attempt one non-blocking send.
    ///
    /// Returns `Ok(false)` — not a failure — when the OS would have
    /// blocked; the payload is untouched and the caller retries with
    /// identical bytes once the writable callback fires. A `deadline` in
    /// the past does not force failure by itself; expiration policy
    /// belongs to the layer above.
    fn push(&mut self, deadline: Instant, dest_id: u32, payload: &[u8]) -> MediaResult<bool>;

    /// Attempt one non-blocking receive into `buf`.
    ///
    /// Returns `Ok(None)` — not a failure — when nothing is currently
    /// available.
    fn pop(&mut self, buf: &mut [u8]) -> MediaResult<Option<RxMetadata>>;

    /// Arm `func` against transmit-side writability.
    ///
    /// Returns `Ok(None)` when the media has no valid handle to arm —
    /// graceful capability degradation rather than failure.
    fn register_push_callback<'e>(
        &self,
        executor: &'e Executor,
        func: CallbackFn,
    ) -> ExecResult<Option<Callback<'e>>>;

    /// Arm `func` against receive-side readability. Same degradation
    /// contract as [`Media::register_push_callback`].
    fn register_pop_callback<'e>(
        &self,
        executor: &'e Executor,
        func: CallbackFn,
    ) -> ExecResult<Option<Callback<'e>>>;

    /// Close both handles and make one best-effort attempt to reopen them
    /// from the stored interface identifier.
    ///
    /// Reports nothing and does not retry; on failure the handles stay
    /// invalid so the next push/pop fails with [`MediaError::Closed`].
    /// Reconnection policy is delegated to the owning application loop.
    fn try_reopen(&mut self);

    /// Staging pool for outgoing payload storage.
    fn tx_arena(&self) -> &TxArena;
}

/// Construction seam used by [`crate::collection::MediaSet`].
pub trait OpenMedia: Sized {
    /// Open both direction handles from a textual interface identifier.
    fn open(iface: &str) -> MediaResult<Self>;
}

/// Would-block is a distinguished result, not an error.
pub(crate) fn would_block(err: &std::io::Error) -> bool {
    err.kind() == std::io::ErrorKind::WouldBlock
}

/// Map one non-blocking send attempt onto the push contract.
///
/// Would-block is `Ok(false)`: the caller's bytes were not consumed and
/// may be retried verbatim once the writable callback fires.
pub(crate) fn send_outcome<T>(res: std::io::Result<T>) -> MediaResult<bool> {
    match res {
        Ok(_) => Ok(true),
        Err(e) if would_block(&e) => Ok(false),
        Err(e) => Err(e.into()),
    }
}

/// Bounded copy of an interface identifier, shared by the media variants.
pub(crate) fn iface_name(iface: &str) -> MediaResult<heapless::String<MAX_IFACE_NAME>> {
    let mut name = heapless::String::new();
    name.push_str(iface).map_err(|_| MediaError::InvalidInterface {
        iface: iface.to_string(),
        reason: "identifier too long",
    })?;
    Ok(name)
}
