//! Error types for the executor and media layer.
//!
//! The taxonomy is deliberate: argument errors (an infinite wait with
//! nothing to wake it) are caller bugs and fail immediately; transient OS
//! interruptions (EINTR) are absorbed inside the poll loop; platform
//! errors carry the OS error code and are never retried internally.
//! Would-block conditions are not errors anywhere in this crate — `push`
//! reports `Ok(false)` and `pop` reports `Ok(None)` so the caller is
//! driven back into the callback-registration path.

use thiserror::Error;

/// Errors produced by the executor and its registration handles.
#[derive(Error, Debug)]
pub enum ExecutorError {
    /// Infinite wait requested while zero callbacks are registered.
    ///
    /// The call would block forever with nothing to wake it, so it is
    /// rejected instead of silently accepted.
    #[error("nothing to wait for and no timeout given")]
    NothingToAwait,

    /// The fixed callback table is full.
    #[error("callback capacity exhausted ({capacity} slots)")]
    CapacityExhausted {
        /// Total number of slots in the table.
        capacity: usize,
    },

    /// Demultiplexer create/arm/wait failure, carrying the OS error code.
    #[error("epoll error: {source}")]
    Os {
        /// Source errno.
        #[from]
        source: nix::Error,
    },
}

/// Errors produced by media endpoints.
#[derive(Error, Debug)]
pub enum MediaError {
    /// Operation on a media whose handles are invalid (never opened, or
    /// left closed by a failed reopen).
    #[error("interface closed: {iface}")]
    Closed {
        /// Interface identifier the media was configured with.
        iface: String,
    },

    /// The interface identifier could not be used to open the endpoint.
    #[error("invalid interface '{iface}': {reason}")]
    InvalidInterface {
        /// Offending identifier.
        iface: String,
        /// What was wrong with it.
        reason: &'static str,
    },

    /// Payload exceeds the transport MTU.
    #[error("payload of {len} bytes exceeds MTU of {mtu}")]
    PayloadTooLarge {
        /// Attempted payload length.
        len: usize,
        /// Transport MTU.
        mtu: usize,
    },

    /// Caller-supplied receive buffer is smaller than the incoming frame.
    #[error("receive buffer of {got} bytes cannot hold {needed}-byte frame")]
    InsufficientBuffer {
        /// Bytes the frame carries.
        needed: usize,
        /// Bytes the buffer provides.
        got: usize,
    },

    /// Socket open/send/receive failure.
    #[error("I/O error: {source}")]
    Io {
        /// Source I/O error.
        #[from]
        source: std::io::Error,
    },
}

/// Result alias for executor operations.
pub type ExecResult<T> = Result<T, ExecutorError>;

/// Result alias for media operations.
pub type MediaResult<T> = Result<T, MediaError>;
