//! Single-threaded callback executor and redundant transport media.
//!
//! `redmux` drives a set of non-blocking transport endpoints from one
//! thread: an epoll-backed [`Executor`] dispatches readiness callbacks,
//! and a fixed-capacity [`MediaSet`] fans identical traffic out over up
//! to [`REDUNDANCY_FACTOR`] parallel interfaces so the loss of any
//! single path is invisible to the layer above.
//!
//! ```no_run
//! use std::time::Duration;
//!
//! use redmux::{Executor, Media, MediaSet};
//! use redmux::media::udp::UdpMedia;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let executor = Executor::new()?;
//!     let mut set: MediaSet<UdpMedia> = MediaSet::new();
//!     set.parse("192.168.0.10:9887 192.168.1.10:9887");
//!
//!     let mut handles = Vec::new();
//!     for media in set.span() {
//!         handles.push(media.register_pop_callback(
//!             &executor,
//!             Box::new(|now| println!("readable at {now:?}")),
//!         )?);
//!     }
//!
//!     loop {
//!         executor.poll_once(Some(Duration::from_millis(100)))?;
//!     }
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod collection;
pub mod error;
pub mod executor;
pub mod media;

pub use collection::{MediaSet, REDUNDANCY_FACTOR};
pub use error::{ExecResult, ExecutorError, MediaError, MediaResult};
pub use executor::{Callback, CallbackFn, Executor, Trigger, MAX_CALLBACKS};
pub use media::{Filter, Media, OpenMedia, RxMetadata};
