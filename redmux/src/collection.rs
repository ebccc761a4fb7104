//! Redundant media ensemble.
//!
//! A fixed-capacity set of media endpoints configured from a single
//! whitespace-separated interface list and exposed to the upper transport
//! layer as parallel paths for the same logical traffic. The upper layer
//! pushes and pops identically on every element and tolerates any subset
//! being absent.

use tracing::{debug, warn};

use crate::media::{Media, OpenMedia};

/// Maximum number of redundant interfaces driven in parallel.
pub const REDUNDANCY_FACTOR: usize = 3;

/// Fixed-capacity ensemble of media endpoints.
///
/// The populated slots always form a contiguous, ordered prefix; there
/// are no holes to skip when iterating.
pub struct MediaSet<M: Media + OpenMedia> {
    media: heapless::Vec<M, REDUNDANCY_FACTOR>,
}

impl<M: Media + OpenMedia> MediaSet<M> {
    /// Empty set; populate it with [`MediaSet::parse`].
    pub const fn new() -> Self {
        Self {
            media: heapless::Vec::new(),
        }
    }

    /// Reconfigure the set from a whitespace-separated interface list.
    ///
    /// Idempotent and total: existing slots are reset first, then at most
    /// [`REDUNDANCY_FACTOR`] media are opened from the non-empty tokens,
    /// left to right. Empty tokens consume no slot, tokens beyond
    /// capacity are dropped, and a token whose open fails is skipped —
    /// all three are bounded-resource policy, not errors.
    pub fn parse(&mut self, addresses: &str) {
        self.media.clear();
        for token in addresses.split_whitespace() {
            if self.media.is_full() {
                warn!(
                    dropped = token,
                    "interface list exceeds redundancy capacity; remainder ignored"
                );
                break;
            }
            match M::open(token) {
                Ok(media) => {
                    debug!(iface = token, slot = self.media.len(), "media configured");
                    let _ = self.media.push(media);
                }
                Err(e) => warn!(iface = token, error = %e, "interface skipped"),
            }
        }
    }

    /// The live, ordered prefix of configured media.
    pub fn span(&mut self) -> &mut [M] {
        &mut self.media
    }

    /// Iterate the configured media as trait objects.
    pub fn iter_media(&mut self) -> impl Iterator<Item = &mut dyn Media> {
        self.media.iter_mut().map(|m| m as &mut dyn Media)
    }

    /// Number of configured media.
    pub fn len(&self) -> usize {
        self.media.len()
    }

    /// Whether no media are configured.
    pub fn is_empty(&self) -> bool {
        self.media.is_empty()
    }
}

impl<M: Media + OpenMedia> Default for MediaSet<M> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ExecResult, MediaError, MediaResult};
    use crate::executor::{Callback, CallbackFn, Executor};
    use crate::media::arena::TxArena;
    use crate::media::{iface_name, Filter, RxMetadata, MAX_IFACE_NAME};
    use std::time::Instant;

    /// Media stand-in that records the identifier it was opened with.
    struct StubMedia {
        iface: heapless::String<MAX_IFACE_NAME>,
        arena: TxArena,
    }

    impl OpenMedia for StubMedia {
        fn open(iface: &str) -> MediaResult<Self> {
            if iface == "bad" {
                return Err(MediaError::InvalidInterface {
                    iface: iface.to_string(),
                    reason: "stub rejects this one",
                });
            }
            Ok(Self {
                iface: iface_name(iface)?,
                arena: TxArena::new(16),
            })
        }
    }

    impl Media for StubMedia {
        fn mtu(&self) -> usize {
            16
        }

        fn iface(&self) -> &str {
            self.iface.as_str()
        }

        fn set_filters(&mut self, _filters: &[Filter]) -> MediaResult<()> {
            Ok(())
        }

        fn push(
            &mut self,
            _deadline: Instant,
            _dest_id: u32,
            _payload: &[u8],
        ) -> MediaResult<bool> {
            Ok(true)
        }

        fn pop(&mut self, _buf: &mut [u8]) -> MediaResult<Option<RxMetadata>> {
            Ok(None)
        }

        fn register_push_callback<'e>(
            &self,
            _executor: &'e Executor,
            _func: CallbackFn,
        ) -> ExecResult<Option<Callback<'e>>> {
            Ok(None)
        }

        fn register_pop_callback<'e>(
            &self,
            _executor: &'e Executor,
            _func: CallbackFn,
        ) -> ExecResult<Option<Callback<'e>>> {
            Ok(None)
        }

        fn try_reopen(&mut self) {}

        fn tx_arena(&self) -> &TxArena {
            &self.arena
        }
    }

    fn ifaces(set: &mut MediaSet<StubMedia>) -> Vec<String> {
        set.span().iter().map(|m| m.iface().to_string()).collect()
    }

    #[test]
    fn empty_list_yields_empty_span() {
        let mut set: MediaSet<StubMedia> = MediaSet::new();
        set.parse("");
        assert_eq!(set.len(), 0);
        assert!(set.is_empty());
        assert!(set.span().is_empty());
    }

    #[test]
    fn tokens_beyond_capacity_are_dropped() {
        let mut set: MediaSet<StubMedia> = MediaSet::new();
        set.parse("a b c d");
        assert_eq!(set.len(), REDUNDANCY_FACTOR);
        assert_eq!(ifaces(&mut set), ["a", "b", "c"]);
    }

    #[test]
    fn repeated_separators_consume_no_slot() {
        let mut set: MediaSet<StubMedia> = MediaSet::new();
        set.parse("a  b");
        assert_eq!(ifaces(&mut set), ["a", "b"]);
    }

    #[test]
    fn parse_is_idempotent() {
        let mut set: MediaSet<StubMedia> = MediaSet::new();
        set.parse("a b c");
        set.parse("x y");
        assert_eq!(ifaces(&mut set), ["x", "y"]);
        set.parse("");
        assert!(set.is_empty());
    }

    #[test]
    fn failed_open_consumes_no_slot() {
        let mut set: MediaSet<StubMedia> = MediaSet::new();
        set.parse("a bad c d");
        assert_eq!(ifaces(&mut set), ["a", "c", "d"]);
    }

    #[test]
    fn span_prefix_is_contiguous_and_ordered() {
        let mut set: MediaSet<StubMedia> = MediaSet::new();
        set.parse("one two");
        let names: Vec<_> = set.iter_media().map(|m| m.iface().to_string()).collect();
        assert_eq!(names, ["one", "two"]);
    }
}
