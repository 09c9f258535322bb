//! Per-client rotation state machine.
//!
//! Every client walks its own permutation of the eligible quote ids. The
//! permutation is derived from the client's `rotation_seed` and the eligible
//! id sequence alone, so it is reproducible across restarts:
//!
//! - the same seed and the same eligible set always give the same order
//! - different seeds give independent orders
//! - the order is a bijection over the eligible set, so sweeping the cursor
//!   from `0` to `len - 1` shows every eligible quote exactly once per cycle
//!
//! Catalog changes are picked up lazily. Callers pass the live eligible set to
//! [`ClientState::reconcile`] before each operation; a cheap fingerprint check
//! skips the rebuild when nothing changed.
//!
//! # Example
//!
//! ```
//! use ditto::rotation::{seed_for, ClientState};
//!
//! let eligible: Vec<String> = ["1", "2", "3"].iter().map(|s| s.to_string()).collect();
//! let mut state = ClientState::new("frame-1", 800, 480, seed_for("frame-1"));
//! state.reconcile(&eligible);
//!
//! let first = state.current().unwrap().to_string();
//! state.advance().unwrap();
//! state.retreat().unwrap();
//! assert_eq!(state.current().unwrap(), first);
//! ```

use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::quote::Fnv64;

/// Version of the seeded shuffle. Stored with every client so a future change
/// of algorithm can be detected.
pub const SHUFFLE_VERSION: u32 = 1;

/// Derive a rotation seed from a client's stable name.
///
/// 64-bit FNV-1a, so a client that is re-created after data loss gets the
/// same order back.
pub fn seed_for(client_id: &str) -> u64 {
    let mut hash = Fnv64::new();
    hash.write(client_id.as_bytes());
    hash.finish()
}

/// Fingerprint of an eligible id sequence: count plus the ids in order.
pub fn fingerprint(ids: &[String]) -> u64 {
    let mut hash = Fnv64::new();
    hash.write(&(ids.len() as u64).to_le_bytes());
    for id in ids {
        hash.write(id.as_bytes());
        hash.write(&[0xff]);
    }
    hash.finish()
}

/// Shuffle `ids` into the permutation defined by `seed`.
///
/// Fisher–Yates driven by [`SplitMix64`] with unbiased bounded draws. This is
/// version [`SHUFFLE_VERSION`] of the algorithm; any change to it must bump
/// the version.
pub fn shuffle(seed: u64, ids: &[String]) -> Vec<String> {
    let mut order = ids.to_vec();
    let mut rng = SplitMix64::new(seed);
    for i in (1..order.len()).rev() {
        let j = rng.below(i as u64 + 1) as usize;
        order.swap(i, j);
    }
    order
}

/// SplitMix64 pseudo-random generator.
///
/// Small, fast and fully specified, which is what a reproducible shuffle
/// needs. Not suitable for anything security related.
#[derive(Debug, Clone)]
pub struct SplitMix64 {
    state: u64,
}

impl SplitMix64 {
    /// Create a generator from a seed.
    pub fn new(seed: u64) -> Self {
        Self { state: seed }
    }

    /// Create a generator seeded from the wall clock.
    pub fn from_clock() -> Self {
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0);
        Self::new(nanos)
    }

    /// Next 64-bit output.
    pub fn next_u64(&mut self) -> u64 {
        self.state = self.state.wrapping_add(0x9e37_79b9_7f4a_7c15);
        let mut z = self.state;
        z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
        z ^ (z >> 31)
    }

    /// Uniform value in `[0, bound)`. `bound` must be non-zero.
    pub fn below(&mut self, bound: u64) -> u64 {
        debug_assert!(bound > 0);
        // Largest multiple of `bound` that fits; draws above it are rejected.
        let limit = u64::MAX - u64::MAX % bound;
        loop {
            let x = self.next_u64();
            if x < limit {
                return x % bound;
            }
        }
    }
}

/// Persisted form of a client.
///
/// The rotation order itself is not stored: it is recomputed from the seed
/// and the eligible set on load.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientRecord {
    /// Stable external client name
    pub client_id: String,
    /// Default image width in pixels
    pub width: u32,
    /// Default image height in pixels
    pub height: u32,
    /// Seed of this client's permutation, fixed for its lifetime
    pub rotation_seed: u64,
    /// Shuffle algorithm version the order was built with
    pub shuffle_version: u32,
    /// Cursor into the rotation order
    pub position: usize,
    /// Fingerprint of the eligible set the order was last built from
    pub fingerprint: Option<u64>,
    /// Quote id under the cursor when last saved
    pub current_quote_id: Option<String>,
}

/// Live rotation state for one client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientState {
    client_id: String,
    /// Default image width in pixels
    pub width: u32,
    /// Default image height in pixels
    pub height: u32,
    rotation_seed: u64,
    rotation_order: Vec<String>,
    position: usize,
    fingerprint: Option<u64>,
}

impl ClientState {
    /// Create a fresh client at position 0 with an empty order.
    ///
    /// Call [`reconcile`](Self::reconcile) before using it.
    pub fn new(client_id: impl Into<String>, width: u32, height: u32, rotation_seed: u64) -> Self {
        Self {
            client_id: client_id.into(),
            width,
            height,
            rotation_seed,
            rotation_order: Vec::new(),
            position: 0,
            fingerprint: None,
        }
    }

    /// Rebuild a client from its persisted record against the live eligible set.
    ///
    /// If the catalog changed while the client was not loaded, the cursor is
    /// moved back onto the quote it was showing, or clamped when that quote is
    /// gone.
    pub fn restore(record: ClientRecord, eligible: &[String]) -> Self {
        if record.shuffle_version != SHUFFLE_VERSION {
            tracing::warn!(
                client = %record.client_id,
                stored = record.shuffle_version,
                current = SHUFFLE_VERSION,
                "Client order was built with a different shuffle version"
            );
        }
        let mut state = Self {
            client_id: record.client_id,
            width: record.width,
            height: record.height,
            rotation_seed: record.rotation_seed,
            rotation_order: Vec::new(),
            position: record.position,
            fingerprint: None,
        };
        state.rebuild(eligible, record.current_quote_id.as_deref());
        state
    }

    /// Snapshot for persistence.
    pub fn to_record(&self) -> ClientRecord {
        ClientRecord {
            client_id: self.client_id.clone(),
            width: self.width,
            height: self.height,
            rotation_seed: self.rotation_seed,
            shuffle_version: SHUFFLE_VERSION,
            position: self.position,
            fingerprint: self.fingerprint,
            current_quote_id: self.current().ok().map(str::to_string),
        }
    }

    /// Stable external client name.
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Seed of this client's permutation.
    pub fn rotation_seed(&self) -> u64 {
        self.rotation_seed
    }

    /// Current permutation of eligible quote ids.
    pub fn rotation_order(&self) -> &[String] {
        &self.rotation_order
    }

    /// Cursor into [`rotation_order`](Self::rotation_order).
    pub fn position(&self) -> usize {
        self.position
    }

    /// Bring the order in line with the eligible set.
    ///
    /// Does nothing when the set's fingerprint matches the one the order was
    /// built from. Otherwise regenerates the permutation from the unchanged
    /// seed and keeps the cursor on the same quote id where possible, falling
    /// back to `min(old_position, new_len - 1)`.
    ///
    /// Returns `true` when the order was rebuilt.
    pub fn reconcile(&mut self, eligible: &[String]) -> bool {
        if self.fingerprint == Some(fingerprint(eligible)) {
            return false;
        }
        let anchor = self.current().ok().map(str::to_string);
        self.rebuild(eligible, anchor.as_deref());
        true
    }

    fn rebuild(&mut self, eligible: &[String], anchor: Option<&str>) {
        let old_position = self.position;
        self.rotation_order = shuffle(self.rotation_seed, eligible);
        self.fingerprint = Some(fingerprint(eligible));

        let len = self.rotation_order.len();
        self.position = anchor
            .and_then(|id| self.rotation_order.iter().position(|q| q == id))
            .unwrap_or_else(|| old_position.min(len.saturating_sub(1)));

        tracing::debug!(
            client = %self.client_id,
            len,
            old_position,
            position = self.position,
            "Rebuilt rotation order"
        );
    }

    /// Quote id under the cursor. Never moves the cursor.
    pub fn current(&self) -> Result<&str, Error> {
        self.rotation_order
            .get(self.position)
            .map(String::as_str)
            .ok_or(Error::EmptyCatalog)
    }

    /// Move forward one quote, wrapping to the start of the same permutation.
    pub fn advance(&mut self) -> Result<&str, Error> {
        let len = self.non_empty_len()?;
        self.move_to((self.position + 1) % len, "advance");
        self.current()
    }

    /// Move back one quote, wrapping to the end.
    pub fn retreat(&mut self) -> Result<&str, Error> {
        let len = self.non_empty_len()?;
        self.move_to((self.position + len - 1) % len, "retreat");
        self.current()
    }

    /// Jump to a uniformly random position other than the current one.
    ///
    /// With a single eligible quote the cursor stays where it is.
    pub fn random(&mut self, rng: &mut SplitMix64) -> Result<&str, Error> {
        let len = self.non_empty_len()?;
        if len > 1 {
            let mut target = rng.below(len as u64 - 1) as usize;
            if target >= self.position {
                target += 1;
            }
            self.move_to(target, "random");
        }
        self.current()
    }

    /// Set the cursor directly, validated against the current order.
    ///
    /// On failure the state is left untouched.
    pub fn set_position(&mut self, position: i64) -> Result<(), Error> {
        let len = self.rotation_order.len();
        match usize::try_from(position) {
            Ok(index) if index < len => {
                self.move_to(index, "set");
                Ok(())
            }
            _ => Err(Error::InvalidPosition { position, len }),
        }
    }

    fn non_empty_len(&self) -> Result<usize, Error> {
        match self.rotation_order.len() {
            0 => Err(Error::EmptyCatalog),
            len => Ok(len),
        }
    }

    fn move_to(&mut self, position: usize, reason: &'static str) {
        tracing::debug!(
            client = %self.client_id,
            reason,
            from = self.position,
            to = position,
            "Moved rotation cursor"
        );
        self.position = position;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    fn catalog(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("quote-{:03}", i)).collect()
    }

    fn client(name: &str, eligible: &[String]) -> ClientState {
        let mut state = ClientState::new(name, 800, 480, seed_for(name));
        state.reconcile(eligible);
        state
    }

    #[test]
    fn test_shuffle_is_deterministic() {
        let eligible = catalog(25);
        assert_eq!(shuffle(42, &eligible), shuffle(42, &eligible));

        let a = client("frame-1", &eligible);
        let mut b = ClientState::new("other-name", 800, 480, seed_for("frame-1"));
        b.reconcile(&eligible);
        assert_eq!(a.rotation_order(), b.rotation_order());
    }

    #[test]
    fn test_shuffle_is_a_permutation() {
        let eligible = catalog(50);
        let mut order = shuffle(7, &eligible);
        order.sort();
        assert_eq!(order, eligible);
    }

    #[test]
    fn test_different_seeds_give_different_orders() {
        let eligible = catalog(20);
        let a = client("frame-1", &eligible);
        let b = client("frame-2", &eligible);
        assert_ne!(a.rotation_order(), b.rotation_order());
    }

    #[test]
    fn test_seed_is_stable() {
        assert_eq!(seed_for("frame-1"), seed_for("frame-1"));
        assert_ne!(seed_for("frame-1"), seed_for("frame-2"));
    }

    #[test]
    fn test_full_cycle_visits_every_quote_once() {
        let eligible = catalog(12);
        let mut state = client("kitchen", &eligible);
        let start = state.current().unwrap().to_string();

        let mut seen = vec![start.clone()];
        for _ in 0..eligible.len() - 1 {
            seen.push(state.advance().unwrap().to_string());
        }
        let back_to_start = state.advance().unwrap().to_string();
        assert_eq!(back_to_start, start);

        seen.sort();
        assert_eq!(seen, eligible);
    }

    #[test]
    fn test_three_quote_walkthrough() {
        let eligible = ids(&["1", "2", "3"]);
        let mut state = client("frame-1", &eligible);
        let order = state.rotation_order().to_vec();

        assert_eq!(state.position(), 0);
        assert_eq!(state.current().unwrap(), order[0]);
        assert_eq!(state.advance().unwrap(), order[1]);
        assert_eq!(state.advance().unwrap(), order[2]);
        // The fourth quote shown repeats the first, same permutation
        assert_eq!(state.advance().unwrap(), order[0]);
        assert_eq!(state.rotation_order(), order.as_slice());
    }

    #[test]
    fn test_advance_then_retreat_is_identity() {
        let eligible = catalog(5);
        let mut state = client("hall", &eligible);
        for _ in 0..eligible.len() {
            let position = state.position();
            let current = state.current().unwrap().to_string();
            state.advance().unwrap();
            state.retreat().unwrap();
            assert_eq!(state.position(), position);
            assert_eq!(state.current().unwrap(), current);
            state.advance().unwrap();
        }
    }

    #[test]
    fn test_retreat_wraps_to_end() {
        let eligible = catalog(4);
        let mut state = client("hall", &eligible);
        state.retreat().unwrap();
        assert_eq!(state.position(), 3);
    }

    #[test]
    fn test_random_never_repeats_current() {
        let eligible = catalog(3);
        let mut state = client("desk", &eligible);
        let mut rng = SplitMix64::new(1234);
        for _ in 0..200 {
            let before = state.current().unwrap().to_string();
            let after = state.random(&mut rng).unwrap().to_string();
            assert_ne!(before, after);
        }
    }

    #[test]
    fn test_random_with_single_quote() {
        let eligible = ids(&["only"]);
        let mut state = client("desk", &eligible);
        let mut rng = SplitMix64::new(1);
        assert_eq!(state.random(&mut rng).unwrap(), "only");
        assert_eq!(state.position(), 0);
    }

    #[test]
    fn test_empty_catalog() {
        let mut state = client("desk", &[]);
        let mut rng = SplitMix64::new(1);
        assert!(matches!(state.current(), Err(Error::EmptyCatalog)));
        assert!(matches!(state.advance(), Err(Error::EmptyCatalog)));
        assert!(matches!(state.retreat(), Err(Error::EmptyCatalog)));
        assert!(matches!(state.random(&mut rng), Err(Error::EmptyCatalog)));
    }

    #[test]
    fn test_reconcile_is_lazy() {
        let eligible = catalog(6);
        let mut state = client("desk", &eligible);
        assert!(!state.reconcile(&eligible));
        assert!(state.reconcile(&catalog(7)));
    }

    #[test]
    fn test_reconcile_keeps_current_quote_when_still_eligible() {
        let eligible = catalog(10);
        let mut state = client("desk", &eligible);
        state.advance().unwrap();
        state.advance().unwrap();
        let current = state.current().unwrap().to_string();

        let removed = eligible.iter().find(|id| **id != current).unwrap().clone();
        let shrunk: Vec<String> = eligible.iter().filter(|id| **id != removed).cloned().collect();

        assert!(state.reconcile(&shrunk));
        assert_eq!(state.current().unwrap(), current);
        assert_eq!(state.rotation_order().len(), 9);
    }

    #[test]
    fn test_reconcile_clamps_when_current_quote_removed() {
        let eligible = catalog(5);
        let mut state = client("desk", &eligible);
        state.set_position(4).unwrap();
        let current = state.current().unwrap().to_string();

        let shrunk: Vec<String> = eligible.iter().filter(|id| **id != current).cloned().collect();
        state.reconcile(&shrunk);
        assert_eq!(state.position(), 3);
        assert!(state.current().is_ok());

        state.reconcile(&[]);
        assert_eq!(state.position(), 0);
        assert!(matches!(state.current(), Err(Error::EmptyCatalog)));
    }

    #[test]
    fn test_set_position_validates_range() {
        let eligible = ids(&["1", "2", "3"]);
        let mut state = client("frame-1", &eligible);
        state.advance().unwrap();
        let before = state.clone();

        let err = state.set_position(99).unwrap_err();
        assert!(matches!(err, Error::InvalidPosition { position: 99, len: 3 }));
        assert_eq!(state, before);

        assert!(matches!(
            state.set_position(-1),
            Err(Error::InvalidPosition { .. })
        ));
        assert_eq!(state, before);

        state.set_position(2).unwrap();
        assert_eq!(state.position(), 2);
    }

    #[test]
    fn test_restore_round_trips_unchanged_catalog() {
        let eligible = catalog(8);
        let mut state = client("frame-1", &eligible);
        state.advance().unwrap();
        state.advance().unwrap();

        let restored = ClientState::restore(state.to_record(), &eligible);
        assert_eq!(restored, state);
    }

    #[test]
    fn test_restore_remaps_after_offline_catalog_change() {
        let eligible = catalog(8);
        let mut state = client("frame-1", &eligible);
        state.set_position(5).unwrap();
        let current = state.current().unwrap().to_string();
        let record = state.to_record();

        let mut grown = eligible.clone();
        grown.push("quote-new".to_string());
        grown.sort();

        let restored = ClientState::restore(record, &grown);
        assert_eq!(restored.current().unwrap(), current);
        assert_eq!(restored.rotation_order().len(), 9);
    }

    #[test]
    fn test_below_stays_in_bounds() {
        let mut rng = SplitMix64::new(99);
        for bound in 1..50 {
            for _ in 0..20 {
                assert!(rng.below(bound) < bound);
            }
        }
    }
}
