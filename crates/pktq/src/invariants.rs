//! Debug assertion macros for the transmit-core invariants.
//!
//! Active only under `#[cfg(debug_assertions)]`, so release builds pay
//! nothing. Release builds trust the in-band ring terminator and the
//! single-writer contracts instead.

// =============================================================================
// Pool: slot reuse discipline
// =============================================================================

/// Assert that a pool slot is empty before the producer publishes into it.
///
/// Invariant: slots between the consumer and producer indices are the only
/// occupied ones; the producer never overwrites a live handle.
macro_rules! debug_assert_pool_slot_empty {
    ($slot:expr) => {
        debug_assert!(
            $slot.is_none(),
            "pool slot occupied at publish time (producer overran consumer)"
        )
    };
}

// =============================================================================
// Batch: bounded accumulation
// =============================================================================

/// Assert that a batch never holds more handles than its inline capacity.
///
/// Invariant: `0 <= len <= BATCH_LEN`; the engine flushes before pushing
/// into a full batch.
macro_rules! debug_assert_batch_bounded {
    ($len:expr, $cap:expr) => {
        debug_assert!(
            $len <= $cap,
            "batch length {} exceeds capacity {}",
            $len,
            $cap
        )
    };
}

// =============================================================================
// Ring: stamp progression
// =============================================================================

/// Assert that a ring stamp only moves forward.
///
/// Invariant: `prod` and `cons` are monotonically increasing; the swap
/// protocol never rolls either back.
macro_rules! debug_assert_monotonic {
    ($name:literal, $old:expr, $new:expr) => {
        debug_assert!(
            $new >= $old,
            "{} stamp decreased from {} to {}",
            $name,
            $old,
            $new
        )
    };
}

/// Assert that a descriptor word access stays inside the ring payload.
///
/// Invariant: traversal is bounded by the drained half; the in-band
/// terminator or the half end stops it before this can fire.
macro_rules! debug_assert_word_in_bounds {
    ($off:expr, $len:expr) => {
        debug_assert!(
            $off % 8 == 0 && $off + 8 <= $len,
            "ring word access at byte {} outside payload of {} bytes",
            $off,
            $len
        )
    };
}

pub(crate) use debug_assert_batch_bounded;
pub(crate) use debug_assert_monotonic;
pub(crate) use debug_assert_pool_slot_empty;
pub(crate) use debug_assert_word_in_bounds;
