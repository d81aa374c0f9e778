//! Debug assertion macros for container invariants.
//!
//! Runtime checks of the structural invariants both containers rely on. They
//! are only active in debug builds (`#[cfg(debug_assertions)]`), so there is
//! zero overhead in release builds.

// =============================================================================
// Capacity ordering
// =============================================================================

/// Assert the capacity ladder: `theoretical ≥ actual`.
///
/// The theoretical capacity is raised before the matching arrays exist; the
/// published array length may lag but never lead.
///
/// Used in: `GrowList::push()` after capacity is ensured
macro_rules! debug_assert_capacity_order {
    ($theoretical:expr, $actual:expr) => {
        debug_assert!(
            $theoretical >= $actual,
            "capacity ladder violated: theoretical {} below published length {}",
            $theoretical,
            $actual
        )
    };
}

/// Assert the visible prefix never outruns the published arrays.
///
/// **Invariant**: `fully_added ≤ actual capacity`
///
/// Used in: `GrowList::push()` after the prefix advance
macro_rules! debug_assert_prefix_bounded {
    ($fully_added:expr, $actual:expr) => {
        debug_assert!(
            $fully_added <= $actual,
            "visible prefix {} outruns published length {}",
            $fully_added,
            $actual
        )
    };
}

// =============================================================================
// Prefix advancement
// =============================================================================

/// Assert the prefix counter is only advanced over claimed slots.
///
/// **Invariant**: an advance to `target + 1` requires `target < next_index`,
/// so the counter never passes a slot no appender owns.
///
/// Used in: `GrowList::advance_fully_added()` before each helping CAS
macro_rules! debug_assert_advance_claimed {
    ($target:expr, $claimed:expr) => {
        debug_assert!(
            $target < $claimed,
            "prefix advance over unclaimed slot: target {} with only {} claimed",
            $target,
            $claimed
        )
    };
}

// =============================================================================
// Slot population
// =============================================================================

/// Assert a slot below the visible prefix holds a value.
///
/// **Invariant**: `index < fully_added` implies the slot pointer is non-null;
/// the flag store and the prefix advance both happen after the slot store.
///
/// Used in: `GrowList::read_slot()` before dereferencing
macro_rules! debug_assert_slot_populated {
    ($populated:expr, $index:expr) => {
        debug_assert!(
            $populated,
            "empty slot below the visible prefix at index {}",
            $index
        )
    };
}

// =============================================================================
// Queue payload claim
// =============================================================================

/// Assert a won payload claim actually yielded a payload.
///
/// **Invariant**: `has_value` is true only for nodes constructed with a
/// payload, and flips true→false exactly once, so the winner of that CAS
/// always finds the payload present.
///
/// Used in: `BufferedQueue::try_dequeue()` after winning the claim
macro_rules! debug_assert_taken_payload {
    ($taken:expr) => {
        debug_assert!(
            $taken,
            "payload claim won on a node without a payload"
        )
    };
}

// =============================================================================
// Re-exports for crate-internal use
// =============================================================================

pub(crate) use debug_assert_advance_claimed;
pub(crate) use debug_assert_capacity_order;
pub(crate) use debug_assert_prefix_bounded;
pub(crate) use debug_assert_slot_populated;
pub(crate) use debug_assert_taken_payload;
