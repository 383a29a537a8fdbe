//! Sequential and scattered id spaces.
//!
//! Ids up to [`MAX_SEQUENTIAL_ID`] come from a plain counter. Larger ids are
//! *scattered*: a second counter whose bits are reversed so that consecutive
//! allocations land far apart in key order.

use crate::error::{StorageError, StorageResult};
use serde::{Deserialize, Serialize};

const MAX_SEQUENTIAL_BIT: u32 = 52;

/// Largest id handed out by the sequential counter.
pub const MAX_SEQUENTIAL_ID: i64 = (1 << MAX_SEQUENTIAL_BIT) - 1;

/// Largest counter value that maps into the scattered id space.
pub const MAX_SCATTERED_COUNTER: i64 = (1 << (MAX_SEQUENTIAL_BIT - 1)) - 1;

/// Largest id in the scattered id space.
pub const MAX_SCATTERED_ID: i64 = MAX_SEQUENTIAL_ID + 1 + MAX_SCATTERED_COUNTER;

const SCATTER_SHIFT: u32 = 64 - MAX_SEQUENTIAL_BIT + 1;

/// The id space an id was allocated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IdSpace {
    /// Plain increasing counter.
    Sequential,
    /// Bit-reversed counter.
    Scattered,
}

/// Reverses the bit order of a 64-bit value.
#[must_use]
pub const fn reverse_bits_u64(v: u64) -> u64 {
    v.reverse_bits()
}

/// Maps a scattered counter value to its id.
///
/// # Errors
///
/// Fails when `counter` is outside `0..MAX_SCATTERED_COUNTER`.
pub fn to_scattered_id(counter: i64) -> StorageResult<i64> {
    if !(0..MAX_SCATTERED_COUNTER).contains(&counter) {
        return Err(StorageError::invalid_argument(format!(
            "counter value too large ({counter})"
        )));
    }
    let reversed = reverse_bits_u64((counter as u64) << SCATTER_SHIFT);
    // The shifted counter occupies bits 13..63, so the reversed value fits in 51 bits.
    Ok(MAX_SEQUENTIAL_ID + 1 + reversed as i64)
}

/// Maps an id back to the counter value and id space that produced it.
///
/// Ids above [`MAX_SCATTERED_ID`] report counter 0 of the scattered space.
///
/// # Errors
///
/// Fails for ids that are zero or negative.
pub fn id_to_counter(id: i64) -> StorageResult<(i64, IdSpace)> {
    if id > MAX_SCATTERED_ID {
        Ok((0, IdSpace::Scattered))
    } else if id > MAX_SEQUENTIAL_ID {
        let counter = reverse_bits_u64(id as u64) >> SCATTER_SHIFT;
        Ok((counter as i64, IdSpace::Scattered))
    } else if id > 0 {
        Ok((id, IdSpace::Sequential))
    } else {
        Err(StorageError::invalid_argument(format!("invalid id ({id})")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn scattered_ids_are_above_sequential_space() {
        for counter in [0, 1, 2, 1000] {
            let id = to_scattered_id(counter).unwrap();
            assert!(id > MAX_SEQUENTIAL_ID);
            assert!(id <= MAX_SCATTERED_ID);
        }
    }

    #[test]
    fn consecutive_counters_scatter() {
        let a = to_scattered_id(1).unwrap();
        let b = to_scattered_id(2).unwrap();
        assert!((a - b).abs() > 1 << 40);
    }

    #[test]
    fn counter_out_of_range() {
        assert!(to_scattered_id(MAX_SCATTERED_COUNTER).is_err());
        assert!(to_scattered_id(-1).is_err());
    }

    #[test]
    fn sequential_and_invalid_ids() {
        assert_eq!(id_to_counter(42).unwrap(), (42, IdSpace::Sequential));
        assert_eq!(
            id_to_counter(MAX_SCATTERED_ID + 1).unwrap(),
            (0, IdSpace::Scattered)
        );
        assert!(id_to_counter(0).is_err());
    }

    proptest! {
        #[test]
        fn scattered_id_maps_back_to_counter(counter in 0..MAX_SCATTERED_COUNTER) {
            let id = to_scattered_id(counter).unwrap();
            prop_assert_eq!(id_to_counter(id).unwrap(), (counter, IdSpace::Scattered));
        }
    }
}
