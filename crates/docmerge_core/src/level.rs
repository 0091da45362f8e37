//! Hash-based merge level assignment.
//!
//! A document's `merge_level` is derived from the trailing zero bits of the
//! MD5 digest of its merge key. Each extra zero bit halves the probability,
//! so higher levels are geometrically rarer and a level-`k` document
//! periodically closes a run of lower-level ones.

use crate::config::TOP_MERGE_LEVEL;
use md5::{Digest, Md5};

/// Trailing zero bits of one lowercase hex digit; odd digits have none.
fn digit_zero_bits(digit: u8) -> u32 {
    match digit {
        b'2' | b'6' | b'a' | b'e' => 1,
        b'4' | b'c' => 2,
        b'8' => 3,
        _ => 0,
    }
}

/// Trailing zero bits of the hex digest, counted digit-wise.
fn trailing_zero_bits(digest: &str) -> u32 {
    let mut bits = 0;
    for digit in digest.bytes().rev() {
        if digit == b'0' {
            bits += 4;
        } else {
            return bits + digit_zero_bits(digit);
        }
    }
    bits
}

fn level_for_bits(bits: u32) -> u8 {
    match bits {
        0..=2 => 0,
        3 | 4 => 1,
        5 | 6 => 2,
        7 | 8 => 3,
        9 => 4,
        10 => 5,
        11 => 6,
        _ => TOP_MERGE_LEVEL,
    }
}

/// Maps a merge key to its compaction level in `0..=7`.
///
/// Pure and stateless: the same key always yields the same level.
///
/// # Example
///
/// ```rust
/// use docmerge_core::assign_level;
///
/// assert_eq!(assign_level("hello"), 0);
/// assert!(assign_level("anything") <= 7);
/// ```
pub fn assign_level(merge_key: &str) -> u8 {
    let digest = hex::encode(Md5::digest(merge_key.as_bytes()));
    level_for_bits(trailing_zero_bits(&digest))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn known_keys() {
        // 5d41402abc4b2a76b9719d911017c592: ends in '2', one bit
        assert_eq!(assign_level("hello"), 0);
        // ...c0a99bff6710: one zero digit then '1', four bits
        assert_eq!(assign_level("12"), 1);
        // ...dc714d2d7c41760: one zero digit then '6', five bits
        assert_eq!(assign_level("key62"), 2);
        assert_eq!(assign_level("key94"), 3);
        assert_eq!(assign_level("key530"), 4);
        assert_eq!(assign_level("key919"), 5);
        assert_eq!(assign_level("key929"), 6);
        assert_eq!(assign_level("key8019"), 7);
    }

    #[test]
    fn bit_counting() {
        assert_eq!(trailing_zero_bits("ff"), 0);
        assert_eq!(trailing_zero_bits("f8"), 3);
        assert_eq!(trailing_zero_bits("fc00"), 10);
        assert_eq!(trailing_zero_bits("0000"), 16);
    }

    #[test]
    fn bit_table() {
        let levels: Vec<u8> = (0..=13).map(level_for_bits).collect();
        assert_eq!(levels, vec![0, 0, 0, 1, 1, 2, 2, 3, 3, 4, 5, 6, 7, 7]);
    }

    #[test]
    fn frequency_decays() {
        let mut counts = [0usize; 8];
        for i in 0..20_000 {
            counts[assign_level(&format!("key{i}")) as usize] += 1;
        }
        // P(0) = 7/8, P(1) = 3/32, P(2) = 3/128
        assert!(counts[0] > 16_500 && counts[0] < 18_500);
        assert!(counts[1] > counts[2]);
        assert!(counts[2] > counts[3]);
    }

    proptest! {
        #[test]
        fn level_is_pure_and_bounded(key in ".{0,40}") {
            let level = assign_level(&key);
            prop_assert!(level <= TOP_MERGE_LEVEL);
            prop_assert_eq!(level, assign_level(&key));
        }
    }
}
