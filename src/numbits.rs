//! Compact bitmap codec for sets of non-negative line numbers.
//!
//! A numbits value is a little-endian bitmap: bit `k` of byte `i` represents the integer
//! `8*i + k`. Trailing zero bytes are never emitted, so two numbits values that encode the
//! same set always compare equal byte-for-byte.

use std::collections::BTreeSet;

/// Encodes a set of non-negative integers as a numbits byte string.
pub(crate) fn encode(nums: &BTreeSet<u32>) -> Vec<u8> {
    let Some(&max) = nums.iter().next_back() else {
        return Vec::new();
    };
    let mut bytes = vec![0u8; (max as usize) / 8 + 1];
    for &n in nums {
        bytes[(n as usize) / 8] |= 1 << (n % 8);
    }
    bytes
}

/// Decodes a numbits byte string back into the set of integers it represents.
pub(crate) fn decode(bytes: &[u8]) -> BTreeSet<u32> {
    let mut out = BTreeSet::new();
    for (i, &byte) in bytes.iter().enumerate() {
        if byte == 0 {
            continue;
        }
        for k in 0..8u32 {
            if byte & (1 << k) != 0 {
                out.insert(8 * i as u32 + k);
            }
        }
    }
    out
}

/// Byte-wise OR of two numbits values, padding the shorter side with zero bytes and
/// truncating any trailing zero bytes in the result.
pub(crate) fn union(a: &[u8], b: &[u8]) -> Vec<u8> {
    let len = a.len().max(b.len());
    let mut out = vec![0u8; len];
    for i in 0..len {
        let av = a.get(i).copied().unwrap_or(0);
        let bv = b.get(i).copied().unwrap_or(0);
        out[i] = av | bv;
    }
    while out.last() == Some(&0) {
        out.pop();
    }
    out
}

#[cfg(test)]
mod numbits_test {
    use std::collections::BTreeSet;

    use super::{decode, encode, union};

    fn set(nums: impl IntoIterator<Item = u32>) -> BTreeSet<u32> {
        nums.into_iter().collect()
    }

    #[test]
    fn empty_set_round_trips_to_empty_bytes() {
        let s = set([]);
        assert_eq!(encode(&s), Vec::<u8>::new());
        assert_eq!(decode(&encode(&s)), s);
    }

    #[test]
    fn no_trailing_zero_bytes() {
        let s = set([1, 2, 5]);
        let bytes = encode(&s);
        assert_eq!(bytes, vec![0b0010_0110]);
    }

    #[test]
    fn round_trips_arbitrary_sets() {
        for s in [set([0]), set([7, 8, 9]), set([1, 2, 5, 100, 1000])] {
            assert_eq!(decode(&encode(&s)), s);
        }
    }

    #[test]
    fn union_matches_set_union() {
        let a = set([1, 2, 5]);
        let b = set([2, 3, 100]);
        let combined = decode(&union(&encode(&a), &encode(&b)));
        let expected: BTreeSet<u32> = a.union(&b).copied().collect();
        assert_eq!(combined, expected);
    }

    #[test]
    fn union_is_commutative_and_idempotent() {
        let a = encode(&set([1, 9, 50]));
        let b = encode(&set([2, 9, 200]));
        assert_eq!(union(&a, &b), union(&b, &a));
        assert_eq!(union(&a, &a), a);
    }

    #[test]
    fn union_pads_shorter_side_and_trims_trailing_zeros() {
        let a = encode(&set([1000]));
        let b = encode(&set([1]));
        let combined = union(&a, &b);
        assert_eq!(decode(&combined), set([1, 1000]));
        assert!(combined.last() != Some(&0));
    }

    #[test]
    fn round_trip_and_union_hold_over_random_sets() {
        use rand::Rng;

        let mut rng = rand::thread_rng();
        for _ in 0..200 {
            let a: BTreeSet<u32> = (0..rng.gen_range(0..20)).map(|_| rng.gen_range(0..2000)).collect();
            let b: BTreeSet<u32> = (0..rng.gen_range(0..20)).map(|_| rng.gen_range(0..2000)).collect();
            assert_eq!(decode(&encode(&a)), a);
            let expected: BTreeSet<u32> = a.union(&b).copied().collect();
            assert_eq!(decode(&union(&encode(&a), &encode(&b))), expected);
        }
    }
}
