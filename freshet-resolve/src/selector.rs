//! Deterministic provider ordering.
//!
//! The order for a subject is a rotation of the provider list starting at
//! `hash(subject) % n`. The hash is FNV-1a over the lower-cased subject with
//! a 64-bit finalizer, so it is stable across runs and does not depend on
//! `std`'s randomized hasher.

const FNV_OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// Stable, case-insensitive hash of a subject key.
pub fn subject_hash(subject: &str) -> u64 {
    let mut hash = FNV_OFFSET_BASIS;
    for byte in subject.trim().bytes() {
        hash ^= u64::from(byte.to_ascii_lowercase());
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    // FNV's low bits are weak; mix before reducing modulo a small n.
    hash ^= hash >> 33;
    hash = hash.wrapping_mul(0xff51_afd7_ed55_8ccd);
    hash ^= hash >> 33;
    hash = hash.wrapping_mul(0xc4ce_b9fe_1a85_ec53);
    hash ^= hash >> 33;
    hash
}

/// Providers in the order `subject` should try them.
///
/// Always a permutation of `providers`. Empty in, empty out; callers treat
/// that as "no upstream available".
pub fn order<P: Clone>(subject: &str, providers: &[P]) -> Vec<P> {
    if providers.is_empty() {
        return Vec::new();
    }
    let start = (subject_hash(subject) % providers.len() as u64) as usize;
    let mut ordered = Vec::with_capacity(providers.len());
    ordered.extend_from_slice(&providers[start..]);
    ordered.extend_from_slice(&providers[..start]);
    ordered
}


#[cfg(test)]
mod prop_tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        /// Property: the order is a permutation of the input.
        #[test]
        fn prop_order_is_permutation(
            subject in "[a-zA-Z0-9.\\-]{1,40}",
            providers in prop::collection::vec(0u32..1000, 0..8),
        ) {
            let mut ordered = order(&subject, &providers);
            let mut expected = providers.clone();
            ordered.sort_unstable();
            expected.sort_unstable();
            prop_assert_eq!(ordered, expected);
        }

        /// Property: upper- and lower-case spellings of a subject agree.
        #[test]
        fn prop_case_insensitive(subject in "[a-zA-Z0-9.\\-]{1,40}") {
            let providers = [0u8, 1, 2];
            prop_assert_eq!(
                order(&subject.to_uppercase(), &providers),
                order(&subject.to_lowercase(), &providers)
            );
        }
    }
}
