//! Session-ID derivation (spec §4.B).
//!
//! `SID = SHA256(concat(sorted_by_pid(pid_i)) || concat(nonces_in_same_order))`.
//! Members are sorted lexicographically; nonces follow the permutation that
//! sorts the members, not the input order — this is what gives SID
//! invariance under any reordering of the `(member, nonce)` pairs.

use crate::capability::Crypto;

/// Derive the session ID for `members` paired positionally with `nonces`.
///
/// `nonces` may be shorter than `members` (not every member may have
/// contributed a nonce yet mid-upflow); missing nonces contribute no bytes.
/// Empty PIDs are skipped entirely (never sorted in, never contribute
/// nonce bytes).
pub fn derive_session_id(crypto: &dyn Crypto, members: &[String], nonces: &[Vec<u8>]) -> [u8; 32] {
    let mut indexed: Vec<(usize, &str)> = members
        .iter()
        .enumerate()
        .map(|(i, m)| (i, m.as_str()))
        .filter(|(_, m)| !m.is_empty())
        .collect();
    indexed.sort_by(|a, b| a.1.cmp(b.1));

    let mut buf = Vec::new();
    for (_, pid) in &indexed {
        buf.extend_from_slice(pid.as_bytes());
    }
    for (i, _) in &indexed {
        if let Some(nonce) = nonces.get(*i) {
            buf.extend_from_slice(nonce);
        }
    }
    crypto.sha256(&buf)
}


#[cfg(test)]
mod proptests {
    use super::*;
    use crate::capability::OsRngCrypto;
    use proptest::prelude::*;

    fn distinct_pid_nonce_pairs() -> impl Strategy<Value = Vec<(String, [u8; 4])>> {
        prop::collection::hash_set("[a-z]{1,8}", 1..8).prop_flat_map(|pids| {
            let pids: Vec<String> = pids.into_iter().collect();
            let n = pids.len();
            prop::collection::vec(any::<[u8; 4]>(), n..=n)
                .prop_map(move |nonces| pids.iter().cloned().zip(nonces).collect())
        })
    }

    proptest! {
        /// SID must be invariant under any permutation of the `(member, nonce)`
        /// pairs (spec §4.B, §8).
        #[test]
        fn sid_is_invariant_under_pair_permutation(
            pairs in distinct_pid_nonce_pairs(),
            seed in any::<u64>(),
        ) {
            let crypto = OsRngCrypto;
            let members: Vec<String> = pairs.iter().map(|(m, _)| m.clone()).collect();
            let nonces: Vec<Vec<u8>> = pairs.iter().map(|(_, n)| n.to_vec()).collect();
            let baseline = derive_session_id(&crypto, &members, &nonces);

            // Deterministic shuffle driven by the proptest-generated seed.
            let mut permuted = pairs.clone();
            let mut state = seed;
            for i in (1..permuted.len()).rev() {
                state = state.wrapping_mul(6364136223846793005).wrapping_add(1);
                let j = (state >> 33) as usize % (i + 1);
                permuted.swap(i, j);
            }
            let members_p: Vec<String> = permuted.iter().map(|(m, _)| m.clone()).collect();
            let nonces_p: Vec<Vec<u8>> = permuted.iter().map(|(_, n)| n.to_vec()).collect();

            prop_assert_eq!(baseline, derive_session_id(&crypto, &members_p, &nonces_p));
        }
    }
}
