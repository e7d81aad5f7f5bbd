//! Admission puzzle raising the cost of minting overlay identities.
//!
//! A joining node must find a nonce such that
//! `sha256(node_id ++ ":" ++ decimal(nonce))` rendered as hex starts
//! with `k` zero characters. The preimage is fixed to that exact ascii
//! byte sequence so proofs are reproducible across implementations.

use {
  serde::{Deserialize, Serialize},
  sha2::{Digest, Sha256},
};

/// Solved puzzle carried inside a HELLO.
///
/// The wire shape is exactly `{k, nonce, hash}`. How long the search
/// took is a local observation and never leaves the process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Proof {
  pub k: u32,
  pub nonce: u64,
  pub hash: String,
}

fn digest(node_id: &str, nonce: u64) -> String {
  let mut hasher = Sha256::new();
  hasher.update(node_id.as_bytes());
  hasher.update(b":");
  hasher.update(nonce.to_string().as_bytes());
  hex::encode(hasher.finalize())
}

fn meets_difficulty(hash: &str, k: u32) -> bool {
  let k = k as usize;
  k <= hash.len() && hash.as_bytes()[..k].iter().all(|b| *b == b'0')
}

/// Scans nonces from zero until one satisfies the difficulty.
///
/// CPU bound and unbounded in the worst case. Callers run this off the
/// protocol scheduling context so datagram handling stays responsive
/// during the search.
pub fn compute(node_id: &str, k: u32) -> Proof {
  let mut nonce = 0u64;
  loop {
    let hash = digest(node_id, nonce);
    if meets_difficulty(&hash, k) {
      return Proof { k, nonce, hash };
    }
    nonce += 1;
  }
}

/// Checks a proof presented by `node_id` against the local minimum
/// difficulty. The hash is recomputed from scratch; nothing in the
/// proof is trusted.
pub fn validate(proof: &Proof, node_id: &str, min_k: u32) -> bool {
  proof.k >= min_k
    && meets_difficulty(&proof.hash, proof.k)
    && digest(node_id, proof.nonce) == proof.hash
}

#[cfg(test)]
mod tests {
  use super::*;

  const NODE_ID: &str = "0123456789abcdef0123456789abcdef";

  #[test]
  fn preimage_is_pinned() {
    // sha256("0123456789abcdef0123456789abcdef:0"), computed with an
    // independent implementation. Guards the cross-implementation
    // contract on the hashed byte sequence.
    assert_eq!(
      digest(NODE_ID, 0),
      "ca6f1a8710df6d0d4232f2ea641de69c9807039d58a19336eaacf90510e55478"
    );
  }

  #[test]
  fn computed_proofs_validate() {
    for k in 1..=3 {
      let proof = compute(NODE_ID, k);
      assert_eq!(proof.k, k);
      assert!(validate(&proof, NODE_ID, k));
    }
  }

  #[test]
  fn known_solution_for_k2() {
    let proof = compute(NODE_ID, 2);
    assert_eq!(proof.nonce, 151);
    assert_eq!(
      proof.hash,
      "004083cf62a3d5f8d7733728f99642ea23613c07493657ccc870fce98ca97168"
    );
  }

  #[test]
  fn rejects_proof_below_required_difficulty() {
    let proof = compute(NODE_ID, 1);
    assert!(!validate(&proof, NODE_ID, 2));
  }

  #[test]
  fn rejects_tampered_hash() {
    let mut proof = compute(NODE_ID, 1);
    proof.hash = format!("0{}", &proof.hash[1..]);
    assert!(!validate(&proof, NODE_ID, 1));
  }

  #[test]
  fn rejects_proof_for_another_identity() {
    let proof = compute(NODE_ID, 2);
    assert!(!validate(&proof, "ffffffffffffffffffffffffffffffff", 2));
  }

  #[test]
  fn rejects_hash_not_meeting_claimed_difficulty() {
    // an honest digest for a nonce that does not solve k=1
    let proof = Proof {
      k: 1,
      nonce: 0,
      hash: digest(NODE_ID, 0),
    };
    assert!(!validate(&proof, NODE_ID, 1));
  }
}
