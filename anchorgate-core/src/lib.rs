//! Core gatekeeper state and entry points.
//!
//! Holds the three durable records of the system (the admin capability,
//! the committed Merkle root, and the prepared verifying key) plus the
//! operations that rotate the latter two and check a submitted membership
//! proof against them.
//!
//! Authorization is capability-based: [`AdminCap`] cannot be constructed or
//! cloned outside [`bootstrap`], so a `&AdminCap` parameter is the entire
//! admin check. The two stores sit behind independent locks; nothing here
//! serializes across them, and a verification racing a pair of rotations
//! may observe the root from before one and the key from after the other.
//! Callers that need both stores at a known generation must re-check and
//! resubmit.

use std::sync::RwLock;

use thiserror::Error;

use anchorgate_verifier as verifier;
pub use anchorgate_verifier::PreparedKey;

/// Failures surfaced by the gate.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum GateError {
    /// The single uniform rejection signal for verification. Malformed
    /// stored root, malformed proof bytes, degenerate bootstrap state, and
    /// a well-formed proof that fails the pairing check all surface as this
    /// value; callers cannot distinguish corrupted stored state from a bad
    /// proof from the outside.
    #[error("invalid membership proof")]
    InvalidProof,

    /// Key rotation received material the pairing library cannot process.
    /// The previous key is left byte-for-byte unchanged.
    #[error("malformed verifying-key material")]
    MalformedVerifyingKey,
}

impl GateError {
    /// Machine-readable error code.
    pub fn error_code(&self) -> &'static str {
        match self {
            GateError::InvalidProof => "PROOF_INVALID",
            GateError::MalformedVerifyingKey => "VK_MALFORMED",
        }
    }
}

/// Unforgeable rotation capability.
///
/// Minted exactly once per deployment by [`bootstrap`] and deliberately
/// neither `Clone` nor `Copy`: whoever holds the value holds the
/// authority, and handing it to a new owner is an ordinary move. There is
/// no identity check anywhere in this crate.
#[derive(Debug)]
pub struct AdminCap {
    _sealed: (),
}

/// Shared holder of the committed Merkle root.
///
/// The root is an opaque byte string; empty is the valid initial state and
/// means "no commitments accepted". Only [`rotate_root`] writes it.
#[derive(Debug, Default)]
pub struct RootStore {
    value: RwLock<Vec<u8>>,
}

impl RootStore {
    /// Snapshot of the current committed root bytes.
    pub fn current(&self) -> Vec<u8> {
        self.value.read().expect("root store lock poisoned").clone()
    }

    pub fn is_empty(&self) -> bool {
        self.value
            .read()
            .expect("root store lock poisoned")
            .is_empty()
    }
}

/// Shared holder of the active verifying key.
///
/// Keeps the raw material alongside the prepared form so the active key
/// can be fingerprinted and compared byte-for-byte. Starts degenerate
/// (no key at all): every verification fails until the first successful
/// rotation. Only [`rotate_verifying_key`] writes it.
#[derive(Debug, Default)]
pub struct KeyStore {
    slot: RwLock<KeySlot>,
}

#[derive(Debug, Default)]
struct KeySlot {
    raw: Vec<u8>,
    prepared: Option<PreparedKey>,
}

impl KeyStore {
    /// Raw material of the active key; empty while degenerate.
    pub fn raw_bytes(&self) -> Vec<u8> {
        self.slot.read().expect("key store lock poisoned").raw.clone()
    }

    /// True until the first successful key rotation.
    pub fn is_degenerate(&self) -> bool {
        self.slot
            .read()
            .expect("key store lock poisoned")
            .prepared
            .is_none()
    }

    /// Public-input count of the active key, if one is set.
    pub fn public_input_len(&self) -> Option<usize> {
        self.slot
            .read()
            .expect("key store lock poisoned")
            .prepared
            .as_ref()
            .map(PreparedKey::public_input_len)
    }
}

/// One-time setup executed by the embedding platform at deployment.
///
/// Mints the single [`AdminCap`] for the deployer and publishes the two
/// stores, root empty and key degenerate. Running it more than once is a
/// platform-level violation this crate does not defend against.
pub fn bootstrap() -> (AdminCap, RootStore, KeyStore) {
    (
        AdminCap { _sealed: () },
        RootStore::default(),
        KeyStore::default(),
    )
}

/// Replace the committed root.
///
/// Unconditional overwrite: no validation, no history. Any proof generated
/// against the previous root becomes unverifiable the moment this returns;
/// rotation and in-flight proof submission race, and a proof is always
/// judged against the root visible at verification time.
pub fn rotate_root(_admin: &AdminCap, store: &RootStore, new_root: Vec<u8>) {
    *store.value.write().expect("root store lock poisoned") = new_root;
}

/// Replace the active verifying key.
///
/// The raw bytes are processed once into the prepared form used for
/// repeated verification. All-or-nothing: preparation happens before the
/// write lock is taken, so malformed material never touches the slot.
pub fn rotate_verifying_key(
    _admin: &AdminCap,
    store: &KeyStore,
    vk_bytes: &[u8],
) -> Result<(), GateError> {
    let prepared = verifier::prepare_verifying_key(vk_bytes)
        .map_err(|_| GateError::MalformedVerifyingKey)?;
    let mut slot = store.slot.write().expect("key store lock poisoned");
    slot.raw = vk_bytes.to_vec();
    slot.prepared = Some(prepared);
    Ok(())
}

/// The sole trust decision of the system.
///
/// Checks the submitted proof against the live root and key. Read-only on
/// both stores and stateless per call; the root is snapshotted before the
/// key lock is taken, so the two reads are not a cross-store transaction.
///
/// An empty root and an unset key reject explicitly, before the pairing
/// library is ever invoked: the degenerate bootstrap state accepts
/// nothing by construction, not by accident of encoding.
pub fn verify_membership(
    root_store: &RootStore,
    key_store: &KeyStore,
    proof_bytes: &[u8],
) -> Result<(), GateError> {
    let root = root_store.current();
    if root.is_empty() {
        return Err(GateError::InvalidProof);
    }
    let public_inputs =
        verifier::public_inputs_from_bytes(&root).map_err(|_| GateError::InvalidProof)?;
    let proof =
        verifier::proof_points_from_bytes(proof_bytes).map_err(|_| GateError::InvalidProof)?;

    let slot = key_store.slot.read().expect("key store lock poisoned");
    let prepared = slot.prepared.as_ref().ok_or(GateError::InvalidProof)?;
    if verifier::verify(prepared, &public_inputs, &proof) {
        Ok(())
    } else {
        Err(GateError::InvalidProof)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use anchorgate_test_fixtures::fixtures;

    use super::*;

    #[test]
    fn root_rotation_is_pure_overwrite() {
        let (admin, root_store, _keys) = bootstrap();
        for sample in [
            Vec::new(),
            vec![0u8],
            vec![0xab; 7],
            vec![0x11; 32],
            vec![0xfe; 129],
        ] {
            rotate_root(&admin, &root_store, sample.clone());
            assert_eq!(root_store.current(), sample);
        }
    }

    #[test]
    fn bootstrap_state_is_degenerate() {
        let (_admin, root_store, key_store) = bootstrap();
        assert!(root_store.is_empty());
        assert!(key_store.is_degenerate());
        assert!(key_store.raw_bytes().is_empty());
    }

    #[test]
    fn degenerate_bootstrap_state_rejects_any_proof() {
        let (_admin, root_store, key_store) = bootstrap();
        for proof in [&[][..], &[0u8; 32][..], fixtures().first().proof_bytes()] {
            assert_eq!(
                verify_membership(&root_store, &key_store, proof),
                Err(GateError::InvalidProof)
            );
        }
    }

    #[test]
    fn empty_root_rejects_even_with_live_key() {
        let (admin, root_store, key_store) = bootstrap();
        rotate_verifying_key(&admin, &key_store, fixtures().vk_bytes()).unwrap();
        assert_eq!(
            verify_membership(&root_store, &key_store, fixtures().first().proof_bytes()),
            Err(GateError::InvalidProof)
        );
    }

    #[test]
    fn degenerate_key_rejects_even_with_live_root() {
        let (admin, root_store, key_store) = bootstrap();
        rotate_root(&admin, &root_store, fixtures().first().root_bytes().to_vec());
        assert_eq!(
            verify_membership(&root_store, &key_store, fixtures().first().proof_bytes()),
            Err(GateError::InvalidProof)
        );
    }

    #[test]
    fn fixture_proof_verifies_and_is_idempotent() {
        let fx = fixtures();
        let (admin, root_store, key_store) = bootstrap();
        rotate_root(&admin, &root_store, fx.first().root_bytes().to_vec());
        rotate_verifying_key(&admin, &key_store, fx.vk_bytes()).unwrap();

        assert_eq!(
            verify_membership(&root_store, &key_store, fx.first().proof_bytes()),
            Ok(())
        );
        // Verification mutates nothing; an identical call decides identically.
        assert_eq!(
            verify_membership(&root_store, &key_store, fx.first().proof_bytes()),
            Ok(())
        );
    }

    #[test]
    fn stale_proof_fails_after_root_rotation() {
        let fx = fixtures();
        let (admin, root_store, key_store) = bootstrap();
        rotate_root(&admin, &root_store, fx.first().root_bytes().to_vec());
        rotate_verifying_key(&admin, &key_store, fx.vk_bytes()).unwrap();
        assert_eq!(
            verify_membership(&root_store, &key_store, fx.first().proof_bytes()),
            Ok(())
        );

        rotate_root(&admin, &root_store, fx.second().root_bytes().to_vec());
        assert_eq!(
            verify_membership(&root_store, &key_store, fx.first().proof_bytes()),
            Err(GateError::InvalidProof)
        );
        // The proof matching the new root is accepted in its place.
        assert_eq!(
            verify_membership(&root_store, &key_store, fx.second().proof_bytes()),
            Ok(())
        );
    }

    #[test]
    fn key_rotation_invalidates_proofs_from_other_setup() {
        let fx = fixtures();
        let (admin, root_store, key_store) = bootstrap();
        rotate_root(&admin, &root_store, fx.first().root_bytes().to_vec());
        rotate_verifying_key(&admin, &key_store, fx.alt_vk_bytes()).unwrap();
        assert_eq!(
            verify_membership(&root_store, &key_store, fx.first().proof_bytes()),
            Err(GateError::InvalidProof)
        );
    }

    #[test]
    fn malformed_key_rotation_is_atomic() {
        let fx = fixtures();
        let (admin, _roots, key_store) = bootstrap();
        rotate_verifying_key(&admin, &key_store, fx.vk_bytes()).unwrap();
        let before = key_store.raw_bytes();

        for garbage in [&[][..], &[0u8; 8][..], &[0x5a; 512][..]] {
            assert_eq!(
                rotate_verifying_key(&admin, &key_store, garbage),
                Err(GateError::MalformedVerifyingKey)
            );
        }
        assert_eq!(key_store.raw_bytes(), before);
        assert!(!key_store.is_degenerate());
    }

    #[test]
    fn malformed_key_rotation_on_degenerate_store_stays_degenerate() {
        let (admin, _roots, key_store) = bootstrap();
        assert_eq!(
            rotate_verifying_key(&admin, &key_store, &[0xcc; 33]),
            Err(GateError::MalformedVerifyingKey)
        );
        assert!(key_store.is_degenerate());
    }

    #[test]
    fn malformed_proof_bytes_reject_uniformly() {
        let fx = fixtures();
        let (admin, root_store, key_store) = bootstrap();
        rotate_root(&admin, &root_store, fx.first().root_bytes().to_vec());
        rotate_verifying_key(&admin, &key_store, fx.vk_bytes()).unwrap();

        let mut truncated = fx.first().proof_bytes().to_vec();
        truncated.truncate(truncated.len() / 2);
        for proof in [&[][..], &[0xffu8; 64][..], &truncated[..]] {
            assert_eq!(
                verify_membership(&root_store, &key_store, proof),
                Err(GateError::InvalidProof)
            );
        }
    }

    #[test]
    fn ragged_root_rejects_at_verification_time() {
        let fx = fixtures();
        let (admin, root_store, key_store) = bootstrap();
        rotate_verifying_key(&admin, &key_store, fx.vk_bytes()).unwrap();

        // Rotation accepts any byte string; the shape is only judged when a
        // proof is checked against it.
        rotate_root(&admin, &root_store, vec![0x01; 31]);
        assert_eq!(root_store.current(), vec![0x01; 31]);
        assert_eq!(
            verify_membership(&root_store, &key_store, fx.first().proof_bytes()),
            Err(GateError::InvalidProof)
        );

        // A non-canonical 32-byte chunk is equally an invalid proof.
        rotate_root(&admin, &root_store, vec![0xff; 32]);
        assert_eq!(
            verify_membership(&root_store, &key_store, fx.first().proof_bytes()),
            Err(GateError::InvalidProof)
        );
    }

    #[test]
    fn concurrent_rotations_leave_single_winner_per_store() {
        let fx = fixtures();
        let (admin, root_store, key_store) = bootstrap();
        let admin = Arc::new(admin);
        let root_store = Arc::new(root_store);
        let key_store = Arc::new(key_store);

        let root_a = fx.first().root_bytes().to_vec();
        let root_b = fx.second().root_bytes().to_vec();
        let vk_a = fx.vk_bytes().to_vec();
        let vk_b = fx.alt_vk_bytes().to_vec();

        let root_writer = {
            let admin = Arc::clone(&admin);
            let root_store = Arc::clone(&root_store);
            let (root_a, root_b) = (root_a.clone(), root_b.clone());
            thread::spawn(move || {
                for round in 0..50 {
                    let next = if round % 2 == 0 { &root_a } else { &root_b };
                    rotate_root(&admin, &root_store, next.clone());
                }
            })
        };
        let key_writer = {
            let admin = Arc::clone(&admin);
            let key_store = Arc::clone(&key_store);
            let (vk_a, vk_b) = (vk_a.clone(), vk_b.clone());
            thread::spawn(move || {
                for round in 0..50 {
                    let next = if round % 2 == 0 { &vk_a } else { &vk_b };
                    rotate_verifying_key(&admin, &key_store, next).unwrap();
                }
            })
        };
        let reader = {
            let root_store = Arc::clone(&root_store);
            let key_store = Arc::clone(&key_store);
            let proof = fx.first().proof_bytes().to_vec();
            thread::spawn(move || {
                // Mixed-generation observations are allowed; panics are not.
                for _ in 0..200 {
                    let _ = verify_membership(&root_store, &key_store, &proof);
                }
            })
        };

        root_writer.join().unwrap();
        key_writer.join().unwrap();
        reader.join().unwrap();

        // Last writer wins per store, with no torn values.
        let final_root = root_store.current();
        assert!(final_root == root_a || final_root == root_b);
        let final_vk = key_store.raw_bytes();
        assert!(final_vk == vk_a || final_vk == vk_b);
    }
}
