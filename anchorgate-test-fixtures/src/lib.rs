//! Deterministic Groth16 fixtures shared across the workspace's tests.
//!
//! Builds one tiny fixed-depth Merkle-path circuit (a quadratic mixing
//! hash, sound enough only for tests), runs two independent
//! setups over it, and proves two leaf paths under the first key.
//! Everything is generated once behind a `OnceCell` from
//! `ark_std::test_rng()`, so every test in the workspace sees identical
//! bytes.

use anyhow::{Context, Result};
use ark_bn254::{Bn254, Fr};
use ark_groth16::Groth16;
use ark_relations::{
    lc,
    r1cs::{ConstraintSynthesizer, ConstraintSystemRef, SynthesisError, Variable},
};
use ark_serialize::CanonicalSerialize;
use ark_std::test_rng;
use once_cell::sync::OnceCell;

use anchorgate_verifier::scalar_to_bytes;

/// Depth of the fixture Merkle path.
const TREE_DEPTH: usize = 2;

static FIXTURES: OnceCell<TestFixtures> = OnceCell::new();

/// A committed root together with a proof of membership under it.
pub struct ProofFixture {
    root_bytes: Vec<u8>,
    proof_bytes: Vec<u8>,
}

impl ProofFixture {
    /// Root encoding suitable for the gate's root store (one 32-byte
    /// scalar).
    pub fn root_bytes(&self) -> &[u8] {
        &self.root_bytes
    }

    /// Canonical compressed proof points matching [`Self::root_bytes`].
    pub fn proof_bytes(&self) -> &[u8] {
        &self.proof_bytes
    }
}

/// Pre-generated verifying keys and proof bundles reused across tests.
pub struct TestFixtures {
    vk_bytes: Vec<u8>,
    alt_vk_bytes: Vec<u8>,
    first: ProofFixture,
    second: ProofFixture,
}

impl TestFixtures {
    /// Verifying key both proof fixtures were generated under.
    pub fn vk_bytes(&self) -> &[u8] {
        &self.vk_bytes
    }

    /// Well-formed key from an independent setup of the same circuit;
    /// neither proof fixture verifies under it.
    pub fn alt_vk_bytes(&self) -> &[u8] {
        &self.alt_vk_bytes
    }

    pub fn first(&self) -> &ProofFixture {
        &self.first
    }

    pub fn second(&self) -> &ProofFixture {
        &self.second
    }
}

/// Return lazily constructed fixtures shared across crates.
pub fn fixtures() -> &'static TestFixtures {
    FIXTURES.get_or_init(|| build_fixtures().expect("failed to build anchorgate test fixtures"))
}

/// Proves knowledge of a leaf and sibling path hashing to the public root.
///
/// The per-level hash is `h(l, r) = (l + 3r)^2 + l`, costing one rank-1
/// constraint per level.
#[derive(Clone)]
struct PathCircuit {
    leaf: Option<Fr>,
    siblings: [Option<Fr>; TREE_DEPTH],
}

impl PathCircuit {
    fn blank() -> Self {
        Self {
            leaf: None,
            siblings: [None; TREE_DEPTH],
        }
    }

    fn with_witness(leaf: Fr, siblings: [Fr; TREE_DEPTH]) -> Self {
        Self {
            leaf: Some(leaf),
            siblings: siblings.map(Some),
        }
    }
}

impl ConstraintSynthesizer<Fr> for PathCircuit {
    fn generate_constraints(self, cs: ConstraintSystemRef<Fr>) -> Result<(), SynthesisError> {
        let leaf_var =
            cs.new_witness_variable(|| self.leaf.ok_or(SynthesisError::AssignmentMissing))?;
        let mut node_val = self.leaf;
        let mut node_lc = lc!() + leaf_var;

        for sibling in self.siblings {
            let sibling_var =
                cs.new_witness_variable(|| sibling.ok_or(SynthesisError::AssignmentMissing))?;
            let square_val = match (node_val, sibling) {
                (Some(node), Some(sib)) => {
                    let t = node + sib * Fr::from(3u64);
                    Some(t * t)
                }
                _ => None,
            };
            let square_var =
                cs.new_witness_variable(|| square_val.ok_or(SynthesisError::AssignmentMissing))?;

            // square = (node + 3 * sibling)^2
            let t_lc = node_lc.clone() + (Fr::from(3u64), sibling_var);
            cs.enforce_constraint(t_lc.clone(), t_lc, lc!() + square_var)?;

            node_val = match (node_val, square_val) {
                (Some(node), Some(square)) => Some(node + square),
                _ => None,
            };
            node_lc = node_lc + square_var;
        }

        let root_var =
            cs.new_input_variable(|| node_val.ok_or(SynthesisError::AssignmentMissing))?;
        cs.enforce_constraint(node_lc, lc!() + Variable::One, lc!() + root_var)?;
        Ok(())
    }
}

fn node_hash(left: Fr, right: Fr) -> Fr {
    let t = left + right * Fr::from(3u64);
    t * t + left
}

fn merkle_root(leaf: Fr, siblings: &[Fr; TREE_DEPTH]) -> Fr {
    siblings
        .iter()
        .fold(leaf, |node, sibling| node_hash(node, *sibling))
}

fn build_fixtures() -> Result<TestFixtures> {
    let mut rng = test_rng();

    let pk = Groth16::<Bn254>::generate_random_parameters_with_reduction(
        PathCircuit::blank(),
        &mut rng,
    )
    .context("fixture setup")?;
    let alt_pk = Groth16::<Bn254>::generate_random_parameters_with_reduction(
        PathCircuit::blank(),
        &mut rng,
    )
    .context("alternate fixture setup")?;

    let mut vk_bytes = Vec::new();
    pk.vk
        .serialize_compressed(&mut vk_bytes)
        .context("serialize vk")?;
    let mut alt_vk_bytes = Vec::new();
    alt_pk
        .vk
        .serialize_compressed(&mut alt_vk_bytes)
        .context("serialize alternate vk")?;

    // Deterministic paths keep the fixture bytes stable across runs.
    let first = prove_path(&pk, Fr::from(11u64), [Fr::from(22u64), Fr::from(33u64)], &mut rng)?;
    let second = prove_path(&pk, Fr::from(44u64), [Fr::from(55u64), Fr::from(66u64)], &mut rng)?;

    Ok(TestFixtures {
        vk_bytes,
        alt_vk_bytes,
        first,
        second,
    })
}

fn prove_path(
    pk: &ark_groth16::ProvingKey<Bn254>,
    leaf: Fr,
    siblings: [Fr; TREE_DEPTH],
    rng: &mut impl ark_std::rand::Rng,
) -> Result<ProofFixture> {
    let root = merkle_root(leaf, &siblings);
    let proof = Groth16::<Bn254>::create_random_proof_with_reduction(
        PathCircuit::with_witness(leaf, siblings),
        pk,
        rng,
    )
    .context("fixture proof")?;

    let mut proof_bytes = Vec::new();
    proof
        .serialize_compressed(&mut proof_bytes)
        .context("serialize proof")?;
    let root_bytes = scalar_to_bytes(&root)?.to_vec();

    Ok(ProofFixture {
        root_bytes,
        proof_bytes,
    })
}

#[cfg(test)]
mod tests {
    use anchorgate_verifier::{
        prepare_verifying_key, proof_points_from_bytes, public_inputs_from_bytes, verify,
    };

    use super::*;

    #[test]
    fn fixture_bundles_verify_through_the_public_seam() {
        let fx = fixtures();
        let key = prepare_verifying_key(fx.vk_bytes()).unwrap();
        assert_eq!(key.public_input_len(), 1);

        for bundle in [fx.first(), fx.second()] {
            let inputs = public_inputs_from_bytes(bundle.root_bytes()).unwrap();
            let proof = proof_points_from_bytes(bundle.proof_bytes()).unwrap();
            assert!(verify(&key, &inputs, &proof));
        }
    }

    #[test]
    fn bundles_do_not_cross_verify() {
        let fx = fixtures();
        let key = prepare_verifying_key(fx.vk_bytes()).unwrap();
        let first_inputs = public_inputs_from_bytes(fx.first().root_bytes()).unwrap();
        let second_proof = proof_points_from_bytes(fx.second().proof_bytes()).unwrap();
        assert!(!verify(&key, &first_inputs, &second_proof));
    }

    #[test]
    fn alternate_key_rejects_both_bundles() {
        let fx = fixtures();
        let alt_key = prepare_verifying_key(fx.alt_vk_bytes()).unwrap();
        for bundle in [fx.first(), fx.second()] {
            let inputs = public_inputs_from_bytes(bundle.root_bytes()).unwrap();
            let proof = proof_points_from_bytes(bundle.proof_bytes()).unwrap();
            assert!(!verify(&alt_key, &inputs, &proof));
        }
    }
}
