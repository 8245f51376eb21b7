//! Groth16 verification primitives for the anchor gate.
//!
//! Binds the arkworks BN254 pairing stack behind the small byte-oriented
//! contract the gate consumes: prepare a verifying key once, decode public
//! inputs and proof points from their canonical encodings, and run the
//! pairing check. Every byte string crossing this boundary uses the
//! arkworks canonical compressed encoding (little-endian scalars); callers
//! that write roots or keys must use the same encoding.

use anyhow::{ensure, Context, Result};
use ark_bn254::{Bn254, Fr};
use ark_groth16::{
    prepare_verifying_key as process_verifying_key, Groth16, PreparedVerifyingKey, Proof,
    VerifyingKey,
};
use ark_serialize::{CanonicalDeserialize, CanonicalSerialize};

/// Identifier of the one pairing curve this crate accepts encodings for.
pub const CURVE: &str = "bn254";

/// Canonical compressed length of a single public-input scalar.
pub const SCALAR_LEN: usize = 32;

/// A verifying key processed into the form used for repeated verification.
#[derive(Clone, Debug)]
pub struct PreparedKey(PreparedVerifyingKey<Bn254>);

impl PreparedKey {
    /// Number of public-input scalars a proof under this key must carry.
    pub fn public_input_len(&self) -> usize {
        self.0.vk.gamma_abc_g1.len().saturating_sub(1)
    }
}

/// Public-input scalars decoded from an opaque byte string.
#[derive(Clone, Debug)]
pub struct PublicInputs(Vec<Fr>);

impl PublicInputs {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// The three Groth16 proof points, deserialized and curve-checked.
#[derive(Clone, Debug)]
pub struct ProofPoints(Proof<Bn254>);

/// Process raw verifying-key material into its prepared form.
///
/// Fails if the bytes are not a canonical BN254 Groth16 verifying key
/// (wrong length, a point off the curve, or outside the prime-order
/// subgroup).
pub fn prepare_verifying_key(vk_bytes: &[u8]) -> Result<PreparedKey> {
    let vk = VerifyingKey::<Bn254>::deserialize_compressed(vk_bytes)
        .context("failed to deserialize bn254 verifying key")?;
    Ok(PreparedKey(process_verifying_key(&vk)))
}

/// Split an opaque byte string into consecutive 32-byte scalars.
///
/// The length must be a multiple of [`SCALAR_LEN`] and every chunk must be
/// a canonical field element; an empty string decodes to zero scalars.
pub fn public_inputs_from_bytes(bytes: &[u8]) -> Result<PublicInputs> {
    ensure!(
        bytes.len() % SCALAR_LEN == 0,
        "public input length {} is not a multiple of {}",
        bytes.len(),
        SCALAR_LEN
    );
    let scalars = bytes
        .chunks(SCALAR_LEN)
        .enumerate()
        .map(|(index, chunk)| {
            Fr::deserialize_compressed(chunk)
                .with_context(|| format!("invalid bn254 scalar at offset {}", index * SCALAR_LEN))
        })
        .collect::<Result<Vec<Fr>>>()?;
    Ok(PublicInputs(scalars))
}

/// Deserialize submitted proof bytes into proof points.
pub fn proof_points_from_bytes(bytes: &[u8]) -> Result<ProofPoints> {
    let proof = Proof::<Bn254>::deserialize_compressed(bytes)
        .context("failed to deserialize bn254 proof points")?;
    Ok(ProofPoints(proof))
}

/// Run the pairing check.
///
/// Never panics: library-level errors (for example a public-input count
/// that does not match the key) report as a failed check.
pub fn verify(key: &PreparedKey, public_inputs: &PublicInputs, proof: &ProofPoints) -> bool {
    Groth16::<Bn254>::verify_proof(&key.0, &proof.0, &public_inputs.0).unwrap_or(false)
}

/// Encode a scalar into the 32-byte form [`public_inputs_from_bytes`]
/// accepts.
pub fn scalar_to_bytes(value: &Fr) -> Result<[u8; SCALAR_LEN]> {
    let mut buf = [0u8; SCALAR_LEN];
    value
        .serialize_compressed(&mut buf[..])
        .context("failed to serialize bn254 scalar")?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalar_bytes_round_trip() {
        let value = Fr::from(2024u64);
        let bytes = scalar_to_bytes(&value).unwrap();
        let decoded = public_inputs_from_bytes(&bytes).unwrap();
        assert_eq!(decoded.len(), 1);
    }

    #[test]
    fn public_inputs_reject_ragged_length() {
        assert!(public_inputs_from_bytes(&[0u8; 31]).is_err());
        assert!(public_inputs_from_bytes(&[0u8; 33]).is_err());
    }

    #[test]
    fn public_inputs_accept_empty_string() {
        let decoded = public_inputs_from_bytes(&[]).unwrap();
        assert!(decoded.is_empty());
    }

    #[test]
    fn public_inputs_reject_non_canonical_scalar() {
        // 2^256 - 1 is far above the bn254 scalar modulus.
        assert!(public_inputs_from_bytes(&[0xffu8; 32]).is_err());
    }

    #[test]
    fn proof_points_reject_garbage() {
        assert!(proof_points_from_bytes(&[]).is_err());
        assert!(proof_points_from_bytes(&[0x17u8; 64]).is_err());
        assert!(proof_points_from_bytes(&[0xabu8; 256]).is_err());
    }

    #[test]
    fn prepare_rejects_garbage_key() {
        assert!(prepare_verifying_key(&[]).is_err());
        assert!(prepare_verifying_key(&[0x42u8; 96]).is_err());
    }
}
