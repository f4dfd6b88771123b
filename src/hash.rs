//! BN254 field codecs and the protocol Poseidon hash.

use halo2curves_axiom::{
    bn256::Fr,
    ff::{Field, PrimeField},
};
use once_cell::sync::Lazy;
use poseidon_primitives::poseidon::primitives::{ConstantLength, Hash as PoseidonHash, Spec};
use rand::RngCore;

use crate::error::{Error, Result};

const POSEIDON_T: usize = 6;
const POSEIDON_RATE: usize = 5;
const POSEIDON_FULL_ROUNDS: usize = 8;
const POSEIDON_PARTIAL_ROUNDS: usize = 57;

/// Hardest tree depth the crate will instantiate. Proof sizes and the
/// empty-root table are bounded by this.
pub const MAX_TREE_DEPTH: usize = 32;

/// Domain tag hashed into the empty-leaf constant so unoccupied tree
/// positions can never collide with a real commitment.
const EMPTY_LEAF_TAG: &[u8] = b"notevault.tree.empty-leaf.v1";

pub(crate) fn poseidon_hash<const L: usize>(values: &[Fr; L]) -> Fr {
    PoseidonHash::<Fr, VaultPoseidonSpec, ConstantLength<L>, POSEIDON_T, POSEIDON_RATE>::init()
        .hash(*values)
}

#[derive(Debug)]
struct VaultPoseidonSpec;

impl Spec<Fr, POSEIDON_T, POSEIDON_RATE> for VaultPoseidonSpec {
    fn full_rounds() -> usize {
        POSEIDON_FULL_ROUNDS
    }

    fn partial_rounds() -> usize {
        POSEIDON_PARTIAL_ROUNDS
    }

    fn sbox(val: Fr) -> Fr {
        val.pow_vartime([5])
    }

    fn secure_mds() -> usize {
        0
    }
}

/// Combines two child hashes into their parent tree node.
pub fn merkle_node(left: Fr, right: Fr) -> Fr {
    poseidon_hash(&[left, right])
}

/// Value occupying every leaf position that has not been committed yet.
pub static EMPTY_LEAF: Lazy<Fr> =
    Lazy::new(|| poseidon_hash(&[reduce_be_bytes_to_fr(&tag_bytes(EMPTY_LEAF_TAG))]));

static EMPTY_SUBTREE_ROOTS: Lazy<Vec<Fr>> = Lazy::new(|| {
    let mut roots = Vec::with_capacity(MAX_TREE_DEPTH + 1);
    roots.push(*EMPTY_LEAF);
    for level in 0..MAX_TREE_DEPTH {
        let below = roots[level];
        roots.push(merkle_node(below, below));
    }
    roots
});

/// Root of a fully-empty subtree with `level` hash levels below it.
/// `level == 0` is the empty leaf itself.
pub fn empty_subtree_root(level: usize) -> Fr {
    EMPTY_SUBTREE_ROOTS[level]
}

fn tag_bytes(tag: &[u8]) -> [u8; 32] {
    let mut bytes = [0u8; 32];
    bytes[..tag.len()].copy_from_slice(tag);
    bytes
}

/// Parses a canonical little-endian scalar encoding.
pub fn fr_from_bytes(bytes: &[u8; 32]) -> Result<Fr> {
    Fr::from_bytes(bytes)
        .into_option()
        .ok_or_else(|| Error::InvalidEncoding("non-canonical bn256 scalar".into()))
}

pub fn fr_to_bytes(fr: &Fr) -> [u8; 32] {
    let repr = fr.to_repr();
    let mut bytes = [0u8; 32];
    bytes.copy_from_slice(repr.as_ref());
    bytes
}

/// Parses a canonical big-endian scalar encoding, the byte order used on
/// the wire and inside encrypted note payloads.
pub fn fr_from_be_bytes(bytes: &[u8; 32]) -> Result<Fr> {
    let mut le = *bytes;
    le.reverse();
    fr_from_bytes(&le)
}

pub fn fr_to_be_bytes(fr: &Fr) -> [u8; 32] {
    let mut bytes = fr_to_bytes(fr);
    bytes.reverse();
    bytes
}

/// Interprets arbitrary 32 bytes (big-endian) as a scalar, reducing mod the
/// field order. Used for domain tags and key seeds where the input is not
/// guaranteed canonical.
pub fn reduce_be_bytes_to_fr(bytes: &[u8; 32]) -> Fr {
    let mut acc = Fr::zero();
    let base = Fr::from(256);
    for byte in bytes.iter() {
        acc = acc * base + Fr::from(*byte as u64);
    }
    acc
}

/// Renders a scalar as 0x-prefixed big-endian hex, the wire format for all
/// field-valued strings.
pub fn fr_to_hex(fr: &Fr) -> String {
    format!("0x{}", hex::encode(fr_to_be_bytes(fr)))
}

/// Parses a 0x-prefixed (or bare) big-endian hex scalar of at most 32 bytes.
pub fn fr_from_hex(text: &str) -> Result<Fr> {
    let digits = text.strip_prefix("0x").unwrap_or(text);
    if digits.is_empty() || digits.len() > 64 {
        return Err(Error::InvalidEncoding(format!(
            "scalar hex must be 1..=64 digits, got {}",
            digits.len()
        )));
    }
    // Left-pad odd or short strings to a full 32-byte word.
    let mut padded = String::with_capacity(64);
    for _ in digits.len()..64 {
        padded.push('0');
    }
    padded.push_str(digits);
    let raw = hex::decode(&padded)
        .map_err(|err| Error::InvalidEncoding(format!("bad scalar hex: {err}")))?;
    let mut bytes = [0u8; 32];
    bytes.copy_from_slice(&raw);
    fr_from_be_bytes(&bytes)
}

/// Samples a uniformly random scalar, for note secrets.
pub fn random_fr<R: RngCore>(rng: &mut R) -> Fr {
    Fr::random(rng)
}
