//! Encrypted note payloads and recipient key derivation.
//!
//! A note's opening travels to its recipient as an ECIES ciphertext over
//! secp256k1. The plaintext is a fixed 128-byte envelope of four 32-byte
//! big-endian words: `secret || owner || asset_id || amount`. Recipient public
//! keys come either straight from a held secret key or, for signers that
//! never expose their secret, from a recoverable ECDSA signature over a
//! fixed derivation message.

use ecies::PublicKey;
use halo2curves_axiom::bn256::Fr;
use k256::ecdsa::{RecoveryId, Signature, SigningKey, VerifyingKey};

use crate::error::{Error, Result};
use crate::hash::{fr_from_be_bytes, fr_to_be_bytes};
use crate::note::Note;

/// Message signed to derive an encryption public key from an external
/// signer. Fixed forever; changing it would strand previously shared keys.
pub const PUBKEY_DERIVATION_MESSAGE: &[u8] = b"derive_public_key";

/// Encrypted note envelope plaintext length: four 32-byte words.
pub const NOTE_PAYLOAD_LEN: usize = 128;

/// The secret material a recipient needs to claim a note.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotePlaintext {
    pub secret: Fr,
    pub owner: Fr,
    pub asset_id: Fr,
    pub amount: u64,
}

impl NotePlaintext {
    /// Serializes to the fixed envelope layout.
    pub fn to_payload_bytes(&self) -> [u8; NOTE_PAYLOAD_LEN] {
        let mut buf = [0u8; NOTE_PAYLOAD_LEN];
        buf[0..32].copy_from_slice(&fr_to_be_bytes(&self.secret));
        buf[32..64].copy_from_slice(&fr_to_be_bytes(&self.owner));
        buf[64..96].copy_from_slice(&fr_to_be_bytes(&self.asset_id));
        buf[120..128].copy_from_slice(&self.amount.to_be_bytes());
        buf
    }

    /// Parses the fixed envelope layout. Every violation reports the same
    /// `DecryptionFailure`; a tampered payload never yields partial fields.
    pub fn from_payload_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != NOTE_PAYLOAD_LEN {
            return Err(Error::DecryptionFailure);
        }
        let secret = fr_from_be_bytes(&word(bytes, 0)).map_err(|_| Error::DecryptionFailure)?;
        let owner = fr_from_be_bytes(&word(bytes, 1)).map_err(|_| Error::DecryptionFailure)?;
        let asset_id = fr_from_be_bytes(&word(bytes, 2)).map_err(|_| Error::DecryptionFailure)?;
        // The amount word reserves 32 bytes but only the low 8 may be set.
        if bytes[96..120].iter().any(|&b| b != 0) {
            return Err(Error::DecryptionFailure);
        }
        let mut amount_bytes = [0u8; 8];
        amount_bytes.copy_from_slice(&bytes[120..128]);
        Ok(NotePlaintext {
            secret,
            owner,
            asset_id,
            amount: u64::from_be_bytes(amount_bytes),
        })
    }

    /// Rebuilds the pending note this opening describes.
    pub fn into_note(self) -> Note {
        Note::new(self.asset_id, self.amount, self.owner, self.secret)
    }
}

impl From<&Note> for NotePlaintext {
    fn from(note: &Note) -> Self {
        NotePlaintext {
            secret: note.secret(),
            owner: note.owner(),
            asset_id: note.asset_id(),
            amount: note.amount(),
        }
    }
}

fn word(bytes: &[u8], index: usize) -> [u8; 32] {
    let mut out = [0u8; 32];
    out.copy_from_slice(&bytes[index * 32..(index + 1) * 32]);
    out
}

/// Encrypts a note opening to the recipient's secp256k1 public key (SEC1,
/// compressed or uncompressed bytes).
pub fn encrypt_note(plaintext: &NotePlaintext, recipient_public_key: &[u8]) -> Result<Vec<u8>> {
    ecies::encrypt(recipient_public_key, &plaintext.to_payload_bytes())
        .map_err(|err| Error::InvalidRecipientKey(format!("{err:?}")))
}

/// Decrypts a note payload with the recipient's 32-byte secret key.
///
/// Authentication failure, a foreign key, and a malformed envelope all
/// report the same opaque `DecryptionFailure`.
pub fn decrypt_note(ciphertext: &[u8], secret_key: &[u8; 32]) -> Result<NotePlaintext> {
    let plaintext =
        ecies::decrypt(secret_key, ciphertext).map_err(|_| Error::DecryptionFailure)?;
    NotePlaintext::from_payload_bytes(&plaintext)
}

/// Fresh secp256k1 keypair for receiving notes: 32-byte secret, 65-byte
/// uncompressed public key.
pub fn generate_encryption_keypair() -> ([u8; 32], Vec<u8>) {
    let (secret, public) = ecies::utils::generate_keypair();
    (secret.serialize(), public.serialize().to_vec())
}

/// Derives the 65-byte uncompressed public key straight from a held secret.
pub fn public_key_from_secret(secret_key: &[u8; 32]) -> Result<Vec<u8>> {
    let secret = ecies::SecretKey::parse_slice(secret_key)
        .map_err(|err| Error::InvalidEncoding(format!("invalid secp256k1 secret key: {err:?}")))?;
    Ok(PublicKey::from_secret_key(&secret).serialize().to_vec())
}

/// Signs the fixed derivation message, producing the 65-byte `r || s || v`
/// signature an external signer would hand back.
pub fn derivation_signature(secret_key: &[u8; 32]) -> Result<[u8; 65]> {
    let signing_key = SigningKey::from_slice(secret_key)
        .map_err(|err| Error::InvalidEncoding(format!("invalid secp256k1 secret key: {err}")))?;
    let (signature, recovery_id) = signing_key
        .sign_recoverable(PUBKEY_DERIVATION_MESSAGE)
        .map_err(|err| Error::InvalidEncoding(format!("signing failed: {err}")))?;

    let bytes = signature.to_bytes();
    let mut out = [0u8; 65];
    out[..64].copy_from_slice(&bytes[..]);
    out[64] = recovery_id.to_byte();
    Ok(out)
}

/// Recovers the 65-byte uncompressed public key from a recoverable
/// signature over the fixed derivation message. Accepts the recovery byte
/// both raw (0..=3) and with the legacy 27 offset.
pub fn public_key_from_signature(signature: &[u8]) -> Result<Vec<u8>> {
    if signature.len() != 65 {
        return Err(Error::InvalidEncoding(format!(
            "recoverable signature must be 65 bytes, got {}",
            signature.len()
        )));
    }
    let sig = Signature::from_slice(&signature[..64])
        .map_err(|err| Error::InvalidEncoding(format!("malformed signature: {err}")))?;
    let v = signature[64];
    let v = if v >= 27 { v - 27 } else { v };
    let recovery_id = RecoveryId::from_byte(v)
        .ok_or_else(|| Error::InvalidEncoding(format!("invalid recovery byte {v}")))?;

    let verifying_key =
        VerifyingKey::recover_from_msg(PUBKEY_DERIVATION_MESSAGE, &sig, recovery_id)
            .map_err(|err| Error::InvalidEncoding(format!("public key recovery failed: {err}")))?;
    Ok(verifying_key.to_encoded_point(false).as_bytes().to_vec())
}
