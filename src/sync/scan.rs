//! Trial decryption of published note payloads.

use std::fmt;

use halo2curves_axiom::bn256::Fr;
use tracing::debug;

use crate::codec::{decrypt_note, NotePlaintext};
use crate::hash::fr_to_hex;
use crate::note::OwnerKey;

/// Prepared key material for scanning the payload stream.
///
/// Holds the ECIES secret key payloads are encrypted to and the owner
/// address notes must be bound to for this vault to adopt them.
pub struct PayloadScanner {
    secret_key: [u8; 32],
    owner: Fr,
}

impl PayloadScanner {
    pub fn new(secret_key: [u8; 32], owner_key: &OwnerKey) -> Self {
        PayloadScanner {
            secret_key,
            owner: owner_key.address(),
        }
    }

    /// Owner address this scanner adopts notes for.
    pub fn owner(&self) -> Fr {
        self.owner
    }

    /// Attempts to open one payload. `None` means the payload is not for
    /// this vault: it did not decrypt under our key, or it decrypted but
    /// names a different owner (such a note could never be spent here and
    /// would only inflate balances).
    pub fn try_open(&self, ciphertext: &[u8]) -> Option<NotePlaintext> {
        match decrypt_note(ciphertext, &self.secret_key) {
            Ok(plaintext) if plaintext.owner == self.owner => Some(plaintext),
            Ok(plaintext) => {
                debug!(
                    owner = %fr_to_hex(&plaintext.owner),
                    "payload decrypted but is bound to a different owner, skipping"
                );
                None
            }
            Err(_) => None,
        }
    }
}

impl fmt::Debug for PayloadScanner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PayloadScanner")
            .field("owner", &fr_to_hex(&self.owner))
            .finish()
    }
}
