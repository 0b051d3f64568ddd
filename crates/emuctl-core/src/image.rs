//! Captured framebuffer images and their content hashes.
//!
//! A capture is only trusted when the decoded bytes start with the 8-byte PNG
//! signature.  Two captures of an unchanged screen produce byte-identical
//! PNGs, so comparing [`ContentHash`]es is enough to tell whether the guest
//! reacted to the last command.

use std::fmt;

use sha2::{Digest, Sha256};

use crate::protocol::extract::ExtractionError;

/// The canonical PNG file signature.
pub const PNG_SIGNATURE: [u8; 8] = [0x89, b'P', b'N', b'G', b'\r', b'\n', 0x1A, b'\n'];

/// Returns `true` when `bytes` begins with [`PNG_SIGNATURE`].
pub fn has_png_signature(bytes: &[u8]) -> bool {
    bytes.len() >= PNG_SIGNATURE.len() && bytes[..PNG_SIGNATURE.len()] == PNG_SIGNATURE
}

/// SHA-256 digest of a screenshot's bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContentHash([u8; 32]);

impl ContentHash {
    pub fn of(bytes: &[u8]) -> Self {
        Self(Sha256::digest(bytes).into())
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Lower-case hex rendering of the digest.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// A validated PNG capture of the emulated display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Screenshot {
    bytes: Vec<u8>,
    hash: ContentHash,
}

impl Screenshot {
    /// Wraps decoded capture bytes after checking the PNG signature.
    ///
    /// # Errors
    ///
    /// Returns [`ExtractionError::BadSignature`] if the bytes do not begin with
    /// [`PNG_SIGNATURE`].
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self, ExtractionError> {
        if !has_png_signature(&bytes) {
            let prefix_len = bytes.len().min(PNG_SIGNATURE.len());
            return Err(ExtractionError::BadSignature {
                prefix: bytes[..prefix_len].to_vec(),
            });
        }
        let hash = ContentHash::of(&bytes);
        Ok(Self { bytes, hash })
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn hash(&self) -> ContentHash {
        self.hash
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
