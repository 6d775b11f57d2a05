//! Reversible obfuscation of metering point identifiers.
//!
//! Each byte is shifted by the matching key byte (cycling over the key) modulo 256,
//! then the result is encoded as URL-safe base64 with padding.

use base64::{Engine, engine::general_purpose::URL_SAFE};

use crate::ValidationError;

#[derive(Debug, Clone)]
pub struct Anonymizer {
    key: Vec<u8>,
}

impl Anonymizer {
    /// An empty key leaves bytes unshifted (base64 only).
    pub fn new(key: &str) -> Self {
        Self {
            key: key.as_bytes().to_vec(),
        }
    }

    fn key_at(&self, i: usize) -> u8 {
        if self.key.is_empty() {
            0
        } else {
            self.key[i % self.key.len()]
        }
    }

    pub fn encode(&self, clear: &str) -> String {
        let shifted: Vec<u8> = clear
            .bytes()
            .enumerate()
            .map(|(i, b)| b.wrapping_add(self.key_at(i)))
            .collect();
        URL_SAFE.encode(shifted)
    }

    pub fn decode(&self, encoded: &str) -> Result<String, ValidationError> {
        let bytes = URL_SAFE
            .decode(encoded)
            .map_err(|e| ValidationError::Malformed {
                contract: String::new(),
                detail: format!("anonymised id is not base64: {e}"),
            })?;
        let clear: Vec<u8> = bytes
            .iter()
            .enumerate()
            .map(|(i, b)| b.wrapping_sub(self.key_at(i)))
            .collect();
        String::from_utf8(clear).map_err(|e| ValidationError::Malformed {
            contract: String::new(),
            detail: format!("anonymised id does not decode to text: {e}"),
        })
    }
}
