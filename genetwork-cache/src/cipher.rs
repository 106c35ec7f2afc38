//! AES-256-CTR token cipher.
//!
//! Each call to [`TokenCipher::encrypt`] draws a fresh 8-byte nonce; the
//! 16-byte counter block is `nonce ‖ counter` with a 64-bit big-endian
//! counter starting at zero. Output is `base64(nonce) "," base64(ciphertext)`
//! using the standard padded alphabet.
//!
//! There is no integrity tag: ciphertexts are malleable. Tampering surfaces
//! only when the result fails to decode.

use std::fmt;
use std::path::Path;

use aes::Aes256;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use ctr::cipher::{KeyIvInit, StreamCipher};
use genetwork_core::{CacheConfig, CodecError, ConfigError, GenetworkResult, AES_KEY_LEN};
use rand::RngCore;

type Aes256Ctr = ctr::Ctr64BE<Aes256>;

const NONCE_LEN: usize = 8;
const SEPARATOR: char = ',';

/// Symmetric cipher for values stored in client-held tokens.
#[derive(Clone)]
pub struct TokenCipher {
    key: [u8; AES_KEY_LEN],
}

impl TokenCipher {
    pub fn new(key: [u8; AES_KEY_LEN]) -> Self {
        Self { key }
    }

    /// Cipher with a key drawn from the thread RNG. Tokens encrypted with it
    /// become unreadable after a restart.
    pub fn random() -> Self {
        let mut key = [0u8; AES_KEY_LEN];
        rand::rng().fill_bytes(&mut key);
        Self { key }
    }

    /// Load a raw 32-byte key from disk.
    pub fn from_key_file(path: &Path) -> GenetworkResult<Self> {
        let raw = std::fs::read(path).map_err(|e| ConfigError::InvalidValue {
            field: "aes_key_file".to_string(),
            value: path.display().to_string(),
            reason: e.to_string(),
        })?;

        let key: [u8; AES_KEY_LEN] = raw.as_slice().try_into().map_err(|_| {
            ConfigError::InvalidValue {
                field: "aes_key_file".to_string(),
                value: path.display().to_string(),
                reason: format!("expected {AES_KEY_LEN} bytes, found {}", raw.len()),
            }
        })?;
        Ok(Self::new(key))
    }

    /// Key file from the configuration, or a random key when none is set.
    pub fn from_config(config: &CacheConfig) -> GenetworkResult<Self> {
        match &config.aes_key_file {
            Some(path) => Self::from_key_file(path),
            None => {
                tracing::warn!("No AES key file configured, using a random key");
                Ok(Self::random())
            }
        }
    }

    pub fn encrypt(&self, plaintext: &str) -> Result<String, CodecError> {
        let mut nonce = [0u8; NONCE_LEN];
        rand::rng().fill_bytes(&mut nonce);

        let mut buf = plaintext.as_bytes().to_vec();
        self.keystream(&nonce)?.apply_keystream(&mut buf);

        Ok(format!(
            "{}{SEPARATOR}{}",
            STANDARD.encode(nonce),
            STANDARD.encode(buf)
        ))
    }

    pub fn decrypt(&self, token: &str) -> Result<String, CodecError> {
        let (nonce_b64, ct_b64) = token
            .split_once(SEPARATOR)
            .ok_or_else(|| decryption("missing separator"))?;

        let nonce: [u8; NONCE_LEN] = STANDARD
            .decode(nonce_b64)
            .map_err(decryption)?
            .try_into()
            .map_err(|_| decryption("nonce must be 8 bytes"))?;
        let mut buf = STANDARD.decode(ct_b64).map_err(decryption)?;

        self.keystream(&nonce)?.apply_keystream(&mut buf);
        String::from_utf8(buf).map_err(decryption)
    }

    fn keystream(&self, nonce: &[u8; NONCE_LEN]) -> Result<Aes256Ctr, CodecError> {
        let mut iv = [0u8; 16];
        iv[..NONCE_LEN].copy_from_slice(nonce);
        Aes256Ctr::new_from_slices(&self.key, &iv).map_err(decryption)
    }
}

impl fmt::Debug for TokenCipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenCipher").finish_non_exhaustive()
    }
}

fn decryption(reason: impl fmt::Display) -> CodecError {
    CodecError::Decryption {
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_roundtrip() {
        let cipher = TokenCipher::random();
        let token = cipher.encrypt("(1, \"avatar\")").unwrap();
        assert_eq!(cipher.decrypt(&token).unwrap(), "(1, \"avatar\")");
    }

    #[test]
    fn test_same_plaintext_differs() {
        let cipher = TokenCipher::random();
        assert_ne!(cipher.encrypt("same").unwrap(), cipher.encrypt("same").unwrap());
    }

    #[test]
    fn test_token_layout() {
        let cipher = TokenCipher::new([7u8; AES_KEY_LEN]);
        let token = cipher.encrypt("hello").unwrap();
        let (nonce, ct) = token.split_once(',').unwrap();
        assert_eq!(STANDARD.decode(nonce).unwrap().len(), NONCE_LEN);
        assert_eq!(STANDARD.decode(ct).unwrap().len(), "hello".len());
    }

    #[test]
    fn test_counter_block_is_nonce_then_zero() {
        // With an all-zero nonce the first keystream block is AES(key, 0^16).
        use aes::cipher::{BlockEncrypt, KeyInit};

        let key = [3u8; AES_KEY_LEN];
        let cipher = TokenCipher::new(key);
        let mut buf = [0u8; 16];
        cipher
            .keystream(&[0u8; NONCE_LEN])
            .unwrap()
            .apply_keystream(&mut buf);

        let mut block = aes::Block::default();
        Aes256::new_from_slice(&key).unwrap().encrypt_block(&mut block);
        assert_eq!(buf.as_slice(), block.as_slice());
    }

    #[test]
    fn test_wrong_key_does_not_roundtrip() {
        let a = TokenCipher::new([1u8; AES_KEY_LEN]);
        let b = TokenCipher::new([2u8; AES_KEY_LEN]);
        let token = a.encrypt("secret value").unwrap();
        assert_ne!(b.decrypt(&token).ok().as_deref(), Some("secret value"));
    }

    #[test]
    fn test_malformed_tokens() {
        let cipher = TokenCipher::random();
        for bad in ["no-separator", "!!!,AAAA", "AAAA,AAAA", "AAAAAAAAAAA=,***"] {
            assert!(
                matches!(cipher.decrypt(bad), Err(CodecError::Decryption { .. })),
                "{bad} should not decrypt"
            );
        }
    }

    #[test]
    fn test_key_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&[9u8; AES_KEY_LEN]).unwrap();

        let from_file = TokenCipher::from_key_file(file.path()).unwrap();
        let direct = TokenCipher::new([9u8; AES_KEY_LEN]);
        let token = direct.encrypt("shared").unwrap();
        assert_eq!(from_file.decrypt(&token).unwrap(), "shared");
    }

    #[test]
    fn test_short_key_file_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&[9u8; 16]).unwrap();

        let err = TokenCipher::from_key_file(file.path()).unwrap_err();
        assert!(matches!(
            err,
            genetwork_core::GenetworkError::Config(ConfigError::InvalidValue { .. })
        ));
    }
}
