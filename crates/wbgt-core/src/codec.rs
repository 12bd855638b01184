//! AES-128 cipher-feedback codec for the persisted settings frame
//!
//! The on-medium layout is `[16-byte IV][ciphertext]`. CFB is a stream mode,
//! so the ciphertext has exactly the length of the plaintext and no padding
//! is involved.

use aes::Aes128;
use alloc::vec::Vec;
use cfb_mode::cipher::{AsyncStreamCipher, KeyIvInit};
use core::fmt;
use rand_core::RngCore;
use thiserror_no_std::Error;

/// AES-128 key length in bytes
pub const KEY_LEN: usize = 16;
/// Initialization vector length in bytes (one AES block)
pub const IV_LEN: usize = 16;

type Aes128CfbEnc = cfb_mode::Encryptor<Aes128>;
type Aes128CfbDec = cfb_mode::Decryptor<Aes128>;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CryptoError {
    #[error("key and IV must both be 16 bytes")]
    InvalidKeyMaterial,
    #[error("decrypted payload is not valid UTF-8")]
    InvalidUtf8,
    #[error("entropy source unavailable")]
    EntropyUnavailable,
}

/// Encrypt `plaintext` with AES-128-CFB.
pub fn encrypt(key: &[u8], iv: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let cipher =
        Aes128CfbEnc::new_from_slices(key, iv).map_err(|_| CryptoError::InvalidKeyMaterial)?;
    let mut buf = plaintext.to_vec();
    cipher.encrypt(&mut buf);
    Ok(buf)
}

/// Decrypt `ciphertext` with AES-128-CFB.
pub fn decrypt(key: &[u8], iv: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let cipher =
        Aes128CfbDec::new_from_slices(key, iv).map_err(|_| CryptoError::InvalidKeyMaterial)?;
    let mut buf = ciphertext.to_vec();
    cipher.decrypt(&mut buf);
    Ok(buf)
}

/// Draw a fresh IV from the entropy source.
pub fn mint_iv<R: RngCore>(entropy: &mut R) -> Result<[u8; IV_LEN], CryptoError> {
    let mut iv = [0u8; IV_LEN];
    entropy
        .try_fill_bytes(&mut iv)
        .map_err(|_| CryptoError::EntropyUnavailable)?;
    Ok(iv)
}

/// IV followed by ciphertext, exactly as stored on the medium.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CipherFrame {
    pub iv: [u8; IV_LEN],
    pub ciphertext: Vec<u8>,
}

impl CipherFrame {
    /// Split a stored buffer into IV and ciphertext.
    ///
    /// Returns `None` when the buffer cannot even hold the IV.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < IV_LEN {
            return None;
        }
        let (iv, ciphertext) = bytes.split_at(IV_LEN);
        let mut iv_arr = [0u8; IV_LEN];
        iv_arr.copy_from_slice(iv);
        Some(Self {
            iv: iv_arr,
            ciphertext: ciphertext.to_vec(),
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(IV_LEN + self.ciphertext.len());
        bytes.extend_from_slice(&self.iv);
        bytes.extend_from_slice(&self.ciphertext);
        bytes
    }
}

/// Symmetric codec bound to one device key.
#[derive(Clone)]
pub struct CipherCodec {
    key: [u8; KEY_LEN],
}

impl CipherCodec {
    pub fn new(key: &[u8]) -> Result<Self, CryptoError> {
        let key: [u8; KEY_LEN] = key
            .try_into()
            .map_err(|_| CryptoError::InvalidKeyMaterial)?;
        Ok(Self { key })
    }

    pub fn encrypt(&self, iv: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        encrypt(&self.key, iv, plaintext)
    }

    pub fn decrypt(&self, iv: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        decrypt(&self.key, iv, ciphertext)
    }

    /// Encrypt `plaintext` under `iv` into a storable frame.
    pub fn seal(&self, iv: [u8; IV_LEN], plaintext: &[u8]) -> Result<CipherFrame, CryptoError> {
        let ciphertext = self.encrypt(&iv, plaintext)?;
        Ok(CipherFrame { iv, ciphertext })
    }

    pub fn open(&self, frame: &CipherFrame) -> Result<Vec<u8>, CryptoError> {
        self.decrypt(&frame.iv, &frame.ciphertext)
    }
}

impl fmt::Debug for CipherCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CipherCodec").finish_non_exhaustive()
    }
}
