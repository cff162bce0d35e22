//! Fernet-style calendar source tokens.
//!
//! A token wraps a calendar URL so the URL never appears in configuration
//! served to browsers. Layout of the decoded bytes:
//!
//! ```text
//! version (1) | timestamp (8, big endian) | iv (16) | ciphertext (n * 16) | hmac-sha256 (32)
//! ```
//!
//! The transport form is URL-safe base64 behind a `fernet://` prefix.
//!
//! The 32-byte secret is split directly: bytes 0..16 sign, bytes 16..32
//! encrypt. Tokens issued by the existing generator depend on this split, so
//! it must not be replaced by a hashed key derivation. The timestamp is
//! carried but never checked; tokens do not expire.

use std::fmt;

use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit, block_padding::Pkcs7};
use base64::{
    Engine, alphabet,
    engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig},
};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::error::TokenError;

type Aes128CbcEnc = cbc::Encryptor<aes::Aes128>;
type Aes128CbcDec = cbc::Decryptor<aes::Aes128>;
type HmacSha256 = Hmac<Sha256>;

/// Scheme prefix marking a configured source as a token.
pub const TOKEN_PREFIX: &str = "fernet://";

const VERSION: u8 = 0x80;
const BLOCK_LEN: usize = 16;
const HEADER_LEN: usize = 1 + 8 + BLOCK_LEN;
const TAG_LEN: usize = 32;
const MIN_TOKEN_LEN: usize = HEADER_LEN + TAG_LEN;

/// URL-safe alphabet, padded on encode, padding optional on decode.
const URL_SAFE: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// The shared token secret, already split into its two keys.
#[derive(Clone)]
pub struct Secret {
    signing: [u8; 16],
    encryption: [u8; 16],
}

impl Secret {
    /// Parse a secret from its URL-safe base64 form.
    pub fn from_base64(encoded: &str) -> Result<Self, TokenError> {
        let bytes = URL_SAFE
            .decode(encoded.trim())
            .map_err(|_| TokenError::InvalidSecret)?;
        Self::from_bytes(&bytes)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, TokenError> {
        if bytes.len() != 32 {
            return Err(TokenError::InvalidSecret);
        }
        let mut signing = [0u8; 16];
        let mut encryption = [0u8; 16];
        signing.copy_from_slice(&bytes[..16]);
        encryption.copy_from_slice(&bytes[16..]);
        Ok(Self {
            signing,
            encryption,
        })
    }

    /// Generate a fresh random secret.
    pub fn generate() -> Self {
        let bytes: [u8; 32] = rand::random();
        let mut signing = [0u8; 16];
        let mut encryption = [0u8; 16];
        signing.copy_from_slice(&bytes[..16]);
        encryption.copy_from_slice(&bytes[16..]);
        Self {
            signing,
            encryption,
        }
    }

    pub fn to_base64(&self) -> String {
        let mut bytes = Vec::with_capacity(32);
        bytes.extend_from_slice(&self.signing);
        bytes.extend_from_slice(&self.encryption);
        URL_SAFE.encode(bytes)
    }

    fn sign(&self, data: &[u8]) -> Vec<u8> {
        let mut mac =
            HmacSha256::new_from_slice(&self.signing).expect("HMAC can take keys of any size");
        mac.update(data);
        mac.finalize().into_bytes().to_vec()
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(..)")
    }
}

/// A structurally valid token that has not been authenticated yet.
#[derive(Debug, Clone)]
pub struct Token {
    pub version: u8,
    /// Issue time in seconds since the epoch. Informational only.
    pub timestamp: u64,
    bytes: Vec<u8>,
}

impl Token {
    /// Decode the transport form and check length and version.
    pub fn parse(token: &str) -> Result<Self, TokenError> {
        let token = token.trim();
        let encoded = token.strip_prefix(TOKEN_PREFIX).unwrap_or(token);
        let bytes = URL_SAFE
            .decode(encoded)
            .map_err(|_| TokenError::InvalidBase64)?;

        if bytes.len() < MIN_TOKEN_LEN {
            return Err(TokenError::TooShort(bytes.len()));
        }
        if bytes[0] != VERSION {
            return Err(TokenError::BadVersion(bytes[0]));
        }

        let mut ts = [0u8; 8];
        ts.copy_from_slice(&bytes[1..9]);

        Ok(Token {
            version: bytes[0],
            timestamp: u64::from_be_bytes(ts),
            bytes,
        })
    }

    /// Verify the signature, then decrypt.
    pub fn decrypt(&self, secret: &Secret) -> Result<String, TokenError> {
        let (signed, tag) = self.bytes.split_at(self.bytes.len() - TAG_LEN);

        let expected = secret.sign(signed);
        if !bool::from(expected.as_slice().ct_eq(tag)) {
            return Err(TokenError::InvalidSignature);
        }

        let iv = &signed[9..HEADER_LEN];
        let ciphertext = &signed[HEADER_LEN..];
        if ciphertext.is_empty() || ciphertext.len() % BLOCK_LEN != 0 {
            return Err(TokenError::DecryptFailed);
        }

        let plaintext = Aes128CbcDec::new_from_slices(&secret.encryption, iv)
            .map_err(|_| TokenError::DecryptFailed)?
            .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
            .map_err(|_| TokenError::DecryptFailed)?;

        String::from_utf8(plaintext).map_err(|_| TokenError::InvalidUtf8)
    }
}

/// Decode a token (with or without the `fernet://` prefix) into its URL.
pub fn decode(token: &str, secret: &Secret) -> Result<String, TokenError> {
    Token::parse(token)?.decrypt(secret)
}

/// Like [`decode`], taking the secret in its base64 form.
pub fn decode_with_encoded_secret(token: &str, secret: &str) -> Result<String, TokenError> {
    let token = Token::parse(token)?;
    let secret = Secret::from_base64(secret)?;
    token.decrypt(&secret)
}

/// Wrap `plaintext` in a token stamped with the current time and a random IV.
pub fn encode(plaintext: &str, secret: &Secret) -> String {
    let timestamp = chrono::Utc::now().timestamp().max(0) as u64;
    encode_with(plaintext, secret, rand::random(), timestamp)
}

pub fn encode_with(plaintext: &str, secret: &Secret, iv: [u8; 16], timestamp: u64) -> String {
    let ciphertext = Aes128CbcEnc::new(&secret.encryption.into(), &iv.into())
        .encrypt_padded_vec_mut::<Pkcs7>(plaintext.as_bytes());

    let mut bytes = Vec::with_capacity(HEADER_LEN + ciphertext.len() + TAG_LEN);
    bytes.push(VERSION);
    bytes.extend_from_slice(&timestamp.to_be_bytes());
    bytes.extend_from_slice(&iv);
    bytes.extend_from_slice(&ciphertext);

    let tag = secret.sign(&bytes);
    bytes.extend_from_slice(&tag);

    format!("{TOKEN_PREFIX}{}", URL_SAFE.encode(bytes))
}

/// Whether a configured source string is token-wrapped.
pub fn is_token(source: &str) -> bool {
    source.trim_start().starts_with(TOKEN_PREFIX)
}
