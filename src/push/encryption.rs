//! RFC 8291 `aes128gcm` message encryption and request body framing.
//!
//! Key schedule:
//!   ctx   = "WebPush: info" || 0x00 || ua_public(65) || as_public(65)
//!   prk   = HKDF(ikm = ECDH shared, salt = auth_secret, info = ctx, 32)
//!   cek   = HKDF(ikm = prk, salt = salt, info = "Content-Encoding: aes128gcm" || 0x00, 16)
//!   nonce = HKDF(ikm = prk, salt = salt, info = "Content-Encoding: nonce" || 0x00, 12)
//!
//! The record ends with a 0x02 delimiter and no extra padding.

use rand::RngCore;

use super::crypto::{self, EcdhKeypair, P256_PUBLIC_KEY_LEN};
use super::PushSubscription;
use crate::error::CryptoError;

/// Fixed record size advertised in the body header.
pub const RECORD_SIZE: u32 = 4096;

const SALT_LEN: usize = 16;
const AUTH_SECRET_LEN: usize = 16;

/// An encrypted message ready for framing.
#[derive(Debug)]
pub struct EncryptedPayload {
    pub salt: [u8; SALT_LEN],
    pub server_public: [u8; P256_PUBLIC_KEY_LEN],
    /// `ciphertext || tag(16)`.
    pub ciphertext: Vec<u8>,
}

/// Encrypt `plaintext` for a subscription with a fresh ephemeral key pair
/// and random salt.
pub fn encrypt(
    plaintext: &[u8],
    subscription: &PushSubscription,
) -> Result<EncryptedPayload, CryptoError> {
    let client_public = decode_exact::<P256_PUBLIC_KEY_LEN>(&subscription.keys.p256dh)?;
    let auth_secret = decode_exact::<AUTH_SECRET_LEN>(&subscription.keys.auth)?;

    let server_keys = crypto::ecdh_generate();
    let mut salt = [0u8; SALT_LEN];
    rand::thread_rng().fill_bytes(&mut salt);

    encrypt_with(plaintext, &client_public, &auth_secret, &server_keys, salt)
}

/// Deterministic core of [`encrypt`], with caller-supplied keys and salt.
fn encrypt_with(
    plaintext: &[u8],
    client_public: &[u8; P256_PUBLIC_KEY_LEN],
    auth_secret: &[u8; AUTH_SECRET_LEN],
    server_keys: &EcdhKeypair,
    salt: [u8; SALT_LEN],
) -> Result<EncryptedPayload, CryptoError> {
    let shared = crypto::ecdh_shared_secret(&server_keys.secret, client_public)?;

    let mut context = Vec::with_capacity(14 + 2 * P256_PUBLIC_KEY_LEN);
    context.extend_from_slice(b"WebPush: info\0");
    context.extend_from_slice(client_public);
    context.extend_from_slice(&server_keys.public);

    let extracted = crypto::hkdf_extract(auth_secret, &shared);
    let prk = crypto::hkdf_expand(&extracted, &context, 32)?;
    let cek = crypto::hkdf_derive(&prk, &salt, b"Content-Encoding: aes128gcm\0", 16)?;
    let nonce = crypto::hkdf_derive(&prk, &salt, b"Content-Encoding: nonce\0", 12)?;

    // Delimiter for the final (only) record; padding is optional and omitted.
    let mut padded = Vec::with_capacity(plaintext.len() + 1);
    padded.extend_from_slice(plaintext);
    padded.push(0x02);

    let ciphertext = crypto::aes128gcm_encrypt(&padded, &cek, &nonce)?;

    Ok(EncryptedPayload {
        salt,
        server_public: server_keys.public,
        ciphertext,
    })
}

/// Frame an encrypted payload into the `aes128gcm` request body:
/// `salt(16) || rs(4, BE) || idlen(1) || keyid(65) || ciphertext`.
pub fn build_request_body(payload: &EncryptedPayload) -> Vec<u8> {
    let mut body =
        Vec::with_capacity(SALT_LEN + 4 + 1 + P256_PUBLIC_KEY_LEN + payload.ciphertext.len());
    body.extend_from_slice(&payload.salt);
    body.extend_from_slice(&RECORD_SIZE.to_be_bytes());
    body.push(P256_PUBLIC_KEY_LEN as u8);
    body.extend_from_slice(&payload.server_public);
    body.extend_from_slice(&payload.ciphertext);
    body
}

/// Parse a framed request body back into its parts. The inverse of
/// [`build_request_body`] for any valid payload.
pub fn parse_request_body(body: &[u8]) -> Result<EncryptedPayload, CryptoError> {
    let header_len = SALT_LEN + 4 + 1;
    if body.len() < header_len {
        return Err(CryptoError::InvalidEncoding);
    }

    let keyid_len = body[SALT_LEN + 4] as usize;
    if keyid_len != P256_PUBLIC_KEY_LEN || body.len() < header_len + keyid_len {
        return Err(CryptoError::InvalidEncoding);
    }

    let mut salt = [0u8; SALT_LEN];
    salt.copy_from_slice(&body[..SALT_LEN]);
    let mut server_public = [0u8; P256_PUBLIC_KEY_LEN];
    server_public.copy_from_slice(&body[header_len..header_len + keyid_len]);

    Ok(EncryptedPayload {
        salt,
        server_public,
        ciphertext: body[header_len + keyid_len..].to_vec(),
    })
}

fn decode_exact<const N: usize>(input: &str) -> Result<[u8; N], CryptoError> {
    let bytes = crypto::b64url_decode(input)?;
    if bytes.len() != N {
        return Err(CryptoError::InvalidKeyLength {
            expected: N,
            actual: bytes.len(),
        });
    }
    let mut out = [0u8; N];
    out.copy_from_slice(&bytes);
    Ok(out)
}
