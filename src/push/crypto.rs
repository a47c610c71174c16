//! Crypto primitives for the Web Push pipeline.
//!
//! Thin wrappers with strict size checks around the RustCrypto crates:
//! base64url, ECDH on P-256, HKDF-SHA256, AES-128-GCM, ES256 signing, and
//! HMAC-SHA256.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes128Gcm, Nonce};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use p256::ecdsa::signature::Signer;
use p256::ecdsa::{Signature, SigningKey};
use p256::elliptic_curve::rand_core::OsRng;
use p256::elliptic_curve::sec1::ToEncodedPoint;
use p256::{PublicKey, SecretKey};
use sha2::Sha256;

use crate::error::CryptoError;

/// Uncompressed SEC1 point length for P-256.
pub const P256_PUBLIC_KEY_LEN: usize = 65;
/// P-256 scalar length.
pub const P256_PRIVATE_KEY_LEN: usize = 32;

/// Base64url encode without padding.
pub fn b64url_encode(data: impl AsRef<[u8]>) -> String {
    URL_SAFE_NO_PAD.encode(data)
}

/// Base64url decode; accepts both padded and unpadded input.
pub fn b64url_decode(input: &str) -> Result<Vec<u8>, CryptoError> {
    let trimmed = input.trim_end_matches('=');
    URL_SAFE_NO_PAD
        .decode(trimmed)
        .map_err(|_| CryptoError::InvalidEncoding)
}

/// An ephemeral P-256 key pair in raw wire form.
#[derive(Clone)]
pub struct EcdhKeypair {
    /// Uncompressed SEC1 point (0x04 || X || Y).
    pub public: [u8; P256_PUBLIC_KEY_LEN],
    /// Big-endian scalar.
    pub secret: [u8; P256_PRIVATE_KEY_LEN],
}

/// Generate a fresh P-256 key pair.
pub fn ecdh_generate() -> EcdhKeypair {
    let secret = SecretKey::random(&mut OsRng);
    let public_point = secret.public_key().to_encoded_point(false);

    let mut public = [0u8; P256_PUBLIC_KEY_LEN];
    public.copy_from_slice(public_point.as_bytes());
    let mut scalar = [0u8; P256_PRIVATE_KEY_LEN];
    scalar.copy_from_slice(&secret.to_bytes());

    EcdhKeypair {
        public,
        secret: scalar,
    }
}

/// ECDH shared secret between our scalar and a peer's uncompressed point.
pub fn ecdh_shared_secret(
    private_key: &[u8],
    peer_public: &[u8],
) -> Result<[u8; 32], CryptoError> {
    if private_key.len() != P256_PRIVATE_KEY_LEN {
        return Err(CryptoError::InvalidKeyLength {
            expected: P256_PRIVATE_KEY_LEN,
            actual: private_key.len(),
        });
    }
    if peer_public.len() != P256_PUBLIC_KEY_LEN {
        return Err(CryptoError::InvalidKeyLength {
            expected: P256_PUBLIC_KEY_LEN,
            actual: peer_public.len(),
        });
    }

    let secret = SecretKey::from_slice(private_key)
        .map_err(|e| CryptoError::SignatureFailure(format!("invalid private key: {e}")))?;
    let peer = PublicKey::from_sec1_bytes(peer_public)
        .map_err(|e| CryptoError::SignatureFailure(format!("invalid public key: {e}")))?;

    let shared =
        p256::ecdh::diffie_hellman(secret.to_nonzero_scalar(), peer.as_affine());
    let mut out = [0u8; 32];
    out.copy_from_slice(shared.raw_secret_bytes());
    Ok(out)
}

/// HKDF-SHA256 extract step (RFC 5869: `PRK = HMAC(salt, IKM)`).
pub fn hkdf_extract(salt: &[u8], ikm: &[u8]) -> [u8; 32] {
    hmac_sha256(salt, ikm)
}

/// HKDF-SHA256 expand step.
pub fn hkdf_expand(prk: &[u8; 32], info: &[u8], len: usize) -> Result<Vec<u8>, CryptoError> {
    let hk = Hkdf::<Sha256>::from_prk(prk).map_err(|_| CryptoError::KdfFailure)?;
    let mut okm = vec![0u8; len];
    hk.expand(info, &mut okm).map_err(|_| CryptoError::KdfFailure)?;
    Ok(okm)
}

/// Combined HKDF-SHA256 extract-then-expand.
pub fn hkdf_derive(
    ikm: &[u8],
    salt: &[u8],
    info: &[u8],
    len: usize,
) -> Result<Vec<u8>, CryptoError> {
    let hk = Hkdf::<Sha256>::new(Some(salt), ikm);
    let mut okm = vec![0u8; len];
    hk.expand(info, &mut okm).map_err(|_| CryptoError::KdfFailure)?;
    Ok(okm)
}

/// AES-128-GCM encryption; returns `ciphertext || tag(16)`.
pub fn aes128gcm_encrypt(
    plaintext: &[u8],
    key: &[u8],
    nonce: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    if key.len() != 16 {
        return Err(CryptoError::InvalidKeyLength {
            expected: 16,
            actual: key.len(),
        });
    }
    if nonce.len() != 12 {
        return Err(CryptoError::InvalidKeyLength {
            expected: 12,
            actual: nonce.len(),
        });
    }

    let cipher =
        Aes128Gcm::new_from_slice(key).map_err(|_| CryptoError::EncryptFailure)?;
    cipher
        .encrypt(Nonce::from_slice(nonce), plaintext)
        .map_err(|_| CryptoError::EncryptFailure)
}

/// ES256 signature over `message` with a base64url-encoded 32-byte scalar
/// (the VAPID private key format). Output is raw `R || S`, 64 bytes.
pub fn es256_sign(message: &[u8], private_key_b64url: &str) -> Result<[u8; 64], CryptoError> {
    let key_bytes = b64url_decode(private_key_b64url)?;
    if key_bytes.len() != P256_PRIVATE_KEY_LEN {
        return Err(CryptoError::InvalidKeyLength {
            expected: P256_PRIVATE_KEY_LEN,
            actual: key_bytes.len(),
        });
    }

    let signing_key = SigningKey::from_slice(&key_bytes)
        .map_err(|e| CryptoError::SignatureFailure(e.to_string()))?;
    let signature: Signature = signing_key.sign(message);

    let mut out = [0u8; 64];
    out.copy_from_slice(&signature.to_bytes());
    Ok(out)
}

/// HMAC-SHA256 MAC.
pub fn hmac_sha256(key: &[u8], data: &[u8]) -> [u8; 32] {
    let mut mac =
        <Hmac<Sha256> as Mac>::new_from_slice(key).expect("HMAC accepts any key length");
    mac.update(data);
    let mut out = [0u8; 32];
    out.copy_from_slice(&mac.finalize().into_bytes());
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use p256::ecdsa::signature::Verifier;
    use p256::ecdsa::VerifyingKey;

    #[test]
    fn test_b64url_round_trip() {
        let cases: [&[u8]; 5] = [
            b"",
            b"f",
            b"hello world",
            &[0xff, 0xfe, 0xfd, 0x00, 0x01],
            &[0u8; 65],
        ];
        for data in cases {
            let encoded = b64url_encode(data);
            assert!(!encoded.contains('='));
            assert!(!encoded.contains('+'));
            assert!(!encoded.contains('/'));
            assert_eq!(b64url_decode(&encoded).unwrap(), data);
        }
    }

    #[test]
    fn test_b64url_accepts_padded_input() {
        assert_eq!(b64url_decode("aGVsbG8=").unwrap(), b"hello");
        assert_eq!(b64url_decode("aGVsbG8").unwrap(), b"hello");
    }

    #[test]
    fn test_b64url_rejects_garbage() {
        assert!(b64url_decode("not valid!!!").is_err());
    }

    #[test]
    fn test_ecdh_key_shapes() {
        let pair = ecdh_generate();
        assert_eq!(pair.public[0], 0x04);
        assert_ne!(pair.secret, [0u8; 32]);
    }

    #[test]
    fn test_ecdh_shared_secret_agreement() {
        let alice = ecdh_generate();
        let bob = ecdh_generate();

        let ab = ecdh_shared_secret(&alice.secret, &bob.public).unwrap();
        let ba = ecdh_shared_secret(&bob.secret, &alice.public).unwrap();
        assert_eq!(ab, ba);
        assert_ne!(ab, [0u8; 32]);
    }

    #[test]
    fn test_ecdh_rejects_wrong_sizes() {
        let pair = ecdh_generate();
        let err = ecdh_shared_secret(&pair.secret[..16], &pair.public).unwrap_err();
        assert!(matches!(err, CryptoError::InvalidKeyLength { .. }));
        let err = ecdh_shared_secret(&pair.secret, &pair.public[..33]).unwrap_err();
        assert!(matches!(err, CryptoError::InvalidKeyLength { .. }));
    }

    #[test]
    fn test_hkdf_rfc5869_case_1() {
        // RFC 5869 Appendix A.1
        let ikm = [0x0b; 22];
        let salt: Vec<u8> = (0x00..=0x0c).collect();
        let info: Vec<u8> = (0xf0..=0xf9).collect();

        let prk = hkdf_extract(&salt, &ikm);
        assert_eq!(
            prk.to_vec(),
            hex("077709362c2e32df0ddc3f0dc47bba6390b6c73bb50f9c3122ec844ad7c2b3e5")
        );

        let okm = hkdf_derive(&ikm, &salt, &info, 42).unwrap();
        assert_eq!(
            okm,
            hex("3cb25f25faacd57a90434f64d0362f2a2d2d0a90cf1a5a4c5db02d56ecc4c5bf34007208d5b887185865")
        );

        let expanded = hkdf_expand(&prk, &info, 42).unwrap();
        assert_eq!(expanded, okm);
    }

    #[test]
    fn test_aes128gcm_nist_vector() {
        // NIST GCM test vector: all-zero key, nonce, and single zero block.
        let key = [0u8; 16];
        let nonce = [0u8; 12];

        let empty = aes128gcm_encrypt(&[], &key, &nonce).unwrap();
        assert_eq!(empty, hex("58e2fccefa7e3061367f1d57a4e7455a"));

        let block = aes128gcm_encrypt(&[0u8; 16], &key, &nonce).unwrap();
        assert_eq!(
            block,
            hex("0388dace60b6a392f328c2b971b2fe78ab6e47d42cec13bdf53a67b21257bddf")
        );
    }

    #[test]
    fn test_aes128gcm_rejects_wrong_key_size() {
        let err = aes128gcm_encrypt(b"data", &[0u8; 32], &[0u8; 12]).unwrap_err();
        assert!(matches!(err, CryptoError::InvalidKeyLength { .. }));
    }

    #[test]
    fn test_es256_sign_verifies() {
        let pair = ecdh_generate();
        let private_b64 = b64url_encode(pair.secret);
        let message = b"test.signing.input";

        let raw = es256_sign(message, &private_b64).unwrap();
        assert_eq!(raw.len(), 64);

        let verifying_key = VerifyingKey::from_sec1_bytes(&pair.public).unwrap();
        let signature = Signature::from_slice(&raw).unwrap();
        verifying_key.verify(message, &signature).unwrap();
    }

    #[test]
    fn test_es256_rejects_short_key() {
        let short = b64url_encode([0u8; 16]);
        let err = es256_sign(b"msg", &short).unwrap_err();
        assert!(matches!(err, CryptoError::InvalidKeyLength { .. }));
    }

    #[test]
    fn test_hmac_rfc4231_case_1() {
        let key = [0x0b; 20];
        let mac = hmac_sha256(&key, b"Hi There");
        assert_eq!(
            mac.to_vec(),
            hex("b0344c61d8db38535ca8afceaf0bf12b881dc200c9833da726e9376c2e32cff7")
        );
    }

    fn hex(s: &str) -> Vec<u8> {
        (0..s.len())
            .step_by(2)
            .map(|i| u8::from_str_radix(&s[i..i + 2], 16).unwrap())
            .collect()
    }
}
