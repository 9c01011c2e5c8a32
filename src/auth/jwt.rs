//! ==============================================================================
//! jwt.rs - compact JWT construction and RS256 signing
//! ==============================================================================
//!
//! purpose:
//!     builds the `header.payload.signature` compact form by hand. no JWT
//!     library: the device speaks exactly one flow (RS256 service-account
//!     assertion), so the construction is spelled out here.
//!
//! format:
//!     header  = {"alg":"RS256","typ":"JWT"}
//!     payload = {iss, sub, aud, iat, exp, scope}
//!     each segment base64url-encoded (no padding, + -> -, / -> _),
//!     signature = RSA PKCS#1 v1.5 over SHA-256 of "header.payload"
//!
//! relationships:
//!     - used by: auth/mod.rs (AuthTokenManager::authenticate)
//!     - signing seam: JwtSigner trait; RsaComponentsSigner is the
//!       production impl, built from the raw (n, e, d, p, q) components
//!       extracted from the service-account key
//!
//! ==============================================================================

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use rsa::{BigUint, Pkcs1v15Sign, RsaPrivateKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::AgentError;

/// fixed JWT header; field order matters for byte-exact encoding
#[derive(Serialize)]
struct Header {
    alg: &'static str,
    typ: &'static str,
}

const HEADER: Header = Header {
    alg: "RS256",
    typ: "JWT",
};

/// JWT claim set. everything except iat/exp is fixed at startup;
/// iat/exp are recomputed per signing attempt from the synced clock.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Claims {
    pub iss: String,
    pub sub: String,
    pub aud: String,
    pub iat: u64,
    pub exp: u64,
    pub scope: String,
}

/// base64url without padding: `+` -> `-`, `/` -> `_`, no `=`
pub fn b64url_encode(data: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(data)
}

pub fn b64url_decode(data: &str) -> Result<Vec<u8>, base64::DecodeError> {
    URL_SAFE_NO_PAD.decode(data)
}

/// `base64url(header).base64url(payload)` - the bytes that get signed
pub fn signing_input(claims: &Claims) -> Result<String, AgentError> {
    let header_json =
        serde_json::to_vec(&HEADER).map_err(|e| AgentError::Signing(e.to_string()))?;
    let claims_json =
        serde_json::to_vec(claims).map_err(|e| AgentError::Signing(e.to_string()))?;
    Ok(format!(
        "{}.{}",
        b64url_encode(&header_json),
        b64url_encode(&claims_json)
    ))
}

pub fn sha256_digest(input: &[u8]) -> [u8; 32] {
    Sha256::digest(input).into()
}

/// append the encoded signature to the signing input
pub fn compact(signing_input: &str, signature: &[u8]) -> String {
    format!("{signing_input}.{}", b64url_encode(signature))
}

/// the opaque signing primitive. the agent core hands over a SHA-256
/// digest and gets PKCS#1 v1.5 signature bytes back; key handling stays
/// behind this seam.
pub trait JwtSigner: Send + Sync {
    fn sign(&self, digest: &[u8; 32]) -> Result<Vec<u8>, AgentError>;
}

/// production signer over raw RSA components. the components are opaque
/// configuration extracted offline from the service-account key; they are
/// never generated or validated here beyond what key construction needs.
#[derive(Debug)]
pub struct RsaComponentsSigner {
    key: RsaPrivateKey,
}

impl RsaComponentsSigner {
    pub fn from_hex_components(
        n: &str,
        e: &str,
        d: &str,
        p: &str,
        q: &str,
    ) -> Result<Self, AgentError> {
        let parse = |name: &str, hex_str: &str| -> Result<BigUint, AgentError> {
            let bytes = hex::decode(hex_str.trim())
                .map_err(|e| AgentError::Config(format!("bad hex in RSA component {name}: {e}")))?;
            Ok(BigUint::from_bytes_be(&bytes))
        };
        let mut key = RsaPrivateKey::from_components(
            parse("n", n)?,
            parse("e", e)?,
            parse("d", d)?,
            vec![parse("p", p)?, parse("q", q)?],
        )
        .map_err(|e| AgentError::Config(format!("invalid RSA key components: {e}")))?;
        // precompute the CRT parameters once so per-token signing stays cheap
        key.precompute()
            .map_err(|e| AgentError::Config(format!("RSA CRT precompute failed: {e}")))?;
        Ok(Self { key })
    }

    /// throwaway key for local development when no components are
    /// configured. tokens signed with it get rejected upstream, which
    /// exercises the soft-failure path end to end.
    pub fn ephemeral() -> Result<Self, AgentError> {
        let key = RsaPrivateKey::new(&mut rand::thread_rng(), 2048)
            .map_err(|e| AgentError::Config(format!("dev key generation failed: {e}")))?;
        Ok(Self { key })
    }

    pub fn public_key(&self) -> rsa::RsaPublicKey {
        self.key.to_public_key()
    }
}

impl JwtSigner for RsaComponentsSigner {
    fn sign(&self, digest: &[u8; 32]) -> Result<Vec<u8>, AgentError> {
        self.key
            .sign(Pkcs1v15Sign::new::<Sha256>(), digest)
            .map_err(|e| AgentError::Signing(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn claims() -> Claims {
        Claims {
            iss: "svc@example.iam.gserviceaccount.com".into(),
            sub: "svc@example.iam.gserviceaccount.com".into(),
            aud: "https://oauth2.googleapis.com/token".into(),
            iat: 1_700_000_000,
            exp: 1_700_003_600,
            scope: "https://www.googleapis.com/auth/firebase.database".into(),
        }
    }

    #[test]
    fn b64url_uses_urlsafe_alphabet_without_padding() {
        // 0xfb 0xff encodes to "+/8=" in standard base64
        assert_eq!(b64url_encode(&[0xfb, 0xff]), "-_8");
        assert_eq!(b64url_decode("-_8").unwrap(), vec![0xfb, 0xff]);
        // one byte would normally carry two padding chars
        assert_eq!(b64url_encode(b"f"), "Zg");
    }

    #[test]
    fn signing_input_round_trips_to_original_bytes() {
        let input = signing_input(&claims()).unwrap();
        let (header_seg, claims_seg) = input.split_once('.').unwrap();

        let header_bytes = b64url_decode(header_seg).unwrap();
        assert_eq!(header_bytes, br#"{"alg":"RS256","typ":"JWT"}"#);

        let decoded: Claims = serde_json::from_slice(&b64url_decode(claims_seg).unwrap()).unwrap();
        assert_eq!(decoded, claims());
    }

    #[test]
    fn compact_form_has_three_segments() {
        let input = signing_input(&claims()).unwrap();
        let jwt = compact(&input, b"sig-bytes");
        assert_eq!(jwt.split('.').count(), 3);
        assert!(jwt.starts_with(&input));
    }

    #[test]
    fn component_signer_round_trips_through_hex_and_verifies() {
        // generate a throwaway key, flatten it to hex components the way
        // the offline extractor does, rebuild the signer from those
        let original = RsaPrivateKey::new(&mut rand::thread_rng(), 1024).unwrap();
        use rsa::traits::{PrivateKeyParts as _, PublicKeyParts as _};
        let hex_of = |b: &BigUint| hex::encode(b.to_bytes_be());

        let signer = RsaComponentsSigner::from_hex_components(
            &hex_of(original.n()),
            &hex_of(original.e()),
            &hex_of(original.d()),
            &hex_of(&original.primes()[0]),
            &hex_of(&original.primes()[1]),
        )
        .unwrap();

        let digest = sha256_digest(b"header.payload");
        let signature = signer.sign(&digest).unwrap();

        original
            .to_public_key()
            .verify(Pkcs1v15Sign::new::<Sha256>(), &digest, &signature)
            .expect("signature must verify against the public half");
    }

    #[test]
    fn garbage_hex_is_a_config_error() {
        let err =
            RsaComponentsSigner::from_hex_components("zz", "11", "11", "07", "0b").unwrap_err();
        assert!(matches!(err, AgentError::Config(_)));
    }
}
