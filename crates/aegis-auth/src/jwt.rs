//! JWT signing and verification.
//!
//! Access and refresh tokens are signed with one of:
//!
//! - **HS256**: shared secret, for single-service deployments
//! - **RS256** / **RS384**: RSA key pair
//! - **ES384**: ECDSA over P-384
//!
//! Asymmetric keys are published through [`JwtService::jwks`] so other
//! services can verify access tokens without calling back.

use std::fmt;

use aegis_core::{FamilyId, SecurityError, SessionId, TenantId};
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use p384::SecretKey as EcSecretKey;
use p384::ecdsa::SigningKey as EcSigningKey;
use p384::pkcs8::{DecodePrivateKey as _, EncodePrivateKey as _};
use rand::rngs::OsRng;
use rsa::pkcs8::{EncodePublicKey, LineEnding};
use rsa::traits::PublicKeyParts;
use rsa::{RsaPrivateKey, RsaPublicKey};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Shortest HS256 secret accepted, in bytes.
pub const MIN_HMAC_SECRET_LEN: usize = 32;

#[derive(Debug, thiserror::Error)]
pub enum JwtError {
    #[error("Failed to encode token: {message}")]
    EncodingError { message: String },

    #[error("Failed to decode token: {message}")]
    DecodingError { message: String },

    #[error("Token expired")]
    Expired,

    #[error("Invalid signature")]
    InvalidSignature,

    #[error("Invalid claims: {message}")]
    InvalidClaims { message: String },

    #[error("Key generation error: {message}")]
    KeyGenerationError { message: String },

    #[error("Invalid key: {message}")]
    InvalidKey { message: String },
}

impl JwtError {
    #[must_use]
    pub fn encoding_error(message: impl Into<String>) -> Self {
        Self::EncodingError {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn decoding_error(message: impl Into<String>) -> Self {
        Self::DecodingError {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn invalid_claims(message: impl Into<String>) -> Self {
        Self::InvalidClaims {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn key_generation_error(message: impl Into<String>) -> Self {
        Self::KeyGenerationError {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn invalid_key(message: impl Into<String>) -> Self {
        Self::InvalidKey {
            message: message.into(),
        }
    }

    /// Returns `true` for problems with a presented token rather than with
    /// the service's own keys.
    #[must_use]
    pub fn is_validation_error(&self) -> bool {
        matches!(
            self,
            Self::Expired
                | Self::InvalidSignature
                | Self::InvalidClaims { .. }
                | Self::DecodingError { .. }
        )
    }
}

impl From<jsonwebtoken::errors::Error> for JwtError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        use jsonwebtoken::errors::ErrorKind;

        match err.kind() {
            ErrorKind::ExpiredSignature => Self::Expired,
            ErrorKind::InvalidSignature => Self::InvalidSignature,
            ErrorKind::InvalidIssuer
            | ErrorKind::InvalidSubject
            | ErrorKind::ImmatureSignature
            | ErrorKind::MissingRequiredClaim(_) => Self::invalid_claims(err.to_string()),
            ErrorKind::InvalidRsaKey(_) | ErrorKind::InvalidEcdsaKey | ErrorKind::InvalidKeyFormat => {
                Self::invalid_key(err.to_string())
            }
            _ => Self::decoding_error(err.to_string()),
        }
    }
}

impl From<JwtError> for SecurityError {
    fn from(err: JwtError) -> Self {
        match err {
            JwtError::Expired => SecurityError::TokenExpired,
            e if e.is_validation_error() => SecurityError::token_invalid(e.to_string()),
            e => SecurityError::internal(e.to_string()),
        }
    }
}

/// Supported signing algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SigningAlgorithm {
    HS256,
    RS256,
    RS384,
    ES384,
}

impl SigningAlgorithm {
    #[must_use]
    pub fn to_jwt_algorithm(self) -> Algorithm {
        match self {
            Self::HS256 => Algorithm::HS256,
            Self::RS256 => Algorithm::RS256,
            Self::RS384 => Algorithm::RS384,
            Self::ES384 => Algorithm::ES384,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::HS256 => "HS256",
            Self::RS256 => "RS256",
            Self::RS384 => "RS384",
            Self::ES384 => "ES384",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_uppercase().as_str() {
            "HS256" => Some(Self::HS256),
            "RS256" => Some(Self::RS256),
            "RS384" => Some(Self::RS384),
            "ES384" => Some(Self::ES384),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_rsa(&self) -> bool {
        matches!(self, Self::RS256 | Self::RS384)
    }

    #[must_use]
    pub fn is_symmetric(&self) -> bool {
        matches!(self, Self::HS256)
    }
}

impl fmt::Display for SigningAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Distinguishes access from refresh tokens signed by the same key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenType {
    Access,
    Refresh,
}

/// Claims of Aegis access and refresh tokens.
///
/// `jti` is the identifier the session record stores; it is what makes a
/// token revocable without keeping the token itself. Refresh tokens also
/// carry their family in `fid`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenClaims {
    pub iss: String,
    /// User id.
    pub sub: String,
    pub tid: TenantId,
    pub sid: SessionId,
    pub typ: TokenType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fid: Option<FamilyId>,
    pub jti: Uuid,
    pub iat: i64,
    pub exp: i64,
    /// Capability names granted to the session.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub caps: Vec<String>,
}

/// JSON Web Key Set.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Jwks {
    pub keys: Vec<Jwk>,
}

/// Public half of an asymmetric signing key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Jwk {
    pub kty: String,
    pub kid: String,
    #[serde(rename = "use")]
    pub use_: String,
    pub alg: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub n: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub e: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub crv: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub x: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub y: Option<String>,
}

enum PublicKeyData {
    Secret,
    Rsa { n: Vec<u8>, e: Vec<u8> },
    Ec { x: Vec<u8>, y: Vec<u8> },
}

/// Key material for one signing algorithm.
pub struct SigningKeyPair {
    pub kid: String,
    pub algorithm: SigningAlgorithm,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    public_key_data: PublicKeyData,
}

impl fmt::Debug for SigningKeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningKeyPair")
            .field("kid", &self.kid)
            .field("algorithm", &self.algorithm)
            .finish_non_exhaustive()
    }
}

fn ec_decoding_key(
    secret_key: &EcSecretKey,
    err: fn(String) -> JwtError,
) -> Result<(DecodingKey, PublicKeyData), JwtError> {
    let point = EcSigningKey::from(secret_key)
        .verifying_key()
        .to_encoded_point(false);
    let (Some(x), Some(y)) = (point.x(), point.y()) else {
        return Err(err("EC public key has no affine coordinates".into()));
    };
    let decoding_key = DecodingKey::from_ec_components(
        &URL_SAFE_NO_PAD.encode(x.as_slice()),
        &URL_SAFE_NO_PAD.encode(y.as_slice()),
    )
    .map_err(|e| err(e.to_string()))?;
    Ok((
        decoding_key,
        PublicKeyData::Ec {
            x: x.to_vec(),
            y: y.to_vec(),
        },
    ))
}

fn rsa_keys(
    private_key: &RsaPrivateKey,
    err: fn(String) -> JwtError,
) -> Result<(EncodingKey, DecodingKey, PublicKeyData), JwtError> {
    let public_key = RsaPublicKey::from(private_key);
    let private_pem = rsa::pkcs8::EncodePrivateKey::to_pkcs8_pem(private_key, LineEnding::LF)
        .map_err(|e| err(e.to_string()))?;
    let public_pem = public_key
        .to_public_key_pem(LineEnding::LF)
        .map_err(|e| err(e.to_string()))?;
    let encoding_key =
        EncodingKey::from_rsa_pem(private_pem.as_bytes()).map_err(|e| err(e.to_string()))?;
    let decoding_key =
        DecodingKey::from_rsa_pem(public_pem.as_bytes()).map_err(|e| err(e.to_string()))?;
    Ok((
        encoding_key,
        decoding_key,
        PublicKeyData::Rsa {
            n: public_key.n().to_bytes_be(),
            e: public_key.e().to_bytes_be(),
        },
    ))
}

impl SigningKeyPair {
    /// HS256 key from a shared secret of at least [`MIN_HMAC_SECRET_LEN`] bytes.
    pub fn from_secret(secret: &[u8]) -> Result<Self, JwtError> {
        if secret.len() < MIN_HMAC_SECRET_LEN {
            return Err(JwtError::invalid_key(format!(
                "HS256 secret must be at least {MIN_HMAC_SECRET_LEN} bytes"
            )));
        }
        Ok(Self {
            kid: "hs256".to_string(),
            algorithm: SigningAlgorithm::HS256,
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            public_key_data: PublicKeyData::Secret,
        })
    }

    /// Generates a 2048-bit RSA key pair for RS256 or RS384.
    pub fn generate_rsa(algorithm: SigningAlgorithm) -> Result<Self, JwtError> {
        if !algorithm.is_rsa() {
            return Err(JwtError::invalid_key(format!(
                "Algorithm {algorithm} is not RSA-based"
            )));
        }
        let private_key = RsaPrivateKey::new(&mut OsRng, 2048)
            .map_err(|e| JwtError::key_generation_error(e.to_string()))?;
        let (encoding_key, decoding_key, public_key_data) =
            rsa_keys(&private_key, |m| JwtError::key_generation_error(m))?;

        Ok(Self {
            kid: Uuid::new_v4().to_string(),
            algorithm,
            encoding_key,
            decoding_key,
            public_key_data,
        })
    }

    /// Generates a P-384 key pair for ES384.
    pub fn generate_ec() -> Result<Self, JwtError> {
        let secret_key = EcSecretKey::random(&mut OsRng);
        let private_pem = secret_key
            .to_pkcs8_pem(LineEnding::LF)
            .map_err(|e| JwtError::key_generation_error(e.to_string()))?;
        let encoding_key = EncodingKey::from_ec_pem(private_pem.as_bytes())
            .map_err(|e| JwtError::key_generation_error(e.to_string()))?;
        let (decoding_key, public_key_data) =
            ec_decoding_key(&secret_key, |m| JwtError::key_generation_error(m))?;

        Ok(Self {
            kid: Uuid::new_v4().to_string(),
            algorithm: SigningAlgorithm::ES384,
            encoding_key,
            decoding_key,
            public_key_data,
        })
    }

    /// Loads an asymmetric key from a PKCS#8 private key PEM. The public key
    /// is derived from it.
    pub fn from_pem(
        kid: impl Into<String>,
        algorithm: SigningAlgorithm,
        private_pem: &str,
    ) -> Result<Self, JwtError> {
        let (encoding_key, decoding_key, public_key_data) = match algorithm {
            SigningAlgorithm::HS256 => {
                return Err(JwtError::invalid_key("HS256 takes a secret, not a PEM key"));
            }
            SigningAlgorithm::RS256 | SigningAlgorithm::RS384 => {
                let private_key = <RsaPrivateKey as rsa::pkcs8::DecodePrivateKey>::from_pkcs8_pem(
                    private_pem,
                )
                .map_err(|e| JwtError::invalid_key(e.to_string()))?;
                rsa_keys(&private_key, |m| JwtError::invalid_key(m))?
            }
            SigningAlgorithm::ES384 => {
                let secret_key = EcSecretKey::from_pkcs8_pem(private_pem)
                    .map_err(|e| JwtError::invalid_key(e.to_string()))?;
                let encoding_key = EncodingKey::from_ec_pem(private_pem.as_bytes())
                    .map_err(|e| JwtError::invalid_key(e.to_string()))?;
                let (decoding_key, data) =
                    ec_decoding_key(&secret_key, |m| JwtError::invalid_key(m))?;
                (encoding_key, decoding_key, data)
            }
        };

        Ok(Self {
            kid: kid.into(),
            algorithm,
            encoding_key,
            decoding_key,
            public_key_data,
        })
    }

    /// The public key as a JWK. `None` for shared secrets.
    #[must_use]
    pub fn to_jwk(&self) -> Option<Jwk> {
        let base = |kty: &str| Jwk {
            kty: kty.to_string(),
            kid: self.kid.clone(),
            use_: "sig".to_string(),
            alg: self.algorithm.as_str().to_string(),
            n: None,
            e: None,
            crv: None,
            x: None,
            y: None,
        };
        match &self.public_key_data {
            PublicKeyData::Secret => None,
            PublicKeyData::Rsa { n, e } => Some(Jwk {
                n: Some(URL_SAFE_NO_PAD.encode(n)),
                e: Some(URL_SAFE_NO_PAD.encode(e)),
                ..base("RSA")
            }),
            PublicKeyData::Ec { x, y } => Some(Jwk {
                crv: Some("P-384".to_string()),
                x: Some(URL_SAFE_NO_PAD.encode(x)),
                y: Some(URL_SAFE_NO_PAD.encode(y)),
                ..base("EC")
            }),
        }
    }
}

/// Encodes and validates Aegis tokens. `Send + Sync`; share behind an `Arc`.
#[derive(Debug)]
pub struct JwtService {
    signing_key: SigningKeyPair,
    issuer: String,
    leeway_secs: u64,
}

impl JwtService {
    #[must_use]
    pub fn new(signing_key: SigningKeyPair, issuer: impl Into<String>) -> Self {
        Self {
            signing_key,
            issuer: issuer.into(),
            leeway_secs: 0,
        }
    }

    /// Clock skew tolerated when checking `exp`.
    #[must_use]
    pub fn with_leeway(mut self, leeway_secs: u64) -> Self {
        self.leeway_secs = leeway_secs;
        self
    }

    pub fn encode(&self, claims: &TokenClaims) -> Result<String, JwtError> {
        let mut header = Header::new(self.signing_key.algorithm.to_jwt_algorithm());
        header.kid = Some(self.signing_key.kid.clone());
        encode(&header, claims, &self.signing_key.encoding_key)
            .map_err(|e| JwtError::encoding_error(e.to_string()))
    }

    /// Verifies signature, issuer and expiry.
    pub fn decode(&self, token: &str) -> Result<TokenClaims, JwtError> {
        let mut validation = Validation::new(self.signing_key.algorithm.to_jwt_algorithm());
        validation.set_issuer(&[&self.issuer]);
        validation.set_required_spec_claims(&["exp", "iss", "sub"]);
        validation.validate_aud = false;
        validation.leeway = self.leeway_secs;

        Ok(decode::<TokenClaims>(token, &self.signing_key.decoding_key, &validation)?.claims)
    }

    /// Decodes and additionally requires the given token type.
    pub fn decode_as(&self, token: &str, typ: TokenType) -> Result<TokenClaims, JwtError> {
        let claims = self.decode(token)?;
        if claims.typ != typ {
            return Err(JwtError::invalid_claims(format!(
                "expected {typ:?} token, got {:?}",
                claims.typ
            )));
        }
        Ok(claims)
    }

    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    pub fn algorithm(&self) -> SigningAlgorithm {
        self.signing_key.algorithm
    }

    /// Public keys for verifying tokens; empty with a shared secret.
    #[must_use]
    pub fn jwks(&self) -> Jwks {
        Jwks {
            keys: self.signing_key.to_jwk().into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::OffsetDateTime;

    const SECRET: &[u8] = b"0123456789abcdef0123456789abcdef";

    fn claims(typ: TokenType, exp_offset: i64) -> TokenClaims {
        let now = OffsetDateTime::now_utc().unix_timestamp();
        TokenClaims {
            iss: "https://aegis.test".into(),
            sub: Uuid::new_v4().to_string(),
            tid: TenantId::new(),
            sid: SessionId::new(),
            typ,
            fid: (typ == TokenType::Refresh).then(FamilyId::new),
            jti: Uuid::new_v4(),
            iat: now,
            exp: now + exp_offset,
            caps: vec!["session_admin".into()],
        }
    }

    #[test]
    fn test_hs256_round_trip() {
        let service = JwtService::new(
            SigningKeyPair::from_secret(SECRET).unwrap(),
            "https://aegis.test",
        );
        let original = claims(TokenType::Refresh, 300);
        let token = service.encode(&original).unwrap();
        assert_eq!(service.decode(&token).unwrap(), original);
        assert!(service.jwks().keys.is_empty());
    }

    #[test]
    fn test_short_secret_rejected() {
        assert!(matches!(
            SigningKeyPair::from_secret(b"short"),
            Err(JwtError::InvalidKey { .. })
        ));
    }

    #[test]
    fn test_rs256_and_jwk() {
        let key = SigningKeyPair::generate_rsa(SigningAlgorithm::RS256).unwrap();
        let service = JwtService::new(key, "https://aegis.test");
        let token = service.encode(&claims(TokenType::Access, 300)).unwrap();
        assert!(service.decode(&token).is_ok());

        let jwks = service.jwks();
        assert_eq!(jwks.keys.len(), 1);
        assert_eq!(jwks.keys[0].kty, "RSA");
        assert!(jwks.keys[0].n.is_some());
    }

    #[test]
    fn test_es384_round_trip() {
        let service = JwtService::new(SigningKeyPair::generate_ec().unwrap(), "https://aegis.test");
        let token = service.encode(&claims(TokenType::Access, 300)).unwrap();
        assert!(service.decode(&token).is_ok());
        assert_eq!(service.jwks().keys[0].crv.as_deref(), Some("P-384"));
    }

    #[test]
    fn test_es384_from_generated_pem() {
        let secret_key = EcSecretKey::random(&mut OsRng);
        let pem = secret_key.to_pkcs8_pem(LineEnding::LF).unwrap();
        let key = SigningKeyPair::from_pem("k1", SigningAlgorithm::ES384, &pem).unwrap();
        let service = JwtService::new(key, "https://aegis.test");
        let token = service.encode(&claims(TokenType::Access, 300)).unwrap();
        assert!(service.decode(&token).is_ok());
        assert_eq!(service.jwks().keys[0].kid, "k1");
    }

    #[test]
    fn test_expired_token() {
        let service = JwtService::new(
            SigningKeyPair::from_secret(SECRET).unwrap(),
            "https://aegis.test",
        );
        let token = service.encode(&claims(TokenType::Access, -120)).unwrap();
        let err = service.decode(&token).unwrap_err();
        assert!(matches!(err, JwtError::Expired));
        assert!(matches!(SecurityError::from(err), SecurityError::TokenExpired));
    }

    #[test]
    fn test_wrong_key_and_wrong_issuer() {
        let a = JwtService::new(SigningKeyPair::from_secret(SECRET).unwrap(), "https://aegis.test");
        let b = JwtService::new(
            SigningKeyPair::from_secret(b"ffffffffffffffffffffffffffffffff").unwrap(),
            "https://aegis.test",
        );
        let token = a.encode(&claims(TokenType::Access, 300)).unwrap();
        assert!(matches!(b.decode(&token), Err(JwtError::InvalidSignature)));

        let other_issuer = JwtService::new(
            SigningKeyPair::from_secret(SECRET).unwrap(),
            "https://elsewhere.test",
        );
        let err = other_issuer.decode(&token).unwrap_err();
        assert!(matches!(
            SecurityError::from(err),
            SecurityError::TokenInvalid { .. }
        ));
    }

    #[test]
    fn test_decode_as_rejects_wrong_type() {
        let service = JwtService::new(
            SigningKeyPair::from_secret(SECRET).unwrap(),
            "https://aegis.test",
        );
        let token = service.encode(&claims(TokenType::Access, 300)).unwrap();
        assert!(service.decode_as(&token, TokenType::Access).is_ok());
        assert!(matches!(
            service.decode_as(&token, TokenType::Refresh),
            Err(JwtError::InvalidClaims { .. })
        ));
    }
}
