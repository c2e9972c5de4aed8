//! Type-state call lifecycle and credential verification.
//!
//! Every inbound call moves through `Unverified → Verified → Admitted`.
//! Only an admitted call can reach the dispatcher, so skipping
//! authentication or rate limiting is unrepresentable:
//!
//! ```text
//! Call<Unverified>
//!     → .verify(&authenticator)     // bearer token → SecurityContext
//!         → Call<Verified>
//!             → .admit(&limiter)    // fixed-window rate limit
//!                 → Call<Admitted>
//! ```
//!
//! Credentials are either a static shared secret (compared in constant
//! time) or a signed token verified against a configured public key.

use std::collections::HashSet;
use std::fmt;
use std::net::IpAddr;

use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode, decode_header};
use serde::Deserialize;
use subtle::ConstantTimeEq;
use tracing::warn;
use zeroize::Zeroizing;

use pigate_config::{ApiKey, SecurityConfig};

use crate::error::GatewayError;
use crate::rate_limit::RateLimiter;

/// How the caller proved its identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMode {
    ApiKey,
    Token,
}

impl AuthMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthMode::ApiKey => "api_key",
            AuthMode::Token => "token",
        }
    }
}

/// Who is calling. Produced per call, never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecurityContext {
    /// `api-key:<index>` for shared secrets, the token subject otherwise.
    pub caller_identity: String,
    pub mode: AuthMode,
}

/// Pull the token out of an `Authorization: Bearer <token>` value.
pub fn extract_credential(header: Option<&str>) -> Option<&str> {
    let mut parts = header?.split_whitespace();
    let scheme = parts.next()?;
    let token = parts.next()?;
    if parts.next().is_some() || !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    Some(token)
}

#[derive(Debug, Deserialize)]
struct Claims {
    #[serde(default)]
    sub: Option<String>,
}

/// Public keys for signed-token verification, one per algorithm family the
/// configured PEM could be parsed as.
struct TokenKeys {
    rsa: Option<DecodingKey>,
    ec: Option<DecodingKey>,
    ed: Option<DecodingKey>,
}

impl TokenKeys {
    fn from_pem(pem: &[u8]) -> Result<Self, GatewayError> {
        let keys = Self {
            rsa: DecodingKey::from_rsa_pem(pem).ok(),
            ec: DecodingKey::from_ec_pem(pem).ok(),
            ed: DecodingKey::from_ed_pem(pem).ok(),
        };
        if keys.rsa.is_none() && keys.ec.is_none() && keys.ed.is_none() {
            return Err(GatewayError::Config(
                "JWT public key is not a valid RSA, EC or Ed25519 PEM".to_string(),
            ));
        }
        Ok(keys)
    }

    fn for_algorithm(&self, alg: Algorithm) -> Option<&DecodingKey> {
        match alg {
            Algorithm::RS256 => self.rsa.as_ref(),
            Algorithm::ES256 => self.ec.as_ref(),
            Algorithm::EdDSA => self.ed.as_ref(),
            _ => None,
        }
    }
}

/// Verifies bearer credentials against the configured secrets and key.
pub struct Authenticator {
    api_keys: Vec<ApiKey>,
    token_keys: Option<TokenKeys>,
}

impl fmt::Debug for Authenticator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Authenticator")
            .field("api_keys", &self.api_keys.len())
            .field("token_verification", &self.token_keys.is_some())
            .finish()
    }
}

impl Authenticator {
    /// Build from shared secrets and an optional PEM-encoded public key.
    pub fn new(api_keys: Vec<ApiKey>, public_key_pem: Option<&[u8]>) -> Result<Self, GatewayError> {
        let token_keys = public_key_pem.map(TokenKeys::from_pem).transpose()?;
        Ok(Self {
            api_keys,
            token_keys,
        })
    }

    /// Build from the `[security]` section, reading the key file if one is
    /// configured.
    pub async fn from_config(security: &SecurityConfig) -> Result<Self, GatewayError> {
        let pem = match (&security.jwt_public_key_pem, &security.jwt_public_key_path) {
            (Some(inline), _) => Some(inline.as_bytes().to_vec()),
            (None, Some(path)) => Some(tokio::fs::read(path).await.map_err(|e| {
                GatewayError::Config(format!(
                    "cannot read JWT public key {}: {e}",
                    path.display()
                ))
            })?),
            (None, None) => None,
        };
        Self::new(security.api_keys.clone(), pem.as_deref())
    }

    /// Resolve a bearer token to a [`SecurityContext`].
    pub fn verify(&self, token: Option<&str>) -> Result<SecurityContext, GatewayError> {
        let Some(token) = token else {
            return Err(GatewayError::Unauthorized("missing bearer token".to_string()));
        };

        if let Some(index) = self.match_api_key(token) {
            return Ok(SecurityContext {
                caller_identity: format!("api-key:{index}"),
                mode: AuthMode::ApiKey,
            });
        }

        let Some(keys) = self.token_keys.as_ref() else {
            warn!("Rejected credential: no matching API key");
            return Err(GatewayError::Unauthorized("invalid credential".to_string()));
        };

        match verify_token(keys, token) {
            Ok(claims) => Ok(SecurityContext {
                caller_identity: claims
                    .sub
                    .filter(|s| !s.is_empty())
                    .unwrap_or_else(|| "token:anonymous".to_string()),
                mode: AuthMode::Token,
            }),
            Err(reason) => {
                warn!(reason = %reason, "Rejected credential: token verification failed");
                Err(GatewayError::Unauthorized("invalid credential".to_string()))
            }
        }
    }

    /// Index of the configured key equal to `token`. Every key is compared.
    fn match_api_key(&self, token: &str) -> Option<usize> {
        let mut found = None;
        for (index, key) in self.api_keys.iter().enumerate() {
            if bool::from(key.expose().ct_eq(token.as_bytes())) && found.is_none() {
                found = Some(index);
            }
        }
        found
    }
}

fn verify_token(keys: &TokenKeys, token: &str) -> Result<Claims, String> {
    let header = decode_header(token).map_err(|e| format!("malformed header: {e}"))?;
    let key = keys
        .for_algorithm(header.alg)
        .ok_or_else(|| format!("algorithm {:?} not accepted", header.alg))?;

    let mut validation = Validation::new(header.alg);
    validation.validate_aud = false;
    validation.validate_exp = true;
    validation.required_spec_claims = HashSet::new();

    decode::<Claims>(token, key, &validation)
        .map(|data| data.claims)
        .map_err(|e| e.to_string())
}

// ── Call lifecycle ──────────────────────────────────────────────────────

/// Credential not yet checked.
#[derive(Clone)]
pub struct Unverified {
    credential: Option<Zeroizing<String>>,
}

/// Credential checked; not yet counted against the rate limit.
#[derive(Debug, Clone)]
pub struct Verified {
    context: SecurityContext,
}

/// Credential checked and within the rate limit. Ready for dispatch.
#[derive(Debug, Clone)]
pub struct Admitted {
    context: SecurityContext,
}

/// One inbound call, parameterized by how far it has been vetted.
#[derive(Debug, Clone)]
pub struct Call<S> {
    source: IpAddr,
    state: S,
}

impl fmt::Debug for Unverified {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Unverified")
            .field("credential", &self.credential.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

impl Call<Unverified> {
    /// Start a call from its source address and raw `Authorization` header.
    pub fn new(source: IpAddr, authorization: Option<&str>) -> Self {
        Self {
            source,
            state: Unverified {
                credential: extract_credential(authorization)
                    .map(|token| Zeroizing::new(token.to_string())),
            },
        }
    }

    pub fn verify(self, authenticator: &Authenticator) -> Result<Call<Verified>, GatewayError> {
        let context = authenticator.verify(self.state.credential.as_deref().map(String::as_str))?;
        Ok(Call {
            source: self.source,
            state: Verified { context },
        })
    }
}

impl Call<Verified> {
    pub fn context(&self) -> &SecurityContext {
        &self.state.context
    }

    pub fn admit(self, limiter: &RateLimiter) -> Result<Call<Admitted>, GatewayError> {
        limiter.check(self.source, &self.state.context.caller_identity)?;
        Ok(Call {
            source: self.source,
            state: Admitted {
                context: self.state.context,
            },
        })
    }
}

impl Call<Admitted> {
    pub fn context(&self) -> &SecurityContext {
        &self.state.context
    }

    pub fn identity(&self) -> &str {
        &self.state.context.caller_identity
    }
}

impl<S> Call<S> {
    pub fn source(&self) -> IpAddr {
        self.source
    }
}
