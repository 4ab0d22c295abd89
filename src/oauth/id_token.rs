//! ID token decoding.
//!
//! By default the payload segment is decoded without checking the signature;
//! the token arrives directly from the provider's token endpoint over the
//! back channel. With `oauth.id_token.verify` enabled the signature is checked
//! against the provider's JWKS:
//!
//! 1. Read `kid` and `alg` from the (unverified) header.
//! 2. Look the key up in the cached JWKS (one hour); on an unknown `kid`
//!    refetch once before failing.
//! 3. Verify the signature, `exp` (60 s leeway) and `aud == client_id`.

use std::time::{Duration, Instant};

use base64::{
    Engine as _,
    engine::general_purpose::{STANDARD_NO_PAD, URL_SAFE_NO_PAD},
};
use jsonwebtoken::{
    Algorithm, DecodingKey, Validation,
    jwk::{AlgorithmParameters, JwkSet},
};
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::debug;

use crate::config::GatewayConfig;
use crate::{Error, Result};

/// How long a fetched JWKS is trusted
const JWKS_TTL: Duration = Duration::from_secs(3600);

/// Upper bound on a single JWKS fetch
const JWKS_FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// Clock skew tolerated on `exp`
const LEEWAY_SECS: u64 = 60;

/// Decode the payload of a compact JWT without verifying it.
///
/// Trailing `=` padding and the standard base64 alphabet are tolerated.
pub fn decode_unverified(id_token: &str) -> Result<Value> {
    let mut parts = id_token.split('.');
    let payload = match (parts.next(), parts.next()) {
        (Some(_), Some(payload)) if !payload.is_empty() => payload.trim_end_matches('='),
        _ => return Err(Error::IdToken("not a compact JWT".to_string())),
    };

    let bytes = URL_SAFE_NO_PAD
        .decode(payload)
        .or_else(|_| STANDARD_NO_PAD.decode(payload))
        .map_err(|e| Error::IdToken(format!("payload is not base64: {e}")))?;

    let claims: Value = serde_json::from_slice(&bytes)
        .map_err(|e| Error::IdToken(format!("payload is not JSON: {e}")))?;

    if claims.is_object() {
        Ok(claims)
    } else {
        Err(Error::IdToken("payload is not a JSON object".to_string()))
    }
}

struct CachedJwks {
    keys: JwkSet,
    fetched_at: Instant,
}

/// Signature verification against a single provider JWKS
struct JwksVerifier {
    http: reqwest::Client,
    jwks_uri: String,
    audience: String,
    cache: RwLock<Option<CachedJwks>>,
}

impl JwksVerifier {
    async fn verify(&self, id_token: &str) -> Result<Value> {
        let header = jsonwebtoken::decode_header(id_token)
            .map_err(|e| Error::IdToken(format!("invalid header: {e}")))?;

        let alg = supported_algorithm(header.alg)?;
        let kid = header
            .kid
            .ok_or_else(|| Error::IdToken("header has no 'kid'".to_string()))?;

        let key = self.find_decoding_key(&kid).await?;

        let mut validation = Validation::new(alg);
        validation.leeway = LEEWAY_SECS;
        validation.set_audience(&[self.audience.as_str()]);

        jsonwebtoken::decode::<Value>(id_token, &key, &validation)
            .map(|data| data.claims)
            .map_err(|e| Error::IdToken(format!("verification failed: {e}")))
    }

    async fn find_decoding_key(&self, kid: &str) -> Result<DecodingKey> {
        let jwks = self.jwks(false).await?;
        if let Some(key) = find_key_in_jwks(&jwks, kid) {
            return Ok(key);
        }

        debug!(kid = %kid, "Key not found in cached JWKS, refreshing");
        let jwks = self.jwks(true).await?;
        find_key_in_jwks(&jwks, kid).ok_or_else(|| Error::IdToken(format!("unknown key id: {kid}")))
    }

    async fn jwks(&self, force_refresh: bool) -> Result<JwkSet> {
        if !force_refresh {
            let cached = self.cache.read().await;
            if let Some(entry) = cached.as_ref()
                && entry.fetched_at.elapsed() < JWKS_TTL
            {
                return Ok(entry.keys.clone());
            }
        }

        debug!(jwks_uri = %self.jwks_uri, "Fetching JWKS");
        let response = self
            .http
            .get(&self.jwks_uri)
            .send()
            .await
            .map_err(|e| Error::IdToken(format!("JWKS fetch failed: {e}")))?;
        if !response.status().is_success() {
            return Err(Error::IdToken(format!(
                "JWKS fetch failed: HTTP {}",
                response.status()
            )));
        }
        let keys: JwkSet = response
            .json()
            .await
            .map_err(|e| Error::IdToken(format!("invalid JWKS document: {e}")))?;

        *self.cache.write().await = Some(CachedJwks {
            keys: keys.clone(),
            fetched_at: Instant::now(),
        });
        Ok(keys)
    }
}

fn supported_algorithm(alg: Algorithm) -> Result<Algorithm> {
    match alg {
        Algorithm::RS256
        | Algorithm::RS384
        | Algorithm::RS512
        | Algorithm::ES256
        | Algorithm::ES384 => Ok(alg),
        other => Err(Error::IdToken(format!("unsupported algorithm {other:?}"))),
    }
}

/// Find a JWK by `kid` and convert it to a `DecodingKey`.
fn find_key_in_jwks(jwks: &JwkSet, kid: &str) -> Option<DecodingKey> {
    let jwk = jwks
        .keys
        .iter()
        .find(|jwk| jwk.common.key_id.as_deref() == Some(kid))?;

    match &jwk.algorithm {
        AlgorithmParameters::RSA(rsa) => DecodingKey::from_rsa_components(&rsa.n, &rsa.e).ok(),
        AlgorithmParameters::EllipticCurve(ec) => {
            DecodingKey::from_ec_components(&ec.x, &ec.y).ok()
        }
        AlgorithmParameters::OctetKey(_) | AlgorithmParameters::OctetKeyPair(_) => None,
    }
}

/// Turns the `id_token` from a token response into `userInfo` claims
pub struct IdTokenDecoder {
    verifier: Option<JwksVerifier>,
}

impl std::fmt::Debug for IdTokenDecoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdTokenDecoder")
            .field("verify", &self.verifier.is_some())
            .field("jwks_uri", &self.verifier.as_ref().map(|v| v.jwks_uri.as_str()))
            .finish()
    }
}

impl IdTokenDecoder {
    /// Decode payloads without signature checks
    #[must_use]
    pub fn unverified() -> Self {
        Self { verifier: None }
    }

    /// Verify signatures against `jwks_uri`, requiring `aud == audience`
    #[must_use]
    pub fn verifying(http: reqwest::Client, jwks_uri: String, audience: String) -> Self {
        Self {
            verifier: Some(JwksVerifier {
                http,
                jwks_uri,
                audience,
                cache: RwLock::new(None),
            }),
        }
    }

    /// Pick the mode from `oauth.id_token.verify`.
    ///
    /// Verified mode fetches the JWKS over HTTPS only, with a bounded timeout
    /// and no redirects.
    pub fn from_config(config: &GatewayConfig) -> Result<Self> {
        if !config.verify_id_token {
            return Ok(Self::unverified());
        }
        if !config.jwks_uri.starts_with("https://") {
            return Err(Error::Config(format!(
                "oauth.id_token.jwks_uri must use https: {}",
                config.jwks_uri
            )));
        }

        let http = reqwest::Client::builder()
            .https_only(true)
            .timeout(JWKS_FETCH_TIMEOUT)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| Error::Config(format!("Failed to build JWKS HTTP client: {e}")))?;
        Ok(Self::verifying(
            http,
            config.jwks_uri.clone(),
            config.client_id.clone(),
        ))
    }

    /// Whether signatures are checked
    #[must_use]
    pub fn is_verifying(&self) -> bool {
        self.verifier.is_some()
    }

    /// Decode (and, in verified mode, verify) an ID token into its claims.
    pub async fn decode(&self, id_token: &str) -> Result<Value> {
        match &self.verifier {
            Some(verifier) => verifier.verify(id_token).await,
            None => decode_unverified(id_token),
        }
    }
}
