use std::sync::Arc;

use arc_swap::ArcSwapOption;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use snafu::{OptionExt, ResultExt};

use crate::error::{CredentialError, DecodePayloadSnafu, MalformedTokenSnafu, ParseClaimsSnafu};

/// Bearer token plus the expiry decoded from it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    pub token: String,
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct Claims {
    #[serde(default)]
    exp: Option<i64>,
}

impl Credential {
    /// Reads `exp` from a JWT payload without checking the signature; the backend does that.
    pub fn from_jwt(token: impl Into<String>) -> Result<Self, CredentialError> {
        let token = token.into();
        let payload = token.split('.').nth(1).context(MalformedTokenSnafu {
            stage: "split-jwt-segments",
            details: "missing payload segment".to_string(),
        })?;
        let bytes = URL_SAFE_NO_PAD
            .decode(payload.trim_end_matches('='))
            .context(DecodePayloadSnafu {
                stage: "decode-jwt-payload",
            })?;
        let claims: Claims = serde_json::from_slice(&bytes).context(ParseClaimsSnafu {
            stage: "parse-jwt-claims",
        })?;
        let expires_at = claims
            .exp
            .and_then(|exp| DateTime::<Utc>::from_timestamp(exp, 0));

        Ok(Self { token, expires_at })
    }

    /// Valid only when an expiry is present and still in the future.
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        !self.token.is_empty() && self.expires_at.is_some_and(|expires_at| expires_at > now)
    }

    pub fn is_valid(&self) -> bool {
        self.is_valid_at(Utc::now())
    }
}

/// Where the transport looks for a credential before opening a stream.
pub trait CredentialSource: Send + Sync {
    fn current(&self) -> Option<Credential>;

    /// Returns the current credential only if it is still valid.
    fn valid_credential(&self) -> Option<Credential> {
        self.current().filter(Credential::is_valid)
    }
}

/// Process-memory credential slot shared by every session.
#[derive(Debug, Default)]
pub struct TokenStore {
    slot: ArcSwapOption<Credential>,
}

impl TokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_credential(credential: Credential) -> Self {
        let store = Self::new();
        store.set(credential);
        store
    }

    pub fn set(&self, credential: Credential) {
        self.slot.store(Some(Arc::new(credential)));
    }

    /// Decodes and stores a raw JWT; malformed tokens are logged and leave the slot empty.
    pub fn set_token(&self, token: impl Into<String>) -> bool {
        match Credential::from_jwt(token) {
            Ok(credential) => {
                self.set(credential);
                true
            }
            Err(error) => {
                tracing::warn!(error = %error, "discarding malformed auth token");
                self.clear();
                false
            }
        }
    }

    pub fn clear(&self) {
        self.slot.store(None);
    }

    pub fn is_valid(&self) -> bool {
        self.valid_credential().is_some()
    }
}

impl CredentialSource for TokenStore {
    fn current(&self) -> Option<Credential> {
        self.slot.load_full().map(|credential| Credential::clone(&credential))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn jwt_with_exp(exp: i64) -> String {
        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
        let payload = URL_SAFE_NO_PAD.encode(format!(r#"{{"sub":"u1","exp":{exp}}}"#));
        format!("{header}.{payload}.signature")
    }

    #[test]
    fn decodes_expiry_from_jwt_payload() {
        let credential = Credential::from_jwt(jwt_with_exp(4_102_444_800)).expect("valid jwt");

        assert_eq!(
            credential.expires_at.map(|at| at.timestamp()),
            Some(4_102_444_800)
        );
        assert!(credential.is_valid());
    }

    #[test]
    fn expired_token_is_invalid() {
        let credential = Credential::from_jwt(jwt_with_exp(1_000)).expect("valid jwt");
        assert!(!credential.is_valid());
    }

    #[test]
    fn token_without_exp_is_invalid() {
        let payload = URL_SAFE_NO_PAD.encode(br#"{"sub":"u1"}"#);
        let credential = Credential::from_jwt(format!("h.{payload}.s")).expect("valid jwt");
        assert_eq!(credential.expires_at, None);
        assert!(!credential.is_valid());
    }

    #[test]
    fn opaque_token_is_rejected() {
        assert!(matches!(
            Credential::from_jwt("not-a-jwt"),
            Err(CredentialError::MalformedToken { .. })
        ));
        assert!(matches!(
            Credential::from_jwt("a.!!!.c"),
            Err(CredentialError::DecodePayload { .. })
        ));
    }

    #[test]
    fn token_store_swaps_and_clears() {
        let store = TokenStore::new();
        assert!(store.current().is_none());
        assert!(!store.is_valid());

        assert!(store.set_token(jwt_with_exp(4_102_444_800)));
        assert!(store.is_valid());

        assert!(!store.set_token("garbage"));
        assert!(store.current().is_none());
    }
}
