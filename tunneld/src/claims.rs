//! Access-token claims (spec component C2).
//!
//! Signature verification is out of scope: the management plane that
//! issues tokens is trusted, and this module only has to parse and
//! validate the *shape* of a claims payload. [`TokenParser`] is the
//! seam a future signing scheme would plug into; [`UnsignedTokenParser`]
//! is the one concrete implementation we ship, and simply decodes the
//! base64url JSON payload without checking any signature.

use base64::Engine as _;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct Actor {
    pub id: String,
    #[serde(default)]
    pub is_support: bool,
}

/// Actor identity is the `id` alone; `is_support` is metadata, not part
/// of who the actor is for session-lookup purposes.
impl PartialEq for Actor {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}
impl Eq for Actor {}

/// Spec.md §3: tunnel id, account tag, actor, issuer. The core trusts
/// none of this beyond "non-empty" — signature verification already
/// happened upstream of whatever produced the token this crate decodes.
#[derive(Debug, Clone, Deserialize)]
pub struct Claims {
    pub tunnel_id: String,
    pub account_tag: String,
    pub actor: Actor,
    pub issuer: String,
}

#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    #[error("missing access_token query parameter")]
    MissingQueryParam,
    #[error("access token failed to decode: {0}")]
    Decode(#[source] anyhow::Error),
    #[error("claims are missing required field: {field}")]
    EmptyClaim { field: &'static str },
}

/// Abstracts over how an access token's claims are recovered. Kept
/// narrow on purpose: no signing algorithm, no key material, nothing
/// that would imply this crate owns token issuance.
pub trait TokenParser: Send + Sync {
    fn parse(&self, token: &str) -> Result<Claims, TokenError>;
}

/// Decodes a base64url JSON payload. Does not verify a signature; the
/// token is trusted by construction of who is allowed to reach this
/// service.
#[derive(Debug, Default)]
pub struct UnsignedTokenParser;

impl TokenParser for UnsignedTokenParser {
    fn parse(&self, token: &str) -> Result<Claims, TokenError> {
        let payload = token.split('.').next().unwrap_or(token);
        let bytes = base64::engine::general_purpose::URL_SAFE_NO_PAD
            .decode(payload)
            .map_err(|e| TokenError::Decode(e.into()))?;
        let claims: Claims = serde_json::from_slice(&bytes).map_err(|e| TokenError::Decode(e.into()))?;
        if claims.tunnel_id.is_empty() {
            return Err(TokenError::EmptyClaim { field: "tunnel_id" });
        }
        if claims.account_tag.is_empty() {
            return Err(TokenError::EmptyClaim { field: "account_tag" });
        }
        if claims.actor.id.is_empty() {
            return Err(TokenError::EmptyClaim { field: "actor.id" });
        }
        Ok(claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(json: &str) -> String {
        base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(json.as_bytes())
    }

    fn valid_claims_json(actor_id: &str) -> String {
        format!(
            r#"{{"tunnel_id":"t-1","account_tag":"acct-1","actor":{{"id":"{actor_id}","is_support":true}},"issuer":"iss-1"}}"#
        )
    }

    #[test]
    fn parses_valid_claims() {
        let token = encode(&valid_claims_json("user-1"));
        let claims = UnsignedTokenParser.parse(&token).unwrap();
        assert_eq!(claims.tunnel_id, "t-1");
        assert_eq!(claims.account_tag, "acct-1");
        assert_eq!(claims.actor.id, "user-1");
        assert!(claims.actor.is_support);
        assert_eq!(claims.issuer, "iss-1");
    }

    #[test]
    fn rejects_empty_actor_id() {
        let token = encode(&valid_claims_json(""));
        let err = UnsignedTokenParser.parse(&token).unwrap_err();
        assert!(matches!(err, TokenError::EmptyClaim { field: "actor.id" }));
    }

    #[test]
    fn rejects_empty_tunnel_id() {
        let token = encode(r#"{"tunnel_id":"","account_tag":"acct-1","actor":{"id":"user-1"},"issuer":"iss-1"}"#);
        let err = UnsignedTokenParser.parse(&token).unwrap_err();
        assert!(matches!(err, TokenError::EmptyClaim { field: "tunnel_id" }));
    }

    #[test]
    fn rejects_garbage_payload() {
        let err = UnsignedTokenParser.parse("not-base64!!").unwrap_err();
        assert!(matches!(err, TokenError::Decode(_)));
    }
}
