//! Client-side token decoding.
//!
//! Tokens are JWTs (`header.payload.signature`). Only the payload is decoded
//! here; signature verification is the dispatch service's job.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde_json::Value;

use crate::error::ConfigError;

/// Claims consumed from the token payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenClaims {
    /// `sub` claim.
    pub tenant_id: String,
    /// `server_url` claim, used as the API URL fallback.
    pub server_url: Option<String>,
    /// `grpc_broadcast_address` claim, used as the endpoint fallback.
    pub grpc_broadcast_address: Option<String>,
}

/// Decode the payload segment of `token`.
pub fn decode_claims(token: &str) -> Result<TokenClaims, ConfigError> {
    let segments: Vec<&str> = token.trim().split('.').collect();
    if segments.len() != 3 {
        return Err(ConfigError::InvalidTokenFormat {
            reason: format!("expected 3 dot-separated segments, found {}", segments.len()),
        });
    }

    let payload = URL_SAFE_NO_PAD
        .decode(segments[1].trim_end_matches('='))
        .map_err(|e| ConfigError::InvalidTokenFormat {
            reason: format!("payload is not base64url: {e}"),
        })?;

    let claims: Value =
        serde_json::from_slice(&payload).map_err(|e| ConfigError::InvalidTokenFormat {
            reason: format!("payload is not JSON: {e}"),
        })?;

    let Value::Object(claims) = claims else {
        return Err(ConfigError::InvalidTokenFormat {
            reason: "payload is not a JSON object".to_string(),
        });
    };

    let tenant_id = claims
        .get("sub")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ConfigError::MissingClaim {
            claim: "sub".to_string(),
        })?
        .to_string();

    // Best-effort: a malformed optional claim only loses the default.
    let optional = |name: &str| {
        let value = claims.get(name)?;
        match value.as_str() {
            Some(s) if !s.is_empty() => Some(s.to_string()),
            _ => {
                tracing::debug!(claim = name, "Ignoring non-string token claim");
                None
            }
        }
    };

    Ok(TokenClaims {
        tenant_id,
        server_url: optional("server_url"),
        grpc_broadcast_address: optional("grpc_broadcast_address"),
    })
}

/// Build an unsigned token around `claims`. Test helper.
#[cfg(test)]
pub(crate) fn encode_test_token(claims: &Value) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"ES256","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(claims.to_string());
    format!("{header}.{payload}.c2lnbmF0dXJl")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_all_claims() {
        let token = encode_test_token(&json!({
            "sub": "tenant-1",
            "server_url": "https://api.example.com",
            "grpc_broadcast_address": "grpc.example.com:443"
        }));

        let claims = decode_claims(&token).unwrap();
        assert_eq!(claims.tenant_id, "tenant-1");
        assert_eq!(claims.server_url.as_deref(), Some("https://api.example.com"));
        assert_eq!(
            claims.grpc_broadcast_address.as_deref(),
            Some("grpc.example.com:443")
        );
    }

    #[test]
    fn padded_payload_is_accepted() {
        let header = URL_SAFE_NO_PAD.encode(b"{}");
        let payload = base64::engine::general_purpose::URL_SAFE.encode(br#"{"sub":"t"}"#);
        let token = format!("{header}.{payload}.sig");
        assert_eq!(decode_claims(&token).unwrap().tenant_id, "t");
    }

    #[test]
    fn wrong_segment_count_is_invalid_format() {
        for token in ["abc", "a.b", "a.b.c.d", ""] {
            let err = decode_claims(token).unwrap_err();
            assert!(
                matches!(err, ConfigError::InvalidTokenFormat { .. }),
                "token {token:?} gave {err:?}"
            );
        }
    }

    #[test]
    fn non_json_payload_is_invalid_format() {
        let payload = URL_SAFE_NO_PAD.encode(b"not json at all");
        let token = format!("aGVhZGVy.{payload}.c2ln");
        assert!(matches!(
            decode_claims(&token),
            Err(ConfigError::InvalidTokenFormat { .. })
        ));

        let array = URL_SAFE_NO_PAD.encode(b"[1,2,3]");
        let token = format!("aGVhZGVy.{array}.c2ln");
        assert!(matches!(
            decode_claims(&token),
            Err(ConfigError::InvalidTokenFormat { .. })
        ));
    }

    #[test]
    fn missing_subject_is_fatal() {
        let token = encode_test_token(&json!({ "server_url": "https://x" }));
        assert!(matches!(
            decode_claims(&token),
            Err(ConfigError::MissingClaim { claim }) if claim == "sub"
        ));
    }

    #[test]
    fn malformed_optional_claims_are_dropped() {
        let token = encode_test_token(&json!({
            "sub": "tenant-1",
            "server_url": 42,
            "grpc_broadcast_address": null
        }));
        let claims = decode_claims(&token).unwrap();
        assert_eq!(claims.server_url, None);
        assert_eq!(claims.grpc_broadcast_address, None);
    }
}
