use credmgr_utils::SecretString;
use serde::Deserialize;

/// Token endpoint success body (RFC 6749 §5.1).
///
/// `Deserialize`-only so tokens cannot end up serialized into logs. Unknown
/// fields are ignored.
#[derive(Deserialize)]
pub(crate) struct TokenResponse {
    pub access_token: SecretString,
    #[serde(default)]
    pub refresh_token: Option<SecretString>,
    #[serde(default)]
    pub expires_in: Option<u64>,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub scope: Option<ScopeField>,
}

/// Providers disagree on the `scope` shape: RFC 6749 says a space-delimited
/// string, some send a JSON array.
#[derive(Deserialize)]
#[serde(untagged)]
pub(crate) enum ScopeField {
    List(Vec<String>),
    Delimited(String),
}

impl ScopeField {
    pub fn into_scopes(self) -> Vec<String> {
        match self {
            Self::List(list) => list.into_iter().filter(|s| !s.is_empty()).collect(),
            Self::Delimited(raw) => raw.split_whitespace().map(str::to_owned).collect(),
        }
    }
}

/// Token endpoint error body (RFC 6749 §5.2), plus the `message` field some
/// providers use instead.
#[derive(Debug, Default, Deserialize)]
pub(crate) struct ErrorResponse {
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub error_description: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

impl ErrorResponse {
    /// Best-effort parse; a non-JSON body yields an empty response.
    pub fn parse(body: &[u8]) -> Self {
        serde_json::from_slice(body).unwrap_or_default()
    }

    /// `true` when the endpoint says the grant itself is no longer good.
    pub fn rejects_grant(&self) -> bool {
        if self.error.as_deref() == Some("invalid_grant") {
            return true;
        }
        [&self.message, &self.error_description]
            .into_iter()
            .flatten()
            .any(|text| text.to_ascii_lowercase().contains("invalid refresh token"))
    }

    /// `true` when the endpoint says the presented token is already invalid
    /// (`invalid_token`, or a message-style "Invalid token").
    pub fn reports_invalid_token(&self) -> bool {
        if self.error.as_deref() == Some("invalid_token") {
            return true;
        }
        [&self.message, &self.error_description]
            .into_iter()
            .flatten()
            .any(|text| text.eq_ignore_ascii_case("invalid token"))
    }

    /// Short human-readable summary for error messages.
    pub fn summary(&self) -> Option<String> {
        match (&self.error, &self.error_description, &self.message) {
            (Some(code), Some(desc), _) => Some(format!("{code}: {desc}")),
            (Some(code), None, _) => Some(code.clone()),
            (None, Some(desc), _) | (None, None, Some(desc)) => Some(desc.clone()),
            (None, None, None) => None,
        }
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn full_response() {
        let json = r#"{
            "access_token":"a2","refresh_token":"r2","expires_in":3600,
            "token_type":"bearer","scope":["chat:read","chat:edit"]
        }"#;
        let r: TokenResponse = serde_json::from_str(json).unwrap();
        assert_eq!(r.access_token.expose(), "a2");
        assert_eq!(r.refresh_token.as_ref().map(SecretString::expose), Some("r2"));
        assert_eq!(r.expires_in, Some(3600));
        assert_eq!(r.scope.unwrap().into_scopes(), vec!["chat:read", "chat:edit"]);
    }

    #[test]
    fn minimal_response() {
        let r: TokenResponse = serde_json::from_str(r#"{"access_token":"a"}"#).unwrap();
        assert!(r.refresh_token.is_none());
        assert!(r.expires_in.is_none());
        assert!(r.token_type.is_none());
        assert!(r.scope.is_none());
    }

    #[test]
    fn missing_access_token_fails() {
        assert!(serde_json::from_str::<TokenResponse>(r#"{"expires_in":10}"#).is_err());
    }

    #[test]
    fn delimited_scope() {
        let r: TokenResponse =
            serde_json::from_str(r#"{"access_token":"a","scope":"read  write"}"#).unwrap();
        assert_eq!(r.scope.unwrap().into_scopes(), vec!["read", "write"]);
    }

    #[test]
    fn invalid_grant_is_rejection() {
        let e = ErrorResponse::parse(br#"{"error":"invalid_grant","error_description":"expired"}"#);
        assert!(e.rejects_grant());
        assert_eq!(e.summary().as_deref(), Some("invalid_grant: expired"));
    }

    #[test]
    fn message_style_rejection() {
        let e = ErrorResponse::parse(br#"{"status":400,"message":"Invalid refresh token"}"#);
        assert!(e.rejects_grant());
        assert_eq!(e.summary().as_deref(), Some("Invalid refresh token"));
    }

    #[test]
    fn other_errors_are_not_rejection() {
        let e = ErrorResponse::parse(br#"{"error":"invalid_client"}"#);
        assert!(!e.rejects_grant());
        let junk = ErrorResponse::parse(b"<html>bad gateway</html>");
        assert!(!junk.rejects_grant());
        assert!(junk.summary().is_none());
    }

    #[test]
    fn invalid_token_is_recognized() {
        assert!(ErrorResponse::parse(br#"{"error":"invalid_token"}"#).reports_invalid_token());
        assert!(
            ErrorResponse::parse(br#"{"status":400,"message":"Invalid token"}"#)
                .reports_invalid_token()
        );
        assert!(!ErrorResponse::parse(br#"{"error":"invalid_client"}"#).reports_invalid_token());
        assert!(
            !ErrorResponse::parse(br#"{"error":"unsupported_token_type"}"#)
                .reports_invalid_token()
        );
        assert!(!ErrorResponse::parse(b"").reports_invalid_token());
    }
}
