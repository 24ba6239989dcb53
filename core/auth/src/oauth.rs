//! OAuth2 identity provider.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use oauth2::basic::{BasicClient, BasicErrorResponseType, BasicTokenResponse};
use oauth2::{
    reqwest, AuthUrl, AuthorizationCode, ClientId, ClientSecret, CsrfToken, EndpointNotSet,
    EndpointSet, RedirectUrl, RefreshToken, RequestTokenError, Scope, TokenResponse, TokenUrl,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use lockbox_common::{ConsentIntent, Error, Result, TokenError};

use crate::identity::{ExchangeOutcome, ExchangeRequest, IdentityProvider, IssuedToken};

/// OAuth2 authorization endpoint.
pub const GOOGLE_AUTH_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
/// OAuth2 token endpoint.
pub const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
/// Redirect URL for the loopback consent flow.
pub const REDIRECT_URL: &str = "http://localhost:8080/callback";
/// Scope granting access to the private app-data folder.
pub const DRIVE_APPDATA_SCOPE: &str = "https://www.googleapis.com/auth/drive.appdata";

/// Client configuration for the OAuth2 provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OAuthConfig {
    /// Client ID.
    pub client_id: String,
    /// Client secret.
    pub client_secret: String,
    /// Authorization endpoint.
    pub auth_url: String,
    /// Token endpoint.
    pub token_url: String,
    /// Redirect URL for the consent flow.
    pub redirect_url: String,
}

impl Default for OAuthConfig {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            client_secret: String::new(),
            auth_url: GOOGLE_AUTH_URL.to_string(),
            token_url: GOOGLE_TOKEN_URL.to_string(),
            redirect_url: REDIRECT_URL.to_string(),
        }
    }
}

type ConfiguredClient =
    BasicClient<EndpointSet, EndpointNotSet, EndpointNotSet, EndpointNotSet, EndpointSet>;

/// Identity provider speaking OAuth2 with refresh tokens.
///
/// A revoked refresh token (`invalid_grant`) or a missing one turns into
/// [`ExchangeOutcome::ConsentRequired`] carrying an authorization URL.
pub struct OAuthIdentity {
    client: ConfiguredClient,
    http: reqwest::Client,
    config: OAuthConfig,
}

impl OAuthIdentity {
    /// Create a provider from `config`.
    ///
    /// # Errors
    /// - Any endpoint URL is invalid
    /// - The HTTP client cannot be initialized
    pub fn new(config: OAuthConfig) -> Result<Self> {
        let mut client = BasicClient::new(ClientId::new(config.client_id.clone()))
            .set_auth_uri(
                AuthUrl::new(config.auth_url.clone())
                    .map_err(|e| Error::InvalidInput(format!("Invalid auth URL: {}", e)))?,
            )
            .set_token_uri(
                TokenUrl::new(config.token_url.clone())
                    .map_err(|e| Error::InvalidInput(format!("Invalid token URL: {}", e)))?,
            )
            .set_redirect_uri(
                RedirectUrl::new(config.redirect_url.clone())
                    .map_err(|e| Error::InvalidInput(format!("Invalid redirect URL: {}", e)))?,
            );

        if !config.client_secret.is_empty() {
            client = client.set_client_secret(ClientSecret::new(config.client_secret.clone()));
        }

        // Following redirects on the token endpoint opens the client to SSRF.
        let http = reqwest::ClientBuilder::new()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| Error::InvalidInput(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            http,
            config,
        })
    }

    /// Current configuration.
    pub fn config(&self) -> &OAuthConfig {
        &self.config
    }

    /// Build the interactive consent request for `account`.
    pub fn consent_intent(
        &self,
        account: Option<&str>,
        scopes: &[String],
        reason: impl Into<String>,
    ) -> ConsentIntent {
        let mut request = self
            .client
            .authorize_url(CsrfToken::new_random)
            .add_scopes(scopes.iter().cloned().map(Scope::new))
            .add_extra_param("access_type", "offline")
            .add_extra_param("prompt", "consent");

        if let Some(account) = account {
            request = request.add_extra_param("login_hint", account.to_string());
        }

        let (url, _csrf) = request.url();

        ConsentIntent {
            url: url.to_string(),
            account: account.map(str::to_string),
            reason: reason.into(),
        }
    }

    /// Complete the consent flow with the authorization code from the
    /// redirect.
    ///
    /// # Errors
    /// - `ExchangeFailed` if the token endpoint rejects the code
    pub async fn exchange_code(&self, code: &str) -> std::result::Result<IssuedToken, TokenError> {
        let response = self
            .client
            .exchange_code(AuthorizationCode::new(code.to_string()))
            .request_async(&self.http)
            .await
            .map_err(|e| TokenError::ExchangeFailed(format!("Code exchange failed: {}", e)))?;

        info!("Authorization code exchanged");
        Ok(issued_from(&response, None))
    }
}

fn issued_from(response: &BasicTokenResponse, previous_refresh: Option<&str>) -> IssuedToken {
    let expires_at: Option<DateTime<Utc>> = response
        .expires_in()
        .and_then(|d| Duration::from_std(d).ok())
        .map(|d| Utc::now() + d);

    IssuedToken {
        access_token: response.access_token().secret().clone(),
        refresh_token: response
            .refresh_token()
            .map(|t| t.secret().clone())
            .or_else(|| previous_refresh.map(str::to_string)),
        expires_at,
    }
}

#[async_trait]
impl IdentityProvider for OAuthIdentity {
    async fn exchange_token(&self, request: ExchangeRequest) -> ExchangeOutcome {
        let Some(refresh_token) = request.refresh_token.as_deref() else {
            debug!("No refresh token; consent required");
            return ExchangeOutcome::ConsentRequired(self.consent_intent(
                Some(&request.account_id),
                &request.scopes,
                "No refresh token available",
            ));
        };

        let result = self
            .client
            .exchange_refresh_token(&RefreshToken::new(refresh_token.to_string()))
            .add_scopes(request.scopes.iter().cloned().map(Scope::new))
            .request_async(&self.http)
            .await;

        match result {
            Ok(response) => ExchangeOutcome::Token(issued_from(&response, Some(refresh_token))),
            Err(RequestTokenError::ServerResponse(err))
                if matches!(err.error(), BasicErrorResponseType::InvalidGrant) =>
            {
                info!("Refresh token rejected; consent required");
                let reason = err
                    .error_description()
                    .cloned()
                    .unwrap_or_else(|| "invalid_grant".to_string());
                ExchangeOutcome::ConsentRequired(self.consent_intent(
                    Some(&request.account_id),
                    &request.scopes,
                    reason,
                ))
            }
            Err(e) => ExchangeOutcome::Failure(format!("Token refresh failed: {}", e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::{Matcher, Server};

    fn config_for(server: &Server) -> OAuthConfig {
        OAuthConfig {
            client_id: "test_id".to_string(),
            client_secret: "test_secret".to_string(),
            token_url: format!("{}/token", server.url()),
            ..OAuthConfig::default()
        }
    }

    fn request(refresh_token: Option<&str>) -> ExchangeRequest {
        ExchangeRequest {
            account_id: "user@example.com".to_string(),
            scopes: vec![DRIVE_APPDATA_SCOPE.to_string()],
            refresh_token: refresh_token.map(str::to_string),
        }
    }

    #[test]
    fn test_invalid_url_rejected() {
        let config = OAuthConfig {
            token_url: "not a url".to_string(),
            ..OAuthConfig::default()
        };
        assert!(matches!(
            OAuthIdentity::new(config),
            Err(Error::InvalidInput(_))
        ));
    }

    #[test]
    fn test_consent_intent_url() {
        let identity = OAuthIdentity::new(OAuthConfig {
            client_id: "test_id".to_string(),
            ..OAuthConfig::default()
        })
        .unwrap();

        let intent = identity.consent_intent(
            Some("user@example.com"),
            &[DRIVE_APPDATA_SCOPE.to_string()],
            "test",
        );

        let url = url::Url::parse(&intent.url).unwrap();
        let query: std::collections::HashMap<_, _> = url.query_pairs().into_owned().collect();

        assert!(intent.url.starts_with(GOOGLE_AUTH_URL));
        assert_eq!(query["client_id"], "test_id");
        assert_eq!(query["access_type"], "offline");
        assert_eq!(query["login_hint"], "user@example.com");
        assert_eq!(query["scope"], DRIVE_APPDATA_SCOPE);
        assert!(query.contains_key("state"));
        assert_eq!(intent.account.as_deref(), Some("user@example.com"));
    }

    #[tokio::test]
    async fn test_refresh_success() {
        let mut server = Server::new_async().await;

        let mock = server
            .mock("POST", "/token")
            .match_body(Matcher::AllOf(vec![
                Matcher::UrlEncoded("grant_type".into(), "refresh_token".into()),
                Matcher::UrlEncoded("refresh_token".into(), "rt-1".into()),
            ]))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"access_token":"fresh","token_type":"Bearer","expires_in":3600}"#)
            .create_async()
            .await;

        let identity = OAuthIdentity::new(config_for(&server)).unwrap();
        let outcome = identity.exchange_token(request(Some("rt-1"))).await;

        mock.assert_async().await;
        let ExchangeOutcome::Token(issued) = outcome else {
            panic!("expected token, got {:?}", outcome);
        };
        assert_eq!(issued.access_token, "fresh");
        // The provider did not rotate the refresh token.
        assert_eq!(issued.refresh_token.as_deref(), Some("rt-1"));
        let expires_at = issued.expires_at.unwrap();
        assert!(expires_at > Utc::now() + Duration::minutes(59));
    }

    #[tokio::test]
    async fn test_invalid_grant_requires_consent() {
        let mut server = Server::new_async().await;

        let _mock = server
            .mock("POST", "/token")
            .with_status(400)
            .with_header("content-type", "application/json")
            .with_body(r#"{"error":"invalid_grant","error_description":"Token has been expired or revoked."}"#)
            .create_async()
            .await;

        let identity = OAuthIdentity::new(config_for(&server)).unwrap();
        let outcome = identity.exchange_token(request(Some("revoked"))).await;

        let ExchangeOutcome::ConsentRequired(intent) = outcome else {
            panic!("expected consent, got {:?}", outcome);
        };
        assert_eq!(intent.reason, "Token has been expired or revoked.");
        assert_eq!(intent.account.as_deref(), Some("user@example.com"));
    }

    #[tokio::test]
    async fn test_missing_refresh_token_requires_consent() {
        let server = Server::new_async().await;
        let identity = OAuthIdentity::new(config_for(&server)).unwrap();

        let outcome = identity.exchange_token(request(None)).await;
        assert!(matches!(outcome, ExchangeOutcome::ConsentRequired(_)));
    }

    #[tokio::test]
    async fn test_server_error_is_failure() {
        let mut server = Server::new_async().await;

        let _mock = server
            .mock("POST", "/token")
            .with_status(500)
            .with_body("unavailable")
            .create_async()
            .await;

        let identity = OAuthIdentity::new(config_for(&server)).unwrap();
        let outcome = identity.exchange_token(request(Some("rt-1"))).await;

        assert!(matches!(outcome, ExchangeOutcome::Failure(_)));
    }

    #[tokio::test]
    async fn test_exchange_code() {
        let mut server = Server::new_async().await;

        let mock = server
            .mock("POST", "/token")
            .match_body(Matcher::AllOf(vec![
                Matcher::UrlEncoded("grant_type".into(), "authorization_code".into()),
                Matcher::UrlEncoded("code".into(), "auth-code".into()),
            ]))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"access_token":"first","token_type":"Bearer","expires_in":3600,"refresh_token":"rt-new"}"#,
            )
            .create_async()
            .await;

        let identity = OAuthIdentity::new(config_for(&server)).unwrap();
        let issued = identity.exchange_code("auth-code").await.unwrap();

        mock.assert_async().await;
        assert_eq!(issued.access_token, "first");
        assert_eq!(issued.refresh_token.as_deref(), Some("rt-new"));
    }
}
