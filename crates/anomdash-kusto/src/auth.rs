//! Azure AD client-credentials tokens for the cluster.

use std::time::{Duration, Instant};

use anomdash_core::ExternalError;
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::debug;

const AUTHORITY: &str = "https://login.microsoftonline.com";

/// Tokens are refreshed this long before they expire.
const EXPIRY_MARGIN: Duration = Duration::from_secs(60);

/// Application (service principal) credentials.
#[derive(Clone)]
pub struct ClientCredentials {
    pub tenant_id: String,
    pub client_id: String,
    pub client_secret: String,
}

impl std::fmt::Debug for ClientCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientCredentials")
            .field("tenant_id", &self.tenant_id)
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: u64,
}

fn default_expires_in() -> u64 {
    3600
}

#[derive(Debug, Clone)]
pub struct CachedToken {
    value: String,
    expires_at: Instant,
}

/// How requests to the cluster authenticate.
#[derive(Debug)]
pub enum Authenticator {
    /// No `Authorization` header, e.g. a local emulator.
    Anonymous,
    ClientSecret {
        credentials: ClientCredentials,
        /// `<cluster>/.default`
        scope: String,
        cache: Mutex<Option<CachedToken>>,
    },
}

impl Authenticator {
    pub fn client_secret(credentials: ClientCredentials, cluster: &str) -> Self {
        Authenticator::ClientSecret {
            credentials,
            scope: format!("{}/.default", cluster.trim_end_matches('/')),
            cache: Mutex::new(None),
        }
    }

    /// Bearer token for the next request, fetched or served from cache.
    pub async fn bearer(&self, http: &reqwest::Client) -> Result<Option<String>, ExternalError> {
        let (credentials, scope, cache) = match self {
            Authenticator::Anonymous => return Ok(None),
            Authenticator::ClientSecret {
                credentials,
                scope,
                cache,
            } => (credentials, scope, cache),
        };

        let mut cached = cache.lock().await;
        if let Some(token) = cached.as_ref() {
            if token.expires_at > Instant::now() + EXPIRY_MARGIN {
                return Ok(Some(token.value.clone()));
            }
        }

        let token = fetch_token(http, credentials, scope).await?;
        let value = token.value.clone();
        *cached = Some(token);
        Ok(Some(value))
    }
}

async fn fetch_token(
    http: &reqwest::Client,
    credentials: &ClientCredentials,
    scope: &str,
) -> Result<CachedToken, ExternalError> {
    let url = format!("{AUTHORITY}/{}/oauth2/v2.0/token", credentials.tenant_id);
    debug!(tenant = %credentials.tenant_id, client = %credentials.client_id, "requesting access token");

    let form = [
        ("grant_type", "client_credentials"),
        ("client_id", credentials.client_id.as_str()),
        ("client_secret", credentials.client_secret.as_str()),
        ("scope", scope),
    ];
    let resp = http
        .post(&url)
        .form(&form)
        .send()
        .await
        .map_err(|e| ExternalError::AuthFailure(format!("token request error: {e}")))?;

    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(ExternalError::AuthFailure(format!("token endpoint status {status}: {body}")));
    }

    let parsed: TokenResponse = resp
        .json()
        .await
        .map_err(|e| ExternalError::AuthFailure(format!("token parse error: {e}")))?;

    Ok(CachedToken {
        value: parsed.access_token,
        expires_at: Instant::now() + Duration::from_secs(parsed.expires_in),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn credentials() -> ClientCredentials {
        ClientCredentials {
            tenant_id: "tenant".into(),
            client_id: "app".into(),
            client_secret: "s3cret".into(),
        }
    }

    #[test]
    fn test_scope_from_cluster() {
        match Authenticator::client_secret(credentials(), "https://help.kusto.windows.net/") {
            Authenticator::ClientSecret { scope, .. } => {
                assert_eq!(scope, "https://help.kusto.windows.net/.default")
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_debug_redacts_secret() {
        let rendered = format!("{:?}", credentials());
        assert!(!rendered.contains("s3cret"));
        assert!(rendered.contains("<redacted>"));
    }

    #[tokio::test]
    async fn test_anonymous_has_no_token() {
        let http = reqwest::Client::new();
        assert_eq!(Authenticator::Anonymous.bearer(&http).await, Ok(None));
    }

    #[tokio::test]
    async fn test_cached_token_is_reused() {
        let auth = Authenticator::client_secret(credentials(), "https://c.kusto.windows.net");
        if let Authenticator::ClientSecret { cache, .. } = &auth {
            *cache.lock().await = Some(CachedToken {
                value: "cached".into(),
                expires_at: Instant::now() + Duration::from_secs(3600),
            });
        }
        let http = reqwest::Client::new();
        assert_eq!(auth.bearer(&http).await, Ok(Some("cached".to_string())));
    }
}
