use anyhow::{anyhow, Result};
use async_trait::async_trait;
use oauth2::basic::BasicClient;
use oauth2::reqwest::async_http_client;
use oauth2::{
    AuthUrl, AuthorizationCode, ClientId, ClientSecret, CsrfToken, RedirectUrl, RefreshToken,
    Scope, TokenResponse, TokenUrl,
};

use crate::auth::{AccessCredential, Authorizer};

pub const GOOGLE_AUTH_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
pub const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";

/// Scope limited to files this application creates
pub const DRIVE_FILE_SCOPE: &str = "https://www.googleapis.com/auth/drive.file";

/// Authorization-code / refresh-token client for the remote store.
///
/// Without a refresh token no credential can be minted non-interactively;
/// [`authorize`](Authorizer::authorize) then fails with the consent URL so the
/// caller can present it.
pub struct OAuth2Authorizer {
    client: BasicClient,
    scopes: Vec<String>,
    refresh_token: Option<String>,
}

impl OAuth2Authorizer {
    pub fn new(
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        auth_url: impl Into<String>,
        token_url: impl Into<String>,
        redirect_uri: impl Into<String>,
        scopes: Vec<String>,
    ) -> Result<Self> {
        let client = BasicClient::new(
            ClientId::new(client_id.into()),
            Some(ClientSecret::new(client_secret.into())),
            AuthUrl::new(auth_url.into())?,
            Some(TokenUrl::new(token_url.into())?),
        )
        .set_redirect_uri(RedirectUrl::new(redirect_uri.into())?);

        Ok(Self {
            client,
            scopes,
            refresh_token: None,
        })
    }

    /// Google endpoints with the `drive.file` scope
    pub fn google(
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        redirect_uri: impl Into<String>,
    ) -> Result<Self> {
        Self::new(
            client_id,
            client_secret,
            GOOGLE_AUTH_URL,
            GOOGLE_TOKEN_URL,
            redirect_uri,
            vec![DRIVE_FILE_SCOPE.to_string()],
        )
    }

    pub fn with_refresh_token<S: Into<String>>(mut self, refresh_token: S) -> Self {
        self.refresh_token = Some(refresh_token.into());
        self
    }

    /// Consent URL the user must visit to grant access
    pub fn authorize_url(&self) -> String {
        let mut req = self.client.authorize_url(CsrfToken::new_random);
        for s in &self.scopes {
            req = req.add_scope(Scope::new(s.clone()));
        }
        let (url, _csrf) = req.url();
        url.to_string()
    }

    /// Complete the consent flow with the code from the redirect.
    pub async fn exchange_code(&self, code: &str) -> Result<AccessCredential> {
        let token = self
            .client
            .exchange_code(AuthorizationCode::new(code.to_string()))
            .request_async(async_http_client)
            .await?;

        Ok(AccessCredential::new(token.access_token().secret().to_string()))
    }
}

#[async_trait]
impl Authorizer for OAuth2Authorizer {
    async fn authorize(&self) -> Result<AccessCredential> {
        let Some(refresh_token) = self.refresh_token.as_deref() else {
            return Err(anyhow!(
                "interactive consent required: open {}",
                self.authorize_url()
            ));
        };

        let token = self
            .client
            .exchange_refresh_token(&RefreshToken::new(refresh_token.to_string()))
            .request_async(async_http_client)
            .await?;

        Ok(AccessCredential::new(token.access_token().secret().to_string()))
    }
}
