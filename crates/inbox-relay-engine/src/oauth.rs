use oauth2::basic::{BasicClient, BasicErrorResponseType, BasicTokenResponse};
use oauth2::{
    AuthType, AuthUrl, AuthorizationCode, ClientId, ClientSecret, CsrfToken, EndpointNotSet,
    EndpointSet, RedirectUrl, RefreshToken, RequestTokenError, Scope, TokenResponse, TokenUrl,
};
use url::Url;

use crate::config::OAuthSettings;
use crate::credential::{Credential, TokenGrant};
use crate::error::RelayError;
use crate::provider::AuthProvider;

const AUTH_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
const TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const GMAIL_READONLY_SCOPE: &str = "https://www.googleapis.com/auth/gmail.readonly";

type OAuthClient =
    BasicClient<EndpointSet, EndpointNotSet, EndpointNotSet, EndpointNotSet, EndpointSet>;

/// Google OAuth2 authorization-code client.
pub struct GoogleOAuth {
    client: OAuthClient,
    http: reqwest::Client,
}

impl GoogleOAuth {
    pub fn new(settings: &OAuthSettings) -> Result<Self, RelayError> {
        Self::with_endpoints(settings, AUTH_URL, TOKEN_URL)
    }

    pub fn with_endpoints(
        settings: &OAuthSettings,
        auth_url: &str,
        token_url: &str,
    ) -> Result<Self, RelayError> {
        let mut client = BasicClient::new(ClientId::new(settings.client_id.clone()))
            .set_auth_uri(AuthUrl::new(auth_url.to_owned()).map_err(invalid_setting)?)
            .set_token_uri(TokenUrl::new(token_url.to_owned()).map_err(invalid_setting)?)
            .set_redirect_uri(
                RedirectUrl::new(settings.redirect_uri.to_string()).map_err(invalid_setting)?,
            )
            .set_auth_type(AuthType::RequestBody);

        if let Some(secret) = &settings.client_secret {
            client = client.set_client_secret(ClientSecret::new(secret.clone()));
        }

        let http = reqwest::ClientBuilder::new()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|error| RelayError::AuthTransient(format!("cannot build HTTP client: {error}")))?;

        Ok(Self { client, http })
    }
}

fn invalid_setting(error: url::ParseError) -> RelayError {
    RelayError::AuthInvalid(format!("invalid OAuth endpoint: {error}"))
}

impl AuthProvider for GoogleOAuth {
    fn authorization_url(&self) -> Result<Url, RelayError> {
        // prompt=consent makes Google issue a refresh token even on re-consent
        let (url, _state) = self
            .client
            .authorize_url(CsrfToken::new_random)
            .add_scope(Scope::new(GMAIL_READONLY_SCOPE.to_owned()))
            .add_extra_param("access_type", "offline")
            .add_extra_param("prompt", "consent")
            .url();
        Ok(url)
    }

    async fn exchange_auth_code(&self, code: &str) -> Result<TokenGrant, RelayError> {
        let response = self
            .client
            .exchange_code(AuthorizationCode::new(code.to_owned()))
            .request_async(&self.http)
            .await
            .map_err(classify_token_error)?;

        Ok(grant_from_response(&response))
    }

    async fn refresh_access_token(&self, credential: &Credential) -> Result<TokenGrant, RelayError> {
        let refresh_token = credential
            .refresh_token
            .clone()
            .ok_or_else(|| RelayError::AuthInvalid("no refresh token is stored".to_owned()))?;

        let response = self
            .client
            .exchange_refresh_token(&RefreshToken::new(refresh_token))
            .request_async(&self.http)
            .await
            .map_err(classify_token_error)?;

        Ok(grant_from_response(&response))
    }
}

fn grant_from_response(response: &BasicTokenResponse) -> TokenGrant {
    TokenGrant {
        access_token: response.access_token().secret().to_owned(),
        refresh_token: response.refresh_token().map(|token| token.secret().to_owned()),
        expires_in: response.expires_in(),
        scope: response.scopes().map(|scopes| {
            scopes
                .iter()
                .map(|scope| scope.as_str())
                .collect::<Vec<_>>()
                .join(" ")
        }),
        token_type: Some(response.token_type().as_ref().to_owned()),
    }
}

/// `invalid_grant` and `unauthorized_client` mean the stored credential can
/// never work again; everything else is worth retrying later.
fn classify_token_error<RE>(
    error: RequestTokenError<RE, oauth2::StandardErrorResponse<BasicErrorResponseType>>,
) -> RelayError
where
    RE: std::error::Error + 'static,
{
    match &error {
        RequestTokenError::ServerResponse(response) => match response.error() {
            BasicErrorResponseType::InvalidGrant | BasicErrorResponseType::UnauthorizedClient => {
                RelayError::AuthInvalid(response.to_string())
            }
            _ => RelayError::AuthTransient(response.to_string()),
        },
        other => RelayError::AuthTransient(other.to_string()),
    }
}
