//! IAM token acquisition, delegated to a narrow trait so the SDK port never
//! has to know how bearer tokens are minted. The real token exchange
//! (`/identity/token`) is one HTTP POST.

use async_trait::async_trait;

use crate::error::SdkError;

#[async_trait]
pub trait IamAuthenticator: Send + Sync {
    async fn access_token(&self) -> Result<String, SdkError>;
}

/// Exchanges an API key for a bearer token against the IAM endpoint derived
/// in `VpcConfiguration::initialize`.
pub struct LiveIamAuthenticator {
    http: reqwest::Client,
    iam_endpoint: String,
    api_key: String,
}

impl LiveIamAuthenticator {
    #[must_use]
    pub fn new(http: reqwest::Client, iam_endpoint: String, api_key: String) -> Self {
        Self {
            http,
            iam_endpoint,
            api_key,
        }
    }
}

#[async_trait]
impl IamAuthenticator for LiveIamAuthenticator {
    async fn access_token(&self) -> Result<String, SdkError> {
        #[derive(serde::Deserialize)]
        struct TokenResponse {
            access_token: String,
        }

        let resp = self
            .http
            .post(&self.iam_endpoint)
            .form(&[
                ("grant_type", "urn:ibm:params:oauth:grant-type:apikey"),
                ("apikey", self.api_key.as_str()),
            ])
            .send()
            .await
            .map_err(|e| SdkError::new(format!("IAM token request failed: {e}"), None))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            tracing::info!(status = %status, body, "IAM token request returned an error");
            return Err(SdkError::new(
                format!("IAM token request failed with status {status}"),
                Some(status.as_u16()),
            ));
        }

        let token: TokenResponse = resp
            .json()
            .await
            .map_err(|e| SdkError::new(format!("IAM token response decode failed: {e}"), None))?;
        Ok(token.access_token)
    }
}

/// Fixed-token authenticator used by tests and the fake provider.
pub struct FakeIamAuthenticator {
    pub token: String,
}

#[async_trait]
impl IamAuthenticator for FakeIamAuthenticator {
    async fn access_token(&self) -> Result<String, SdkError> {
        Ok(self.token.clone())
    }
}
