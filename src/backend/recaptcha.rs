use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use super::{BackendError, CaptchaVerifier};
use crate::upstream::UpstreamPolicy;

pub const DEFAULT_VERIFY_ENDPOINT: &str = "https://www.google.com/recaptcha/api/siteverify";

#[derive(Debug, Deserialize)]
struct VerifyResponse {
    #[serde(default)]
    success: bool,
    #[serde(default, rename = "error-codes")]
    error_codes: Vec<String>,
}

/// Server-side check of a CAPTCHA response token
#[derive(Clone)]
pub struct RecaptchaVerifier {
    http: Client,
    endpoint: String,
    secret: String,
    policy: UpstreamPolicy,
}

impl std::fmt::Debug for RecaptchaVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecaptchaVerifier")
            .field("endpoint", &self.endpoint)
            .finish_non_exhaustive()
    }
}

impl RecaptchaVerifier {
    pub fn new(http: Client, secret: impl Into<String>, policy: UpstreamPolicy) -> Self {
        Self {
            http,
            endpoint: DEFAULT_VERIFY_ENDPOINT.to_string(),
            secret: secret.into(),
            policy,
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }
}

#[async_trait]
impl CaptchaVerifier for RecaptchaVerifier {
    async fn verify(&self, token: &str) -> Result<bool, BackendError> {
        let request = self
            .http
            .post(&self.endpoint)
            .form(&[("secret", self.secret.as_str()), ("response", token)]);

        self.policy
            .once("verify_captcha", async {
                let response = request.send().await?;
                if !response.status().is_success() {
                    return Err(BackendError::Status {
                        status: response.status().as_u16(),
                        body: response.text().await.unwrap_or_default(),
                    });
                }
                let body: VerifyResponse = response.json().await?;
                if !body.success {
                    debug!(error_codes = ?body.error_codes, "CAPTCHA rejected");
                }
                Ok(body.success)
            })
            .await
    }
}
