//! Template email delivery over the Mailtrap send API.

use std::fmt;

use async_trait::async_trait;
use reqwest::{Client, Url};
use serde::Serialize;
use serde_json::json;
use tracing::{info, instrument};

use super::{BackendError, Mailer};
use crate::config::Config;
use crate::models::EmailKind;
use crate::upstream::UpstreamPolicy;

pub const DEFAULT_SEND_ENDPOINT: &str = "https://send.api.mailtrap.io/api/send";

const SENDER_NAME: &str = "Hack The Bias Team";

#[derive(Debug, Serialize)]
struct Address<'a> {
    email: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<&'a str>,
}

#[derive(Debug, Serialize)]
struct TemplateMessage<'a> {
    from: Address<'a>,
    to: Vec<Address<'a>>,
    template_uuid: &'a str,
    template_variables: serde_json::Value,
    headers: serde_json::Value,
}

#[derive(Clone)]
pub struct MailtrapMailer {
    http: Client,
    endpoint: String,
    token: Option<String>,
    welcome_template: Option<String>,
    complete_template: Option<String>,
    from: String,
    mail_domain: String,
    unsubscribe_base: String,
    policy: UpstreamPolicy,
}

impl fmt::Debug for MailtrapMailer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MailtrapMailer")
            .field("endpoint", &self.endpoint)
            .field("token", &self.token.as_ref().map(|_| "[REDACTED]"))
            .field("from", &self.from)
            .finish()
    }
}

impl MailtrapMailer {
    pub fn from_config(config: &Config, http: Client) -> Self {
        Self {
            http,
            endpoint: DEFAULT_SEND_ENDPOINT.to_string(),
            token: non_empty(config.mailtrap_token.clone()),
            welcome_template: non_empty(config.mailtrap_template_uuid.clone()),
            complete_template: non_empty(config.mailtrap_complete_template_uuid.clone()),
            from: config.mail_from.clone(),
            mail_domain: config.mail_domain.clone(),
            unsubscribe_base: config.unsubscribe_base.clone(),
            policy: UpstreamPolicy::new(config.upstream_timeout()),
        }
    }

    /// Point the client at a different send endpoint
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    fn template_for(&self, kind: EmailKind) -> Result<&str, BackendError> {
        let template = match kind {
            EmailKind::Preregistration | EmailKind::GoogleSignupWelcome => {
                self.welcome_template.as_deref()
            }
            EmailKind::RegistrationComplete => self.complete_template.as_deref(),
        };
        template.ok_or(match kind {
            EmailKind::RegistrationComplete => {
                BackendError::NotConfigured("MAILTRAP_COMPLETE_REG_TEMPLATE_UUID")
            }
            _ => BackendError::NotConfigured("MAILTRAP_TEMPLATE_UUID"),
        })
    }

    /// Unsubscribe link with the recipient encoded as a query parameter
    pub fn unsubscribe_url(&self, to_email: &str) -> Result<String, BackendError> {
        Url::parse_with_params(&self.unsubscribe_base, [("email", to_email)])
            .map(String::from)
            .map_err(|e| BackendError::InvalidResponse(format!("bad unsubscribe base: {}", e)))
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

#[async_trait]
impl Mailer for MailtrapMailer {
    #[instrument(skip(self, name), fields(kind = kind.as_str()))]
    async fn send(&self, kind: EmailKind, to_email: &str, name: &str) -> Result<(), BackendError> {
        let token = self
            .token
            .as_deref()
            .ok_or(BackendError::NotConfigured("MAILTRAP_PASS"))?;
        let template_uuid = self.template_for(kind)?;
        let unsubscribe_url = self.unsubscribe_url(to_email)?;

        let message = TemplateMessage {
            from: Address {
                email: &self.from,
                name: Some(SENDER_NAME),
            },
            to: vec![Address {
                email: to_email,
                name: None,
            }],
            template_uuid,
            template_variables: json!({
                "name": name,
                "unsubscribe_url": unsubscribe_url,
            }),
            headers: json!({
                "List-Unsubscribe": format!(
                    "<mailto:unsubscribe@{}>, <{}>",
                    self.mail_domain, unsubscribe_url
                ),
            }),
        };

        let request = self.http.post(&self.endpoint).bearer_auth(token).json(&message);

        self.policy
            .once("send_email", async {
                let response = request.send().await?;
                let status = response.status();
                if !status.is_success() {
                    return Err(BackendError::Status {
                        status: status.as_u16(),
                        body: response.text().await.unwrap_or_default(),
                    });
                }
                info!(kind = kind.as_str(), "Email accepted for delivery");
                Ok(())
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use envconfig::Envconfig;

    fn mailer(extra: &[(&str, &str)]) -> MailtrapMailer {
        let mut env: HashMap<String, String> = [
            ("SUPABASE_URL", "https://project.supabase.co"),
            ("SUPABASE_KEY", "anon"),
        ]
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        for (k, v) in extra {
            env.insert(k.to_string(), v.to_string());
        }
        let config = Config::init_from_hashmap(&env).unwrap();
        MailtrapMailer::from_config(&config, Client::new())
    }

    #[test]
    fn test_unsubscribe_url_encodes_recipient() {
        let url = mailer(&[]).unsubscribe_url("ada+test@example.com").unwrap();
        assert_eq!(
            url,
            "https://hackthebias.dev/unsubscribe?email=ada%2Btest%40example.com"
        );
    }

    #[tokio::test]
    async fn test_missing_token_is_not_configured() {
        let err = mailer(&[("MAILTRAP_TEMPLATE_UUID", "tpl")])
            .send(EmailKind::Preregistration, "ada@example.com", "Ada")
            .await
            .unwrap_err();
        assert!(matches!(err, BackendError::NotConfigured("MAILTRAP_PASS")));
    }

    #[tokio::test]
    async fn test_completion_template_is_separate() {
        let err = mailer(&[("MAILTRAP_PASS", "token"), ("MAILTRAP_TEMPLATE_UUID", "tpl")])
            .send(EmailKind::RegistrationComplete, "ada@example.com", "Ada")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            BackendError::NotConfigured("MAILTRAP_COMPLETE_REG_TEMPLATE_UUID")
        ));
    }
}
