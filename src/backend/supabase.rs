//! REST client for the managed backend: PostgREST tables, GoTrue auth and
//! object storage, all served from one project URL.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, instrument};

use super::{AuthProvider, BackendError, ConsentFormStorage, RegistrationStore};
use crate::config::Config;
use crate::models::{
    AuthenticatedUser, ConsentDocument, CreatedUser, NewPreregistration, NewRegistration,
    Preregistration, Registration, RegistrationUpdate,
};
use crate::upstream::UpstreamPolicy;

const REGISTRATIONS: &str = "registrations";
const PREREGISTRATIONS: &str = "preregistrations";
const USERS: &str = "users";
const CONSENT_BUCKET: &str = "guardian-forms";

/// Error body returned by PostgREST
#[derive(Debug, Deserialize)]
struct PostgrestError {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    details: Option<String>,
}

/// Error body returned by the auth service
#[derive(Debug, Deserialize)]
struct AuthErrorBody {
    #[serde(default, alias = "message", alias = "error_description")]
    msg: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AdminFlag {
    #[serde(default)]
    is_admin: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct SignedUrlResponse {
    #[serde(rename = "signedURL")]
    signed_url: String,
}

#[derive(Clone)]
pub struct SupabaseBackend {
    http: Client,
    base_url: String,
    anon_key: String,
    service_key: String,
    policy: UpstreamPolicy,
}

impl fmt::Debug for SupabaseBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SupabaseBackend")
            .field("base_url", &self.base_url)
            .field("anon_key", &"[REDACTED]")
            .field("service_key", &"[REDACTED]")
            .finish()
    }
}

impl SupabaseBackend {
    pub fn new(
        http: Client,
        base_url: &str,
        anon_key: impl Into<String>,
        service_key: impl Into<String>,
        policy: UpstreamPolicy,
    ) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            anon_key: anon_key.into(),
            service_key: service_key.into(),
            policy,
        }
    }

    pub fn from_config(config: &Config, http: Client) -> Self {
        Self::new(
            http,
            &config.supabase_url,
            config.supabase_key.clone(),
            config.service_key().to_string(),
            UpstreamPolicy::new(config.upstream_timeout()),
        )
    }

    fn rest_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.base_url, table)
    }

    fn service_request(&self, method: Method, url: String) -> RequestBuilder {
        self.http
            .request(method, url)
            .header("apikey", &self.service_key)
            .bearer_auth(&self.service_key)
    }

    async fn select<T: DeserializeOwned>(
        &self,
        table: &str,
        query: Vec<(&'static str, String)>,
    ) -> Result<Vec<T>, BackendError> {
        let response = self
            .service_request(Method::GET, self.rest_url(table))
            .query(&query)
            .send()
            .await?;
        read_json(response).await
    }

    async fn mutate<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
    ) -> Result<Vec<T>, BackendError> {
        let response = request
            .header("Prefer", "return=representation")
            .send()
            .await?;
        read_json(response).await
    }

    async fn patch_registration(
        &self,
        user_id: &str,
        body: serde_json::Value,
    ) -> Result<Option<Registration>, BackendError> {
        let request = self
            .service_request(Method::PATCH, self.rest_url(REGISTRATIONS))
            .query(&[("user_id", format!("eq.{}", user_id))])
            .json(&body);
        let rows: Vec<Registration> = self
            .policy
            .once("update_registration", self.mutate(request))
            .await?;
        Ok(rows.into_iter().next())
    }

    fn object_path(path: &str) -> String {
        format!("{}/{}", CONSENT_BUCKET, path.trim_start_matches('/'))
    }
}

async fn read_json<T: DeserializeOwned>(response: Response) -> Result<T, BackendError> {
    if response.status().is_success() {
        return Ok(response.json::<T>().await?);
    }
    Err(error_from_response(response).await)
}

async fn error_from_response(response: Response) -> BackendError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();

    if let Ok(error) = serde_json::from_str::<PostgrestError>(&body) {
        // Postgres unique_violation; storage conflicts carry no SQLSTATE
        if error.code.as_deref() == Some("23505") {
            let constraint = [error.message, error.details]
                .into_iter()
                .flatten()
                .collect::<Vec<_>>()
                .join(" ");
            return BackendError::UniqueViolation { constraint };
        }
    }

    BackendError::Status {
        status: status.as_u16(),
        body,
    }
}

fn first_row<T>(rows: Vec<T>, what: &str) -> Result<T, BackendError> {
    rows.into_iter()
        .next()
        .ok_or_else(|| BackendError::InvalidResponse(format!("{} insert returned no rows", what)))
}

#[async_trait]
impl RegistrationStore for SupabaseBackend {
    #[instrument(skip(self))]
    async fn find_registration(&self, user_id: &str) -> Result<Option<Registration>, BackendError> {
        let rows: Vec<Registration> = self
            .policy
            .retrying("find_registration", || {
                self.select(
                    REGISTRATIONS,
                    vec![
                        ("select", "*".to_string()),
                        ("user_id", format!("eq.{}", user_id)),
                        ("limit", "1".to_string()),
                    ],
                )
            })
            .await?;
        Ok(rows.into_iter().next())
    }

    async fn hacker_code_exists(&self, code: &str) -> Result<bool, BackendError> {
        let rows: Vec<serde_json::Value> = self
            .policy
            .retrying("hacker_code_exists", || {
                self.select(
                    REGISTRATIONS,
                    vec![
                        ("select", "id".to_string()),
                        ("hacker_code", format!("eq.{}", code)),
                        ("limit", "1".to_string()),
                    ],
                )
            })
            .await?;
        Ok(!rows.is_empty())
    }

    #[instrument(skip_all, fields(user_id = %registration.user_id))]
    async fn insert_registration(
        &self,
        registration: &NewRegistration,
    ) -> Result<Registration, BackendError> {
        let request = self
            .service_request(Method::POST, self.rest_url(REGISTRATIONS))
            .json(registration);
        let rows = self
            .policy
            .once("insert_registration", self.mutate(request))
            .await?;
        first_row(rows, "registration")
    }

    async fn update_registration(
        &self,
        user_id: &str,
        update: &RegistrationUpdate,
    ) -> Result<Option<Registration>, BackendError> {
        let body = serde_json::to_value(update)
            .map_err(|e| BackendError::InvalidResponse(e.to_string()))?;
        self.patch_registration(user_id, body).await
    }

    async fn set_consent_form(
        &self,
        user_id: &str,
        path: &str,
    ) -> Result<Option<Registration>, BackendError> {
        self.patch_registration(user_id, json!({ "consent_form_url": path }))
            .await
    }

    async fn list_registrations(&self) -> Result<Vec<Registration>, BackendError> {
        self.policy
            .retrying("list_registrations", || {
                self.select(
                    REGISTRATIONS,
                    vec![
                        ("select", "*".to_string()),
                        ("order", "created_at.desc".to_string()),
                    ],
                )
            })
            .await
    }

    async fn preregistration_exists(&self, email: &str) -> Result<bool, BackendError> {
        let rows: Vec<serde_json::Value> = self
            .policy
            .retrying("preregistration_exists", || {
                self.select(
                    PREREGISTRATIONS,
                    vec![
                        ("select", "email".to_string()),
                        ("email", format!("eq.{}", email)),
                        ("limit", "1".to_string()),
                    ],
                )
            })
            .await?;
        Ok(!rows.is_empty())
    }

    async fn insert_preregistration(
        &self,
        preregistration: &NewPreregistration,
    ) -> Result<Preregistration, BackendError> {
        let request = self
            .service_request(Method::POST, self.rest_url(PREREGISTRATIONS))
            .json(preregistration);
        let rows = self
            .policy
            .once("insert_preregistration", self.mutate(request))
            .await?;
        first_row(rows, "preregistration")
    }

    async fn list_preregistrations(&self) -> Result<Vec<Preregistration>, BackendError> {
        self.policy
            .retrying("list_preregistrations", || {
                self.select(
                    PREREGISTRATIONS,
                    vec![
                        ("select", "*".to_string()),
                        ("order", "created_at.desc".to_string()),
                    ],
                )
            })
            .await
    }

    async fn is_admin(&self, user_id: &str) -> Result<bool, BackendError> {
        let rows: Vec<AdminFlag> = self
            .policy
            .retrying("is_admin", || {
                self.select(
                    USERS,
                    vec![
                        ("select", "is_admin".to_string()),
                        ("id", format!("eq.{}", user_id)),
                        ("limit", "1".to_string()),
                    ],
                )
            })
            .await?;
        Ok(rows.iter().any(|row| row.is_admin == Some(true)))
    }

    async fn ping(&self) -> Result<(), BackendError> {
        let _: Vec<serde_json::Value> = self
            .policy
            .once(
                "ping",
                self.select(
                    PREREGISTRATIONS,
                    vec![("select", "email".to_string()), ("limit", "1".to_string())],
                ),
            )
            .await?;
        Ok(())
    }
}

#[async_trait]
impl AuthProvider for SupabaseBackend {
    async fn user_for_token(&self, token: &str) -> Result<AuthenticatedUser, BackendError> {
        self.policy
            .retrying("user_for_token", || async {
                let response = self
                    .http
                    .get(format!("{}/auth/v1/user", self.base_url))
                    .header("apikey", &self.anon_key)
                    .bearer_auth(token)
                    .send()
                    .await?;

                match response.status() {
                    StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                        Err(BackendError::Unauthorized)
                    }
                    _ => read_json(response).await,
                }
            })
            .await
    }

    #[instrument(skip(self, password))]
    async fn create_confirmed_user(
        &self,
        email: &str,
        password: &str,
        full_name: &str,
    ) -> Result<CreatedUser, BackendError> {
        let request = self
            .service_request(Method::POST, format!("{}/auth/v1/admin/users", self.base_url))
            .json(&json!({
                "email": email,
                "password": password,
                "email_confirm": true,
                "user_metadata": { "full_name": full_name },
            }));

        self.policy
            .once("create_confirmed_user", async {
                let response = request.send().await?;
                let status = response.status();
                if status.is_success() {
                    let user: CreatedUser = response.json().await?;
                    debug!(user_id = %user.id, "Created confirmed user");
                    return Ok(user);
                }

                let body = response.text().await.unwrap_or_default();
                if status.is_client_error() {
                    let msg = serde_json::from_str::<AuthErrorBody>(&body)
                        .ok()
                        .and_then(|b| b.msg)
                        .unwrap_or_default()
                        .to_lowercase();
                    if msg.contains("already registered") || msg.contains("already been registered") {
                        return Err(BackendError::Rejected(
                            "An account with this email already exists. Please sign in instead."
                                .to_string(),
                        ));
                    }
                    if msg.contains("password") {
                        return Err(BackendError::Rejected(
                            "Password must be at least 6 characters long.".to_string(),
                        ));
                    }
                }
                Err(BackendError::Status {
                    status: status.as_u16(),
                    body,
                })
            })
            .await
    }

    async fn confirm_email(&self, user_id: &str) -> Result<(), BackendError> {
        self.policy
            .retrying("confirm_email", || async {
                let response = self
                    .service_request(
                        Method::PUT,
                        format!("{}/auth/v1/admin/users/{}", self.base_url, user_id),
                    )
                    .json(&json!({ "email_confirm": true }))
                    .send()
                    .await?;
                let _: serde_json::Value = read_json(response).await?;
                Ok(())
            })
            .await
    }
}

#[async_trait]
impl ConsentFormStorage for SupabaseBackend {
    #[instrument(skip(self, document), fields(size = document.bytes.len()))]
    async fn upload(&self, path: &str, document: &ConsentDocument) -> Result<(), BackendError> {
        let request = self
            .service_request(
                Method::POST,
                format!("{}/storage/v1/object/{}", self.base_url, Self::object_path(path)),
            )
            .header("content-type", &document.content_type)
            .header("x-upsert", "false")
            .body(document.bytes.clone());

        self.policy
            .once("upload_consent_form", async {
                let response = request.send().await?;
                let _: serde_json::Value = read_json(response).await?;
                Ok(())
            })
            .await
    }

    async fn delete(&self, path: &str) -> Result<(), BackendError> {
        self.policy
            .retrying("delete_consent_form", || async {
                let response = self
                    .service_request(
                        Method::DELETE,
                        format!("{}/storage/v1/object/{}", self.base_url, Self::object_path(path)),
                    )
                    .send()
                    .await?;
                if response.status() == StatusCode::NOT_FOUND {
                    return Ok(());
                }
                let _: serde_json::Value = read_json(response).await?;
                Ok(())
            })
            .await
    }

    async fn signed_url(
        &self,
        path: &str,
        expires_in: Duration,
    ) -> Result<Option<String>, BackendError> {
        self.policy
            .retrying("sign_consent_form", || async {
                let response = self
                    .service_request(
                        Method::POST,
                        format!(
                            "{}/storage/v1/object/sign/{}",
                            self.base_url,
                            Self::object_path(path)
                        ),
                    )
                    .json(&json!({ "expiresIn": expires_in.as_secs() }))
                    .send()
                    .await?;

                if matches!(
                    response.status(),
                    StatusCode::NOT_FOUND | StatusCode::BAD_REQUEST
                ) {
                    return Ok(None);
                }

                let signed: SignedUrlResponse = read_json(response).await?;
                Ok(Some(format!("{}/storage/v1{}", self.base_url, signed.signed_url)))
            })
            .await
    }
}
