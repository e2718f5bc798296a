//! External collaborators: row store, auth provider, object storage, email
//! delivery and CAPTCHA verification.
//!
//! Handlers only see the traits below. The HTTP implementations live in the
//! submodules and every call they make goes through [`crate::upstream`].

pub mod mailtrap;
pub mod recaptcha;
pub mod supabase;

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

use crate::models::{
    AuthenticatedUser, ConsentDocument, CreatedUser, EmailKind, NewPreregistration,
    NewRegistration, Preregistration, Registration, RegistrationUpdate,
};

pub use mailtrap::MailtrapMailer;
pub use recaptcha::RecaptchaVerifier;
pub use supabase::SupabaseBackend;

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("backend returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("unique constraint violated: {constraint}")]
    UniqueViolation { constraint: String },

    #[error("invalid or expired token")]
    Unauthorized,

    /// The provider refused the input; the message is safe to show to clients.
    #[error("{0}")]
    Rejected(String),

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("unexpected response: {0}")]
    InvalidResponse(String),

    #[error("{0} is not configured")]
    NotConfigured(&'static str),
}

impl BackendError {
    /// Transient failures worth another attempt: timeouts, transport errors, 5xx.
    pub fn is_retryable(&self) -> bool {
        match self {
            BackendError::Timeout(_) => true,
            BackendError::Http(e) => {
                if e.is_timeout() || e.is_connect() {
                    return true;
                }
                matches!(e.status(), Some(status) if status.is_server_error())
            }
            BackendError::Status { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// Whether this is a uniqueness violation involving `column`
    pub fn is_unique_violation_on(&self, column: &str) -> bool {
        matches!(self, BackendError::UniqueViolation { constraint } if constraint.contains(column))
    }
}

/// Registration and pre-registration rows plus the admin flag table
#[async_trait]
pub trait RegistrationStore: Send + Sync {
    async fn find_registration(&self, user_id: &str) -> Result<Option<Registration>, BackendError>;

    async fn hacker_code_exists(&self, code: &str) -> Result<bool, BackendError>;

    /// Insert a registration. Duplicate `user_id` or `hacker_code` values are
    /// reported as [`BackendError::UniqueViolation`].
    async fn insert_registration(
        &self,
        registration: &NewRegistration,
    ) -> Result<Registration, BackendError>;

    async fn update_registration(
        &self,
        user_id: &str,
        update: &RegistrationUpdate,
    ) -> Result<Option<Registration>, BackendError>;

    async fn set_consent_form(
        &self,
        user_id: &str,
        path: &str,
    ) -> Result<Option<Registration>, BackendError>;

    /// All registrations, newest first
    async fn list_registrations(&self) -> Result<Vec<Registration>, BackendError>;

    async fn preregistration_exists(&self, email: &str) -> Result<bool, BackendError>;

    /// Insert a pre-registration. A duplicate email is a
    /// [`BackendError::UniqueViolation`] on `email`.
    async fn insert_preregistration(
        &self,
        preregistration: &NewPreregistration,
    ) -> Result<Preregistration, BackendError>;

    /// All pre-registrations, newest first
    async fn list_preregistrations(&self) -> Result<Vec<Preregistration>, BackendError>;

    async fn is_admin(&self, user_id: &str) -> Result<bool, BackendError>;

    async fn ping(&self) -> Result<(), BackendError>;
}

#[async_trait]
pub trait AuthProvider: Send + Sync {
    /// Resolve a bearer token. Rejected tokens yield [`BackendError::Unauthorized`].
    async fn user_for_token(&self, token: &str) -> Result<AuthenticatedUser, BackendError>;

    async fn create_confirmed_user(
        &self,
        email: &str,
        password: &str,
        full_name: &str,
    ) -> Result<CreatedUser, BackendError>;

    async fn confirm_email(&self, user_id: &str) -> Result<(), BackendError>;
}

#[async_trait]
pub trait ConsentFormStorage: Send + Sync {
    async fn upload(&self, path: &str, document: &ConsentDocument) -> Result<(), BackendError>;

    async fn delete(&self, path: &str) -> Result<(), BackendError>;

    /// Time-limited URL for a stored object, `None` when the object is unknown
    async fn signed_url(&self, path: &str, expires_in: Duration)
        -> Result<Option<String>, BackendError>;
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, kind: EmailKind, to_email: &str, name: &str) -> Result<(), BackendError>;
}

#[async_trait]
pub trait CaptchaVerifier: Send + Sync {
    async fn verify(&self, token: &str) -> Result<bool, BackendError>;
}
