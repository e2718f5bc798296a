#![allow(dead_code)]

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{HeaderMap, Request, StatusCode},
    Router,
};
use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use http_body_util::BodyExt;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tower::ServiceExt;
use uuid::Uuid;

use registrar::backend::{
    AuthProvider, BackendError, CaptchaVerifier, ConsentFormStorage, Mailer, RegistrationStore,
};
use registrar::models::{
    AuthenticatedUser, ConsentDocument, CreatedUser, EducationLevel, EmailKind, NewPreregistration,
    NewRegistration, Preregistration, Registration, RegistrationUpdate,
};
use registrar::rate_limit_config::RateLimitConfig;
use registrar::{create_app, AppState, RateLimiter};

pub const BOUNDARY: &str = "registrar-test-boundary";

/// In-memory registration store with the same uniqueness rules as the real tables
#[derive(Default)]
pub struct FakeStore {
    pub registrations: Mutex<Vec<Registration>>,
    pub preregistrations: Mutex<Vec<Preregistration>>,
    pub admin_ids: Mutex<HashSet<String>>,
    /// Insert attempts that report a hacker code collision before succeeding
    pub forced_code_collisions: AtomicU32,
    /// Existence checks that claim the code is taken
    pub taken_code_checks: AtomicU32,
    pub code_checks: AtomicU32,
    pub insert_attempts: AtomicU32,
    pub unreachable: AtomicBool,
    /// Lookups miss existing rows, as when a concurrent request inserts first
    pub stale_lookups: AtomicBool,
    clock: Mutex<u32>,
}

impl FakeStore {
    fn next_timestamp(&self) -> DateTime<Utc> {
        let mut tick = self.clock.lock().unwrap();
        *tick += 1;
        base_time() + ChronoDuration::seconds(i64::from(*tick))
    }

    fn check_reachable(&self) -> Result<(), BackendError> {
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(BackendError::Status {
                status: 503,
                body: "connection refused to db.internal:5432".to_string(),
            });
        }
        Ok(())
    }

    pub fn registration_count(&self) -> usize {
        self.registrations.lock().unwrap().len()
    }

    pub fn preregistration_count(&self) -> usize {
        self.preregistrations.lock().unwrap().len()
    }

    pub fn seed_registration(&self, user_id: &str, created_at: DateTime<Utc>) {
        self.registrations.lock().unwrap().push(Registration {
            id: Uuid::new_v4(),
            created_at,
            details: sample_row(user_id, &Uuid::new_v4().simple().to_string()[..5].to_uppercase()),
        });
    }
}

#[async_trait]
impl RegistrationStore for FakeStore {
    async fn find_registration(&self, user_id: &str) -> Result<Option<Registration>, BackendError> {
        self.check_reachable()?;
        if self.stale_lookups.load(Ordering::SeqCst) {
            return Ok(None);
        }
        Ok(self
            .registrations
            .lock()
            .unwrap()
            .iter()
            .find(|r| r.details.user_id == user_id)
            .cloned())
    }

    async fn hacker_code_exists(&self, code: &str) -> Result<bool, BackendError> {
        self.check_reachable()?;
        self.code_checks.fetch_add(1, Ordering::SeqCst);
        if self
            .taken_code_checks
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Ok(true);
        }
        Ok(self
            .registrations
            .lock()
            .unwrap()
            .iter()
            .any(|r| r.details.hacker_code == code))
    }

    async fn insert_registration(&self, registration: &NewRegistration) -> Result<Registration, BackendError> {
        self.check_reachable()?;
        self.insert_attempts.fetch_add(1, Ordering::SeqCst);

        if self
            .forced_code_collisions
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(BackendError::UniqueViolation {
                constraint: "duplicate key value violates unique constraint \"registrations_hacker_code_key\"".to_string(),
            });
        }

        let mut rows = self.registrations.lock().unwrap();
        if rows.iter().any(|r| r.details.user_id == registration.user_id) {
            return Err(BackendError::UniqueViolation {
                constraint: "duplicate key value violates unique constraint \"registrations_user_id_key\"".to_string(),
            });
        }
        if rows.iter().any(|r| r.details.hacker_code == registration.hacker_code) {
            return Err(BackendError::UniqueViolation {
                constraint: "duplicate key value violates unique constraint \"registrations_hacker_code_key\"".to_string(),
            });
        }

        let row = Registration {
            id: Uuid::new_v4(),
            created_at: self.next_timestamp(),
            details: registration.clone(),
        };
        rows.push(row.clone());
        Ok(row)
    }

    async fn update_registration(
        &self,
        user_id: &str,
        update: &RegistrationUpdate,
    ) -> Result<Option<Registration>, BackendError> {
        self.check_reachable()?;
        let mut rows = self.registrations.lock().unwrap();
        let Some(row) = rows.iter_mut().find(|r| r.details.user_id == user_id) else {
            return Ok(None);
        };
        if let Some(v) = &update.dietary_restrictions {
            row.details.dietary_restrictions = Some(v.clone());
        }
        if let Some(v) = update.staying_overnight {
            row.details.staying_overnight = v;
        }
        if let Some(v) = update.interested_in_beginner {
            row.details.interested_in_beginner = v;
        }
        if let Some(v) = &update.general_comments {
            row.details.general_comments = Some(v.clone());
        }
        Ok(Some(row.clone()))
    }

    async fn set_consent_form(&self, user_id: &str, path: &str) -> Result<Option<Registration>, BackendError> {
        self.check_reachable()?;
        let mut rows = self.registrations.lock().unwrap();
        Ok(rows.iter_mut().find(|r| r.details.user_id == user_id).map(|row| {
            row.details.consent_form_url = Some(path.to_string());
            row.clone()
        }))
    }

    /// Deliberately returned in insertion order
    async fn list_registrations(&self) -> Result<Vec<Registration>, BackendError> {
        self.check_reachable()?;
        Ok(self.registrations.lock().unwrap().clone())
    }

    async fn preregistration_exists(&self, email: &str) -> Result<bool, BackendError> {
        self.check_reachable()?;
        Ok(self
            .preregistrations
            .lock()
            .unwrap()
            .iter()
            .any(|p| p.email == email))
    }

    async fn insert_preregistration(
        &self,
        preregistration: &NewPreregistration,
    ) -> Result<Preregistration, BackendError> {
        self.check_reachable()?;
        let mut rows = self.preregistrations.lock().unwrap();
        if rows.iter().any(|p| p.email == preregistration.email) {
            return Err(BackendError::UniqueViolation {
                constraint: "preregistrations_email_key".to_string(),
            });
        }
        let row = Preregistration {
            id: Uuid::new_v4(),
            created_at: self.next_timestamp(),
            name: preregistration.name.clone(),
            email: preregistration.email.clone(),
        };
        rows.push(row.clone());
        Ok(row)
    }

    async fn list_preregistrations(&self) -> Result<Vec<Preregistration>, BackendError> {
        self.check_reachable()?;
        Ok(self.preregistrations.lock().unwrap().clone())
    }

    async fn is_admin(&self, user_id: &str) -> Result<bool, BackendError> {
        self.check_reachable()?;
        Ok(self.admin_ids.lock().unwrap().contains(user_id))
    }

    async fn ping(&self) -> Result<(), BackendError> {
        self.check_reachable()
    }
}

/// Token table standing in for the auth service
#[derive(Default)]
pub struct FakeAuth {
    pub users: Mutex<HashMap<String, AuthenticatedUser>>,
    pub confirmed: Mutex<Vec<String>>,
    pub created: Mutex<Vec<CreatedUser>>,
}

impl FakeAuth {
    pub fn add_user(&self, token: &str, id: &str, email: &str, name: &str) {
        self.users.lock().unwrap().insert(
            token.to_string(),
            AuthenticatedUser {
                id: id.to_string(),
                email: email.to_string(),
                user_metadata: serde_json::json!({ "full_name": name }),
            },
        );
    }
}

#[async_trait]
impl AuthProvider for FakeAuth {
    async fn user_for_token(&self, token: &str) -> Result<AuthenticatedUser, BackendError> {
        self.users
            .lock()
            .unwrap()
            .get(token)
            .cloned()
            .ok_or(BackendError::Unauthorized)
    }

    async fn create_confirmed_user(
        &self,
        email: &str,
        _password: &str,
        _full_name: &str,
    ) -> Result<CreatedUser, BackendError> {
        let mut created = self.created.lock().unwrap();
        if created.iter().any(|u| u.email == email) {
            return Err(BackendError::Rejected(
                "An account with this email already exists. Please sign in instead.".to_string(),
            ));
        }
        let user = CreatedUser {
            id: Uuid::new_v4().to_string(),
            email: email.to_string(),
        };
        created.push(user.clone());
        Ok(user)
    }

    async fn confirm_email(&self, user_id: &str) -> Result<(), BackendError> {
        self.confirmed.lock().unwrap().push(user_id.to_string());
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeStorage {
    pub objects: Mutex<HashMap<String, ConsentDocument>>,
}

#[async_trait]
impl ConsentFormStorage for FakeStorage {
    async fn upload(&self, path: &str, document: &ConsentDocument) -> Result<(), BackendError> {
        self.objects
            .lock()
            .unwrap()
            .insert(path.to_string(), document.clone());
        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<(), BackendError> {
        self.objects.lock().unwrap().remove(path);
        Ok(())
    }

    async fn signed_url(&self, path: &str, expires_in: Duration) -> Result<Option<String>, BackendError> {
        Ok(self.objects.lock().unwrap().contains_key(path).then(|| {
            format!(
                "https://storage.test/sign/{}?expires={}",
                path,
                expires_in.as_secs()
            )
        }))
    }
}

#[derive(Default)]
pub struct FakeMailer {
    pub sent: Mutex<Vec<(EmailKind, String, String)>>,
    pub failing: AtomicBool,
}

impl FakeMailer {
    pub fn sent_count(&self, kind: EmailKind) -> usize {
        self.sent.lock().unwrap().iter().filter(|(k, _, _)| *k == kind).count()
    }
}

#[async_trait]
impl Mailer for FakeMailer {
    async fn send(&self, kind: EmailKind, to_email: &str, name: &str) -> Result<(), BackendError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(BackendError::Status {
                status: 401,
                body: "invalid token".to_string(),
            });
        }
        self.sent
            .lock()
            .unwrap()
            .push((kind, to_email.to_string(), name.to_string()));
        Ok(())
    }
}

pub struct FakeCaptcha {
    pub accept: bool,
}

#[async_trait]
impl CaptchaVerifier for FakeCaptcha {
    async fn verify(&self, token: &str) -> Result<bool, BackendError> {
        Ok(self.accept && !token.is_empty())
    }
}

/// Router wired to in-memory collaborators
pub struct TestApp {
    pub router: Router,
    pub store: Arc<FakeStore>,
    pub auth: Arc<FakeAuth>,
    pub storage: Arc<FakeStorage>,
    pub mailer: Arc<FakeMailer>,
    pub limiter: RateLimiter,
}

pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Value,
}

impl TestApp {
    pub fn new() -> Self {
        Self::build(None, &[])
    }

    pub fn build(captcha: Option<FakeCaptcha>, admin_emails: &[&str]) -> Self {
        let store = Arc::new(FakeStore::default());
        let auth = Arc::new(FakeAuth::default());
        let storage = Arc::new(FakeStorage::default());
        let mailer = Arc::new(FakeMailer::default());
        let limiter = RateLimiter::new(RateLimitConfig::default());

        let state = Arc::new(AppState {
            store: store.clone(),
            auth: auth.clone(),
            storage: storage.clone(),
            mailer: mailer.clone(),
            captcha: captcha.map(|c| Arc::new(c) as Arc<dyn CaptchaVerifier>),
            rate_limiter: limiter.clone(),
            admin_emails: admin_emails.iter().map(|e| e.to_lowercase()).collect(),
        });
        let router = create_app(state, &["http://localhost:3000".to_string()]);

        Self {
            router,
            store,
            auth,
            storage,
            mailer,
            limiter,
        }
    }

    pub async fn send(&self, request: Request<Body>) -> TestResponse {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()))
        };
        TestResponse { status, headers, body }
    }
}

pub fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
}

pub fn json_request(method: &str, uri: &str, ip: &str, token: Option<&str>, body: Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .header("x-forwarded-for", ip);
    if let Some(token) = token {
        builder = builder.header("authorization", format!("Bearer {}", token));
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

pub fn get_request(uri: &str, ip: &str, token: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method("GET").uri(uri).header("x-forwarded-for", ip);
    if let Some(token) = token {
        builder = builder.header("authorization", format!("Bearer {}", token));
    }
    builder.body(Body::empty()).unwrap()
}

/// A file part for a multipart body
pub struct FilePart<'a> {
    pub field: &'a str,
    pub file_name: &'a str,
    pub content_type: &'a str,
    pub bytes: &'a [u8],
}

pub fn multipart_request(
    uri: &str,
    ip: &str,
    token: &str,
    fields: &[(&str, String)],
    file: Option<FilePart<'_>>,
) -> Request<Body> {
    let mut body = Vec::new();
    for (name, value) in fields {
        body.extend_from_slice(
            format!(
                "--{}\r\nContent-Disposition: form-data; name=\"{}\"\r\n\r\n{}\r\n",
                BOUNDARY, name, value
            )
            .as_bytes(),
        );
    }
    if let Some(file) = file {
        body.extend_from_slice(
            format!(
                "--{}\r\nContent-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\nContent-Type: {}\r\n\r\n",
                BOUNDARY, file.field, file.file_name, file.content_type
            )
            .as_bytes(),
        );
        body.extend_from_slice(file.bytes);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());

    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", format!("multipart/form-data; boundary={}", BOUNDARY))
        .header("x-forwarded-for", ip)
        .header("authorization", format!("Bearer {}", token))
        .body(Body::from(body))
        .unwrap()
}

/// Form fields of a complete, valid adult submission
pub fn valid_registration_fields() -> Vec<(&'static str, String)> {
    vec![
        ("education_level", "post_secondary".to_string()),
        ("year", "3rd".to_string()),
        ("major", "Computer Engineering".to_string()),
        ("gender_identity", "non-binary".to_string()),
        ("hackathon_experience", "yes".to_string()),
        ("hackathon_count", "2".to_string()),
        ("interested_in_beginner", "false".to_string()),
        ("why_interested", "I want to meet people who build inclusive tech".to_string()),
        ("creative_project", "A browser extension that flags biased job ads".to_string()),
        ("staying_overnight", "on".to_string()),
        ("rules_consent", "true".to_string()),
        ("photo_release_signature", "Sam Rivera".to_string()),
        ("is_minor", "false".to_string()),
    ]
}

pub fn with_field(
    mut fields: Vec<(&'static str, String)>,
    name: &'static str,
    value: &str,
) -> Vec<(&'static str, String)> {
    fields.retain(|(n, _)| *n != name);
    fields.push((name, value.to_string()));
    fields
}

pub fn sample_row(user_id: &str, hacker_code: &str) -> NewRegistration {
    NewRegistration {
        user_id: user_id.to_string(),
        email: format!("{}@example.com", user_id),
        full_name: user_id.to_string(),
        hacker_code: hacker_code.to_string(),
        education_level: EducationLevel::RecentGraduate,
        education_level_other: None,
        grade: None,
        year: None,
        major: Some("Design".to_string()),
        gender_identity: "woman".to_string(),
        dietary_restrictions: None,
        hackathon_experience: false,
        hackathon_count: None,
        relevant_skills: None,
        interested_in_beginner: true,
        why_interested: "Curious about hackathons".to_string(),
        creative_project: "A community garden planner".to_string(),
        staying_overnight: false,
        general_comments: None,
        rules_consent: true,
        photo_release_signature: user_id.to_string(),
        is_minor: false,
        consent_form_url: None,
    }
}
