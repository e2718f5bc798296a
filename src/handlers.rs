use axum::{
    extract::{multipart::Field, Multipart, Query, State},
    Json,
};
use serde::Deserialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::auth::{is_admin, AdminUser, AuthUser};
use crate::backend::{
    AuthProvider, BackendError, CaptchaVerifier, ConsentFormStorage, MailtrapMailer, Mailer,
    RecaptchaVerifier, RegistrationStore, SupabaseBackend,
};
use crate::config::Config;
use crate::error::{ApiError, ApiResult, FieldError};
use crate::hacker_code::insert_with_unique_code;
use crate::models::{ConsentDocument, EmailKind, NewPreregistration, Registration, RegistrationUpdate};
use crate::rate_limiter::RateLimiter;
use crate::response::{
    AdminStatus, ConsentFormUploaded, PreregisterResponse, PreregistrationList, RegistrationCreated,
    RegistrationList, RegistrationStatus, RegistrationUpdated, SignedUrlResponse, SuccessResponse,
    UserCreatedResponse,
};
use crate::upstream::UpstreamPolicy;
use crate::validation::{
    check_consent_document, validate_consent_path, validate_registration, AutoVerifyRequest,
    CreateUserRequest, GoogleSignupEmailRequest, PreregisterRequest, RegistrantInfo,
    RegistrationForm, ValidatedJson,
};

/// Lifetime of signed consent-form links
pub const SIGNED_URL_TTL: Duration = Duration::from_secs(3600);

const CONSENT_FIELD_NAMES: [&str; 2] = ["consent_form", "guardian_form"];

/// Shared application state
pub type SharedState = Arc<AppState>;

/// Collaborators and the limiter shared by every request
pub struct AppState {
    pub store: Arc<dyn RegistrationStore>,
    pub auth: Arc<dyn AuthProvider>,
    pub storage: Arc<dyn ConsentFormStorage>,
    pub mailer: Arc<dyn Mailer>,
    /// `None` disables CAPTCHA checks
    pub captcha: Option<Arc<dyn CaptchaVerifier>>,
    pub rate_limiter: RateLimiter,
    pub admin_emails: HashSet<String>,
}

impl AppState {
    /// Wire the HTTP collaborators described by `config`
    pub fn from_config(config: &Config, rate_limiter: RateLimiter) -> Result<Self, BackendError> {
        let http = reqwest::Client::builder()
            .timeout(config.upstream_timeout())
            .build()?;
        let policy = UpstreamPolicy::new(config.upstream_timeout());

        let backend = Arc::new(SupabaseBackend::from_config(config, http.clone()));
        let captcha = config
            .recaptcha_secret
            .as_deref()
            .filter(|_| config.captcha_enabled())
            .map(|secret| {
                Arc::new(RecaptchaVerifier::new(http.clone(), secret, policy)) as Arc<dyn CaptchaVerifier>
            });

        Ok(Self {
            store: backend.clone(),
            auth: backend.clone(),
            storage: backend,
            mailer: Arc::new(MailtrapMailer::from_config(config, http)),
            captcha,
            rate_limiter,
            admin_emails: config.admin_email_set(),
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct ConsentPathQuery {
    #[serde(default)]
    pub path: Option<String>,
}

fn multipart_error(e: impl std::fmt::Display) -> ApiError {
    ApiError::BadRequest(format!("Invalid multipart body: {}", e))
}

async fn read_document(field: Field<'_>) -> ApiResult<Option<ConsentDocument>> {
    let file_name = field.file_name().map(str::to_string);
    let content_type = field
        .content_type()
        .unwrap_or("application/octet-stream")
        .to_string();
    let bytes = field.bytes().await.map_err(multipart_error)?;

    // Browsers send an empty unnamed part when no file was picked
    if bytes.is_empty() && file_name.as_deref().unwrap_or_default().is_empty() {
        return Ok(None);
    }

    Ok(Some(ConsentDocument {
        file_name,
        content_type,
        bytes: bytes.to_vec(),
    }))
}

async fn read_registration_form(mut multipart: Multipart) -> ApiResult<RegistrationForm> {
    let mut form = RegistrationForm::default();

    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        let name = field.name().unwrap_or_default().to_string();
        if CONSENT_FIELD_NAMES.contains(&name.as_str()) {
            form.consent_form = read_document(field).await?;
            continue;
        }

        let value = field.text().await.map_err(multipart_error)?;
        if !form.set_field(&name, value) {
            debug!(field = %name, "Ignoring unknown form field");
        }
    }

    Ok(form)
}

async fn upload_consent_document(
    state: &AppState,
    user_id: &str,
    document: &ConsentDocument,
) -> ApiResult<String> {
    let path = format!("{}/{}.{}", user_id, Uuid::new_v4(), document.extension());
    state
        .storage
        .upload(&path, document)
        .await
        .map_err(|e| ApiError::upstream("File upload failed", e))?;
    info!(user_id, path = %path, "Stored consent form");
    Ok(path)
}

/// Remove an uploaded document whose registration row was never written
async fn discard_consent_document(state: &AppState, path: &str) {
    match state.storage.delete(path).await {
        Ok(()) => debug!(path, "Removed orphaned consent form"),
        Err(e) => warn!(path, error = %e, "Failed to remove orphaned consent form"),
    }
}

/// Submit a full registration
pub async fn register(
    State(state): State<SharedState>,
    AuthUser(user): AuthUser,
    multipart: Multipart,
) -> ApiResult<Json<RegistrationCreated>> {
    let form = read_registration_form(multipart).await?;
    let submission = validate_registration(&form).map_err(ApiError::Validation)?;

    let existing = state
        .store
        .find_registration(&user.id)
        .await
        .map_err(|e| ApiError::upstream("Failed to check existing registration", e))?;
    if existing.is_some() {
        return Err(ApiError::BadRequest("You have already registered".to_string()));
    }

    let consent_form_url = match &submission.consent_form {
        Some(document) => Some(upload_consent_document(&state, &user.id, document).await?),
        None => None,
    };

    let registrant = RegistrantInfo {
        user_id: user.id.clone(),
        email: user.email.clone(),
        full_name: user.full_name(),
        consent_form_url,
    };

    let inserted = insert_with_unique_code(state.store.as_ref(), |code| {
        submission.to_row(&registrant, code)
    })
    .await;
    let registration = match inserted {
        Ok(registration) => registration,
        Err(e) => {
            if let Some(path) = &registrant.consent_form_url {
                discard_consent_document(&state, path).await;
            }
            return Err(e);
        }
    };

    info!(
        user_id = %user.id,
        hacker_code = %registration.details.hacker_code,
        is_minor = submission.is_minor,
        "Registration created"
    );

    if let Err(e) = state
        .mailer
        .send(EmailKind::RegistrationComplete, &registrant.email, &registrant.full_name)
        .await
    {
        warn!(user_id = %user.id, error = %e, "Registration confirmation email failed");
    }

    Ok(Json(RegistrationCreated::from(&registration)))
}

pub async fn get_registration(
    State(state): State<SharedState>,
    AuthUser(user): AuthUser,
) -> ApiResult<Json<Registration>> {
    state
        .store
        .find_registration(&user.id)
        .await
        .map_err(|e| ApiError::upstream("Failed to fetch registration", e))?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound("Registration not found".to_string()))
}

/// Change the editable subset of a registration
pub async fn update_registration(
    State(state): State<SharedState>,
    AuthUser(user): AuthUser,
    ValidatedJson(update): ValidatedJson<RegistrationUpdate>,
) -> ApiResult<Json<RegistrationUpdated>> {
    if update.is_empty() {
        return Err(ApiError::BadRequest("No valid fields to update".to_string()));
    }

    let updated = state
        .store
        .update_registration(&user.id, &update)
        .await
        .map_err(|e| ApiError::upstream("Failed to update registration", e))?
        .ok_or_else(|| ApiError::NotFound("Registration not found".to_string()))?;

    Ok(Json(RegistrationUpdated {
        message: "Registration updated successfully".to_string(),
        data: updated,
    }))
}

pub async fn registration_status(
    State(state): State<SharedState>,
    AuthUser(user): AuthUser,
) -> ApiResult<Json<RegistrationStatus>> {
    let registration = state
        .store
        .find_registration(&user.id)
        .await
        .map_err(|e| ApiError::upstream("Failed to check registration status", e))?;

    Ok(Json(RegistrationStatus {
        is_registered: registration.is_some(),
        registration_date: registration.map(|r| r.created_at),
    }))
}

/// Attach (or replace) the consent document of an existing registration
pub async fn upload_consent_form(
    State(state): State<SharedState>,
    AuthUser(user): AuthUser,
    mut multipart: Multipart,
) -> ApiResult<Json<ConsentFormUploaded>> {
    let mut document = None;
    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        if CONSENT_FIELD_NAMES.contains(&field.name().unwrap_or_default()) {
            document = read_document(field).await?;
        }
    }

    let document = document.ok_or_else(|| {
        ApiError::Validation(vec![FieldError::new("consent_form", "A consent form file is required")])
    })?;
    check_consent_document(&document).map_err(|e| ApiError::Validation(vec![e]))?;

    let registered = state
        .store
        .find_registration(&user.id)
        .await
        .map_err(|e| ApiError::upstream("Failed to fetch registration", e))?;
    if registered.is_none() {
        return Err(ApiError::NotFound("Registration not found".to_string()));
    }

    let path = upload_consent_document(&state, &user.id, &document).await?;
    state
        .store
        .set_consent_form(&user.id, &path)
        .await
        .map_err(|e| ApiError::upstream("Failed to save consent form", e))?
        .ok_or_else(|| ApiError::NotFound("Registration not found".to_string()))?;

    Ok(Json(ConsentFormUploaded {
        message: "Consent form uploaded successfully".to_string(),
        consent_form_url: path,
    }))
}

/// Record interest ahead of registration opening
pub async fn preregister(
    State(state): State<SharedState>,
    ValidatedJson(request): ValidatedJson<PreregisterRequest>,
) -> ApiResult<Json<PreregisterResponse>> {
    match &state.captcha {
        Some(verifier) => {
            let passed = verifier
                .verify(&request.captcha_token)
                .await
                .map_err(|e| ApiError::upstream("CAPTCHA verification failed", e))?;
            if !passed {
                return Err(ApiError::BadRequest("CAPTCHA failed".to_string()));
            }
        }
        None => warn!("CAPTCHA secret not configured, skipping verification"),
    }

    let exists = state
        .store
        .preregistration_exists(&request.email)
        .await
        .map_err(|e| ApiError::upstream("Unable to connect to database. Please try again later.", e))?;
    if exists {
        return Ok(Json(PreregisterResponse::already_registered()));
    }

    let row = NewPreregistration {
        name: request.name.clone(),
        email: request.email.clone(),
    };
    match state.store.insert_preregistration(&row).await {
        Ok(_) => {}
        // Lost a race with a concurrent request for the same email
        Err(e) if e.is_unique_violation_on("email") => {
            return Ok(Json(PreregisterResponse::already_registered()));
        }
        Err(e) => return Err(ApiError::upstream("Error saving data", e)),
    }

    state
        .mailer
        .send(EmailKind::Preregistration, &request.email, &request.name)
        .await
        .map_err(|e| ApiError::upstream("Failed to send confirmation email", e))?;

    info!("Pre-registration recorded");
    Ok(Json(PreregisterResponse::success()))
}

/// Mark the caller's own email as confirmed
pub async fn auto_verify_email(
    State(state): State<SharedState>,
    AuthUser(user): AuthUser,
    ValidatedJson(request): ValidatedJson<AutoVerifyRequest>,
) -> ApiResult<Json<SuccessResponse>> {
    if user.id != request.user_id {
        return Err(ApiError::Forbidden(
            "You can only verify your own email address".to_string(),
        ));
    }

    state.auth.confirm_email(&request.user_id).await.map_err(|e| {
        ApiError::upstream("Failed to verify email. Please try again or contact support.", e)
    })?;

    Ok(Json(SuccessResponse::new("Email verified successfully")))
}

/// Create an account whose email is already confirmed
pub async fn create_user_verified(
    State(state): State<SharedState>,
    ValidatedJson(request): ValidatedJson<CreateUserRequest>,
) -> ApiResult<Json<UserCreatedResponse>> {
    let user = state
        .auth
        .create_confirmed_user(&request.email, &request.password, &request.full_name)
        .await
        .map_err(|e| match e {
            BackendError::Rejected(message) => ApiError::BadRequest(message),
            other => ApiError::upstream("Failed to create user", other),
        })?;

    info!(user_id = %user.id, "Created pre-confirmed user");
    Ok(Json(UserCreatedResponse {
        success: true,
        message: "User created successfully".to_string(),
        user,
    }))
}

pub async fn send_google_signup_email(
    State(state): State<SharedState>,
    AuthUser(user): AuthUser,
    ValidatedJson(request): ValidatedJson<GoogleSignupEmailRequest>,
) -> ApiResult<Json<SuccessResponse>> {
    if !request.email.eq_ignore_ascii_case(&user.email) {
        return Err(ApiError::Forbidden("Email mismatch".to_string()));
    }

    state
        .mailer
        .send(EmailKind::GoogleSignupWelcome, &request.email, &request.name)
        .await
        .map_err(|e| ApiError::upstream("Failed to send email", e))?;

    Ok(Json(SuccessResponse::new("Welcome email sent")))
}

pub async fn admin_me(State(state): State<SharedState>, AuthUser(user): AuthUser) -> Json<AdminStatus> {
    Json(AdminStatus {
        is_admin: is_admin(&state, &user).await,
    })
}

pub async fn admin_registrations(
    State(state): State<SharedState>,
    AdminUser(admin): AdminUser,
) -> ApiResult<Json<RegistrationList>> {
    let mut registrations = state
        .store
        .list_registrations()
        .await
        .map_err(|e| ApiError::upstream("Failed to load registrations", e))?;
    registrations.sort_by(|a, b| b.created_at.cmp(&a.created_at));

    debug!(admin = %admin.id, count = registrations.len(), "Listed registrations");
    Ok(Json(RegistrationList { registrations }))
}

pub async fn admin_preregistrations(
    State(state): State<SharedState>,
    AdminUser(_): AdminUser,
) -> ApiResult<Json<PreregistrationList>> {
    let mut preregistrations = state
        .store
        .list_preregistrations()
        .await
        .map_err(|e| ApiError::upstream("Failed to load preregistrations", e))?;
    preregistrations.sort_by(|a, b| b.created_at.cmp(&a.created_at));

    Ok(Json(PreregistrationList { preregistrations }))
}

/// Short-lived link to a stored consent form
pub async fn admin_consent_form_url(
    State(state): State<SharedState>,
    AdminUser(_): AdminUser,
    Query(query): Query<ConsentPathQuery>,
) -> ApiResult<Json<SignedUrlResponse>> {
    let path = query.path.unwrap_or_default();
    validate_consent_path(&path)?;

    let signed_url = state
        .storage
        .signed_url(&path, SIGNED_URL_TTL)
        .await
        .map_err(|e| ApiError::upstream("Could not generate signed URL for consent form", e))?
        .ok_or_else(|| {
            ApiError::NotFound("Could not generate signed URL for consent form".to_string())
        })?;

    Ok(Json(SignedUrlResponse { signed_url }))
}

pub async fn root() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "API is running" }))
}
