//! Request validation: derive-based structural rules plus the semantic rules
//! of a registration submission. Every violation is collected before
//! reporting.

use axum::{
    async_trait,
    extract::{rejection::JsonRejection, FromRequest, Request},
    http::StatusCode,
    Json,
};
use regex::Regex;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::sync::LazyLock;
use validator::{Validate, ValidationError, ValidationErrors};

use crate::error::{ApiError, FieldError};
use crate::models::{ConsentDocument, EducationLevel, NewRegistration};

pub const MAX_CREATIVE_PROJECT_WORDS: usize = 150;
pub const MAX_CONSENT_FORM_BYTES: usize = 5 * 1024 * 1024;
pub const ALLOWED_CONSENT_TYPES: [&str; 3] = ["application/pdf", "image/jpeg", "image/png"];

const GRADES: [&str; 3] = ["10", "11", "12"];
const YEARS: [&str; 5] = ["1st", "2nd", "3rd", "4th", "5th+"];

static CONSENT_PATH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9_-]+/[A-Za-z0-9_-]+\.[A-Za-z0-9]{1,5}$").expect("consent path pattern")
});

/// Raw registration submission as read from the multipart form.
/// Blank text fields are stored as `None`.
#[derive(Debug, Default, Clone, Validate)]
pub struct RegistrationForm {
    pub education_level: Option<String>,
    #[validate(length(max = 200, message = "Must be 200 characters or fewer"))]
    pub education_level_other: Option<String>,
    pub grade: Option<String>,
    pub year: Option<String>,
    #[validate(length(max = 200, message = "Must be 200 characters or fewer"))]
    pub major: Option<String>,
    #[validate(length(min = 1, max = 100, message = "Must be between 1 and 100 characters"))]
    pub gender_identity: Option<String>,
    #[validate(length(max = 200, message = "Must be 200 characters or fewer"))]
    pub dietary_restrictions: Option<String>,
    pub hackathon_experience: Option<String>,
    pub hackathon_count: Option<String>,
    #[validate(length(max = 1000, message = "Must be 1000 characters or fewer"))]
    pub relevant_skills: Option<String>,
    pub interested_in_beginner: Option<String>,
    #[validate(length(min = 10, max = 2000, message = "Must be between 10 and 2000 characters"))]
    pub why_interested: Option<String>,
    #[validate(
        length(min = 10, message = "Must be at least 10 characters"),
        custom(function = "validate_word_count")
    )]
    pub creative_project: Option<String>,
    pub staying_overnight: Option<String>,
    #[validate(length(max = 1000, message = "Must be 1000 characters or fewer"))]
    pub general_comments: Option<String>,
    pub rules_consent: Option<String>,
    #[validate(length(max = 200, message = "Must be 200 characters or fewer"))]
    pub photo_release_signature: Option<String>,
    pub is_minor: Option<String>,
    pub consent_form: Option<ConsentDocument>,
}

impl RegistrationForm {
    /// Store a text field by its form name. Returns `false` for unknown names.
    pub fn set_field(&mut self, name: &str, value: String) -> bool {
        let value = Some(value.trim().to_string()).filter(|v| !v.is_empty());
        let slot = match name {
            "education_level" => &mut self.education_level,
            "education_level_other" => &mut self.education_level_other,
            "grade" => &mut self.grade,
            "year" => &mut self.year,
            "major" => &mut self.major,
            "gender_identity" => &mut self.gender_identity,
            "dietary_restrictions" => &mut self.dietary_restrictions,
            "hackathon_experience" => &mut self.hackathon_experience,
            "hackathon_count" => &mut self.hackathon_count,
            "relevant_skills" => &mut self.relevant_skills,
            "interested_in_beginner" => &mut self.interested_in_beginner,
            "why_interested" => &mut self.why_interested,
            "creative_project" => &mut self.creative_project,
            "staying_overnight" => &mut self.staying_overnight,
            "general_comments" => &mut self.general_comments,
            "rules_consent" => &mut self.rules_consent,
            "photo_release_signature" => &mut self.photo_release_signature,
            "is_minor" => &mut self.is_minor,
            _ => return false,
        };
        *slot = value;
        true
    }
}

/// Submission that passed every rule, ready to be stored
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedRegistration {
    pub education_level: EducationLevel,
    pub education_level_other: Option<String>,
    pub grade: Option<String>,
    pub year: Option<String>,
    pub major: Option<String>,
    pub gender_identity: String,
    pub dietary_restrictions: Option<String>,
    pub hackathon_experience: bool,
    pub hackathon_count: Option<u32>,
    pub relevant_skills: Option<String>,
    pub interested_in_beginner: bool,
    pub why_interested: String,
    pub creative_project: String,
    pub staying_overnight: bool,
    pub general_comments: Option<String>,
    pub rules_consent: bool,
    pub photo_release_signature: String,
    pub is_minor: bool,
    pub consent_form: Option<ConsentDocument>,
}

/// Identity and derived values attached to a validated submission
#[derive(Debug, Clone)]
pub struct RegistrantInfo {
    pub user_id: String,
    pub email: String,
    pub full_name: String,
    pub consent_form_url: Option<String>,
}

impl ValidatedRegistration {
    pub fn to_row(&self, registrant: &RegistrantInfo, hacker_code: String) -> NewRegistration {
        NewRegistration {
            user_id: registrant.user_id.clone(),
            email: registrant.email.clone(),
            full_name: registrant.full_name.clone(),
            hacker_code,
            education_level: self.education_level,
            education_level_other: self.education_level_other.clone(),
            grade: self.grade.clone(),
            year: self.year.clone(),
            major: self.major.clone(),
            gender_identity: self.gender_identity.clone(),
            dietary_restrictions: self.dietary_restrictions.clone(),
            hackathon_experience: self.hackathon_experience,
            hackathon_count: self.hackathon_count,
            relevant_skills: self.relevant_skills.clone(),
            interested_in_beginner: self.interested_in_beginner,
            why_interested: self.why_interested.clone(),
            creative_project: self.creative_project.clone(),
            staying_overnight: self.staying_overnight,
            general_comments: self.general_comments.clone(),
            rules_consent: self.rules_consent,
            photo_release_signature: self.photo_release_signature.clone(),
            is_minor: self.is_minor,
            consent_form_url: registrant.consent_form_url.clone(),
        }
    }
}

fn validate_word_count(value: &str) -> Result<(), ValidationError> {
    if value.split_whitespace().count() > MAX_CREATIVE_PROJECT_WORDS {
        let mut error = ValidationError::new("word_count");
        error.message = Some("Creative project description must be 150 words or less".into());
        return Err(error);
    }
    Ok(())
}

/// Flatten derive errors into the response envelope's field list
pub fn field_errors(errors: &ValidationErrors) -> Vec<FieldError> {
    let mut out: Vec<FieldError> = errors
        .field_errors()
        .into_iter()
        .flat_map(|(field, errs)| {
            errs.iter().map(move |e| {
                let message = e
                    .message
                    .as_ref()
                    .map(|m| m.to_string())
                    .unwrap_or_else(|| format!("Invalid value ({})", e.code));
                FieldError::new(field.to_string(), message)
            })
        })
        .collect();
    out.sort_by(|a, b| a.field.cmp(&b.field));
    out
}

/// Lenient form boolean: absent is false
fn parse_bool(field: &str, raw: Option<&str>, errors: &mut Vec<FieldError>) -> bool {
    match raw.map(|v| v.to_ascii_lowercase()) {
        None => false,
        Some(v) => match v.as_str() {
            "true" | "1" | "on" | "yes" => true,
            "false" | "0" | "off" | "no" => false,
            _ => {
                errors.push(FieldError::new(field, "Must be a boolean"));
                false
            }
        },
    }
}

fn required<'a>(field: &str, value: &'a Option<String>, errors: &mut Vec<FieldError>) -> &'a str {
    match value.as_deref() {
        Some(v) => v,
        None => {
            errors.push(FieldError::new(field, "This field is required"));
            ""
        }
    }
}

/// Type, size and emptiness rules for an uploaded consent document
pub fn check_consent_document(document: &ConsentDocument) -> Result<(), FieldError> {
    if !ALLOWED_CONSENT_TYPES.contains(&document.content_type.as_str()) {
        return Err(FieldError::new(
            "consent_form",
            "Invalid file type. Allowed: PDF, JPEG, PNG",
        ));
    }
    if document.bytes.is_empty() {
        return Err(FieldError::new("consent_form", "File is empty"));
    }
    if document.bytes.len() > MAX_CONSENT_FORM_BYTES {
        return Err(FieldError::new("consent_form", "File size must be under 5MB"));
    }
    Ok(())
}

/// Run every structural and semantic rule over a submission.
pub fn validate_registration(form: &RegistrationForm) -> Result<ValidatedRegistration, Vec<FieldError>> {
    let mut errors = match form.validate() {
        Ok(()) => Vec::new(),
        Err(e) => field_errors(&e),
    };

    let education_level = match form.education_level.as_deref() {
        None => {
            errors.push(FieldError::new("education_level", "This field is required"));
            None
        }
        Some(raw) => {
            let level = EducationLevel::parse(raw);
            if level.is_none() {
                errors.push(FieldError::new(
                    "education_level",
                    format!("Must be one of: {}", EducationLevel::VALUES.join(", ")),
                ));
            }
            level
        }
    };

    let grade = match education_level {
        Some(EducationLevel::HighSchool) => match form.grade.as_deref() {
            None => {
                errors.push(FieldError::new("grade", "Grade is required for high school students"));
                None
            }
            Some(g) if !GRADES.contains(&g) => {
                errors.push(FieldError::new("grade", "Grade must be 10, 11, or 12"));
                None
            }
            Some(g) => Some(g.to_string()),
        },
        _ => None,
    };

    let year = match education_level {
        Some(EducationLevel::PostSecondary) => match form.year.as_deref() {
            None => {
                errors.push(FieldError::new("year", "Year is required for post-secondary students"));
                None
            }
            Some(y) if !YEARS.contains(&y) => {
                errors.push(FieldError::new("year", "Year must be 1st, 2nd, 3rd, 4th, or 5th+"));
                None
            }
            Some(y) => Some(y.to_string()),
        },
        _ => None,
    };

    let gender_identity = required("gender_identity", &form.gender_identity, &mut errors).to_string();
    let why_interested = required("why_interested", &form.why_interested, &mut errors).to_string();
    let creative_project = required("creative_project", &form.creative_project, &mut errors).to_string();
    let photo_release_signature =
        required("photo_release_signature", &form.photo_release_signature, &mut errors).to_string();

    let hackathon_count = form.hackathon_count.as_deref().and_then(|raw| match raw.parse::<u32>() {
        Ok(n) if (1..=100).contains(&n) => Some(n),
        Ok(_) => {
            errors.push(FieldError::new("hackathon_count", "Must be between 1 and 100"));
            None
        }
        Err(_) => {
            errors.push(FieldError::new("hackathon_count", "Must be a whole number"));
            None
        }
    });

    let hackathon_experience = parse_bool("hackathon_experience", form.hackathon_experience.as_deref(), &mut errors);
    let interested_in_beginner =
        parse_bool("interested_in_beginner", form.interested_in_beginner.as_deref(), &mut errors);
    let staying_overnight = parse_bool("staying_overnight", form.staying_overnight.as_deref(), &mut errors);
    let is_minor = parse_bool("is_minor", form.is_minor.as_deref(), &mut errors);

    let rules_consent = parse_bool("rules_consent", form.rules_consent.as_deref(), &mut errors);
    if !rules_consent {
        errors.push(FieldError::new("rules_consent", "You must agree to the rules to register"));
    }

    let consent_form = match (is_minor, &form.consent_form) {
        (true, None) => {
            errors.push(FieldError::new(
                "consent_form",
                "Guardian consent form is required for participants under 18",
            ));
            None
        }
        (true, Some(document)) => match check_consent_document(document) {
            Ok(()) => Some(document.clone()),
            Err(e) => {
                errors.push(e);
                None
            }
        },
        (false, _) => None,
    };

    if !errors.is_empty() {
        errors.sort_by(|a, b| a.field.cmp(&b.field));
        errors.dedup();
        return Err(errors);
    }

    Ok(ValidatedRegistration {
        // present whenever no errors were recorded
        education_level: education_level.unwrap_or(EducationLevel::Other),
        education_level_other: form.education_level_other.clone(),
        grade,
        year,
        major: form.major.clone(),
        gender_identity,
        dietary_restrictions: form.dietary_restrictions.clone(),
        hackathon_experience,
        hackathon_count,
        relevant_skills: form.relevant_skills.clone(),
        interested_in_beginner,
        why_interested,
        creative_project,
        staying_overnight,
        general_comments: form.general_comments.clone(),
        rules_consent,
        photo_release_signature,
        is_minor,
        consent_form,
    })
}

/// Reject consent-form paths that are not `<segment>/<name>.<ext>`
pub fn validate_consent_path(path: &str) -> Result<(), ApiError> {
    if path.trim().is_empty() {
        return Err(ApiError::BadRequest("Path is required".to_string()));
    }
    if path.contains("..") || path.starts_with('/') || path.contains('\\') || !CONSENT_PATH.is_match(path) {
        return Err(ApiError::BadRequest("Invalid path format".to_string()));
    }
    Ok(())
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct PreregisterRequest {
    #[validate(length(min = 1, max = 200, message = "Name must be between 1 and 200 characters"))]
    pub name: String,
    #[validate(email(message = "Must be a valid email address"))]
    pub email: String,
    #[serde(rename = "captchaToken", default)]
    pub captcha_token: String,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateUserRequest {
    #[validate(email(message = "Must be a valid email address"))]
    pub email: String,
    #[validate(length(min = 6, message = "Password must be at least 6 characters long."))]
    pub password: String,
    #[validate(length(min = 1, max = 200, message = "Full name must be between 1 and 200 characters"))]
    pub full_name: String,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct AutoVerifyRequest {
    #[validate(length(min = 1, message = "user_id is required"))]
    pub user_id: String,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct GoogleSignupEmailRequest {
    #[validate(email(message = "Must be a valid email address"))]
    pub email: String,
    #[validate(length(min = 1, max = 200, message = "Name must be between 1 and 200 characters"))]
    pub name: String,
}

/// JSON body extractor that runs `Validate` and reports failures in the
/// error envelope.
#[derive(Debug, Clone, Copy, Default)]
pub struct ValidatedJson<T>(pub T);

#[async_trait]
impl<T, S> FromRequest<S> for ValidatedJson<T>
where
    T: DeserializeOwned + Validate,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state)
            .await
            .map_err(json_rejection)?;
        value
            .validate()
            .map_err(|e| ApiError::Validation(field_errors(&e)))?;
        Ok(ValidatedJson(value))
    }
}

fn json_rejection(rejection: JsonRejection) -> ApiError {
    if rejection.status() == StatusCode::UNPROCESSABLE_ENTITY {
        ApiError::Validation(vec![FieldError::new("body", rejection.body_text())])
    } else {
        ApiError::BadRequest(rejection.body_text())
    }
}
