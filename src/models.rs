use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EducationLevel {
    HighSchool,
    PostSecondary,
    RecentGraduate,
    Other,
}

impl EducationLevel {
    pub const VALUES: [&'static str; 4] = ["high_school", "post_secondary", "recent_graduate", "other"];

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "high_school" => Some(EducationLevel::HighSchool),
            "post_secondary" => Some(EducationLevel::PostSecondary),
            "recent_graduate" => Some(EducationLevel::RecentGraduate),
            "other" => Some(EducationLevel::Other),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EducationLevel::HighSchool => "high_school",
            EducationLevel::PostSecondary => "post_secondary",
            EducationLevel::RecentGraduate => "recent_graduate",
            EducationLevel::Other => "other",
        }
    }
}

impl fmt::Display for EducationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Registration row as written to the store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewRegistration {
    pub user_id: String,
    pub email: String,
    pub full_name: String,
    pub hacker_code: String,
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
    pub consent_form_url: Option<String>,
}

/// Registration row as read back from the store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Registration {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    #[serde(flatten)]
    pub details: NewRegistration,
}

/// Fields a registrant may change after submitting
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Validate)]
pub struct RegistrationUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(length(max = 200, message = "Must be 200 characters or fewer"))]
    pub dietary_restrictions: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub staying_overnight: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interested_in_beginner: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(length(max = 1000, message = "Must be 1000 characters or fewer"))]
    pub general_comments: Option<String>,
}

impl RegistrationUpdate {
    pub fn is_empty(&self) -> bool {
        self.dietary_restrictions.is_none()
            && self.staying_overnight.is_none()
            && self.interested_in_beginner.is_none()
            && self.general_comments.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewPreregistration {
    pub name: String,
    pub email: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Preregistration {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub name: String,
    pub email: String,
}

/// User resolved from a bearer token
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthenticatedUser {
    pub id: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub user_metadata: serde_json::Value,
}

impl AuthenticatedUser {
    /// Display name from metadata, falling back to the email local part
    pub fn full_name(&self) -> String {
        ["full_name", "name"]
            .iter()
            .filter_map(|key| self.user_metadata.get(*key))
            .filter_map(|value| value.as_str())
            .map(str::trim)
            .find(|name| !name.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| {
                self.email
                    .split('@')
                    .next()
                    .unwrap_or_default()
                    .to_string()
            })
    }
}

/// Account created through the privileged auth API
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreatedUser {
    pub id: String,
    pub email: String,
}

/// Uploaded consent document held in memory until it reaches storage
#[derive(Clone, PartialEq)]
pub struct ConsentDocument {
    pub file_name: Option<String>,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

impl fmt::Debug for ConsentDocument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConsentDocument")
            .field("file_name", &self.file_name)
            .field("content_type", &self.content_type)
            .field("size", &self.bytes.len())
            .finish()
    }
}

impl ConsentDocument {
    /// Extension used for the stored object, derived from the upload name
    pub fn extension(&self) -> String {
        self.file_name
            .as_deref()
            .and_then(|name| name.rsplit_once('.'))
            .map(|(_, ext)| ext.to_ascii_lowercase())
            .filter(|ext| !ext.is_empty() && ext.len() <= 5 && ext.chars().all(|c| c.is_ascii_alphanumeric()))
            .unwrap_or_else(|| match self.content_type.as_str() {
                "image/jpeg" => "jpg".to_string(),
                "image/png" => "png".to_string(),
                _ => "pdf".to_string(),
            })
    }
}

/// Transactional email templates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmailKind {
    Preregistration,
    GoogleSignupWelcome,
    RegistrationComplete,
}

impl EmailKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EmailKind::Preregistration => "preregistration",
            EmailKind::GoogleSignupWelcome => "google_signup_welcome",
            EmailKind::RegistrationComplete => "registration_complete",
        }
    }
}
