use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::models::{CreatedUser, EducationLevel, Preregistration, Registration};

/// Outcome of a pre-registration attempt
#[derive(Debug, Serialize, PartialEq)]
pub struct PreregisterResponse {
    pub message: String,
    pub status: String,
}

impl PreregisterResponse {
    pub fn success() -> Self {
        Self {
            message: "Successfully Pre-Registered".to_string(),
            status: "success".to_string(),
        }
    }

    pub fn already_registered() -> Self {
        Self {
            message: "This Email is Already Pre-Registered! Stay Tuned for more information"
                .to_string(),
            status: "already_registered".to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct RegistrationCreated {
    pub id: Uuid,
    pub user_id: String,
    pub email: String,
    pub full_name: String,
    pub education_level: EducationLevel,
    pub hacker_code: String,
    pub created_at: DateTime<Utc>,
    pub status: String,
    pub message: String,
}

impl From<&Registration> for RegistrationCreated {
    fn from(registration: &Registration) -> Self {
        let details = &registration.details;
        Self {
            id: registration.id,
            user_id: details.user_id.clone(),
            email: details.email.clone(),
            full_name: details.full_name.clone(),
            education_level: details.education_level,
            hacker_code: details.hacker_code.clone(),
            created_at: registration.created_at,
            status: "registered".to_string(),
            message: "Registration successful".to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct RegistrationStatus {
    pub is_registered: bool,
    pub registration_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
pub struct RegistrationUpdated {
    pub message: String,
    pub data: Registration,
}

#[derive(Debug, Serialize)]
pub struct ConsentFormUploaded {
    pub message: String,
    pub consent_form_url: String,
}

#[derive(Debug, Serialize)]
pub struct SuccessResponse {
    pub success: bool,
    pub message: String,
}

impl SuccessResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct UserCreatedResponse {
    pub success: bool,
    pub message: String,
    pub user: CreatedUser,
}

#[derive(Debug, Serialize)]
pub struct AdminStatus {
    pub is_admin: bool,
}

#[derive(Debug, Serialize)]
pub struct RegistrationList {
    pub registrations: Vec<Registration>,
}

#[derive(Debug, Serialize)]
pub struct PreregistrationList {
    pub preregistrations: Vec<Preregistration>,
}

#[derive(Debug, Serialize)]
pub struct SignedUrlResponse {
    pub signed_url: String,
}
