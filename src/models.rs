use std::collections::BTreeMap;

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use ts_rs::TS;
use utoipa::ToSchema;
use uuid::Uuid;
use validator::{Validate, ValidationError};

// --- Core Application Schemas (Mapped to Database) ---

/// User
///
/// A row of the `users` table. The password hash never leaves the server.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, Default)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub created_at: DateTime<Utc>,
}

/// Session
///
/// A row of the `sessions` table. A session token is only honoured while its row exists
/// and `expires_at` lies in the future.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, Default)]
pub struct Session {
    pub id: Uuid,
    pub user_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Session {
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now
    }
}

/// MuscleTest
///
/// Manual muscle test entry; `grade` follows the Oxford/MRC 0..=5 scale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct MuscleTest {
    pub muscle: String,
    #[serde(default)]
    pub side: Option<String>,
    pub grade: u8,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct Prescription {
    pub exercise: String,
    #[serde(default)]
    pub sets: Option<u32>,
    #[serde(default)]
    pub repetitions: Option<u32>,
    #[serde(default)]
    pub frequency: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct ProgressNote {
    pub date: NaiveDate,
    pub note: String,
}

/// DynamicRecords
///
/// The repeatable sub-records of a ficha, persisted as a single JSONB column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct DynamicRecords {
    #[serde(default)]
    pub muscle_tests: Vec<MuscleTest>,
    #[serde(default)]
    pub prescriptions: Vec<Prescription>,
    #[serde(default)]
    pub progress_notes: Vec<ProgressNote>,
}

/// Ficha
///
/// One patient assessment record from the `fichas` table. Owned by exactly one user
/// (`user_id`). `bmi` and `age_years` are derived on read and never stored.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, FromRow, Default)]
#[ts(export)]
pub struct Ficha {
    pub id: Uuid,
    pub user_id: Uuid,

    // Demographics
    pub patient_name: String,
    pub birth_date: Option<NaiveDate>,
    pub sex: Option<String>,
    pub phone: Option<String>,
    pub occupation: Option<String>,
    pub address: Option<String>,

    // Vital signs
    pub blood_pressure: Option<String>,
    pub heart_rate: Option<i32>,
    pub respiratory_rate: Option<i32>,
    pub temperature: Option<f64>,
    pub oxygen_saturation: Option<i32>,
    pub weight_kg: Option<f64>,
    pub height_cm: Option<f64>,

    pub chief_complaint: Option<String>,
    pub anamnesis: Option<String>,
    pub physical_exam: Option<String>,
    pub diagnosis: Option<String>,

    #[sqlx(json)]
    pub dynamic_records: DynamicRecords,
    /// Orthopedic test id -> raw value ("true", "false", "42", "2+").
    #[sqlx(json)]
    pub orthopedic_tests: BTreeMap<String, String>,

    #[sqlx(skip)]
    pub bmi: Option<f64>,
    #[sqlx(skip)]
    pub age_years: Option<i32>,

    #[ts(type = "string")]
    pub created_at: DateTime<Utc>,
    #[ts(type = "string")]
    pub updated_at: DateTime<Utc>,
}

impl Ficha {
    /// Fills the read-only derived fields relative to `today`.
    pub fn with_derived(mut self, today: NaiveDate) -> Self {
        self.bmi = body_mass_index(self.weight_kg, self.height_cm);
        self.age_years = self.birth_date.and_then(|born| age_on(born, today));
        self
    }
}

/// BMI rounded to one decimal, if both measurements are present and positive.
pub fn body_mass_index(weight_kg: Option<f64>, height_cm: Option<f64>) -> Option<f64> {
    match (weight_kg, height_cm) {
        (Some(w), Some(h)) if w > 0.0 && h > 0.0 => {
            let meters = h / 100.0;
            Some((w / (meters * meters) * 10.0).round() / 10.0)
        }
        _ => None,
    }
}

/// Whole years between `born` and `today`. None for birth dates in the future.
pub fn age_on(born: NaiveDate, today: NaiveDate) -> Option<i32> {
    if born > today {
        return None;
    }
    let mut years = today.year() - born.year();
    if (today.month(), today.day()) < (born.month(), born.day()) {
        years -= 1;
    }
    Some(years)
}

// --- Request Payloads (Input Schemas) ---

/// FichaPayload
///
/// Body of `POST /fichas` and `PUT /fichas/{id}`. A PUT overwrites every editable
/// column with the values given here.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Validate, Default)]
#[ts(export)]
pub struct FichaPayload {
    #[validate(length(max = 200), custom = "not_blank")]
    pub patient_name: String,
    #[serde(default)]
    pub birth_date: Option<NaiveDate>,
    #[serde(default)]
    pub sex: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub occupation: Option<String>,
    #[serde(default)]
    pub address: Option<String>,

    #[serde(default)]
    pub blood_pressure: Option<String>,
    #[serde(default)]
    #[validate(range(min = 20, max = 250))]
    pub heart_rate: Option<i32>,
    #[serde(default)]
    #[validate(range(min = 4, max = 80))]
    pub respiratory_rate: Option<i32>,
    #[serde(default)]
    #[validate(range(min = 30.0, max = 45.0))]
    pub temperature: Option<f64>,
    #[serde(default)]
    #[validate(range(min = 50, max = 100))]
    pub oxygen_saturation: Option<i32>,
    #[serde(default)]
    #[validate(range(min = 0.5, max = 400.0))]
    pub weight_kg: Option<f64>,
    #[serde(default)]
    #[validate(range(min = 30.0, max = 250.0))]
    pub height_cm: Option<f64>,

    #[serde(default)]
    pub chief_complaint: Option<String>,
    #[serde(default)]
    pub anamnesis: Option<String>,
    #[serde(default)]
    pub physical_exam: Option<String>,
    #[serde(default)]
    pub diagnosis: Option<String>,

    #[serde(default)]
    #[validate(custom = "valid_dynamic_records")]
    pub dynamic_records: DynamicRecords,
    #[serde(default)]
    pub orthopedic_tests: BTreeMap<String, String>,
}

/// UpdateFichaRequest
///
/// Body of `PATCH /fichas/{id}`. Every field is optional; absent fields keep their
/// stored value. JSON columns given here replace the stored document wholesale.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Validate, Default)]
#[ts(export)]
pub struct UpdateFichaRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    #[validate(length(max = 200), custom = "not_blank")]
    pub patient_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub birth_date: Option<NaiveDate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sex: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub occupation: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub blood_pressure: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[validate(range(min = 20, max = 250))]
    pub heart_rate: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[validate(range(min = 4, max = 80))]
    pub respiratory_rate: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[validate(range(min = 30.0, max = 45.0))]
    pub temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[validate(range(min = 50, max = 100))]
    pub oxygen_saturation: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[validate(range(min = 0.5, max = 400.0))]
    pub weight_kg: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[validate(range(min = 30.0, max = 250.0))]
    pub height_cm: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub chief_complaint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub anamnesis: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub physical_exam: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diagnosis: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[validate(custom = "valid_dynamic_records")]
    pub dynamic_records: Option<DynamicRecords>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub orthopedic_tests: Option<BTreeMap<String, String>>,
}

fn not_blank(value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::new("blank"));
    }
    Ok(())
}

fn valid_dynamic_records(records: &DynamicRecords) -> Result<(), ValidationError> {
    if records.muscle_tests.iter().any(|t| t.grade > 5) {
        return Err(ValidationError::new("muscle_grade_out_of_range"));
    }
    if records.muscle_tests.iter().any(|t| t.muscle.trim().is_empty()) {
        return Err(ValidationError::new("muscle_name_blank"));
    }
    if records.prescriptions.iter().any(|p| p.exercise.trim().is_empty()) {
        return Err(ValidationError::new("exercise_blank"));
    }
    Ok(())
}

/// RegisterRequest
///
/// Input payload for `POST /auth/register`.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Validate)]
#[ts(export)]
pub struct RegisterRequest {
    #[validate(length(min = 3, max = 64))]
    pub username: String,
    #[validate(length(min = 8, max = 256))]
    pub password: String,
}

/// LoginRequest
///
/// Input payload for `POST /auth/login`. The password is verified and dropped; it is
/// never logged or stored.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

// --- Output Schemas ---

/// UserProfile
///
/// Public view of a user (GET /me and the login response).
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct UserProfile {
    pub id: Uuid,
    pub username: String,
    #[ts(type = "string")]
    pub created_at: DateTime<Utc>,
}

impl From<User> for UserProfile {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            username: user.username,
            created_at: user.created_at,
        }
    }
}

/// LoginResponse
///
/// The session token is sent back as `Authorization: Bearer <token>` on later requests.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct LoginResponse {
    pub token: String,
    #[ts(type = "string")]
    pub expires_at: DateTime<Utc>,
    pub user: UserProfile,
}
