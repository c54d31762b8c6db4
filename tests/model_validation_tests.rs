use chrono::NaiveDate;
use physio_fichas::models::{
    DynamicRecords, Ficha, FichaPayload, MuscleTest, Prescription, RegisterRequest,
    UpdateFichaRequest, User, UserProfile, age_on, body_mass_index,
};
use validator::Validate;

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

#[test]
fn test_bmi() {
    assert_eq!(body_mass_index(Some(70.0), Some(175.0)), Some(22.9));
    assert_eq!(body_mass_index(Some(70.0), None), None);
    assert_eq!(body_mass_index(Some(0.0), Some(175.0)), None);
}

#[test]
fn test_age_counts_whole_years() {
    let born = date(1990, 6, 15);
    assert_eq!(age_on(born, date(2024, 6, 14)), Some(33));
    assert_eq!(age_on(born, date(2024, 6, 15)), Some(34));
    assert_eq!(age_on(born, date(1989, 1, 1)), None);
}

#[test]
fn test_with_derived_fills_read_only_fields() {
    let ficha = Ficha {
        birth_date: Some(date(2000, 1, 1)),
        weight_kg: Some(80.0),
        height_cm: Some(180.0),
        ..Ficha::default()
    }
    .with_derived(date(2025, 1, 1));

    assert_eq!(ficha.age_years, Some(25));
    assert_eq!(ficha.bmi, Some(24.7));
}

#[test]
fn test_payload_defaults_from_minimal_json() {
    let payload: FichaPayload =
        serde_json::from_value(serde_json::json!({ "patient_name": "Maria" })).unwrap();
    assert!(payload.validate().is_ok());
    assert!(payload.orthopedic_tests.is_empty());
    assert_eq!(payload.dynamic_records, DynamicRecords::default());
}

#[test]
fn test_payload_rejects_blank_name() {
    let payload = FichaPayload {
        patient_name: "  ".to_string(),
        ..FichaPayload::default()
    };
    assert!(payload.validate().is_err());
}

#[test]
fn test_payload_vital_sign_ranges() {
    let ok = FichaPayload {
        patient_name: "Maria".to_string(),
        heart_rate: Some(72),
        respiratory_rate: Some(16),
        temperature: Some(36.5),
        oxygen_saturation: Some(98),
        ..FichaPayload::default()
    };
    assert!(ok.validate().is_ok());

    let cases = [
        FichaPayload { heart_rate: Some(10), ..ok.clone() },
        FichaPayload { respiratory_rate: Some(100), ..ok.clone() },
        FichaPayload { temperature: Some(50.0), ..ok.clone() },
        FichaPayload { oxygen_saturation: Some(101), ..ok.clone() },
        FichaPayload { height_cm: Some(10.0), ..ok.clone() },
    ];
    for case in cases {
        let errors = case.validate().unwrap_err();
        assert_eq!(errors.field_errors().len(), 1);
    }
}

#[test]
fn test_payload_rejects_bad_dynamic_records() {
    let mut payload = FichaPayload {
        patient_name: "Maria".to_string(),
        ..FichaPayload::default()
    };
    payload.dynamic_records.muscle_tests.push(MuscleTest {
        muscle: "Glúteo médio".to_string(),
        grade: 6,
        ..MuscleTest::default()
    });
    assert!(payload.validate().is_err());

    payload.dynamic_records.muscle_tests[0].grade = 5;
    assert!(payload.validate().is_ok());

    payload.dynamic_records.prescriptions.push(Prescription {
        exercise: " ".to_string(),
        ..Prescription::default()
    });
    assert!(payload.validate().is_err());
}

#[test]
fn test_update_request_skips_absent_fields() {
    let patch = UpdateFichaRequest {
        diagnosis: Some("Lombalgia mecânica".to_string()),
        ..UpdateFichaRequest::default()
    };
    let json = serde_json::to_string(&patch).unwrap();
    assert_eq!(json, r#"{"diagnosis":"Lombalgia mecânica"}"#);
    assert!(patch.validate().is_ok());

    let blank_name = UpdateFichaRequest {
        patient_name: Some("".to_string()),
        ..UpdateFichaRequest::default()
    };
    assert!(blank_name.validate().is_err());
}

#[test]
fn test_register_request_bounds() {
    let short_user = RegisterRequest {
        username: "ab".to_string(),
        password: "password123".to_string(),
    };
    assert!(short_user.validate().is_err());

    let good = RegisterRequest {
        username: "ana".to_string(),
        password: "password123".to_string(),
    };
    assert!(good.validate().is_ok());
}

#[test]
fn test_password_hash_is_never_serialized() {
    let user = User {
        username: "ana".to_string(),
        password_hash: "$argon2id$secret".to_string(),
        ..User::default()
    };
    let json = serde_json::to_string(&user).unwrap();
    assert!(!json.contains("password_hash"));
    assert!(!json.contains("secret"));

    let profile: UserProfile = user.into();
    assert_eq!(profile.username, "ana");
}
