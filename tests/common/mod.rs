#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use physio_fichas::{
    AppConfig, AppState,
    auth::issue_token,
    error::RepositoryError,
    models::{Ficha, FichaPayload, Session, UpdateFichaRequest, User},
    password,
    repository::{RepoResult, Repository},
};
use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};
use uuid::Uuid;

// --- In-memory repository used by handler and HTTP tests ---

#[derive(Default)]
pub struct MemoryRepository {
    pub users: Mutex<HashMap<Uuid, User>>,
    pub sessions: Mutex<HashMap<Uuid, Session>>,
    pub fichas: Mutex<HashMap<Uuid, Ficha>>,
    /// When set, every call fails with a database error.
    pub fail: bool,
}

impl MemoryRepository {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    fn check(&self) -> RepoResult<()> {
        if self.fail {
            return Err(RepositoryError::Database(sqlx::Error::PoolTimedOut));
        }
        Ok(())
    }

    /// Inserts a user whose password is `password` (argon2-hashed like the real flow).
    pub fn seed_user(&self, username: &str, plain: &str) -> User {
        let user = User {
            id: Uuid::new_v4(),
            username: username.to_string(),
            password_hash: password::hash_password(plain).unwrap(),
            created_at: Utc::now(),
        };
        self.users.lock().unwrap().insert(user.id, user.clone());
        user
    }

    pub fn seed_session(&self, user_id: Uuid, expires_at: DateTime<Utc>) -> Session {
        let session = Session {
            id: Uuid::new_v4(),
            user_id,
            created_at: Utc::now(),
            expires_at,
        };
        self.sessions
            .lock()
            .unwrap()
            .insert(session.id, session.clone());
        session
    }

    pub fn seed_ficha(&self, user_id: Uuid, payload: FichaPayload) -> Ficha {
        let ficha = ficha_from_payload(Uuid::new_v4(), user_id, payload, Utc::now());
        self.fichas.lock().unwrap().insert(ficha.id, ficha.clone());
        ficha
    }
}

fn ficha_from_payload(id: Uuid, user_id: Uuid, p: FichaPayload, created_at: DateTime<Utc>) -> Ficha {
    Ficha {
        id,
        user_id,
        patient_name: p.patient_name,
        birth_date: p.birth_date,
        sex: p.sex,
        phone: p.phone,
        occupation: p.occupation,
        address: p.address,
        blood_pressure: p.blood_pressure,
        heart_rate: p.heart_rate,
        respiratory_rate: p.respiratory_rate,
        temperature: p.temperature,
        oxygen_saturation: p.oxygen_saturation,
        weight_kg: p.weight_kg,
        height_cm: p.height_cm,
        chief_complaint: p.chief_complaint,
        anamnesis: p.anamnesis,
        physical_exam: p.physical_exam,
        diagnosis: p.diagnosis,
        dynamic_records: p.dynamic_records,
        orthopedic_tests: p.orthopedic_tests,
        bmi: None,
        age_years: None,
        created_at,
        updated_at: Utc::now(),
    }
}

fn patch<T>(target: &mut T, value: Option<T>) {
    if let Some(v) = value {
        *target = v;
    }
}

fn patch_opt<T>(target: &mut Option<T>, value: Option<T>) {
    if value.is_some() {
        *target = value;
    }
}

#[async_trait]
impl Repository for MemoryRepository {
    async fn get_user(&self, id: Uuid) -> RepoResult<Option<User>> {
        self.check()?;
        Ok(self.users.lock().unwrap().get(&id).cloned())
    }

    async fn get_user_by_username(&self, username: &str) -> RepoResult<Option<User>> {
        self.check()?;
        Ok(self
            .users
            .lock()
            .unwrap()
            .values()
            .find(|u| u.username == username)
            .cloned())
    }

    async fn create_user(&self, username: &str, password_hash: &str) -> RepoResult<User> {
        self.check()?;
        let mut users = self.users.lock().unwrap();
        if users.values().any(|u| u.username == username) {
            return Err(RepositoryError::Conflict("username already exists".to_string()));
        }
        let user = User {
            id: Uuid::new_v4(),
            username: username.to_string(),
            password_hash: password_hash.to_string(),
            created_at: Utc::now(),
        };
        users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn create_session(&self, user_id: Uuid, expires_at: DateTime<Utc>) -> RepoResult<Session> {
        self.check()?;
        Ok(self.seed_session(user_id, expires_at))
    }

    async fn get_session(&self, id: Uuid) -> RepoResult<Option<Session>> {
        self.check()?;
        Ok(self.sessions.lock().unwrap().get(&id).cloned())
    }

    async fn delete_session(&self, id: Uuid) -> RepoResult<bool> {
        self.check()?;
        Ok(self.sessions.lock().unwrap().remove(&id).is_some())
    }

    async fn delete_expired_sessions(&self) -> RepoResult<u64> {
        self.check()?;
        let now = Utc::now();
        let mut sessions = self.sessions.lock().unwrap();
        let before = sessions.len();
        sessions.retain(|_, s| s.is_active(now));
        Ok((before - sessions.len()) as u64)
    }

    async fn list_fichas(&self, user_id: Uuid, search: Option<String>) -> RepoResult<Vec<Ficha>> {
        self.check()?;
        let needle = search.map(|s| s.trim().to_lowercase());
        let mut fichas: Vec<Ficha> = self
            .fichas
            .lock()
            .unwrap()
            .values()
            .filter(|f| f.user_id == user_id)
            .filter(|f| match &needle {
                Some(n) => f.patient_name.to_lowercase().contains(n.as_str()),
                None => true,
            })
            .cloned()
            .collect();
        fichas.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(fichas)
    }

    async fn get_ficha(&self, id: Uuid, user_id: Uuid) -> RepoResult<Option<Ficha>> {
        self.check()?;
        Ok(self
            .fichas
            .lock()
            .unwrap()
            .get(&id)
            .filter(|f| f.user_id == user_id)
            .cloned())
    }

    async fn create_ficha(&self, payload: FichaPayload, user_id: Uuid) -> RepoResult<Ficha> {
        self.check()?;
        Ok(self.seed_ficha(user_id, payload))
    }

    async fn replace_ficha(
        &self,
        id: Uuid,
        user_id: Uuid,
        payload: FichaPayload,
    ) -> RepoResult<Option<Ficha>> {
        self.check()?;
        let mut fichas = self.fichas.lock().unwrap();
        match fichas.get_mut(&id).filter(|f| f.user_id == user_id) {
            Some(existing) => {
                *existing = ficha_from_payload(id, user_id, payload, existing.created_at);
                Ok(Some(existing.clone()))
            }
            None => Ok(None),
        }
    }

    async fn update_ficha(
        &self,
        id: Uuid,
        user_id: Uuid,
        req: UpdateFichaRequest,
    ) -> RepoResult<Option<Ficha>> {
        self.check()?;
        let mut fichas = self.fichas.lock().unwrap();
        let Some(f) = fichas.get_mut(&id).filter(|f| f.user_id == user_id) else {
            return Ok(None);
        };
        patch(&mut f.patient_name, req.patient_name);
        patch_opt(&mut f.birth_date, req.birth_date);
        patch_opt(&mut f.sex, req.sex);
        patch_opt(&mut f.phone, req.phone);
        patch_opt(&mut f.occupation, req.occupation);
        patch_opt(&mut f.address, req.address);
        patch_opt(&mut f.blood_pressure, req.blood_pressure);
        patch_opt(&mut f.heart_rate, req.heart_rate);
        patch_opt(&mut f.respiratory_rate, req.respiratory_rate);
        patch_opt(&mut f.temperature, req.temperature);
        patch_opt(&mut f.oxygen_saturation, req.oxygen_saturation);
        patch_opt(&mut f.weight_kg, req.weight_kg);
        patch_opt(&mut f.height_cm, req.height_cm);
        patch_opt(&mut f.chief_complaint, req.chief_complaint);
        patch_opt(&mut f.anamnesis, req.anamnesis);
        patch_opt(&mut f.physical_exam, req.physical_exam);
        patch_opt(&mut f.diagnosis, req.diagnosis);
        patch(&mut f.dynamic_records, req.dynamic_records);
        patch(&mut f.orthopedic_tests, req.orthopedic_tests);
        f.updated_at = Utc::now();
        Ok(Some(f.clone()))
    }

    async fn delete_ficha(&self, id: Uuid, user_id: Uuid) -> RepoResult<bool> {
        self.check()?;
        let mut fichas = self.fichas.lock().unwrap();
        if fichas.get(&id).is_some_and(|f| f.user_id == user_id) {
            fichas.remove(&id);
            return Ok(true);
        }
        Ok(false)
    }
}

// --- State helpers ---

pub fn test_state(repo: Arc<MemoryRepository>) -> AppState {
    AppState {
        repo,
        config: AppConfig::default(),
    }
}

/// Creates a live session for `user_id` and returns a signed token for it.
pub fn login_token(repo: &MemoryRepository, config: &AppConfig, user_id: Uuid) -> (Session, String) {
    let session = repo.seed_session(user_id, Utc::now() + chrono::Duration::hours(1));
    let token = issue_token(config, &session).unwrap();
    (session, token)
}

pub fn sample_payload(name: &str) -> FichaPayload {
    FichaPayload {
        patient_name: name.to_string(),
        chief_complaint: Some("Dor no ombro direito".to_string()),
        weight_kg: Some(70.0),
        height_cm: Some(175.0),
        ..FichaPayload::default()
    }
}
