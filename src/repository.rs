use crate::{
    error::RepositoryError,
    models::{Ficha, FichaPayload, Session, UpdateFichaRequest, User},
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, query_builder::QueryBuilder, types::Json};
use std::sync::Arc;
use uuid::Uuid;

pub type RepoResult<T> = Result<T, RepositoryError>;

/// Repository Trait
///
/// Abstract contract for all persistence operations. Handlers and the `AuthUser`
/// extractor only ever see `Arc<dyn Repository>`, so tests can swap in an in-memory
/// implementation.
///
/// Every ficha operation takes the caller's `user_id`; a record owned by somebody else
/// behaves exactly like a missing one.
#[async_trait]
pub trait Repository: Send + Sync {
    // --- Users ---
    async fn get_user(&self, id: Uuid) -> RepoResult<Option<User>>;
    async fn get_user_by_username(&self, username: &str) -> RepoResult<Option<User>>;
    // Fails with `RepositoryError::Conflict` if the username is taken.
    async fn create_user(&self, username: &str, password_hash: &str) -> RepoResult<User>;

    // --- Sessions ---
    async fn create_session(&self, user_id: Uuid, expires_at: DateTime<Utc>) -> RepoResult<Session>;
    async fn get_session(&self, id: Uuid) -> RepoResult<Option<Session>>;
    // True if a row was removed.
    async fn delete_session(&self, id: Uuid) -> RepoResult<bool>;
    // Housekeeping: drops every session whose `expires_at` has passed.
    async fn delete_expired_sessions(&self) -> RepoResult<u64>;

    // --- Fichas ---
    async fn list_fichas(&self, user_id: Uuid, search: Option<String>) -> RepoResult<Vec<Ficha>>;
    async fn get_ficha(&self, id: Uuid, user_id: Uuid) -> RepoResult<Option<Ficha>>;
    async fn create_ficha(&self, payload: FichaPayload, user_id: Uuid) -> RepoResult<Ficha>;
    // Full update. None if the ficha is missing or not owned by `user_id`.
    async fn replace_ficha(
        &self,
        id: Uuid,
        user_id: Uuid,
        payload: FichaPayload,
    ) -> RepoResult<Option<Ficha>>;
    // Partial update via COALESCE. None if missing or not owned.
    async fn update_ficha(
        &self,
        id: Uuid,
        user_id: Uuid,
        patch: UpdateFichaRequest,
    ) -> RepoResult<Option<Ficha>>;
    async fn delete_ficha(&self, id: Uuid, user_id: Uuid) -> RepoResult<bool>;
}

/// RepositoryState
///
/// The concrete type used to share the persistence layer across the application state.
pub type RepositoryState = Arc<dyn Repository>;

/// Builds an ILIKE pattern matching `term` as a plain substring. Backslash, `%` and `_`
/// are escaped for use with `ESCAPE '\'`.
pub fn contains_pattern(term: &str) -> String {
    let mut pattern = String::with_capacity(term.len() + 2);
    pattern.push('%');
    for c in term.trim().chars() {
        if matches!(c, '\\' | '%' | '_') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('%');
    pattern
}

/// PostgresRepository
///
/// The `Repository` implementation backed by PostgreSQL.
pub struct PostgresRepository {
    pool: PgPool,
}

impl PostgresRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

macro_rules! ficha_columns {
    () => {
        "id, user_id, patient_name, birth_date, sex, phone, occupation, address, \
         blood_pressure, heart_rate, respiratory_rate, temperature, oxygen_saturation, \
         weight_kg, height_cm, chief_complaint, anamnesis, physical_exam, diagnosis, \
         dynamic_records, orthopedic_tests, created_at, updated_at"
    };
}

const USER_COLUMNS: &str = "id, username, password_hash, created_at";

fn map_unique_violation(err: sqlx::Error, what: &str) -> RepositoryError {
    match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            RepositoryError::Conflict(format!("{} already exists", what))
        }
        _ => RepositoryError::Database(err),
    }
}

#[async_trait]
impl Repository for PostgresRepository {
    async fn get_user(&self, id: Uuid) -> RepoResult<Option<User>> {
        let sql = format!("SELECT {} FROM users WHERE id = $1", USER_COLUMNS);
        let user = sqlx::query_as::<_, User>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(user)
    }

    async fn get_user_by_username(&self, username: &str) -> RepoResult<Option<User>> {
        let sql = format!("SELECT {} FROM users WHERE username = $1", USER_COLUMNS);
        let user = sqlx::query_as::<_, User>(&sql)
            .bind(username)
            .fetch_optional(&self.pool)
            .await?;
        Ok(user)
    }

    /// create_user
    ///
    /// The unique index on `users.username` turns a duplicate registration into a Conflict.
    async fn create_user(&self, username: &str, password_hash: &str) -> RepoResult<User> {
        let sql = format!(
            "INSERT INTO users (id, username, password_hash, created_at) \
             VALUES ($1, $2, $3, NOW()) RETURNING {}",
            USER_COLUMNS
        );
        sqlx::query_as::<_, User>(&sql)
            .bind(Uuid::new_v4())
            .bind(username)
            .bind(password_hash)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| map_unique_violation(e, "username"))
    }

    async fn create_session(&self, user_id: Uuid, expires_at: DateTime<Utc>) -> RepoResult<Session> {
        let session = sqlx::query_as::<_, Session>(
            r#"INSERT INTO sessions (id, user_id, created_at, expires_at)
               VALUES ($1, $2, NOW(), $3)
               RETURNING id, user_id, created_at, expires_at"#,
        )
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(expires_at)
        .fetch_one(&self.pool)
        .await?;
        Ok(session)
    }

    async fn get_session(&self, id: Uuid) -> RepoResult<Option<Session>> {
        let session = sqlx::query_as::<_, Session>(
            "SELECT id, user_id, created_at, expires_at FROM sessions WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(session)
    }

    async fn delete_session(&self, id: Uuid) -> RepoResult<bool> {
        let res = sqlx::query("DELETE FROM sessions WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(res.rows_affected() > 0)
    }

    async fn delete_expired_sessions(&self) -> RepoResult<u64> {
        let res = sqlx::query("DELETE FROM sessions WHERE expires_at <= NOW()")
            .execute(&self.pool)
            .await?;
        Ok(res.rows_affected())
    }

    /// list_fichas
    ///
    /// Owner-scoped listing. The optional search is a bound ILIKE on `patient_name`,
    /// built with QueryBuilder so user input never reaches the SQL text. Wildcards in
    /// the term match literally.
    async fn list_fichas(&self, user_id: Uuid, search: Option<String>) -> RepoResult<Vec<Ficha>> {
        let mut builder: QueryBuilder<sqlx::Postgres> = QueryBuilder::new(concat!(
            "SELECT ",
            ficha_columns!(),
            " FROM fichas WHERE user_id = "
        ));
        builder.push_bind(user_id);

        if let Some(s) = search.filter(|s| !s.trim().is_empty()) {
            builder.push(" AND patient_name ILIKE ");
            builder.push_bind(contains_pattern(&s));
            builder.push(" ESCAPE '\\'");
        }

        builder.push(" ORDER BY updated_at DESC");

        let fichas = builder
            .build_query_as::<Ficha>()
            .fetch_all(&self.pool)
            .await?;
        Ok(fichas)
    }

    async fn get_ficha(&self, id: Uuid, user_id: Uuid) -> RepoResult<Option<Ficha>> {
        let ficha = sqlx::query_as::<_, Ficha>(concat!(
            "SELECT ",
            ficha_columns!(),
            " FROM fichas WHERE id = $1 AND user_id = $2"
        ))
        .bind(id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(ficha)
    }

    async fn create_ficha(&self, payload: FichaPayload, user_id: Uuid) -> RepoResult<Ficha> {
        let ficha = sqlx::query_as::<_, Ficha>(concat!(
            "INSERT INTO fichas (id, user_id, patient_name, birth_date, sex, phone, occupation, \
             address, blood_pressure, heart_rate, respiratory_rate, temperature, \
             oxygen_saturation, weight_kg, height_cm, chief_complaint, anamnesis, \
             physical_exam, diagnosis, dynamic_records, orthopedic_tests, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, \
             $17, $18, $19, $20, $21, NOW(), NOW()) RETURNING ",
            ficha_columns!()
        ))
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(&payload.patient_name)
        .bind(payload.birth_date)
        .bind(&payload.sex)
        .bind(&payload.phone)
        .bind(&payload.occupation)
        .bind(&payload.address)
        .bind(&payload.blood_pressure)
        .bind(payload.heart_rate)
        .bind(payload.respiratory_rate)
        .bind(payload.temperature)
        .bind(payload.oxygen_saturation)
        .bind(payload.weight_kg)
        .bind(payload.height_cm)
        .bind(&payload.chief_complaint)
        .bind(&payload.anamnesis)
        .bind(&payload.physical_exam)
        .bind(&payload.diagnosis)
        .bind(Json(&payload.dynamic_records))
        .bind(Json(&payload.orthopedic_tests))
        .fetch_one(&self.pool)
        .await?;
        Ok(ficha)
    }

    /// replace_ficha
    ///
    /// PUT semantics: every editable column is overwritten, including with NULL.
    async fn replace_ficha(
        &self,
        id: Uuid,
        user_id: Uuid,
        payload: FichaPayload,
    ) -> RepoResult<Option<Ficha>> {
        let ficha = sqlx::query_as::<_, Ficha>(concat!(
            "UPDATE fichas SET patient_name = $3, birth_date = $4, sex = $5, phone = $6, \
             occupation = $7, address = $8, blood_pressure = $9, heart_rate = $10, \
             respiratory_rate = $11, temperature = $12, oxygen_saturation = $13, \
             weight_kg = $14, height_cm = $15, chief_complaint = $16, anamnesis = $17, \
             physical_exam = $18, diagnosis = $19, dynamic_records = $20, \
             orthopedic_tests = $21, updated_at = NOW() \
             WHERE id = $1 AND user_id = $2 RETURNING ",
            ficha_columns!()
        ))
        .bind(id)
        .bind(user_id)
        .bind(&payload.patient_name)
        .bind(payload.birth_date)
        .bind(&payload.sex)
        .bind(&payload.phone)
        .bind(&payload.occupation)
        .bind(&payload.address)
        .bind(&payload.blood_pressure)
        .bind(payload.heart_rate)
        .bind(payload.respiratory_rate)
        .bind(payload.temperature)
        .bind(payload.oxygen_saturation)
        .bind(payload.weight_kg)
        .bind(payload.height_cm)
        .bind(&payload.chief_complaint)
        .bind(&payload.anamnesis)
        .bind(&payload.physical_exam)
        .bind(&payload.diagnosis)
        .bind(Json(&payload.dynamic_records))
        .bind(Json(&payload.orthopedic_tests))
        .fetch_optional(&self.pool)
        .await?;
        Ok(ficha)
    }

    /// update_ficha
    ///
    /// PATCH semantics via COALESCE: a column only changes when its field is `Some`.
    async fn update_ficha(
        &self,
        id: Uuid,
        user_id: Uuid,
        patch: UpdateFichaRequest,
    ) -> RepoResult<Option<Ficha>> {
        let ficha = sqlx::query_as::<_, Ficha>(concat!(
            "UPDATE fichas SET \
             patient_name = COALESCE($3, patient_name), \
             birth_date = COALESCE($4, birth_date), \
             sex = COALESCE($5, sex), \
             phone = COALESCE($6, phone), \
             occupation = COALESCE($7, occupation), \
             address = COALESCE($8, address), \
             blood_pressure = COALESCE($9, blood_pressure), \
             heart_rate = COALESCE($10, heart_rate), \
             respiratory_rate = COALESCE($11, respiratory_rate), \
             temperature = COALESCE($12, temperature), \
             oxygen_saturation = COALESCE($13, oxygen_saturation), \
             weight_kg = COALESCE($14, weight_kg), \
             height_cm = COALESCE($15, height_cm), \
             chief_complaint = COALESCE($16, chief_complaint), \
             anamnesis = COALESCE($17, anamnesis), \
             physical_exam = COALESCE($18, physical_exam), \
             diagnosis = COALESCE($19, diagnosis), \
             dynamic_records = COALESCE($20, dynamic_records), \
             orthopedic_tests = COALESCE($21, orthopedic_tests), \
             updated_at = NOW() \
             WHERE id = $1 AND user_id = $2 RETURNING ",
            ficha_columns!()
        ))
        .bind(id)
        .bind(user_id)
        .bind(&patch.patient_name)
        .bind(patch.birth_date)
        .bind(&patch.sex)
        .bind(&patch.phone)
        .bind(&patch.occupation)
        .bind(&patch.address)
        .bind(&patch.blood_pressure)
        .bind(patch.heart_rate)
        .bind(patch.respiratory_rate)
        .bind(patch.temperature)
        .bind(patch.oxygen_saturation)
        .bind(patch.weight_kg)
        .bind(patch.height_cm)
        .bind(&patch.chief_complaint)
        .bind(&patch.anamnesis)
        .bind(&patch.physical_exam)
        .bind(&patch.diagnosis)
        .bind(patch.dynamic_records.as_ref().map(Json))
        .bind(patch.orthopedic_tests.as_ref().map(Json))
        .fetch_optional(&self.pool)
        .await?;
        Ok(ficha)
    }

    async fn delete_ficha(&self, id: Uuid, user_id: Uuid) -> RepoResult<bool> {
        let res = sqlx::query("DELETE FROM fichas WHERE id = $1 AND user_id = $2")
            .bind(id)
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(res.rows_affected() > 0)
    }
}
