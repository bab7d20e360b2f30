use std::time::Duration;

use anyhow::anyhow;
use async_trait::async_trait;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};
use tourney_core::{TournamentRecord, VisibilityState};
use uuid::Uuid;

use crate::{RecordStore, StoreError};

const RECORD_COLUMNS: &str = r#"
    id, name, start_date, end_date, source_application_id, managed_by_source,
    visibility_state, contact_phone, venue, organizer, created_at, updated_at, promoted_at
"#;

/// Postgres-backed record store. The one-live-record-per-application rule is
/// a partial unique index, so violations surface as `StoreError::Conflict`.
#[derive(Debug, Clone)]
pub struct PgRecordStore {
    pool: PgPool,
}

impl PgRecordStore {
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(10))
            .connect(database_url)
            .await
            .map_err(|err| StoreError::Unavailable(format!("connecting to postgres: {err}")))?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|err| StoreError::Backend(anyhow!("running migrations: {err}")))
    }
}

fn map_sqlx(err: sqlx::Error, record: Option<&TournamentRecord>) -> StoreError {
    match err {
        sqlx::Error::Database(db) if db.is_unique_violation() => match record {
            Some(record) if db.constraint() == Some("tournaments_pkey") => {
                StoreError::AlreadyExists(record.id)
            }
            Some(record) => StoreError::Conflict {
                id: record.id,
                source_application_id: record.source_id().unwrap_or_default().to_string(),
            },
            None => StoreError::Backend(anyhow!("unique violation: {db}")),
        },
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
            StoreError::Unavailable(err.to_string())
        }
        other => StoreError::Backend(anyhow!(other)),
    }
}

fn record_from_row(row: &PgRow) -> Result<TournamentRecord, StoreError> {
    let decode = |err: sqlx::Error| map_sqlx(err, None);
    let visibility: String = row.try_get("visibility_state").map_err(decode)?;
    let visibility = VisibilityState::parse(&visibility)
        .ok_or_else(|| StoreError::Backend(anyhow!("unknown visibility_state {visibility:?}")))?;
    Ok(TournamentRecord {
        id: row.try_get("id").map_err(decode)?,
        name: row.try_get("name").map_err(decode)?,
        start_date: row.try_get("start_date").map_err(decode)?,
        end_date: row.try_get("end_date").map_err(decode)?,
        source_application_id: row.try_get("source_application_id").map_err(decode)?,
        managed_by_source: row.try_get("managed_by_source").map_err(decode)?,
        visibility,
        contact_phone: row.try_get("contact_phone").map_err(decode)?,
        venue: row.try_get("venue").map_err(decode)?,
        organizer: row.try_get("organizer").map_err(decode)?,
        created_at: row.try_get("created_at").map_err(decode)?,
        updated_at: row.try_get("updated_at").map_err(decode)?,
        promoted_at: row.try_get("promoted_at").map_err(decode)?,
    })
}

#[async_trait]
impl RecordStore for PgRecordStore {
    fn backend_name(&self) -> &'static str {
        "postgres"
    }

    async fn list_records(&self) -> Result<Vec<TournamentRecord>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {RECORD_COLUMNS} FROM tournaments ORDER BY created_at, id"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(|err| map_sqlx(err, None))?;
        rows.iter().map(record_from_row).collect()
    }

    async fn list_by_visibility(
        &self,
        state: VisibilityState,
    ) -> Result<Vec<TournamentRecord>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {RECORD_COLUMNS} FROM tournaments WHERE visibility_state = $1 ORDER BY created_at, id"
        ))
        .bind(state.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(|err| map_sqlx(err, None))?;
        rows.iter().map(record_from_row).collect()
    }

    async fn get_record(&self, id: Uuid) -> Result<Option<TournamentRecord>, StoreError> {
        let row = sqlx::query(&format!("SELECT {RECORD_COLUMNS} FROM tournaments WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|err| map_sqlx(err, None))?;
        row.as_ref().map(record_from_row).transpose()
    }

    async fn insert_record(&self, record: &TournamentRecord) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO tournaments (
                id, name, start_date, end_date, source_application_id, managed_by_source,
                visibility_state, contact_phone, venue, organizer, created_at, updated_at, promoted_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(record.id)
        .bind(&record.name)
        .bind(record.start_date)
        .bind(record.end_date)
        .bind(&record.source_application_id)
        .bind(record.managed_by_source)
        .bind(record.visibility.as_str())
        .bind(&record.contact_phone)
        .bind(&record.venue)
        .bind(&record.organizer)
        .bind(record.created_at)
        .bind(record.updated_at)
        .bind(record.promoted_at)
        .execute(&self.pool)
        .await
        .map_err(|err| map_sqlx(err, Some(record)))?;
        Ok(())
    }

    async fn update_record(&self, record: &TournamentRecord) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE tournaments
               SET name = $2,
                   start_date = $3,
                   end_date = $4,
                   source_application_id = $5,
                   managed_by_source = $6,
                   visibility_state = $7,
                   contact_phone = $8,
                   venue = $9,
                   organizer = $10,
                   updated_at = $11,
                   promoted_at = $12
             WHERE id = $1
            "#,
        )
        .bind(record.id)
        .bind(&record.name)
        .bind(record.start_date)
        .bind(record.end_date)
        .bind(&record.source_application_id)
        .bind(record.managed_by_source)
        .bind(record.visibility.as_str())
        .bind(&record.contact_phone)
        .bind(&record.venue)
        .bind(&record.organizer)
        .bind(record.updated_at)
        .bind(record.promoted_at)
        .execute(&self.pool)
        .await
        .map_err(|err| map_sqlx(err, Some(record)))?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(record.id));
        }
        Ok(())
    }

    async fn delete_record(&self, id: Uuid) -> Result<(), StoreError> {
        let result = sqlx::query("DELETE FROM tournaments WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|err| map_sqlx(err, None))?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(id));
        }
        Ok(())
    }

    async fn close(&self) -> Result<(), StoreError> {
        self.pool.close().await;
        Ok(())
    }
}
