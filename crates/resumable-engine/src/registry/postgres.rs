use async_trait::async_trait;
use chrono::{DateTime, Utc};
use resumable_core::{OwnerId, TargetKind, UploadMetadata, UploadRecord, UploadState};
use sqlx::types::Json;
use sqlx::PgPool;
use uuid::Uuid;

use super::{OffsetUpdate, RegistryError, RegistryResult, StateTransition, UploadRegistry};

const SELECT_COLUMNS: &str = r#"
    id, owner_id, target_kind, target_resource_id, declared_length, current_offset,
    metadata, state, created_at, updated_at, expires_at, final_resource_id
"#;

#[derive(sqlx::FromRow)]
struct UploadRow {
    id: Uuid,
    owner_id: String,
    target_kind: String,
    target_resource_id: Option<String>,
    declared_length: i64,
    current_offset: i64,
    metadata: Json<UploadMetadata>,
    state: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    final_resource_id: Option<String>,
}

impl TryFrom<UploadRow> for UploadRecord {
    type Error = RegistryError;

    fn try_from(row: UploadRow) -> Result<Self, Self::Error> {
        let target = match (row.target_kind.as_str(), row.target_resource_id) {
            ("new_file", _) => TargetKind::NewFile,
            ("replace", Some(resource_id)) => TargetKind::Replace { resource_id },
            (kind, _) => {
                return Err(RegistryError::Backend(format!(
                    "Invalid target for upload {}: {}",
                    row.id, kind
                )))
            }
        };
        let state = row
            .state
            .parse::<UploadState>()
            .map_err(RegistryError::Backend)?;

        Ok(UploadRecord {
            id: row.id,
            owner_id: OwnerId::from(row.owner_id),
            target,
            declared_length: row.declared_length.max(0) as u64,
            current_offset: row.current_offset.max(0) as u64,
            metadata: row.metadata.0,
            state,
            created_at: row.created_at,
            updated_at: row.updated_at,
            expires_at: row.expires_at,
            final_resource_id: row.final_resource_id,
        })
    }
}

fn to_i64(value: u64) -> RegistryResult<i64> {
    i64::try_from(value)
        .map_err(|_| RegistryError::Backend(format!("Value {} does not fit in BIGINT", value)))
}

fn collect(rows: Vec<UploadRow>) -> RegistryResult<Vec<UploadRecord>> {
    rows.into_iter().map(UploadRecord::try_from).collect()
}

/// PostgreSQL-backed registry; records survive restarts.
#[derive(Clone)]
pub struct PgUploadRegistry {
    pool: PgPool,
}

impl PgUploadRegistry {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Apply the bundled migrations.
    pub async fn migrate(&self) -> RegistryResult<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| RegistryError::Backend(format!("Migration failed: {}", e)))
    }

    /// Explain why a conditional update matched no row.
    async fn conflict(&self, id: Uuid, requested_offset: Option<u64>) -> RegistryError {
        match self.get(id).await {
            Ok(None) => RegistryError::NotFound(id),
            Ok(Some(record)) => match requested_offset {
                Some(requested)
                    if requested < record.current_offset
                        || requested > record.declared_length =>
                {
                    RegistryError::InvalidOffset {
                        id,
                        current: record.current_offset,
                        requested,
                        declared: record.declared_length,
                    }
                }
                _ => RegistryError::StateConflict {
                    id,
                    actual: record.state,
                },
            },
            Err(e) => e,
        }
    }
}

#[async_trait]
impl UploadRegistry for PgUploadRegistry {
    async fn insert(&self, record: UploadRecord) -> RegistryResult<()> {
        // Use dynamic SQLx queries to avoid requiring DATABASE_URL/sqlx prepare
        let result = sqlx::query(
            r#"
            INSERT INTO upload_records (
                id, owner_id, target_kind, target_resource_id, declared_length,
                current_offset, metadata, state, created_at, updated_at, expires_at,
                final_resource_id
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(record.id)
        .bind(record.owner_id.as_str())
        .bind(record.target.as_str())
        .bind(record.target.resource_id())
        .bind(to_i64(record.declared_length)?)
        .bind(to_i64(record.current_offset)?)
        .bind(Json(&record.metadata))
        .bind(record.state.to_string())
        .bind(record.created_at)
        .bind(record.updated_at)
        .bind(record.expires_at)
        .bind(record.final_resource_id.as_deref())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(RegistryError::AlreadyExists(record.id));
        }
        Ok(())
    }

    async fn get(&self, id: Uuid) -> RegistryResult<Option<UploadRecord>> {
        let row = sqlx::query_as::<_, UploadRow>(&format!(
            "SELECT {} FROM upload_records WHERE id = $1",
            SELECT_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(UploadRecord::try_from).transpose()
    }

    async fn update_offset_and_state(
        &self,
        id: Uuid,
        expected: UploadState,
        update: OffsetUpdate,
    ) -> RegistryResult<UploadRecord> {
        let row = sqlx::query_as::<_, UploadRow>(&format!(
            r#"
            UPDATE upload_records
            SET current_offset = $3, state = $4, updated_at = $5, expires_at = $6
            WHERE id = $1
              AND state = $2
              AND current_offset <= $3
              AND $3 <= declared_length
            RETURNING {}
            "#,
            SELECT_COLUMNS
        ))
        .bind(id)
        .bind(expected.to_string())
        .bind(to_i64(update.offset)?)
        .bind(update.state.to_string())
        .bind(update.updated_at)
        .bind(update.expires_at)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => UploadRecord::try_from(row),
            None => Err(self.conflict(id, Some(update.offset)).await),
        }
    }

    async fn update_state(
        &self,
        id: Uuid,
        expected: &[UploadState],
        transition: StateTransition,
    ) -> RegistryResult<UploadRecord> {
        let expected: Vec<String> = expected.iter().map(|s| s.to_string()).collect();

        let row = sqlx::query_as::<_, UploadRow>(&format!(
            r#"
            UPDATE upload_records
            SET state = $3,
                updated_at = $4,
                final_resource_id = COALESCE($5, final_resource_id)
            WHERE id = $1 AND state = ANY($2)
            RETURNING {}
            "#,
            SELECT_COLUMNS
        ))
        .bind(id)
        .bind(&expected)
        .bind(transition.state.to_string())
        .bind(transition.updated_at)
        .bind(transition.final_resource_id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => UploadRecord::try_from(row),
            None => Err(self.conflict(id, None).await),
        }
    }

    async fn delete(&self, id: Uuid) -> RegistryResult<bool> {
        let result = sqlx::query("DELETE FROM upload_records WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_active_for_owner(&self, owner: &OwnerId) -> RegistryResult<Vec<UploadRecord>> {
        let rows = sqlx::query_as::<_, UploadRow>(&format!(
            r#"
            SELECT {} FROM upload_records
            WHERE owner_id = $1 AND state IN ('pending', 'uploading')
            ORDER BY created_at
            "#,
            SELECT_COLUMNS
        ))
        .bind(owner.as_str())
        .fetch_all(&self.pool)
        .await?;

        collect(rows)
    }

    async fn list_expired_before(&self, now: DateTime<Utc>) -> RegistryResult<Vec<UploadRecord>> {
        let rows = sqlx::query_as::<_, UploadRow>(&format!(
            r#"
            SELECT {} FROM upload_records
            WHERE state IN ('pending', 'uploading') AND expires_at < $1
            ORDER BY expires_at
            "#,
            SELECT_COLUMNS
        ))
        .bind(now)
        .fetch_all(&self.pool)
        .await?;

        collect(rows)
    }

    async fn list_active(&self) -> RegistryResult<Vec<UploadRecord>> {
        let rows = sqlx::query_as::<_, UploadRow>(&format!(
            "SELECT {} FROM upload_records WHERE state IN ('pending', 'uploading')",
            SELECT_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;

        collect(rows)
    }

    async fn list_terminal_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> RegistryResult<Vec<UploadRecord>> {
        let rows = sqlx::query_as::<_, UploadRow>(&format!(
            r#"
            SELECT {} FROM upload_records
            WHERE state IN ('completed', 'cancelled', 'expired') AND updated_at < $1
            "#,
            SELECT_COLUMNS
        ))
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;

        collect(rows)
    }
}
