//! The states table.

use chrono::Utc;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use grid_core::labels::Labels;
use grid_data::{
    DataError, LockInfo, LockOutcome, StateRecord, StateRepository, UnlockOutcome,
};

use crate::rows::map_err;

pub struct SqlxStateRepository {
    pool: PgPool,
}

impl SqlxStateRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const STATE_COLUMNS: &str =
    "guid, logic_id, content, labels, lock_info, lock_owner, created_at, updated_at";

fn state_from_row(row: &PgRow) -> Result<StateRecord, DataError> {
    let labels: serde_json::Value = row.try_get("labels").map_err(DataError::database)?;
    let labels: Labels =
        serde_json::from_value(labels).map_err(|e| DataError::Other(format!("states.labels: {e}")))?;

    let lock_info: Option<serde_json::Value> =
        row.try_get("lock_info").map_err(DataError::database)?;
    let lock_owner: Option<Uuid> = row.try_get("lock_owner").map_err(DataError::database)?;
    let lock = match lock_info {
        None => None,
        Some(value) => {
            let mut info: LockInfo = serde_json::from_value(value)
                .map_err(|e| DataError::Other(format!("states.lock_info: {e}")))?;
            info.owner_principal_id = lock_owner;
            Some(info)
        }
    };

    Ok(StateRecord {
        guid: row.try_get("guid").map_err(DataError::database)?,
        logic_id: row.try_get("logic_id").map_err(DataError::database)?,
        content: row.try_get("content").map_err(DataError::database)?,
        labels,
        lock,
        created_at: row.try_get("created_at").map_err(DataError::database)?,
        updated_at: row.try_get("updated_at").map_err(DataError::database)?,
    })
}

fn labels_json(labels: &Labels) -> Result<serde_json::Value, DataError> {
    serde_json::to_value(labels).map_err(|e| DataError::Other(format!("labels encode: {e}")))
}

#[async_trait::async_trait]
impl StateRepository for SqlxStateRepository {
    async fn create(&self, state: &StateRecord) -> Result<(), DataError> {
        sqlx::query(
            "INSERT INTO states (guid, logic_id, content, labels, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(state.guid)
        .bind(&state.logic_id)
        .bind(&state.content)
        .bind(labels_json(&state.labels)?)
        .bind(state.created_at)
        .bind(state.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| map_err(&format!("state '{}'", state.logic_id), e))?;
        Ok(())
    }

    async fn get(&self, guid: Uuid) -> Result<Option<StateRecord>, DataError> {
        let row = sqlx::query(&format!("SELECT {STATE_COLUMNS} FROM states WHERE guid = $1"))
            .bind(guid)
            .fetch_optional(&self.pool)
            .await
            .map_err(DataError::database)?;
        row.as_ref().map(state_from_row).transpose()
    }

    async fn get_by_logic_id(&self, logic_id: &str) -> Result<Option<StateRecord>, DataError> {
        let row = sqlx::query(&format!(
            "SELECT {STATE_COLUMNS} FROM states WHERE logic_id = $1"
        ))
        .bind(logic_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DataError::database)?;
        row.as_ref().map(state_from_row).transpose()
    }

    async fn list(&self) -> Result<Vec<StateRecord>, DataError> {
        let rows = sqlx::query(&format!(
            "SELECT {STATE_COLUMNS} FROM states ORDER BY logic_id"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(DataError::database)?;
        rows.iter().map(state_from_row).collect()
    }

    async fn update_content(&self, guid: Uuid, content: &[u8]) -> Result<(), DataError> {
        let result = sqlx::query(
            "UPDATE states SET content = $2, updated_at = $3 WHERE guid = $1",
        )
        .bind(guid)
        .bind(content)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(DataError::database)?;
        if result.rows_affected() == 0 {
            return Err(DataError::NotFound(format!("state {guid}")));
        }
        Ok(())
    }

    async fn update_labels(&self, guid: Uuid, labels: &Labels) -> Result<(), DataError> {
        let result = sqlx::query(
            "UPDATE states SET labels = $2, updated_at = $3 WHERE guid = $1",
        )
        .bind(guid)
        .bind(labels_json(labels)?)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(DataError::database)?;
        if result.rows_affected() == 0 {
            return Err(DataError::NotFound(format!("state {guid}")));
        }
        Ok(())
    }

    async fn try_lock(&self, guid: Uuid, lock: &LockInfo) -> Result<LockOutcome, DataError> {
        // Conditional UPDATE is the compare-and-set: only an unlocked row
        // takes the lock.
        let result = sqlx::query(
            "UPDATE states SET lock_info = $2, lock_owner = $3, updated_at = $4 \
             WHERE guid = $1 AND lock_info IS NULL",
        )
        .bind(guid)
        .bind(lock.wire_json())
        .bind(lock.owner_principal_id)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(DataError::database)?;
        if result.rows_affected() == 1 {
            return Ok(LockOutcome::Acquired);
        }

        match self.get(guid).await? {
            None => Err(DataError::NotFound(format!("state {guid}"))),
            Some(state) => match state.lock {
                Some(holder) => Ok(LockOutcome::Held(holder)),
                // The lock vanished between the update and the read;
                // report the holder-less conflict as a retryable miss.
                None => Err(DataError::Other(format!(
                    "lock on state {guid} changed concurrently"
                ))),
            },
        }
    }

    async fn unlock(&self, guid: Uuid, lock_id: &str) -> Result<UnlockOutcome, DataError> {
        let result = sqlx::query(
            "UPDATE states SET lock_info = NULL, lock_owner = NULL, updated_at = $3 \
             WHERE guid = $1 AND lock_info->>'ID' = $2",
        )
        .bind(guid)
        .bind(lock_id)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(DataError::database)?;
        if result.rows_affected() == 1 {
            return Ok(UnlockOutcome::Unlocked);
        }

        match self.get(guid).await? {
            None => Err(DataError::NotFound(format!("state {guid}"))),
            Some(state) => Ok(match state.lock {
                None => UnlockOutcome::NotLocked,
                Some(_) => UnlockOutcome::IdMismatch,
            }),
        }
    }

    async fn delete(&self, guid: Uuid) -> Result<bool, DataError> {
        let result = sqlx::query("DELETE FROM states WHERE guid = $1")
            .bind(guid)
            .execute(&self.pool)
            .await
            .map_err(DataError::database)?;
        Ok(result.rows_affected() == 1)
    }
}
