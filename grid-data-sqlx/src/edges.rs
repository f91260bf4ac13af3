//! The edges and state_outputs tables.

use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use grid_data::{
    DataError, DependencyEdge, EdgeRepository, StateOutput, StateOutputRepository,
};

use crate::rows::{
    edge_status_from, map_err, schema_source_from, schema_source_to, validation_status_from,
    validation_status_to,
};

pub struct SqlxEdgeRepository {
    pool: PgPool,
}

impl SqlxEdgeRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const EDGE_COLUMNS: &str = "id, from_state, from_output, to_state, to_input_name, status, \
     in_digest, out_digest, mock_value, last_in_at, last_out_at, created_at, updated_at";

fn edge_from_row(row: &PgRow) -> Result<DependencyEdge, DataError> {
    let status: String = row.try_get("status").map_err(DataError::database)?;
    Ok(DependencyEdge {
        id: row.try_get("id").map_err(DataError::database)?,
        from_state: row.try_get("from_state").map_err(DataError::database)?,
        from_output: row.try_get("from_output").map_err(DataError::database)?,
        to_state: row.try_get("to_state").map_err(DataError::database)?,
        to_input_name: row.try_get("to_input_name").map_err(DataError::database)?,
        status: edge_status_from(&status)?,
        in_digest: row.try_get("in_digest").map_err(DataError::database)?,
        out_digest: row.try_get("out_digest").map_err(DataError::database)?,
        mock_value: row.try_get("mock_value").map_err(DataError::database)?,
        last_in_at: row.try_get("last_in_at").map_err(DataError::database)?,
        last_out_at: row.try_get("last_out_at").map_err(DataError::database)?,
        created_at: row.try_get("created_at").map_err(DataError::database)?,
        updated_at: row.try_get("updated_at").map_err(DataError::database)?,
    })
}

#[async_trait::async_trait]
impl EdgeRepository for SqlxEdgeRepository {
    async fn insert(&self, edge: &DependencyEdge) -> Result<(), DataError> {
        sqlx::query(
            "INSERT INTO edges (id, from_state, from_output, to_state, to_input_name, status, \
             in_digest, out_digest, mock_value, last_in_at, last_out_at, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)",
        )
        .bind(edge.id)
        .bind(edge.from_state)
        .bind(&edge.from_output)
        .bind(edge.to_state)
        .bind(&edge.to_input_name)
        .bind(edge.status.as_str())
        .bind(&edge.in_digest)
        .bind(&edge.out_digest)
        .bind(&edge.mock_value)
        .bind(edge.last_in_at)
        .bind(edge.last_out_at)
        .bind(edge.created_at)
        .bind(edge.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            map_err(
                &format!(
                    "edge {} -[{}]-> {}",
                    edge.from_state, edge.from_output, edge.to_state
                ),
                e,
            )
        })?;
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<DependencyEdge>, DataError> {
        let row = sqlx::query(&format!("SELECT {EDGE_COLUMNS} FROM edges WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(DataError::database)?;
        row.as_ref().map(edge_from_row).transpose()
    }

    async fn find(
        &self,
        from: Uuid,
        from_output: &str,
        to: Uuid,
    ) -> Result<Option<DependencyEdge>, DataError> {
        let row = sqlx::query(&format!(
            "SELECT {EDGE_COLUMNS} FROM edges \
             WHERE from_state = $1 AND from_output = $2 AND to_state = $3"
        ))
        .bind(from)
        .bind(from_output)
        .bind(to)
        .fetch_optional(&self.pool)
        .await
        .map_err(DataError::database)?;
        row.as_ref().map(edge_from_row).transpose()
    }

    async fn list_incoming(&self, to: Uuid) -> Result<Vec<DependencyEdge>, DataError> {
        let rows = sqlx::query(&format!(
            "SELECT {EDGE_COLUMNS} FROM edges WHERE to_state = $1 ORDER BY created_at"
        ))
        .bind(to)
        .fetch_all(&self.pool)
        .await
        .map_err(DataError::database)?;
        rows.iter().map(edge_from_row).collect()
    }

    async fn list_outgoing(&self, from: Uuid) -> Result<Vec<DependencyEdge>, DataError> {
        let rows = sqlx::query(&format!(
            "SELECT {EDGE_COLUMNS} FROM edges WHERE from_state = $1 ORDER BY created_at"
        ))
        .bind(from)
        .fetch_all(&self.pool)
        .await
        .map_err(DataError::database)?;
        rows.iter().map(edge_from_row).collect()
    }

    async fn list_all(&self) -> Result<Vec<DependencyEdge>, DataError> {
        let rows = sqlx::query(&format!(
            "SELECT {EDGE_COLUMNS} FROM edges ORDER BY created_at"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(DataError::database)?;
        rows.iter().map(edge_from_row).collect()
    }

    async fn search_by_output(&self, output_key: &str) -> Result<Vec<DependencyEdge>, DataError> {
        let rows = sqlx::query(&format!(
            "SELECT {EDGE_COLUMNS} FROM edges WHERE from_output = $1 ORDER BY created_at"
        ))
        .bind(output_key)
        .fetch_all(&self.pool)
        .await
        .map_err(DataError::database)?;
        rows.iter().map(edge_from_row).collect()
    }

    async fn update(&self, edge: &DependencyEdge) -> Result<(), DataError> {
        let result = sqlx::query(
            "UPDATE edges SET status = $2, in_digest = $3, out_digest = $4, mock_value = $5, \
             last_in_at = $6, last_out_at = $7, updated_at = $8 WHERE id = $1",
        )
        .bind(edge.id)
        .bind(edge.status.as_str())
        .bind(&edge.in_digest)
        .bind(&edge.out_digest)
        .bind(&edge.mock_value)
        .bind(edge.last_in_at)
        .bind(edge.last_out_at)
        .bind(edge.updated_at)
        .execute(&self.pool)
        .await
        .map_err(DataError::database)?;
        if result.rows_affected() == 0 {
            return Err(DataError::NotFound(format!("edge {}", edge.id)));
        }
        Ok(())
    }

    async fn delete(&self, id: Uuid) -> Result<bool, DataError> {
        let result = sqlx::query("DELETE FROM edges WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(DataError::database)?;
        Ok(result.rows_affected() == 1)
    }

    async fn count_for_state(&self, guid: Uuid) -> Result<u64, DataError> {
        let (count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM edges WHERE from_state = $1 OR to_state = $1",
        )
        .bind(guid)
        .fetch_one(&self.pool)
        .await
        .map_err(DataError::database)?;
        Ok(count as u64)
    }
}

pub struct SqlxStateOutputRepository {
    pool: PgPool,
}

impl SqlxStateOutputRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const OUTPUT_COLUMNS: &str = "state_guid, output_key, sensitive, state_serial, schema, \
     schema_source, validation_status, last_validated_at";

fn output_from_row(row: &PgRow) -> Result<StateOutput, DataError> {
    let schema_source: String = row.try_get("schema_source").map_err(DataError::database)?;
    let validation_status: String =
        row.try_get("validation_status").map_err(DataError::database)?;
    Ok(StateOutput {
        state_guid: row.try_get("state_guid").map_err(DataError::database)?,
        output_key: row.try_get("output_key").map_err(DataError::database)?,
        sensitive: row.try_get("sensitive").map_err(DataError::database)?,
        state_serial: row.try_get("state_serial").map_err(DataError::database)?,
        schema: row.try_get("schema").map_err(DataError::database)?,
        schema_source: schema_source_from(&schema_source)?,
        validation_status: validation_status_from(&validation_status)?,
        last_validated_at: row.try_get("last_validated_at").map_err(DataError::database)?,
    })
}

#[async_trait::async_trait]
impl StateOutputRepository for SqlxStateOutputRepository {
    async fn upsert(&self, output: &StateOutput) -> Result<(), DataError> {
        sqlx::query(
            "INSERT INTO state_outputs (state_guid, output_key, sensitive, state_serial, \
             schema, schema_source, validation_status, last_validated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
             ON CONFLICT (state_guid, output_key) DO UPDATE SET \
             sensitive = EXCLUDED.sensitive, state_serial = EXCLUDED.state_serial, \
             schema = EXCLUDED.schema, schema_source = EXCLUDED.schema_source, \
             validation_status = EXCLUDED.validation_status, \
             last_validated_at = EXCLUDED.last_validated_at",
        )
        .bind(output.state_guid)
        .bind(&output.output_key)
        .bind(output.sensitive)
        .bind(output.state_serial)
        .bind(&output.schema)
        .bind(schema_source_to(output.schema_source))
        .bind(validation_status_to(output.validation_status))
        .bind(output.last_validated_at)
        .execute(&self.pool)
        .await
        .map_err(DataError::database)?;
        Ok(())
    }

    async fn get(&self, state: Uuid, key: &str) -> Result<Option<StateOutput>, DataError> {
        let row = sqlx::query(&format!(
            "SELECT {OUTPUT_COLUMNS} FROM state_outputs \
             WHERE state_guid = $1 AND output_key = $2"
        ))
        .bind(state)
        .bind(key)
        .fetch_optional(&self.pool)
        .await
        .map_err(DataError::database)?;
        row.as_ref().map(output_from_row).transpose()
    }

    async fn list_for_state(&self, state: Uuid) -> Result<Vec<StateOutput>, DataError> {
        let rows = sqlx::query(&format!(
            "SELECT {OUTPUT_COLUMNS} FROM state_outputs \
             WHERE state_guid = $1 ORDER BY output_key"
        ))
        .bind(state)
        .fetch_all(&self.pool)
        .await
        .map_err(DataError::database)?;
        rows.iter().map(output_from_row).collect()
    }

    async fn delete(&self, state: Uuid, key: &str) -> Result<bool, DataError> {
        let result =
            sqlx::query("DELETE FROM state_outputs WHERE state_guid = $1 AND output_key = $2")
                .bind(state)
                .bind(key)
                .execute(&self.pool)
                .await
                .map_err(DataError::database)?;
        Ok(result.rows_affected() == 1)
    }
}
