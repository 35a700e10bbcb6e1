//! Null-field telemetry rows.

use faxtract_protocol::types::{NullFieldRecord, ProcessingId, TenantId};

use crate::error::Result;
use crate::models::row_to_null_field_record;
use crate::FaxtractDb;

impl FaxtractDb {
    /// Record which required fields were missing on a completed record.
    ///
    /// The unique index on processing_id enforces exactly one row per
    /// record; a replayed pipeline run maps onto `DbError::Duplicate`.
    pub async fn insert_null_field_record(&self, record: &NullFieldRecord) -> Result<()> {
        let null_field_names = serde_json::to_string(&record.null_field_names)?;
        let all_extracted_fields = serde_json::to_string(&record.all_extracted_fields)?;

        sqlx::query(
            r#"
            INSERT INTO fx_null_field_records (
                processing_id, tenant_id, filename,
                null_field_names, all_extracted_fields, created_at
            )
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(record.processing_id.as_str())
        .bind(record.tenant_id.as_str())
        .bind(&record.filename)
        .bind(&null_field_names)
        .bind(&all_extracted_fields)
        .bind(record.created_at.timestamp_millis())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn get_null_field_record(
        &self,
        processing_id: &ProcessingId,
    ) -> Result<Option<NullFieldRecord>> {
        let row = sqlx::query("SELECT * FROM fx_null_field_records WHERE processing_id = ?")
            .bind(processing_id.as_str())
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => Ok(Some(row_to_null_field_record(&row)?)),
            None => Ok(None),
        }
    }

    pub async fn list_null_field_records(
        &self,
        tenant_id: &TenantId,
    ) -> Result<Vec<NullFieldRecord>> {
        let rows = sqlx::query(
            "SELECT * FROM fx_null_field_records WHERE tenant_id = ? ORDER BY created_at DESC",
        )
        .bind(tenant_id.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_null_field_record).collect()
    }
}
