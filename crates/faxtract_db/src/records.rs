//! Processed-record operations.

use sqlx::Row;
use tracing::info;

use faxtract_protocol::types::{ContentHash, ProcessedRecord, ProcessingId, TenantId};

use crate::error::{DbError, Result};
use crate::models::{row_to_record, RecordFilters};
use crate::FaxtractDb;

impl FaxtractDb {
    /// Insert a freshly completed record.
    ///
    /// Fails with `DbError::Duplicate` when the content hash already has a
    /// row; callers consult `find_by_hash` first and treat the race as
    /// resolved by the winner.
    pub async fn insert_record(&self, record: &ProcessedRecord) -> Result<()> {
        let kv_pairs = serde_json::to_string(&record.kv_pairs)?;
        let kv_confidences = serde_json::to_string(&record.kv_confidences)?;
        let positioning_data = record
            .positioning_data
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let template_mapping = record
            .template_mapping
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        sqlx::query(
            r#"
            INSERT INTO fx_processed_records (
                processing_id, content_hash, tenant_id, filename,
                source_path, processed_path, kv_pairs, kv_confidences,
                ocr_confidence, overall_confidence, classification,
                raw_text, positioning_data, template_id, template_mapping,
                extract_fallback, has_corrections, last_corrected_by,
                last_corrected_at, created_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(record.processing_id.as_str())
        .bind(record.content_hash.as_str())
        .bind(record.tenant_id.as_str())
        .bind(&record.filename)
        .bind(&record.source_path)
        .bind(&record.processed_path)
        .bind(&kv_pairs)
        .bind(&kv_confidences)
        .bind(record.ocr_confidence)
        .bind(record.overall_confidence)
        .bind(record.classification.as_str())
        .bind(&record.raw_text)
        .bind(&positioning_data)
        .bind(record.template_id.as_ref().map(|id| id.as_str().to_string()))
        .bind(&template_mapping)
        .bind(record.extract_fallback as i64)
        .bind(record.has_corrections as i64)
        .bind(&record.last_corrected_by)
        .bind(record.last_corrected_at.map(|ts| ts.timestamp_millis()))
        .bind(record.created_at.timestamp_millis())
        .bind(record.updated_at.timestamp_millis())
        .execute(&self.pool)
        .await?;

        info!(
            processing_id = %record.processing_id,
            tenant = %record.tenant_id,
            "record inserted"
        );
        Ok(())
    }

    /// O(1) lookup through the unique content-hash index.
    pub async fn find_by_hash(&self, hash: &ContentHash) -> Result<Option<ProcessedRecord>> {
        let row = sqlx::query("SELECT * FROM fx_processed_records WHERE content_hash = ?")
            .bind(hash.as_str())
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => Ok(Some(row_to_record(&row)?)),
            None => Ok(None),
        }
    }

    pub async fn get_record(&self, processing_id: &ProcessingId) -> Result<Option<ProcessedRecord>> {
        let row = sqlx::query("SELECT * FROM fx_processed_records WHERE processing_id = ?")
            .bind(processing_id.as_str())
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => Ok(Some(row_to_record(&row)?)),
            None => Ok(None),
        }
    }

    /// Tenant-scoped listing, newest first.
    pub async fn list_records(
        &self,
        tenant_id: &TenantId,
        filters: &RecordFilters,
    ) -> Result<Vec<ProcessedRecord>> {
        let mut sql = String::from("SELECT * FROM fx_processed_records WHERE tenant_id = ?");
        if filters.classification.is_some() {
            sql.push_str(" AND classification = ?");
        }
        if filters.tier.is_some() {
            sql.push_str(" AND source_path LIKE ?");
        }
        if filters.corrected.is_some() {
            sql.push_str(" AND has_corrections = ?");
        }
        if filters.created_after.is_some() {
            sql.push_str(" AND created_at >= ?");
        }
        if filters.created_before.is_some() {
            sql.push_str(" AND created_at <= ?");
        }
        sql.push_str(" ORDER BY created_at DESC");
        if filters.limit.is_some() {
            sql.push_str(" LIMIT ?");
        }

        let mut query = sqlx::query(&sql).bind(tenant_id.as_str());
        if let Some(classification) = filters.classification {
            query = query.bind(classification.as_str());
        }
        if let Some(tier) = filters.tier {
            query = query.bind(format!("{}/%", tier.as_str()));
        }
        if let Some(corrected) = filters.corrected {
            query = query.bind(corrected as i64);
        }
        if let Some(after) = filters.created_after {
            query = query.bind(after);
        }
        if let Some(before) = filters.created_before {
            query = query.bind(before);
        }
        if let Some(limit) = filters.limit {
            query = query.bind(limit);
        }

        let rows = query.fetch_all(&self.pool).await?;
        rows.iter().map(row_to_record).collect()
    }

    /// Stamp a correction onto a record: merged kv state, confidences,
    /// recomputed overall confidence, audit fields, and (already relocated)
    /// object paths, in one update.
    #[allow(clippy::too_many_arguments)]
    pub async fn apply_correction(
        &self,
        processing_id: &ProcessingId,
        kv_pairs_json: &str,
        kv_confidences_json: &str,
        overall_confidence: f64,
        actor: &str,
        source_path: &str,
        processed_path: &str,
    ) -> Result<()> {
        let now = Self::now_millis();
        let affected = sqlx::query(
            r#"
            UPDATE fx_processed_records
            SET kv_pairs = ?,
                kv_confidences = ?,
                overall_confidence = ?,
                has_corrections = 1,
                last_corrected_by = ?,
                last_corrected_at = ?,
                source_path = ?,
                processed_path = ?,
                updated_at = ?
            WHERE processing_id = ?
            "#,
        )
        .bind(kv_pairs_json)
        .bind(kv_confidences_json)
        .bind(overall_confidence)
        .bind(actor)
        .bind(now)
        .bind(source_path)
        .bind(processed_path)
        .bind(now)
        .bind(processing_id.as_str())
        .execute(&self.pool)
        .await?
        .rows_affected();

        if affected == 0 {
            return Err(DbError::not_found(format!(
                "record {processing_id} for correction"
            )));
        }
        info!(processing_id = %processing_id, actor, "correction applied");
        Ok(())
    }

    /// Patch only the object paths after a relocation.
    pub async fn update_record_paths(
        &self,
        processing_id: &ProcessingId,
        source_path: &str,
        processed_path: &str,
    ) -> Result<()> {
        let affected = sqlx::query(
            r#"
            UPDATE fx_processed_records
            SET source_path = ?, processed_path = ?, updated_at = ?
            WHERE processing_id = ?
            "#,
        )
        .bind(source_path)
        .bind(processed_path)
        .bind(Self::now_millis())
        .bind(processing_id.as_str())
        .execute(&self.pool)
        .await?
        .rows_affected();

        if affected == 0 {
            return Err(DbError::not_found(format!("record {processing_id}")));
        }
        Ok(())
    }

    /// All content hashes known to the store. Used by the sweeper filter.
    pub async fn known_content_hashes(&self) -> Result<std::collections::HashSet<String>> {
        let rows = sqlx::query("SELECT content_hash FROM fx_processed_records")
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|row| row.try_get::<String, _>("content_hash").map_err(DbError::from))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use faxtract_protocol::types::Classification;
    use std::collections::BTreeMap;

    fn sample_record(hash: &str, tenant: &str) -> ProcessedRecord {
        let now = Utc::now();
        let mut kv = BTreeMap::new();
        kv.insert("Patient Name".to_string(), "John Doe".to_string());
        let mut confs = BTreeMap::new();
        confs.insert("Patient Name".to_string(), 0.97);

        ProcessedRecord {
            processing_id: ProcessingId::from_string(format!("{hash}-1")),
            content_hash: ContentHash::from_hex(hash),
            tenant_id: TenantId::new(tenant),
            filename: "referral.pdf".to_string(),
            source_path: "Above-95%/source/t1/x/referral.pdf_1".to_string(),
            processed_path: "Above-95%/processed/t1/x/1_referral.pdf_extracted_data.json"
                .to_string(),
            kv_pairs: kv,
            kv_confidences: confs,
            ocr_confidence: 0.98,
            overall_confidence: 0.975,
            classification: Classification::Medical,
            raw_text: Some("text".to_string()),
            positioning_data: None,
            template_id: None,
            template_mapping: None,
            extract_fallback: false,
            has_corrections: false,
            last_corrected_by: None,
            last_corrected_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn insert_and_find_by_hash() {
        let db = FaxtractDb::in_memory().await.unwrap();
        let record = sample_record("aaa", "t1");
        db.insert_record(&record).await.unwrap();

        let found = db
            .find_by_hash(&ContentHash::from_hex("aaa"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.processing_id, record.processing_id);
        assert_eq!(found.kv_pairs["Patient Name"], "John Doe");
        assert_eq!(found.classification, Classification::Medical);
    }

    #[tokio::test]
    async fn duplicate_hash_is_rejected() {
        let db = FaxtractDb::in_memory().await.unwrap();
        db.insert_record(&sample_record("bbb", "t1")).await.unwrap();

        let mut second = sample_record("bbb", "t1");
        second.processing_id = ProcessingId::from_string("bbb-2");
        let err = db.insert_record(&second).await.unwrap_err();
        assert!(matches!(err, DbError::Duplicate(_)));
    }

    #[tokio::test]
    async fn listing_is_tenant_scoped_and_filtered() {
        let db = FaxtractDb::in_memory().await.unwrap();
        db.insert_record(&sample_record("c1", "t1")).await.unwrap();
        db.insert_record(&sample_record("c2", "t2")).await.unwrap();

        let records = db
            .list_records(&TenantId::new("t1"), &RecordFilters::default())
            .await
            .unwrap();
        assert_eq!(records.len(), 1);

        let filtered = db
            .list_records(
                &TenantId::new("t1"),
                &RecordFilters {
                    classification: Some(Classification::Invoice),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert!(filtered.is_empty());
    }

    #[tokio::test]
    async fn correction_stamps_audit_fields() {
        let db = FaxtractDb::in_memory().await.unwrap();
        let record = sample_record("ddd", "t1");
        db.insert_record(&record).await.unwrap();

        db.apply_correction(
            &record.processing_id,
            r#"{"Patient Name":"Jane Doe"}"#,
            r#"{"Patient Name":1.0}"#,
            0.99,
            "reviewer@t1",
            "Above-95%/source/t1/x/referral.pdf_1",
            "Above-95%/processed/t1/x/1_referral.pdf_extracted_data.json",
        )
        .await
        .unwrap();

        let updated = db.get_record(&record.processing_id).await.unwrap().unwrap();
        assert!(updated.has_corrections);
        assert_eq!(updated.last_corrected_by.as_deref(), Some("reviewer@t1"));
        assert_eq!(updated.kv_confidences["Patient Name"], 1.0);
        assert_eq!(updated.overall_confidence, 0.99);
        assert!(updated.updated_at >= updated.created_at);
    }
}
