//! Template metadata rows. Uploads are immutable; deletion tombstones so
//! processed records keep valid references.

use faxtract_protocol::types::{TemplateId, TenantId};

use crate::error::{DbError, Result};
use crate::models::{row_to_template, TemplateRow};
use crate::FaxtractDb;

impl FaxtractDb {
    pub async fn insert_template(&self, template: &TemplateRow) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO fx_templates (template_id, tenant_id, name, fields, object_key, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(template.template_id.as_str())
        .bind(template.tenant_id.as_str())
        .bind(&template.name)
        .bind(&template.fields_json)
        .bind(&template.object_key)
        .bind(template.created_at.timestamp_millis())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Fetch a template, tombstoned or not. Callers that serve tenant
    /// requests should check `deleted_at`.
    pub async fn get_template(&self, template_id: &TemplateId) -> Result<Option<TemplateRow>> {
        let row = sqlx::query("SELECT * FROM fx_templates WHERE template_id = ?")
            .bind(template_id.as_str())
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => Ok(Some(row_to_template(&row)?)),
            None => Ok(None),
        }
    }

    /// Live templates for a tenant.
    pub async fn list_templates(&self, tenant_id: &TenantId) -> Result<Vec<TemplateRow>> {
        let rows = sqlx::query(
            "SELECT * FROM fx_templates WHERE tenant_id = ? AND deleted_at IS NULL ORDER BY created_at DESC",
        )
        .bind(tenant_id.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_template).collect()
    }

    /// Tombstone a template. Record references stay intact.
    pub async fn tombstone_template(
        &self,
        tenant_id: &TenantId,
        template_id: &TemplateId,
    ) -> Result<()> {
        let affected = sqlx::query(
            r#"
            UPDATE fx_templates
            SET deleted_at = ?
            WHERE template_id = ? AND tenant_id = ? AND deleted_at IS NULL
            "#,
        )
        .bind(Self::now_millis())
        .bind(template_id.as_str())
        .bind(tenant_id.as_str())
        .execute(&self.pool)
        .await?
        .rows_affected();

        if affected == 0 {
            return Err(DbError::not_found(format!("template {template_id}")));
        }
        Ok(())
    }
}
