//! Template registry over the record store and object store.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use thiserror::Error;
use tracing::info;

use faxtract_db::{DbError, FaxtractDb, TemplateRow};
use faxtract_protocol::paths;
use faxtract_protocol::types::{TemplateId, TenantId};
use faxtract_store::{ObjectStore, StoreError};

use crate::model::{Template, TemplateField};
use crate::parse::parse_template_fields;

#[derive(Error, Debug)]
pub enum TemplateError {
    #[error("template parse failed: {0}")]
    Parse(String),

    #[error("template not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Db(#[from] DbError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Parse, store, list, and serve field-schema templates.
///
/// Parsed templates are cached per id; the cache is invalidated on upload
/// and delete, never consulted for tombstoned templates.
pub struct TemplateRegistry {
    db: FaxtractDb,
    store: Arc<dyn ObjectStore>,
    cache: Mutex<HashMap<String, Arc<Template>>>,
}

impl TemplateRegistry {
    pub fn new(db: FaxtractDb, store: Arc<dyn ObjectStore>) -> Self {
        Self {
            db,
            store,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Parse and persist an uploaded template. The upload bytes are kept
    /// verbatim in the object store; the parsed schema goes to the record
    /// store. Templates are immutable after this point.
    pub async fn upload(
        &self,
        bytes: &[u8],
        tenant_id: &TenantId,
        name: &str,
    ) -> Result<Template, TemplateError> {
        let fields = parse_template_fields(bytes).map_err(TemplateError::Parse)?;

        let template_id = TemplateId::new();
        let object_key = paths::template_key(tenant_id, &template_id);
        self.store
            .put(&object_key, bytes, "application/vnd.ms-excel")
            .await?;

        let row = TemplateRow {
            template_id: template_id.clone(),
            tenant_id: tenant_id.clone(),
            name: name.to_string(),
            fields_json: serde_json::to_string(&fields).map_err(DbError::from)?,
            object_key,
            created_at: Utc::now(),
            deleted_at: None,
        };
        self.db.insert_template(&row).await?;

        let template = Template {
            template_id: template_id.clone(),
            tenant_id: tenant_id.clone(),
            name: name.to_string(),
            fields,
        };
        self.cache
            .lock()
            .expect("template cache lock poisoned")
            .insert(template_id.as_str().to_string(), Arc::new(template.clone()));

        info!(template_id = %template_id, tenant = %tenant_id, "template uploaded");
        Ok(template)
    }

    /// Fetch a live template for a tenant. Tombstoned or foreign-tenant
    /// templates read as missing.
    pub async fn get(
        &self,
        tenant_id: &TenantId,
        template_id: &TemplateId,
    ) -> Result<Arc<Template>, TemplateError> {
        if let Some(cached) = self
            .cache
            .lock()
            .expect("template cache lock poisoned")
            .get(template_id.as_str())
            .cloned()
        {
            if &cached.tenant_id == tenant_id {
                return Ok(cached);
            }
            return Err(TemplateError::NotFound(template_id.to_string()));
        }

        let row = self
            .db
            .get_template(template_id)
            .await?
            .filter(|row| row.deleted_at.is_none() && &row.tenant_id == tenant_id)
            .ok_or_else(|| TemplateError::NotFound(template_id.to_string()))?;

        let template = Arc::new(row_to_template(row)?);
        self.cache
            .lock()
            .expect("template cache lock poisoned")
            .insert(template_id.as_str().to_string(), Arc::clone(&template));
        Ok(template)
    }

    pub async fn list(&self, tenant_id: &TenantId) -> Result<Vec<Template>, TemplateError> {
        let rows = self.db.list_templates(tenant_id).await?;
        rows.into_iter().map(row_to_template).collect()
    }

    /// Tombstone a template. Records that referenced it keep their
    /// mapping; the stored upload bytes also stay in place.
    pub async fn delete(
        &self,
        tenant_id: &TenantId,
        template_id: &TemplateId,
    ) -> Result<(), TemplateError> {
        match self.db.tombstone_template(tenant_id, template_id).await {
            Ok(()) => {}
            Err(DbError::NotFound(msg)) => return Err(TemplateError::NotFound(msg)),
            Err(err) => return Err(err.into()),
        }
        self.cache
            .lock()
            .expect("template cache lock poisoned")
            .remove(template_id.as_str());
        info!(template_id = %template_id, tenant = %tenant_id, "template tombstoned");
        Ok(())
    }

    /// Raw upload bytes, for download.
    pub async fn download(
        &self,
        tenant_id: &TenantId,
        template_id: &TemplateId,
    ) -> Result<Vec<u8>, TemplateError> {
        let template = self.get(tenant_id, template_id).await?;
        let key = paths::template_key(tenant_id, &template.template_id);
        Ok(self.store.get(&key).await?)
    }
}

fn row_to_template(row: TemplateRow) -> Result<Template, TemplateError> {
    let fields: Vec<TemplateField> =
        serde_json::from_str(&row.fields_json).map_err(DbError::from)?;
    Ok(Template {
        template_id: row.template_id,
        tenant_id: row.tenant_id,
        name: row.name,
        fields,
    })
}
