//! Component-error to taxonomy conversions.
//!
//! The orchestrator only ever handles the declared kinds; these funnels
//! are the single place upstream errors become taxonomy entries.

use faxtract_db::DbError;
use faxtract_extract::{ExtractError, OcrError};
use faxtract_protocol::errors::PipelineError;
use faxtract_store::StoreError;
use faxtract_templates::TemplateError;

pub(crate) fn from_store(err: StoreError) -> PipelineError {
    match err {
        StoreError::NotFound(key) => PipelineError::NotFound(key),
        StoreError::InvalidKey(key) => PipelineError::internal(format!("invalid key: {key}")),
        err @ StoreError::Io(_) => PipelineError::StoreTransient(err.to_string()),
    }
}

pub(crate) fn from_db(err: DbError) -> PipelineError {
    match err {
        DbError::Duplicate(msg) => PipelineError::Duplicate(msg),
        DbError::NotFound(msg) => PipelineError::NotFound(msg),
        err @ DbError::Sqlx(_) => PipelineError::StoreTransient(err.to_string()),
        err => PipelineError::internal(err.to_string()),
    }
}

pub(crate) fn from_ocr(err: OcrError) -> PipelineError {
    match err {
        OcrError::Transient(msg) => PipelineError::OcrTransient(msg),
        OcrError::Unavailable(msg) => PipelineError::OcrUnavailable(msg),
    }
}

pub(crate) fn from_extract(err: ExtractError) -> PipelineError {
    PipelineError::ExtractFail(err.to_string())
}

pub(crate) fn from_template(err: TemplateError) -> PipelineError {
    match err {
        TemplateError::NotFound(msg) => PipelineError::NotFound(msg),
        TemplateError::Parse(msg) => PipelineError::Validation(msg),
        TemplateError::Db(err) => from_db(err),
        TemplateError::Store(err) => from_store(err),
    }
}
