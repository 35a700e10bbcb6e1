//! End-to-end pipeline scenarios against a tempdir object store, an
//! in-memory record store, and scripted capability providers.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use faxtract_db::FaxtractDb;
use faxtract_extract::mock::{ocr_result_with_lines, MockExtractor, MockOcr, OcrScript};
use faxtract_extract::{
    Extraction, FieldAnalysis, FieldStatus, Extractor, OcrProvider,
};
use faxtract_pipeline::{
    reanalyze_low_confidence, update_record_kv, Pipeline, PipelineContext, PipelineRequest,
    SourceCache,
};
use faxtract_protocol::config::PipelineConfig;
use faxtract_protocol::errors::ErrorKind;
use faxtract_protocol::types::{
    Classification, ConfidenceTier, ContentHash, Document, SupportedMime, TenantId,
};
use faxtract_store::{LocalObjectStore, ObjectStore};
use faxtract_templates::TemplateRegistry;

struct Harness {
    _dir: tempfile::TempDir,
    pipeline: Pipeline,
    store: Arc<LocalObjectStore>,
    db: FaxtractDb,
    templates: Arc<TemplateRegistry>,
}

async fn harness(ocr: Arc<dyn OcrProvider>, extractor: Arc<dyn Extractor>) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(LocalObjectStore::open(dir.path()).await.unwrap());
    let db = FaxtractDb::in_memory().await.unwrap();
    let templates = Arc::new(TemplateRegistry::new(db.clone(), store.clone()));
    let ctx = PipelineContext {
        db: db.clone(),
        store: store.clone(),
        ocr,
        extractor,
        templates: templates.clone(),
        source_cache: Arc::new(SourceCache::new(Duration::from_secs(600))),
        config: Arc::new(PipelineConfig::default()),
    };
    Harness {
        _dir: dir,
        pipeline: Pipeline::new(ctx),
        store,
        db,
        templates,
    }
}

fn extraction(fields: &[(&str, &str, f64)]) -> Extraction {
    Extraction {
        kv_pairs: fields
            .iter()
            .map(|(k, v, _)| (k.to_string(), v.to_string()))
            .collect(),
        kv_confidences: fields
            .iter()
            .map(|(k, _, c)| (k.to_string(), *c))
            .collect(),
        kv_spans: BTreeMap::new(),
        classification: Classification::Medical,
        summary: None,
    }
}

fn request(bytes: &[u8], filename: &str, tenant: &str) -> PipelineRequest {
    PipelineRequest {
        document: Document::new(bytes.to_vec(), filename, SupportedMime::Pdf),
        tenant_id: TenantId::new(tenant),
        template_id: None,
        staged: None,
    }
}

#[tokio::test]
async fn s1_fresh_high_confidence_document() {
    let ocr = Arc::new(MockOcr::returning(ocr_result_with_lines(&[
        ("REFERRAL", 0.98),
        ("Patient: John Doe", 0.98),
    ])));
    let extractor = Arc::new(MockExtractor::returning(extraction(&[
        ("Patient Name", "John Doe", 0.97),
        ("DOB", "1970-01-02", 0.97),
        ("Member ID", "M123", 0.97),
    ])));
    let h = harness(ocr, extractor).await;

    let outcome = h
        .pipeline
        .run(request(b"%PDF-1.4 referral", "referral.pdf", "t1"), None)
        .await
        .unwrap();

    assert!(!outcome.duplicate);
    let record = &outcome.record;
    assert!((record.overall_confidence - 0.975).abs() < 1e-9);
    assert_eq!(record.classification, Classification::Medical);
    assert!(record.source_path.starts_with("Above-95%/source/t1/"));
    assert!(record.processed_path.starts_with("Above-95%/processed/t1/"));
    assert!(record.processed_path.ends_with("_extracted_data.json"));

    // Identity: the hash resolves to exactly this record.
    let by_hash = h
        .db
        .find_by_hash(&ContentHash::of(b"%PDF-1.4 referral"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(by_hash.processing_id, record.processing_id);

    // Key parity.
    let kv_keys: Vec<_> = record.kv_pairs.keys().collect();
    let conf_keys: Vec<_> = record.kv_confidences.keys().collect();
    assert_eq!(kv_keys, conf_keys);

    // Both objects exist in the chosen tier.
    assert!(h.store.exists(&record.source_path).await.unwrap());
    assert!(h.store.exists(&record.processed_path).await.unwrap());

    // Null-field coverage: exactly one row, naming the absent fields.
    let null_record = h
        .db
        .get_null_field_record(&record.processing_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        null_record.null_field_names,
        vec!["Address", "Gender", "Insurance ID"]
    );

    // Fresh completions carry the cached source for re-analysis.
    assert!(outcome.source_b64.is_some());
    assert!(outcome.low_confidence_fields.is_empty());
}

#[tokio::test]
async fn s2_duplicate_submission_short_circuits() {
    let ocr = Arc::new(MockOcr::returning(ocr_result_with_lines(&[("x", 0.98)])));
    let extractor = Arc::new(MockExtractor::returning(extraction(&[(
        "Patient Name",
        "John Doe",
        0.97,
    )])));
    let h = harness(ocr, extractor).await;

    let first = h
        .pipeline
        .run(request(b"same bytes", "referral.pdf", "t1"), None)
        .await
        .unwrap();
    let objects_after_first = h.store.list("").await.unwrap().len();

    let second = h
        .pipeline
        .run(request(b"same bytes", "referral_copy.pdf", "t1"), None)
        .await
        .unwrap();

    assert!(second.duplicate);
    assert_eq!(second.record.processing_id, first.record.processing_id);
    // Filename of the original upload wins.
    assert_eq!(second.record.filename, "referral.pdf");
    assert_eq!(h.store.list("").await.unwrap().len(), objects_after_first);
    assert!(second.source_b64.is_none());
}

#[tokio::test]
async fn s3_low_ocr_confidence_routes_to_review() {
    let ocr = Arc::new(MockOcr::returning(ocr_result_with_lines(&[
        ("blurry line", 0.62),
    ])));
    let extractor = Arc::new(MockExtractor::returning(extraction(&[
        ("key1", "value1", 0.70),
        ("key2", "value2", 0.50),
    ])));
    let h = harness(ocr, extractor).await;

    let outcome = h
        .pipeline
        .run(request(b"blurred jpeg bytes", "blurred.jpg", "t1"), None)
        .await
        .unwrap();

    let record = &outcome.record;
    assert!((record.overall_confidence - 0.61).abs() < 1e-9);
    assert!(record.source_path.starts_with("needs-review/source/"));
    assert!(record.processed_path.starts_with("needs-review/processed/"));

    let mut low: Vec<&str> = outcome
        .low_confidence_fields
        .iter()
        .map(|f| f.name.as_str())
        .collect();
    low.sort_unstable();
    assert_eq!(low, vec!["key1", "key2"]);
}

#[tokio::test]
async fn s4_template_guided_extraction_maps_aliases() {
    let ocr = Arc::new(MockOcr::returning(ocr_result_with_lines(&[("doc", 0.97)])));
    let extractor = Arc::new(MockExtractor::returning(extraction(&[
        ("Name", "Jane Roe", 0.95),
        ("Birth Date", "1980-05-05", 0.95),
        ("Policy", "X7", 0.95),
    ])));
    let h = harness(ocr, extractor).await;

    let tenant = TenantId::new("t1");
    let template = h
        .templates
        .upload(
            b"Patient Name,Name\nDOB,Birth Date\nInsurance ID,Policy\n",
            &tenant,
            "intake",
        )
        .await
        .unwrap();

    let outcome = h
        .pipeline
        .run(
            PipelineRequest {
                document: Document::new(b"pdf body".to_vec(), "intake.pdf", SupportedMime::Pdf),
                tenant_id: tenant,
                template_id: Some(template.template_id.clone()),
                staged: None,
            },
            None,
        )
        .await
        .unwrap();

    let mapping = outcome.record.template_mapping.as_ref().unwrap();
    assert_eq!(mapping.mapped_values["Patient Name"], "Jane Roe");
    assert_eq!(mapping.mapped_values["DOB"], "1980-05-05");
    assert_eq!(mapping.mapped_values["Insurance ID"], "X7");
    assert!(mapping.unmapped_extracted_keys.is_empty());
    assert_eq!(
        outcome.record.template_id.as_ref(),
        Some(&template.template_id)
    );
}

#[tokio::test]
async fn s5_correction_crossing_threshold_relocates() {
    let ocr = Arc::new(MockOcr::returning(ocr_result_with_lines(&[("doc", 0.94)])));
    let extractor = Arc::new(MockExtractor::returning(extraction(&[
        ("Patient Name", "J. Doe", 0.88),
        ("Member ID", "M?", 0.88),
    ])));
    let h = harness(ocr, extractor).await;

    let outcome = h
        .pipeline
        .run(request(b"faint scan", "faint.pdf", "t1"), None)
        .await
        .unwrap();
    let record = outcome.record;
    assert!((record.overall_confidence - 0.91).abs() < 1e-9);
    assert_eq!(
        faxtract_protocol::paths::tier_of_key(&record.source_path),
        Some(ConfidenceTier::NeedsReview)
    );
    let old_source = record.source_path.clone();
    let old_processed = record.processed_path.clone();

    let mut corrections = BTreeMap::new();
    corrections.insert("Patient Name".to_string(), "John Doe".to_string());
    corrections.insert("Member ID".to_string(), "M123".to_string());
    let updated = update_record_kv(
        h.pipeline.context(),
        &record.processing_id,
        corrections,
        "reviewer@t1",
    )
    .await
    .unwrap();

    assert!((updated.overall_confidence - 0.97).abs() < 1e-9);
    assert!(updated.has_corrections);
    assert_eq!(updated.kv_confidences["Patient Name"], 1.0);
    assert_eq!(updated.kv_confidences["Member ID"], 1.0);
    assert!(updated.source_path.starts_with("Above-95%/"));
    assert!(updated.processed_path.starts_with("Above-95%/"));

    // Relocation law: old tier listings no longer contain the record.
    let review_listing = h.store.list("needs-review/").await.unwrap();
    assert!(review_listing.iter().all(|m| m.path != old_source));
    assert!(review_listing.iter().all(|m| m.path != old_processed));
    assert!(h.store.exists(&updated.source_path).await.unwrap());
    assert!(h.store.exists(&updated.processed_path).await.unwrap());
}

#[tokio::test]
async fn correction_rejects_unknown_fields() {
    let ocr = Arc::new(MockOcr::returning(ocr_result_with_lines(&[("doc", 0.9)])));
    let extractor = Arc::new(MockExtractor::returning(extraction(&[(
        "Patient Name",
        "John",
        0.8,
    )])));
    let h = harness(ocr, extractor).await;

    let outcome = h
        .pipeline
        .run(request(b"doc", "doc.pdf", "t1"), None)
        .await
        .unwrap();

    let mut corrections = BTreeMap::new();
    corrections.insert("Shoe Size".to_string(), "42".to_string());
    let err = update_record_kv(
        h.pipeline.context(),
        &outcome.record.processing_id,
        corrections,
        "reviewer@t1",
    )
    .await
    .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
}

#[tokio::test]
async fn extractor_failure_degrades_to_fallback_record() {
    let ocr = Arc::new(MockOcr::returning(ocr_result_with_lines(&[("doc", 0.9)])));
    let extractor = Arc::new(MockExtractor::broken("model deadline"));
    let h = harness(ocr, extractor).await;

    let outcome = h
        .pipeline
        .run(request(b"doc", "doc.pdf", "t1"), None)
        .await
        .unwrap();

    let record = &outcome.record;
    assert!(record.extract_fallback);
    assert!(record.kv_pairs.is_empty());
    assert_eq!(record.classification, Classification::Other);
    assert!((record.overall_confidence - record.ocr_confidence).abs() < 1e-9);
}

#[tokio::test]
async fn ocr_transient_failures_retry_then_succeed() {
    let ocr = Arc::new(MockOcr::scripted(
        vec![
            OcrScript::Transient("502".to_string()),
            OcrScript::Transient("503".to_string()),
        ],
        Some(ocr_result_with_lines(&[("recovered", 0.9)])),
    ));
    let ocr_probe = ocr.clone();
    let extractor = Arc::new(MockExtractor::returning(extraction(&[(
        "Patient Name",
        "John",
        0.9,
    )])));
    let h = harness(ocr, extractor).await;

    let outcome = h
        .pipeline
        .run(request(b"doc", "doc.pdf", "t1"), None)
        .await
        .unwrap();
    assert_eq!(outcome.record.raw_text.as_deref(), Some("recovered"));
    assert_eq!(ocr_probe.calls(), 3);
}

#[tokio::test]
async fn ocr_unavailable_fails_without_retry() {
    let ocr = Arc::new(MockOcr::scripted(
        vec![OcrScript::Unavailable("down for maintenance".to_string())],
        Some(ocr_result_with_lines(&[("never used", 0.9)])),
    ));
    let ocr_probe = ocr.clone();
    let extractor = Arc::new(MockExtractor::returning(Extraction::default()));
    let h = harness(ocr, extractor).await;

    let err = h
        .pipeline
        .run(request(b"doc", "doc.pdf", "t1"), None)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::OcrUnavailable);
    assert_eq!(ocr_probe.calls(), 1);
}

#[tokio::test]
async fn reanalysis_applies_incorrect_field_suggestions() {
    let ocr = Arc::new(MockOcr::returning(ocr_result_with_lines(&[("doc", 0.9)])));
    let extractor = Arc::new(
        MockExtractor::returning(extraction(&[
            ("Patient Name", "Jhn Doe", 0.6),
            ("Member ID", "M123", 0.99),
        ]))
        .with_analyses(vec![FieldAnalysis {
            field: "Patient Name".to_string(),
            status: FieldStatus::Incorrect,
            suggested_value: Some("John Doe".to_string()),
            issues: vec!["character confusion".to_string()],
            explanation: "The source clearly reads John.".to_string(),
        }]),
    );
    let h = harness(ocr, extractor).await;

    let outcome = h
        .pipeline
        .run(request(b"doc", "doc.pdf", "t1"), None)
        .await
        .unwrap();

    let analyses = reanalyze_low_confidence(
        h.pipeline.context(),
        &outcome.record.processing_id,
        true,
    )
    .await
    .unwrap();
    assert_eq!(analyses.len(), 1);
    assert_eq!(analyses[0].status, FieldStatus::Incorrect);

    let updated = h
        .db
        .get_record(&outcome.record.processing_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(updated.kv_pairs["Patient Name"], "John Doe");
    assert_eq!(updated.kv_confidences["Patient Name"], 1.0);
    assert!(updated.has_corrections);
    assert_eq!(
        updated.last_corrected_by.as_deref(),
        Some("low-confidence-reanalysis")
    );
}

#[tokio::test]
async fn reanalysis_with_no_low_confidence_fields_is_empty() {
    let ocr = Arc::new(MockOcr::returning(ocr_result_with_lines(&[("doc", 0.99)])));
    let extractor = Arc::new(MockExtractor::returning(extraction(&[(
        "Patient Name",
        "John Doe",
        0.99,
    )])));
    let h = harness(ocr, extractor).await;

    let outcome = h
        .pipeline
        .run(request(b"doc", "doc.pdf", "t1"), None)
        .await
        .unwrap();
    let analyses = reanalyze_low_confidence(
        h.pipeline.context(),
        &outcome.record.processing_id,
        false,
    )
    .await
    .unwrap();
    assert!(analyses.is_empty());
}

#[tokio::test]
async fn cross_tenant_same_bytes_is_a_conflict() {
    let ocr = Arc::new(MockOcr::returning(ocr_result_with_lines(&[("doc", 0.9)])));
    let extractor = Arc::new(MockExtractor::returning(extraction(&[(
        "Patient Name",
        "John",
        0.9,
    )])));
    let h = harness(ocr, extractor).await;

    h.pipeline
        .run(request(b"shared bytes", "a.pdf", "t1"), None)
        .await
        .unwrap();
    let err = h
        .pipeline
        .run(request(b"shared bytes", "b.pdf", "t2"), None)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Duplicate);
}
