//! Reconcile extracted keys onto a template's canonical fields.

use std::collections::BTreeMap;

use chrono::Utc;

use faxtract_protocol::types::TemplateMapping;

use crate::model::Template;

/// Map extracted key-values onto canonical fields.
///
/// Matching is case- and punctuation-insensitive and alias-aware. When
/// several extracted keys resolve to the same canonical field, the one
/// with higher confidence wins. Keys that resolve to nothing are listed
/// in `unmapped_extracted_keys`, sorted.
pub fn apply_template(
    template: &Template,
    kv_pairs: &BTreeMap<String, String>,
    kv_confidences: &BTreeMap<String, f64>,
) -> TemplateMapping {
    let mut mapped_values: BTreeMap<String, String> = BTreeMap::new();
    let mut field_confidences: BTreeMap<String, f64> = BTreeMap::new();
    let mut unmapped: Vec<String> = Vec::new();

    for (key, value) in kv_pairs {
        let confidence = kv_confidences.get(key).copied().unwrap_or(0.0);
        match template.resolve(key) {
            Some(field) => {
                let canonical = field.canonical_name.clone();
                let existing = field_confidences.get(&canonical).copied();
                if existing.map(|prev| confidence > prev).unwrap_or(true) {
                    mapped_values.insert(canonical.clone(), value.clone());
                    field_confidences.insert(canonical, confidence);
                }
            }
            None => unmapped.push(key.clone()),
        }
    }

    unmapped.sort();
    TemplateMapping {
        mapped_values,
        field_confidences,
        unmapped_extracted_keys: unmapped,
        processed_at: Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::TemplateField;
    use faxtract_protocol::types::{TemplateId, TenantId};

    fn template() -> Template {
        Template {
            template_id: TemplateId::new(),
            tenant_id: TenantId::new("t1"),
            name: "intake".to_string(),
            fields: vec![
                TemplateField {
                    canonical_name: "Patient Name".to_string(),
                    aliases: vec!["Name".to_string()],
                    required: true,
                },
                TemplateField {
                    canonical_name: "DOB".to_string(),
                    aliases: vec!["Birth Date".to_string()],
                    required: false,
                },
                TemplateField {
                    canonical_name: "Insurance ID".to_string(),
                    aliases: vec!["Policy".to_string()],
                    required: false,
                },
            ],
        }
    }

    #[test]
    fn aliases_resolve_to_canonical_fields() {
        let mut kv = BTreeMap::new();
        kv.insert("Name".to_string(), "Jane Roe".to_string());
        kv.insert("Birth Date".to_string(), "1980-05-05".to_string());
        kv.insert("Policy".to_string(), "X7".to_string());
        let mut conf = BTreeMap::new();
        conf.insert("Name".to_string(), 0.9);
        conf.insert("Birth Date".to_string(), 0.92);
        conf.insert("Policy".to_string(), 0.8);

        let mapping = apply_template(&template(), &kv, &conf);
        assert_eq!(mapping.mapped_values["Patient Name"], "Jane Roe");
        assert_eq!(mapping.mapped_values["DOB"], "1980-05-05");
        assert_eq!(mapping.mapped_values["Insurance ID"], "X7");
        assert!(mapping.unmapped_extracted_keys.is_empty());
    }

    #[test]
    fn collisions_break_toward_higher_confidence() {
        let mut kv = BTreeMap::new();
        kv.insert("Name".to_string(), "J. Roe".to_string());
        kv.insert("patient name".to_string(), "Jane Roe".to_string());
        let mut conf = BTreeMap::new();
        conf.insert("Name".to_string(), 0.6);
        conf.insert("patient name".to_string(), 0.95);

        let mapping = apply_template(&template(), &kv, &conf);
        assert_eq!(mapping.mapped_values["Patient Name"], "Jane Roe");
        assert_eq!(mapping.field_confidences["Patient Name"], 0.95);
    }

    #[test]
    fn unmatched_keys_are_reported_sorted() {
        let mut kv = BTreeMap::new();
        kv.insert("Zip".to_string(), "62704".to_string());
        kv.insert("Attending".to_string(), "Dr. Smith".to_string());
        let conf = BTreeMap::new();

        let mapping = apply_template(&template(), &kv, &conf);
        assert!(mapping.mapped_values.is_empty());
        assert_eq!(mapping.unmapped_extracted_keys, vec!["Attending", "Zip"]);
    }
}
