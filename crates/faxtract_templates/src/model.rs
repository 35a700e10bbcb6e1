//! Template model.

use serde::{Deserialize, Serialize};

use faxtract_protocol::types::{TemplateId, TenantId};

/// One canonical field with its accepted aliases.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateField {
    pub canonical_name: String,
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(default)]
    pub required: bool,
}

/// An immutable field schema owned by one tenant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Template {
    pub template_id: TemplateId,
    pub tenant_id: TenantId,
    pub name: String,
    /// Ordered; canonical names are unique within a template.
    pub fields: Vec<TemplateField>,
}

impl Template {
    pub fn canonical_field_names(&self) -> Vec<String> {
        self.fields
            .iter()
            .map(|field| field.canonical_name.clone())
            .collect()
    }

    /// Resolve an extracted key to a canonical field, case- and
    /// punctuation-insensitively, through canonical names and aliases.
    pub fn resolve(&self, extracted_key: &str) -> Option<&TemplateField> {
        let needle = normalize_key(extracted_key);
        self.fields.iter().find(|field| {
            normalize_key(&field.canonical_name) == needle
                || field
                    .aliases
                    .iter()
                    .any(|alias| normalize_key(alias) == needle)
        })
    }
}

/// Fold a key for matching: lowercase, alphanumerics only.
pub fn normalize_key(key: &str) -> String {
    key.chars()
        .filter(|ch| ch.is_alphanumeric())
        .flat_map(|ch| ch.to_lowercase())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn template() -> Template {
        Template {
            template_id: TemplateId::new(),
            tenant_id: TenantId::new("t1"),
            name: "intake".to_string(),
            fields: vec![
                TemplateField {
                    canonical_name: "Patient Name".to_string(),
                    aliases: vec!["Name".to_string(), "Full Name".to_string()],
                    required: true,
                },
                TemplateField {
                    canonical_name: "DOB".to_string(),
                    aliases: vec!["Birth Date".to_string(), "Date of Birth".to_string()],
                    required: false,
                },
            ],
        }
    }

    #[test]
    fn normalize_folds_case_and_punctuation() {
        assert_eq!(normalize_key("Date of Birth"), "dateofbirth");
        assert_eq!(normalize_key("date_of-birth"), "dateofbirth");
        assert_eq!(normalize_key("D.O.B."), "dob");
    }

    #[test]
    fn resolve_matches_canonical_and_aliases() {
        let template = template();
        assert_eq!(
            template.resolve("patient name").unwrap().canonical_name,
            "Patient Name"
        );
        assert_eq!(template.resolve("Birth Date").unwrap().canonical_name, "DOB");
        assert_eq!(template.resolve("d.o.b").unwrap().canonical_name, "DOB");
        assert!(template.resolve("Policy").is_none());
    }
}
