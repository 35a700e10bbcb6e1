//! Tabular template parsing.
//!
//! Uploads are delimited tabular data. Layout heuristics:
//! - An optional header row is recognized when its cells look like column
//!   labels ("field", "canonical name", "alias", "required", ...).
//! - First column: canonical field name. A trailing `*` marks the field
//!   required when no explicit required column exists.
//! - Remaining columns: aliases. Cells may hold several aliases separated
//!   by `;`.
//! - A column labeled "required" in the header is read as a boolean
//!   ("yes"/"true"/"1").

use crate::model::TemplateField;

const HEADER_LABELS: &[&str] = &[
    "field",
    "fields",
    "name",
    "canonicalname",
    "canonicalfield",
    "fieldname",
    "alias",
    "aliases",
    "required",
    "synonyms",
];

/// Parse an uploaded template body into its field schema.
pub fn parse_template_fields(bytes: &[u8]) -> Result<Vec<TemplateField>, String> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(bytes);

    let mut rows: Vec<Vec<String>> = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|err| format!("unreadable template row: {err}"))?;
        let cells: Vec<String> = record.iter().map(|cell| cell.to_string()).collect();
        if cells.iter().all(|cell| cell.is_empty()) {
            continue;
        }
        rows.push(cells);
    }

    if rows.is_empty() {
        return Err("template has no rows".to_string());
    }

    let mut required_column = None;
    let mut data_start = 0;
    if looks_like_header(&rows[0]) {
        required_column = rows[0]
            .iter()
            .position(|cell| normalize(cell) == "required");
        data_start = 1;
    }

    let mut fields: Vec<TemplateField> = Vec::new();
    for row in &rows[data_start..] {
        let Some(first) = row.first() else {
            continue;
        };
        if first.is_empty() {
            continue;
        }

        let (canonical_name, starred) = match first.strip_suffix('*') {
            Some(stripped) => (stripped.trim().to_string(), true),
            None => (first.clone(), false),
        };

        let mut required = starred;
        let mut aliases = Vec::new();
        for (index, cell) in row.iter().enumerate().skip(1) {
            if Some(index) == required_column {
                required = parse_bool(cell);
                continue;
            }
            for alias in cell.split(';') {
                let alias = alias.trim();
                if !alias.is_empty() {
                    aliases.push(alias.to_string());
                }
            }
        }

        // Canonical names are unique within a template; later duplicates
        // contribute their aliases to the first occurrence.
        if let Some(existing) = fields
            .iter_mut()
            .find(|field| normalize(&field.canonical_name) == normalize(&canonical_name))
        {
            existing.aliases.extend(aliases);
            existing.required |= required;
            continue;
        }

        fields.push(TemplateField {
            canonical_name,
            aliases,
            required,
        });
    }

    if fields.is_empty() {
        return Err("template defines no fields".to_string());
    }
    Ok(fields)
}

fn looks_like_header(row: &[String]) -> bool {
    let recognized = row
        .iter()
        .filter(|cell| HEADER_LABELS.contains(&normalize(cell).as_str()))
        .count();
    recognized >= 1 && recognized * 2 >= row.iter().filter(|c| !c.is_empty()).count()
}

fn normalize(cell: &str) -> String {
    cell.chars()
        .filter(|ch| ch.is_alphanumeric())
        .flat_map(|ch| ch.to_lowercase())
        .collect()
}

fn parse_bool(cell: &str) -> bool {
    matches!(
        normalize(cell).as_str(),
        "yes" | "true" | "1" | "required" | "y"
    )
}
