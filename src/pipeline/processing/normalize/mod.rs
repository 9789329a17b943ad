use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

use crate::error::{EtlError, Result};

static SEPARATORS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[\s()\-/]").expect("separator pattern is valid"));

/// Canonicalize a raw column name into a warehouse-safe identifier.
///
/// Trims, lower-cases, then replaces whitespace and `( ) - /` with `_`.
/// Applying it to its own output is a no-op.
pub fn normalize_column_name(raw: &str) -> String {
    let lowered = raw.trim().to_lowercase();
    SEPARATORS.replace_all(&lowered, "_").into_owned()
}

/// Normalize a full header row, rejecting names that collapse onto each other.
///
/// Blank headers (unnamed export columns) normalize to `""` and never collide.
pub fn normalize_column_names<S: AsRef<str>>(raw_names: &[S]) -> Result<Vec<String>> {
    let mut seen: HashMap<String, &str> = HashMap::with_capacity(raw_names.len());
    let mut normalized = Vec::with_capacity(raw_names.len());

    for raw in raw_names {
        let raw = raw.as_ref();
        let name = normalize_column_name(raw);
        if name.is_empty() {
            debug!("Unnamed column at position {}", normalized.len());
            normalized.push(name);
            continue;
        }
        if let Some(previous) = seen.insert(name.clone(), raw) {
            return Err(EtlError::Schema(format!(
                "columns '{}' and '{}' both normalize to '{}'",
                previous, raw, name
            )));
        }
        if name != raw {
            debug!(raw = %raw, normalized = %name, "Renamed column");
        }
        normalized.push(name);
    }

    Ok(normalized)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_NAMES: [&str; 8] = [
        "COSMIC_ID",
        "GDSC Tissue descriptor 1",
        "Cancer Type (matching TCGA label)",
        "Microsatellite instability Status (MSI)",
        "  Screen Medium ",
        "LN-IC50/AUC",
        "Tab\tSeparated",
        "already_clean",
    ];

    #[test]
    fn test_replaces_separators_and_lowercases() {
        assert_eq!(normalize_column_name("COSMIC_ID"), "cosmic_id");
        assert_eq!(
            normalize_column_name("GDSC Tissue descriptor 1"),
            "gdsc_tissue_descriptor_1"
        );
        assert_eq!(
            normalize_column_name("Cancer Type (matching TCGA label)"),
            "cancer_type__matching_tcga_label_"
        );
        assert_eq!(normalize_column_name("  Screen Medium "), "screen_medium");
        assert_eq!(normalize_column_name("LN-IC50/AUC"), "ln_ic50_auc");
        assert_eq!(normalize_column_name("Tab\tSeparated"), "tab_separated");
    }

    #[test]
    fn test_normalization_is_idempotent() {
        for name in SAMPLE_NAMES {
            let once = normalize_column_name(name);
            assert_eq!(normalize_column_name(&once), once, "not idempotent for {:?}", name);
        }
    }

    #[test]
    fn test_collision_is_a_schema_error() {
        let err = normalize_column_names(&["Drug Name", "drug_name"]).unwrap_err();
        match err {
            EtlError::Schema(msg) => {
                assert!(msg.contains("Drug Name"));
                assert!(msg.contains("drug_name"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_blank_names_pass_through() {
        let names = normalize_column_names(&["id", "   ", ""]).unwrap();
        assert_eq!(names, vec!["id", "", ""]);
    }

    #[test]
    fn test_preserves_order() {
        let names = normalize_column_names(&SAMPLE_NAMES).unwrap();
        assert_eq!(names.len(), SAMPLE_NAMES.len());
        assert_eq!(names[0], "cosmic_id");
        assert_eq!(names[7], "already_clean");
    }
}
