//! Config validation: unknown-key detection with Levenshtein suggestions,
//! non-finite number sweeps and operating-range sanity checks.
//!
//! Unknown keys are found by parsing the raw TOML into `toml::Value`,
//! walking the key tree and comparing against the known field names. The
//! resulting warnings never break an otherwise valid config.

use std::collections::HashSet;

use crate::types::FEATURE_NAMES;

/// A non-fatal config warning (typo, suspicious value).
#[derive(Debug, Clone)]
pub struct ValidationWarning {
    pub field: String,
    pub message: String,
    pub suggestion: Option<String>,
}

impl std::fmt::Display for ValidationWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)?;
        if let Some(ref s) = self.suggestion {
            write!(f, " (did you mean '{s}'?)")?;
        }
        Ok(())
    }
}

// ============================================================================
// Known Config Keys
// ============================================================================

const STATIC_KEYS: &[&str] = &[
    // [machine]
    "machine",
    "machine.id",
    "machine.name",
    // [telemetry]
    "telemetry",
    "telemetry.source",
    "telemetry.collection_interval_secs",
    "telemetry.influx",
    "telemetry.influx.url",
    "telemetry.influx.org",
    "telemetry.influx.bucket",
    "telemetry.influx.measurement",
    "telemetry.influx.token",
    "telemetry.influx.min_range_minutes",
    "telemetry.influx.timeout_secs",
    "telemetry.csv",
    "telemetry.csv.path",
    "telemetry.csv.initial_batch",
    "telemetry.csv.emit_interval_secs",
    // [inference]
    "inference",
    "inference.interval_secs",
    "inference.context_length",
    "inference.prediction_length",
    "inference.buffer_margin",
    // [conditioning]
    "conditioning",
    "conditioning.filter_cutoff",
    "conditioning.filter_order",
    "conditioning.scaler_path",
    // [postprocess]
    "postprocess",
    "postprocess.outlier_z_threshold",
    "postprocess.preserve_leading",
    "postprocess.context_fraction",
    "postprocess.rescale_method",
    // [anomaly]
    "anomaly",
    "anomaly.critical_percentage",
    "anomaly.limits",
    // [oracle]
    "oracle",
    "oracle.kind",
    "oracle.endpoint",
    "oracle.model_path",
    "oracle.timeout_secs",
    // [notification]
    "notification",
    "notification.webhook_url",
    "notification.timeout_secs",
    // [server]
    "server",
    "server.addr",
];

/// Returns the complete set of valid dotted key paths for `MachineConfig`.
///
/// Maintained by hand to match the struct hierarchy in `machine_config.rs`;
/// per-feature limit keys are generated from the feature names.
pub fn known_config_keys() -> HashSet<String> {
    let mut keys: HashSet<String> = STATIC_KEYS.iter().map(|k| (*k).to_string()).collect();
    for name in FEATURE_NAMES {
        keys.insert(format!("anomaly.limits.{name}"));
        keys.insert(format!("anomaly.limits.{name}.min"));
        keys.insert(format!("anomaly.limits.{name}.max"));
    }
    keys
}

// ============================================================================
// TOML Tree Walking
// ============================================================================

/// Recursively walks a `toml::Value` tree and collects all dotted key paths.
///
/// For example, a table `{ a = { b = 1, c = 2 } }` yields:
/// `["a", "a.b", "a.c"]`
pub fn walk_toml_keys(value: &toml::Value, prefix: &str) -> Vec<String> {
    let mut keys = Vec::new();
    if let Some(table) = value.as_table() {
        for (k, v) in table {
            let path = join_key(prefix, k);
            keys.push(path.clone());
            if v.is_table() {
                keys.extend(walk_toml_keys(v, &path));
            }
        }
    }
    keys
}

/// Dotted paths of every float in the tree that is NaN or infinite.
pub fn non_finite_keys(value: &toml::Value, prefix: &str) -> Vec<String> {
    let mut bad = Vec::new();
    match value {
        toml::Value::Float(f) if !f.is_finite() => bad.push(prefix.to_string()),
        toml::Value::Table(table) => {
            for (k, v) in table {
                bad.extend(non_finite_keys(v, &join_key(prefix, k)));
            }
        }
        toml::Value::Array(items) => {
            for (i, v) in items.iter().enumerate() {
                bad.extend(non_finite_keys(v, &format!("{prefix}[{i}]")));
            }
        }
        _ => {}
    }
    bad
}

fn join_key(prefix: &str, key: &str) -> String {
    if prefix.is_empty() {
        key.to_string()
    } else {
        format!("{prefix}.{key}")
    }
}

// ============================================================================
// Levenshtein Distance
// ============================================================================

/// Compute the Levenshtein edit distance between two strings.
fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0; b.len() + 1];

    for (i, ca) in a.iter().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let cost = usize::from(ca != cb);
            curr[j + 1] = (prev[j + 1] + 1).min(curr[j] + 1).min(prev[j] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[b.len()]
}

/// Suggest the closest known key for an unknown key, if within edit distance 3.
///
/// Ties resolve to the lexicographically smallest key so suggestions are stable.
pub fn suggest_correction(unknown: &str, known: &HashSet<String>) -> Option<String> {
    known
        .iter()
        .map(|k| (levenshtein(unknown, k), k))
        .filter(|(dist, _)| *dist <= 3)
        .min()
        .map(|(_, k)| k.clone())
}

// ============================================================================
// Unknown Key Validation (entry point)
// ============================================================================

/// Parse a raw TOML string and return warnings for any unknown config keys.
///
/// This does NOT fail on unknown keys; it only warns.
pub fn validate_unknown_keys(raw_toml: &str) -> Vec<ValidationWarning> {
    let Ok(value) = raw_toml.parse::<toml::Value>() else {
        return Vec::new(); // parse errors are reported by serde later
    };

    let known = known_config_keys();
    walk_toml_keys(&value, "")
        .into_iter()
        .filter(|key| !known.contains(key))
        .map(|key| ValidationWarning {
            suggestion: suggest_correction(&key, &known),
            message: format!("Unknown config key '{key}'"),
            field: key,
        })
        .collect()
}

// ============================================================================
// Operating Range Checks
// ============================================================================

/// Suspicious but legal combinations of scheduling and scoring values.
pub fn validate_operating_ranges(config: &super::MachineConfig) -> Vec<ValidationWarning> {
    let mut warnings = Vec::new();
    let inf = &config.inference;

    if config.telemetry.collection_interval_secs >= inf.interval_secs {
        warnings.push(ValidationWarning {
            field: "telemetry.collection_interval_secs".to_string(),
            message: format!(
                "collection_interval_secs ({}) is not shorter than inference.interval_secs ({}); \
                 cycles may reuse the same window",
                config.telemetry.collection_interval_secs, inf.interval_secs
            ),
            suggestion: None,
        });
    }

    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let reference_rows = (inf.context_length as f64 * config.postprocess.context_fraction) as usize;
    if reference_rows < 2 {
        warnings.push(ValidationWarning {
            field: "postprocess.context_fraction".to_string(),
            message: format!(
                "context_fraction {} of {} rows leaves {} reference rows; rescale range will be degenerate",
                config.postprocess.context_fraction, inf.context_length, reference_rows
            ),
            suggestion: None,
        });
    }

    if inf.prediction_length > 0 {
        #[allow(clippy::cast_precision_loss)]
        let single_point = 100.0 / inf.prediction_length as f64;
        if config.anomaly.critical_percentage <= single_point {
            warnings.push(ValidationWarning {
                field: "anomaly.critical_percentage".to_string(),
                message: format!(
                    "critical_percentage {:.2} is reached by a single forecast point ({single_point:.2}%)",
                    config.anomaly.critical_percentage
                ),
                suggestion: None,
            });
        }
    }

    warnings
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_levenshtein_identical() {
        assert_eq!(levenshtein("hello", "hello"), 0);
    }

    #[test]
    fn test_levenshtein_one_edit() {
        assert_eq!(levenshtein("cutof", "cutoff"), 1);
    }

    #[test]
    fn test_levenshtein_empty() {
        assert_eq!(levenshtein("", "abc"), 3);
        assert_eq!(levenshtein("abc", ""), 3);
    }

    #[test]
    fn test_walk_toml_keys_nested() {
        let toml: toml::Value = r#"
            [anomaly.limits.tempA]
            max = 50.0
        "#
        .parse()
        .unwrap();
        let keys = walk_toml_keys(&toml, "");
        assert!(keys.contains(&"anomaly".to_string()));
        assert!(keys.contains(&"anomaly.limits".to_string()));
        assert!(keys.contains(&"anomaly.limits.tempA.max".to_string()));
    }

    #[test]
    fn test_typo_key_produces_warning_with_suggestion() {
        let warnings = validate_unknown_keys(
            r#"
[conditioning]
filter_cutof = 0.3
"#,
        );
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].field, "conditioning.filter_cutof");
        assert_eq!(warnings[0].suggestion.as_deref(), Some("conditioning.filter_cutoff"));
    }

    #[test]
    fn test_feature_limit_keys_are_known() {
        let warnings = validate_unknown_keys(
            r#"
[anomaly.limits.accZ]
min = 5.0
max = 15.0

[anomaly.limits.current]
max = 12.0
"#,
        );
        assert!(warnings.is_empty(), "unexpected warnings: {warnings:?}");
    }

    #[test]
    fn test_unknown_section_produces_warning() {
        let warnings = validate_unknown_keys("[telemetry.kafka]\nbrokers = \"x\"\n");
        assert!(warnings.iter().any(|w| w.field == "telemetry.kafka"));
    }

    #[test]
    fn test_suggest_correction_no_match_for_garbage() {
        let known = known_config_keys();
        assert!(suggest_correction("completely_unrelated_garbage_key_xyz", &known).is_none());
    }

    #[test]
    fn test_non_finite_keys_found() {
        let mut table = toml::map::Map::new();
        table.insert("a".to_string(), toml::Value::Float(f64::NAN));
        table.insert("b".to_string(), toml::Value::Float(1.0));
        let bad = non_finite_keys(&toml::Value::Table(table), "");
        assert_eq!(bad, vec!["a".to_string()]);
    }

    #[test]
    fn test_default_config_has_no_range_warnings() {
        let config = crate::config::MachineConfig::default();
        assert!(validate_operating_ranges(&config).is_empty());
    }

    #[test]
    fn test_tiny_context_fraction_warns() {
        let mut config = crate::config::MachineConfig::default();
        config.postprocess.context_fraction = 0.001;
        let warnings = validate_operating_ranges(&config);
        assert!(warnings.iter().any(|w| w.field == "postprocess.context_fraction"));
    }
}
