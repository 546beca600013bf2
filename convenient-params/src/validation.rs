//! Schema and consistency checks for parameter bundles.
//!
//! [`validate`] is total: structural problems are reported, never raised.
//! Errors block an experiment, warnings are surfaced and execution proceeds.

use serde::Serialize;
use serde_json::{Map, Value};

use crate::schema::{
    ANALYSIS_PARAMETERS, INPUT_PARAMETERS, MODALITY_KEYS, REQUIRED_KEYS, SENSOR_KEYS,
};

/// Outcome of validating one bundle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ValidationReport {
    /// Hard failures, in rule order
    pub errors: Vec<String>,
    /// Non-blocking findings, in rule order
    pub warnings: Vec<String>,
}

impl ValidationReport {
    /// True iff there are no errors. Warnings never affect validity.
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    fn error(&mut self, message: String) {
        self.errors.push(message);
    }

    fn warn(&mut self, message: String) {
        self.warnings.push(message);
    }
}

/// Validate a bundle against the required-keys schema and semantic rules.
pub fn validate(bundle: &Value) -> ValidationReport {
    let mut report = ValidationReport::default();

    for (section_name, required) in REQUIRED_KEYS {
        let Some(section) = section(bundle, section_name, &mut report) else {
            continue;
        };
        for key in *required {
            if !section.contains_key(*key) {
                report.error(format!("Missing required key: {section_name}.{key}"));
            }
        }
    }

    let input = bundle.get(INPUT_PARAMETERS).and_then(Value::as_object);
    if let Some(input) = input {
        check_bin_cuts(input, &mut report);
        check_modalities(input, &mut report);
        check_sensors(input, &mut report);
    }

    if let Some(analysis) = bundle.get(ANALYSIS_PARAMETERS).and_then(Value::as_object) {
        check_change_threshold(analysis, &mut report);
        check_drop_gain(analysis, &mut report);
    }

    report
}

fn section<'a>(
    bundle: &'a Value,
    name: &str,
    report: &mut ValidationReport,
) -> Option<&'a Map<String, Value>> {
    match bundle.get(name) {
        None => {
            report.error(format!("Missing required section: {name}"));
            None
        }
        Some(Value::Object(map)) => Some(map),
        Some(other) => {
            report.error(format!(
                "Section {name} must be an object, got {}",
                type_name(other)
            ));
            None
        }
    }
}

fn check_bin_cuts(input: &Map<String, Value>, report: &mut ValidationReport) {
    if let Some(bin_cuts) = input.get("binCuts") {
        if !bin_cuts.is_array() {
            report.error(format!(
                "{INPUT_PARAMETERS}.binCuts must be an array, got {}",
                type_name(bin_cuts)
            ));
        }
    }
}

fn check_modalities(input: &Map<String, Value>, report: &mut ValidationReport) {
    let Some(modalities) = input.get("modalityDictionary") else {
        return;
    };
    let Some(modalities) = modalities.as_object() else {
        report.warn(format!(
            "{INPUT_PARAMETERS}.modalityDictionary should be an object, got {}",
            type_name(modalities)
        ));
        return;
    };

    for modality in MODALITY_KEYS {
        if !modalities.contains_key(*modality) {
            report.warn(format!(
                "{INPUT_PARAMETERS}.modalityDictionary is missing modality '{modality}'"
            ));
        }
    }

    if !modalities.values().any(|v| v.as_bool() == Some(true)) {
        report.warn(format!(
            "{INPUT_PARAMETERS}.modalityDictionary has no modality set to true; mode selection is ambiguous"
        ));
    }
}

fn check_sensors(input: &Map<String, Value>, report: &mut ValidationReport) {
    for sensor in SENSOR_KEYS {
        let Some(dictionary) = input.get(*sensor) else {
            continue;
        };
        let Some(dictionary) = dictionary.as_object() else {
            report.warn(format!(
                "{INPUT_PARAMETERS}.{sensor} should be an object, got {}",
                type_name(dictionary)
            ));
            continue;
        };

        if !dictionary.get("yearsList").is_some_and(Value::is_array) {
            report.warn(format!(
                "{INPUT_PARAMETERS}.{sensor}.yearsList is missing or not an array"
            ));
        }
        for key in ["firstDOY", "lastDOY"] {
            if !dictionary.contains_key(key) {
                report.warn(format!("{INPUT_PARAMETERS}.{sensor}.{key} is missing"));
            }
        }
    }
}

fn check_change_threshold(analysis: &Map<String, Value>, report: &mut ValidationReport) {
    let Some(threshold) = analysis.get("changeThreshold") else {
        return;
    };
    match threshold.as_f64() {
        Some(value) if !(0.0..=1.0).contains(&value) => report.warn(format!(
            "{ANALYSIS_PARAMETERS}.changeThreshold = {threshold} is outside [0, 1]"
        )),
        Some(_) => {}
        None => report.warn(format!(
            "{ANALYSIS_PARAMETERS}.changeThreshold should be a number, got {}",
            type_name(threshold)
        )),
    }
}

fn check_drop_gain(analysis: &Map<String, Value>, report: &mut ValidationReport) {
    let drop = analysis.get("dropThresholdToDenoteChange");
    let gain = analysis.get("gainThresholdToDenoteChange");
    let (Some(drop), Some(gain)) = (drop, gain) else {
        return;
    };
    if let (Some(d), Some(g)) = (drop.as_f64(), gain.as_f64()) {
        if d < g {
            report.warn(format!(
                "{ANALYSIS_PARAMETERS}.dropThresholdToDenoteChange ({drop}) is less than \
                 gainThresholdToDenoteChange ({gain})"
            ));
        }
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
