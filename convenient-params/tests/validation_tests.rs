use convenient_params::schema::REQUIRED_KEYS;
use convenient_params::validate;
use serde_json::{Value, json};

fn complete_bundle() -> Value {
    json!({
        "inputParameters": {
            "whichReduction": "SWIR",
            "bandName_reduction": "swir1",
            "bandNameToFit": "swir1",
            "binCuts": [-0.2, -0.05, 0.05, 0.2],
            "modalityDictionary": {
                "bimodal": false,
                "constant": false,
                "linear": false,
                "trimodal": false,
                "unimodal": true
            },
            "L8dictionary": {
                "yearsList": [2019, 2020],
                "firstDOY": 1,
                "lastDOY": 365
            }
        },
        "analysisParameters": {
            "changeThreshold": 0.4,
            "dropThresholdToDenoteChange": 0.5,
            "gainThresholdToDenoteChange": 0.3
        },
        "advancedParameters": {
            "initializationApproach": "F",
            "transitionCreationMethod": "V"
        }
    })
}

#[test]
fn test_complete_bundle_is_valid_without_warnings() {
    let report = validate(&complete_bundle());
    assert!(report.is_valid(), "errors: {:?}", report.errors);
    assert!(report.warnings.is_empty(), "warnings: {:?}", report.warnings);
}

#[test]
fn test_every_single_missing_key_is_named() {
    for (section, keys) in REQUIRED_KEYS {
        for key in *keys {
            let mut bundle = complete_bundle();
            bundle[*section].as_object_mut().unwrap().remove(*key);

            let report = validate(&bundle);
            assert!(!report.is_valid(), "{section}.{key} removal must be invalid");
            let expected = format!("{section}.{key}");
            assert!(
                report.errors.iter().any(|e| e.contains(&expected)),
                "no error mentions {expected}: {:?}",
                report.errors
            );
        }
    }
}

#[test]
fn test_falsy_values_count_as_present() {
    let mut bundle = complete_bundle();
    bundle["inputParameters"]["whichReduction"] = Value::Null;
    bundle["analysisParameters"]["changeThreshold"] = json!(0);
    bundle["advancedParameters"]["initializationApproach"] = json!(false);
    bundle["advancedParameters"]["transitionCreationMethod"] = json!("");

    let report = validate(&bundle);
    assert!(report.is_valid(), "errors: {:?}", report.errors);
}

#[test]
fn test_unknown_fields_are_accepted() {
    let mut bundle = complete_bundle();
    bundle["inputParameters"]["somethingNew"] = json!({"deep": [1, 2, 3]});
    bundle["analysisParameters"]["experimentalKnob"] = json!("on");
    bundle["topLevelNote"] = json!("free text");

    assert!(validate(&bundle).is_valid());
}

#[test]
fn test_bin_cuts_must_be_sequence() {
    let mut bundle = complete_bundle();
    bundle["inputParameters"]["binCuts"] = json!(0.5);

    let report = validate(&bundle);
    assert!(!report.is_valid());
    assert!(report.errors.iter().any(|e| e.contains("binCuts")));
}

#[test]
fn test_all_false_modalities_warn_but_stay_valid() {
    let mut bundle = complete_bundle();
    bundle["inputParameters"]["modalityDictionary"]["unimodal"] = json!(false);

    let report = validate(&bundle);
    assert!(report.is_valid());
    assert!(report.warnings.iter().any(|w| w.contains("ambiguous")));
}

#[test]
fn test_truthy_non_boolean_modality_is_not_a_selection() {
    let mut bundle = complete_bundle();
    bundle["inputParameters"]["modalityDictionary"]["unimodal"] = json!(1);

    let report = validate(&bundle);
    assert!(report.warnings.iter().any(|w| w.contains("ambiguous")));
}

#[test]
fn test_missing_modality_key_is_a_warning() {
    let mut bundle = complete_bundle();
    bundle["inputParameters"]["modalityDictionary"]
        .as_object_mut()
        .unwrap()
        .remove("trimodal");

    let report = validate(&bundle);
    assert!(report.is_valid());
    assert!(report.warnings.iter().any(|w| w.contains("'trimodal'")));
}

#[test]
fn test_sensor_dictionary_warnings_are_independent() {
    let mut bundle = complete_bundle();
    bundle["inputParameters"]["S2dictionary"] = json!({"yearsList": 2020});

    let report = validate(&bundle);
    assert!(report.is_valid());
    let s2: Vec<_> = report
        .warnings
        .iter()
        .filter(|w| w.contains("S2dictionary"))
        .collect();
    assert_eq!(s2.len(), 3, "{s2:?}");
    assert!(s2.iter().any(|w| w.contains("yearsList")));
    assert!(s2.iter().any(|w| w.contains("firstDOY")));
    assert!(s2.iter().any(|w| w.contains("lastDOY")));
}

#[test]
fn test_change_threshold_range() {
    let mut bundle = complete_bundle();
    bundle["analysisParameters"]["changeThreshold"] = json!(1.5);
    let report = validate(&bundle);
    assert!(report.is_valid());
    assert!(report.warnings.iter().any(|w| w.contains("1.5")));

    bundle["analysisParameters"]["changeThreshold"] = json!(0.4);
    let report = validate(&bundle);
    assert!(!report.warnings.iter().any(|w| w.contains("changeThreshold")));
}

#[test]
fn test_change_threshold_bounds_are_inclusive() {
    for edge in [0.0, 1.0] {
        let mut bundle = complete_bundle();
        bundle["analysisParameters"]["changeThreshold"] = json!(edge);
        assert!(validate(&bundle).warnings.is_empty());
    }
}

#[test]
fn test_drop_below_gain_warns() {
    let mut bundle = complete_bundle();
    bundle["analysisParameters"]["dropThresholdToDenoteChange"] = json!(0.3);
    bundle["analysisParameters"]["gainThresholdToDenoteChange"] = json!(0.5);
    let report = validate(&bundle);
    assert!(report.is_valid());
    assert!(
        report
            .warnings
            .iter()
            .any(|w| w.contains("dropThresholdToDenoteChange") && w.contains("less than"))
    );

    bundle["analysisParameters"]["dropThresholdToDenoteChange"] = json!(0.5);
    bundle["analysisParameters"]["gainThresholdToDenoteChange"] = json!(0.3);
    let report = validate(&bundle);
    assert!(!report.warnings.iter().any(|w| w.contains("less than")));
}
