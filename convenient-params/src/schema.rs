//! Required-keys schema and the recognised optional fields of a bundle.

/// Section holding reduction, binning, modality and per-sensor settings.
pub const INPUT_PARAMETERS: &str = "inputParameters";
/// Section holding the numeric change thresholds.
pub const ANALYSIS_PARAMETERS: &str = "analysisParameters";
/// Section holding the initialization and transition enums.
pub const ADVANCED_PARAMETERS: &str = "advancedParameters";

/// Every section with the keys it must carry, in validation order.
pub const REQUIRED_KEYS: &[(&str, &[&str])] = &[
    (
        INPUT_PARAMETERS,
        &[
            "whichReduction",
            "bandName_reduction",
            "bandNameToFit",
            "binCuts",
            "modalityDictionary",
        ],
    ),
    (
        ANALYSIS_PARAMETERS,
        &[
            "changeThreshold",
            "dropThresholdToDenoteChange",
            "gainThresholdToDenoteChange",
        ],
    ),
    (
        ADVANCED_PARAMETERS,
        &["initializationApproach", "transitionCreationMethod"],
    ),
];

/// Modalities a `modalityDictionary` is expected to list.
pub const MODALITY_KEYS: &[&str] = &["bimodal", "constant", "linear", "trimodal", "unimodal"];

/// Per-sensor dictionaries the validator inspects.
pub const SENSOR_KEYS: &[&str] = &[
    "L5dictionary",
    "L7dictionary",
    "L8dictionary",
    "S2dictionary",
    "S1dictionary",
];

/// Per-sensor dictionaries that carry their own area of interest.
pub const AOI_SENSOR_KEYS: &[&str] = &["L8dictionary", "S2dictionary"];

/// Ring of `[lon, lat]` pairs for the shared study area.
pub const DEFAULT_STUDY_AREA_COORDINATES: &str = "defaultStudyAreaCoordinates";
/// Optional geodesic flag for the shared study area.
pub const DEFAULT_STUDY_AREA_GEODESIC: &str = "defaultStudyAreaGeodesic";
/// Field the reconstructed shared study area is written to.
pub const DEFAULT_STUDY_AREA: &str = "defaultStudyArea";

/// Nested dictionary of a sensor holding its collection settings.
pub const EXPECTATION_COLLECTION_PARAMETERS: &str = "expectationCollectionParameters";
/// Per-sensor AOI ring.
pub const AOI_COORDINATES: &str = "AOICoordinates";
/// Optional per-sensor geodesic flag.
pub const AOI_GEODESIC: &str = "AOIGeodesic";
/// Field the reconstructed per-sensor AOI is written to.
pub const AOI: &str = "AOI";
