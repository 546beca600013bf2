//! Parameter bundles for headless Earth Engine experiments.
//!
//! A parameter bundle is the JSON sidecar that stands in for the browser-side
//! parameter module a Code Editor script would normally `require`. This crate
//! loads bundles from disk and checks them against the required-keys schema
//! and a handful of semantic consistency rules.
//!
//! # Example
//!
//! ```
//! use convenient_params::{ParameterBundle, validate};
//! use serde_json::json;
//!
//! let bundle = ParameterBundle::from_value(json!({
//!     "inputParameters": {
//!         "whichReduction": "SWIR",
//!         "bandName_reduction": "swir1",
//!         "bandNameToFit": "swir1",
//!         "binCuts": [-0.2, 0.2],
//!         "modalityDictionary": {"unimodal": true}
//!     },
//!     "analysisParameters": {
//!         "changeThreshold": 0.4,
//!         "dropThresholdToDenoteChange": 0.5,
//!         "gainThresholdToDenoteChange": 0.5
//!     },
//!     "advancedParameters": {
//!         "initializationApproach": "F",
//!         "transitionCreationMethod": "V"
//!     }
//! }))
//! .unwrap();
//!
//! let report = validate(bundle.value());
//! assert!(report.is_valid());
//! ```

pub mod bundle;
pub mod schema;
pub mod validation;

pub use bundle::{ParameterBundle, ParamsError};
pub use validation::{ValidationReport, validate};
