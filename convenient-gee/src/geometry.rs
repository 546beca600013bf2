//! Rebuilds geometry objects that cannot travel through JSON.
//!
//! A sidecar can only carry coordinate arrays. Before the bundle is injected,
//! `inputParameters.defaultStudyAreaCoordinates` becomes an
//! `ee.Geometry.Polygon` at `inputParameters.defaultStudyArea`, and each
//! sensor with its own `AOICoordinates` gets an `AOI` polygon. A sensor
//! without coordinates shares the default study area object itself, so both
//! analyse the same area unless the bundle says otherwise.

use boa_engine::object::JsObject;
use boa_engine::{Context, JsError, JsString, JsValue};
use convenient_params::schema::{
    AOI, AOI_COORDINATES, AOI_GEODESIC, AOI_SENSOR_KEYS, DEFAULT_STUDY_AREA,
    DEFAULT_STUDY_AREA_COORDINATES, DEFAULT_STUDY_AREA_GEODESIC,
    EXPECTATION_COLLECTION_PARAMETERS, INPUT_PARAMETERS,
};
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GeometryError {
    #[error("ee.Geometry.Polygon is not available: {0}")]
    ConstructorUnavailable(String),

    #[error("Failed to build {field}: {message}")]
    Build { field: String, message: String },

    #[error("Cannot access {field}: {message}")]
    Access { field: String, message: String },
}

/// What [`reconstruct`] changed
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GeometrySummary {
    /// `defaultStudyArea` was built
    pub default_study_area: bool,
    /// Sensors that received their own AOI polygon
    pub built: Vec<String>,
    /// Sensors whose AOI is the shared default study area
    pub aliased: Vec<String>,
}

impl GeometrySummary {
    pub fn is_empty(&self) -> bool {
        !self.default_study_area && self.built.is_empty() && self.aliased.is_empty()
    }
}

/// Replace coordinate arrays in `bundle` with geometries built through `ee`.
///
/// Mutates the bundle in place. A bundle without coordinates is left as is.
pub fn reconstruct(
    bundle: &JsValue,
    ee: &JsValue,
    context: &mut Context,
) -> Result<GeometrySummary, GeometryError> {
    let mut summary = GeometrySummary::default();
    let Some(input) = child_object(bundle, INPUT_PARAMETERS, context)? else {
        return Ok(summary);
    };

    let mut default_area = None;
    let coordinates = property(&input, DEFAULT_STUDY_AREA_COORDINATES, context)?;
    if is_present(&coordinates) {
        let geodesic = flag(&input, DEFAULT_STUDY_AREA_GEODESIC, context)?;
        let area = build_polygon(ee, &coordinates, geodesic, DEFAULT_STUDY_AREA, context)?;
        assign(&input, DEFAULT_STUDY_AREA, area.clone(), context)?;
        debug!("Built {} (geodesic: {})", DEFAULT_STUDY_AREA, geodesic);
        summary.default_study_area = true;
        default_area = Some(area);
    }

    for sensor in AOI_SENSOR_KEYS {
        let sensor_value = property(&input, sensor, context)?;
        let Some(parameters) = child_object(&sensor_value, EXPECTATION_COLLECTION_PARAMETERS, context)?
        else {
            continue;
        };

        let aoi_coordinates = property(&parameters, AOI_COORDINATES, context)?;
        if is_present(&aoi_coordinates) {
            let geodesic = flag(&parameters, AOI_GEODESIC, context)?;
            let field = format!("{sensor}.{EXPECTATION_COLLECTION_PARAMETERS}.{AOI}");
            let aoi = build_polygon(ee, &aoi_coordinates, geodesic, &field, context)?;
            assign(&parameters, AOI, aoi, context)?;
            debug!("Built {}", field);
            summary.built.push((*sensor).to_string());
        } else if let Some(area) = &default_area {
            assign(&parameters, AOI, area.clone(), context)?;
            debug!("{} AOI shares {}", sensor, DEFAULT_STUDY_AREA);
            summary.aliased.push((*sensor).to_string());
        }
    }

    Ok(summary)
}

fn build_polygon(
    ee: &JsValue,
    coordinates: &JsValue,
    geodesic: bool,
    field: &str,
    context: &mut Context,
) -> Result<JsValue, GeometryError> {
    let unavailable = |e: JsError| GeometryError::ConstructorUnavailable(e.to_string());
    let ee = ee
        .as_object()
        .ok_or_else(|| GeometryError::ConstructorUnavailable("ee is not an object".to_string()))?;
    let namespace = ee.get(JsString::from("Geometry"), context).map_err(unavailable)?;
    let namespace_object = namespace.as_object().ok_or_else(|| {
        GeometryError::ConstructorUnavailable("ee.Geometry is not an object".to_string())
    })?;
    let polygon = namespace_object
        .get(JsString::from("Polygon"), context)
        .map_err(unavailable)?;
    let polygon = polygon.as_callable().ok_or_else(|| {
        GeometryError::ConstructorUnavailable("ee.Geometry.Polygon is not callable".to_string())
    })?;

    polygon
        .call(
            &namespace,
            &[coordinates.clone(), JsValue::null(), JsValue::from(geodesic)],
            context,
        )
        .map_err(|e| GeometryError::Build {
            field: field.to_string(),
            message: e.to_string(),
        })
}

fn property(object: &JsObject, key: &str, context: &mut Context) -> Result<JsValue, GeometryError> {
    object
        .get(JsString::from(key), context)
        .map_err(|e| GeometryError::Access {
            field: key.to_string(),
            message: e.to_string(),
        })
}

fn child_object(
    parent: &JsValue,
    key: &str,
    context: &mut Context,
) -> Result<Option<JsObject>, GeometryError> {
    let Some(parent) = parent.as_object() else {
        return Ok(None);
    };
    let parent: JsObject = parent.clone();
    let child = property(&parent, key, context)?;
    Ok(child.as_object().map(|object| object.clone()))
}

fn flag(object: &JsObject, key: &str, context: &mut Context) -> Result<bool, GeometryError> {
    Ok(property(object, key, context)?.as_boolean().unwrap_or(false))
}

fn assign(
    object: &JsObject,
    key: &str,
    value: JsValue,
    context: &mut Context,
) -> Result<(), GeometryError> {
    object
        .set(JsString::from(key), value, true, context)
        .map(|_| ())
        .map_err(|e| GeometryError::Access {
            field: key.to_string(),
            message: e.to_string(),
        })
}

fn is_present(value: &JsValue) -> bool {
    !value.is_undefined() && !value.is_null()
}
