//! Esri JSON feature sets, and their conversion to GeoJSON features.

use crate::{FeatureTable, SpatialReference};
use geojson::{Feature, Geometry, feature::Id};
use serde::{Deserialize, Deserializer, de::Unexpected};
use serde_json::{Map, Value};

type Position = Vec<f64>;

/// The body of a `query` response with `f=json`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct FeatureSet {
    #[serde(default)]
    pub(crate) object_id_field_name: Option<String>,

    #[serde(default)]
    pub(crate) spatial_reference: Option<SpatialReference>,

    #[serde(default)]
    pub(crate) features: Vec<EsriFeature>,

    #[serde(default)]
    pub(crate) exceeded_transfer_limit: bool,
}

#[derive(Debug, Deserialize)]
pub(crate) struct EsriFeature {
    #[serde(default)]
    pub(crate) attributes: Map<String, Value>,

    #[serde(default)]
    pub(crate) geometry: Option<EsriGeometry>,
}

/// The geometry shapes of Esri JSON, told apart by their keys.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(crate) enum EsriGeometry {
    Polygon { rings: Vec<Vec<Position>> },
    Polyline { paths: Vec<Vec<Position>> },
    Multipoint { points: Vec<Position> },
    Point {
        #[serde(default, deserialize_with = "coordinate")]
        x: Option<f64>,
        #[serde(default, deserialize_with = "coordinate")]
        y: Option<f64>,
        #[serde(default, deserialize_with = "coordinate")]
        z: Option<f64>,
    },
}

/// Empty points write their coordinates as `null` or `"NaN"`.
fn coordinate<'de, D>(deserializer: D) -> std::result::Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Coordinate {
        Number(f64),
        Text(String),
    }

    match Option::<Coordinate>::deserialize(deserializer)? {
        None => Ok(None),
        Some(Coordinate::Number(n)) => Ok(Some(n)),
        Some(Coordinate::Text(s)) if s.eq_ignore_ascii_case("nan") => Ok(None),
        Some(Coordinate::Text(s)) => Err(serde::de::Error::invalid_value(
            Unexpected::Str(&s),
            &"a number, null, or \"NaN\"",
        )),
    }
}

impl FeatureSet {
    pub(crate) fn into_table(self) -> FeatureTable {
        let object_id_field_name = self.object_id_field_name;
        let features = self
            .features
            .into_iter()
            .map(|feature| feature.into_feature(object_id_field_name.as_deref()))
            .collect();
        FeatureTable::new(features, self.spatial_reference)
    }
}

impl EsriFeature {
    fn into_feature(self, object_id_field_name: Option<&str>) -> Feature {
        let id = object_id_field_name
            .and_then(|name| self.attributes.get(name))
            .and_then(|value| match value {
                Value::Number(number) => Some(Id::Number(number.clone())),
                Value::String(s) => Some(Id::String(s.clone())),
                _ => None,
            });
        Feature {
            bbox: None,
            geometry: self.geometry.and_then(EsriGeometry::into_geometry),
            id,
            properties: Some(self.attributes),
            foreign_members: None,
        }
    }
}

impl EsriGeometry {
    /// Converts to a GeoJSON geometry, or `None` for empty shapes.
    pub(crate) fn into_geometry(self) -> Option<Geometry> {
        use geojson::Value::*;

        let value = match self {
            EsriGeometry::Point { x, y, z } => {
                let (x, y) = (x?, y?);
                if x.is_nan() || y.is_nan() {
                    return None;
                }
                let mut position = vec![x, y];
                if let Some(z) = z {
                    position.push(z);
                }
                Point(position)
            }
            EsriGeometry::Multipoint { points } => {
                if points.is_empty() {
                    return None;
                }
                MultiPoint(points)
            }
            EsriGeometry::Polyline { mut paths } => match paths.len() {
                0 => return None,
                1 => LineString(paths.remove(0)),
                _ => MultiLineString(paths),
            },
            EsriGeometry::Polygon { rings } => {
                let mut polygons = group_rings(rings);
                match polygons.len() {
                    0 => return None,
                    1 => Polygon(polygons.remove(0)),
                    _ => MultiPolygon(polygons),
                }
            }
        };
        Some(Geometry::new(value))
    }
}

/// Groups rings into polygons.
///
/// Esri outer rings are clockwise and holes are counter-clockwise. A hole
/// belongs to the most recent outer ring; a hole with no outer ring before it
/// is treated as an outer ring.
fn group_rings(rings: Vec<Vec<Position>>) -> Vec<Vec<Vec<Position>>> {
    let mut polygons: Vec<Vec<Vec<Position>>> = Vec::new();
    for ring in rings.into_iter().filter(|ring| !ring.is_empty()) {
        match polygons.last_mut() {
            Some(polygon) if !is_clockwise(&ring) => polygon.push(ring),
            _ => polygons.push(vec![ring]),
        }
    }
    polygons
}

fn is_clockwise(ring: &[Position]) -> bool {
    let sum: f64 = ring
        .windows(2)
        .filter(|pair| pair[0].len() >= 2 && pair[1].len() >= 2)
        .map(|pair| (pair[1][0] - pair[0][0]) * (pair[1][1] + pair[0][1]))
        .sum();
    sum > 0.0
}
