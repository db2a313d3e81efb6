use crate::{Error, FeatureTable, Result, SpatialReference, esri::FeatureSet};
use geojson::FeatureCollection;
use serde_json::Value;
use std::{fmt::Display, str::FromStr};

/// The format of a query response (the `f` parameter).
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub enum Format {
    /// Esri JSON feature sets (`f=json`, the default).
    #[default]
    EsriJson,

    /// GeoJSON feature collections (`f=geojson`).
    GeoJson,
}

impl Format {
    /// Decodes a chunk of features from response bytes in this format.
    ///
    /// # Examples
    ///
    /// ```
    /// use restfeature::Format;
    ///
    /// let bytes = br#"{"spatialReference": {"wkid": 4326}, "features": [
    ///     {"attributes": {"OBJECTID": 1}, "geometry": {"x": -81.0, "y": 29.2}}
    /// ]}"#;
    /// let chunk = Format::EsriJson.from_bytes(bytes).unwrap();
    /// assert_eq!(chunk.len(), 1);
    /// ```
    pub fn from_bytes(&self, bytes: impl AsRef<[u8]>) -> Result<FeatureTable> {
        let value: Value = serde_json::from_slice(bytes.as_ref())?;
        self.from_value(value)
    }

    /// Decodes a chunk of features from a JSON value in this format.
    pub fn from_value(&self, value: Value) -> Result<FeatureTable> {
        match self {
            Format::EsriJson => {
                let feature_set: FeatureSet = serde_json::from_value(value)?;
                if feature_set.exceeded_transfer_limit {
                    tracing::debug!("feature set exceeded the transfer limit");
                }
                Ok(feature_set.into_table())
            }
            Format::GeoJson => {
                let mut feature_collection = FeatureCollection::try_from(value)?;
                let spatial_reference = feature_collection
                    .foreign_members
                    .as_mut()
                    .and_then(|members| members.remove("crs"))
                    .map(|crs| {
                        SpatialReference::from_geojson_crs(&crs).ok_or(Error::InvalidValue {
                            key: "crs".to_string(),
                            value: crs,
                        })
                    })
                    .transpose()?
                    .unwrap_or_else(SpatialReference::wgs84);
                Ok(FeatureTable::new(
                    feature_collection.features,
                    Some(spatial_reference),
                ))
            }
        }
    }
}

impl Display for Format {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Format::EsriJson => f.write_str("json"),
            Format::GeoJson => f.write_str("geojson"),
        }
    }
}

impl FromStr for Format {
    type Err = Error;

    fn from_str(s: &str) -> Result<Format> {
        match s.to_ascii_lowercase().as_str() {
            "json" | "esrijson" | "esri-json" => Ok(Format::EsriJson),
            "geojson" => Ok(Format::GeoJson),
            _ => Err(Error::UnsupportedFormat(s.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Format;
    use crate::{Error, SpatialReference};

    #[test]
    fn parse() {
        assert_eq!("json".parse::<Format>().unwrap(), Format::EsriJson);
        assert_eq!("ESRIJSON".parse::<Format>().unwrap(), Format::EsriJson);
        assert_eq!("GeoJSON".parse::<Format>().unwrap(), Format::GeoJson);
        assert!(matches!(
            "pbf".parse::<Format>().unwrap_err(),
            Error::UnsupportedFormat(_)
        ));
    }

    #[test]
    fn display_round_trip() {
        for format in [Format::EsriJson, Format::GeoJson] {
            assert_eq!(format.to_string().parse::<Format>().unwrap(), format);
        }
    }

    #[test]
    fn esri_json_page() {
        let chunk = Format::EsriJson
            .from_bytes(include_bytes!("../data/beaches-0.json"))
            .unwrap();
        assert_eq!(chunk.len(), 3);
        assert_eq!(
            chunk.spatial_reference(),
            Some(&SpatialReference::from_epsg(2236))
        );
    }

    #[test]
    fn geojson_page_defaults_to_wgs84() {
        let chunk = Format::GeoJson
            .from_bytes(include_bytes!("../data/beaches-0.geojson"))
            .unwrap();
        assert_eq!(chunk.len(), 2);
        assert!(chunk.spatial_reference().unwrap().is_wgs84());
    }

    #[test]
    fn geojson_page_with_legacy_crs() {
        let bytes = br#"{"type": "FeatureCollection", "features": [],
            "crs": {"type": "name", "properties": {"name": "EPSG:3857"}}}"#;
        let chunk = Format::GeoJson.from_bytes(bytes).unwrap();
        assert_eq!(chunk.spatial_reference().unwrap().epsg(), Some(3857));
    }

    #[test]
    fn malformed() {
        assert!(matches!(
            Format::EsriJson.from_bytes(b"<html>").unwrap_err(),
            Error::SerdeJson(_)
        ));
        assert!(Format::GeoJson.from_bytes(br#"{"type": "Point"}"#).is_err());
    }
}
