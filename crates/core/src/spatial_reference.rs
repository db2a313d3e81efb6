use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::{fmt::Display, sync::LazyLock};

/// The EPSG code of WGS84, the only reference RFC 7946 GeoJSON allows.
pub const WGS84: u32 = 4326;

static EPSG_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)EPSG:(?:[\d.]*:)?(\d+)$").expect("the EPSG name regex should be valid")
});

/// A coordinate reference system as reported by an ArcGIS server.
///
/// Two references are equal when they resolve to the same EPSG code
/// (`latestWkid` takes precedence over `wkid`). References without a code
/// are compared by their WKT.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpatialReference {
    /// The well-known id, possibly an Esri-specific one like 102100.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wkid: Option<u32>,

    /// The current EPSG code for `wkid`, e.g. 3857 for 102100.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latest_wkid: Option<u32>,

    /// Well-known text, for references without an id.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wkt: Option<String>,
}

impl SpatialReference {
    /// Creates a reference from an EPSG code.
    ///
    /// # Examples
    ///
    /// ```
    /// use restfeature::SpatialReference;
    ///
    /// let spatial_reference = SpatialReference::from_epsg(4326);
    /// assert_eq!(spatial_reference.epsg(), Some(4326));
    /// ```
    pub fn from_epsg(code: u32) -> SpatialReference {
        SpatialReference {
            wkid: Some(code),
            latest_wkid: Some(code),
            wkt: None,
        }
    }

    /// Returns WGS84.
    pub fn wgs84() -> SpatialReference {
        SpatialReference::from_epsg(WGS84)
    }

    /// Returns the resolved EPSG code, if there is one.
    pub fn epsg(&self) -> Option<u32> {
        self.latest_wkid.or(self.wkid)
    }

    /// Returns true if this is WGS84.
    pub fn is_wgs84(&self) -> bool {
        self.epsg() == Some(WGS84)
    }

    /// Parses a legacy GeoJSON `crs` member.
    ///
    /// Only named references (`EPSG:3857`, `urn:ogc:def:crs:EPSG::3857`) are
    /// understood. `CRS84` is WGS84.
    ///
    /// # Examples
    ///
    /// ```
    /// use restfeature::SpatialReference;
    /// use serde_json::json;
    ///
    /// let crs = json!({"type": "name", "properties": {"name": "urn:ogc:def:crs:EPSG::3857"}});
    /// assert_eq!(SpatialReference::from_geojson_crs(&crs).unwrap().epsg(), Some(3857));
    /// ```
    pub fn from_geojson_crs(crs: &Value) -> Option<SpatialReference> {
        let name = crs.get("properties")?.get("name")?.as_str()?;
        if name.to_ascii_uppercase().ends_with("CRS84") {
            return Some(SpatialReference::wgs84());
        }
        let captures = EPSG_NAME.captures(name)?;
        captures
            .get(1)
            .and_then(|code| code.as_str().parse().ok())
            .map(SpatialReference::from_epsg)
    }

    /// Returns a legacy GeoJSON `crs` member naming this reference.
    pub fn to_geojson_crs(&self) -> Option<Value> {
        self.epsg().map(|code| {
            serde_json::json!({
                "type": "name",
                "properties": {"name": format!("urn:ogc:def:crs:EPSG::{code}")}
            })
        })
    }
}

impl PartialEq for SpatialReference {
    fn eq(&self, other: &Self) -> bool {
        match (self.epsg(), other.epsg()) {
            (Some(a), Some(b)) => a == b,
            (None, None) => self.wkt == other.wkt,
            _ => false,
        }
    }
}

impl Eq for SpatialReference {}

impl Display for SpatialReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(code) = self.epsg() {
            write!(f, "EPSG:{code}")
        } else if let Some(wkt) = &self.wkt {
            f.write_str(wkt)
        } else {
            f.write_str("unknown")
        }
    }
}
