use crate::{Error, Result, SpatialReference};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::{ops::Deref, sync::LazyLock};

/// The type reported by feature layers.
pub const FEATURE_LAYER: &str = "Feature Layer";

const MAX_RECORD_COUNT_PATTERN: &str = r"(?i)^max(imum)?(\s|_)?record(\s|_)?count$";
const NAME_PATTERN: &str = r"(?i)^name";
const FIELD_TYPE_PREFIX: &str = "esriFieldType";

static MAX_RECORD_COUNT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(MAX_RECORD_COUNT_PATTERN).expect("the max record count regex should be valid")
});

static NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(NAME_PATTERN).expect("the name regex should be valid"));

/// The JSON a server returns for a layer or service (`f=json`).
///
/// Metadata is never changed once fetched. Fetch it again to refresh it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ServiceMetadata(Map<String, Value>);

/// A field declared by a layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Field {
    /// The field name.
    pub name: String,

    /// The field type, e.g. `esriFieldTypeString`.
    #[serde(rename = "type")]
    pub r#type: String,

    /// The display alias.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
}

impl ServiceMetadata {
    /// Creates metadata from a JSON object.
    pub fn new(object: Map<String, Value>) -> ServiceMetadata {
        ServiceMetadata(object)
    }

    /// Returns the max record count, the most features one query can return.
    ///
    /// Servers don't agree on this key's spelling, so it's found by pattern.
    /// Exactly one key must match.
    ///
    /// # Examples
    ///
    /// ```
    /// use restfeature::ServiceMetadata;
    /// use serde_json::json;
    ///
    /// let metadata: ServiceMetadata = serde_json::from_value(json!({"maxRecordCount": 100})).unwrap();
    /// assert_eq!(metadata.max_record_count().unwrap(), 100);
    /// ```
    pub fn max_record_count(&self) -> Result<i64> {
        let (key, value) = self.single_match(&MAX_RECORD_COUNT, MAX_RECORD_COUNT_PATTERN)?;
        value.as_i64().ok_or_else(|| Error::InvalidValue {
            key: key.to_string(),
            value: value.clone(),
        })
    }

    /// Returns the name.
    ///
    /// # Examples
    ///
    /// ```
    /// use restfeature::ServiceMetadata;
    /// use serde_json::json;
    ///
    /// let metadata: ServiceMetadata = serde_json::from_value(json!({"name": "Beaches"})).unwrap();
    /// assert_eq!(metadata.name().unwrap(), "Beaches");
    /// ```
    pub fn name(&self) -> Result<&str> {
        let (key, value) = self.single_match(&NAME, NAME_PATTERN)?;
        value.as_str().ok_or_else(|| Error::InvalidValue {
            key: key.to_string(),
            value: value.clone(),
        })
    }

    /// Returns the declared fields.
    ///
    /// Tables and group layers may not declare any, which is an empty list.
    pub fn fields(&self) -> Result<Vec<Field>> {
        match self.0.get("fields") {
            None | Some(Value::Null) => Ok(Vec::new()),
            Some(value) => serde_json::from_value(value.clone()).map_err(Error::from),
        }
    }

    /// Returns the names of the declared fields.
    pub fn field_names(&self) -> Result<Vec<String>> {
        Ok(self.fields()?.into_iter().map(|field| field.name).collect())
    }

    /// Returns the layer type, e.g. `Feature Layer`.
    pub fn layer_type(&self) -> Option<&str> {
        self.0.get("type").and_then(Value::as_str)
    }

    /// Returns true if this is a feature layer.
    pub fn is_feature_layer(&self) -> bool {
        self.layer_type() == Some(FEATURE_LAYER)
    }

    /// Returns the layer's spatial reference.
    ///
    /// This is the extent's reference, falling back to a top-level
    /// `spatialReference` (which services report).
    pub fn spatial_reference(&self) -> Option<SpatialReference> {
        self.0
            .get("extent")
            .and_then(|extent| extent.get("spatialReference"))
            .or_else(|| self.0.get("spatialReference"))
            .and_then(|value| serde_json::from_value(value.clone()).ok())
    }

    /// Consumes this metadata and returns the underlying object.
    pub fn into_inner(self) -> Map<String, Value> {
        self.0
    }

    fn single_match(&self, regex: &Regex, pattern: &'static str) -> Result<(&str, &Value)> {
        let mut matches: Vec<(&str, &Value)> = self
            .0
            .iter()
            .filter(|(key, _)| regex.is_match(key))
            .map(|(key, value)| (key.as_str(), value))
            .collect();
        if matches.len() == 1 {
            Ok(matches.remove(0))
        } else {
            Err(Error::NotFoundField {
                pattern,
                matches: matches.into_iter().map(|(key, _)| key.to_string()).collect(),
            })
        }
    }
}

impl Field {
    /// Returns the type without its `esriFieldType` prefix.
    ///
    /// # Examples
    ///
    /// ```
    /// use restfeature::Field;
    ///
    /// let field = Field { name: "CITY".to_string(), r#type: "esriFieldTypeString".to_string(), alias: None };
    /// assert_eq!(field.short_type(), "String");
    /// ```
    pub fn short_type(&self) -> &str {
        self.r#type
            .strip_prefix(FIELD_TYPE_PREFIX)
            .unwrap_or(&self.r#type)
    }
}

impl Deref for ServiceMetadata {
    type Target = Map<String, Value>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl From<Map<String, Value>> for ServiceMetadata {
    fn from(object: Map<String, Value>) -> ServiceMetadata {
        ServiceMetadata(object)
    }
}
