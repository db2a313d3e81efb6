use crate::{Error, Format, Result};
use indexmap::IndexMap;
use std::{fmt::Display, str::FromStr};

/// The default where clause, which matches every feature.
pub const DEFAULT_WHERE: &str = "1=1";

/// The fields to return from a query.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum OutFields {
    /// All fields (`*`).
    #[default]
    All,

    /// A single named field.
    SingleField(String),

    /// A list of named fields.
    FieldList(Vec<String>),
}

/// Parameters for a layer's `query` endpoint.
///
/// Every option has a default: `where=1=1`, `outFields=*`,
/// `returnGeometry=true`, `returnCountOnly=false`, and `f=json`. The builder
/// methods consume and return the parameters, so a caller's copy is never
/// changed behind its back.
///
/// # Examples
///
/// ```
/// use restfeature::{Format, QueryParameters};
///
/// let params = QueryParameters::new()
///     .where_clause("STATE = 'OH'")
///     .format(Format::GeoJson);
/// let form = params.form();
/// assert!(form.contains(&("where".to_string(), "STATE = 'OH'".to_string())));
/// assert!(form.contains(&("f".to_string(), "geojson".to_string())));
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct QueryParameters {
    /// The where clause.
    pub where_clause: String,

    /// The fields to return.
    pub out_fields: OutFields,

    /// Whether to return geometries.
    pub return_geometry: bool,

    /// Whether to return only the feature count.
    pub return_count_only: bool,

    /// The output format (the `f` parameter).
    pub format: Format,

    /// The index of the first feature to return.
    pub result_offset: Option<u64>,

    /// An access token.
    pub token: Option<String>,

    /// Options without a dedicated field, e.g. `returnDistinctValues`.
    ///
    /// Keys that have a dedicated field are ignored.
    pub extra: IndexMap<String, String>,
}

impl OutFields {
    /// Creates out fields from a list of names.
    ///
    /// An empty list is [OutFields::All] and a single name is
    /// [OutFields::SingleField].
    ///
    /// # Examples
    ///
    /// ```
    /// use restfeature::OutFields;
    ///
    /// assert_eq!(OutFields::from_names(Vec::<String>::new()), OutFields::All);
    /// assert_eq!(OutFields::from_names(["CITY"]), OutFields::SingleField("CITY".to_string()));
    /// ```
    pub fn from_names<I, S>(names: I) -> OutFields
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut names: Vec<String> = names.into_iter().map(Into::into).collect();
        match names.len() {
            0 => OutFields::All,
            1 => OutFields::SingleField(names.remove(0)),
            _ => OutFields::FieldList(names),
        }
    }

    /// Returns the named fields, which is empty for [OutFields::All].
    pub fn names(&self) -> &[String] {
        match self {
            OutFields::All => &[],
            OutFields::SingleField(name) => std::slice::from_ref(name),
            OutFields::FieldList(names) => names,
        }
    }
}

impl Display for OutFields {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutFields::All => f.write_str("*"),
            OutFields::SingleField(name) => f.write_str(name),
            OutFields::FieldList(names) => f.write_str(&names.join(",")),
        }
    }
}

impl FromStr for OutFields {
    type Err = Error;

    fn from_str(s: &str) -> Result<OutFields> {
        let s = s.trim();
        if s == "*" || s.is_empty() {
            return Ok(OutFields::All);
        }
        let names: Vec<&str> = s.split(',').map(str::trim).collect();
        if names.iter().any(|name| name.is_empty() || *name == "*") {
            return Err(Error::InvalidOutFields(s.to_string()));
        }
        Ok(OutFields::from_names(names))
    }
}

impl From<&str> for OutFields {
    fn from(name: &str) -> OutFields {
        OutFields::SingleField(name.to_string())
    }
}

impl From<String> for OutFields {
    fn from(name: String) -> OutFields {
        OutFields::SingleField(name)
    }
}

impl From<Vec<String>> for OutFields {
    fn from(names: Vec<String>) -> OutFields {
        OutFields::FieldList(names)
    }
}

impl QueryParameters {
    /// Creates new query parameters with every default filled in.
    pub fn new() -> QueryParameters {
        QueryParameters::default()
    }

    /// Sets the where clause.
    pub fn where_clause(mut self, where_clause: impl ToString) -> QueryParameters {
        self.where_clause = where_clause.to_string();
        self
    }

    /// Sets the out fields.
    pub fn out_fields(mut self, out_fields: impl Into<OutFields>) -> QueryParameters {
        self.out_fields = out_fields.into();
        self
    }

    /// Sets whether geometries should be returned.
    pub fn return_geometry(mut self, return_geometry: bool) -> QueryParameters {
        self.return_geometry = return_geometry;
        self
    }

    /// Sets whether only the count should be returned.
    pub fn return_count_only(mut self, return_count_only: bool) -> QueryParameters {
        self.return_count_only = return_count_only;
        self
    }

    /// Sets the output format.
    pub fn format(mut self, format: Format) -> QueryParameters {
        self.format = format;
        self
    }

    /// Sets the result offset.
    pub fn result_offset(mut self, result_offset: u64) -> QueryParameters {
        self.result_offset = Some(result_offset);
        self
    }

    /// Sets the access token.
    pub fn token(mut self, token: impl ToString) -> QueryParameters {
        self.token = Some(token.to_string());
        self
    }

    /// Sets the access token if one isn't set already.
    pub fn token_or(mut self, token: Option<&str>) -> QueryParameters {
        if self.token.is_none() {
            self.token = token.map(String::from);
        }
        self
    }

    /// Adds a query option that doesn't have its own field, e.g.
    /// `returnDistinctValues`.
    pub fn extra(mut self, key: impl ToString, value: impl ToString) -> QueryParameters {
        let _ = self.extra.insert(key.to_string(), value.to_string());
        self
    }

    /// Returns these parameters as form key/value pairs.
    ///
    /// The recognized options come first, in a fixed order, followed by any
    /// extra options in insertion order.
    pub fn form(&self) -> Vec<(String, String)> {
        let mut form = vec![
            ("where".to_string(), self.where_clause.clone()),
            ("outFields".to_string(), self.out_fields.to_string()),
            ("returnGeometry".to_string(), self.return_geometry.to_string()),
            ("returnCountOnly".to_string(), self.return_count_only.to_string()),
            ("f".to_string(), self.format.to_string()),
        ];
        if let Some(result_offset) = self.result_offset {
            form.push(("resultOffset".to_string(), result_offset.to_string()));
        }
        if let Some(token) = &self.token {
            form.push(("token".to_string(), token.clone()));
        }
        for (key, value) in &self.extra {
            if !is_managed(key) {
                form.push((key.clone(), value.clone()));
            }
        }
        form
    }
}

impl Default for QueryParameters {
    fn default() -> Self {
        QueryParameters {
            where_clause: DEFAULT_WHERE.to_string(),
            out_fields: OutFields::All,
            return_geometry: true,
            return_count_only: false,
            format: Format::default(),
            result_offset: None,
            token: None,
            extra: IndexMap::new(),
        }
    }
}

fn is_managed(key: &str) -> bool {
    matches!(
        key,
        "where" | "outFields" | "returnGeometry" | "returnCountOnly" | "f" | "resultOffset" | "token"
    )
}

/// Returns a where clause matching any of the values.
///
/// # Examples
///
/// ```
/// assert_eq!(
///     restfeature::where_in("STATE", ["FL", "GA"]),
///     "STATE In ('FL', 'GA')"
/// );
/// ```
pub fn where_in<I, T>(field: &str, values: I) -> String
where
    I: IntoIterator<Item = T>,
    T: Display,
{
    let values = values
        .into_iter()
        .map(|value| format!("'{value}'"))
        .collect::<Vec<_>>()
        .join(", ");
    format!("{field} In ({values})")
}

/// Combines two where clauses with `AND`.
///
/// The default clause (`1=1`) is dropped rather than combined.
///
/// # Examples
///
/// ```
/// assert_eq!(restfeature::and_where("1=1", "CITY = 'X'"), "CITY = 'X'");
/// assert_eq!(restfeature::and_where("A = 1", "B = 2"), "A = 1 AND B = 2");
/// ```
pub fn and_where(current: &str, clause: &str) -> String {
    if current.trim() == DEFAULT_WHERE {
        clause.to_string()
    } else {
        format!("{current} AND {clause}")
    }
}
