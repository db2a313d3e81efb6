//! Distinct values and counts, computed by the server.

use crate::{Client, Error, OutFields, QueryParameters, Result};
use serde::Serialize;
use serde_json::{Map, Value, json};
use std::cmp::Ordering;

/// The distinct values of one or more fields.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum UniqueValues {
    /// The distinct values of a single field.
    Values(Vec<Value>),

    /// The distinct combinations of several fields, one object per row.
    Rows(Vec<Map<String, Value>>),
}

/// How many features have a value.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValueCount {
    /// The value.
    pub value: Value,

    /// The number of features with the value.
    pub count: u64,
}

/// How many features have a pair of values.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NestedCount {
    /// The values, in field order.
    pub values: Vec<Value>,

    /// The number of features with both values.
    pub count: u64,
}

impl UniqueValues {
    /// Returns the number of values (or rows).
    pub fn len(&self) -> usize {
        match self {
            UniqueValues::Values(values) => values.len(),
            UniqueValues::Rows(rows) => rows.len(),
        }
    }

    /// Returns true if there are no values.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Client {
    /// Returns the distinct values of one or more fields.
    ///
    /// A single field returns [UniqueValues::Values]. Several fields return
    /// [UniqueValues::Rows], sorted by `sort_by` if it's given. [OutFields::All]
    /// isn't allowed.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use restfeature::{Client, OutFields};
    ///
    /// let client = Client::new().unwrap();
    /// let url = "https://maps1.vcgov.org/arcgis/rest/services/Beaches/MapServer/6";
    /// let cities = tokio_test::block_on(async {
    ///     client.unique_values(url, &OutFields::from("CITY"), "1=1", None).await.unwrap()
    /// });
    /// ```
    pub async fn unique_values(
        &self,
        url: &str,
        fields: &OutFields,
        where_clause: &str,
        sort_by: Option<&str>,
    ) -> Result<UniqueValues> {
        if fields.names().is_empty() {
            return Err(Error::InvalidOutFields(fields.to_string()));
        }
        let params = statistics_params(where_clause, fields.clone())
            .extra("returnDistinctValues", true);
        let mut rows = attribute_rows(self.query(url, &params).await?)?;
        if let [field] = fields.names() {
            let values = rows
                .iter_mut()
                .map(|row| take_attribute(row, field).unwrap_or(Value::Null))
                .collect();
            Ok(UniqueValues::Values(values))
        } else {
            if let Some(sort_by) = sort_by {
                rows.sort_by(|a, b| {
                    compare(
                        attribute(a, sort_by).unwrap_or(&Value::Null),
                        attribute(b, sort_by).unwrap_or(&Value::Null),
                    )
                });
            }
            Ok(UniqueValues::Rows(rows))
        }
    }

    /// Returns how many features have each value of a field, most common first.
    pub async fn value_counts(
        &self,
        url: &str,
        field: &str,
        where_clause: &str,
    ) -> Result<Vec<ValueCount>> {
        let params = statistics_params(where_clause, OutFields::from(field))
            .extra("outStatistics", out_statistics(&[field])?)
            .extra("groupByFieldsForStatistics", field);
        let count_field = count_field(field);
        let mut value_counts = attribute_rows(self.query(url, &params).await?)?
            .into_iter()
            .map(|mut row| -> Result<ValueCount> {
                Ok(ValueCount {
                    value: take_attribute(&mut row, field).unwrap_or(Value::Null),
                    count: count(&row, &count_field)?,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        value_counts.sort_by(|a, b| b.count.cmp(&a.count));
        Ok(value_counts)
    }

    /// Returns how many features have each pair of values of two fields.
    ///
    /// The result is sorted by the first field's value, then by count with
    /// the most common first.
    pub async fn nested_count(
        &self,
        url: &str,
        fields: [&str; 2],
        where_clause: &str,
    ) -> Result<Vec<NestedCount>> {
        let [first, second] = fields;
        let out_fields = OutFields::from_names(fields);
        let group_by = out_fields.to_string();
        let params = statistics_params(where_clause, out_fields)
            .extra("outStatistics", out_statistics(&fields)?)
            .extra("groupByFieldsForStatistics", group_by);
        let count_field = count_field(second);
        let mut nested_counts = attribute_rows(self.query(url, &params).await?)?
            .into_iter()
            .map(|mut row| -> Result<NestedCount> {
                let count = count(&row, &count_field)?;
                Ok(NestedCount {
                    values: vec![
                        take_attribute(&mut row, first).unwrap_or(Value::Null),
                        take_attribute(&mut row, second).unwrap_or(Value::Null),
                    ],
                    count,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        nested_counts.sort_by(|a, b| {
            compare(&a.values[0], &b.values[0]).then_with(|| b.count.cmp(&a.count))
        });
        Ok(nested_counts)
    }
}

fn statistics_params(where_clause: &str, out_fields: OutFields) -> QueryParameters {
    QueryParameters::new()
        .where_clause(where_clause)
        .out_fields(out_fields)
        .return_geometry(false)
}

fn count_field(field: &str) -> String {
    format!("{field}_count")
}

fn out_statistics(fields: &[&str]) -> Result<String> {
    let statistics: Vec<Value> = fields
        .iter()
        .map(|field| {
            json!({
                "statisticType": "count",
                "onStatisticField": field,
                "outStatisticFieldName": count_field(field),
            })
        })
        .collect();
    serde_json::to_string(&statistics).map_err(Error::from)
}

fn attribute_rows(mut object: Map<String, Value>) -> Result<Vec<Map<String, Value>>> {
    let features = match object.remove("features") {
        Some(Value::Array(features)) => features,
        Some(value) => {
            return Err(Error::InvalidValue {
                key: "features".to_string(),
                value,
            });
        }
        None => return Err(Error::MissingKey("features")),
    };
    features
        .into_iter()
        .map(|feature| match feature {
            Value::Object(mut feature) => match feature.remove("attributes") {
                Some(Value::Object(attributes)) => Ok(attributes),
                _ => Err(Error::MissingKey("attributes")),
            },
            value => Err(Error::InvalidValue {
                key: "features".to_string(),
                value,
            }),
        })
        .collect()
}

/// Some servers change the case of field names in statistics responses.
fn attribute<'a>(row: &'a Map<String, Value>, name: &str) -> Option<&'a Value> {
    row.get(name).or_else(|| {
        row.iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value)
    })
}

fn take_attribute(row: &mut Map<String, Value>, name: &str) -> Option<Value> {
    if let Some(value) = row.remove(name) {
        return Some(value);
    }
    let key = row
        .keys()
        .find(|key| key.eq_ignore_ascii_case(name))
        .cloned()?;
    row.remove(&key)
}

fn count(row: &Map<String, Value>, count_field: &str) -> Result<u64> {
    match attribute(row, count_field) {
        Some(value) => value.as_u64().ok_or_else(|| Error::InvalidValue {
            key: count_field.to_string(),
            value: value.clone(),
        }),
        None => Err(Error::InvalidValue {
            key: count_field.to_string(),
            value: Value::Object(row.clone()),
        }),
    }
}

/// Orders JSON values: nulls, then booleans, numbers and strings.
fn compare(a: &Value, b: &Value) -> Ordering {
    fn rank(value: &Value) -> u8 {
        match value {
            Value::Null => 0,
            Value::Bool(_) => 1,
            Value::Number(_) => 2,
            Value::String(_) => 3,
            Value::Array(_) => 4,
            Value::Object(_) => 5,
        }
    }
    match (a, b) {
        (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
        (Value::Number(a), Value::Number(b)) => a
            .as_f64()
            .partial_cmp(&b.as_f64())
            .unwrap_or(Ordering::Equal),
        (Value::String(a), Value::String(b)) => a.cmp(b),
        _ => rank(a).cmp(&rank(b)),
    }
}
