use crate::{Error, Result, SpatialReference};
use geojson::{Feature, FeatureCollection, JsonObject};
use serde_json::Value;

/// Features with one shared spatial reference.
///
/// Each feature is a row: its properties are the attribute columns and its
/// geometry is the geometry column. A single page of a query (a chunk) and the
/// concatenation of every page are both feature tables.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeatureTable {
    features: Vec<Feature>,
    spatial_reference: Option<SpatialReference>,
}

impl FeatureTable {
    /// Creates a new feature table.
    ///
    /// # Examples
    ///
    /// ```
    /// use restfeature::{FeatureTable, SpatialReference};
    ///
    /// let table = FeatureTable::new(Vec::new(), Some(SpatialReference::wgs84()));
    /// assert!(table.is_empty());
    /// ```
    pub fn new(
        features: Vec<Feature>,
        spatial_reference: Option<SpatialReference>,
    ) -> FeatureTable {
        FeatureTable {
            features,
            spatial_reference,
        }
    }

    /// Concatenates chunks, in order, into one table.
    ///
    /// Every chunk must have the same spatial reference. If one doesn't, an
    /// error is returned and nothing is merged. With no chunks, the result is
    /// an empty table with the `fallback` reference, which is usually the
    /// originating layer's.
    ///
    /// # Examples
    ///
    /// ```
    /// use geojson::Feature;
    /// use restfeature::{FeatureTable, SpatialReference};
    ///
    /// let chunks = vec![
    ///     FeatureTable::new(vec![Feature::default(); 2], Some(SpatialReference::wgs84())),
    ///     FeatureTable::new(vec![Feature::default(); 3], Some(SpatialReference::wgs84())),
    /// ];
    /// let table = FeatureTable::concat(chunks, None).unwrap();
    /// assert_eq!(table.len(), 5);
    /// ```
    pub fn concat(
        chunks: impl IntoIterator<Item = FeatureTable>,
        fallback: Option<SpatialReference>,
    ) -> Result<FeatureTable> {
        let chunks: Vec<FeatureTable> = chunks.into_iter().collect();
        let Some(first) = chunks.first() else {
            return Ok(FeatureTable::new(Vec::new(), fallback));
        };
        let spatial_reference = first.spatial_reference.clone();
        if let Some(chunk) = chunks
            .iter()
            .find(|chunk| chunk.spatial_reference != spatial_reference)
        {
            return Err(Error::InconsistentSpatialReference {
                expected: spatial_reference,
                actual: chunk.spatial_reference.clone(),
            });
        }
        let len = chunks.iter().map(FeatureTable::len).sum();
        let mut features = Vec::with_capacity(len);
        for chunk in chunks {
            features.extend(chunk.features);
        }
        Ok(FeatureTable::new(features, spatial_reference))
    }

    /// Appends another table's rows after this table's rows.
    ///
    /// The spatial references must match. On error, neither table is changed.
    ///
    /// # Examples
    ///
    /// ```
    /// use geojson::Feature;
    /// use restfeature::{FeatureTable, SpatialReference};
    ///
    /// let mut table = FeatureTable::new(vec![Feature::default()], Some(SpatialReference::wgs84()));
    /// let other = FeatureTable::new(vec![Feature::default()], Some(SpatialReference::from_epsg(3857)));
    /// assert!(table.append(other).is_err());
    /// assert_eq!(table.len(), 1);
    /// ```
    pub fn append(&mut self, other: FeatureTable) -> Result<()> {
        if self.spatial_reference != other.spatial_reference {
            return Err(Error::InconsistentSpatialReference {
                expected: self.spatial_reference.clone(),
                actual: other.spatial_reference,
            });
        }
        self.features.extend(other.features);
        Ok(())
    }

    /// Returns the number of rows.
    pub fn len(&self) -> usize {
        self.features.len()
    }

    /// Returns true if there are no rows.
    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    /// Returns the rows.
    pub fn features(&self) -> &[Feature] {
        &self.features
    }

    /// Consumes this table and returns its rows.
    pub fn into_features(self) -> Vec<Feature> {
        self.features
    }

    /// Returns the spatial reference.
    pub fn spatial_reference(&self) -> Option<&SpatialReference> {
        self.spatial_reference.as_ref()
    }

    /// Returns one attribute column, with `None` for rows without the attribute.
    ///
    /// # Examples
    ///
    /// ```
    /// use restfeature::Format;
    ///
    /// let bytes = br#"{"features": [{"attributes": {"CITY": "DAYTONA"}}, {"attributes": {}}]}"#;
    /// let table = Format::EsriJson.from_bytes(bytes).unwrap();
    /// let cities: Vec<_> = table.column("CITY").collect();
    /// assert_eq!(cities[0].unwrap(), "DAYTONA");
    /// assert!(cities[1].is_none());
    /// ```
    pub fn column<'a>(&'a self, name: &'a str) -> impl Iterator<Item = Option<&'a Value>> + 'a {
        self.features.iter().map(move |feature| feature.property(name))
    }
}

impl IntoIterator for FeatureTable {
    type Item = Feature;
    type IntoIter = std::vec::IntoIter<Feature>;

    fn into_iter(self) -> Self::IntoIter {
        self.features.into_iter()
    }
}

impl From<FeatureTable> for FeatureCollection {
    fn from(table: FeatureTable) -> FeatureCollection {
        let foreign_members = table
            .spatial_reference
            .as_ref()
            .filter(|spatial_reference| !spatial_reference.is_wgs84())
            .and_then(SpatialReference::to_geojson_crs)
            .map(|crs| {
                let mut members = JsonObject::new();
                let _ = members.insert("crs".to_string(), crs);
                members
            });
        FeatureCollection {
            bbox: None,
            features: table.features,
            foreign_members,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::FeatureTable;
    use crate::{Error, ErrorKind, SpatialReference};
    use geojson::{Feature, FeatureCollection, JsonObject};
    use rstest::rstest;
    use serde_json::Value;

    fn chunk(start: usize, len: usize, spatial_reference: Option<SpatialReference>) -> FeatureTable {
        let features = (start..start + len)
            .map(|i| {
                let mut properties = JsonObject::new();
                let _ = properties.insert("row".to_string(), Value::from(i));
                Feature {
                    properties: Some(properties),
                    ..Default::default()
                }
            })
            .collect();
        FeatureTable::new(features, spatial_reference)
    }

    fn rows(table: &FeatureTable) -> Vec<u64> {
        table
            .column("row")
            .map(|value| value.and_then(Value::as_u64).unwrap())
            .collect()
    }

    #[rstest]
    #[case(vec![])]
    #[case(vec![3])]
    #[case(vec![100, 100, 100, 100, 100])]
    #[case(vec![2, 0, 5, 1])]
    fn concat_preserves_chunk_order(#[case] sizes: Vec<usize>) {
        let wgs84 = Some(SpatialReference::wgs84());
        let mut start = 0;
        let mut chunks = Vec::new();
        for size in &sizes {
            chunks.push(chunk(start, *size, wgs84.clone()));
            start += size;
        }
        let table = FeatureTable::concat(chunks, wgs84).unwrap();
        assert_eq!(table.len(), sizes.iter().sum::<usize>());
        assert_eq!(rows(&table), (0..start as u64).collect::<Vec<_>>());
    }

    #[test]
    fn concat_nothing_uses_fallback() {
        let table = FeatureTable::concat(Vec::new(), Some(SpatialReference::from_epsg(2236))).unwrap();
        assert!(table.is_empty());
        assert_eq!(table.spatial_reference().unwrap().epsg(), Some(2236));

        let table = FeatureTable::concat(Vec::new(), None).unwrap();
        assert!(table.spatial_reference().is_none());
    }

    #[test]
    fn concat_inconsistent_spatial_reference() {
        let chunks = vec![
            chunk(0, 2, Some(SpatialReference::wgs84())),
            chunk(2, 2, Some(SpatialReference::wgs84())),
            chunk(4, 2, Some(SpatialReference::from_epsg(3857))),
        ];
        let err = FeatureTable::concat(chunks, None).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
        match err {
            Error::InconsistentSpatialReference { expected, actual } => {
                assert_eq!(expected, Some(SpatialReference::wgs84()));
                assert_eq!(actual, Some(SpatialReference::from_epsg(3857)));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn missing_reference_is_not_a_match() {
        let chunks = vec![chunk(0, 1, Some(SpatialReference::wgs84())), chunk(1, 1, None)];
        assert!(FeatureTable::concat(chunks, None).is_err());
    }

    #[test]
    fn pairwise_append_matches_concat() {
        let wgs84 = Some(SpatialReference::wgs84());
        let chunks = vec![
            chunk(0, 3, wgs84.clone()),
            chunk(3, 4, wgs84.clone()),
            chunk(7, 1, wgs84.clone()),
        ];
        let mut folded = FeatureTable::new(Vec::new(), wgs84.clone());
        for chunk in chunks.clone() {
            folded.append(chunk).unwrap();
        }
        assert_eq!(folded, FeatureTable::concat(chunks, wgs84).unwrap());
    }

    #[test]
    fn into_feature_collection() {
        let collection = FeatureCollection::from(chunk(0, 2, Some(SpatialReference::wgs84())));
        assert_eq!(collection.features.len(), 2);
        assert!(collection.foreign_members.is_none());

        let collection = FeatureCollection::from(chunk(0, 2, Some(SpatialReference::from_epsg(2236))));
        let crs = collection.foreign_members.unwrap().remove("crs").unwrap();
        assert_eq!(
            SpatialReference::from_geojson_crs(&crs),
            Some(SpatialReference::from_epsg(2236))
        );
    }
}
