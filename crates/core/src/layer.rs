use crate::{
    Client, DEFAULT_WHERE, Error, FeatureTable, Field, Format, NestedCount, OutFields,
    QueryParameters, Result, ServiceMetadata, UniqueValues, ValueCount, and_where, where_in,
};
use futures::Stream;
use rand::seq::SliceRandom;
use serde_json::Value;
use std::fmt::Display;
use url::Url;

const DEFAULT_OBJECT_ID_FIELD: &str = "OBJECTID";
const OID_FIELD_TYPE: &str = "esriFieldTypeOID";

/// A prepared feature layer.
///
/// Preparing a layer fetches its metadata and the number of features that
/// match its where clause. Narrowing the where clause returns a new layer.
///
/// # Examples
///
/// ```no_run
/// use restfeature::{Client, FeatureLayer};
///
/// let client = Client::new().unwrap();
/// let url = "https://maps1.vcgov.org/arcgis/rest/services/Beaches/MapServer/6";
/// tokio_test::block_on(async {
///     let layer = FeatureLayer::from_url(&client, url).await.unwrap();
///     let layer = layer.with_where("CITY = 'DAYTONA BEACH'").await.unwrap();
///     let table = layer.features().await.unwrap();
///     println!("{layer}: {} features", table.len());
/// });
/// ```
#[derive(Debug, Clone)]
pub struct FeatureLayer {
    client: Client,
    url: String,
    metadata: ServiceMetadata,
    name: String,
    fields: Vec<Field>,
    params: QueryParameters,
    count: u64,
}

impl FeatureLayer {
    /// Prepares the layer at a url, matching every feature.
    ///
    /// The url must end with the layer id, e.g. `.../FeatureServer/0`.
    pub async fn from_url(client: &Client, url: impl ToString) -> Result<FeatureLayer> {
        let url = url.to_string();
        check_layer_url(&url)?;
        let metadata = client.metadata(&url).await?;
        if !metadata.is_feature_layer() {
            return Err(Error::NotAFeatureLayer(
                metadata.layer_type().map(String::from),
            ));
        }
        let name = metadata.name()?.to_string();
        let fields = metadata.fields()?;
        let params = QueryParameters::new().where_clause(DEFAULT_WHERE);
        let count = client.feature_count(&url, &params.where_clause).await?;
        tracing::info!("prepared {name} ({url}) with {count} features");
        Ok(FeatureLayer {
            client: client.clone(),
            url,
            metadata,
            name,
            fields,
            params,
            count,
        })
    }

    /// Returns a new layer whose features also match `clause`.
    ///
    /// The new layer's feature count is fetched again.
    pub async fn with_where(&self, clause: &str) -> Result<FeatureLayer> {
        let where_clause = and_where(&self.params.where_clause, clause);
        let count = self.client.feature_count(&self.url, &where_clause).await?;
        Ok(FeatureLayer {
            params: self.params.clone().where_clause(where_clause),
            count,
            ..self.clone()
        })
    }

    /// Sets the fields returned with each feature.
    pub fn with_out_fields(mut self, out_fields: impl Into<OutFields>) -> Result<FeatureLayer> {
        let out_fields = out_fields.into();
        self.check_fields(out_fields.names())?;
        self.params = self.params.out_fields(out_fields);
        Ok(self)
    }

    /// Sets the response format used to fetch features.
    pub fn with_format(mut self, format: Format) -> FeatureLayer {
        self.params = self.params.format(format);
        self
    }

    /// Returns the layer url.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Returns the layer name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the layer metadata.
    pub fn metadata(&self) -> &ServiceMetadata {
        &self.metadata
    }

    /// Returns the declared fields.
    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    /// Returns the names of the declared fields.
    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|field| field.name.as_str())
    }

    /// Returns the number of features that match the where clause.
    pub fn count(&self) -> u64 {
        self.count
    }

    /// Returns the where clause.
    pub fn where_clause(&self) -> &str {
        &self.params.where_clause
    }

    /// Returns the parameters used to fetch features.
    pub fn params(&self) -> &QueryParameters {
        &self.params
    }

    /// Fetches every matching feature.
    pub async fn features(&self) -> Result<FeatureTable> {
        let offsets = crate::offsets(self.count, self.metadata.max_record_count()?)?;
        self.client
            .fetch(
                &self.url,
                &self.params,
                offsets,
                self.metadata.spatial_reference(),
            )
            .await
    }

    /// Returns every matching feature, one chunk at a time.
    pub fn chunks(&self) -> impl Stream<Item = Result<FeatureTable>> + '_ {
        let offsets = self
            .metadata
            .max_record_count()
            .and_then(|max_record_count| crate::offsets(self.count, max_record_count));
        async_stream::try_stream! {
            for await chunk in self.client.chunks_at(&self.url, &self.params, offsets?) {
                yield chunk?;
            }
        }
    }

    /// Returns the object ids of the matching features.
    pub async fn object_ids(&self) -> Result<Vec<Value>> {
        let field = OutFields::from(self.object_id_field());
        match self
            .client
            .unique_values(&self.url, &field, self.where_clause(), None)
            .await?
        {
            UniqueValues::Values(values) => Ok(values),
            UniqueValues::Rows(_) => Err(Error::InvalidOutFields(field.to_string())),
        }
    }

    /// Fetches the first `n` features, by object id.
    pub async fn head(&self, n: usize) -> Result<FeatureTable> {
        let mut object_ids = self.object_ids().await?;
        object_ids.truncate(n);
        self.features_with_ids(object_ids).await
    }

    /// Fetches `n` random features, or every feature if there are fewer.
    pub async fn sample(&self, n: usize) -> Result<FeatureTable> {
        let object_ids = self.object_ids().await?;
        let object_ids: Vec<Value> = {
            let mut rng = rand::thread_rng();
            object_ids.choose_multiple(&mut rng, n).cloned().collect()
        };
        self.features_with_ids(object_ids).await
    }

    /// Returns the distinct values of one or more fields.
    pub async fn unique_values(
        &self,
        fields: impl Into<OutFields>,
        sort_by: Option<&str>,
    ) -> Result<UniqueValues> {
        let fields = fields.into();
        self.check_fields(fields.names())?;
        self.check_fields(sort_by)?;
        self.client
            .unique_values(&self.url, &fields, self.where_clause(), sort_by)
            .await
    }

    /// Returns how many features have each value of a field.
    pub async fn value_counts(&self, field: &str) -> Result<Vec<ValueCount>> {
        self.check_fields([field])?;
        self.client
            .value_counts(&self.url, field, self.where_clause())
            .await
    }

    /// Returns how many features have each pair of values of two fields.
    pub async fn nested_count(&self, fields: [&str; 2]) -> Result<Vec<NestedCount>> {
        self.check_fields(fields)?;
        self.client
            .nested_count(&self.url, fields, self.where_clause())
            .await
    }

    fn object_id_field(&self) -> &str {
        self.metadata
            .get("objectIdField")
            .and_then(Value::as_str)
            .or_else(|| {
                self.fields
                    .iter()
                    .find(|field| field.r#type == OID_FIELD_TYPE)
                    .map(|field| field.name.as_str())
            })
            .unwrap_or(DEFAULT_OBJECT_ID_FIELD)
    }

    async fn features_with_ids(&self, object_ids: Vec<Value>) -> Result<FeatureTable> {
        if object_ids.is_empty() {
            return Ok(FeatureTable::new(
                Vec::new(),
                self.metadata.spatial_reference(),
            ));
        }
        let values = object_ids.iter().map(|value| match value {
            Value::String(s) => s.clone(),
            value => value.to_string(),
        });
        let clause = where_in(self.object_id_field(), values);
        self.with_where(&clause).await?.features().await
    }

    fn check_fields<I, S>(&self, names: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for name in names {
            let name = name.as_ref();
            if !self.field_names().any(|field| field == name) {
                return Err(Error::FieldDoesNotExist(name.to_string()));
            }
        }
        Ok(())
    }
}

impl Display for FeatureLayer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.name, self.url)
    }
}

fn check_layer_url(url: &str) -> Result<()> {
    let parsed = Url::parse(url)?;
    let ends_with_id = parsed
        .path()
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .is_some_and(|segment| !segment.is_empty() && segment.bytes().all(|b| b.is_ascii_digit()));
    if ends_with_id {
        Ok(())
    } else {
        Err(Error::InvalidLayerUrl(url.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::FeatureLayer;
    use crate::{Client, Error, ErrorKind};
    use mockito::{Matcher, Mock, Server, ServerGuard};
    use rstest::rstest;
    use serde_json::json;

    async fn mock_layer(server: &mut ServerGuard) -> Vec<Mock> {
        let metadata = server
            .mock("POST", "/Beaches/MapServer/6")
            .with_body(include_str!("../data/beaches-layer.json"))
            .create_async()
            .await;
        let count = server
            .mock("POST", "/Beaches/MapServer/6/query")
            .match_body(Matcher::AllOf(vec![
                Matcher::UrlEncoded("returnCountOnly".into(), "true".into()),
                Matcher::UrlEncoded("where".into(), "1=1".into()),
            ]))
            .with_body(r#"{"count": 3}"#)
            .create_async()
            .await;
        vec![metadata, count]
    }

    async fn layer(server: &mut ServerGuard) -> FeatureLayer {
        let _mocks = mock_layer(server).await;
        let url = format!("{}/Beaches/MapServer/6", server.url());
        FeatureLayer::from_url(&Client::new().unwrap(), url)
            .await
            .unwrap()
    }

    #[rstest]
    #[case("http://example.com/arcgis/rest/services/Beaches/MapServer/6", true)]
    #[case("http://example.com/arcgis/rest/services/Beaches/MapServer/6/", true)]
    #[case("http://example.com/arcgis/rest/services/Beaches/MapServer", false)]
    #[case("http://example.com/arcgis/rest/services/Beaches/MapServer/6a", false)]
    fn layer_url(#[case] url: &str, #[case] ok: bool) {
        assert_eq!(super::check_layer_url(url).is_ok(), ok, "{url}");
    }

    #[tokio::test]
    async fn from_url() {
        let mut server = Server::new_async().await;
        let layer = layer(&mut server).await;
        assert_eq!(layer.name(), "Beaches");
        assert_eq!(layer.count(), 3);
        assert_eq!(layer.where_clause(), "1=1");
        assert_eq!(
            layer.field_names().collect::<Vec<_>>(),
            vec!["OBJECTID", "NAME", "CITY", "STATUS"]
        );
        assert_eq!(
            layer.to_string(),
            format!("Beaches ({}/Beaches/MapServer/6)", server.url())
        );
    }

    #[tokio::test]
    async fn invalid_url_is_rejected_before_any_request() {
        let client = Client::new().unwrap();
        let err = FeatureLayer::from_url(&client, "http://127.0.0.1:1/Beaches/MapServer")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidLayerUrl(_)));
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }

    #[tokio::test]
    async fn not_a_feature_layer() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("POST", "/Beaches/MapServer/0")
            .with_body(json!({"name": "Beaches", "type": "Group Layer"}).to_string())
            .create_async()
            .await;
        let url = format!("{}/Beaches/MapServer/0", server.url());
        let err = FeatureLayer::from_url(&Client::new().unwrap(), url)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotAFeatureLayer(Some(ref t)) if t == "Group Layer"));
    }

    #[tokio::test]
    async fn with_where_composes() {
        let mut server = Server::new_async().await;
        let layer = layer(&mut server).await;
        let _mock = server
            .mock("POST", "/Beaches/MapServer/6/query")
            .match_body(Matcher::UrlEncoded("where".into(), "CITY = 'ORMOND'".into()))
            .with_body(r#"{"count": 2}"#)
            .create_async()
            .await;
        let _mock = server
            .mock("POST", "/Beaches/MapServer/6/query")
            .match_body(Matcher::UrlEncoded(
                "where".into(),
                "CITY = 'ORMOND' AND STATUS = 'OPEN'".into(),
            ))
            .with_body(r#"{"count": 1}"#)
            .create_async()
            .await;
        let ormond = layer.with_where("CITY = 'ORMOND'").await.unwrap();
        assert_eq!(ormond.where_clause(), "CITY = 'ORMOND'");
        assert_eq!(ormond.count(), 2);
        let open = ormond.with_where("STATUS = 'OPEN'").await.unwrap();
        assert_eq!(open.where_clause(), "CITY = 'ORMOND' AND STATUS = 'OPEN'");
        assert_eq!(open.count(), 1);
        assert_eq!(layer.where_clause(), "1=1");
    }

    #[tokio::test]
    async fn unknown_field_is_rejected_before_any_request() {
        let mut server = Server::new_async().await;
        let layer = layer(&mut server).await;
        let statistics = server
            .mock("POST", "/Beaches/MapServer/6/query")
            .match_body(Matcher::UrlEncoded("returnGeometry".into(), "false".into()))
            .expect(0)
            .create_async()
            .await;
        assert!(matches!(
            layer.value_counts("NOPE").await.unwrap_err(),
            Error::FieldDoesNotExist(ref name) if name == "NOPE"
        ));
        assert!(layer.unique_values("CITY", Some("NOPE")).await.is_err());
        assert!(layer.nested_count(["CITY", "NOPE"]).await.is_err());
        assert!(layer.clone().with_out_fields("NOPE").is_err());
        statistics.assert_async().await;
    }

    #[tokio::test]
    async fn features() {
        let mut server = Server::new_async().await;
        let layer = layer(&mut server).await;
        let _mock = server
            .mock("POST", "/Beaches/MapServer/6/query")
            .match_body(Matcher::UrlEncoded("resultOffset".into(), "0".into()))
            .with_body(include_str!("../data/beaches-0.json"))
            .create_async()
            .await;
        let table = layer.features().await.unwrap();
        assert_eq!(table.len(), 3);
    }

    #[tokio::test]
    async fn head() {
        let mut server = Server::new_async().await;
        let layer = layer(&mut server).await;
        let _mock = server
            .mock("POST", "/Beaches/MapServer/6/query")
            .match_body(Matcher::AllOf(vec![
                Matcher::UrlEncoded("returnDistinctValues".into(), "true".into()),
                Matcher::UrlEncoded("outFields".into(), "OBJECTID".into()),
            ]))
            .with_body(
                json!({"features": [
                    {"attributes": {"OBJECTID": 1}},
                    {"attributes": {"OBJECTID": 2}},
                    {"attributes": {"OBJECTID": 3}}
                ]})
                .to_string(),
            )
            .create_async()
            .await;
        let _mock = server
            .mock("POST", "/Beaches/MapServer/6/query")
            .match_body(Matcher::AllOf(vec![
                Matcher::UrlEncoded("returnCountOnly".into(), "true".into()),
                Matcher::UrlEncoded("where".into(), "OBJECTID In ('1', '2')".into()),
            ]))
            .with_body(r#"{"count": 2}"#)
            .create_async()
            .await;
        let chunk = server
            .mock("POST", "/Beaches/MapServer/6/query")
            .match_body(Matcher::AllOf(vec![
                Matcher::UrlEncoded("resultOffset".into(), "0".into()),
                Matcher::UrlEncoded("where".into(), "OBJECTID In ('1', '2')".into()),
            ]))
            .with_body(
                json!({
                    "spatialReference": {"wkid": 2236},
                    "features": [
                        {"attributes": {"OBJECTID": 1}, "geometry": {"x": 1.0, "y": 1.0}},
                        {"attributes": {"OBJECTID": 2}, "geometry": {"x": 2.0, "y": 2.0}}
                    ]
                })
                .to_string(),
            )
            .expect(1)
            .create_async()
            .await;
        let table = layer.head(2).await.unwrap();
        chunk.assert_async().await;
        assert_eq!(table.len(), 2);
        let table = layer.head(0).await.unwrap();
        assert!(table.is_empty());
    }
}
