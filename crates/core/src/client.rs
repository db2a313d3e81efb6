use crate::{
    Error, FeatureTable, Offsets, QueryParameters, Result, ServiceMetadata, SpatialReference,
};
use async_stream::try_stream;
use futures::{Stream, StreamExt, TryStreamExt, stream};
use serde_json::{Map, Value};

/// The default number of chunks fetched at the same time.
pub const DEFAULT_CONCURRENCY: usize = 8;

/// A client for ArcGIS REST feature services.
///
/// The client owns one connection pool, which every request shares. It is
/// cheap to clone, and clones share the pool.
///
/// # Examples
///
/// ```
/// use restfeature::Client;
///
/// let client = Client::new().unwrap().with_token("a-token").with_concurrency(4);
/// ```
#[derive(Debug, Clone)]
pub struct Client {
    http: reqwest::Client,
    token: Option<String>,
    concurrency: usize,
}

impl Client {
    /// Creates a new client with its own connection pool.
    pub fn new() -> Result<Client> {
        let http = reqwest::Client::builder()
            .user_agent(crate::user_agent())
            .build()?;
        Ok(Client::with_client(http))
    }

    /// Creates a new client that uses an already-configured [reqwest::Client],
    /// e.g. one with timeouts.
    pub fn with_client(http: reqwest::Client) -> Client {
        Client {
            http,
            token: None,
            concurrency: DEFAULT_CONCURRENCY,
        }
    }

    /// Sets the access token sent with every request.
    pub fn with_token(mut self, token: impl ToString) -> Client {
        self.token = Some(token.to_string());
        self
    }

    /// Sets how many chunks are fetched at the same time.
    ///
    /// Zero is treated as one.
    pub fn with_concurrency(mut self, concurrency: usize) -> Client {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Returns the access token, if there is one.
    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    /// Returns how many chunks are fetched at the same time.
    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Fetches a layer's (or service's) metadata.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use restfeature::Client;
    ///
    /// let client = Client::new().unwrap();
    /// let url = "https://maps1.vcgov.org/arcgis/rest/services/Beaches/MapServer/6";
    /// let metadata = tokio_test::block_on(async { client.metadata(url).await.unwrap() });
    /// println!("{}", metadata.name().unwrap());
    /// ```
    pub async fn metadata(&self, url: &str) -> Result<ServiceMetadata> {
        self.metadata_with_token(url, self.token()).await
    }

    async fn metadata_with_token(
        &self,
        url: &str,
        token: Option<&str>,
    ) -> Result<ServiceMetadata> {
        let mut form = vec![("f".to_string(), "json".to_string())];
        if let Some(token) = token {
            form.push(("token".to_string(), token.to_string()));
        }
        tracing::debug!("fetching metadata from {url}");
        let object = self.post_object(url, &form).await?;
        Ok(ServiceMetadata::new(object))
    }

    /// Returns the number of features that match a where clause.
    pub async fn feature_count(&self, url: &str, where_clause: &str) -> Result<u64> {
        self.feature_count_with_token(url, where_clause, self.token())
            .await
    }

    async fn feature_count_with_token(
        &self,
        url: &str,
        where_clause: &str,
        token: Option<&str>,
    ) -> Result<u64> {
        let params = QueryParameters::new()
            .where_clause(where_clause)
            .return_count_only(true)
            .token_or(token);
        let form = vec![
            ("where".to_string(), params.where_clause),
            ("returnCountOnly".to_string(), "true".to_string()),
            ("f".to_string(), "json".to_string()),
        ]
        .into_iter()
        .chain(params.token.map(|token| ("token".to_string(), token)))
        .collect::<Vec<_>>();
        let object = self.post_object(&query_url(url), &form).await?;
        object
            .get("count")
            .and_then(Value::as_u64)
            .ok_or(Error::MissingKey("count"))
    }

    /// Plans the offsets needed to fetch every feature matching a where clause.
    ///
    /// This fetches both the metadata (for the max record count) and the
    /// feature count.
    pub async fn offsets(&self, url: &str, where_clause: &str) -> Result<Offsets> {
        let metadata = self.metadata(url).await?;
        let feature_count = self.feature_count(url, where_clause).await?;
        plan(&metadata, feature_count)
    }

    /// Fetches the metadata and plans offsets, authenticating with the
    /// token in `params` if there is one, else the client's.
    async fn prepare(
        &self,
        url: &str,
        params: &QueryParameters,
    ) -> Result<(ServiceMetadata, Offsets)> {
        let token = params.token.as_deref().or(self.token());
        let metadata = self.metadata_with_token(url, token).await?;
        let feature_count = self
            .feature_count_with_token(url, &params.where_clause, token)
            .await?;
        let offsets = plan(&metadata, feature_count)?;
        Ok((metadata, offsets))
    }

    /// Fetches one chunk, the features starting at `offset`.
    pub async fn chunk(
        &self,
        url: &str,
        params: &QueryParameters,
        offset: u64,
    ) -> Result<FeatureTable> {
        let params = params
            .clone()
            .result_offset(offset)
            .token_or(self.token());
        tracing::debug!("fetching chunk from {url} at offset={offset}");
        let value = self.post(&query_url(url), &params.form()).await?;
        let chunk = params.format.from_value(value)?;
        tracing::debug!("got {} features at offset={offset}", chunk.len());
        Ok(chunk)
    }

    /// Returns every matching feature, one chunk at a time, in offset order.
    ///
    /// Chunks are fetched one after another as the stream is polled.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use futures::TryStreamExt;
    /// use restfeature::{Client, QueryParameters};
    ///
    /// let client = Client::new().unwrap();
    /// let url = "https://maps1.vcgov.org/arcgis/rest/services/Beaches/MapServer/6";
    /// let params = QueryParameters::new();
    /// tokio_test::block_on(async {
    ///     let chunks: Vec<_> = client.chunks(url, &params).try_collect().await.unwrap();
    /// });
    /// ```
    pub fn chunks<'a>(
        &'a self,
        url: &'a str,
        params: &'a QueryParameters,
    ) -> impl Stream<Item = Result<FeatureTable>> + 'a {
        try_stream! {
            let (_, offsets) = self.prepare(url, params).await?;
            for offset in offsets {
                yield self.chunk(url, params, offset).await?;
            }
        }
    }

    /// Returns the chunks at the given offsets, one at a time, in order.
    pub fn chunks_at<'a>(
        &'a self,
        url: &'a str,
        params: &'a QueryParameters,
        offsets: Offsets,
    ) -> impl Stream<Item = Result<FeatureTable>> + 'a {
        try_stream! {
            for offset in offsets {
                yield self.chunk(url, params, offset).await?;
            }
        }
    }

    /// Fetches every matching feature into one table.
    ///
    /// Chunks are fetched concurrently and concatenated in offset order. If
    /// any chunk fails, the whole fetch fails.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use restfeature::{Client, QueryParameters};
    ///
    /// let client = Client::new().unwrap();
    /// let url = "https://maps1.vcgov.org/arcgis/rest/services/Beaches/MapServer/6";
    /// let params = QueryParameters::new().where_clause("CITY = 'DAYTONA BEACH'");
    /// let table = tokio_test::block_on(async { client.features(url, &params).await.unwrap() });
    /// println!("{} features", table.len());
    /// ```
    pub async fn features(&self, url: &str, params: &QueryParameters) -> Result<FeatureTable> {
        let (metadata, offsets) = self.prepare(url, params).await?;
        self.fetch(url, params, offsets, metadata.spatial_reference())
            .await
    }

    /// Fetches the chunks at the given offsets and concatenates them.
    ///
    /// `fallback` is the spatial reference of the result if there are no
    /// offsets.
    pub async fn fetch(
        &self,
        url: &str,
        params: &QueryParameters,
        offsets: Offsets,
        fallback: Option<SpatialReference>,
    ) -> Result<FeatureTable> {
        let chunks: Vec<FeatureTable> = stream::iter(offsets)
            .map(|offset| self.chunk(url, params, offset))
            .buffered(self.concurrency)
            .try_collect()
            .await?;
        FeatureTable::concat(chunks, fallback)
    }

    /// Sends a query with arbitrary form parameters and returns the JSON
    /// object, for queries that don't return features (e.g. statistics).
    pub async fn query(&self, url: &str, params: &QueryParameters) -> Result<Map<String, Value>> {
        let params = params.clone().token_or(self.token());
        self.post_object(&query_url(url), &params.form()).await
    }

    /// Gets a JSON object, with `f=json`.
    ///
    /// Directories are read this way, rather than with a POST.
    pub async fn get_object(&self, url: &str) -> Result<Map<String, Value>> {
        let mut query = vec![("f", "json")];
        if let Some(token) = self.token() {
            query.push(("token", token));
        }
        tracing::debug!("getting {url}");
        let value: Value = self
            .http
            .get(url)
            .query(&query)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        into_object(check(value)?)
    }

    async fn post(&self, url: &str, form: &[(String, String)]) -> Result<Value> {
        let value: Value = self
            .http
            .post(url)
            .form(form)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        check(value)
    }

    async fn post_object(&self, url: &str, form: &[(String, String)]) -> Result<Map<String, Value>> {
        let value = self.post(url, form).await?;
        into_object(value)
    }
}

/// Plans offsets from a layer's metadata and a feature count.
fn plan(metadata: &ServiceMetadata, feature_count: u64) -> Result<Offsets> {
    let max_record_count = metadata.max_record_count()?;
    let offsets = crate::offsets(feature_count, max_record_count)?;
    tracing::info!(
        "planned {} chunks for {feature_count} features (max record count: {max_record_count})",
        offsets.len()
    );
    Ok(offsets)
}

/// Returns the query endpoint of a layer.
pub(crate) fn query_url(url: &str) -> String {
    format!("{}/query", url.trim_end_matches('/'))
}

/// Turns a `{"error": {...}}` body into an error.
fn check(value: Value) -> Result<Value> {
    match value.get("error") {
        Some(error) if error.is_object() => Err(Error::Server {
            code: error.get("code").and_then(Value::as_i64).unwrap_or_default(),
            message: error
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
        }),
        _ => Ok(value),
    }
}

fn into_object(value: Value) -> Result<Map<String, Value>> {
    match value {
        Value::Object(object) => Ok(object),
        value => Err(Error::InvalidValue {
            key: "response".to_string(),
            value,
        }),
    }
}
