//! Crawl an ArcGIS Server services directory.

use crate::{Client, DEFAULT_WHERE, Error, Result, ServiceMetadata};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{HashSet, VecDeque};
use tokio::task::JoinSet;

/// Every service and layer under a services directory.
///
/// # Examples
///
/// ```no_run
/// use restfeature::{Client, Directory};
///
/// let client = Client::new().unwrap();
/// let url = "https://maps1.vcgov.org/arcgis/rest/services";
/// let directory = tokio_test::block_on(async {
///     Directory::crawl(&client, url, false).await.unwrap()
/// });
/// for service in &directory.services {
///     println!("{} ({} layers)", service.name, service.layers.len());
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Directory {
    /// The root url.
    pub url: String,

    /// The root listing.
    pub metadata: Map<String, Value>,

    /// The services, in the order they were found.
    pub services: Vec<Service>,
}

/// A map or feature service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Service {
    /// The service name, including any folder prefix.
    pub name: String,

    /// The service type, e.g. `MapServer`.
    #[serde(rename = "type")]
    pub r#type: String,

    /// The service url.
    pub url: String,

    /// The service metadata.
    pub metadata: ServiceMetadata,

    /// The service's layers.
    pub layers: Vec<Layer>,
}

/// A layer found while crawling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Layer {
    /// The layer url.
    pub url: String,

    /// The layer metadata.
    pub metadata: ServiceMetadata,

    /// The number of features, if counts were requested and the layer is a
    /// feature layer.
    ///
    /// A count that couldn't be fetched is `None`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub feature_count: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct ServiceEntry {
    name: String,
    #[serde(rename = "type")]
    r#type: String,
}

impl Directory {
    /// Crawls a services directory.
    ///
    /// Folders are visited once each, breadth first. Services, and each
    /// service's layers, are fetched concurrently and kept in listing order. If `with_counts` is true, feature layers
    /// also get a feature count.
    pub async fn crawl(client: &Client, url: &str, with_counts: bool) -> Result<Directory> {
        let root = url.trim_end_matches('/');
        let metadata = client.get_object(root).await?;
        let mut entries = service_entries(&metadata, None)?;
        let mut folders: VecDeque<String> = folder_names(&metadata)?.into();
        let mut visited = HashSet::new();
        while let Some(folder) = folders.pop_front() {
            if !visited.insert(folder.clone()) {
                continue;
            }
            tracing::info!("crawling folder {folder}");
            let listing = client.get_object(&format!("{root}/{folder}")).await?;
            entries.extend(service_entries(&listing, Some(&folder))?);
            for subfolder in folder_names(&listing)? {
                if subfolder.starts_with(&format!("{folder}/")) {
                    folders.push_back(subfolder);
                } else {
                    folders.push_back(format!("{folder}/{subfolder}"));
                }
            }
        }
        let mut join_set: JoinSet<Result<(usize, Service)>> = JoinSet::new();
        for (i, entry) in entries.into_iter().enumerate() {
            let client = client.clone();
            let url = format!("{root}/{}/{}", entry.name, entry.r#type);
            join_set.spawn(async move {
                let service = Service::fetch(&client, entry, url, with_counts).await?;
                Ok((i, service))
            });
        }
        let mut services = Vec::with_capacity(join_set.len());
        while let Some(result) = join_set.join_next().await {
            services.push(result??);
        }
        services.sort_by_key(|(i, _)| *i);
        let services = services.into_iter().map(|(_, service)| service).collect();
        Ok(Directory {
            url: root.to_string(),
            metadata,
            services,
        })
    }

    /// Returns every layer of every service.
    pub fn layers(&self) -> impl Iterator<Item = &Layer> {
        self.services.iter().flat_map(|service| service.layers.iter())
    }

    /// Returns every feature layer of every service.
    pub fn feature_layers(&self) -> impl Iterator<Item = &Layer> {
        self.layers().filter(|layer| layer.metadata.is_feature_layer())
    }
}

impl Service {
    async fn fetch(
        client: &Client,
        entry: ServiceEntry,
        url: String,
        with_counts: bool,
    ) -> Result<Service> {
        tracing::info!("got service {}", entry.name);
        let metadata = client.metadata(&url).await?;
        let mut join_set: JoinSet<Result<(usize, Layer)>> = JoinSet::new();
        for (i, id) in layer_ids(&metadata)?.into_iter().enumerate() {
            let client = client.clone();
            let url = format!("{url}/{id}");
            join_set.spawn(async move {
                let layer = Layer::fetch(&client, url, with_counts).await?;
                Ok((i, layer))
            });
        }
        let mut layers = Vec::with_capacity(join_set.len());
        while let Some(result) = join_set.join_next().await {
            let (i, layer) = result??;
            layers.push((i, layer));
        }
        layers.sort_by_key(|(i, _)| *i);
        Ok(Service {
            name: entry.name,
            r#type: entry.r#type,
            url,
            metadata,
            layers: layers.into_iter().map(|(_, layer)| layer).collect(),
        })
    }
}

impl Layer {
    async fn fetch(client: &Client, url: String, with_counts: bool) -> Result<Layer> {
        let metadata = client.metadata(&url).await?;
        let feature_count = if with_counts && metadata.is_feature_layer() {
            match client.feature_count(&url, DEFAULT_WHERE).await {
                Ok(count) => Some(count),
                Err(err) => {
                    tracing::warn!("could not count features of {url}: {err}");
                    None
                }
            }
        } else {
            None
        };
        Ok(Layer {
            url,
            metadata,
            feature_count,
        })
    }
}

fn service_entries(listing: &Map<String, Value>, folder: Option<&str>) -> Result<Vec<ServiceEntry>> {
    let Some(services) = listing.get("services") else {
        return Ok(Vec::new());
    };
    let mut entries: Vec<ServiceEntry> = serde_json::from_value(services.clone())?;
    if let Some(folder) = folder {
        for entry in &mut entries {
            if !entry.name.starts_with(&format!("{folder}/")) {
                entry.name = format!("{folder}/{}", entry.name);
            }
        }
    }
    Ok(entries)
}

fn folder_names(listing: &Map<String, Value>) -> Result<Vec<String>> {
    match listing.get("folders") {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(folders) => serde_json::from_value(folders.clone()).map_err(Error::from),
    }
}

fn layer_ids(metadata: &ServiceMetadata) -> Result<Vec<Value>> {
    let Some(layers) = metadata.get("layers").and_then(Value::as_array) else {
        return Ok(Vec::new());
    };
    layers
        .iter()
        .map(|layer| {
            layer.get("id").cloned().ok_or_else(|| Error::InvalidValue {
                key: "layers".to_string(),
                value: layer.clone(),
            })
        })
        .collect()
}
