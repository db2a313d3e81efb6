//! Page whole feature collections out of [ArcGIS REST](https://developers.arcgis.com/rest/services-reference/enterprise/feature-service/)
//! feature services.
//!
//! A server returns at most `maxRecordCount` features per query. To get
//! everything, this crate plans one query per page (an offset), fetches the
//! pages (chunks) concurrently, and concatenates them, in offset order, into
//! one [FeatureTable]. Every chunk must have the same [SpatialReference].
//!
//! # Examples
//!
//! Everything goes through a [Client], which owns the connection pool:
//!
//! ```no_run
//! use restfeature::{Client, QueryParameters};
//!
//! let client = Client::new().unwrap();
//! let url = "https://maps1.vcgov.org/arcgis/rest/services/Beaches/MapServer/6";
//! let table = tokio_test::block_on(async {
//!     client.features(url, &QueryParameters::new()).await.unwrap()
//! });
//! println!("{} features in {:?}", table.len(), table.spatial_reference());
//! ```
//!
//! A [FeatureLayer] keeps a layer's metadata and count around, and has
//! convenience queries:
//!
//! ```no_run
//! use restfeature::{Client, FeatureLayer};
//!
//! let client = Client::new().unwrap();
//! let url = "https://maps1.vcgov.org/arcgis/rest/services/Beaches/MapServer/6";
//! tokio_test::block_on(async {
//!     let layer = FeatureLayer::from_url(&client, url).await.unwrap();
//!     for value_count in layer.value_counts("CITY").await.unwrap() {
//!         println!("{}: {}", value_count.value, value_count.count);
//!     }
//! });
//! ```
//!
//! Planning offsets doesn't need a server:
//!
//! ```
//! let offsets: Vec<u64> = restfeature::offsets(500, 100).unwrap().collect();
//! assert_eq!(offsets, vec![0, 100, 200, 300, 400]);
//! ```

#![warn(unused_crate_dependencies)]

mod client;
pub mod directory;
mod error;
mod esri;
mod format;
mod layer;
mod metadata;
mod offsets;
mod query;
mod spatial_reference;
pub mod statistics;
mod table;

pub use {
    client::{Client, DEFAULT_CONCURRENCY},
    directory::Directory,
    error::{Error, ErrorKind},
    format::Format,
    layer::FeatureLayer,
    metadata::{FEATURE_LAYER, Field, ServiceMetadata},
    offsets::{Offsets, offsets},
    query::{DEFAULT_WHERE, OutFields, QueryParameters, and_where, where_in},
    spatial_reference::{SpatialReference, WGS84},
    statistics::{NestedCount, UniqueValues, ValueCount},
    table::FeatureTable,
};

/// Crate-specific result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Returns a string suitable for use as a HTTP user agent.
pub fn user_agent() -> &'static str {
    concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"))
}

#[cfg(test)]
use tokio_test as _;
