// The verbosity stuff is cribbed from https://github.com/clap-rs/clap-verbosity-flag/blob/c621a6a8a7c0b6df8f1464a985a5d076b4915693/src/lib.rs and updated for tracing

#![deny(unused_crate_dependencies)]

use anyhow::{Result, anyhow};
use clap::{Parser, Subcommand};
use futures_util::{TryStreamExt, pin_mut};
use geojson::FeatureCollection;
use restfeature::{
    Client, DEFAULT_CONCURRENCY, DEFAULT_WHERE, Directory, FeatureLayer, Format, OutFields,
};
use serde_json::json;
use std::io::Write;
use tracing::metadata::Level;
use tracing_indicatif::IndicatifLayer;
use tracing_subscriber::{
    Layer, filter::LevelFilter, layer::SubscriberExt, util::SubscriberInitExt,
};

/// restfeature: Page whole feature collections out of ArcGIS REST feature services
#[derive(Debug, Parser)]
pub struct Restfeature {
    #[command(subcommand)]
    command: Command,

    /// An access token, sent with every request.
    #[arg(long = "token", global = true, env = "RESTFEATURE_TOKEN")]
    token: Option<String>,

    /// The number of chunks to fetch at the same time.
    #[arg(long = "concurrency", global = true, default_value_t = DEFAULT_CONCURRENCY)]
    concurrency: usize,

    /// Whether to print compact JSON output.
    ///
    /// By default, JSON output will printed "compact" if it is being output to a file, and printed "pretty" if it is being output to standard output.
    /// Use this argument to force one or the other.
    #[arg(short = 'c', long = "compact-json", global = true)]
    compact_json: Option<bool>,

    #[arg(
        long,
        short = 'v',
        action = clap::ArgAction::Count,
        global = true,
        help = ErrorLevel::verbose_help(),
        long_help = ErrorLevel::verbose_long_help(),
    )]
    verbose: u8,

    #[arg(
        long,
        short = 'q',
        action = clap::ArgAction::Count,
        global = true,
        help = ErrorLevel::quiet_help(),
        long_help = ErrorLevel::quiet_long_help(),
        conflicts_with = "verbose",
    )]
    quiet: u8,
}

/// A restfeature subcommand.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Prints a summary of a feature layer: name, count, fields, and limits.
    Info {
        /// The layer url, ending with the layer id.
        url: String,

        /// Print the metadata exactly as the server returned it.
        #[arg(long = "raw", default_value_t = false)]
        raw: bool,
    },

    /// Prints the number of features that match a where clause.
    Count {
        /// The layer url, ending with the layer id.
        url: String,

        /// The where clause.
        #[arg(short = 'w', long = "where", default_value = DEFAULT_WHERE)]
        where_clause: String,
    },

    /// Prints the offsets used to page through a layer.
    Offsets {
        /// The number of features.
        feature_count: u64,

        /// The most features one query can return.
        #[arg(allow_negative_numbers = true)]
        max_record_count: i64,
    },

    /// Fetches features as a GeoJSON feature collection.
    Get {
        /// The layer url, ending with the layer id.
        url: String,

        /// The output file.
        ///
        /// To write to standard output, pass `-` or don't provide an argument at all.
        outfile: Option<String>,

        /// The where clause.
        #[arg(short = 'w', long = "where", default_value = DEFAULT_WHERE)]
        where_clause: String,

        /// Comma-delimited list of fields to return, or `*` for all of them.
        #[arg(long = "out-fields")]
        out_fields: Option<OutFields>,

        /// The format to request from the server.
        ///
        /// Possible values (default: json):
        ///
        /// - json (Esri JSON)
        /// - geojson
        #[arg(short = 'f', long = "format", verbatim_doc_comment)]
        format: Option<Format>,

        /// Only fetch the first n features, by object id.
        #[arg(long = "head", conflicts_with = "sample")]
        head: Option<usize>,

        /// Only fetch n random features.
        #[arg(long = "sample")]
        sample: Option<usize>,

        /// Print each chunk as soon as it arrives, one compact feature collection per line.
        #[arg(long = "stream", conflicts_with_all = ["outfile", "head", "sample"])]
        stream: bool,
    },

    /// Prints the distinct values of one or more fields.
    Values {
        /// The layer url, ending with the layer id.
        url: String,

        /// Comma-delimited list of fields.
        fields: OutFields,

        /// The field to sort rows by, when there's more than one field.
        #[arg(long = "sort-by")]
        sort_by: Option<String>,

        /// The where clause.
        #[arg(short = 'w', long = "where", default_value = DEFAULT_WHERE)]
        where_clause: String,
    },

    /// Prints how many features have each value of a field.
    Counts {
        /// The layer url, ending with the layer id.
        url: String,

        /// The field to count.
        field: String,

        /// A second field, to count each pair of values.
        #[arg(long = "nested")]
        nested: Option<String>,

        /// The where clause.
        #[arg(short = 'w', long = "where", default_value = DEFAULT_WHERE)]
        where_clause: String,
    },

    /// Crawls a services directory, e.g. `https://host/arcgis/rest/services`.
    Crawl {
        /// The directory url.
        url: String,

        /// The output file.
        ///
        /// To write to standard output, pass `-` or don't provide an argument at all.
        outfile: Option<String>,

        /// Count the features of each feature layer.
        #[arg(long = "counts", default_value_t = false)]
        counts: bool,
    },
}

#[derive(Copy, Clone, Debug, Default)]
struct ErrorLevel;

impl Restfeature {
    /// Runs this command.
    ///
    /// If `init_tracing_subscriber` is `false`, it is expected that the caller
    /// is setting up the appropriate logging.
    pub async fn run(self, init_tracing_subscriber: bool) -> Result<()> {
        if init_tracing_subscriber {
            let indicatif_layer = IndicatifLayer::new();
            tracing_subscriber::registry()
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_writer(indicatif_layer.get_stderr_writer())
                        .with_filter(self.level_filter()),
                )
                .with(indicatif_layer)
                .init();
        }
        match self.command {
            Command::Info { ref url, raw } => {
                let client = self.client()?;
                if raw {
                    let metadata = client.metadata(url).await?;
                    return self.put(None, serde_json::to_value(metadata)?).await;
                }
                let layer = FeatureLayer::from_url(&client, url).await?;
                let metadata = layer.metadata();
                let max_record_count = metadata.max_record_count()?;
                let fields: Vec<_> = layer
                    .fields()
                    .iter()
                    .map(|field| json!({"name": field.name, "type": field.short_type()}))
                    .collect();
                let value = json!({
                    "name": layer.name(),
                    "url": layer.url(),
                    "type": metadata.layer_type(),
                    "count": layer.count(),
                    "maxRecordCount": max_record_count,
                    "spatialReference": metadata.spatial_reference(),
                    "fields": fields,
                });
                self.put(None, value).await
            }
            Command::Count {
                ref url,
                ref where_clause,
            } => {
                let count = self.client()?.feature_count(url, where_clause).await?;
                println!("{count}");
                Ok(())
            }
            Command::Offsets {
                feature_count,
                max_record_count,
            } => {
                let offsets: Vec<u64> =
                    restfeature::offsets(feature_count, max_record_count)?.collect();
                self.put(None, serde_json::to_value(offsets)?).await
            }
            Command::Get {
                ref url,
                ref outfile,
                ref where_clause,
                ref out_fields,
                format,
                head,
                sample,
                stream,
            } => {
                let client = self.client()?;
                let mut layer = self.layer(&client, url, where_clause).await?;
                if let Some(out_fields) = out_fields {
                    layer = layer.with_out_fields(out_fields.clone())?;
                }
                if let Some(format) = format {
                    layer = layer.with_format(format);
                }
                if stream {
                    let chunks = layer.chunks();
                    pin_mut!(chunks);
                    let mut stdout = std::io::stdout();
                    while let Some(chunk) = chunks.try_next().await? {
                        serde_json::to_writer(&mut stdout, &FeatureCollection::from(chunk))?;
                        writeln!(stdout)?;
                    }
                    return Ok(());
                }
                let table = if let Some(n) = head {
                    layer.head(n).await?
                } else if let Some(n) = sample {
                    layer.sample(n).await?
                } else {
                    layer.features().await?
                };
                tracing::info!("got {} features from {layer}", table.len());
                let value = serde_json::to_value(FeatureCollection::from(table))?;
                self.put(outfile.as_deref(), value).await
            }
            Command::Values {
                ref url,
                ref fields,
                ref sort_by,
                ref where_clause,
            } => {
                let client = self.client()?;
                let layer = self.layer(&client, url, where_clause).await?;
                let values = layer
                    .unique_values(fields.clone(), sort_by.as_deref())
                    .await?;
                self.put(None, serde_json::to_value(values)?).await
            }
            Command::Counts {
                ref url,
                ref field,
                ref nested,
                ref where_clause,
            } => {
                let client = self.client()?;
                let layer = self.layer(&client, url, where_clause).await?;
                let value = if let Some(nested) = nested {
                    serde_json::to_value(layer.nested_count([field.as_str(), nested.as_str()]).await?)?
                } else {
                    serde_json::to_value(layer.value_counts(field).await?)?
                };
                self.put(None, value).await
            }
            Command::Crawl {
                ref url,
                ref outfile,
                counts,
            } => {
                let directory = Directory::crawl(&self.client()?, url, counts).await?;
                tracing::info!(
                    "found {} services and {} layers",
                    directory.services.len(),
                    directory.layers().count()
                );
                self.put(outfile.as_deref(), serde_json::to_value(directory)?)
                    .await
            }
        }
    }

    fn client(&self) -> Result<Client> {
        let mut client = Client::new()?.with_concurrency(self.concurrency);
        if let Some(token) = &self.token {
            client = client.with_token(token);
        }
        Ok(client)
    }

    async fn layer(&self, client: &Client, url: &str, where_clause: &str) -> Result<FeatureLayer> {
        let layer = FeatureLayer::from_url(client, url).await?;
        if where_clause.trim() == DEFAULT_WHERE {
            Ok(layer)
        } else {
            layer.with_where(where_clause).await.map_err(Into::into)
        }
    }

    async fn put(&self, href: Option<&str>, value: serde_json::Value) -> Result<()> {
        let href = href.and_then(|s| if s == "-" { None } else { Some(s) });
        let mut bytes = if self.compact_json(href) {
            serde_json::to_vec(&value)?
        } else {
            serde_json::to_vec_pretty(&value)?
        };
        if let Some(href) = href {
            tokio::fs::write(href, bytes)
                .await
                .map_err(|err| anyhow!("could not write {href}: {err}"))
        } else {
            bytes.push(b'\n');
            std::io::stdout().write_all(&bytes)?;
            Ok(())
        }
    }

    /// Returns true if JSON should be written compactly.
    ///
    /// Files are compact and standard output is pretty, unless
    /// `--compact-json` says otherwise.
    pub fn compact_json(&self, href: Option<&str>) -> bool {
        self.compact_json.unwrap_or(href.is_some())
    }

    pub fn log_level(&self) -> Option<Level> {
        level_enum(self.verbosity())
    }

    /// Returns the filter for log output, which is off when quiet.
    pub fn level_filter(&self) -> LevelFilter {
        LevelFilter::from(self.log_level())
    }

    fn verbosity(&self) -> i8 {
        level_value(ErrorLevel::default()) - (self.quiet as i8) + (self.verbose as i8)
    }

    /// Returns the command.
    pub fn command(&self) -> &Command {
        &self.command
    }

    /// Returns the access token, if one was given.
    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    /// Returns the number of chunks to fetch at the same time.
    pub fn concurrency(&self) -> usize {
        self.concurrency
    }
}

impl ErrorLevel {
    fn default() -> Option<Level> {
        Some(Level::ERROR)
    }

    fn verbose_help() -> Option<&'static str> {
        Some("Increase verbosity")
    }

    fn verbose_long_help() -> Option<&'static str> {
        None
    }

    fn quiet_help() -> Option<&'static str> {
        Some("Decrease verbosity")
    }

    fn quiet_long_help() -> Option<&'static str> {
        None
    }
}

fn level_enum(verbosity: i8) -> Option<Level> {
    match verbosity {
        i8::MIN..=-1 => None,
        0 => Some(Level::ERROR),
        1 => Some(Level::WARN),
        2 => Some(Level::INFO),
        3 => Some(Level::DEBUG),
        4..=i8::MAX => Some(Level::TRACE),
    }
}

fn level_value(level: Option<Level>) -> i8 {
    match level {
        None => -1,
        Some(Level::ERROR) => 0,
        Some(Level::WARN) => 1,
        Some(Level::INFO) => 2,
        Some(Level::DEBUG) => 3,
        Some(Level::TRACE) => 4,
    }
}

#[cfg(test)]
use {assert_cmd as _, mockito as _, rstest as _, tempfile as _};
