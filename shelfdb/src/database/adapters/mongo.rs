//! MongoDB adapter
//!
//! The connection URI is derived from the config in one of three shapes:
//! an unauthenticated local URI, an SRV URI for hosted clusters, or a
//! standard authenticated URI with an explicit `authSource`. Credentials are
//! percent-encoded and the URI is only ever logged in sanitized form.

use crate::config::ManagerSettings;
use crate::database::adapter::{BackendAdapter, QueryOutput, Statement};
use crate::database::adapters::{connect_error, pool_size, sanitize_url, with_dial_timeout};
use crate::database::config::{BackendKind, DatabaseConfig};
use crate::database::handle::{ConnectionHandle, RawConnection};
use crate::database::schema::{SchemaReport, DOCUMENT_INDEXES, TABLES};
use crate::database::tenant::collection_name;
use crate::error::{Error, Result};
use async_trait::async_trait;
use mongodb::bson::{doc, Bson, Document};
use mongodb::options::{ClientOptions, IndexOptions, ServerAddress};
use mongodb::{Client, Database, IndexModel};
use std::net::Ipv6Addr;
use std::sync::Arc;

/// Hosted cluster domain that requires SRV discovery
const SRV_HOST_SUFFIX: &str = ".mongodb.net";

/// Stands in for an IPv6 literal while the driver parses the URI
const IPV6_PLACEHOLDER: &str = "ipv6.invalid";

/// Server error code for "collection already exists"
const NAMESPACE_EXISTS: i32 = 48;

/// Connection URI and the transport flags derived with it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MongoTarget {
    pub uri: String,
    pub srv: bool,
    pub tls: bool,
    pub direct_connection: bool,
    /// Bracketed IPv6 literal host, which the driver's URI parser rejects
    pub ipv6_host: Option<String>,
}

impl MongoTarget {
    /// Derive the URI for `config`
    pub fn from_config(config: &DatabaseConfig) -> Self {
        let host = config.uri_host();
        let ipv6_host = config
            .bare_host()
            .parse::<Ipv6Addr>()
            .is_ok()
            .then(|| host.clone());
        let srv = host.to_lowercase().ends_with(SRV_HOST_SUFFIX);
        let direct_connection = !srv && config.is_loopback();
        let tls_requested = config.options.tls.unwrap_or(false);

        let credentials = match config.username() {
            Some(user) => format!(
                "{}:{}@",
                urlencoding::encode(user),
                urlencoding::encode(config.password().unwrap_or_default())
            ),
            None => String::new(),
        };

        let mut params: Vec<String> = Vec::new();
        let uri_base = if srv {
            params.push("retryWrites=true".to_string());
            params.push("w=majority".to_string());
            if let Some(auth_source) = config.options.auth_source.as_deref() {
                params.push(format!("authSource={}", auth_source));
            }
            format!("mongodb+srv://{}{}/{}", credentials, host, config.database_name)
        } else {
            if config.has_credentials() {
                let auth_source = config
                    .options
                    .auth_source
                    .as_deref()
                    .unwrap_or(&config.database_name);
                params.push(format!("authSource={}", auth_source));
            }
            if direct_connection {
                params.push("directConnection=true".to_string());
            }
            if tls_requested {
                params.push("tls=true".to_string());
            }
            format!(
                "mongodb://{}{}:{}/{}",
                credentials, host, config.port, config.database_name
            )
        };

        let uri = if params.is_empty() {
            uri_base
        } else {
            format!("{}?{}", uri_base, params.join("&"))
        };

        Self {
            uri,
            srv,
            tls: srv || tls_requested,
            direct_connection,
            ipv6_host,
        }
    }

    /// Client options for this target
    ///
    /// An IPv6 host is swapped for a placeholder before parsing and set on
    /// `hosts` afterwards.
    pub async fn client_options(&self, port: u16) -> mongodb::error::Result<ClientOptions> {
        let Some(address) = &self.ipv6_host else {
            return ClientOptions::parse(&self.uri).await;
        };

        let uri = self.uri.replacen(address.as_str(), IPV6_PLACEHOLDER, 1);
        let mut options = ClientOptions::parse(&uri).await?;
        options.hosts = vec![ServerAddress::Tcp {
            host: address.clone(),
            port: Some(port),
        }];
        Ok(options)
    }
}

/// Live MongoDB client scoped to one database
#[derive(Debug, Clone)]
pub struct MongoConnection {
    client: Client,
    database: String,
}

impl MongoConnection {
    pub fn client(&self) -> &Client {
        &self.client
    }

    pub fn database_name(&self) -> &str {
        &self.database
    }

    pub fn database(&self) -> Database {
        self.client.database(&self.database)
    }

    /// Collection for a logical store, tenant-scoped when `tenant` is set
    pub fn collection(&self, base: &str, tenant: Option<&str>) -> mongodb::Collection<Document> {
        self.database().collection(&collection_name(base, tenant))
    }
}

/// MongoDB adapter; stateless, the client lives in the handle
#[derive(Debug, Clone, Default)]
pub struct MongoAdapter;

impl MongoAdapter {
    pub fn new() -> Self {
        Self
    }

    fn connection(handle: &ConnectionHandle) -> Result<&MongoConnection> {
        handle.mongo().ok_or_else(|| {
            Error::query(format!("Handle {} does not hold a MongoDB client", handle.key()))
        })
    }
}

fn is_namespace_exists(err: &mongodb::error::Error) -> bool {
    matches!(
        err.kind.as_ref(),
        mongodb::error::ErrorKind::Command(command) if command.code == NAMESPACE_EXISTS
    )
}

#[async_trait]
impl BackendAdapter for MongoAdapter {
    fn kind(&self) -> BackendKind {
        BackendKind::Mongodb
    }

    async fn dial(&self, config: &DatabaseConfig, settings: &ManagerSettings) -> Result<RawConnection> {
        let target = MongoTarget::from_config(config);
        log::info!("Connecting to MongoDB at {}", sanitize_url(&target.uri));

        with_dial_timeout(config, settings, async {
            let mut options = target
                .client_options(config.port)
                .await
                .map_err(|e| connect_error(config, "URI resolution", e))?;
            options.server_selection_timeout = Some(settings.server_selection_timeout());
            options.connect_timeout = Some(settings.dial_timeout());
            options.max_pool_size = Some(pool_size(config, settings));
            options.app_name = Some("shelfdb".to_string());

            let client =
                Client::with_options(options).map_err(|e| connect_error(config, "client setup", e))?;

            let ping = client
                .database(&config.database_name)
                .run_command(doc! { "ping": 1 }, None)
                .await;
            if let Err(e) = ping {
                client.shutdown().await;
                return Err(connect_error(config, "ping", e));
            }

            Ok(Arc::new(MongoConnection {
                client,
                database: config.database_name.clone(),
            }) as RawConnection)
        })
        .await
    }

    async fn ensure_schema(
        &self,
        handle: &ConnectionHandle,
        tenant: Option<&str>,
    ) -> Result<SchemaReport> {
        let conn = Self::connection(handle)?;
        let db = conn.database();
        let mut report = SchemaReport::default();

        let existing = db
            .list_collection_names(None)
            .await
            .map_err(|e| Error::schema(format!("Failed to list MongoDB collections: {}", e)))?;

        for base in TABLES {
            let name = collection_name(base, tenant);
            if existing.contains(&name) {
                continue;
            }
            match db.create_collection(&name, None).await {
                Ok(()) => {
                    log::info!("Created MongoDB collection '{}'", name);
                    report.created.push(name);
                }
                Err(e) if is_namespace_exists(&e) => {}
                Err(e) => {
                    return Err(Error::schema(format!(
                        "Failed to create collection '{}': {}",
                        name, e
                    )));
                }
            }
        }

        for spec in DOCUMENT_INDEXES.iter() {
            let name = collection_name(spec.collection, tenant);
            let collection = db.collection::<Document>(&name);

            let indexes = match collection.list_index_names().await {
                Ok(indexes) => indexes,
                Err(e) => {
                    report.record_failure(&format!("inspect indexes on {}", name), e);
                    continue;
                }
            };
            if indexes.iter().any(|i| i == spec.name) {
                continue;
            }

            let mut keys = Document::new();
            for key in spec.keys {
                keys.insert(*key, 1);
            }
            let model = IndexModel::builder()
                .keys(keys)
                .options(
                    IndexOptions::builder()
                        .name(spec.name.to_string())
                        .unique(spec.unique)
                        .build(),
                )
                .build();

            match collection.create_index(model, None).await {
                Ok(_) => report.indexes_created.push(format!("{}.{}", name, spec.name)),
                Err(e) => report.record_failure(&format!("create index {}.{}", name, spec.name), e),
            }
        }

        Ok(report)
    }

    async fn ping(&self, handle: &ConnectionHandle) -> Result<()> {
        Self::connection(handle)?
            .database()
            .run_command(doc! { "ping": 1 }, None)
            .await
            .map(|_| ())
            .map_err(|e| Error::connect(format!("MongoDB ping failed: {}", e)))
    }

    async fn close(&self, handle: &ConnectionHandle) {
        if let Some(conn) = handle.mongo() {
            conn.client.clone().shutdown().await;
        }
    }

    async fn execute(&self, handle: &ConnectionHandle, statement: &Statement) -> Result<QueryOutput> {
        let conn = Self::connection(handle)?;
        let command = match statement {
            Statement::Command(command) => command,
            Statement::Sql(_) => {
                return Err(Error::query("MongoDB accepts command documents only"));
            }
        };

        let command = mongodb::bson::to_document(command)
            .map_err(|e| Error::query(format!("Invalid MongoDB command: {}", e)))?;

        #[cfg(debug_assertions)]
        log::debug!("MongoDB COMMAND: {}", command);

        let reply = conn
            .database()
            .run_command(command, None)
            .await
            .map_err(|e| Error::query(format!("MongoDB command failed: {}", e)))?;

        Ok(QueryOutput::Document(Bson::Document(reply).into_relaxed_extjson()))
    }
}
