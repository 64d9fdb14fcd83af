//! Target arguments shared by the subcommands

use clap::Args;
use shelfdb::{BackendKind, ConnectionOptions, DatabaseConfig};

fn parse_kind(value: &str) -> Result<BackendKind, String> {
    BackendKind::parse(value).map_err(|e| e.to_string())
}

#[derive(Debug, Clone, Args)]
pub struct TargetArgs {
    /// Backend kind: mysql, mariadb, postgresql, postgres, mongodb
    #[arg(short, long, value_parser = parse_kind)]
    pub kind: BackendKind,

    #[arg(long, default_value = "localhost")]
    pub host: String,

    /// Port (defaults to the backend's standard port)
    #[arg(short, long)]
    pub port: Option<u16>,

    #[arg(short, long)]
    pub username: Option<String>,

    /// Password; prefer the environment variable over the flag
    #[arg(long, env = "SHELFDB_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,

    #[arg(short, long)]
    pub database: String,

    /// Require TLS
    #[arg(long)]
    pub tls: bool,

    /// MongoDB authentication database
    #[arg(long)]
    pub auth_source: Option<String>,

    #[arg(long)]
    pub pool_size: Option<u32>,

    /// Character set for MySQL targets
    #[arg(long)]
    pub charset: Option<String>,
}

impl TargetArgs {
    pub fn to_config(&self) -> DatabaseConfig {
        let mut config = DatabaseConfig::new(self.kind, self.host.clone(), self.database.clone())
            .with_options(ConnectionOptions {
                tls: self.tls.then_some(true),
                pool_size: self.pool_size,
                charset: self.charset.clone(),
                auth_source: self.auth_source.clone(),
            });

        if let Some(port) = self.port {
            config = config.with_port(port);
        }
        config.username = self.username.clone();
        config.password = self.password.clone();
        config
    }
}
