use anyhow::{Context, bail};
use clap::Parser;
use ipnetwork::IpNetwork;
use serde::Deserialize;
use std::{
    fmt,
    net::SocketAddr,
    path::{Path, PathBuf},
    time::Duration,
};

const DEFAULT_SERVER_ADDRESS: &str = "0.0.0.0:8080";
const DEFAULT_GRPC_ADDRESS: &str = "0.0.0.0:3200";
const DEFAULT_BASE_URL: &str = "http://localhost:8080";

/// Minimum length of the cookie signing key, in bytes.
pub const MIN_COOKIE_KEY_LEN: usize = 64;

/// Runtime configuration for the `linkshrink-server` binary.
///
/// Values come from command-line flags, then environment variables (a `.env`
/// file is loaded first), then the optional JSON file given with `--config`.
/// Built-in defaults apply last.
#[derive(Parser, Debug, Clone, Default)]
#[command(
    name = "linkshrink-server",
    version,
    about = "An HTTP and gRPC link shortener"
)]
pub struct CliArgs {
    /// HTTP listen address.
    ///
    /// Environment variable: `SERVER_ADDRESS`
    #[arg(short = 'a', long, env = "SERVER_ADDRESS")]
    pub server_address: Option<String>,

    /// gRPC listen address.
    ///
    /// Environment variable: `GRPC_ADDRESS`
    #[arg(short = 'g', long, env = "GRPC_ADDRESS")]
    pub grpc_address: Option<String>,

    /// Prefix of every short URL handed back to clients.
    ///
    /// Environment variable: `BASE_URL`
    #[arg(short = 'b', long, env = "BASE_URL")]
    pub base_url: Option<String>,

    /// JSON snapshot used by the file storage backend.
    ///
    /// Environment variable: `FILE_STORAGE_PATH`
    #[arg(short = 'f', long, env = "FILE_STORAGE_PATH")]
    pub file_storage_path: Option<PathBuf>,

    /// PostgreSQL connection string. Takes precedence over the file backend.
    ///
    /// Environment variable: `DATABASE_DSN`
    #[arg(short = 'd', long, env = "DATABASE_DSN")]
    pub database_dsn: Option<String>,

    /// CIDR allowed to read `/api/internal/stats`. Unset denies everyone.
    ///
    /// Environment variable: `TRUSTED_SUBNET`
    #[arg(short = 't', long, env = "TRUSTED_SUBNET")]
    pub trusted_subnet: Option<String>,

    /// Number of deletion workers. Defaults to the number of CPUs.
    ///
    /// Environment variable: `NUM_WORKERS`
    #[arg(long, env = "NUM_WORKERS")]
    pub num_workers: Option<usize>,

    /// Key used to sign the `user_id` cookie, at least 64 bytes. A random key
    /// is generated when unset, which invalidates cookies across restarts.
    ///
    /// Environment variable: `COOKIE_KEY`
    #[arg(long, env = "COOKIE_KEY", hide_env_values = true)]
    pub cookie_key: Option<String>,

    /// Seconds to wait for the deletion pool to drain on shutdown.
    ///
    /// Environment variable: `SHUTDOWN_TIMEOUT`
    #[arg(long, env = "SHUTDOWN_TIMEOUT", default_value_t = 10)]
    pub shutdown_timeout: u64,

    /// JSON file whose values fill in anything not given as a flag or
    /// environment variable.
    ///
    /// Environment variable: `CONFIG`
    #[arg(short = 'c', long, env = "CONFIG")]
    pub config: Option<PathBuf>,
}

/// Settings accepted from the `--config` JSON file.
#[derive(Deserialize, Debug, Default, PartialEq, Eq)]
#[serde(default)]
pub struct FileConfig {
    pub server_address: Option<String>,
    pub grpc_address: Option<String>,
    pub base_url: Option<String>,
    pub file_storage_path: Option<PathBuf>,
    pub database_dsn: Option<String>,
    pub trusted_subnet: Option<String>,
    pub num_workers: Option<usize>,
}

impl FileConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse config file {}", path.display()))
    }
}

impl CliArgs {
    /// Fills every unset value from `file`.
    pub fn merge(mut self, file: FileConfig) -> Self {
        fn fill<T>(slot: &mut Option<T>, fallback: Option<T>) {
            if slot.is_none() {
                *slot = fallback;
            }
        }

        fill(&mut self.server_address, file.server_address);
        fill(&mut self.grpc_address, file.grpc_address);
        fill(&mut self.base_url, file.base_url);
        fill(&mut self.file_storage_path, file.file_storage_path);
        fill(&mut self.database_dsn, file.database_dsn);
        fill(&mut self.trusted_subnet, file.trusted_subnet);
        fill(&mut self.num_workers, file.num_workers);
        self
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub server_address: SocketAddr,
    pub grpc_address: SocketAddr,
    pub base_url: String,
    pub file_storage_path: Option<PathBuf>,
    pub database_dsn: Option<String>,
    pub trusted_subnet: Option<IpNetwork>,
    pub num_workers: usize,
    pub cookie_key: Option<CookieKey>,
    pub shutdown_timeout: Duration,
}

impl TryFrom<CliArgs> for ServerConfig {
    type Error = anyhow::Error;

    fn try_from(args: CliArgs) -> Result<Self, Self::Error> {
        let args = match args.config.clone() {
            Some(path) => args.merge(FileConfig::load(&path)?),
            None => args,
        };

        let num_workers = args.num_workers.unwrap_or_else(num_cpus::get);
        if num_workers == 0 {
            bail!("NUM_WORKERS must be greater than 0");
        }

        let server_address = parse_addr(args.server_address, DEFAULT_SERVER_ADDRESS)
            .context("invalid SERVER_ADDRESS")?;
        let grpc_address = parse_addr(args.grpc_address, DEFAULT_GRPC_ADDRESS)
            .context("invalid GRPC_ADDRESS")?;
        if server_address == grpc_address {
            bail!("SERVER_ADDRESS and GRPC_ADDRESS must differ (both are {server_address})");
        }

        let base_url = non_empty(args.base_url)
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_owned())
            .trim_end_matches('/')
            .to_owned();

        let trusted_subnet = non_empty(args.trusted_subnet)
            .map(|raw| raw.trim().parse::<IpNetwork>())
            .transpose()
            .context("invalid TRUSTED_SUBNET")?;

        let cookie_key = non_empty(args.cookie_key).map(String::into_bytes);
        if let Some(key) = &cookie_key {
            if key.len() < MIN_COOKIE_KEY_LEN {
                bail!(
                    "COOKIE_KEY must be at least {MIN_COOKIE_KEY_LEN} bytes (got {})",
                    key.len()
                );
            }
        }
        let cookie_key = cookie_key.map(CookieKey);

        Ok(Self {
            server_address,
            grpc_address,
            base_url,
            file_storage_path: args
                .file_storage_path
                .filter(|path| !path.as_os_str().is_empty()),
            database_dsn: non_empty(args.database_dsn),
            trusted_subnet,
            num_workers,
            cookie_key,
            shutdown_timeout: Duration::from_secs(args.shutdown_timeout),
        })
    }
}

/// Raw cookie signing key. Never printed.
#[derive(Clone, PartialEq, Eq)]
pub struct CookieKey(Vec<u8>);

impl CookieKey {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for CookieKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CookieKey(<{} bytes>)", self.0.len())
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn parse_addr(value: Option<String>, default: &str) -> anyhow::Result<SocketAddr> {
    let raw = non_empty(value).unwrap_or_else(|| default.to_owned());
    raw.parse()
        .with_context(|| format!("`{raw}` is not a socket address"))
}
