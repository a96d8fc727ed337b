use clap::Parser;
use keyhole_storage::BackendConfig;
use serde::Deserialize;
use std::fmt::{Display, Formatter};
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

pub const CONFIG_ENV: &str = "CONFIG";
pub const SERVER_ADDRESS_ENV: &str = "SERVER_ADDRESS";
pub const GRPC_ADDRESS_ENV: &str = "SERVER_ADDRESS_GRPC";
pub const BASE_URL_ENV: &str = "BASE_URL";
pub const LOG_LEVEL_ENV: &str = "LOG_LEVEL";
pub const LOG_JSON_ENV: &str = "LOG_JSON";
pub const FILE_STORAGE_PATH_ENV: &str = "FILE_STORAGE_PATH";
pub const DATABASE_DSN_ENV: &str = "DATABASE_DSN";
pub const TRUSTED_SUBNET_ENV: &str = "TRUSTED_SUBNET";

pub const DEFAULT_SERVER_ADDRESS: &str = "127.0.0.1:8080";
pub const DEFAULT_GRPC_ADDRESS: &str = "127.0.0.1:8081";
pub const DEFAULT_BASE_URL: &str = "http://localhost:8080/";
pub const DEFAULT_LOG_LEVEL: &str = "info";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("invalid trusted subnet {0:?}")]
    InvalidSubnet(String),
    #[error("invalid base url {0:?}: must start with http:// or https://")]
    InvalidBaseUrl(String),
}

/// Command line options. Every option can also be set through the
/// environment; both take precedence over the JSON config file.
#[derive(Debug, Default, Parser)]
#[command(name = "keyhole", about = "URL shortener HTTP and gRPC server")]
pub struct Cli {
    /// Path to a JSON config file.
    #[arg(short = 'c', long = "config", env = CONFIG_ENV)]
    pub config: Option<PathBuf>,

    /// Address the HTTP server listens on.
    #[arg(short = 'a', long, env = SERVER_ADDRESS_ENV)]
    pub server_address: Option<String>,

    /// Address the gRPC server listens on. An empty value disables it.
    #[arg(short = 'g', long, env = GRPC_ADDRESS_ENV)]
    pub grpc_address: Option<String>,

    /// Prefix of the short URLs handed out to clients.
    #[arg(short = 'b', long, env = BASE_URL_ENV)]
    pub base_url: Option<String>,

    /// Log filter, overridden by `RUST_LOG`.
    #[arg(short = 'l', long, env = LOG_LEVEL_ENV)]
    pub log_level: Option<String>,

    /// Emit logs as JSON lines.
    #[arg(long, env = LOG_JSON_ENV)]
    pub log_json: bool,

    /// JSON file mirroring the stored urls.
    #[arg(short = 'f', long, env = FILE_STORAGE_PATH_ENV)]
    pub file_storage_path: Option<PathBuf>,

    /// PostgreSQL connection string. Takes precedence over the file storage.
    #[arg(short = 'd', long, env = DATABASE_DSN_ENV)]
    pub database_dsn: Option<String>,

    /// CIDR allowed to read the internal stats.
    #[arg(short = 't', long, env = TRUSTED_SUBNET_ENV)]
    pub trusted_subnet: Option<String>,
}

/// Options read from the JSON config file.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    pub server_address: Option<String>,
    #[serde(rename = "server_address_grpc")]
    pub grpc_address: Option<String>,
    pub base_url: Option<String>,
    pub log_level: Option<String>,
    pub log_json: Option<bool>,
    pub file_storage_path: Option<PathBuf>,
    pub database_dsn: Option<String>,
    pub trusted_subnet: Option<String>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// Fully resolved server settings.
#[derive(Debug, Clone)]
pub struct Settings {
    pub server_address: String,
    /// `None` when the gRPC server is disabled.
    pub grpc_address: Option<String>,
    pub base_url: String,
    pub log_level: String,
    pub log_json: bool,
    pub backend: BackendConfig,
    pub trusted_subnet: Option<TrustedSubnet>,
}

impl Settings {
    /// Reads the config file named on the command line, if any, and merges it
    /// with the command line.
    pub fn from_cli(cli: Cli) -> Result<Self, ConfigError> {
        let file = match &cli.config {
            Some(path) => FileConfig::load(path)?,
            None => FileConfig::default(),
        };
        Self::resolve(cli, file)
    }

    /// Merges the sources: command line and environment, then the config
    /// file, then the defaults.
    pub fn resolve(cli: Cli, file: FileConfig) -> Result<Self, ConfigError> {
        let server_address = cli
            .server_address
            .or(file.server_address)
            .unwrap_or_else(|| DEFAULT_SERVER_ADDRESS.to_string());
        let grpc_address = match cli.grpc_address.or(file.grpc_address) {
            Some(address) if address.trim().is_empty() => None,
            Some(address) => Some(address),
            None => Some(DEFAULT_GRPC_ADDRESS.to_string()),
        };
        let base_url = cli
            .base_url
            .or(file.base_url)
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            return Err(ConfigError::InvalidBaseUrl(base_url));
        }
        let log_level = cli
            .log_level
            .or(file.log_level)
            .unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_string());
        let log_json = cli.log_json || file.log_json.unwrap_or(false);

        let backend = BackendConfig::select(
            cli.file_storage_path.or(file.file_storage_path),
            cli.database_dsn.or(file.database_dsn),
        );

        let trusted_subnet = cli
            .trusted_subnet
            .or(file.trusted_subnet)
            .filter(|subnet| !subnet.trim().is_empty())
            .map(|subnet| subnet.parse::<TrustedSubnet>())
            .transpose()?;

        Ok(Self {
            server_address,
            grpc_address,
            base_url,
            log_level,
            log_json,
            backend,
            trusted_subnet,
        })
    }
}

/// An IPv4 or IPv6 network in CIDR notation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrustedSubnet {
    network: IpAddr,
    prefix: u8,
}

impl TrustedSubnet {
    pub fn contains(&self, ip: IpAddr) -> bool {
        match (self.network, ip.to_canonical()) {
            (IpAddr::V4(network), IpAddr::V4(ip)) => {
                let mask = v4_mask(self.prefix);
                u32::from(network) & mask == u32::from(ip) & mask
            }
            (IpAddr::V6(network), IpAddr::V6(ip)) => {
                let mask = v6_mask(self.prefix);
                u128::from(network) & mask == u128::from(ip) & mask
            }
            _ => false,
        }
    }
}

fn v4_mask(prefix: u8) -> u32 {
    u32::MAX.checked_shl(32 - u32::from(prefix)).unwrap_or(0)
}

fn v6_mask(prefix: u8) -> u128 {
    u128::MAX.checked_shl(128 - u32::from(prefix)).unwrap_or(0)
}

impl FromStr for TrustedSubnet {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ConfigError::InvalidSubnet(s.to_string());
        let (addr, prefix) = s.trim().split_once('/').ok_or_else(invalid)?;
        let network: IpAddr = addr.parse().map_err(|_| invalid())?;
        let prefix: u8 = prefix.parse().map_err(|_| invalid())?;

        let max = if network.is_ipv4() { 32 } else { 128 };
        if prefix > max {
            return Err(invalid());
        }

        Ok(Self { network, prefix })
    }
}

impl Display for TrustedSubnet {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.network, self.prefix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;

    fn subnet(s: &str) -> TrustedSubnet {
        s.parse().unwrap()
    }

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[test]
    fn cli_parses_short_flags() {
        let cli = Cli::try_parse_from([
            "keyhole",
            "-a",
            "0.0.0.0:9000",
            "-g",
            "0.0.0.0:9001",
            "-b",
            "http://short.example/",
            "-f",
            "/tmp/urls.json",
            "-t",
            "10.0.0.0/8",
        ])
        .unwrap();

        assert_eq!(cli.server_address.as_deref(), Some("0.0.0.0:9000"));
        assert_eq!(cli.grpc_address.as_deref(), Some("0.0.0.0:9001"));
        assert_eq!(cli.base_url.as_deref(), Some("http://short.example/"));
        assert_eq!(cli.file_storage_path, Some(PathBuf::from("/tmp/urls.json")));
        assert_eq!(cli.trusted_subnet.as_deref(), Some("10.0.0.0/8"));
    }

    #[test]
    fn defaults_apply_when_nothing_is_set() {
        let settings = Settings::resolve(Cli::default(), FileConfig::default()).unwrap();

        assert_eq!(settings.server_address, DEFAULT_SERVER_ADDRESS);
        assert_eq!(settings.grpc_address.as_deref(), Some(DEFAULT_GRPC_ADDRESS));
        assert_eq!(settings.base_url, DEFAULT_BASE_URL);
        assert_eq!(settings.log_level, DEFAULT_LOG_LEVEL);
        assert!(!settings.log_json);
        assert_eq!(settings.backend, BackendConfig::Memory);
        assert!(settings.trusted_subnet.is_none());
    }

    #[test]
    fn cli_wins_over_file() {
        let cli = Cli {
            server_address: Some("0.0.0.0:1".to_string()),
            ..Default::default()
        };
        let file = FileConfig {
            server_address: Some("0.0.0.0:2".to_string()),
            base_url: Some("https://file.example/".to_string()),
            ..Default::default()
        };

        let settings = Settings::resolve(cli, file).unwrap();

        assert_eq!(settings.server_address, "0.0.0.0:1");
        assert_eq!(settings.base_url, "https://file.example/");
    }

    #[test]
    fn empty_grpc_address_disables_grpc() {
        let cli = Cli {
            grpc_address: Some(String::new()),
            ..Default::default()
        };
        let settings = Settings::resolve(cli, FileConfig::default()).unwrap();
        assert!(settings.grpc_address.is_none());

        let file = FileConfig {
            grpc_address: Some("0.0.0.0:9090".to_string()),
            ..Default::default()
        };
        let settings = Settings::resolve(Cli::default(), file).unwrap();
        assert_eq!(settings.grpc_address.as_deref(), Some("0.0.0.0:9090"));
    }

    #[test]
    fn database_dsn_selects_postgres() {
        let file = FileConfig {
            file_storage_path: Some(PathBuf::from("/tmp/urls.json")),
            database_dsn: Some("postgres://localhost/keyhole".to_string()),
            ..Default::default()
        };

        let settings = Settings::resolve(Cli::default(), file).unwrap();

        assert_eq!(
            settings.backend,
            BackendConfig::Postgres("postgres://localhost/keyhole".to_string())
        );
    }

    #[test]
    fn rejects_bad_base_url_and_subnet() {
        let cli = Cli {
            base_url: Some("localhost:8080".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            Settings::resolve(cli, FileConfig::default()),
            Err(ConfigError::InvalidBaseUrl(_))
        ));

        let cli = Cli {
            trusted_subnet: Some("10.0.0.0/33".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            Settings::resolve(cli, FileConfig::default()),
            Err(ConfigError::InvalidSubnet(_))
        ));
    }

    #[test]
    fn loads_json_config_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        let config = json!({
            "server_address": "0.0.0.0:8081",
            "server_address_grpc": "0.0.0.0:8082",
            "trusted_subnet": "192.168.0.0/16",
            "enable_https": false,
        });
        write!(file, "{config}").unwrap();

        let cli = Cli {
            config: Some(file.path().to_path_buf()),
            ..Default::default()
        };
        let settings = Settings::from_cli(cli).unwrap();

        assert_eq!(settings.server_address, "0.0.0.0:8081");
        assert_eq!(settings.grpc_address.as_deref(), Some("0.0.0.0:8082"));
        assert_eq!(settings.trusted_subnet, Some(subnet("192.168.0.0/16")));
    }

    #[test]
    fn missing_or_malformed_config_file_fails() {
        let cli = Cli {
            config: Some(PathBuf::from("/definitely/not/here.json")),
            ..Default::default()
        };
        assert!(matches!(Settings::from_cli(cli), Err(ConfigError::Read { .. })));

        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();
        let cli = Cli {
            config: Some(file.path().to_path_buf()),
            ..Default::default()
        };
        assert!(matches!(Settings::from_cli(cli), Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn subnet_membership_v4() {
        let trusted = subnet("192.168.1.0/24");
        assert!(trusted.contains(ip("192.168.1.1")));
        assert!(trusted.contains(ip("192.168.1.255")));
        assert!(!trusted.contains(ip("192.168.2.1")));
        assert!(!trusted.contains(ip("::1")));
    }

    #[test]
    fn subnet_membership_edges() {
        assert!(subnet("0.0.0.0/0").contains(ip("8.8.8.8")));
        assert!(subnet("10.1.2.3/32").contains(ip("10.1.2.3")));
        assert!(!subnet("10.1.2.3/32").contains(ip("10.1.2.4")));
        assert!(subnet("127.0.0.0/8").contains(ip("::ffff:127.0.0.1")));
    }

    #[test]
    fn subnet_membership_v6() {
        let trusted = subnet("fd00::/8");
        assert!(trusted.contains(ip("fd12:3456::1")));
        assert!(!trusted.contains(ip("fe80::1")));
        assert!(!trusted.contains(ip("10.0.0.1")));
    }

    #[test]
    fn subnet_parse_errors() {
        for s in ["", "10.0.0.0", "10.0.0.0/", "10.0.0/8", "::/129", "abc/8"] {
            assert!(s.parse::<TrustedSubnet>().is_err(), "{s}");
        }
        assert_eq!(subnet(" 10.0.0.0/8 ").to_string(), "10.0.0.0/8");
    }
}
