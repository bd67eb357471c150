//! Command-line configuration.
//!
//! `-h` is taken by `--host`, so help is only available as `--help`.

use std::ffi::OsString;
use std::path::PathBuf;
use std::time::Duration;

use clap::{ArgAction, Parser, error::ErrorKind};
use thiserror::Error;

use crate::upstream::DEFAULT_ORIGIN;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("please specify server host")]
    MissingHost,

    #[error("please specify server port")]
    MissingPort,

    #[error(transparent)]
    Usage(#[from] clap::Error),

    #[error("cannot resolve cache directory {path}: {source}")]
    CachePath {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Parser, Debug)]
#[command(
    name = "catcache",
    version,
    about = "Caching proxy for HTTP status cats",
    disable_help_flag = true
)]
pub struct Args {
    /// Address to listen on
    #[arg(short = 'h', long)]
    pub host: String,

    /// Port to listen on
    #[arg(short, long)]
    pub port: u16,

    /// Directory holding cached images; created if missing
    #[arg(short, long = "cache", value_name = "PATH")]
    pub cache: PathBuf,

    /// Origin queried on a cache miss
    #[arg(long, env = "CATCACHE_UPSTREAM", default_value = DEFAULT_ORIGIN, value_name = "URL")]
    pub upstream: String,

    /// Timeout for a single upstream request, in seconds
    #[arg(long, value_name = "SECS")]
    pub upstream_timeout: Option<u64>,

    /// Print help
    #[arg(long, action = ArgAction::Help)]
    pub help: Option<bool>,
}

/// Resolved settings the service runs with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub host: String,
    pub port: u16,
    /// Absolute path of the cache root.
    pub cache_dir: PathBuf,
    pub upstream: String,
    pub upstream_timeout: Option<Duration>,
}

impl Config {
    /// Parses `args` (including the program name) into a `Config`.
    ///
    /// # Errors
    ///
    /// [`ConfigError::MissingHost`] / [`ConfigError::MissingPort`] when those
    /// flags are absent, [`ConfigError::Usage`] for every other clap error
    /// (including `--help` and `--version`).
    pub fn from_args<I, T>(args: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        let args = Args::try_parse_from(args).map_err(|e| {
            if e.kind() == ErrorKind::MissingRequiredArgument {
                let rendered = e.to_string();
                if rendered.contains("--host") {
                    return ConfigError::MissingHost;
                }
                if rendered.contains("--port") {
                    return ConfigError::MissingPort;
                }
            }
            ConfigError::Usage(e)
        })?;

        Self::try_from(args)
    }

    /// `host:port`, bracketing IPv6 literals.
    pub fn listen_addr(&self) -> String {
        if self.host.contains(':') && !self.host.starts_with('[') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

impl TryFrom<Args> for Config {
    type Error = ConfigError;

    fn try_from(args: Args) -> Result<Self, Self::Error> {
        let cache_dir = std::path::absolute(&args.cache).map_err(|source| ConfigError::CachePath {
            path: args.cache.clone(),
            source,
        })?;

        Ok(Self {
            host: args.host,
            port: args.port,
            cache_dir,
            upstream: args.upstream,
            upstream_timeout: args.upstream_timeout.map(Duration::from_secs),
        })
    }
}
