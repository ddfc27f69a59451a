//! Server configuration: CLI flags layered over environment variables.

use anyhow::{Context, Result};
use clap::Parser;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

use medialift_protocol::DEFAULT_CHUNK_SIZE;

/// Command-line + environment configuration.
#[derive(Parser, Debug)]
#[command(author, version, about = "Resumable chunked media upload service")]
pub struct Args {
    /// Host to bind to (overrides MEDIALIFT_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides MEDIALIFT_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Directory for spooled chunks and finished objects (overrides MEDIALIFT_DATA_DIR)
    #[arg(long)]
    pub data_dir: Option<PathBuf>,

    /// Chunk size in bytes (overrides MEDIALIFT_CHUNK_SIZE)
    #[arg(long)]
    pub chunk_size: Option<u64>,

    /// Maximum accepted file size in bytes (overrides MEDIALIFT_MAX_FILE_SIZE)
    #[arg(long)]
    pub max_file_size: Option<u64>,

    /// Idle session TTL in seconds (overrides MEDIALIFT_SESSION_TTL_SECS)
    #[arg(long)]
    pub session_ttl_secs: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub chunk_size: u64,
    pub max_file_size: u64,
    pub session_ttl: Duration,
}

impl ServerConfig {
    /// Merges CLI args over environment variables over defaults.
    pub fn from_env_and_args() -> Result<Self> {
        let args = Args::parse();
        Self::merge(args)
    }

    fn merge(args: Args) -> Result<Self> {
        let host = args
            .host
            .or_else(|| env::var("MEDIALIFT_HOST").ok())
            .unwrap_or_else(|| "0.0.0.0".into());
        let port = match args.port {
            Some(port) => port,
            None => env_parse("MEDIALIFT_PORT")?.unwrap_or(3000),
        };
        let data_dir = args
            .data_dir
            .or_else(|| env::var("MEDIALIFT_DATA_DIR").ok().map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from("./data"));
        let chunk_size = match args.chunk_size {
            Some(size) => size,
            None => env_parse("MEDIALIFT_CHUNK_SIZE")?.unwrap_or(DEFAULT_CHUNK_SIZE),
        };
        anyhow::ensure!(chunk_size > 0, "chunk size must be non-zero");
        let max_file_size = match args.max_file_size {
            Some(size) => size,
            None => env_parse("MEDIALIFT_MAX_FILE_SIZE")?.unwrap_or(2 * 1024 * 1024 * 1024),
        };
        let session_ttl_secs = match args.session_ttl_secs {
            Some(secs) => secs,
            None => env_parse("MEDIALIFT_SESSION_TTL_SECS")?.unwrap_or(30 * 60),
        };

        Ok(Self {
            host,
            port,
            data_dir,
            chunk_size,
            max_file_size,
            session_ttl: Duration::from_secs(session_ttl_secs),
        })
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Where in-flight chunk files live.
    pub fn spool_dir(&self) -> PathBuf {
        self.data_dir.join("spool")
    }

    /// Where finalized objects live.
    pub fn objects_dir(&self) -> PathBuf {
        self.data_dir.join("objects")
    }
}

fn env_parse<T>(key: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(value) => {
            let parsed = value
                .parse::<T>()
                .map_err(|e| anyhow::anyhow!("{e}"))
                .with_context(|| format!("parsing {key} value `{value}`"))?;
            Ok(Some(parsed))
        }
        Err(env::VarError::NotPresent) => Ok(None),
        Err(err) => Err(err).context(format!("reading {key}")),
    }
}
