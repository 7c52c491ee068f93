use anyhow::{Context, bail};
use serde::de::{self, Deserializer, value::MapDeserializer};
use serde::Deserialize;
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Server settings, read once at startup.
///
/// The usual source is a `key=value` file:
///
/// ```text
/// port=8082
/// ip=127.0.0.1
/// root_dir=.
/// storage_dir=./uploads
/// max_clients=10
/// log_file=server.log
/// keep_alive_timeout=2
/// ```
///
/// Every key is required. Files ending in `.yaml` or `.yml` are read as
/// YAML with the same keys.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(deserialize_with = "number")]
    pub port: u16,
    pub ip: IpAddr,
    pub root_dir: PathBuf,
    pub storage_dir: PathBuf,
    #[serde(deserialize_with = "number")]
    pub max_clients: usize,
    pub log_file: PathBuf,
    #[serde(deserialize_with = "seconds")]
    pub keep_alive_timeout: Duration,
}

impl Config {
    /// Reads and parses the configuration file at `path`.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("cannot read config file {}", path.display()))?;

        let is_yaml = matches!(
            path.extension().and_then(|e| e.to_str()),
            Some("yaml" | "yml")
        );

        let config = if is_yaml {
            serde_yaml::from_str(&text)?
        } else {
            Self::from_kv_str(&text)?
        };

        Ok(config)
    }

    /// Parses `key=value` lines. Blank lines and lines starting with `#`
    /// are skipped.
    pub fn from_kv_str(text: &str) -> anyhow::Result<Self> {
        let mut pairs = Vec::new();

        for (n, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let Some((key, value)) = line.split_once('=') else {
                bail!("line {}: expected key=value, got {:?}", n + 1, line);
            };

            pairs.push((key.trim().to_string(), value.trim().to_string()));
        }

        let de = MapDeserializer::<_, de::value::Error>::new(pairs.into_iter());
        Self::deserialize(de).context("invalid configuration")
    }

    /// Checks the settings and makes the directories canonical.
    ///
    /// `storage_dir` is created when it does not exist yet.
    pub fn prepare(mut self) -> anyhow::Result<Self> {
        if self.max_clients == 0 {
            bail!("max_clients must be at least 1");
        }
        if self.keep_alive_timeout.is_zero() {
            bail!("keep_alive_timeout must be at least 1 second");
        }

        self.root_dir = std::fs::canonicalize(&self.root_dir)
            .with_context(|| format!("root_dir {} is not accessible", self.root_dir.display()))?;
        if !self.root_dir.is_dir() {
            bail!("root_dir {} is not a directory", self.root_dir.display());
        }

        std::fs::create_dir_all(&self.storage_dir).with_context(|| {
            format!("cannot create storage_dir {}", self.storage_dir.display())
        })?;
        self.storage_dir = std::fs::canonicalize(&self.storage_dir)?;

        Ok(self)
    }

    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.ip, self.port)
    }
}

/// A scalar that may arrive as a number (YAML) or as text (key=value).
#[derive(Deserialize)]
#[serde(untagged)]
enum Scalar {
    Number(u64),
    Text(String),
}

fn number<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: TryFrom<u64>,
{
    let n = match Scalar::deserialize(deserializer)? {
        Scalar::Number(n) => n,
        Scalar::Text(s) => s
            .parse()
            .map_err(|_| de::Error::custom(format!("expected a number, got {s:?}")))?,
    };

    T::try_from(n).map_err(|_| de::Error::custom(format!("{n} is out of range")))
}

fn seconds<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    number::<D, u64>(deserializer).map(Duration::from_secs)
}
