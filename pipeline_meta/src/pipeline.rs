use std::{
    collections::BTreeMap,
    fmt,
    io::Read,
    num::NonZeroU64,
    path::{Path, PathBuf},
};

use anyhow::Context;
use compress_io::compress::CompressIo;
use serde::{Deserialize, Serialize};
use serde_yaml::Value;

/// Default window size for region chunking
pub const DEFAULT_WINDOW: u64 = 1_000_000;

/// Errors in the pipeline configuration.  These are passed up to the top level
/// unchanged so that callers can recognise them with `downcast_ref`.
#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("metadata files must be configured in config, or passed on the command line (missing {0})")]
    MissingMetadata(&'static str),
    #[error("reference(s) must be configured in config file")]
    NoReferences,
    #[error("invalid chunk size {value} for variant caller {tool}")]
    InvalidChunkSize { tool: String, value: String },
}

/// PipelineConfig
///
/// The workflow configuration document.  Only the keys used for metadata population
/// are interpreted; everything else is kept in `other` and written back out unchanged.
///
#[derive(Debug, Default, Deserialize)]
pub struct PipelineConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<MetadataConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refs: Option<BTreeMap<String, RefConfig>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub varcall: Option<VarcallConfig>,
    #[serde(flatten)]
    pub other: BTreeMap<String, Value>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct MetadataConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runlib2samp_file: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sample_meta_file: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub setfile_glob: Option<String>,
    #[serde(flatten)]
    pub other: BTreeMap<String, Value>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct RefConfig {
    pub fasta: PathBuf,
    #[serde(flatten)]
    pub other: BTreeMap<String, Value>,
}

#[cfg(test)]
impl RefConfig {
    pub fn new<P: AsRef<Path>>(fasta: P) -> Self {
        Self {
            fasta: fasta.as_ref().to_owned(),
            other: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct VarcallConfig {
    #[serde(default)]
    pub chunksize: BTreeMap<String, ChunkSize>,
    #[serde(flatten)]
    pub other: BTreeMap<String, Value>,
}

/// Chunk size as written in the config file.  Values such as `1e6` or `"500000"`
/// are accepted and coerced to an integer window size when used.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum ChunkSize {
    Int(i64),
    Float(f64),
    Text(String),
}

impl fmt::Display for ChunkSize {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Int(x) => write!(f, "{}", x),
            Self::Float(x) => write!(f, "{}", x),
            Self::Text(s) => write!(f, "{}", s),
        }
    }
}

impl ChunkSize {
    fn as_u64(&self) -> Option<u64> {
        let from_float = |z: f64| {
            if z.is_finite() && z >= 1.0 && z <= u64::MAX as f64 {
                Some(z.trunc() as u64)
            } else {
                None
            }
        };
        match self {
            Self::Int(x) => u64::try_from(*x).ok(),
            Self::Float(z) => from_float(*z),
            Self::Text(s) => {
                let s = s.trim();
                s.parse::<u64>()
                    .ok()
                    .or_else(|| s.parse::<f64>().ok().and_then(from_float))
            }
        }
    }

    /// Coerce to a window size for variant caller `tool`
    pub fn window_size(&self, tool: &str) -> Result<WindowSize, ConfigError> {
        self.as_u64()
            .and_then(WindowSize::new)
            .ok_or_else(|| ConfigError::InvalidChunkSize {
                tool: tool.to_owned(),
                value: self.to_string(),
            })
    }
}

/// Window size for region chunking; always positive
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowSize(NonZeroU64);

impl WindowSize {
    pub fn new(x: u64) -> Option<Self> {
        NonZeroU64::new(x).map(Self)
    }

    pub fn get(&self) -> u64 {
        self.0.get()
    }
}

impl Default for WindowSize {
    fn default() -> Self {
        Self(NonZeroU64::new(DEFAULT_WINDOW).expect("default window size is non zero"))
    }
}

impl PipelineConfig {
    /// Read configuration from a YAML file
    pub fn from_path<P: AsRef<Path>>(fname: P) -> anyhow::Result<Self> {
        let fname = fname.as_ref();
        debug!("Reading in pipeline configuration from {}", fname.display());
        let mut rdr = CompressIo::new()
            .path(fname)
            .bufreader()
            .with_context(|| format!("Error opening config file {}", fname.display()))?;
        let mut s = String::new();
        rdr.read_to_string(&mut s)
            .with_context(|| format!("Error reading config file {}", fname.display()))?;
        Self::from_yaml_str(&s).with_context(|| format!("Error in config file {}", fname.display()))
    }

    pub fn from_yaml_str(s: &str) -> anyhow::Result<Self> {
        serde_yaml::from_str(s).with_context(|| "Error parsing pipeline configuration")
    }

    /// Configured references, failing if there are none
    pub fn references(&self) -> Result<&BTreeMap<String, RefConfig>, ConfigError> {
        match self.refs.as_ref() {
            Some(r) if !r.is_empty() => Ok(r),
            _ => Err(ConfigError::NoReferences),
        }
    }
}

/// Path taken from the config file.  Relative paths are relative to the project directory
pub fn project_path(project_dir: &Path, p: &Path) -> PathBuf {
    if p.is_absolute() || project_dir == Path::new(".") {
        p.to_owned()
    } else {
        project_dir.join(p)
    }
}

/// Glob pattern taken from the config file, relative to the project directory unless
/// absolute.  The project directory itself is matched literally.
pub fn project_glob(project_dir: &Path, pattern: &str) -> String {
    if Path::new(pattern).is_absolute() || project_dir == Path::new(".") {
        pattern.to_owned()
    } else {
        let dir = glob::Pattern::escape(&project_dir.display().to_string());
        Path::new(&dir).join(pattern).display().to_string()
    }
}
