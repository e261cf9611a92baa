use std::path::{Path, PathBuf};

use crate::{pipeline::PipelineConfig, populate::MetadataPaths};

/// Output format for the populated configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Yaml,
    Json,
}

impl OutputFormat {
    /// JSON if the output file has a .json extension (before any compression suffix),
    /// otherwise YAML
    pub fn from_path(p: Option<&Path>) -> Self {
        let is_json = p
            .and_then(|p| p.file_name())
            .and_then(|s| s.to_str())
            .map(|s| s.split('.').skip(1).any(|x| x.eq_ignore_ascii_case("json")))
            .unwrap_or(false);
        if is_json {
            Self::Json
        } else {
            Self::Yaml
        }
    }
}

/// Config
///
/// Configuration info for the program
/// This is generated from the command line arguments
/// Once set it is read only
///
/// pipeline - the workflow configuration document
/// paths - metadata file locations given on the command line
/// project_dir - directory holding data/samplesets; relative config paths are taken from here
/// output_file - where to write the populated configuration
///
pub struct Config {
    pipeline: PipelineConfig,
    paths: MetadataPaths,
    project_dir: Option<PathBuf>,
    output_file: Option<PathBuf>,
}

impl Config {
    pub fn new(pipeline: PipelineConfig, paths: MetadataPaths) -> Self {
        Self {
            pipeline,
            paths,
            project_dir: None,
            output_file: None,
        }
    }

    pub fn set_project_dir<P: AsRef<Path>>(&mut self, dir: P) {
        self.project_dir = Some(dir.as_ref().to_owned())
    }

    pub fn set_output_file<P: AsRef<Path>>(&mut self, p: P) {
        self.output_file = Some(p.as_ref().to_owned())
    }

    pub fn pipeline(&self) -> &PipelineConfig {
        &self.pipeline
    }

    pub fn paths(&self) -> &MetadataPaths {
        &self.paths
    }

    pub fn project_dir(&self) -> &Path {
        self.project_dir.as_deref().unwrap_or_else(|| Path::new("."))
    }

    pub fn output_file(&self) -> Option<&Path> {
        self.output_file.as_deref()
    }

    pub fn output_format(&self) -> OutputFormat {
        OutputFormat::from_path(self.output_file())
    }
}
