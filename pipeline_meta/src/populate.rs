use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use serde::{ser::SerializeMap, Serialize, Serializer};

use crate::{
    pipeline::{project_glob, project_path, ConfigError, PipelineConfig},
    region::{make_chroms, make_regions, ContigLengths, DEFAULT_BASE},
    runlib::{make_runlib2samp, RunLibRecords, RunLibTable},
    sampleset::{make_samplesets, SampleSets, SetStore},
};

/// Keys added to the workflow configuration by [`populate_metadata`]
pub const GENERATED_KEYS: [&str; 5] = [
    "RUNLIB2SAMP",
    "SAMP2RUNLIB",
    "SAMPLESETS",
    "CHROMS",
    "VARCALL_REGIONS",
];

/// Metadata file locations given explicitly (i.e., on the command line).
/// Anything not given here is taken from the metadata section of the config.
#[derive(Debug, Default, Clone)]
pub struct MetadataPaths {
    pub runlib2samp: Option<PathBuf>,
    pub sample_meta: Option<PathBuf>,
    pub setfile_glob: Option<String>,
}

/// Metadata file locations after resolution
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPaths {
    pub runlib2samp: PathBuf,
    pub sample_meta: PathBuf,
    pub setfile_glob: String,
}

impl MetadataPaths {
    /// Fill in missing locations from the config.  Relative paths from the config are
    /// taken from `project_dir`; explicit paths are used as given.
    pub fn resolve(
        &self,
        cfg: &PipelineConfig,
        project_dir: &Path,
    ) -> Result<ResolvedPaths, ConfigError> {
        let md = cfg.metadata.as_ref();
        let runlib2samp = self
            .runlib2samp
            .clone()
            .or_else(|| {
                md.and_then(|m| m.runlib2samp_file.as_deref())
                    .map(|p| project_path(project_dir, p))
            })
            .ok_or(ConfigError::MissingMetadata("runlib2samp_file"))?;
        let sample_meta = self
            .sample_meta
            .clone()
            .or_else(|| {
                md.and_then(|m| m.sample_meta_file.as_deref())
                    .map(|p| project_path(project_dir, p))
            })
            .ok_or(ConfigError::MissingMetadata("sample_meta_file"))?;
        let setfile_glob = self
            .setfile_glob
            .clone()
            .or_else(|| {
                md.and_then(|m| m.setfile_glob.as_deref())
                    .map(|g| project_glob(project_dir, g))
            })
            .ok_or(ConfigError::MissingMetadata("setfile_glob"))?;
        Ok(ResolvedPaths {
            runlib2samp,
            sample_meta,
            setfile_glob,
        })
    }
}

pub type VarcallRegions = BTreeMap<String, BTreeMap<String, Vec<String>>>;

/// PopulatedMetadata
///
/// Everything generated from the metadata files and reference indices.
///
/// paths - resolved metadata file locations
/// runlib - run/library <-> sample mappings
/// samplesets - materialized sample sets
/// chroms - contig lengths per reference
/// varcall_regions - region windows per variant caller and reference (if varcall is configured)
///
#[derive(Debug)]
pub struct PopulatedMetadata {
    paths: ResolvedPaths,
    runlib: RunLibTable,
    samplesets: SampleSets,
    chroms: BTreeMap<String, ContigLengths>,
    varcall_regions: Option<VarcallRegions>,
}

impl PopulatedMetadata {
    pub fn paths(&self) -> &ResolvedPaths {
        &self.paths
    }
    pub fn runlib(&self) -> &RunLibTable {
        &self.runlib
    }
    pub fn samplesets(&self) -> &SampleSets {
        &self.samplesets
    }
    pub fn chroms(&self) -> &BTreeMap<String, ContigLengths> {
        &self.chroms
    }
    pub fn varcall_regions(&self) -> Option<&VarcallRegions> {
        self.varcall_regions.as_ref()
    }
}

// Written out with the key names used by the workflow rules
impl Serialize for PopulatedMetadata {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        map.serialize_entry("RUNLIB2SAMP", &RunLibRecords(&self.runlib))?;
        map.serialize_entry("SAMP2RUNLIB", self.runlib.samp2runlib())?;
        map.serialize_entry("SAMPLESETS", self.samplesets.sets())?;
        map.serialize_entry("CHROMS", &self.chroms)?;
        if let Some(r) = self.varcall_regions.as_ref() {
            map.serialize_entry("VARCALL_REGIONS", r)?;
        }
        map.end()
    }
}

/// Populate metadata for the workflow.
///
/// Metadata file locations come from `paths` or, failing that, from the config.
/// Relative paths in the config (metadata files, set file pattern and reference
/// FASTA files) are taken from `project_dir`.  Sample sets are materialized into `store`, contig lengths are read from the
/// index of each configured reference and, if a varcall section is present, region
/// windows are generated for each variant caller using its configured chunk size.
///
/// Configuration errors are returned as [`ConfigError`] without added context.
pub fn populate_metadata<S: SetStore>(
    cfg: &PipelineConfig,
    paths: &MetadataPaths,
    project_dir: &Path,
    store: &mut S,
) -> anyhow::Result<PopulatedMetadata> {
    let paths = paths.resolve(cfg, project_dir)?;
    debug!(
        "Metadata: run/library table {}, sample metadata {}, set files {}",
        paths.runlib2samp.display(),
        paths.sample_meta.display(),
        paths.setfile_glob
    );

    let runlib = make_runlib2samp(&paths.runlib2samp)?;
    debug!(
        "{} run/library pairs for {} samples",
        runlib.runlib2samp().len(),
        runlib.samp2runlib().len()
    );
    let samplesets = make_samplesets(&paths.runlib2samp, &paths.setfile_glob, store)?;
    info!(
        "{} samples in {} sample sets ({} updated)",
        samplesets.all_samples().len(),
        samplesets.sets().len(),
        samplesets.updated().len()
    );
    for s in samplesets.all_samples() {
        if runlib.runlibs(s).is_none() {
            warn!("Sample {} from sample sets has no run/library entries", s)
        }
    }

    let refs = cfg.references()?;
    let chroms = make_chroms(refs, project_dir)?;

    let varcall_regions = match cfg.varcall.as_ref() {
        Some(vc) => {
            let mut regions = BTreeMap::new();
            for (tool, cs) in vc.chunksize.iter() {
                let window = cs.window_size(tool)?;
                debug!("Generating regions for {} with window size {}", tool, window.get());
                regions.insert(tool.clone(), make_regions(&chroms, window, DEFAULT_BASE));
            }
            Some(regions)
        }
        None => None,
    };

    Ok(PopulatedMetadata {
        paths,
        runlib,
        samplesets,
        chroms,
        varcall_regions,
    })
}
