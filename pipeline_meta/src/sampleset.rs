use std::{
    collections::{BTreeMap, BTreeSet},
    fmt, fs,
    io::Write,
    path::{Path, PathBuf},
};

use anyhow::Context;
use compress_io::compress::CompressIo;
use sha2::{Digest, Sha256};

use utils::get_next_line;

/// Name of the set holding the union of all other sets
pub const ALL_SAMPLES: &str = "all_samples";

/// Location of generated sample set files relative to the project directory
pub const SAMPLESET_DIR: &str = "data/samplesets";

/// Marker file placed in the sample set directory
pub const MARKER_FILE: &str = ".ZZZ_DONT_EDIT_THESE_FILES";

/// Fingerprint
///
/// SHA-256 digest of a sample set membership.  Members are sorted and deduplicated
/// before hashing so two sets have the same fingerprint iff they have the same members.
///
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    pub fn of(members: &BTreeSet<String>) -> Self {
        let mut hasher = Sha256::new();
        for s in members.iter() {
            hasher.update(s.as_bytes());
            hasher.update(b"\n");
        }
        let mut d = [0u8; 32];
        d.copy_from_slice(&hasher.finalize());
        Self(d)
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for b in self.0.iter() {
            write!(f, "{:02x}", b)?
        }
        Ok(())
    }
}

/// SetStore
///
/// Persistent store of materialized sample sets.  A set is rewritten only when its
/// fingerprint changes, so the store contents act as the change signal for
/// downstream work.
///
pub trait SetStore {
    /// Fingerprint of the persisted membership of set `name`, or None if it has not been stored
    fn fingerprint(&self, name: &str) -> anyhow::Result<Option<Fingerprint>>;

    /// Replace the persisted membership of set `name`
    fn persist(&mut self, name: &str, members: &BTreeSet<String>) -> anyhow::Result<()>;

    /// Record that the store contents are generated from `source`
    fn mark_generated(&mut self, source: &str) -> anyhow::Result<()>;
}

/// SetFileStore
///
/// Stores each set as `<dir>/<name>.txt` with one sample per line in sorted order
///
pub struct SetFileStore {
    dir: PathBuf,
}

impl SetFileStore {
    pub fn new<P: AsRef<Path>>(dir: P) -> Self {
        Self {
            dir: dir.as_ref().to_owned(),
        }
    }

    /// Store for a project directory (sets are placed in `<project>/data/samplesets`)
    pub fn for_project<P: AsRef<Path>>(project_dir: P) -> Self {
        Self::new(project_dir.as_ref().join(SAMPLESET_DIR))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn set_path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{}.txt", name))
    }

    fn create_dir(&self) -> anyhow::Result<()> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("Could not create directory {}", self.dir.display()))
    }
}

/// Read a sample list with one sample per line.  Lines are trimmed and blank lines skipped
pub fn read_sample_list<P: AsRef<Path>>(fname: P) -> anyhow::Result<BTreeSet<String>> {
    let fname = fname.as_ref();
    trace!("Opening sample list {} for reading", fname.display());
    let mut rdr = CompressIo::new()
        .path(fname)
        .bufreader()
        .with_context(|| format!("Error opening sample list {}", fname.display()))?;

    let mut buf = String::new();
    let mut line = 0;
    let mut samples = BTreeSet::new();
    while let Some(s) = get_next_line(&mut rdr, &mut buf)
        .with_context(|| format!("Error after reading {} lines from {}", line, fname.display()))?
    {
        line += 1;
        if !s.is_empty() {
            samples.insert(s.to_owned());
        }
    }
    trace!(
        "Read {} lines from {}; found {} samples",
        line,
        fname.display(),
        samples.len()
    );
    Ok(samples)
}

impl SetStore for SetFileStore {
    fn fingerprint(&self, name: &str) -> anyhow::Result<Option<Fingerprint>> {
        let p = self.set_path(name);
        // A missing file means the set has not been stored yet
        if !p.exists() {
            return Ok(None);
        }
        let samples = read_sample_list(&p)?;
        Ok(Some(Fingerprint::of(&samples)))
    }

    fn persist(&mut self, name: &str, members: &BTreeSet<String>) -> anyhow::Result<()> {
        self.create_dir()?;
        let p = self.set_path(name);
        let mut wrt = CompressIo::new()
            .path(&p)
            .bufwriter()
            .with_context(|| format!("Could not open {} for output", p.display()))?;
        for s in members.iter() {
            writeln!(wrt, "{}", s)
                .with_context(|| format!("Error writing sample set to {}", p.display()))?
        }
        wrt.flush()
            .with_context(|| format!("Error writing sample set to {}", p.display()))
    }

    fn mark_generated(&mut self, source: &str) -> anyhow::Result<()> {
        self.create_dir()?;
        let p = self.dir.join(MARKER_FILE);
        fs::write(
            &p,
            format!(
                "The files in this directory are generated from {}\nEdit those files, not these.\n",
                source
            ),
        )
        .with_context(|| format!("Error writing {}", p.display()))
    }
}

/// SampleSets
///
/// Result of materializing the sample sets
///
/// sets - final sorted membership of every set, including all_samples
/// updated - names of sets whose persisted copy was (re)written
///
#[derive(Debug, Default)]
pub struct SampleSets {
    sets: BTreeMap<String, Vec<String>>,
    updated: Vec<String>,
}

impl SampleSets {
    pub fn sets(&self) -> &BTreeMap<String, Vec<String>> {
        &self.sets
    }

    pub fn get(&self, name: &str) -> Option<&[String]> {
        self.sets.get(name).map(|v| v.as_slice())
    }

    pub fn updated(&self) -> &[String] {
        &self.updated
    }

    pub fn all_samples(&self) -> &[String] {
        self.get(ALL_SAMPLES).unwrap_or(&[])
    }
}

/// Set name from a set file path: the file name without its extension
fn set_name(p: &Path) -> anyhow::Result<String> {
    p.file_stem()
        .and_then(|s| s.to_str())
        .map(|s| s.to_owned())
        .ok_or_else(|| anyhow!("Could not get set name from {}", p.display()))
}

/// Collect set membership from all files matching `setfile_glob`.
/// The union of all sets is added as all_samples.
pub fn collect_samplesets(setfile_glob: &str) -> anyhow::Result<BTreeMap<String, BTreeSet<String>>> {
    let mut files = glob::glob(setfile_glob)
        .with_context(|| format!("Invalid sample set pattern {}", setfile_glob))?
        .collect::<Result<Vec<_>, _>>()
        .with_context(|| format!("Error matching sample set files with {}", setfile_glob))?;
    files.sort();

    if files.is_empty() {
        warn!("No sample set files match {}", setfile_glob)
    }

    let mut sets: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    let mut everything = BTreeSet::new();
    for p in files.iter() {
        let name = set_name(p)?;
        let samples = read_sample_list(p)?;
        debug!(
            "Set {}: {} samples from {}",
            name,
            samples.len(),
            p.display()
        );
        everything.extend(samples.iter().cloned());
        sets.entry(name).or_default().extend(samples);
    }
    sets.insert(ALL_SAMPLES.to_owned(), everything);
    Ok(sets)
}

/// Materialize sample sets from the files matching `setfile_glob` into `store`.
///
/// Each set is compared with its stored copy and only rewritten if the membership
/// has changed (or it has not been stored before).  `metadata` is the run/library
/// metadata file the sets refer to; it must exist.
pub fn make_samplesets<P: AsRef<Path>, S: SetStore>(
    metadata: P,
    setfile_glob: &str,
    store: &mut S,
) -> anyhow::Result<SampleSets> {
    let metadata = metadata.as_ref();
    if !metadata.is_file() {
        return Err(anyhow!(
            "Metadata file {} not found",
            metadata.display()
        ));
    }

    let sets = collect_samplesets(setfile_glob)?;

    store.mark_generated(setfile_glob)?;

    let mut res = SampleSets::default();
    for (name, members) in sets {
        let fp = Fingerprint::of(&members);
        let current = store.fingerprint(&name)?;
        if current.as_ref() != Some(&fp) {
            warn!(
                "Updating sample set {}, this will trigger reruns",
                name
            );
            store.persist(&name, &members)?;
            res.updated.push(name.clone());
        } else {
            trace!("Sample set {} unchanged ({})", name, fp);
        }
        res.sets.insert(name, members.into_iter().collect());
    }
    Ok(res)
}
