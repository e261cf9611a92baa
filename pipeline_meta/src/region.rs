use std::{
    collections::{BTreeMap, HashMap},
    fmt,
    path::Path,
    sync::Arc,
};

use anyhow::Context;
use serde::{Serialize, Serializer};

use crate::{
    fai::{fai_path, Contig, FaiReader},
    pipeline::{project_path, RefConfig, WindowSize},
};

/// Default coordinate base for region windows
pub const DEFAULT_BASE: u64 = 1;

/// ContigLengths
///
/// Contig name to length table for one reference.  Contigs are kept in index file order.
///
#[derive(Debug, Default)]
pub struct ContigLengths {
    contigs: Vec<(Contig, u64)>,
    ix: HashMap<Contig, usize>,
}

impl ContigLengths {
    /// Add a contig.  A repeated name replaces the earlier length but keeps its position
    pub fn insert(&mut self, ctg: Contig, len: u64) {
        if let Some(i) = self.ix.get(&ctg) {
            warn!("Contig {} found more than once in index", ctg);
            self.contigs[*i].1 = len
        } else {
            self.ix.insert(Arc::clone(&ctg), self.contigs.len());
            self.contigs.push((ctg, len))
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Contig, u64)> {
        self.contigs.iter().map(|(c, l)| (c, *l))
    }

    pub fn len(&self) -> usize {
        self.contigs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contigs.is_empty()
    }
}

#[cfg(test)]
impl ContigLengths {
    pub fn get(&self, ctg: &str) -> Option<u64> {
        self.ix.get(ctg).map(|i| self.contigs[*i].1)
    }
}

impl FromIterator<(Contig, u64)> for ContigLengths {
    fn from_iter<I: IntoIterator<Item = (Contig, u64)>>(iter: I) -> Self {
        let mut t = Self::default();
        for (c, l) in iter {
            t.insert(c, l)
        }
        t
    }
}

impl Serialize for ContigLengths {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_map(self.contigs.iter().map(|(c, l)| (&**c, l)))
    }
}

/// Build contig length tables for all references from their FASTA index files.
/// Relative FASTA paths are taken from `project_dir`.
pub fn make_chroms(
    refs: &BTreeMap<String, RefConfig>,
    project_dir: &Path,
) -> anyhow::Result<BTreeMap<String, ContigLengths>> {
    let mut chroms = BTreeMap::new();
    for (name, r) in refs.iter() {
        let fai = fai_path(project_path(project_dir, &r.fasta));
        let tab = FaiReader::open(&fai)?
            .collect::<anyhow::Result<ContigLengths>>()
            .with_context(|| format!("Error reading index for reference {}", name))?;
        debug!(
            "Reference {}: {} contigs read from {}",
            name,
            tab.len(),
            fai.display()
        );
        if tab.is_empty() {
            warn!("No contigs found in {} for reference {}", fai.display(), name)
        }
        chroms.insert(name.clone(), tab);
    }
    Ok(chroms)
}

/// RegionWindow
///
/// One window of a contig.  Displays as `contig:start-end` with coordinates zero padded
/// to 9 digits.  start is offset + base and end is offset + length, so base 1 gives
/// 1-based closed intervals and base 0 gives 0-based half open intervals.
///
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegionWindow {
    ctg: Contig,
    start: u64,
    end: u64,
}

#[cfg(test)]
impl RegionWindow {
    pub fn start(&self) -> u64 {
        self.start
    }
    pub fn end(&self) -> u64 {
        self.end
    }
}

impl fmt::Display for RegionWindow {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}:{:09}-{:09}", self.ctg, self.start, self.end)
    }
}

/// Split a contig of length `len` into consecutive windows of size `window`.
/// The last window is truncated to the end of the contig.
pub fn contig_windows(
    ctg: &Contig,
    len: u64,
    window: WindowSize,
    base: u64,
) -> impl Iterator<Item = RegionWindow> + '_ {
    let w = window.get();
    (0..len).step_by(w as usize).map(move |off| {
        let l = w.min(len - off);
        RegionWindow {
            ctg: Arc::clone(ctg),
            start: off + base,
            end: off + l,
        }
    })
}

/// Generate region windows for every reference.  Contigs are processed in index order.
pub fn make_regions(
    chroms: &BTreeMap<String, ContigLengths>,
    window: WindowSize,
    base: u64,
) -> BTreeMap<String, Vec<String>> {
    chroms
        .iter()
        .map(|(name, tab)| {
            let v: Vec<_> = tab
                .iter()
                .flat_map(|(ctg, len)| contig_windows(ctg, len, window, base))
                .map(|w| w.to_string())
                .collect();
            trace!(
                "Reference {}: {} windows of size {}",
                name,
                v.len(),
                window.get()
            );
            (name.clone(), v)
        })
        .collect()
}
