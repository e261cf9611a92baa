use std::{collections::BTreeMap, io::Read, path::Path};

use anyhow::Context;
use compress_io::compress::CompressIo;
use serde::{Serialize, Serializer};

/// One sequencing run of one library
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct RunLib {
    pub run: String,
    pub library: String,
}

impl RunLib {
    pub fn new<S: Into<String>, T: Into<String>>(run: S, library: T) -> Self {
        Self {
            run: run.into(),
            library: library.into(),
        }
    }
}

/// RunLibTable
///
/// Mappings between (run, library) pairs and samples.
///
/// runlib2samp - (run, library) -> sample.  If a pair occurs more than once the last
///               occurrence wins
/// samp2runlib - sample -> (run, library) pairs in file order.  Every occurrence is kept
///
#[derive(Debug, Default)]
pub struct RunLibTable {
    runlib2samp: BTreeMap<RunLib, String>,
    samp2runlib: BTreeMap<String, Vec<RunLib>>,
}

impl RunLibTable {
    fn add(&mut self, rl: RunLib, sample: &str) {
        trace!(
            "Adding run {} library {} for sample {}",
            rl.run,
            rl.library,
            sample
        );
        self.samp2runlib
            .entry(sample.to_owned())
            .or_default()
            .push(rl.clone());
        if let Some(s) = self.runlib2samp.insert(rl, sample.to_owned()) {
            if s != sample {
                debug!("Sample {} for duplicated run/library replaced by {}", s, sample)
            }
        }
    }

    pub fn runlib2samp(&self) -> &BTreeMap<RunLib, String> {
        &self.runlib2samp
    }

    pub fn samp2runlib(&self) -> &BTreeMap<String, Vec<RunLib>> {
        &self.samp2runlib
    }

    pub fn runlibs(&self, sample: &str) -> Option<&[RunLib]> {
        self.samp2runlib.get(sample).map(|v| v.as_slice())
    }
}

#[cfg(test)]
impl RunLibTable {
    pub fn sample(&self, run: &str, library: &str) -> Option<&str> {
        self.runlib2samp
            .get(&RunLib::new(run, library))
            .map(|s| s.as_str())
    }
}

/// Serialization helper for the forward mapping.  A map keyed on a pair can not be
/// represented in YAML or JSON keys, so it is written as a list of records.
pub struct RunLibRecords<'a>(pub &'a RunLibTable);

impl<'a> Serialize for RunLibRecords<'a> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        #[derive(Serialize)]
        struct Rec<'b> {
            run: &'b str,
            library: &'b str,
            sample: &'b str,
        }
        serializer.collect_seq(self.0.runlib2samp.iter().map(|(rl, s)| Rec {
            run: &rl.run,
            library: &rl.library,
            sample: s,
        }))
    }
}

const COMPRESSION_SUFFIXES: [&str; 5] = ["gz", "bz2", "xz", "zst", "Z"];
const TAB_SUFFIXES: [&str; 2] = ["tsv", "tab"];

/// Check whether a metadata file name indicates tab delimited input, ignoring
/// any trailing compression suffix (i.e., samples.tsv or samples.tsv.gz)
pub fn is_tab_delimited<P: AsRef<Path>>(fname: P) -> bool {
    let name = match fname.as_ref().file_name().and_then(|s| s.to_str()) {
        Some(s) => s,
        None => return false,
    };
    let mut parts: Vec<_> = name.rsplitn(3, '.').collect();
    if parts.len() > 1 && COMPRESSION_SUFFIXES.contains(&parts[0]) {
        parts.remove(0);
    }
    parts.len() > 1 && TAB_SUFFIXES.contains(&parts[0])
}

/// A row is used if the library is set and is not a blank, and if the include
/// column, when present, is exactly "Y"
fn include_row(library: &str, include: Option<&str>) -> bool {
    let blank = library.is_empty()
        || library
            .get(..5)
            .map(|s| s.eq_ignore_ascii_case("blank"))
            .unwrap_or(false);
    !blank && include.map(|s| s == "Y").unwrap_or(true)
}

fn find_column(headers: &[String], col: &str) -> Option<usize> {
    headers.iter().position(|h| h == col)
}

/// Read run/library/sample table from `rdr`.  Column names are matched ignoring case.
/// Required columns are run, library and sample; include is optional.
pub fn read_runlib_table<R: Read>(
    rdr: R,
    tab_delimited: bool,
    name: &str,
) -> anyhow::Result<RunLibTable> {
    let mut csv_rdr = csv::ReaderBuilder::new()
        .delimiter(if tab_delimited { b'\t' } else { b',' })
        .flexible(true)
        .from_reader(rdr);

    let headers: Vec<String> = csv_rdr
        .headers()
        .with_context(|| format!("Error reading header line from {}", name))?
        .iter()
        .map(|s| s.trim().to_lowercase())
        .collect();

    let get_col = |col: &str| {
        find_column(&headers, col)
            .ok_or_else(|| anyhow!("{}: required column '{}' not found", name, col))
    };
    let run_ix = get_col("run")?;
    let lib_ix = get_col("library")?;
    let sample_ix = get_col("sample")?;
    let include_ix = find_column(&headers, "include");

    let mut table = RunLibTable::default();
    let mut line = 1;
    let mut skipped = 0;
    for rec in csv_rdr.records() {
        let rec = rec.with_context(|| {
            format!("Error after reading {} lines from {}", line, name)
        })?;
        line = rec.position().map(|p| p.line()).unwrap_or(line + 1);

        let library = rec.get(lib_ix).unwrap_or("");
        if !include_row(library, include_ix.map(|i| rec.get(i).unwrap_or(""))) {
            skipped += 1;
            continue;
        }
        let field = |ix: usize, col: &str| {
            rec.get(ix)
                .ok_or_else(|| anyhow!("{}:{} Missing value for column '{}'", name, line, col))
        };
        let run = field(run_ix, "run")?;
        let sample = field(sample_ix, "sample")?;
        table.add(RunLib::new(run, library), sample);
    }

    debug!(
        "Finished reading in {} lines from {}; {} run/library pairs for {} samples, {} rows excluded",
        line,
        name,
        table.runlib2samp.len(),
        table.samp2runlib.len(),
        skipped
    );
    Ok(table)
}

/// Build run/library/sample mappings from the metadata file `fname`.
/// Files ending in .tsv (or .tab) are read as tab delimited, others as comma delimited.
pub fn make_runlib2samp<P: AsRef<Path>>(fname: P) -> anyhow::Result<RunLibTable> {
    let fname = fname.as_ref();
    debug!("Reading in run/library metadata from {}", fname.display());
    let rdr = CompressIo::new()
        .path(fname)
        .bufreader()
        .with_context(|| format!("Error opening metadata file {}", fname.display()))?;
    read_runlib_table(
        rdr,
        is_tab_delimited(fname),
        fname.display().to_string().as_str(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read_csv(s: &str) -> anyhow::Result<RunLibTable> {
        read_runlib_table(s.as_bytes(), false, "test.csv")
    }

    #[test]
    fn blank_library_is_excluded() {
        let t = read_csv("run,library,sample,include\nR1,L1,S1,Y\nR2,,S2,Y\n").unwrap();
        assert_eq!(t.runlib2samp().len(), 1);
        assert_eq!(t.sample("R1", "L1"), Some("S1"));
        assert_eq!(t.samp2runlib().len(), 1);
        assert_eq!(t.runlibs("S1").unwrap(), &[RunLib::new("R1", "L1")]);
        assert!(t.runlibs("S2").is_none());
    }

    #[test]
    fn excluded_rows() {
        let t = read_csv(
            "Run,Library,Sample,Include\n\
             R1,BLANK_1,S1,Y\n\
             R1,blank2,S2,Y\n\
             R1,L3,S3,N\n\
             R1,L4,S4,y\n\
             R1,L5,S5,\n\
             R1,L6,S6,Y\n",
        )
        .unwrap();
        assert_eq!(t.runlib2samp().len(), 1);
        assert_eq!(t.sample("R1", "L6"), Some("S6"));
        assert_eq!(t.samp2runlib().keys().collect::<Vec<_>>(), vec!["S6"]);
    }

    #[test]
    fn library_containing_blank_is_kept() {
        let t = read_csv("run,library,sample\nR1,notblank,S1\nR1,bla,S2\n").unwrap();
        assert_eq!(t.sample("R1", "notblank"), Some("S1"));
        assert_eq!(t.sample("R1", "bla"), Some("S2"));
    }

    #[test]
    fn include_column_is_optional() {
        let t = read_csv("sample,run,library\nS1,R1,L1\nS1,R2,L1\nS2,R1,L2\n").unwrap();
        assert_eq!(t.runlib2samp().len(), 3);
        assert_eq!(
            t.runlibs("S1").unwrap(),
            &[RunLib::new("R1", "L1"), RunLib::new("R2", "L1")]
        );
    }

    // Duplicated run/library rows: the forward mapping keeps the last sample seen while the
    // reverse mapping keeps every row.  This is tolerated rather than guaranteed.
    #[test]
    fn duplicate_runlib_last_write_wins() {
        let t = read_csv("run,library,sample\nR1,L1,S1\nR1,L1,S2\n").unwrap();
        assert_eq!(t.sample("R1", "L1"), Some("S2"));
        assert_eq!(t.runlibs("S1").unwrap(), &[RunLib::new("R1", "L1")]);
        assert_eq!(t.runlibs("S2").unwrap(), &[RunLib::new("R1", "L1")]);
    }

    #[test]
    fn tab_delimited_input() {
        let t = read_runlib_table(
            "run\tlibrary\tsample\nR1\tL,1\tS1\n".as_bytes(),
            true,
            "test.tsv",
        )
        .unwrap();
        assert_eq!(t.sample("R1", "L,1"), Some("S1"));
    }

    #[test]
    fn missing_column_is_an_error() {
        let e = read_csv("run,lib,sample\nR1,L1,S1\n").unwrap_err();
        assert!(e.to_string().contains("library"));
    }

    #[test]
    fn short_row_is_an_error() {
        assert!(read_csv("run,library,sample\nR1,L1\n").is_err());
    }

    #[test]
    fn tab_detection() {
        assert!(is_tab_delimited("meta/run2lib.tsv"));
        assert!(is_tab_delimited("meta/run2lib.tsv.gz"));
        assert!(is_tab_delimited("run2lib.tab"));
        assert!(!is_tab_delimited("run2lib.csv"));
        assert!(!is_tab_delimited("run2lib.csv.gz"));
        assert!(!is_tab_delimited("tsv"));
        assert!(!is_tab_delimited("gz.tsv.txt"));
    }

    #[test]
    fn read_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("run2lib.tsv");
        std::fs::write(&p, "run\tlibrary\tsample\tinclude\nR1\tL1\tS1\tY\n").unwrap();
        let t = make_runlib2samp(&p).unwrap();
        assert_eq!(t.sample("R1", "L1"), Some("S1"));
        assert!(make_runlib2samp(dir.path().join("absent.csv")).is_err());
    }

    #[test]
    fn forward_mapping_records() {
        let t = read_csv("run,library,sample\nR2,L1,S2\nR1,L1,S1\n").unwrap();
        assert_eq!(
            serde_json::to_string(&RunLibRecords(&t)).unwrap(),
            r#"[{"run":"R1","library":"L1","sample":"S1"},{"run":"R2","library":"L1","sample":"S2"}]"#
        );
    }
}
