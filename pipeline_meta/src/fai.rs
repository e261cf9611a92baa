use std::{
    io::BufRead,
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::Context;
use compress_io::compress::CompressIo;

use utils::get_next_fields;

/// Contig names are shared between the length tables and the region windows
pub type Contig = Arc<str>;

/// FaiReader
///
/// Lazily reads (contig name, contig length) pairs from a FASTA index (.fai) file
/// in file order.  Each line has five white space separated fields:
/// name, length, offset, line bases and line width.  Only the first two are used.
///
pub struct FaiReader<R: BufRead> {
    rdr: R,
    buf: String,
    name: PathBuf,
    line: usize,
    done: bool,
}

impl FaiReader<Box<dyn BufRead>> {
    pub fn open<P: AsRef<Path>>(fname: P) -> anyhow::Result<Self> {
        let fname = fname.as_ref();
        debug!("Reading in FASTA index from {}", fname.display());
        let rdr = CompressIo::new()
            .path(fname)
            .bufreader()
            .with_context(|| format!("Error opening FASTA index file {}", fname.display()))?;
        Ok(Self::new(Box::new(rdr), fname))
    }
}

impl<R: BufRead> FaiReader<R> {
    pub fn new<P: AsRef<Path>>(rdr: R, name: P) -> Self {
        Self {
            rdr,
            buf: String::new(),
            name: name.as_ref().to_owned(),
            line: 0,
            done: false,
        }
    }

    fn next_entry(&mut self) -> anyhow::Result<Option<(Contig, u64)>> {
        loop {
            let fields = match get_next_fields(&mut self.rdr, &mut self.buf).with_context(|| {
                format!(
                    "Error after reading {} lines from {}",
                    self.line,
                    self.name.display()
                )
            })? {
                Some(f) => f,
                None => return Ok(None),
            };
            self.line += 1;

            // Skip blank lines
            if fields.is_empty() {
                continue;
            }
            if fields.len() < 5 {
                return Err(anyhow!(
                    "{}:{} Expected 5 fields in FASTA index line, found {}",
                    self.name.display(),
                    self.line,
                    fields.len()
                ));
            }
            let len = fields[1].parse::<u64>().with_context(|| {
                format!(
                    "{}:{} Error reading length for contig {}",
                    self.name.display(),
                    self.line,
                    fields[0]
                )
            })?;
            trace!("Read contig {} with length {}", fields[0], len);
            return Ok(Some((Arc::from(fields[0]), len)));
        }
    }
}

impl<R: BufRead> Iterator for FaiReader<R> {
    type Item = anyhow::Result<(Contig, u64)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let res = self.next_entry().transpose();
        // Stop after the end of input or the first error
        if !matches!(res, Some(Ok(_))) {
            self.done = true
        }
        res
    }
}

/// Path of the index file for a FASTA file (FASTA path with .fai appended)
pub fn fai_path<P: AsRef<Path>>(fasta: P) -> PathBuf {
    let mut s = fasta.as_ref().as_os_str().to_owned();
    s.push(".fai");
    PathBuf::from(s)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read_all(s: &str) -> anyhow::Result<Vec<(Contig, u64)>> {
        FaiReader::new(s.as_bytes(), "test.fa.fai").collect()
    }

    #[test]
    fn reads_names_and_lengths_in_order() {
        let v = read_all("chr2\t242193529\t253105752\t60\t61\nchr1\t248956422\t112\t60\t61\n")
            .unwrap();
        assert_eq!(v.len(), 2);
        assert_eq!(&*v[0].0, "chr2");
        assert_eq!(v[0].1, 242193529);
        assert_eq!(&*v[1].0, "chr1");
        assert_eq!(v[1].1, 248956422);
    }

    #[test]
    fn blank_lines_are_skipped() {
        let v = read_all("chr1\t1000\t6\t60\t61\n\n  \nchr2\t500\t1030\t60\t61\n\n").unwrap();
        let names: Vec<_> = v.iter().map(|(c, _)| c.to_string()).collect();
        assert_eq!(names, vec!["chr1", "chr2"]);
        assert_eq!(v[1].1, 500);
    }

    #[test]
    fn short_line_is_an_error() {
        let e = read_all("chr1\t1000\t6\t60\t61\nchr2\t1000\n").unwrap_err();
        assert!(format!("{:#}", e).contains("test.fa.fai:2"));
    }

    #[test]
    fn non_integer_length_is_an_error() {
        assert!(read_all("chr1\t10k\t6\t60\t61\n").is_err());
        assert!(read_all("chr1\t-5\t6\t60\t61\n").is_err());
    }

    #[test]
    fn stops_after_first_error() {
        let mut rdr = FaiReader::new("chr1\tx\t6\t60\t61\nchr2\t5\t6\t60\t61\n".as_bytes(), "x");
        assert!(rdr.next().unwrap().is_err());
        assert!(rdr.next().is_none());
    }

    #[test]
    fn missing_index_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(FaiReader::open(dir.path().join("absent.fa.fai")).is_err());
    }

    #[test]
    fn index_path_appends_suffix() {
        assert_eq!(
            fai_path("refs/genome.fa"),
            PathBuf::from("refs/genome.fa.fai")
        );
    }
}
