use std::{fmt, io::BufRead, str::FromStr};

use clap::ArgMatches;

/// LogLevel
///
/// Represents minimum level of messages that will be logged
///
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogLevel {
    pub level: usize,
}

impl FromStr for LogLevel {
    type Err = &'static str;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "error" => Ok(LogLevel { level: 0 }),
            "warn" => Ok(LogLevel { level: 1 }),
            "info" => Ok(LogLevel { level: 2 }),
            "debug" => Ok(LogLevel { level: 3 }),
            "trace" => Ok(LogLevel { level: 4 }),
            "none" => Ok(LogLevel { level: 5 }),
            _ => Err("no match"),
        }
    }
}

impl LogLevel {
    pub fn is_none(&self) -> bool {
        self.level > 4
    }
    pub fn get_level(&self) -> usize {
        if self.level > 4 {
            0
        } else {
            self.level
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let level_str = ["error", "warn", "info", "debug", "trace", "none"];
        if self.level < 6 {
            write!(f, "{}", level_str[self.level])
        } else {
            write!(f, "unknown")
        }
    }
}

/// Initialize logging from command line arguments
pub fn init_log(m: &ArgMatches) -> anyhow::Result<()> {
    let verbose = m
        .get_one::<LogLevel>("loglevel")
        .copied()
        .unwrap_or(LogLevel { level: 2 });
    let quiet = verbose.is_none() || m.get_flag("quiet");
    let ts = m
        .get_one::<stderrlog::Timestamp>("timestamp")
        .copied()
        .unwrap_or(stderrlog::Timestamp::Off);

    stderrlog::new()
        .quiet(quiet)
        .verbosity(verbose.get_level())
        .timestamp(ts)
        .init()
        .map_err(|e| anyhow::anyhow!("Could not initialize logging: {}", e))
}

/// Read in next line and trim white space from both ends
pub fn get_next_line<'a, R: BufRead>(
    rdr: &mut R,
    buf: &'a mut String,
) -> anyhow::Result<Option<&'a str>> {
    buf.clear();
    if rdr.read_line(buf)? == 0 {
        Ok(None)
    } else {
        Ok(Some(buf.trim()))
    }
}

/// Read in next line and split on runs of white space
pub fn get_next_fields<'a, R: BufRead>(
    rdr: &mut R,
    buf: &'a mut String,
) -> anyhow::Result<Option<Vec<&'a str>>> {
    Ok(get_next_line(rdr, buf)?.map(|s| s.split_whitespace().collect()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_level_parsing() {
        assert_eq!(LogLevel::from_str("WARN").unwrap().level, 1);
        assert!(LogLevel::from_str("none").unwrap().is_none());
        assert_eq!(LogLevel::from_str("none").unwrap().get_level(), 0);
        assert!(LogLevel::from_str("verbose").is_err());
        assert_eq!(LogLevel { level: 3 }.to_string(), "debug");
    }

    #[test]
    fn line_readers() {
        let mut rdr = "  s1  \nchr1\t248956422\t112\t70  71\n\n".as_bytes();
        let mut buf = String::new();
        assert_eq!(get_next_line(&mut rdr, &mut buf).unwrap(), Some("s1"));
        assert_eq!(
            get_next_fields(&mut rdr, &mut buf).unwrap(),
            Some(vec!["chr1", "248956422", "112", "70", "71"])
        );
        assert_eq!(get_next_fields(&mut rdr, &mut buf).unwrap(), Some(vec![]));
        assert_eq!(get_next_line(&mut rdr, &mut buf).unwrap(), None);
    }
}
