use std::fs;
use std::path::PathBuf;

use crate::error::Error;

/// An opaque provider of the frequency announcement text. How the text is
/// obtained is outside the monitoring core; only the text matters.
pub trait FreqSource {
    fn read_text(&self) -> Result<String, Error>;
}

/// Reads the announcement from a cpuinfo-style file.
pub struct CpuinfoSource {
    path: PathBuf,
}

impl CpuinfoSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl FreqSource for CpuinfoSource {
    fn read_text(&self) -> Result<String, Error> {
        fs::read_to_string(&self.path)
            .map_err(|e| Error::Source(format!("cannot read {}: {}", self.path.display(), e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_reads_file_contents() {
        let path = std::env::temp_dir().join("tscmon_test_source_cpuinfo");
        {
            let mut f = fs::File::create(&path).unwrap();
            write!(f, "cpu MHz\t\t: 2400.000\n").unwrap();
        }
        let text = CpuinfoSource::new(&path).read_text().unwrap();
        assert!(text.contains("2400.000"));
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn test_missing_file_is_a_source_error() {
        let src = CpuinfoSource::new("/tmp/tscmon_nonexistent_cpuinfo");
        match src.read_text() {
            Err(Error::Source(msg)) => assert!(msg.contains("tscmon_nonexistent_cpuinfo")),
            other => panic!("expected Error::Source, got {:?}", other.map(|_| ())),
        }
    }
}
