use std::fmt;
use std::io;

#[derive(Debug)]
pub enum Error {
    Io(io::Error),
    Source(String),
    FrequencyNotFound,
    ZeroFrequency,
    Unsupported(&'static str),
    InvalidArgs(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(e) => write!(f, "I/O error: {}", e),
            Error::Source(msg) => write!(f, "frequency source error: {}", msg),
            Error::FrequencyNotFound => write!(f, "no clock rate line found in frequency text"),
            Error::ZeroFrequency => write!(f, "announced clock rate parsed to zero"),
            Error::Unsupported(msg) => write!(f, "cycle counter unsupported: {}", msg),
            Error::InvalidArgs(msg) => write!(f, "invalid arguments: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::Io(e)
    }
}
