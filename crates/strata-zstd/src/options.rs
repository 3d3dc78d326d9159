use serde::{Deserialize, Serialize};
use strata_base::{Position, Result, Status};
use strata_bytes::{BufferOptions, BufferedReaderOptions};

/// Compression level used when none is given.
pub const DEFAULT_COMPRESSION_LEVEL: i32 = 3;

/// Options of a [`ZstdWriter`](crate::ZstdWriter).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ZstdWriterOptions {
    /// Negative levels trade ratio for speed; see
    /// `zstd::compression_level_range()`.
    pub compression_level: i32,
    /// Uncompressed size announced up front. It is stored in the frame
    /// header, and writing a different amount fails.
    pub pledged_size: Option<Position>,
    pub buffer: BufferOptions,
}

impl Default for ZstdWriterOptions {
    fn default() -> Self {
        Self {
            compression_level: DEFAULT_COMPRESSION_LEVEL,
            pledged_size: None,
            buffer: BufferOptions::default(),
        }
    }
}

impl ZstdWriterOptions {
    pub fn validate(&self) -> Result<()> {
        let range = zstd::compression_level_range();
        if !range.contains(&self.compression_level) {
            return Err(Status::invalid_argument(format!(
                "compression level {} out of range [{}, {}]",
                self.compression_level,
                range.start(),
                range.end()
            )));
        }
        self.buffer.validate()
    }
}

/// Options of a [`ZstdReader`](crate::ZstdReader).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ZstdReaderOptions {
    /// The compressed source may still be growing: a truncated frame is not
    /// an error until close, and reading retries.
    pub growing_source: bool,
    pub buffer: BufferOptions,
}

impl From<ZstdReaderOptions> for BufferedReaderOptions {
    fn from(options: ZstdReaderOptions) -> Self {
        BufferedReaderOptions {
            buffer: options.buffer,
            growing_source: options.growing_source,
            assumed_pos: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_base::ErrorKind;

    #[test]
    fn deserializes_with_defaults() {
        let options: ZstdWriterOptions =
            serde_json::from_str(r#"{ "pledged_size": 100 }"#).unwrap();
        assert_eq!(options.compression_level, DEFAULT_COMPRESSION_LEVEL);
        assert_eq!(options.pledged_size, Some(100));
        assert_eq!(options.buffer, BufferOptions::default());

        let options: ZstdReaderOptions =
            serde_json::from_str(r#"{ "growing_source": true }"#).unwrap();
        assert!(options.growing_source);
    }

    #[test]
    fn rejects_out_of_range_level() {
        let options = ZstdWriterOptions {
            compression_level: 1000,
            ..Default::default()
        };
        let err = options.validate().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        assert!(ZstdWriterOptions::default().validate().is_ok());
    }
}
