use serde::{Deserialize, Serialize};
use strata_base::{Position, Result, Status};

/// Default lower bound of a buffer size.
pub const DEFAULT_MIN_BUFFER_SIZE: usize = 4 << 10;
/// Default upper bound of a buffer size.
pub const DEFAULT_MAX_BUFFER_SIZE: usize = 64 << 10;

/// Buffer sizing of a buffered reader or writer.
///
/// Buffers start at `min_buffer_size` and grow geometrically with the
/// length of the current sequential run, up to `max_buffer_size`.
/// `buffer_size` pins both bounds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BufferOptions {
    pub min_buffer_size: usize,
    pub max_buffer_size: usize,
    pub buffer_size: Option<usize>,
}

impl Default for BufferOptions {
    fn default() -> Self {
        Self {
            min_buffer_size: DEFAULT_MIN_BUFFER_SIZE,
            max_buffer_size: DEFAULT_MAX_BUFFER_SIZE,
            buffer_size: None,
        }
    }
}

impl BufferOptions {
    /// A fixed buffer size.
    pub fn with_buffer_size(buffer_size: usize) -> Self {
        Self {
            buffer_size: Some(buffer_size),
            ..Self::default()
        }
    }

    pub fn min_buffer_size(&self) -> usize {
        self.buffer_size.unwrap_or(self.min_buffer_size)
    }

    pub fn max_buffer_size(&self) -> usize {
        self.buffer_size.unwrap_or(self.max_buffer_size)
    }

    pub fn validate(&self) -> Result<()> {
        if self.min_buffer_size() == 0 {
            return Err(Status::invalid_argument("buffer size must be positive"));
        }
        if self.min_buffer_size() > self.max_buffer_size() {
            return Err(Status::invalid_argument(format!(
                "min_buffer_size {} exceeds max_buffer_size {}",
                self.min_buffer_size(),
                self.max_buffer_size()
            )));
        }
        Ok(())
    }
}

/// Chooses buffer lengths for one sequential run of a buffered stream.
///
/// The length tracks how much the run has transferred so far, so buffers
/// double as a run continues and shrink back after a seek.
#[derive(Clone, Debug)]
pub struct BufferSizer {
    options: BufferOptions,
    base_pos: Position,
    exact_size: Option<Position>,
}

impl BufferSizer {
    pub fn new(options: BufferOptions) -> Self {
        Self {
            options,
            base_pos: 0,
            exact_size: None,
        }
    }

    pub fn options(&self) -> &BufferOptions {
        &self.options
    }

    /// Starts a new sequential run at `pos`.
    pub fn begin_run(&mut self, pos: Position) {
        self.base_pos = pos;
    }

    pub fn exact_size(&self) -> Option<Position> {
        self.exact_size
    }

    /// Records the known total size, which caps later buffers.
    pub fn set_exact_size(&mut self, exact_size: Option<Position>) {
        self.exact_size = exact_size;
    }

    /// Buffer length to use at `pos`: at least `min_length`, preferably
    /// `recommended_length` up to the maximum buffer size, never past a known
    /// end unless `min_length` requires it.
    pub fn buffer_length(&self, pos: Position, min_length: usize, recommended_length: usize) -> usize {
        let run = usize::try_from(pos.saturating_sub(self.base_pos)).unwrap_or(usize::MAX);
        let mut length = run
            .max(self.options.min_buffer_size())
            .min(self.options.max_buffer_size())
            .max(recommended_length.min(self.options.max_buffer_size()));
        if let Some(exact_size) = self.exact_size {
            let remaining = usize::try_from(exact_size.saturating_sub(pos)).unwrap_or(usize::MAX);
            length = length.min(remaining);
        }
        length.max(min_length)
    }
}

/// Options of a [`BufferedReader`](crate::BufferedReader).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BufferedReaderOptions {
    pub buffer: BufferOptions,
    /// The source may grow while being read: reaching its end is not final
    /// and its size is never cached.
    pub growing_source: bool,
    /// Report positions starting here instead of asking the backend. Random
    /// access is then unavailable.
    pub assumed_pos: Option<Position>,
}

/// Options of a file-backed writer.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileWriterOptions {
    pub buffer: BufferOptions,
    /// Open in append mode: writes always land at the end and random access
    /// is unavailable.
    pub append: bool,
}

/// Options of the position-shifting decorators.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PositionShiftingOptions {
    /// Added to the inner stream's positions.
    pub base_pos: Position,
}

/// Options of a [`LimitingReader`](crate::LimitingReader).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitingReaderOptions {
    /// Absolute position where reading stops.
    pub max_pos: Option<Position>,
    /// Length to read from the initial position; overrides `max_pos`.
    pub max_length: Option<Position>,
    /// The source must reach the limit; ending earlier is data loss.
    pub exact: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffers_grow_with_the_run() {
        let sizer = BufferSizer::new(BufferOptions::default());
        assert_eq!(sizer.buffer_length(0, 1, 0), DEFAULT_MIN_BUFFER_SIZE);
        assert_eq!(sizer.buffer_length(10_000, 1, 0), 10_000);
        assert_eq!(sizer.buffer_length(1 << 30, 1, 0), DEFAULT_MAX_BUFFER_SIZE);
    }

    #[test]
    fn seek_restarts_growth() {
        let mut sizer = BufferSizer::new(BufferOptions::default());
        sizer.begin_run(1 << 20);
        assert_eq!(sizer.buffer_length(1 << 20, 1, 0), DEFAULT_MIN_BUFFER_SIZE);
    }

    #[test]
    fn exact_size_caps_but_min_length_wins() {
        let mut sizer = BufferSizer::new(BufferOptions::default());
        sizer.set_exact_size(Some(100));
        assert_eq!(sizer.buffer_length(90, 1, 0), 10);
        assert_eq!(sizer.buffer_length(90, 20, 0), 20);
    }

    #[test]
    fn recommended_length_raises_buffer() {
        let sizer = BufferSizer::new(BufferOptions::default());
        assert_eq!(sizer.buffer_length(0, 1, 50_000), 50_000);
        assert_eq!(sizer.buffer_length(0, 1, 1 << 30), DEFAULT_MAX_BUFFER_SIZE);
        assert_eq!(sizer.buffer_length(0, 1 << 20, 0), 1 << 20);
    }

    #[test]
    fn validation_rejects_inverted_bounds() {
        let options = BufferOptions {
            min_buffer_size: 10,
            max_buffer_size: 5,
            buffer_size: None,
        };
        assert!(options.validate().is_err());
        assert!(BufferOptions::with_buffer_size(0).validate().is_err());
        assert!(BufferOptions::default().validate().is_ok());
    }

    #[test]
    fn options_deserialize_with_defaults() {
        let options: BufferedReaderOptions =
            serde_json::from_str(r#"{"growing_source": true}"#).unwrap();
        assert!(options.growing_source);
        assert_eq!(options.buffer, BufferOptions::default());
        assert_eq!(options.assumed_pos, None);
    }
}
