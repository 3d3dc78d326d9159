//! Byte streams for strata: the [`Reader`] and [`Writer`] contracts and the
//! readers and writers built on them.
//!
//! A stream exposes a window of buffered bytes. Small reads and writes touch
//! only the window; the `*_slow` hooks run when the window is exhausted. On
//! top of that contract this crate provides:
//!
//! - [`BufferedReader`] and [`BufferedWriter`], which turn a simple
//!   [`ReadBackend`] or [`WriteBackend`] into a full stream with buffer
//!   sizing, copy avoidance for large transfers, and capability memoization.
//! - Memory streams: [`MemoryReader`] ([`SliceReader`], [`BytesReader`]) and
//!   [`VecWriter`].
//! - Files: [`FileReader`], [`FileWriter`], and [`map_file`] for memory
//!   mapped reading.
//! - Decorators which alias their inner stream's window instead of copying:
//!   [`PositionShiftingReader`], [`PositionShiftingWriter`],
//!   [`LimitingReader`].
//!
//! Operations return `Ok(true)` on success, `Ok(false)` at a clean end of
//! data, and `Err` on failure. Failures are sticky: once a stream fails,
//! every later operation reports the same status.

pub mod buffered_reader;
pub mod buffered_writer;
pub mod file_reader;
pub mod file_writer;
pub mod limiting_reader;
pub mod memory;
pub mod mmap_reader;
pub mod options;
pub mod position_shifting;
pub mod reader;
pub mod writer;

pub use buffered_reader::{BufferedReader, Fill, ReadBackend};
pub use buffered_writer::{BufferedWriter, WriteBackend};
pub use file_reader::{FileReader, FileSource};
pub use file_writer::{FileSink, FileWriter};
pub use limiting_reader::LimitingReader;
pub use memory::{BytesReader, MemoryReader, MemorySource, SliceReader, VecWriter};
pub use mmap_reader::{map_file, map_path};
pub use options::{
    BufferOptions, BufferSizer, BufferedReaderOptions, FileWriterOptions, LimitingReaderOptions,
    PositionShiftingOptions, DEFAULT_MAX_BUFFER_SIZE, DEFAULT_MIN_BUFFER_SIZE,
};
pub use position_shifting::{PositionShiftingReader, PositionShiftingWriter};
pub use reader::{Reader, ReaderBase};
pub use writer::{FlushType, Writer, WriterBase};

pub use strata_base::{Position, Result, Status};
