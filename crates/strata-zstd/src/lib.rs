//! Zstd compression for strata streams.
//!
//! [`ZstdWriter`] compresses everything written to it into one zstd frame
//! in another [`Writer`](strata_bytes::Writer). [`ZstdReader`] decompresses
//! one frame from a [`Reader`](strata_bytes::Reader). Both are built by
//! [`ZstdContexts`], which recycles codec contexts between streams.
//!
//! ```no_run
//! use strata_base::Owned;
//! use strata_bytes::{Reader, SliceReader, VecWriter, Writer};
//! use strata_zstd::{ZstdContexts, ZstdReaderOptions, ZstdWriterOptions};
//!
//! let contexts = ZstdContexts::default();
//! let mut compressed = Vec::new();
//! let mut writer = contexts.writer(
//!     Owned(VecWriter::new(&mut compressed)),
//!     ZstdWriterOptions::default(),
//! );
//! writer.write(b"hello").unwrap();
//! writer.close().unwrap();
//! drop(writer);
//!
//! let mut reader = contexts.reader(
//!     Owned(SliceReader::new(&compressed)),
//!     ZstdReaderOptions::default(),
//! );
//! let mut text = Vec::new();
//! reader.read_to_vec(5, &mut text).unwrap();
//! ```

pub mod contexts;
pub mod options;
pub mod reader;
pub mod writer;

pub use contexts::{PooledDecoder, PooledEncoder, ZstdContexts};
pub use options::{ZstdReaderOptions, ZstdWriterOptions, DEFAULT_COMPRESSION_LEVEL};
pub use reader::{ZstdReader, ZstdSource};
pub use writer::{ZstdSink, ZstdWriter};
