//! Digests of the bytes flowing through strata streams.
//!
//! A [`Digester`] accumulates a checksum or hash. [`DigestingReader`] and
//! [`DigestingWriter`] wrap another stream, alias its buffer instead of
//! copying, and feed the digester exactly the bytes that pass through.
//!
//! # Digesters
//!
//! - [`Crc32Digester`] -- CRC-32 via `crc32fast`
//! - [`Blake3Digester`] -- BLAKE3, optionally keyed or context-separated

pub mod blake3_digester;
pub mod crc32_digester;
pub mod digester;
pub mod digesting_reader;
pub mod digesting_writer;

pub use blake3_digester::Blake3Digester;
pub use crc32_digester::Crc32Digester;
pub use digester::Digester;
pub use digesting_reader::DigestingReader;
pub use digesting_writer::DigestingWriter;
