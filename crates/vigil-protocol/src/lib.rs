//! Wire-level types and pure codec logic for the Vigil attachment protocol.
//!
//! This crate has no I/O of its own: it turns ring-supplied bytes into
//! typed chunks and turns verdicts back into bytes. The ring itself, the
//! session store, and everything else that touches a socket or a mapped
//! file live in `vigil-agent`.

pub mod buffer;
pub mod codec;
pub mod compression;
pub mod headers;
pub mod types;
pub mod verdict;

pub use buffer::Buffer;
pub use compression::CompressionStream;
pub use headers::{HeaderList, HttpHeader, HeaderValues};
pub use types::{ChunkType, CompressionType, HttpBody, TransactionMetadata};
pub use verdict::{ModificationDescriptor, ModificationType, Verdict, WebResponseDescriptor};
