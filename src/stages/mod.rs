//! Pure pipeline stages.
//!
//! Everything here is a function of its inputs. Side effects (network,
//! model inference, persistence) live in `adapters` and are driven by the
//! orchestrator.

pub mod audio;
pub mod filter;
pub mod index;
pub mod normalize;
pub mod summarize;

pub use audio::{AudioError, PcmAudio};
pub use filter::{Catalogue, FilterError, NoiseFilter};
pub use index::{build_documents, chunk_text, ChunkMetadata, IndexDocument, TextChunk};
pub use normalize::{format_timestamp, normalize, NormalizeError};
pub use summarize::{build_prompt, timestamp_link, SummaryPrompt};
