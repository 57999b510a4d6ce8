//! Context management: history compaction and the summarizers it uses.

pub mod compaction;
pub mod summarizer;

pub use compaction::{CompactionResult, Compactor, ContextCompactor};
pub use summarizer::{KeywordSummarizer, ModelSummarizer, Summarizer, SummarizerError};
