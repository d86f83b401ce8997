use serde::{Deserialize, Serialize};

use super::storage_path::StoragePath;

/// One contiguous run of source text, positioned by its character offset in
/// the combined text stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextBlock {
    pub text: String,
    pub page: Option<u32>,
    pub offset: usize,
}

/// An image pulled out of the source document, still carrying its bytes.
/// Staged into the blob store before the Extract job completes.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageRegion {
    pub bytes: Vec<u8>,
    pub page: Option<u32>,
    /// Character offset in the combined text stream where the caption will
    /// be spliced in.
    pub position: usize,
}

/// Durable reference to a staged image region; what Extract hands to
/// Annotate through the job ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StagedImage {
    pub key: StoragePath,
    pub page: Option<u32>,
    pub position: usize,
}

/// Extractor output: ordered text blocks plus ordered image regions.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ExtractedContent {
    pub blocks: Vec<TextBlock>,
    pub images: Vec<ImageRegion>,
}

impl ExtractedContent {
    /// The combined text stream all downstream positions refer to.
    pub fn combined_text(&self) -> String {
        let mut out = String::new();
        for (i, block) in self.blocks.iter().enumerate() {
            if i > 0 {
                out.push_str("\n\n");
            }
            out.push_str(&block.text);
        }
        out
    }
}
