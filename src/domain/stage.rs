use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Pipeline phases in strict per-document order. Embed is the only fan-out
/// stage: one child job per chunk, gated into Store by the fan-in counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Stage {
    Extract,
    Annotate,
    Chunk,
    Embed,
    Store,
}

impl Stage {
    pub const ALL: [Stage; 5] = [
        Stage::Extract,
        Stage::Annotate,
        Stage::Chunk,
        Stage::Embed,
        Stage::Store,
    ];

    /// The stage whose job `complete` creates next. Chunk fans out into Embed
    /// children and Embed fan-in creates Store, so both transitions are
    /// handled specially by the Ledger; this covers the linear hops.
    pub fn next(&self) -> Option<Stage> {
        match self {
            Stage::Extract => Some(Stage::Annotate),
            Stage::Annotate => Some(Stage::Chunk),
            Stage::Chunk => Some(Stage::Embed),
            Stage::Embed => Some(Stage::Store),
            Stage::Store => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Extract => "EXTRACT",
            Stage::Annotate => "ANNOTATE",
            Stage::Chunk => "CHUNK",
            Stage::Embed => "EMBED",
            Stage::Store => "STORE",
        }
    }
}

impl FromStr for Stage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "EXTRACT" => Ok(Stage::Extract),
            "ANNOTATE" => Ok(Stage::Annotate),
            "CHUNK" => Ok(Stage::Chunk),
            "EMBED" => Ok(Stage::Embed),
            "STORE" => Ok(Stage::Store),
            _ => Err(format!("Invalid stage: {}", s)),
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
