use std::fmt;

use serde::{Deserialize, Serialize};

use super::document::DocumentId;

/// Key into the staging blob store. Source bytes live under
/// `<document_id>/source`; image regions extracted from a document are staged
/// under `<document_id>/images/<index>` between Extract and Annotate.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StoragePath(String);

impl StoragePath {
    pub fn source(document_id: &DocumentId) -> Self {
        Self(format!("{}/source", document_id.as_uuid()))
    }

    pub fn staged_image(document_id: &DocumentId, index: usize) -> Self {
        Self(format!("{}/images/{}", document_id.as_uuid(), index))
    }

    pub fn from_raw(path: impl Into<String>) -> Self {
        Self(path.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StoragePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
