use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const COMPILED_FOLDER: &str = "compiled";

/// A blob registered in the file catalog
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredFile {
    pub id: Uuid,
    pub name: String,
    pub size: u64,
    pub md5: String,
    pub object_key: String,
    pub folder: String,
    pub created_at: DateTime<Utc>,
}

impl StoredFile {
    pub fn new(
        name: impl Into<String>,
        size: u64,
        md5: impl Into<String>,
        object_key: impl Into<String>,
        folder: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            size,
            md5: md5.into(),
            object_key: object_key.into(),
            folder: folder.into(),
            created_at: Utc::now(),
        }
    }
}

/// Uploaded source code and, once compiled, its compiled artifact
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodeData {
    pub id: Uuid,
    pub source_name: String,
    pub source_file_id: Uuid,
    pub compiled_file_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl CodeData {
    pub fn new(source_name: impl Into<String>, source_file_id: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            source_name: source_name.into(),
            source_file_id,
            compiled_file_id: None,
            created_at: Utc::now(),
        }
    }

    pub fn is_compiled(&self) -> bool {
        self.compiled_file_id.is_some()
    }
}
