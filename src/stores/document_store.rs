use crate::errors::ToolError;
use crate::services::patch::{PatchCommand, PatchSink};
use crate::utils::fs_atomic::{read_json_object, write_json_file};
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// Local persistence for patched documents, one JSON file per bucket
/// (`content.json`, `meta.json`, `settings.json`) keyed by document id.
#[derive(Clone)]
pub struct DocumentStore {
    dir: PathBuf,
    queue: Arc<Mutex<()>>,
}

impl DocumentStore {
    pub fn with_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            queue: Arc::new(Mutex::new(())),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn bucket_path(&self, bucket: &str) -> PathBuf {
        self.dir.join(format!("{}.json", bucket))
    }

    fn load_bucket(&self, bucket: &str) -> Result<Map<String, Value>, ToolError> {
        read_json_object(self.bucket_path(bucket)).map_err(|err| {
            ToolError::internal(format!("Failed to load {} documents: {}", bucket, err))
        })
    }

    pub fn get(&self, bucket: &str, id: &str) -> Result<Option<Value>, ToolError> {
        Ok(self.load_bucket(bucket)?.get(id).cloned())
    }

    /// Top-level keys of `patch` replace the stored ones; nested objects
    /// are not merged.
    pub fn merge(
        &self,
        bucket: &str,
        id: &str,
        doc_type: &str,
        patch: &Map<String, Value>,
    ) -> Result<Value, ToolError> {
        let _guard = self.queue.lock().unwrap_or_else(|err| err.into_inner());
        let mut documents = self.load_bucket(bucket)?;
        let entry = documents
            .entry(id.to_string())
            .or_insert_with(|| {
                serde_json::json!({
                    "_id": id,
                    "type": doc_type,
                    "created": chrono::Utc::now().timestamp_millis(),
                })
            });
        if !entry.is_object() {
            *entry = Value::Object(Map::new());
        }
        if let Value::Object(doc) = entry {
            for (key, value) in patch {
                if key == "_id" || key == "type" {
                    continue;
                }
                doc.insert(key.clone(), value.clone());
            }
            doc.insert(
                "modified".to_string(),
                Value::from(chrono::Utc::now().timestamp_millis()),
            );
        }
        let merged = entry.clone();
        write_json_file(self.bucket_path(bucket), &Value::Object(documents)).map_err(|err| {
            ToolError::internal(format!("Failed to persist {} documents: {}", bucket, err))
        })?;
        Ok(merged)
    }
}

#[async_trait]
impl PatchSink for DocumentStore {
    /// File I/O and the bucket lock stay off the runtime workers.
    async fn apply(&self, command: &PatchCommand) -> Result<Value, ToolError> {
        let this = self.clone();
        let command = command.clone();
        tokio::task::spawn_blocking(move || {
            this.merge(
                command.resource.bucket(),
                &command.resource_id,
                command.resource.as_str(),
                &command.patch,
            )
        })
        .await
        .map_err(|_| ToolError::internal("Document store task failed"))?
    }
}
