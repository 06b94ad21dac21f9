#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use sacentral_core::models::{CodeData, Rule, RuleLevel, RuleTemplate, StoredFile};
use sacentral_core::{CompletionMessage, QueueName, StorageBackend};
use sacentral_db::InMemoryStore;
use sacentral_services::{CompletionProcessor, PipelineContext, WorkflowService};
use sacentral_storage::{BlobStore, StorageResult};
use sacentral_worker::InMemoryBroker;

pub const BLOB_HOST: &str = "https://blobs.test";

/// Blob store that signs every key and reports every key as present.
pub struct FakeBlobStore;

#[async_trait]
impl BlobStore for FakeBlobStore {
    async fn presigned_url(&self, object_key: &str, expires_in: Duration) -> StorageResult<String> {
        Ok(format!(
            "{}/{}?expires={}",
            BLOB_HOST,
            object_key,
            expires_in.as_secs()
        ))
    }

    async fn exists(&self, _object_key: &str) -> StorageResult<bool> {
        Ok(true)
    }

    fn backend_type(&self) -> StorageBackend {
        StorageBackend::Local
    }
}

pub struct Harness {
    pub store: Arc<InMemoryStore>,
    pub broker: Arc<InMemoryBroker>,
    pub service: WorkflowService,
    pub processor: CompletionProcessor,
}

impl Harness {
    pub fn new() -> Self {
        let store = Arc::new(InMemoryStore::new());
        let broker = Arc::new(InMemoryBroker::new());
        let ctx = PipelineContext::new(store.clone(), Arc::new(FakeBlobStore), broker.clone());
        Self {
            store,
            broker,
            service: WorkflowService::new(ctx.clone()),
            processor: CompletionProcessor::new(ctx),
        }
    }

    /// Seed a code record; `compiled` also attaches a compiled artifact.
    pub async fn seed_code(&self, compiled: bool) -> CodeData {
        let source = StoredFile::new("shop.zip", 2048, "d41d8cd9", "source/shop.zip", "source");
        let mut code = CodeData::new("shop.zip", source.id);
        self.store.seed_file(source).await;
        if compiled {
            let war = StoredFile::new("shop.war", 4096, "9e107d9d", "compiled/shop.war", "compiled");
            code.compiled_file_id = Some(war.id);
            self.store.seed_file(war).await;
        }
        self.store.seed_code(code.clone()).await;
        code
    }

    /// Seed a default template holding one rule per `(name, cwe, enabled)`.
    pub async fn seed_template(&self, rules: &[(&str, &str, bool)]) -> RuleTemplate {
        let mut rule_ids = Vec::new();
        for (name, cwe, enabled) in rules {
            let rule = Rule {
                id: Uuid::new_v4(),
                name: name.to_string(),
                cwe: cwe.to_string(),
                category: "injection".to_string(),
                level: RuleLevel::High,
                source: vec!["javax.servlet.ServletRequest.getParameter".to_string()],
                sink: vec!["java.lang.Runtime.exec".to_string()],
                enabled: *enabled,
                deleted: false,
            };
            rule_ids.push(rule.id);
            self.store.seed_rule(rule).await;
        }
        let template = RuleTemplate {
            id: Uuid::new_v4(),
            name: "default".to_string(),
            rule_ids,
            enabled: true,
            is_default: true,
        };
        self.store.seed_template(template.clone()).await;
        template
    }

    /// Decode a wire payload the way the consumer does and process it.
    pub async fn deliver(&self, queue: QueueName, body: Value) {
        let message = CompletionMessage::parse(queue, &body).expect("valid completion message");
        self.processor
            .process(message)
            .await
            .expect("completion processed");
    }

    pub async fn take_one(&self, queue: QueueName) -> Value {
        let mut payloads = self.broker.drain(queue).await;
        assert_eq!(payloads.len(), 1, "expected exactly one message on {}", queue);
        payloads.remove(0)
    }
}
