//! Test helpers: router over in-memory store, in-memory broker and a local
//! blob store rooted in a temporary directory.

#![allow(dead_code)]

use axum_test::TestServer;
use sacentral_api::constants;
use sacentral_api::setup::{routes, services};
use sacentral_core::models::{Rule, RuleLevel, RuleTemplate};
use sacentral_core::{CompletionMessage, Config, QueueName};
use sacentral_db::InMemoryStore;
use sacentral_storage::LocalBlobStore;
use sacentral_worker::InMemoryBroker;
use serde_json::Value;
use std::sync::Arc;
use tempfile::TempDir;
use uuid::Uuid;

pub const SOURCE_KEY: &str = "source/shop.zip";
pub const COMPILED_KEY: &str = "compiled/shop.war";

pub fn api_path(path: &str) -> String {
    format!("{}{}", constants::API_PREFIX, path)
}

pub struct TestApp {
    pub server: TestServer,
    pub state: Arc<sacentral_api::AppState>,
    pub store: Arc<InMemoryStore>,
    pub broker: Arc<InMemoryBroker>,
    pub _blob_dir: TempDir,
}

impl TestApp {
    pub fn client(&self) -> &TestServer {
        &self.server
    }

    /// Seed a default template with one enabled rule per `(name, cwe)`.
    pub async fn seed_default_template(&self, rules: &[(&str, &str)]) -> RuleTemplate {
        let mut rule_ids = Vec::new();
        for (name, cwe) in rules {
            let rule = Rule {
                id: Uuid::new_v4(),
                name: name.to_string(),
                cwe: cwe.to_string(),
                category: "injection".to_string(),
                level: RuleLevel::High,
                source: vec!["javax.servlet.ServletRequest.getParameter".to_string()],
                sink: vec!["java.sql.Statement.executeQuery".to_string()],
                enabled: true,
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

    /// Feed an engine reply through the same processor the consumer uses.
    pub async fn complete(&self, queue: QueueName, body: Value) {
        let message = CompletionMessage::parse(queue, &body).expect("valid completion");
        self.state
            .processor
            .process(message)
            .await
            .expect("completion processed");
    }
}

pub async fn setup_test_app() -> TestApp {
    let blob_dir = tempfile::tempdir().expect("temp dir");
    for key in [SOURCE_KEY, COMPILED_KEY] {
        let path = blob_dir.path().join(key);
        std::fs::create_dir_all(path.parent().expect("parent")).expect("blob dir");
        std::fs::write(&path, b"PK\x03\x04").expect("blob");
    }

    let blobs = LocalBlobStore::new(blob_dir.path(), "http://blobs.test".to_string())
        .await
        .expect("blob store");
    let store = Arc::new(InMemoryStore::new());
    let broker = Arc::new(InMemoryBroker::new());

    let state = services::initialize_services(
        &Config::default(),
        store.clone(),
        Arc::new(blobs),
        broker.clone(),
    )
    .expect("services");

    let server = TestServer::new(routes::setup_routes(state.clone())).expect("test server");

    TestApp {
        server,
        state,
        store,
        broker,
        _blob_dir: blob_dir,
    }
}
