//! HTTP API integration tests over in-memory state.
//!
//! Run with: `cargo test -p sacentral-api --test api_test`

mod helpers;

use helpers::{api_path, setup_test_app, COMPILED_KEY, SOURCE_KEY};
use sacentral_core::QueueName;
use serde_json::{json, Value};

async fn register_code(app: &helpers::TestApp) -> String {
    let res = app
        .client()
        .post(&api_path("/codes"))
        .json(&json!({"name": "shop.zip", "size": 2048, "md5": "d41d8cd9", "objectKey": SOURCE_KEY}))
        .await;
    assert_eq!(res.status_code(), 201, "register code");
    let code: Value = res.json();
    code["id"].as_str().expect("code id").to_string()
}

#[tokio::test]
async fn test_health() {
    let app = setup_test_app().await;
    let res = app.client().get("/health").await;
    assert_eq!(res.status_code(), 200);
    let body: Value = res.json();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["storage"], "local");
}

#[tokio::test]
async fn test_full_workflow_over_http() {
    let app = setup_test_app().await;
    app.seed_default_template(&[("SQL Injection", "CWE-89")]).await;
    let code_id = register_code(&app).await;

    let res = app
        .client()
        .post(&api_path(&format!("/codes/{}/workflows", code_id)))
        .json(&json!({"trigger": "upload", "timeout": 10}))
        .await;
    assert_eq!(res.status_code(), 201, "start workflow");
    let workflow: Value = res.json();
    assert_eq!(workflow["workflow_type"], "compile_sa_ml");
    assert_eq!(workflow["status"], "running");
    assert_eq!(workflow["steps"], 2);
    assert_eq!(workflow["limits"]["timeout_minutes"], 10);
    let workflow_id = workflow["id"].as_str().unwrap().to_string();
    let task_id = workflow["task_id"].as_str().unwrap().to_string();

    let compile = app.broker.drain(QueueName::SaCompile).await;
    assert_eq!(compile.len(), 1);
    assert_eq!(compile[0]["filename"], "shop.zip");
    assert!(compile[0]["source"]
        .as_str()
        .unwrap()
        .starts_with("http://blobs.test/source/shop.zip?expires="));

    app.complete(
        QueueName::CompileFinish,
        json!({
            "workflowId": workflow_id,
            "success": true,
            "compileResult": {"name": "shop.war", "size": 4096, "objectKey": COMPILED_KEY, "md5": "9e10"}
        }),
    )
    .await;

    let task: Value = app
        .client()
        .get(&api_path(&format!("/tasks/{}", task_id)))
        .await
        .json();
    assert_eq!(task["sa"]["progress"], 20);
    assert_eq!(task["sa"]["status"], "running");
    assert_eq!(task["ml"]["status"], "running");

    let sa_payloads = app.broker.drain(QueueName::SaEngine).await;
    assert_eq!(sa_payloads.len(), 1);
    assert_eq!(sa_payloads[0]["timeout"], 10);
    assert_eq!(sa_payloads[0]["maxMemory"], 6);
    assert_eq!(sa_payloads[0]["filename"], "shop.war");

    let res = app
        .client()
        .post(&api_path(&format!("/tasks/{}/merge", task_id)))
        .await;
    assert_eq!(res.status_code(), 409, "merge before engines finished");
    let err: Value = res.json();
    assert_eq!(err["code"], "ENGINE_NOT_READY");
    assert_eq!(err["recoverable"], true);

    app.complete(
        QueueName::SaFinish,
        json!({
            "workflowId": workflow_id,
            "taskId": task_id,
            "success": true,
            "result": {
                "rule-89": {
                    "ruleName": "SQL Injection",
                    "ruleCwe": "CWE-89",
                    "ruleLevel": 3,
                    "detectedResults": [{
                        "sourceSig": "getParameter",
                        "sinkSig": "executeQuery",
                        "path": [
                            {"file": "com/shop/Search.java", "line": 10},
                            {"file": "com/shop/Dao.java", "line": 77}
                        ]
                    }]
                }
            }
        }),
    )
    .await;
    app.complete(
        QueueName::MlFinish,
        json!({
            "workflowId": workflow_id,
            "taskId": task_id,
            "success": true,
            "result": {"/opt/ml/shop/WEB-INF/classes/com/shop/Dao.java": {"status": 200, "CWE-89": 0.4}}
        }),
    )
    .await;

    let workflow: Value = app
        .client()
        .get(&api_path(&format!("/workflows/{}", workflow_id)))
        .await
        .json();
    assert_eq!(workflow["status"], "complete");
    assert_eq!(workflow["progress"], 2);

    let task: Value = app
        .client()
        .get(&api_path(&format!("/tasks/{}", task_id)))
        .await
        .json();
    assert_eq!(task["summary"]["state"], "populated");
    assert_eq!(task["summary"]["results"][0]["level"], "ERROR");
    assert_eq!(task["summary"]["results"][0]["from_ml"], true);

    let res = app
        .client()
        .post(&api_path(&format!("/tasks/{}/merge", task_id)))
        .await;
    assert_eq!(res.status_code(), 200, "manual merge");
    let summary: Value = res.json();
    assert_eq!(summary["results"], task["summary"]["results"]);

    let groups: Vec<Value> = app
        .client()
        .get(&api_path(&format!("/tasks/{}/sa-results", task_id)))
        .await
        .json();
    assert_eq!(groups.len(), 1);
    assert_eq!(groups[0]["rule_cwe"], "CWE-89");
    let finding_id = groups[0]["detected_results"][0]["id"].as_str().unwrap();

    let res = app
        .client()
        .put(&api_path(&format!(
            "/tasks/{}/detected-results/{}/audit",
            task_id, finding_id
        )))
        .json(&json!({"handleType": "confirmed", "auditLevel": "mandatory", "memo": "reproduced"}))
        .await;
    assert_eq!(res.status_code(), 200, "audit");
    let audited: Value = res.json();
    assert_eq!(audited["audit"]["handle_type"], "confirmed");

    let task: Value = app
        .client()
        .get(&api_path(&format!("/tasks/{}", task_id)))
        .await
        .json();
    assert_eq!(task["audit_count"], 1);
}

#[tokio::test]
async fn test_register_code_for_missing_object_is_not_found() {
    let app = setup_test_app().await;
    let res = app
        .client()
        .post(&api_path("/codes"))
        .json(&json!({"name": "gone.zip", "size": 1, "md5": "00", "objectKey": "source/gone.zip"}))
        .await;
    assert_eq!(res.status_code(), 404);
    let err: Value = res.json();
    assert_eq!(err["code"], "NOT_FOUND");
}

#[tokio::test]
async fn test_start_rejects_out_of_range_timeout() {
    let app = setup_test_app().await;
    app.seed_default_template(&[("SQL Injection", "CWE-89")]).await;
    let code_id = register_code(&app).await;

    let res = app
        .client()
        .post(&api_path(&format!("/codes/{}/workflows", code_id)))
        .json(&json!({"timeout": 45}))
        .await;
    assert_eq!(res.status_code(), 400);
    let err: Value = res.json();
    assert_eq!(err["code"], "INVALID_INPUT");
    assert_eq!(app.store.workflow_count().await, 0);
}

#[tokio::test]
async fn test_body_failing_validation_is_rejected_before_the_service() {
    let app = setup_test_app().await;
    app.seed_default_template(&[("SQL Injection", "CWE-89")]).await;
    let code_id = register_code(&app).await;

    let res = app
        .client()
        .post(&api_path(&format!("/codes/{}/workflows", code_id)))
        .json(&json!({"trigger": "x".repeat(65)}))
        .await;
    assert_eq!(res.status_code(), 400);
    let err: Value = res.json();
    assert_eq!(err["code"], "INVALID_INPUT");
    assert_eq!(app.store.workflow_count().await, 0);

    let res = app
        .client()
        .post(&api_path("/codes"))
        .json(&json!({"name": "", "size": 1, "md5": "00", "objectKey": SOURCE_KEY}))
        .await;
    assert_eq!(res.status_code(), 400);
}

#[tokio::test]
async fn test_malformed_body_is_bad_request() {
    let app = setup_test_app().await;
    let res = app
        .client()
        .post(&api_path("/codes"))
        .json(&json!({"name": "shop.zip", "size": "large"}))
        .await;
    assert_eq!(res.status_code(), 400);
    let err: Value = res.json();
    assert_eq!(err["code"], "INVALID_INPUT");
}

#[tokio::test]
async fn test_unknown_workflow_and_task_are_not_found() {
    let app = setup_test_app().await;
    let id = uuid::Uuid::new_v4();

    let res = app
        .client()
        .get(&api_path(&format!("/workflows/{}", id)))
        .await;
    assert_eq!(res.status_code(), 404);

    let res = app.client().get(&api_path(&format!("/tasks/{}", id))).await;
    assert_eq!(res.status_code(), 404);
}
