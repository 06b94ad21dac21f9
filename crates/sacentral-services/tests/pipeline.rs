mod support;

use chrono::Utc;
use serde_json::json;
use uuid::Uuid;

use sacentral_core::models::{
    AuditLevel, HandleType, SubPipelineStatus, SummaryResult, TaskKind, WorkflowStatus,
    WorkflowType, COMPILED_SA_PROGRESS, FINISHED_PROGRESS,
};
use sacentral_core::{AppError, MergeLevel, QueueName};
use sacentral_db::{FileRepository, ResultStore, TaskStore};
use sacentral_services::{AuditRequest, StartWorkflow};

use support::{Harness, BLOB_HOST};

const WELCOME: &str = "org/apache/jsp/welcome_jsp.java";
const LOGIN: &str = "org/apache/jsp/login_jsp.java";

fn start(code_id: Uuid, workflow_type: Option<WorkflowType>) -> StartWorkflow {
    StartWorkflow {
        code_id,
        workflow_type,
        trigger: "upload".to_string(),
        rule_template_id: None,
        limits: None,
    }
}

fn unit(file: &str, line: u32) -> serde_json::Value {
    json!({"file": file, "function": "_jspService", "line": line})
}

fn sa_finished(workflow_id: Uuid, task_id: Uuid, rule_id: Uuid) -> serde_json::Value {
    json!({
        "workflowId": workflow_id,
        "taskId": task_id,
        "success": true,
        "result": {
            rule_id.to_string(): {
                "ruleName": "Command Injection",
                "ruleCwe": "CWE-78",
                "ruleCategory": "injection",
                "ruleLevel": 3,
                "detectedResults": [
                    {
                        "sourceSig": "getParameter",
                        "sinkSig": "exec",
                        "path": [unit(WELCOME, 12), unit(WELCOME, 42)]
                    },
                    {
                        "sourceSig": "getHeader",
                        "sinkSig": "exec",
                        "path": [unit(LOGIN, 3), unit(WELCOME, 99)]
                    }
                ]
            }
        }
    })
}

fn ml_finished(workflow_id: Uuid, task_id: Uuid) -> serde_json::Value {
    json!({
        "workflowId": workflow_id,
        "taskId": task_id,
        "success": true,
        "result": {
            format!("/srv/engine/shop/WEB-INF/classes/{}", LOGIN): {"status": 200, "89": 0.99},
            "/srv/engine/shop/WEB-INF/classes/org/apache/jsp/broken_jsp.java": {"status": 500, "89": 0.99}
        }
    })
}

#[tokio::test]
async fn test_full_pipeline_compiles_analyses_and_merges() {
    let h = Harness::new();
    let code = h.seed_code(false).await;
    let template = h
        .seed_template(&[("Command Injection", "CWE-78", true), ("SQL Injection", "CWE-89", true)])
        .await;

    let workflow = h.service.start_workflow(start(code.id, None)).await.unwrap();
    assert_eq!(workflow.workflow_type, WorkflowType::CompileSaMl);
    assert_eq!(workflow.steps, 2);
    assert_eq!(workflow.rule_template_id, Some(template.id));

    let compile = h.take_one(QueueName::SaCompile).await;
    assert_eq!(compile["workflowId"], json!(workflow.id));
    assert_eq!(compile["filename"], "shop.zip");
    assert!(compile["source"].as_str().unwrap().starts_with(BLOB_HOST));

    h.deliver(
        QueueName::CompileFinish,
        json!({
            "workflowId": workflow.id,
            "success": true,
            "compileResult": {"name": "shop.war", "size": 4096, "objectKey": "compiled/shop.war", "md5": "9e10"}
        }),
    )
    .await;

    let after_compile = h.service.get_workflow(workflow.id).await.unwrap();
    assert_eq!(after_compile.progress, 1);
    assert_eq!(after_compile.timeline.len(), 1);
    let task = h.service.get_task(workflow.task_id).await.unwrap();
    assert_eq!(task.target_object_key.as_deref(), Some("compiled/shop.war"));
    assert_eq!(task.sa.progress, COMPILED_SA_PROGRESS);
    assert_eq!(task.sa.status, SubPipelineStatus::Running);
    assert_eq!(task.ml.status, SubPipelineStatus::Running);
    assert!(task.ml.started_at.is_some());
    assert_eq!(task.rule_snapshot.as_ref().unwrap().rules.len(), 2);

    let sa_payload = h.take_one(QueueName::SaEngine).await;
    let ml_payload = h.take_one(QueueName::MlEngine).await;
    assert_eq!(sa_payload, ml_payload);
    assert_eq!(sa_payload["taskId"], json!(task.id));
    assert_eq!(sa_payload["filename"], "shop.war");
    assert_eq!(sa_payload["maxMemory"], 6);
    assert_eq!(sa_payload["timeout"], 20);
    assert_eq!(sa_payload["rules"].as_array().unwrap().len(), 2);

    let rule_id = task.rule_snapshot.as_ref().unwrap().rules[0].rule_id;
    h.deliver(QueueName::SaFinish, sa_finished(workflow.id, task.id, rule_id))
        .await;

    let mid = h.service.get_workflow(workflow.id).await.unwrap();
    assert_eq!(mid.progress, 2);
    assert_eq!(mid.status, WorkflowStatus::Running);

    h.deliver(QueueName::MlFinish, ml_finished(workflow.id, task.id))
        .await;

    let done = h.service.get_workflow(workflow.id).await.unwrap();
    assert_eq!(done.status, WorkflowStatus::Complete);
    assert_eq!(done.progress, done.steps);

    let task = h.service.get_task(task.id).await.unwrap();
    assert_eq!(task.sa.status, SubPipelineStatus::Success);
    assert_eq!(task.sa.progress, FINISHED_PROGRESS);
    assert_eq!(task.ml.status, SubPipelineStatus::Success);
    assert!(task.merge_claimed);

    let results = task.summary.results();
    assert_eq!(results.len(), 3);
    assert!(results[0].from_sa && results[0].cross_file);
    assert_eq!(results[0].level, MergeLevel::Error);
    assert!(results[1].from_sa && !results[1].from_ml);
    assert_eq!(results[1].level, MergeLevel::Error);
    assert!(!results[2].from_sa && results[2].from_ml);
    assert_eq!(results[2].file, LOGIN);
    assert_eq!(results[2].name, "SQL Injection");
    assert_eq!(results[2].level, MergeLevel::Warning);
    assert_eq!(task.weakness_count, 3);

    let groups = h.service.list_sa_results(task.id).await.unwrap();
    assert_eq!(groups.len(), 1);
    assert_eq!(groups[0].detected_results[0].facade, format!("{}:42", WELCOME));
}

#[tokio::test]
async fn test_empty_rule_set_aborts_without_engine_payloads() {
    let h = Harness::new();
    let code = h.seed_code(true).await;
    h.seed_template(&[("Command Injection", "CWE-78", false)]).await;

    let workflow = h.service.start_workflow(start(code.id, None)).await.unwrap();

    assert_eq!(workflow.workflow_type, WorkflowType::SaMl);
    assert_eq!(workflow.status, WorkflowStatus::Aborted);
    let task = h.service.get_task(workflow.task_id).await.unwrap();
    assert_eq!(task.sa.status, SubPipelineStatus::Exception);
    assert_eq!(task.sa.progress, FINISHED_PROGRESS);
    assert_eq!(task.ml.status, SubPipelineStatus::Exception);
    assert!(task.rule_snapshot.is_none());
    assert_eq!(h.broker.len(QueueName::SaEngine).await, 0);
    assert_eq!(h.broker.len(QueueName::MlEngine).await, 0);
}

#[tokio::test]
async fn test_compile_failure_aborts_and_duplicates_are_ignored() {
    let h = Harness::new();
    let code = h.seed_code(false).await;
    h.seed_template(&[("Command Injection", "CWE-78", true)]).await;

    let workflow = h
        .service
        .start_workflow(start(code.id, Some(WorkflowType::CompileSa)))
        .await
        .unwrap();
    h.take_one(QueueName::SaCompile).await;

    let failed = json!({"workflowId": workflow.id, "success": false});
    h.deliver(QueueName::CompileFinish, failed.clone()).await;
    h.deliver(QueueName::CompileFinish, failed).await;

    let stored = h.service.get_workflow(workflow.id).await.unwrap();
    assert_eq!(stored.status, WorkflowStatus::Aborted);
    assert_eq!(stored.progress, 0);
    assert_eq!(h.broker.len(QueueName::SaEngine).await, 0);
}

#[tokio::test]
async fn test_compile_only_completes_after_single_step() {
    let h = Harness::new();
    let code = h.seed_code(false).await;

    let workflow = h
        .service
        .start_workflow(start(code.id, Some(WorkflowType::Compile)))
        .await
        .unwrap();
    assert!(workflow.rule_template_id.is_none());
    h.take_one(QueueName::SaCompile).await;

    let finished = json!({
        "workflowId": workflow.id,
        "success": true,
        "compileResult": {"name": "shop.war", "size": 1, "objectKey": "compiled/shop.war", "md5": "aa"}
    });
    h.deliver(QueueName::CompileFinish, finished.clone()).await;
    h.deliver(QueueName::CompileFinish, finished).await;

    let stored = h.service.get_workflow(workflow.id).await.unwrap();
    assert_eq!(stored.status, WorkflowStatus::Complete);
    assert_eq!(stored.progress, 1);
    assert_eq!(stored.timeline.len(), 1);
    assert_eq!(h.broker.len(QueueName::SaEngine).await, 0);
    let task = h.service.get_task(workflow.task_id).await.unwrap();
    assert_eq!(task.kind, None);
}

#[tokio::test]
async fn test_duplicate_sa_finish_is_persisted_once() {
    let h = Harness::new();
    let code = h.seed_code(true).await;
    h.seed_template(&[("Command Injection", "CWE-78", true)]).await;

    let workflow = h
        .service
        .start_workflow(start(code.id, Some(WorkflowType::Sa)))
        .await
        .unwrap();
    assert_eq!(h.broker.len(QueueName::MlEngine).await, 0);
    h.take_one(QueueName::SaEngine).await;

    let message = sa_finished(workflow.id, workflow.task_id, Uuid::new_v4());
    h.deliver(QueueName::SaFinish, message.clone()).await;
    h.deliver(QueueName::SaFinish, message).await;

    assert_eq!(h.store.sa_result_count(workflow.task_id).await, 1);
    let stored = h.service.get_workflow(workflow.id).await.unwrap();
    assert_eq!(stored.status, WorkflowStatus::Complete);
    assert_eq!(stored.progress, 1);
    let task = h.service.get_task(workflow.task_id).await.unwrap();
    assert_eq!(task.kind, Some(TaskKind::Sa));
    assert_eq!(task.sa.weakness_count, 2);
    assert_eq!(task.summary, SummaryResult::NotRun);
}

#[tokio::test]
async fn test_ml_first_then_sa_still_merges_once() {
    let h = Harness::new();
    let code = h.seed_code(true).await;
    h.seed_template(&[("Command Injection", "CWE-78", true)]).await;

    let workflow = h.service.start_workflow(start(code.id, None)).await.unwrap();
    let task_id = workflow.task_id;

    h.deliver(QueueName::MlFinish, ml_finished(workflow.id, task_id)).await;
    let task = h.service.get_task(task_id).await.unwrap();
    assert!(!task.summary.has_run());
    assert_eq!(
        h.service.get_workflow(workflow.id).await.unwrap().status,
        WorkflowStatus::Running
    );

    h.deliver(QueueName::SaFinish, sa_finished(workflow.id, task_id, Uuid::new_v4()))
        .await;
    let task = h.service.get_task(task_id).await.unwrap();
    assert!(task.merge_claimed);
    assert!(task.summary.has_run());
    assert!(!h
        .store
        .claim_merge(task_id, &SummaryResult::NotRun, 0)
        .await
        .unwrap());
    assert_eq!(h.service.get_task(task_id).await.unwrap().summary, task.summary);
    assert_eq!(
        h.service.get_workflow(workflow.id).await.unwrap().status,
        WorkflowStatus::Complete
    );
}

#[tokio::test]
async fn test_concurrent_finishers_merge_exactly_once() {
    let h = Harness::new();
    let code = h.seed_code(true).await;
    h.seed_template(&[("Command Injection", "CWE-78", true)]).await;

    let workflow = h.service.start_workflow(start(code.id, None)).await.unwrap();
    let task_id = workflow.task_id;

    let sa = sacentral_core::CompletionMessage::parse(
        QueueName::SaFinish,
        &sa_finished(workflow.id, task_id, Uuid::new_v4()),
    )
    .unwrap();
    let ml = sacentral_core::CompletionMessage::parse(
        QueueName::MlFinish,
        &ml_finished(workflow.id, task_id),
    )
    .unwrap();

    let (a, b) = tokio::join!(h.processor.process(sa), h.processor.process(ml));
    a.unwrap();
    b.unwrap();

    let task = h.service.get_task(task_id).await.unwrap();
    assert!(task.both_succeeded());
    assert!(task.merge_claimed);
    assert!(task.summary.has_run());
    assert_eq!(
        h.service.get_workflow(workflow.id).await.unwrap().status,
        WorkflowStatus::Complete
    );
}

#[tokio::test]
async fn test_sa_redelivery_after_interrupted_finish_merges_and_completes() {
    let h = Harness::new();
    let code = h.seed_code(true).await;
    h.seed_template(&[("Command Injection", "CWE-78", true)]).await;

    let workflow = h.service.start_workflow(start(code.id, None)).await.unwrap();
    let task_id = workflow.task_id;
    h.deliver(QueueName::MlFinish, ml_finished(workflow.id, task_id)).await;

    // A first SA delivery wrote its sub-pipeline state and stopped before merging.
    let task = h.service.get_task(task_id).await.unwrap();
    let sa_done = task.sa.finished(true, vec![], 0, Utc::now()).unwrap();
    assert!(h
        .store
        .transition_sa(task_id, SubPipelineStatus::Running, &sa_done)
        .await
        .unwrap());
    let stalled = h.service.get_task(task_id).await.unwrap();
    assert!(stalled.both_succeeded());
    assert!(!stalled.merge_claimed);
    assert_eq!(
        h.service.get_workflow(workflow.id).await.unwrap().status,
        WorkflowStatus::Running
    );

    h.deliver(QueueName::SaFinish, sa_finished(workflow.id, task_id, Uuid::new_v4()))
        .await;

    let task = h.service.get_task(task_id).await.unwrap();
    assert!(task.merge_claimed);
    assert!(task.summary.has_run());
    assert_eq!(h.store.sa_result_count(task_id).await, 0);
    assert_eq!(
        h.service.get_workflow(workflow.id).await.unwrap().status,
        WorkflowStatus::Complete
    );
}

#[tokio::test]
async fn test_failed_sa_only_run_aborts_with_no_weaknesses() {
    let h = Harness::new();
    let code = h.seed_code(true).await;
    h.seed_template(&[("Command Injection", "CWE-78", true)]).await;

    let workflow = h
        .service
        .start_workflow(start(code.id, Some(WorkflowType::Sa)))
        .await
        .unwrap();
    h.take_one(QueueName::SaEngine).await;

    let mut message = sa_finished(workflow.id, workflow.task_id, Uuid::new_v4());
    message["success"] = json!(false);
    h.deliver(QueueName::SaFinish, message).await;

    let task = h.service.get_task(workflow.task_id).await.unwrap();
    assert_eq!(task.sa.status, SubPipelineStatus::Exception);
    assert_eq!(task.sa.progress, FINISHED_PROGRESS);
    assert!(task.sa.result_ids.is_empty());
    assert_eq!(task.sa.weakness_count, 0);
    assert_eq!(task.weakness_count, 0);
    assert_eq!(h.store.sa_result_count(workflow.task_id).await, 0);
    assert_eq!(
        h.service.get_workflow(workflow.id).await.unwrap().status,
        WorkflowStatus::Aborted
    );
}

#[tokio::test]
async fn test_ml_only_run_completes_without_merge() {
    let h = Harness::new();
    let code = h.seed_code(true).await;
    h.seed_template(&[("SQL Injection", "CWE-89", true)]).await;

    let workflow = h
        .service
        .start_workflow(start(code.id, Some(WorkflowType::Ml)))
        .await
        .unwrap();
    assert_eq!(h.broker.len(QueueName::SaEngine).await, 0);
    let payload = h.take_one(QueueName::MlEngine).await;
    assert_eq!(payload["taskId"], json!(workflow.task_id));

    let message = ml_finished(workflow.id, workflow.task_id);
    h.deliver(QueueName::MlFinish, message.clone()).await;
    h.deliver(QueueName::MlFinish, message).await;

    let task = h.service.get_task(workflow.task_id).await.unwrap();
    assert_eq!(task.kind, Some(TaskKind::Ml));
    assert_eq!(task.ml.status, SubPipelineStatus::Success);
    assert_eq!(task.ml.raw_result.as_ref().map(|r| r.len()), Some(2));
    assert_eq!(task.sa.status, SubPipelineStatus::Pending);
    assert_eq!(task.summary, SummaryResult::NotRun);
    let stored = h.service.get_workflow(workflow.id).await.unwrap();
    assert_eq!(stored.status, WorkflowStatus::Complete);
    assert_eq!(stored.progress, stored.steps);
}

#[tokio::test]
async fn test_failing_merge_leaves_prior_summary_untouched() {
    let h = Harness::new();
    let code = h.seed_code(true).await;
    h.seed_template(&[("Command Injection", "CWE-78", true)]).await;

    let workflow = h.service.start_workflow(start(code.id, None)).await.unwrap();
    let task_id = workflow.task_id;
    let prior = SummaryResult::from_results(vec![], Utc::now());
    h.store.store_summary(task_id, &prior, 0).await.unwrap();

    h.deliver(QueueName::MlFinish, ml_finished(workflow.id, task_id)).await;
    // A sink without a file name cannot be keyed, so the correlation fails.
    let message = json!({
        "workflowId": workflow.id,
        "taskId": task_id,
        "success": true,
        "result": {
            "rule-78": {
                "ruleName": "Command Injection",
                "ruleCwe": "CWE-78",
                "ruleLevel": 3,
                "detectedResults": [
                    {"sourceSig": "getParameter", "sinkSig": "exec", "path": [unit("", 7)]}
                ]
            }
        }
    });
    h.deliver(QueueName::SaFinish, message).await;

    let task = h.service.get_task(task_id).await.unwrap();
    assert!(task.both_succeeded());
    assert!(!task.merge_claimed);
    assert_eq!(task.summary, prior);
    assert_eq!(
        h.service.get_workflow(workflow.id).await.unwrap().status,
        WorkflowStatus::Complete
    );

    let err = h.service.remerge(task_id).await.unwrap_err();
    assert!(matches!(err, AppError::InternalWithSource { .. }));
    assert_eq!(h.service.get_task(task_id).await.unwrap().summary, prior);
}

#[tokio::test]
async fn test_racing_compile_results_bind_a_single_artifact() {
    let h = Harness::new();
    let code = h.seed_code(false).await;
    h.seed_template(&[("Command Injection", "CWE-78", true)]).await;

    let workflow = h
        .service
        .start_workflow(start(code.id, Some(WorkflowType::CompileSa)))
        .await
        .unwrap();
    h.take_one(QueueName::SaCompile).await;

    let compiled = |key: &str| {
        sacentral_core::CompletionMessage::parse(
            QueueName::CompileFinish,
            &json!({
                "workflowId": workflow.id,
                "success": true,
                "compileResult": {"name": "shop.war", "size": 4096, "objectKey": key, "md5": "9e10"}
            }),
        )
        .unwrap()
    };
    let (a, b) = tokio::join!(
        h.processor.process(compiled("compiled/a.war")),
        h.processor.process(compiled("compiled/b.war"))
    );
    a.unwrap();
    b.unwrap();

    assert_eq!(h.store.file_count("compiled").await, 1);
    let task = h.service.get_task(workflow.task_id).await.unwrap();
    let bound = task.target_object_key.clone().unwrap();
    let registered = h
        .store
        .get_file(
            h.store
                .get_code(code.id)
                .await
                .unwrap()
                .unwrap()
                .compiled_file_id
                .unwrap(),
        )
        .await
        .unwrap()
        .unwrap();
    assert_eq!(registered.object_key, bound);

    let payload = h.take_one(QueueName::SaEngine).await;
    assert!(payload["source"].as_str().unwrap().contains(&bound));
    let stored = h.service.get_workflow(workflow.id).await.unwrap();
    assert_eq!(stored.progress, 1);
    assert_eq!(stored.timeline.len(), 1);
}

#[tokio::test]
async fn test_ml_failure_in_combined_pipeline_aborts_without_merge() {
    let h = Harness::new();
    let code = h.seed_code(true).await;
    h.seed_template(&[("Command Injection", "CWE-78", true)]).await;

    let workflow = h.service.start_workflow(start(code.id, None)).await.unwrap();
    let task_id = workflow.task_id;

    h.deliver(
        QueueName::MlFinish,
        json!({"workflowId": workflow.id, "taskId": task_id, "success": false}),
    )
    .await;
    h.deliver(QueueName::SaFinish, sa_finished(workflow.id, task_id, Uuid::new_v4()))
        .await;

    let task = h.service.get_task(task_id).await.unwrap();
    assert_eq!(task.ml.status, SubPipelineStatus::Exception);
    assert_eq!(task.sa.status, SubPipelineStatus::Success);
    assert!(!task.merge_claimed);
    assert_eq!(task.summary, SummaryResult::NotRun);
    assert_eq!(
        h.service.get_workflow(workflow.id).await.unwrap().status,
        WorkflowStatus::Aborted
    );

    let err = h.service.remerge(task_id).await.unwrap_err();
    assert!(matches!(err, AppError::EngineNotReady(_)));
}

#[tokio::test]
async fn test_completions_for_unknown_workflow_are_dropped() {
    let h = Harness::new();
    h.deliver(
        QueueName::SaFinish,
        sa_finished(Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4()),
    )
    .await;
    h.deliver(
        QueueName::CompileFinish,
        json!({"workflowId": Uuid::new_v4(), "success": false}),
    )
    .await;
    assert_eq!(h.store.workflow_count().await, 0);
}

#[tokio::test]
async fn test_analysis_only_requires_compiled_code() {
    let h = Harness::new();
    let code = h.seed_code(false).await;
    h.seed_template(&[("Command Injection", "CWE-78", true)]).await;

    let err = h
        .service
        .start_workflow(start(code.id, Some(WorkflowType::SaMl)))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::InvalidInput(_)));
    assert_eq!(h.store.workflow_count().await, 0);
}

#[tokio::test]
async fn test_start_rejects_out_of_range_limits() {
    let h = Harness::new();
    let code = h.seed_code(true).await;
    h.seed_template(&[("Command Injection", "CWE-78", true)]).await;

    let mut request = start(code.id, None);
    request.limits = Some(sacentral_core::models::EngineLimits {
        timeout_minutes: 45,
        max_memory_gb: 6,
    });
    let err = h.service.start_workflow(request).await.unwrap_err();
    assert!(matches!(err, AppError::InvalidInput(_)));
}

#[tokio::test]
async fn test_remerge_replays_identical_summary() {
    let h = Harness::new();
    let code = h.seed_code(true).await;
    h.seed_template(&[("Command Injection", "CWE-78", true), ("SQL Injection", "CWE-89", true)])
        .await;

    let workflow = h.service.start_workflow(start(code.id, None)).await.unwrap();
    let task_id = workflow.task_id;
    h.deliver(QueueName::SaFinish, sa_finished(workflow.id, task_id, Uuid::new_v4()))
        .await;
    h.deliver(QueueName::MlFinish, ml_finished(workflow.id, task_id)).await;

    let first = h.service.get_task(task_id).await.unwrap().summary;
    let replayed = h.service.remerge(task_id).await.unwrap();
    assert_eq!(first.results(), replayed.results());
}

#[tokio::test]
async fn test_audit_updates_finding_and_count() {
    let h = Harness::new();
    let code = h.seed_code(true).await;
    h.seed_template(&[("Command Injection", "CWE-78", true)]).await;

    let workflow = h
        .service
        .start_workflow(start(code.id, Some(WorkflowType::Sa)))
        .await
        .unwrap();
    let task_id = workflow.task_id;
    h.deliver(QueueName::SaFinish, sa_finished(workflow.id, task_id, Uuid::new_v4()))
        .await;

    let groups = h.service.list_sa_results(task_id).await.unwrap();
    let finding_id = groups[0].detected_results[0].id;
    let request = AuditRequest {
        handle_type: HandleType::FalsePositive,
        audit_level: AuditLevel::Recommended,
        memo: "sanitised upstream".to_string(),
    };

    let audited = h
        .service
        .audit_finding(task_id, finding_id, request.clone())
        .await
        .unwrap();
    assert_eq!(audited.audit.as_ref().unwrap().handle_type, HandleType::FalsePositive);
    h.service
        .audit_finding(task_id, finding_id, request.clone())
        .await
        .unwrap();

    let task = h.service.get_task(task_id).await.unwrap();
    assert_eq!(task.audit_count, 1);
    assert!(h.store.get_detected_result(finding_id).await.unwrap().unwrap().audit.is_some());

    let err = h
        .service
        .audit_finding(Uuid::new_v4(), finding_id, request)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));
}
