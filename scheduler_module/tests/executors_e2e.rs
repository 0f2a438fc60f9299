mod test_support;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use scheduler_module::data_proxy::DataProxyClient;
use scheduler_module::task_store::{NewTask, RunStatus};
use scheduler_module::ExecutorRegistry;
use serde_json::json;
use summarize_module::{SummarizeClient, SummarizeConfig};
use test_support::engine_with_registry;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn registry_against(server: &MockServer) -> ExecutorRegistry {
    let data_proxy = Arc::new(
        DataProxyClient::new(server.uri(), Duration::from_secs(5)).expect("data proxy client"),
    );
    let summarizer = Arc::new(
        SummarizeClient::new(SummarizeConfig {
            api_url: server.uri(),
            api_key: Some("test-key".to_string()),
            model: "gpt-4o-mini".to_string(),
        })
        .expect("summarize client"),
    );
    ExecutorRegistry::production(data_proxy, summarizer, 7)
}

#[tokio::test]
async fn mail_digest_summarizes_fetched_messages() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/mail/messages"))
        .and(header("X-Tenant-Id", "acme"))
        .and(query_param("lookback_hours", "6"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [
                {"from": "boss@example.com", "subject": "Q3 numbers"},
                {"from": "noreply@example.com", "subject": "Newsletter"}
            ]
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(header("Authorization", "Bearer test-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{"message": {"role": "assistant", "content": "Inbox digest body"}}]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let (_temp, stores, engine) = engine_with_registry(registry_against(&server));
    let store = stores.get_store("acme").expect("store");
    let task = store
        .tasks()
        .create(NewTask {
            kind: "mail_digest".to_string(),
            name: "morning digest".to_string(),
            cron_expression: "0 7 * * *".to_string(),
            config: Some(json!({"lookback_hours": 6})),
            provider: None,
            model: None,
        })
        .expect("create task");
    store.tasks().request_run_now(task.id).expect("request");

    engine.reconcile(Utc::now()).await;

    let stored = store.tasks().get(task.id).expect("get").expect("task");
    assert_eq!(stored.last_status, RunStatus::Success);
    let results = store.results().get_by_task(task.id, 10).expect("results");
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].content, "Inbox digest body");
    assert_eq!(results[0].result_type, "mail_digest");
    assert_eq!(results[0].title, "morning digest");
    assert_eq!(results[0].data, Some(json!({"item_count": 2})));
}

#[tokio::test]
async fn calendar_briefing_with_no_events_skips_summarization() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/calendar/events"))
        .and(query_param("horizon_hours", "24"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"value": []})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{"message": {"role": "assistant", "content": "unused"}}]
        })))
        .expect(0)
        .mount(&server)
        .await;

    let (_temp, stores, engine) = engine_with_registry(registry_against(&server));
    let store = stores.get_store("acme").expect("store");
    let task = store
        .tasks()
        .create(NewTask {
            kind: "calendar_briefing".to_string(),
            name: "day briefing".to_string(),
            cron_expression: "0 6 * * *".to_string(),
            config: None,
            provider: None,
            model: None,
        })
        .expect("create task");
    store.tasks().request_run_now(task.id).expect("request");

    engine.reconcile(Utc::now()).await;

    let stored = store.tasks().get(task.id).expect("get").expect("task");
    assert_eq!(stored.last_status, RunStatus::Success);
    let results = store.results().get_by_task(task.id, 10).expect("results");
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].content, "Nothing to report.");
    assert_eq!(results[0].data, Some(json!({"item_count": 0})));
}

#[tokio::test]
async fn data_proxy_failure_records_an_error_without_a_result() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/mail/messages"))
        .respond_with(ResponseTemplate::new(502))
        .mount(&server)
        .await;

    let (_temp, stores, engine) = engine_with_registry(registry_against(&server));
    let store = stores.get_store("acme").expect("store");
    let task = store
        .tasks()
        .create(NewTask {
            kind: "mail_digest".to_string(),
            name: "digest".to_string(),
            cron_expression: "0 7 * * *".to_string(),
            config: None,
            provider: None,
            model: None,
        })
        .expect("create task");
    store.tasks().request_run_now(task.id).expect("request");

    engine.reconcile(Utc::now()).await;

    let stored = store.tasks().get(task.id).expect("get").expect("task");
    assert_eq!(stored.last_status, RunStatus::Error);
    assert!(store.results().get_by_task(task.id, 10).expect("results").is_empty());
    assert!(store.tasks().pending_run_requests().expect("pending").is_empty());
}

#[tokio::test]
async fn per_task_model_override_reaches_the_summarizer() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/mail/messages"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"subject": "hi"}])))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(wiremock::matchers::body_partial_json(json!({"model": "gpt-4o"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{"message": {"role": "assistant", "content": "short digest"}}]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let (_temp, stores, engine) = engine_with_registry(registry_against(&server));
    let store = stores.get_store("acme").expect("store");
    let task = store
        .tasks()
        .create(NewTask {
            kind: "mail_digest".to_string(),
            name: "digest".to_string(),
            cron_expression: "0 7 * * *".to_string(),
            config: None,
            provider: None,
            model: Some("gpt-4o".to_string()),
        })
        .expect("create task");
    store.tasks().request_run_now(task.id).expect("request");

    engine.reconcile(Utc::now()).await;

    let results = store.results().get_by_task(task.id, 10).expect("results");
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].content, "short digest");
}
