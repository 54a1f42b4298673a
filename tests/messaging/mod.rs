use std::sync::Arc;

use media_pipeline::config::{BrokerConfig, PipelineConfig};
use media_pipeline::database::{InMemoryStore, PipelineStore};
use media_pipeline::messaging::{MessagingError, QueueBroker, QueueTopology, RabbitMqBroker};
use media_pipeline::models::{MediaKind, NewItem, NewTask};
use media_pipeline::orchestration::PipelineSystem;
use media_pipeline::state_machine::{ItemStep, StageAction};
use media_pipeline::PipelineError;
use serde_json::json;
use wiremock::matchers::{basic_auth, body_partial_json, method, path, path_regex};
use wiremock::{Mock, MockServer, ResponseTemplate};

const PUBLISH_PATH: &str = "/api/exchanges/%2F/amq.default/publish";

fn broker_for(server: &MockServer) -> RabbitMqBroker {
    RabbitMqBroker::new(&BrokerConfig {
        base_url: server.uri(),
        username: "pipeline".to_string(),
        password: "secret".to_string(),
        ..BrokerConfig::default()
    })
    .unwrap()
}

#[tokio::test]
async fn test_publish_posts_persistent_message_to_default_exchange() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(PUBLISH_PATH))
        .and(basic_auth("pipeline", "secret"))
        .and(body_partial_json(json!({
            "routing_key": "audio_clear_queue",
            "payload_encoding": "string",
            "properties": {"delivery_mode": 2, "priority": 7}
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"routed": true})))
        .expect(1)
        .mount(&server)
        .await;

    let payload = json!({"task_info": {"id": 3}, "metadata": {"priority": 7}});
    broker_for(&server)
        .publish("audio_clear_queue", &payload)
        .await
        .unwrap();

    let received = server.received_requests().await.unwrap();
    let body: serde_json::Value = received[0].body_json().unwrap();
    let forwarded: serde_json::Value =
        serde_json::from_str(body["payload"].as_str().unwrap()).unwrap();
    assert_eq!(forwarded, payload);
}

#[tokio::test]
async fn test_priority_is_capped_at_queue_maximum() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(PUBLISH_PATH))
        .and(body_partial_json(json!({"properties": {"priority": 10}})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"routed": true})))
        .expect(1)
        .mount(&server)
        .await;

    broker_for(&server)
        .publish("transcribe_queue", &json!({"metadata": {"priority": 200}}))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_unrouted_publish_is_an_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(PUBLISH_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"routed": false})))
        .mount(&server)
        .await;

    let err = broker_for(&server)
        .publish("voice_extract_queue", &json!({}))
        .await
        .unwrap_err();
    assert!(matches!(err, MessagingError::Unroutable { ref queue_name } if queue_name == "voice_extract_queue"));
}

#[tokio::test]
async fn test_http_errors_are_classified() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(PUBLISH_PATH))
        .and(body_partial_json(json!({"routing_key": "fast_process_queue"})))
        .respond_with(ResponseTemplate::new(401).set_body_string("Not_Authorized"))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(PUBLISH_PATH))
        .and(body_partial_json(json!({"routing_key": "transcribe_queue"})))
        .respond_with(
            ResponseTemplate::new(404)
                .set_body_json(json!({"error": "Object Not Found", "reason": "vhost_not_found"})),
        )
        .mount(&server)
        .await;

    let broker = broker_for(&server);
    let auth = broker.publish("fast_process_queue", &json!({})).await.unwrap_err();
    assert!(matches!(auth, MessagingError::Authentication { .. }));

    let missing = broker.publish("transcribe_queue", &json!({})).await.unwrap_err();
    assert!(matches!(
        missing,
        MessagingError::HttpStatus { status: 404, ref body, .. } if body == "vhost_not_found"
    ));
}

#[tokio::test]
async fn test_provision_declares_full_topology() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path_regex(r"^/api/exchanges/%2F/[^/]+$"))
        .respond_with(ResponseTemplate::new(201))
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path("/api/queues/%2F/audio_clear_queue"))
        .and(body_partial_json(json!({
            "durable": true,
            "arguments": {"x-dead-letter-exchange": "task_dlx", "x-max-priority": 10}
        })))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path_regex(r"^/api/queues/%2F/[^/]+$"))
        .respond_with(ResponseTemplate::new(204))
        .expect(4)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path_regex(r"^/api/bindings/%2F/e/[^/]+/q/[^/]+$"))
        .respond_with(ResponseTemplate::new(201))
        .expect(5)
        .mount(&server)
        .await;

    let config = BrokerConfig {
        base_url: server.uri(),
        ..BrokerConfig::default()
    };
    let topology = QueueTopology::from_config(&config);
    RabbitMqBroker::new(&config)
        .unwrap()
        .provision(&topology)
        .await
        .unwrap();
}

#[tokio::test]
async fn test_health_check_follows_overview_endpoint() {
    let server = MockServer::start().await;
    let broker = broker_for(&server);
    assert!(!broker.is_alive().await);

    Mock::given(method("GET"))
        .and(path("/api/overview"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"rabbitmq_version": "3.13"})))
        .mount(&server)
        .await;
    assert!(broker.is_alive().await);
    assert!(broker.health_check().await.unwrap());
    assert_eq!(broker.provider_name(), "rabbitmq");
}

#[tokio::test]
async fn test_unroutable_dispatch_fails_the_item() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(PUBLISH_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"routed": false})))
        .mount(&server)
        .await;

    let store = Arc::new(InMemoryStore::new());
    let broker = Arc::new(broker_for(&server));
    let system = PipelineSystem::new(PipelineConfig::default(), store.clone(), broker);
    let task = store.insert_task(NewTask::new(1, "calls")).await.unwrap();
    let item = store
        .insert_item(NewItem::new(task.task_id, "call.wav", MediaKind::Audio, "https://files/call.wav"))
        .await
        .unwrap();

    let err = system
        .dispatcher()
        .dispatch(item.item_id, StageAction::Clear, Default::default())
        .await
        .unwrap_err();

    assert!(matches!(err, PipelineError::Transport(MessagingError::Unroutable { .. })));
    let item = store.find_item(item.item_id).await.unwrap().unwrap();
    assert_eq!(item.step(), ItemStep::Failed);
    assert_eq!(item.retry_count, 1);
}
