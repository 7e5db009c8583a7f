use super::*;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{delete, get, post},
    Json, Router,
};
use tokio::net::TcpListener;

#[derive(Clone, Default)]
struct BusServerState {
    topics: Arc<Mutex<Vec<String>>>,
    subscribers: Arc<Mutex<Vec<String>>>,
    published: Arc<Mutex<Vec<Envelope>>>,
    stream_body: Arc<Mutex<String>>,
}

async fn list_topics(State(state): State<BusServerState>) -> Json<Vec<String>> {
    Json(state.topics.lock().await.clone())
}

async fn create_topic(State(state): State<BusServerState>, Path(topic): Path<String>) -> StatusCode {
    let mut topics = state.topics.lock().await;
    if topics.contains(&topic) {
        return StatusCode::CONFLICT;
    }
    topics.push(topic);
    StatusCode::CREATED
}

async fn add_subscriber(
    State(state): State<BusServerState>,
    Path((_topic, subscriber)): Path<(String, String)>,
) -> StatusCode {
    state.subscribers.lock().await.push(subscriber);
    StatusCode::CREATED
}

async fn stream(State(state): State<BusServerState>) -> String {
    state.stream_body.lock().await.clone()
}

async fn publish(State(state): State<BusServerState>, Json(envelope): Json<Envelope>) -> StatusCode {
    state.published.lock().await.push(envelope);
    StatusCode::OK
}

async fn remove_subscriber(
    State(state): State<BusServerState>,
    Path((_topic, subscriber)): Path<(String, String)>,
) -> StatusCode {
    state.subscribers.lock().await.retain(|s| s != &subscriber);
    StatusCode::OK
}

async fn spawn_bus_server(state: BusServerState) -> String {
    let app = Router::new()
        .route("/topics", get(list_topics))
        .route("/topics/:topic", post(create_topic))
        .route("/topics/:topic/subscribers/:subscriber", post(add_subscriber))
        .route(
            "/topics/:topic/subscribers/:subscriber",
            delete(remove_subscriber),
        )
        .route("/topics/:topic/subscribers/:subscriber/stream", get(stream))
        .route("/topics/:topic/messages", post(publish))
        .with_state(state);
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    format!("http://{addr}")
}

#[tokio::test]
async fn list_topics_decodes_topic_names() {
    let state = BusServerState::default();
    state.topics.lock().await.push("taskmanager".to_string());
    let base_url = spawn_bus_server(state).await;

    let (client, _rx) = HttpBusClient::new(base_url);
    let topics = client.list_topics().await.expect("topics");
    assert_eq!(topics, vec!["taskmanager".to_string()]);
}

#[tokio::test]
async fn create_topic_conflict_maps_to_rejected() {
    let state = BusServerState::default();
    state.topics.lock().await.push("games".to_string());
    let base_url = spawn_bus_server(state).await;

    let (client, _rx) = HttpBusClient::new(base_url);
    let error = client.create_topic("games").await.expect_err("conflict");
    match error {
        BusError::Rejected {
            operation, status, ..
        } => {
            assert_eq!(operation, "create");
            assert_eq!(status, 409);
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn publish_sends_the_envelope_verbatim() {
    let state = BusServerState::default();
    let base_url = spawn_bus_server(state.clone()).await;

    let (client, _rx) = HttpBusClient::new(base_url);
    let envelope = Envelope {
        message_id: None,
        correlation_id: Some("abc".to_string()),
        body: "{\"state\":\"stopped\"}".to_string(),
    };
    client.publish("games", &envelope).await.expect("publish");

    let published = state.published.lock().await;
    assert_eq!(published.as_slice(), &[envelope]);
}

#[tokio::test]
async fn subscribe_registers_and_forwards_stream_chunks() {
    let state = BusServerState::default();
    *state.stream_body.lock().await = "data ={\"body\":\"{}\"}".to_string();
    let base_url = spawn_bus_server(state.clone()).await;

    let (client, mut rx) = HttpBusClient::new(base_url);
    client
        .subscribe("UIEvents", "games_app")
        .await
        .expect("subscribe");

    assert_eq!(
        state.subscribers.lock().await.as_slice(),
        &["games_app".to_string()]
    );

    let delivery = tokio::time::timeout(std::time::Duration::from_secs(5), rx.recv())
        .await
        .expect("delivery before timeout")
        .expect("open channel");
    assert_eq!(delivery.topic, "UIEvents");
    assert_eq!(delivery.payload, "data ={\"body\":\"{}\"}");
}
