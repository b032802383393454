//! Remote provider against an in-process HTTP endpoint

use orchestra_core::{CompletionRequest, ErrorKind, OrchestraError, RemoteProviderConfig};
use orchestra_provider::{Provider, RemoteProvider};
use pretty_assertions::assert_eq;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;

/// Serves one canned response to every connection and forwards raw requests
async fn serve(status: &'static str, body: &'static str) -> (String, mpsc::UnboundedReceiver<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                return;
            };
            let tx = tx.clone();
            tokio::spawn(async move {
                let raw = read_request(&mut socket).await;
                let _ = tx.send(raw);
                let response = format!(
                    "HTTP/1.1 {status}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                    body.len()
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            });
        }
    });

    (format!("http://{addr}/v1"), rx)
}

async fn read_request(socket: &mut tokio::net::TcpStream) -> String {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    loop {
        let n = socket.read(&mut chunk).await.unwrap_or(0);
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
        let text = String::from_utf8_lossy(&buf);
        if let Some(split) = text.find("\r\n\r\n") {
            let length = text[..split]
                .lines()
                .find_map(|l| {
                    let (name, value) = l.split_once(':')?;
                    name.eq_ignore_ascii_case("content-length")
                        .then(|| value.trim().parse::<usize>().ok())
                        .flatten()
                })
                .unwrap_or(0);
            if buf.len() >= split + 4 + length {
                break;
            }
        }
    }
    String::from_utf8_lossy(&buf).into_owned()
}

fn router_at(base_url: String) -> RemoteProvider {
    let mut config = RemoteProviderConfig::router();
    config.base_url = base_url;
    config.api_key = Some("sk-test".to_string());
    config.referer = Some("https://example.org".to_string());
    config.cost_per_1k_tokens = 1.0;
    RemoteProvider::router(config).unwrap()
}

#[tokio::test]
async fn completion_is_parsed_and_costed() {
    let (base, mut requests) = serve(
        "200 OK",
        r#"{"model":"openai/gpt-4o-mini","choices":[{"message":{"role":"assistant","content":"pong"}}],"usage":{"total_tokens":250}}"#,
    )
    .await;
    let provider = router_at(base);

    let response = provider
        .execute_completion(&CompletionRequest::new("ping").with_max_tokens(16))
        .await
        .unwrap();

    assert_eq!(response.text, "pong");
    assert_eq!(response.tokens_used, 250);
    assert!((response.cost_estimate - 0.25).abs() < 1e-9);
    assert_eq!(response.provider, "router");
    assert_eq!(response.model, "openai/gpt-4o-mini");

    let raw = requests.recv().await.unwrap();
    let lower = raw.to_ascii_lowercase();
    assert!(raw.starts_with("POST /v1/chat/completions"));
    assert!(lower.contains("authorization: bearer sk-test"));
    assert!(lower.contains("http-referer: https://example.org"));
    assert!(lower.contains("x-title: orchestra"));
    assert!(raw.contains(r#""max_tokens":16"#));
    assert!(raw.contains(r#""content":"ping""#));

    let metrics = provider.metrics();
    assert_eq!(metrics.successful_requests, 1);
    assert!((metrics.total_cost - 0.25).abs() < 1e-9);
}

#[tokio::test]
async fn unauthorized_is_configuration_error() {
    let (base, _requests) = serve("401 Unauthorized", r#"{"error":"bad key"}"#).await;
    let provider = router_at(base);

    let err = provider
        .execute_completion(&CompletionRequest::new("ping"))
        .await
        .unwrap_err();

    assert!(matches!(err, OrchestraError::Configuration(_)));
    assert!(!err.is_retryable());
    assert_eq!(provider.metrics().failed_requests, 1);
}

#[tokio::test]
async fn server_error_is_retryable() {
    let (base, _requests) = serve("503 Service Unavailable", "overloaded").await;
    let provider = router_at(base);

    let err = provider
        .execute_completion(&CompletionRequest::new("ping"))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Inference);
    assert!(err.is_retryable());
    assert!(err.to_string().contains("503"));
}

#[tokio::test]
async fn model_listing() {
    let (base, mut requests) = serve(
        "200 OK",
        r#"{"data":[{"id":"llama3"},{"id":"mistral"}]}"#,
    )
    .await;
    let mut config = RemoteProviderConfig::daemon();
    config.enabled = true;
    config.base_url = base;
    let provider = RemoteProvider::daemon(config).unwrap();

    assert_eq!(provider.list_models().await.unwrap(), vec!["llama3", "mistral"]);
    assert!(requests.recv().await.unwrap().starts_with("GET /v1/models"));
    assert!(provider.test_connection().await);
}

#[tokio::test]
async fn unreachable_daemon_is_network_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let mut config = RemoteProviderConfig::daemon();
    config.enabled = true;
    config.base_url = format!("http://{addr}/v1");
    let provider = RemoteProvider::daemon(config).unwrap();

    let err = provider
        .execute_completion(&CompletionRequest::new("ping"))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Network);
    assert!(!provider.test_connection().await);
}
