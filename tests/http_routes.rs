//! Integration tests for the HTTP surface (§6): route the axum app in-process
//! with `tower::ServiceExt::oneshot`, backed by `InMemoryVectorStore` and
//! fake LLM providers so nothing touches a network or a real database.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use futures::stream::BoxStream;
use tower::ServiceExt;

use mimir::answer::AnswerComposer;
use mimir::config::{ChatConfig, ChatProvider as ChatProviderKind, Config, EmbeddingConfig, EmbeddingProvider as EmbeddingProviderKind, GithubConfig, ProviderLimits, ServerConfig, SupabaseConfig};
use mimir::error::Result;
use mimir::http::{router, AppState};
use mimir::llm::chat::ChatClient;
use mimir::llm::embedding::EmbeddingClient;
use mimir::llm::{ChatMessage, ChatProvider, CompletionDelta, CompletionOptions, EmbeddingProvider};
use mimir::pipeline::Pipeline;
use mimir::reconciler::Reconciler;
use mimir::retriever::Retriever;
use mimir::vector_store::{InMemoryVectorStore, VectorStore};

struct FakeEmbeddingProvider;

#[async_trait]
impl EmbeddingProvider for FakeEmbeddingProvider {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|_| vec![0.1, 0.2, 0.3]).collect())
    }
}

struct FakeChatProvider;

#[async_trait]
impl ChatProvider for FakeChatProvider {
    async fn complete(&self, _messages: &[ChatMessage], _options: &CompletionOptions) -> Result<String> {
        Ok("a fake answer".to_string())
    }

    async fn stream(
        &self,
        _messages: &[ChatMessage],
        _options: &CompletionOptions,
    ) -> Result<BoxStream<'static, Result<CompletionDelta>>> {
        use futures::stream::StreamExt;
        let deltas = vec![
            Ok(CompletionDelta { content: "a fake".to_string(), done: false }),
            Ok(CompletionDelta { content: "a fake answer".to_string(), done: true }),
        ];
        Ok(futures::stream::iter(deltas).boxed())
    }
}

fn test_config() -> Config {
    Config {
        server: ServerConfig { api_key: "test-key".to_string(), github_webhook_secret: Some("webhook-secret".to_string()), port: 0 },
        supabase: SupabaseConfig {
            url: "postgres://unused".to_string(),
            service_role_key: "unused".to_string(),
            table: "docs".to_string(),
            similarity_threshold: 0.2,
            match_count: 10,
            bm25_match_count: 10,
            enable_hybrid_search: true,
        },
        github: GithubConfig { output_dir: ".mimir".to_string(), repos: vec![] },
        embedding: EmbeddingConfig {
            provider: EmbeddingProviderKind::OpenAi,
            model: "text-embedding-3-small".to_string(),
            api_key: "unused".to_string(),
            base_url: None,
            limits: ProviderLimits::default(),
        },
        chat: ChatConfig {
            provider: ChatProviderKind::OpenAi,
            model: "gpt-4o-mini".to_string(),
            api_key: "unused".to_string(),
            base_url: None,
            temperature: 0.2,
            max_output_tokens: 1024,
            limits: ProviderLimits::default(),
        },
        exclude_patterns: vec![],
        log_level: "info".to_string(),
    }
}

fn test_app() -> axum::Router {
    let config = test_config();
    let store: Arc<dyn VectorStore> = Arc::new(InMemoryVectorStore::new());
    let embedding_client = Arc::new(EmbeddingClient::new(Arc::new(FakeEmbeddingProvider), &config.embedding.limits));
    let chat_client = Arc::new(ChatClient::new(
        Arc::new(FakeChatProvider),
        &config.chat.limits,
        CompletionOptions { temperature: config.chat.temperature, max_output_tokens: config.chat.max_output_tokens },
    ));

    let reconciler = Reconciler::new(store.clone(), chat_client.clone(), embedding_client.clone());
    let retriever = Retriever::new(store.clone(), embedding_client.clone());
    let answer_composer = AnswerComposer::new(chat_client.clone());
    let pipeline = Pipeline::new(reconciler);

    let state = Arc::new(AppState {
        config,
        store,
        retriever,
        answer_composer,
        pipeline,
        ingestion_busy: Arc::new(AtomicBool::new(false)),
    });

    router(state)
}

#[tokio::test]
async fn health_is_reachable_without_auth() {
    let app = test_app();
    let response = app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn ingest_without_api_key_is_rejected() {
    let app = test_app();
    let response = app
        .oneshot(Request::builder().method("POST").uri("/ingest").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn ingest_with_bearer_api_key_is_accepted() {
    let app = test_app();
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/ingest")
                .header("authorization", "Bearer test-key")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    // No repo scopes configured, so the pipeline runs and returns 200 with
    // zero files fetched rather than failing.
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn mcp_ask_is_reachable_without_auth_and_rejects_empty_query() {
    let app = test_app();
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/mcp/ask")
                .header("content-type", "application/json")
                .body(Body::from(r#"{"query":""}"#))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn mcp_ask_returns_empty_matches_against_an_empty_store() {
    let app = test_app();
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/mcp/ask")
                .header("content-type", "application/json")
                .body(Body::from(r#"{"query":"how do I configure retries?"}"#))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn webhook_without_signature_header_is_rejected() {
    let app = test_app();
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/webhook/github")
                .header("x-github-event", "push")
                .body(Body::from("{}"))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn webhook_with_valid_signature_acknowledges_ping() {
    use hmac::{Hmac, Mac};
    use sha2::Sha256;

    let body = b"{}";
    let mut mac = Hmac::<Sha256>::new_from_slice(b"webhook-secret").unwrap();
    mac.update(body);
    let signature = format!("sha256={}", hex::encode(mac.finalize().into_bytes()));

    let app = test_app();
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/webhook/github")
                .header("x-github-event", "ping")
                .header("x-hub-signature-256", signature)
                .body(Body::from(body.to_vec()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn chat_completions_without_api_key_is_rejected() {
    let app = test_app();
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/v1/chat/completions")
                .header("content-type", "application/json")
                .body(Body::from(r#"{"messages":[{"role":"user","content":"hi"}]}"#))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}
