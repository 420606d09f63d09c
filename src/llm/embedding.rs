//! Document/query embedding orchestration (§4.4). Wraps a provider client
//! with the rate limiter and the spec's batch-doubling policy: each request
//! batch is built at twice the provider's configured `batch_size`, since
//! embeddings inputs are short and providers accept larger batches than
//! chat completions. Input order is preserved end to end.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use super::EmbeddingProvider;
use crate::config::ProviderLimits;
use crate::error::Result;
use crate::rate_limiter::RateLimiter;
use crate::tokenizer::count_tokens;

pub struct EmbeddingClient {
    provider: Arc<dyn EmbeddingProvider>,
    limiter: RateLimiter,
    batch_size: usize,
}

impl EmbeddingClient {
    pub fn new(provider: Arc<dyn EmbeddingProvider>, limits: &ProviderLimits) -> Self {
        Self {
            provider,
            limiter: RateLimiter::new(limits),
            batch_size: (limits.batch_size * 2).max(1),
        }
    }

    /// Embeds `texts` in order, batching at `2 * batch_size` per request.
    /// The output vector's indices line up 1:1 with `texts`.
    pub async fn embed_documents(&self, texts: &[String], cancel: &CancellationToken) -> Result<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size) {
            let estimated_tokens: u32 = batch.iter().map(|t| count_tokens(t) as u32).sum();
            let provider = Arc::clone(&self.provider);
            let batch_owned = batch.to_vec();
            let embedded = self
                .limiter
                .run(estimated_tokens, cancel, || {
                    let provider = Arc::clone(&provider);
                    let batch_owned = batch_owned.clone();
                    async move { provider.embed(&batch_owned).await }
                })
                .await?;
            out.extend(embedded);
        }
        Ok(out)
    }

    /// Embeds a single query string.
    pub async fn embed_query(&self, text: &str, cancel: &CancellationToken) -> Result<Vec<f32>> {
        let embedded = self.embed_documents(std::slice::from_ref(&text.to_string()), cancel).await?;
        Ok(embedded.into_iter().next().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakeProvider {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl EmbeddingProvider for FakeProvider {
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(texts.iter().map(|t| vec![t.len() as f32]).collect())
        }
    }

    #[tokio::test]
    async fn preserves_input_order_across_batches() {
        let provider = Arc::new(FakeProvider { calls: AtomicUsize::new(0) });
        let limits = ProviderLimits { batch_size: 2, concurrency: 4, ..ProviderLimits::default() };
        let client = EmbeddingClient::new(provider, &limits);
        let texts: Vec<String> = (0..9).map(|i| "x".repeat(i + 1)).collect();
        let cancel = CancellationToken::new();

        let embeddings = client.embed_documents(&texts, &cancel).await.unwrap();
        let lengths: Vec<f32> = embeddings.into_iter().map(|e| e[0]).collect();
        let expected: Vec<f32> = texts.iter().map(|t| t.len() as f32).collect();
        assert_eq!(lengths, expected);
    }

    #[tokio::test]
    async fn batches_at_twice_configured_size() {
        let provider = Arc::new(FakeProvider { calls: AtomicUsize::new(0) });
        let limits = ProviderLimits { batch_size: 3, concurrency: 4, ..ProviderLimits::default() };
        let client = EmbeddingClient::new(provider, &limits);
        assert_eq!(client.batch_size, 6);
    }
}
