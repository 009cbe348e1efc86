//! Response cache middleware.
//!
//! Serves `generate_text` from an in-memory cache when a previous call
//! produced a response under the same key. The key is computed by a
//! caller-supplied function; [`ResponseCacheMiddleware::for_template`] wires
//! it to the response cache key derivation.

use async_trait::async_trait;
use keel_core::cache_key::{
    compute_response_cache_key, CacheMessage, ModelInfo, ResponseCacheKeyInput, TemplateRef,
};
use keel_core::error::AppError;
use keel_core::middleware::Middleware;
use keel_core::model::LanguageModel;
use keel_core::types::*;
use moka::future::Cache;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Computes the cache key for a call; `None` bypasses the cache
pub type CacheKeyFn = Arc<dyn Fn(&RequestContext, &TextInput) -> Option<String> + Send + Sync>;

/// Middleware that short-circuits `generate_text` on a cache hit.
#[derive(Clone)]
pub struct ResponseCacheMiddleware {
    cache: Cache<String, TextOutput>,
    key_fn: CacheKeyFn,
}

impl fmt::Debug for ResponseCacheMiddleware {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponseCacheMiddleware")
            .field("entries", &self.cache.entry_count())
            .finish()
    }
}

impl ResponseCacheMiddleware {
    /// Create a cache with 10k entries and a one hour TTL
    pub fn new<F>(key_fn: F) -> Self
    where
        F: Fn(&RequestContext, &TextInput) -> Option<String> + Send + Sync + 'static,
    {
        Self::with_limits(key_fn, 10_000, Duration::from_secs(3600))
    }

    /// Create a cache with the given capacity and TTL
    pub fn with_limits<F>(key_fn: F, max_entries: u64, ttl: Duration) -> Self
    where
        F: Fn(&RequestContext, &TextInput) -> Option<String> + Send + Sync + 'static,
    {
        let cache = Cache::builder()
            .max_capacity(max_entries)
            .time_to_live(ttl)
            .build();

        Self {
            cache,
            key_fn: Arc::new(key_fn),
        }
    }

    /// Key calls by tenant, project, template, messages and model.
    ///
    /// Calls that carry a response format are not cached, and neither are
    /// calls whose key input fails validation.
    pub fn for_template(template: TemplateRef, model: ModelInfo) -> Self {
        Self::new(move |ctx, input| {
            if input.response_format.is_some() {
                return None;
            }
            let mut messages = Vec::with_capacity(2);
            if let Some(system) = &input.system_prompt {
                messages.push(CacheMessage::new(Role::System, system.clone()));
            }
            messages.push(CacheMessage::new(Role::User, input.prompt.clone()));

            let key_input = ResponseCacheKeyInput {
                tenant_id: ctx.tenant_id.clone(),
                project_id: ctx.project_id.clone(),
                template_ref: template.clone(),
                messages,
                retrieval: None,
                citations: None,
                model_info: model.clone(),
            };
            match compute_response_cache_key(&key_input) {
                Ok(key) => Some(key),
                Err(e) => {
                    tracing::warn!(request_id = %ctx.request_id, "cache key not computed: {}", e);
                    None
                }
            }
        })
    }

    /// Number of cached responses
    pub fn entry_count(&self) -> u64 {
        self.cache.entry_count()
    }

    /// Drop every cached response
    pub fn invalidate_all(&self) {
        self.cache.invalidate_all();
    }
}

#[async_trait]
impl Middleware for ResponseCacheMiddleware {
    fn name(&self) -> &str {
        "response-cache"
    }

    async fn generate_text(
        &self,
        ctx: &RequestContext,
        input: TextInput,
        next: &dyn LanguageModel,
    ) -> Result<TextOutput, AppError> {
        let Some(key) = (self.key_fn)(ctx, &input) else {
            return next.generate_text(ctx, input).await;
        };

        if let Some(hit) = self.cache.get(&key).await {
            tracing::debug!(request_id = %ctx.request_id, key = %key, "response cache hit");
            return Ok(hit);
        }

        let output = next.generate_text(ctx, input).await?;
        self.cache.insert(key, output.clone()).await;
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_core::middleware::wrap_language_model;
    use parking_lot::Mutex;

    #[derive(Debug, Default)]
    struct Counting {
        calls: Mutex<u32>,
    }

    #[async_trait]
    impl LanguageModel for Counting {
        async fn generate_text(
            &self,
            _ctx: &RequestContext,
            input: TextInput,
        ) -> Result<TextOutput, AppError> {
            let mut calls = self.calls.lock();
            *calls += 1;
            Ok(TextOutput::new(format!("{}#{}", input.prompt, calls)))
        }
    }

    fn cached_model(base: Arc<Counting>) -> Arc<dyn LanguageModel> {
        let cache = ResponseCacheMiddleware::for_template(
            TemplateRef::new("qa", 1),
            ModelInfo {
                provider_id: "openai".to_string(),
                model_id: "gpt-4o-mini".to_string(),
                version: "1".to_string(),
            },
        );
        wrap_language_model(base, vec![Arc::new(cache)])
    }

    #[tokio::test]
    async fn test_hit_skips_model() {
        let base = Arc::new(Counting::default());
        let model = cached_model(base.clone());
        let ctx = RequestContext::new("tenant").with_project("p1");

        let first = model.generate_text(&ctx, TextInput::new("q")).await.unwrap();
        let second = model.generate_text(&ctx, TextInput::new("q")).await.unwrap();

        assert_eq!(first.text, "q#1");
        assert_eq!(second.text, "q#1");
        assert_eq!(*base.calls.lock(), 1);
    }

    #[tokio::test]
    async fn test_tenants_do_not_share_entries() {
        let base = Arc::new(Counting::default());
        let model = cached_model(base.clone());

        let a = RequestContext::new("tenant-a");
        let b = RequestContext::new("tenant-b");
        model.generate_text(&a, TextInput::new("q")).await.unwrap();
        let other = model.generate_text(&b, TextInput::new("q")).await.unwrap();

        assert_eq!(other.text, "q#2");
        assert_eq!(*base.calls.lock(), 2);
    }

    #[tokio::test]
    async fn test_none_key_bypasses_cache() {
        let base = Arc::new(Counting::default());
        let model = wrap_language_model(
            base.clone(),
            vec![Arc::new(ResponseCacheMiddleware::new(|_, _| None))],
        );
        let ctx = RequestContext::new("tenant");

        model.generate_text(&ctx, TextInput::new("q")).await.unwrap();
        model.generate_text(&ctx, TextInput::new("q")).await.unwrap();
        assert_eq!(*base.calls.lock(), 2);
    }
}
