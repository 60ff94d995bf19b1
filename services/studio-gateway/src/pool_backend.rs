//! Primary tier: the generative API behind the credential pool

use std::sync::Arc;

use backend::{Backend, BackendError, GeminiClient, GenerateFuture, GenerationRequest};
use key_pool::KeyPool;

/// `Backend` that runs every request through `KeyPool::execute`.
pub struct PoolBackend {
    pool: Arc<KeyPool>,
    client: GeminiClient,
}

impl PoolBackend {
    pub fn new(pool: Arc<KeyPool>, client: GeminiClient) -> Self {
        Self { pool, client }
    }
}

impl Backend for PoolBackend {
    fn id(&self) -> &str {
        "primary"
    }

    fn is_ready(&self) -> bool {
        !self.pool.credentials().is_empty()
    }

    fn generate<'a>(&'a self, request: &'a GenerationRequest) -> GenerateFuture<'a> {
        Box::pin(async move {
            let client = &self.client;
            self.pool
                .execute(|credential| async move {
                    client
                        .generate_with_key(credential.secret.expose(), request)
                        .await
                })
                .await
                .map_err(pool_error)
        })
    }
}

fn pool_error(err: key_pool::Error) -> BackendError {
    match err {
        key_pool::Error::Exhausted(summary) => BackendError::Exhausted(summary),
        other => BackendError::Rejected(other.to_string()),
    }
}
