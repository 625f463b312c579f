// ABOUTME: Access token providers consulted by the API client
// ABOUTME: Token storage lives elsewhere; the client only asks for and refreshes tokens

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::ClientResult;

/// Source of bearer tokens. `refresh` is called once after a 401.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn access_token(&self) -> ClientResult<Option<String>>;

    async fn refresh(&self) -> ClientResult<Option<String>>;
}

/// A fixed token that can be replaced at runtime.
#[derive(Debug, Default)]
pub struct StaticToken {
    token: RwLock<Option<String>>,
}

impl StaticToken {
    pub fn new(token: Option<String>) -> Self {
        Self {
            token: RwLock::new(token),
        }
    }

    pub async fn set(&self, token: Option<String>) {
        *self.token.write().await = token;
    }
}

#[async_trait]
impl TokenProvider for StaticToken {
    async fn access_token(&self) -> ClientResult<Option<String>> {
        Ok(self.token.read().await.clone())
    }

    async fn refresh(&self) -> ClientResult<Option<String>> {
        // Nothing to refresh against; hand back what we have.
        Ok(self.token.read().await.clone())
    }
}
