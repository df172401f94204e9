use std::sync::Arc;

use tokio::sync::RwLock;

/// Shared free-text message board backing the post-a-message endpoints.
///
/// Holds exactly one message; posting replaces the previous one.
#[derive(Clone, Default)]
pub struct MessageBoard {
    message: Arc<RwLock<String>>,
}

impl MessageBoard {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set(&self, message: String) {
        *self.message.write().await = message;
    }

    pub async fn get(&self) -> String {
        self.message.read().await.clone()
    }
}
