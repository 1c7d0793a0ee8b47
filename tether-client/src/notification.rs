//! Notification handler registry
//!
//! Server-pushed notifications are dispatched by method name to async
//! handlers registered here. Every notification is also published on the
//! client's event stream, so a handler is optional.
//!
//! # Examples
//!
//! ```rust,no_run
//! use tether_client::Client;
//!
//! # async fn example(client: &Client) {
//! client.on_notification("ai.model.changed", |msg| async move {
//!     println!("model changed: {:?}", msg.params);
//! }).await;
//! # }
//! ```

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tether_core::Message;
use tokio::sync::Mutex;

/// Type for notification handler functions
pub type NotificationFn =
    Arc<dyn Fn(Message) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Handlers keyed by notification method
#[derive(Clone, Default)]
pub struct NotificationHandler {
    handlers: Arc<Mutex<HashMap<String, NotificationFn>>>,
}

impl NotificationHandler {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the handler for `method`
    pub async fn register<F, Fut>(&self, method: impl Into<String>, handler: F)
    where
        F: Fn(Message) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let handler: NotificationFn = Arc::new(move |msg| Box::pin(handler(msg)));
        self.handlers.lock().await.insert(method.into(), handler);
    }

    /// Run the handler for this notification, if any; returns whether one ran
    pub async fn handle(&self, notification: Message) -> bool {
        let handler = {
            let handlers = self.handlers.lock().await;
            handlers.get(notification.method_name()).cloned()
        };

        match handler {
            Some(handler) => {
                handler(notification).await;
                true
            }
            None => {
                tracing::debug!(method = %notification.method_name(), "No handler registered for notification");
                false
            }
        }
    }

    /// Whether a handler is registered for `method`
    pub async fn has_handler(&self, method: &str) -> bool {
        self.handlers.lock().await.contains_key(method)
    }

    /// Remove the handler for `method`
    pub async fn unregister(&self, method: &str) -> bool {
        self.handlers.lock().await.remove(method).is_some()
    }

    /// Methods with a registered handler
    pub async fn methods(&self) -> Vec<String> {
        self.handlers.lock().await.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[tokio::test]
    async fn test_dispatch_by_method() {
        let registry = NotificationHandler::new();
        let called = Arc::new(AtomicBool::new(false));

        let flag = Arc::clone(&called);
        registry
            .register("ai.model.changed", move |msg| {
                let flag = Arc::clone(&flag);
                async move {
                    assert_eq!(msg.params, Some(json!({"model": "large"})));
                    flag.store(true, Ordering::SeqCst);
                }
            })
            .await;

        let handled = registry
            .handle(Message::notification("ai.model.changed", Some(json!({"model": "large"}))))
            .await;
        assert!(handled);
        assert!(called.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_unhandled_notification() {
        let registry = NotificationHandler::new();
        assert!(!registry.handle(Message::notification("system.health", None)).await);
    }

    #[tokio::test]
    async fn test_unregister() {
        let registry = NotificationHandler::new();

        registry.register("system.health", |_| async {}).await;
        registry.register("server.shutdown", |_| async {}).await;
        assert_eq!(registry.methods().await.len(), 2);

        assert!(registry.unregister("system.health").await);
        assert!(!registry.has_handler("system.health").await);
        assert!(registry.has_handler("server.shutdown").await);
    }
}
