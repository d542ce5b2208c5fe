/*!
 * Resolve-once glossary shared across chunk workers.
 *
 * One producer future, many readers: `get()` returns immediately once the
 * glossary is resolved and otherwise awaits the single underlying future.
 * A failing producer resolves to an empty glossary so readers never hang
 * or fail because of it.
 */

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use log::{info, warn};
use std::future::Future;
use std::sync::Arc;

use super::GlossaryItem;

/// Shared, single-resolution glossary
#[derive(Clone)]
pub struct GlossaryState {
    shared: Shared<BoxFuture<'static, Arc<Vec<GlossaryItem>>>>,
}

impl std::fmt::Debug for GlossaryState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GlossaryState")
            .field("resolved", &self.is_resolved())
            .finish()
    }
}

impl GlossaryState {
    /// Wrap a lazy producer; it is polled by whichever reader awaits first.
    pub fn new<F>(producer: F) -> Self
    where
        F: Future<Output = anyhow::Result<Vec<GlossaryItem>>> + Send + 'static,
    {
        let resolved = async move {
            match producer.await {
                Ok(items) => {
                    info!("Glossary resolved with {} terms", items.len());
                    Arc::new(items)
                }
                Err(e) => {
                    warn!("Glossary extraction failed, continuing without glossary: {}", e);
                    Arc::new(Vec::new())
                }
            }
        };
        Self { shared: resolved.boxed().shared() }
    }

    /// Start the producer on the runtime immediately, without waiting for a reader.
    pub fn spawn<F>(producer: F) -> Self
    where
        F: Future<Output = anyhow::Result<Vec<GlossaryItem>>> + Send + 'static,
    {
        let handle = tokio::spawn(producer);
        Self::new(async move {
            handle
                .await
                .map_err(|e| anyhow::anyhow!("glossary task aborted: {}", e))?
        })
    }

    /// An already-resolved glossary
    pub fn resolved(items: Vec<GlossaryItem>) -> Self {
        Self::new(async move { Ok(items) })
    }

    /// An empty glossary (glossary disabled)
    pub fn empty() -> Self {
        Self::resolved(Vec::new())
    }

    /// Await the glossary
    pub async fn get(&self) -> Arc<Vec<GlossaryItem>> {
        if let Some(items) = self.shared.peek() {
            return items.clone();
        }
        self.shared.clone().await
    }

    /// Whether the producer has finished
    pub fn is_resolved(&self) -> bool {
        self.shared.peek().is_some()
    }
}
