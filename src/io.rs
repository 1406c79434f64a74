//! External I/O boundary
//!
//! The engine never touches storage or version control directly. An
//! embedder supplies an [`IoProvider`] that can stream the depth-first
//! listing of a historical snapshot and fetch literal file text from it.
//! Both capabilities are asynchronous; the engine consumes their results
//! incrementally.

use crate::error::Error;
use crate::tree::BaseEntry;
use async_trait::async_trait;
use futures::stream::BoxStream;

/// Opaque identifier of one historical snapshot, assigned by the provider.
pub type BaselineId = [u8; 20];

#[async_trait]
pub trait IoProvider: Send + Sync {
    /// Stream the baseline's entries in depth-first order, in batches. The
    /// stream must be pollable at least once per reset.
    fn base_entries(&self, baseline: BaselineId) -> BoxStream<'static, Result<Vec<BaseEntry>, Error>>;

    /// Literal text of the file at `path` within the baseline.
    async fn base_text(&self, baseline: BaselineId, path: &str) -> Result<String, Error>;
}

/// In-memory provider for tests and examples.
#[doc(hidden)]
pub mod testing {
    use super::*;
    use futures::stream;
    use std::collections::HashMap;

    /// In-memory provider holding one listing and text per baseline,
    /// delivered in single-entry batches to exercise incremental
    /// consumption.
    pub struct InMemoryProvider {
        baselines: HashMap<BaselineId, (Vec<BaseEntry>, HashMap<String, String>)>,
    }

    impl Default for InMemoryProvider {
        fn default() -> Self {
            Self::new()
        }
    }

    impl InMemoryProvider {
        pub fn new() -> Self {
            Self {
                baselines: HashMap::new(),
            }
        }

        pub fn insert(
            &mut self,
            baseline: BaselineId,
            entries: Vec<BaseEntry>,
            texts: &[(&str, &str)],
        ) {
            let texts = texts
                .iter()
                .map(|(path, text)| (path.to_string(), text.to_string()))
                .collect();
            self.baselines.insert(baseline, (entries, texts));
        }
    }

    #[async_trait]
    impl IoProvider for InMemoryProvider {
        fn base_entries(
            &self,
            baseline: BaselineId,
        ) -> BoxStream<'static, Result<Vec<BaseEntry>, Error>> {
            match self.baselines.get(&baseline) {
                Some((entries, _)) => {
                    let batches: Vec<_> =
                        entries.iter().cloned().map(|entry| Ok(vec![entry])).collect();
                    Box::pin(stream::iter(batches))
                }
                None => Box::pin(stream::iter(vec![Err(Error::Io(format!(
                    "unknown baseline {:?}",
                    baseline
                )))])),
            }
        }

        async fn base_text(&self, baseline: BaselineId, path: &str) -> Result<String, Error> {
            self.baselines
                .get(&baseline)
                .and_then(|(_, texts)| texts.get(path))
                .cloned()
                .ok_or_else(|| Error::Io(format!("no text for {:?} in baseline", path)))
        }
    }
}
