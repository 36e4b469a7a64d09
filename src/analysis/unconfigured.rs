use async_trait::async_trait;
use serde_json::Value;

use crate::analysis::{CodeScanner, DocRetriever, FixContext, FixGenerator, RepoMapper, SimilaritySearch};
use crate::error::Result;
use crate::workflow::state::JsonMap;

/// Backend used when no search index, repository host or LLM is wired in.
/// Every lookup comes back empty.
#[derive(Debug, Default, Clone, Copy)]
pub struct Unconfigured;

#[async_trait]
impl SimilaritySearch for Unconfigured {
    async fn find_similar(&self, _: &JsonMap, _: &str, _: usize) -> Result<Vec<Value>> {
        Ok(Vec::new())
    }
}

#[async_trait]
impl DocRetriever for Unconfigured {
    async fn find_docs(&self, _: &JsonMap, _: &str, _: usize) -> Result<Vec<Value>> {
        Ok(Vec::new())
    }
}

#[async_trait]
impl RepoMapper for Unconfigured {
    async fn find_repo(&self, _: &JsonMap, _: &str) -> Result<Option<JsonMap>> {
        Ok(None)
    }
}

#[async_trait]
impl CodeScanner for Unconfigured {
    async fn analyze(&self, _: &JsonMap, _: &JsonMap, _: &str) -> Result<Option<JsonMap>> {
        Ok(None)
    }
}

#[async_trait]
impl FixGenerator for Unconfigured {
    async fn generate_fix(&self, _: FixContext<'_>) -> Result<Option<String>> {
        Ok(None)
    }
}
