//! Knowledge-base retrieval abstraction (§6 "Knowledge-base retrieval").
//! The retrieval pipeline itself is out of scope (§1 Non-goals); the
//! session only consults it on the non-speculative path (§4.4.4).

use async_trait::async_trait;

#[derive(Debug, Clone)]
pub struct KnowledgeBaseResult {
    pub text: String,
    pub source: String,
    pub score: f64,
}

#[async_trait]
pub trait KnowledgeBase: Send + Sync {
    /// Whether `text` warrants a knowledge-base lookup at all.
    async fn is_relevant(&self, text: &str) -> bool;

    async fn query(&self, knowledge_base_id: &str, text: &str) -> Vec<KnowledgeBaseResult>;
}
