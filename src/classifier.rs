use crate::types::LabelScore;
use anyhow::Result;
use async_trait::async_trait;

/// Maps a text to every known label, ranked by descending score.
#[async_trait]
pub trait Classifier: Send + Sync {
    async fn classify(&self, text: &str) -> Result<Vec<LabelScore>>;
}
