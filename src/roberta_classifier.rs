use anyhow::{Result, bail};
use async_trait::async_trait;
use candle_core::utils::{cuda_is_available, metal_is_available};
use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_nn::ops::softmax;
use candle_transformers::models::xlm_roberta::{
    Config as RobertaConfig, XLMRobertaForSequenceClassification,
};
use hf_hub::{Repo, RepoType, api::tokio::Api};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokenizers::Tokenizer;

use crate::classifier::Classifier;
use crate::types::LabelScore;

pub type Id2Label = HashMap<u32, String>;

/// Runs a RoBERTa sequence-classification checkpoint, such as
/// `j-hartmann/emotion-english-distilroberta-base`, with candle.
///
/// Cloning is cheap; the weights are shared.
#[derive(Clone)]
pub struct RobertaClassifier {
    inner: Arc<Inner>,
}

struct Inner {
    model: XLMRobertaForSequenceClassification,
    tokenizer: Tokenizer,
    device: Device,
    id2label: Id2Label,
}

#[derive(Debug, Clone)]
pub struct RobertaLoadConfig {
    pub model_id: String,
    pub model_path: Option<PathBuf>,
    pub revision: String,
    pub use_pth: bool,
    pub cpu: bool,
    pub max_sequence_length: usize,
    pub id2label: Option<Id2Label>,
}

/// The part of `config.json` candle's model config does not carry.
#[derive(Debug, Deserialize)]
struct LabelConfig {
    id2label: Option<Id2Label>,
}

impl RobertaClassifier {
    fn device(cpu: bool) -> Result<Device> {
        if cpu {
            Ok(Device::Cpu)
        } else if metal_is_available() {
            tracing::info!("Using metal acceleration");
            Ok(Device::new_metal(0)?)
        } else if cuda_is_available() {
            tracing::info!("Using CUDA GPU acceleration");
            Ok(Device::new_cuda(0)?)
        } else {
            tracing::info!(
                "CUDA not available, running on CPU. To run on GPU, build with `--features cuda`"
            );
            Ok(Device::Cpu)
        }
    }

    #[tracing::instrument(skip(config), fields(model_id = %config.model_id, model_path = ?config.model_path, cpu = config.cpu))]
    pub async fn load(config: RobertaLoadConfig) -> Result<Self> {
        let device = Self::device(config.cpu)?;
        let weights_name = if config.use_pth {
            "pytorch_model.bin"
        } else {
            "model.safetensors"
        };

        // A local directory wins over the Hub
        let (config_filename, tokenizer_filename, weights_filename) = match &config.model_path {
            Some(base_path) => {
                if !base_path.is_dir() {
                    bail!("Model path {} is not a directory.", base_path.display());
                }
                (
                    base_path.join("config.json"),
                    base_path.join("tokenizer.json"),
                    base_path.join(weights_name),
                )
            }
            None => {
                let repo = Repo::with_revision(
                    config.model_id.clone(),
                    RepoType::Model,
                    config.revision.clone(),
                );
                let api = Api::new()?.repo(repo);
                (
                    api.get("config.json").await?,
                    api.get("tokenizer.json").await?,
                    api.get(weights_name).await?,
                )
            }
        };

        let raw_config = std::fs::read_to_string(config_filename)?;
        let model_config: RobertaConfig = serde_json::from_str(&raw_config)?;
        let label_config: LabelConfig = serde_json::from_str(&raw_config)?;

        let id2label = resolve_id2label(config.id2label, label_config.id2label)?;
        tracing::debug!(num_labels = id2label.len(), "Resolved label mapping");

        let mut tokenizer = Tokenizer::from_file(tokenizer_filename)
            .map_err(|e| anyhow::anyhow!("Tokenizer error: {e}"))?;
        tokenizer
            .with_truncation(Some(tokenizers::TruncationParams {
                max_length: config.max_sequence_length,
                ..Default::default()
            }))
            .map_err(|e| anyhow::anyhow!("Tokenizer truncation error: {e}"))?;

        let vb = if config.use_pth {
            VarBuilder::from_pth(&weights_filename, DType::F32, &device)?
        } else {
            unsafe { VarBuilder::from_mmaped_safetensors(&[weights_filename], DType::F32, &device)? }
        };
        let model = XLMRobertaForSequenceClassification::new(id2label.len(), &model_config, vb)?;

        Ok(Self {
            inner: Arc::new(Inner {
                model,
                tokenizer,
                device,
                id2label,
            }),
        })
    }
}

impl Inner {
    fn classify(&self, text: &str) -> Result<Vec<LabelScore>> {
        let encoding = self
            .tokenizer
            .encode(text, true)
            .map_err(|e| anyhow::anyhow!("Tokenization error: {e}"))?;

        let input_ids = Tensor::new(encoding.get_ids(), &self.device)?.unsqueeze(0)?;
        let attention_mask = Tensor::new(encoding.get_attention_mask(), &self.device)?.unsqueeze(0)?;
        let token_type_ids = input_ids.zeros_like()?;

        let logits = self
            .model
            .forward(&input_ids, &attention_mask, &token_type_ids)?;
        let probs = softmax(&logits, 1)?.squeeze(0)?.to_vec1::<f32>()?;

        Ok(rank_labels(&self.id2label, &probs))
    }
}

#[async_trait]
impl Classifier for RobertaClassifier {
    #[tracing::instrument(skip(self, text), fields(text_len = text.len()))]
    async fn classify(&self, text: &str) -> Result<Vec<LabelScore>> {
        let inner = Arc::clone(&self.inner);
        let text = text.to_owned();
        tokio::task::spawn_blocking(move || inner.classify(&text)).await?
    }
}

/// Command-line labels take precedence over the checkpoint's own.
fn resolve_id2label(overridden: Option<Id2Label>, from_model: Option<Id2Label>) -> Result<Id2Label> {
    match overridden.or(from_model) {
        Some(id2label) if !id2label.is_empty() => Ok(id2label),
        _ => bail!("Id2Label not found in the model configuration nor specified as a parameter"),
    }
}

/// Pairs each class probability with its label, highest first.
pub fn rank_labels(id2label: &Id2Label, probs: &[f32]) -> Vec<LabelScore> {
    let mut ranked: Vec<LabelScore> = probs
        .iter()
        .enumerate()
        .map(|(id, &score)| {
            let id = id as u32;
            let label = id2label
                .get(&id)
                .cloned()
                .unwrap_or_else(|| format!("LABEL_{id}"));
            LabelScore { label, score }
        })
        .collect();
    ranked.sort_by(|a, b| b.score.total_cmp(&a.score));
    ranked
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn labels(pairs: &[(u32, &str)]) -> Id2Label {
        pairs
            .iter()
            .map(|&(id, label)| (id, label.to_string()))
            .collect()
    }

    #[test]
    fn ranks_by_descending_probability() {
        let id2label = labels(&[(0, "anger"), (1, "joy"), (2, "sadness")]);

        let ranked = rank_labels(&id2label, &[0.1, 0.7, 0.2]);

        let order: Vec<_> = ranked.iter().map(|l| l.label.as_str()).collect();
        assert_eq!(order, vec!["joy", "sadness", "anger"]);
        assert_eq!(ranked[0].score, 0.7);
    }

    #[test]
    fn unknown_ids_get_a_generic_label() {
        let id2label = labels(&[(0, "anger")]);

        let ranked = rank_labels(&id2label, &[0.25, 0.75]);

        assert_eq!(ranked[0].label, "LABEL_1");
        assert_eq!(ranked[1].label, "anger");
    }

    #[test]
    fn no_probabilities_means_no_labels() {
        assert_eq!(rank_labels(&labels(&[(0, "joy")]), &[]), vec![]);
    }

    #[test]
    fn override_labels_win_over_the_checkpoint() {
        let resolved = resolve_id2label(
            Some(labels(&[(0, "mad")])),
            Some(labels(&[(0, "anger")])),
        )
        .unwrap();

        assert_eq!(resolved, labels(&[(0, "mad")]));
    }

    #[test]
    fn missing_labels_fail_to_load() {
        assert!(resolve_id2label(None, None).is_err());
        assert!(resolve_id2label(None, Some(Id2Label::new())).is_err());
    }

    /// A two-layer model with random weights and a whitespace word-level
    /// tokenizer, small enough to run a real forward pass in a test.
    fn tiny_classifier(id2label: Id2Label) -> Inner {
        let device = Device::Cpu;
        let model_config: RobertaConfig = serde_json::from_value(serde_json::json!({
            "hidden_size": 8,
            "layer_norm_eps": 1e-5,
            "attention_probs_dropout_prob": 0.0,
            "hidden_dropout_prob": 0.0,
            "num_attention_heads": 2,
            "position_embedding_type": "absolute",
            "intermediate_size": 16,
            "hidden_act": "gelu",
            "num_hidden_layers": 2,
            "vocab_size": 6,
            "max_position_embeddings": 32,
            "type_vocab_size": 1,
            "pad_token_id": 1
        }))
        .unwrap();

        let varmap = candle_nn::VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let model =
            XLMRobertaForSequenceClassification::new(id2label.len(), &model_config, vb).unwrap();

        let tokenizer = Tokenizer::from_bytes(
            r#"{
                "version": "1.0",
                "truncation": null,
                "padding": null,
                "added_tokens": [],
                "normalizer": null,
                "pre_tokenizer": {"type": "Whitespace"},
                "post_processor": null,
                "decoder": null,
                "model": {
                    "type": "WordLevel",
                    "vocab": {"<s>": 0, "<pad>": 1, "<unk>": 2, "i": 3, "am": 4, "happy": 5},
                    "unk_token": "<unk>"
                }
            }"#,
        )
        .unwrap();

        Inner {
            model,
            tokenizer,
            device,
            id2label,
        }
    }

    #[test]
    fn forward_pass_yields_a_ranked_distribution() {
        let classifier = tiny_classifier(labels(&[(0, "anger"), (1, "joy"), (2, "sadness")]));

        let ranked = classifier.classify("i am so happy").unwrap();

        assert_eq!(ranked.len(), 3);
        let total: f32 = ranked.iter().map(|l| l.score).sum();
        assert!((total - 1.0).abs() < 1e-4, "scores sum to {total}");
        assert!(ranked.windows(2).all(|pair| pair[0].score >= pair[1].score));
        let mut names: Vec<_> = ranked.iter().map(|l| l.label.as_str()).collect();
        names.sort();
        assert_eq!(names, vec!["anger", "joy", "sadness"]);
    }

    #[test]
    fn checkpoint_labels_are_read_from_config_json() {
        let raw = r#"{"hidden_size": 768, "id2label": {"0": "anger", "3": "joy"}}"#;

        let config: LabelConfig = serde_json::from_str(raw).unwrap();

        assert_eq!(config.id2label, Some(labels(&[(0, "anger"), (3, "joy")])));
    }
}
