//! ONNX-based embedding model implementation.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use ndarray::ArrayViewD;
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::Tensor;
use tokenizers::Tokenizer;
use tokio::sync::Semaphore;
use tracing::{debug, info};

use review_core::{Embedder, EmbeddingConfig, Result, ReviewError};

/// Loaded model state shared with blocking inference tasks.
struct OnnxModel {
    /// ONNX inference session (wrapped in Mutex for interior mutability).
    session: Mutex<Session>,

    tokenizer: Tokenizer,

    dimension: usize,

    max_tokens: usize,

    /// Whether the graph expects a `token_type_ids` input.
    use_token_type_ids: bool,
}

/// ONNX-based embedder for sentence-transformers models.
///
/// Inference runs on tokio's blocking pool; a semaphore sized to the number
/// of available cores bounds how many batches run at once.
pub struct OnnxEmbedder {
    model: Arc<OnnxModel>,
    permits: Arc<Semaphore>,
}

impl OnnxEmbedder {
    /// Create a new embedder from model and tokenizer paths with default
    /// settings.
    pub fn new(model_path: impl AsRef<Path>, tokenizer_path: impl AsRef<Path>) -> Result<Self> {
        Self::load(model_path, tokenizer_path, &EmbeddingConfig::default())
    }

    /// Create an embedder from `model.onnx` and `tokenizer.json` inside
    /// `config.model_path`.
    pub fn from_config(config: &EmbeddingConfig) -> Result<Self> {
        Self::load(config.model_file(), config.tokenizer_file(), config)
    }

    fn load(
        model_path: impl AsRef<Path>,
        tokenizer_path: impl AsRef<Path>,
        config: &EmbeddingConfig,
    ) -> Result<Self> {
        let model_path = model_path.as_ref();
        let tokenizer_path = tokenizer_path.as_ref();

        info!("Loading ONNX model from {:?}", model_path);

        let session = Session::builder()
            .map_err(|e| ReviewError::embedding(format!("Failed to create session builder: {}", e)))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| ReviewError::embedding(format!("Failed to set optimization level: {}", e)))?
            .with_intra_threads(config.num_threads)
            .map_err(|e| ReviewError::embedding(format!("Failed to set thread count: {}", e)))?
            .commit_from_file(model_path)
            .map_err(|e| ReviewError::embedding(format!("Failed to load model: {}", e)))?;

        info!("Loading tokenizer from {:?}", tokenizer_path);

        let tokenizer = Tokenizer::from_file(tokenizer_path)
            .map_err(|e| ReviewError::embedding(format!("Failed to load tokenizer: {}", e)))?;

        let workers = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);

        info!(
            "Embedder initialized: dim={}, max_tokens={}, workers={}",
            config.dimension, config.max_tokens, workers
        );

        Ok(Self {
            model: Arc::new(OnnxModel {
                session: Mutex::new(session),
                tokenizer,
                dimension: config.dimension,
                max_tokens: config.max_tokens,
                use_token_type_ids: config.use_token_type_ids,
            }),
            permits: Arc::new(Semaphore::new(workers)),
        })
    }

    /// Run one batch on the blocking pool.
    async fn run_blocking(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|e| ReviewError::embedding(format!("Embedder closed: {}", e)))?;
        let model = Arc::clone(&self.model);

        tokio::task::spawn_blocking(move || {
            let _permit = permit;
            model.embed_batch(&texts)
        })
        .await
        .map_err(|e| ReviewError::embedding(format!("Embedding task failed: {}", e)))?
    }
}

impl OnnxModel {
    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let refs: Vec<&str> = texts.iter().map(|s| s.as_str()).collect();
        let encodings = self
            .tokenizer
            .encode_batch(refs, true)
            .map_err(|e| ReviewError::embedding(format!("Tokenization failed: {}", e)))?;

        // Get max length for padding
        let max_len = encodings
            .iter()
            .map(|e| e.get_ids().len())
            .max()
            .unwrap_or(0)
            .min(self.max_tokens);

        let batch_size = encodings.len();

        debug!("Embedding batch: size={}, max_len={}", batch_size, max_len);

        let mut input_ids = vec![0i64; batch_size * max_len];
        let mut attention_mask = vec![0i64; batch_size * max_len];

        for (i, encoding) in encodings.iter().enumerate() {
            let ids = encoding.get_ids();
            let mask = encoding.get_attention_mask();
            let len = ids.len().min(max_len);

            for j in 0..len {
                input_ids[i * max_len + j] = ids[j] as i64;
                attention_mask[i * max_len + j] = mask[j] as i64;
            }
        }

        let input_ids_tensor = Tensor::from_array((vec![batch_size, max_len], input_ids))
            .map_err(|e| ReviewError::embedding(format!("Failed to create input tensor: {}", e)))?;

        let attention_mask_tensor =
            Tensor::from_array((vec![batch_size, max_len], attention_mask)).map_err(|e| {
                ReviewError::embedding(format!("Failed to create mask tensor: {}", e))
            })?;

        let mut session = self
            .session
            .lock()
            .map_err(|e| ReviewError::embedding(format!("Failed to lock session: {}", e)))?;

        let outputs = if self.use_token_type_ids {
            let token_type_ids_tensor =
                Tensor::from_array((vec![batch_size, max_len], vec![0i64; batch_size * max_len]))
                    .map_err(|e| {
                        ReviewError::embedding(format!("Failed to create type-id tensor: {}", e))
                    })?;
            session.run(ort::inputs![
                "input_ids" => input_ids_tensor,
                "attention_mask" => attention_mask_tensor,
                "token_type_ids" => token_type_ids_tensor
            ])
        } else {
            session.run(ort::inputs![
                "input_ids" => input_ids_tensor,
                "attention_mask" => attention_mask_tensor
            ])
        }
        .map_err(|e| ReviewError::embedding(format!("Inference failed: {}", e)))?;

        // First output is last_hidden_state (batch, seq, hidden) for
        // sentence-transformers exports; some exports are already pooled.
        let (_, output) = outputs
            .iter()
            .next()
            .ok_or_else(|| ReviewError::embedding("No output tensor found"))?;

        let view = output
            .try_extract_array::<f32>()
            .map_err(|e| ReviewError::embedding(format!("Failed to extract tensor: {}", e)))?;

        let shape_dims: Vec<usize> = view.shape().to_vec();
        debug!("Output shape: {:?}", shape_dims);

        let embeddings = if shape_dims.len() == 3 {
            self.mean_pool_3d_ndarray(&view, &encodings, max_len)?
        } else if shape_dims.len() == 2 {
            let hidden_dim = shape_dims[1];
            (0..batch_size)
                .map(|i| {
                    let embedding: Vec<f32> = (0..hidden_dim).map(|j| view[[i, j]]).collect();
                    l2_normalize(embedding)
                })
                .collect()
        } else {
            return Err(ReviewError::embedding(format!(
                "Unexpected output shape: {:?}",
                shape_dims
            )));
        };

        if let Some(first) = embeddings.first() {
            if first.len() != self.dimension {
                return Err(ReviewError::DimensionMismatch {
                    field: "embedding".to_string(),
                    expected: self.dimension,
                    actual: first.len(),
                });
            }
        }

        Ok(embeddings)
    }

    /// Mean pooling over sequence dimension with attention mask.
    fn mean_pool_3d_ndarray(
        &self,
        tensor: &ArrayViewD<'_, f32>,
        encodings: &[tokenizers::Encoding],
        max_len: usize,
    ) -> Result<Vec<Vec<f32>>> {
        let shape = tensor.shape();
        let batch_size = shape[0];
        let seq_len = shape[1];
        let hidden_dim = shape[2];

        let mut embeddings = Vec::with_capacity(batch_size);

        for (i, encoding) in encodings.iter().enumerate() {
            let attention_mask = encoding.get_attention_mask();
            let valid_len = attention_mask
                .iter()
                .take(max_len)
                .filter(|&&m| m == 1)
                .count();

            if valid_len == 0 {
                embeddings.push(vec![0.0; hidden_dim]);
                continue;
            }

            let mut sum = vec![0.0f32; hidden_dim];
            for j in 0..max_len.min(seq_len) {
                if j < attention_mask.len() && attention_mask[j] == 1 {
                    for (k, s) in sum.iter_mut().enumerate() {
                        *s += tensor[[i, j, k]];
                    }
                }
            }

            let embedding: Vec<f32> = sum.iter().map(|s| s / valid_len as f32).collect();
            embeddings.push(l2_normalize(embedding));
        }

        Ok(embeddings)
    }
}

/// L2 normalize a vector. Zero vectors stay zero.
pub(crate) fn l2_normalize(mut v: Vec<f32>) -> Vec<f32> {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in &mut v {
            *x /= norm;
        }
    }
    v
}

#[async_trait]
impl Embedder for OnnxEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.run_blocking(vec![text.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| ReviewError::embedding("No embedding returned"))
    }

    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        self.run_blocking(texts.iter().map(|t| t.to_string()).collect())
            .await
    }

    fn count_tokens(&self, text: &str) -> Result<usize> {
        let encoding = self
            .model
            .tokenizer
            .encode(text, true)
            .map_err(|e| ReviewError::embedding(format!("Tokenization failed: {}", e)))?;
        Ok(encoding.get_ids().len())
    }

    fn dimension(&self) -> usize {
        self.model.dimension
    }

    fn max_tokens(&self) -> usize {
        self.model.max_tokens
    }
}
