//! Deterministic reference runtime
//!
//! A self-contained [`ModelLoader`] used when no real tensor runtime is bound.
//! Loading a model hashes the file contents into a seed; generation and
//! embeddings are pure functions of that seed and the input, so low
//! temperature output is reproducible across loads.

use crate::loader::{GenerationParams, LoadedSession, ModelLoader, NativeCompletion, NativeSession};
use orchestra_core::{Capability, ModelDescriptor, ModelMetadata, OrchestraError, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::fs::File;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

/// Upper bound on tokens one generation call produces
pub const MAX_GENERATED_TOKENS: u32 = 50;

/// Dimension of embedding vectors
pub const EMBEDDING_DIM: usize = 768;

/// At or below this temperature decoding is deterministic
pub const GREEDY_TEMPERATURE: f32 = 0.2;

/// Buckets for words outside the fixed vocabulary
const UNKNOWN_BUCKETS: u32 = 4096;

const VOCABULARY: &[&str] = &[
    "the", "a", "an", "and", "or", "of", "to", "in", "for", "with", "on", "by", "is", "are",
    "be", "this", "that", "it", "as", "from", "request", "response", "endpoint", "service",
    "process", "task", "gateway", "schema", "field", "value", "error", "status", "user",
    "data", "model", "api", "path", "method", "parameter", "security", "token", "flow",
    "event", "step", "check", "result", "analysis", "dependency", "missing", "required",
    "optional", "valid", "invalid", "should", "may", "returns", "accepts", "defines",
    "calls", "uses", "before", "after", "when", "then",
];

/// Word-level tokenizer over a fixed vocabulary with hashed unknown buckets
#[derive(Debug, Clone, Copy, Default)]
pub struct Tokenizer;

impl Tokenizer {
    /// Number of ids this tokenizer can emit
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn vocab_size(&self) -> u32 {
        VOCABULARY.len() as u32 + UNKNOWN_BUCKETS
    }

    /// Split text into token ids
    #[must_use]
    pub fn encode(&self, text: &str) -> Vec<u32> {
        text.split(|c: char| c.is_whitespace() || c.is_ascii_punctuation())
            .filter(|w| !w.is_empty())
            .map(|w| Self::token_id(&w.to_lowercase()))
            .collect()
    }

    /// Render ids back to words; unknown buckets become `<unk>`
    #[must_use]
    pub fn decode(&self, ids: &[u32]) -> String {
        ids.iter()
            .map(|&id| VOCABULARY.get(id as usize).copied().unwrap_or("<unk>"))
            .collect::<Vec<_>>()
            .join(" ")
    }

    #[allow(clippy::cast_possible_truncation)]
    fn token_id(word: &str) -> u32 {
        if let Some(pos) = VOCABULARY.iter().position(|v| *v == word) {
            return pos as u32;
        }
        let hash = blake3::hash(word.as_bytes());
        let mut bucket = [0u8; 4];
        bucket.copy_from_slice(&hash.as_bytes()[..4]);
        VOCABULARY.len() as u32 + u32::from_le_bytes(bucket) % UNKNOWN_BUCKETS
    }
}

/// Loader for the reference runtime
#[derive(Debug, Clone)]
pub struct ReferenceLoader {
    overhead_factor: f64,
}

impl ReferenceLoader {
    /// Create loader estimating resident memory as `file size × overhead_factor`
    #[inline]
    #[must_use]
    pub fn new(overhead_factor: f64) -> Self {
        Self { overhead_factor }
    }

    /// Infer capability from the file name
    fn infer_capability(path: &Path) -> Capability {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        if name.contains("embed") {
            Capability::Embeddings
        } else {
            Capability::TextGeneration
        }
    }
}

impl Default for ReferenceLoader {
    fn default() -> Self {
        Self::new(1.5)
    }
}

impl ModelLoader for ReferenceLoader {
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_precision_loss,
        clippy::cast_sign_loss
    )]
    fn inspect(&self, path: &Path) -> Result<ModelMetadata> {
        let file_size = std::fs::metadata(path)?.len();
        let size_bytes = (file_size as f64 * self.overhead_factor) as u64;
        Ok(match Self::infer_capability(path) {
            Capability::Embeddings => ModelMetadata::embeddings(size_bytes),
            Capability::TextGeneration => ModelMetadata::text_generation(size_bytes),
        })
    }

    fn load(&self, descriptor: &ModelDescriptor) -> Result<LoadedSession> {
        let mut file = File::open(&descriptor.path)?;
        let mut hasher = blake3::Hasher::new();
        hasher.update_reader(&mut file)?;
        let seed = *hasher.finalize().as_bytes();

        tracing::debug!(
            "Reference runtime opened {} (seed {})",
            descriptor.path.display(),
            blake3::Hash::from(seed).to_hex()
        );

        Ok(LoadedSession {
            session: Box::new(ReferenceSession::new(seed)),
            resident_bytes: descriptor.size_bytes,
        })
    }
}

/// Session produced by [`ReferenceLoader`]
#[derive(Debug)]
pub struct ReferenceSession {
    seed: [u8; 32],
    tokenizer: Tokenizer,
    closed: AtomicBool,
}

impl ReferenceSession {
    /// Create session from a weight seed
    #[must_use]
    pub fn new(seed: [u8; 32]) -> Self {
        Self {
            seed,
            tokenizer: Tokenizer,
            closed: AtomicBool::new(false),
        }
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(OrchestraError::Inference("session closed".to_string()));
        }
        Ok(())
    }

    fn input_seed(&self, tokens: &[u32]) -> [u8; 32] {
        let mut hasher = blake3::Hasher::new_keyed(&self.seed);
        for token in tokens {
            hasher.update(&token.to_le_bytes());
        }
        *hasher.finalize().as_bytes()
    }
}

impl NativeSession for ReferenceSession {
    #[allow(clippy::cast_possible_truncation)]
    fn generate(&self, prompt: &str, params: &GenerationParams) -> Result<NativeCompletion> {
        self.ensure_open()?;
        let prompt_tokens = self.tokenizer.encode(prompt);
        let count = params.max_tokens.min(MAX_GENERATED_TOKENS);

        let mut rng = if params.temperature <= GREEDY_TEMPERATURE {
            StdRng::from_seed(self.input_seed(&prompt_tokens))
        } else {
            let mut seed = self.input_seed(&prompt_tokens);
            let noise: u64 = rand::rng().random();
            for (byte, n) in seed.iter_mut().zip(noise.to_le_bytes()) {
                *byte ^= n;
            }
            StdRng::from_seed(seed)
        };

        let generated: Vec<u32> = (0..count)
            .map(|_| rng.random_range(0..VOCABULARY.len()) as u32)
            .collect();

        Ok(NativeCompletion {
            text: self.tokenizer.decode(&generated),
            tokens_used: prompt_tokens.len() as u32 + count,
        })
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.ensure_open()?;
        let mut hasher = blake3::Hasher::new_keyed(&self.seed);
        hasher.update(text.as_bytes());
        let mut reader = hasher.finalize_xof();
        let mut raw = vec![0u8; EMBEDDING_DIM * 2];
        reader.fill(&mut raw);

        let mut vector: Vec<f32> = raw
            .chunks_exact(2)
            .map(|pair| f32::from(u16::from_le_bytes([pair[0], pair[1]])) / f32::from(u16::MAX) * 2.0 - 1.0)
            .collect();

        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v /= norm;
            }
        }
        Ok(vector)
    }

    fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}
