//! Runtime binding seam
//!
//! The registry and executor only speak to a model runtime through these two
//! traits. Both are synchronous: callers run them on the blocking pool.

use orchestra_core::{ModelDescriptor, ModelMetadata, Result};
use std::fmt;
use std::path::Path;

/// Decoding parameters for one generation call
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GenerationParams {
    pub max_tokens: u32,
    pub temperature: f32,
}

/// Raw output of a native generation call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NativeCompletion {
    pub text: String,
    /// Prompt plus generated tokens
    pub tokens_used: u32,
}

/// A live native inference session
pub trait NativeSession: Send + Sync + fmt::Debug {
    /// Generate text for a prompt
    ///
    /// # Errors
    /// - `OrchestraError::Inference` on runtime failure
    fn generate(&self, prompt: &str, params: &GenerationParams) -> Result<NativeCompletion>;

    /// Embed a text
    ///
    /// # Errors
    /// - `OrchestraError::Inference` on runtime failure
    fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Release native resources. Later calls must fail.
    ///
    /// # Errors
    /// - `OrchestraError::Inference` if the runtime refuses to close
    fn close(&self) -> Result<()>;
}

/// A freshly loaded session and its resident footprint
#[derive(Debug)]
pub struct LoadedSession {
    pub session: Box<dyn NativeSession>,
    pub resident_bytes: u64,
}

/// Knows how to inspect and open model files
pub trait ModelLoader: Send + Sync + fmt::Debug {
    /// Gather coarse metadata without loading
    ///
    /// # Errors
    /// - `OrchestraError::Io` if the file cannot be read
    fn inspect(&self, path: &Path) -> Result<ModelMetadata>;

    /// Open a native session; potentially slow
    ///
    /// # Errors
    /// - `OrchestraError::Inference` or `OrchestraError::Io` on failure
    fn load(&self, descriptor: &ModelDescriptor) -> Result<LoadedSession>;
}
