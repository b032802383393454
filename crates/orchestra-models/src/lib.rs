//! Orchestra Models - local model lifecycle
//!
//! Owns everything about locally hosted models:
//! - [`ModelRegistry`]: registration, two-phase load/unload, memory accounting
//!   and LRU eviction between watermarks
//! - [`InferenceExecutor`]: one completion, embedding or batch against a handle
//! - [`ModelLoader`] / [`NativeSession`]: the seam a real runtime binds to
//! - [`ReferenceLoader`]: a deterministic runtime used when none is bound
//!
//! # Example
//!
//! ```rust,ignore
//! use orchestra_models::{InferenceExecutor, ModelRegistry, ReferenceLoader};
//! use std::sync::Arc;
//!
//! # async fn example() -> orchestra_core::Result<()> {
//! let registry = ModelRegistry::new(Arc::new(ReferenceLoader::default()), 4 << 30);
//! let model = registry.register("phi", "./models/phi.onnx")?;
//! let handle = registry.load(&model.id).await?;
//!
//! let out = InferenceExecutor::new().complete(&handle, "Hello", 16, 0.0).await?;
//! println!("{} ({} tokens)", out.text, out.tokens_used);
//! # Ok(())
//! # }
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod executor;
pub mod handle;
pub mod lifecycle;
pub mod loader;
pub mod memory;
pub mod registry;
pub mod runtime;

pub use executor::{Completion, InferenceExecutor};
pub use handle::{LoadedModel, LoadedModelInfo, ModelHandle};
pub use lifecycle::{allowed_transitions, validate_transition};
pub use loader::{GenerationParams, LoadedSession, ModelLoader, NativeCompletion, NativeSession};
pub use registry::ModelRegistry;
pub use runtime::{ReferenceLoader, ReferenceSession, Tokenizer};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
