//! CLIP (Contrastive Language-Image Pre-training) image embeddings
//!
//! The visual encoder backs the [`Embedder`](crate::embedding::Embedder)
//! used by the embedding workers. Every worker loads its own session.

mod model;

pub use model::{default_models_dir, ClipEmbedder, ClipOptions, VISION_MODEL_FILE, VISION_MODEL_URL};
