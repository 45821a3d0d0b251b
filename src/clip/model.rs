//! CLIP visual encoder using ONNX Runtime

use anyhow::{anyhow, Context, Result};
use image::DynamicImage;
use ort::session::{builder::GraphOptimizationLevel, Session};
use ort::value::Tensor;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::analysis::quality::QualityMetrics;
use crate::db::PhotoRecord;
use crate::embedding::{Embedder, EmbedderFactory, EmbeddingOutput, ImageSource};

const INPUT_SIZE: u32 = 224;

// ImageNet statistics used by CLIP preprocessing
const MEAN: [f32; 3] = [0.48145466, 0.4578275, 0.40821073];
const STD: [f32; 3] = [0.26862954, 0.26130258, 0.27577711];

/// Qdrant's CLIP ViT-B/32 visual encoder export.
pub const VISION_MODEL_FILE: &str = "clip-vit-b32-vision.onnx";
pub const VISION_MODEL_URL: &str =
    "https://huggingface.co/Qdrant/clip-ViT-B-32-vision/resolve/main/model.onnx";

/// Serializes downloads so parallel workers don't write the same file.
static DOWNLOAD_LOCK: Mutex<()> = Mutex::new(());

#[derive(Debug, Clone)]
pub struct ClipOptions {
    pub model_dir: PathBuf,
    /// ONNX Runtime intra-op threads per worker.
    pub intra_threads: usize,
    pub compute_quality: bool,
}

impl Default for ClipOptions {
    fn default() -> Self {
        Self {
            model_dir: default_models_dir(),
            intra_threads: 1,
            compute_quality: true,
        }
    }
}

pub fn default_models_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("snapcull")
        .join("models")
}

/// One CLIP session per worker. Nothing is shared between instances except
/// the model file on disk.
pub struct ClipEmbedder {
    options: ClipOptions,
    source: Arc<dyn ImageSource>,
    session: Option<Session>,
}

impl ClipEmbedder {
    pub fn new(options: ClipOptions, source: Arc<dyn ImageSource>) -> Self {
        Self {
            options,
            source,
            session: None,
        }
    }

    /// A factory producing one embedder per worker, all reading from `source`.
    pub fn factory(options: ClipOptions, source: Arc<dyn ImageSource>) -> EmbedderFactory {
        Arc::new(move |_worker_id| {
            Box::new(ClipEmbedder::new(options.clone(), Arc::clone(&source))) as Box<dyn Embedder>
        })
    }

    pub fn is_ready(&self) -> bool {
        self.session.is_some()
    }

    /// Embed an already-decoded image.
    pub fn embed_image(&mut self, img: &DynamicImage) -> Result<Vec<f32>> {
        let session = self
            .session
            .as_mut()
            .ok_or_else(|| anyhow!("Visual model not loaded"))?;
        run_visual_encoder(session, img)
    }
}

impl Embedder for ClipEmbedder {
    fn load(&mut self) -> Result<()> {
        if self.session.is_some() {
            return Ok(());
        }
        let model_path = ensure_model(&self.options.model_dir, VISION_MODEL_FILE, VISION_MODEL_URL)?;

        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(self.options.intra_threads.max(1))?
            .commit_from_file(&model_path)
            .with_context(|| format!("Failed to load {}", model_path.display()))?;

        self.session = Some(session);
        Ok(())
    }

    fn embed(&mut self, photo: &PhotoRecord) -> Result<EmbeddingOutput> {
        let bytes = self.source.fetch(photo)?;
        let img = image::load_from_memory(&bytes)
            .with_context(|| format!("Failed to decode {}", photo.name))?;

        let embedding = self.embed_image(&img)?;
        let quality_metrics = self
            .options
            .compute_quality
            .then(|| QualityMetrics::from_image(&img));

        Ok(EmbeddingOutput {
            embedding,
            quality_metrics,
        })
    }
}

/// Download a model file into `dir` if it isn't there yet.
fn ensure_model(dir: &Path, filename: &str, url: &str) -> Result<PathBuf> {
    let model_path = dir.join(filename);
    let _guard = DOWNLOAD_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    if model_path.exists() {
        return Ok(model_path);
    }

    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create {}", dir.display()))?;

    tracing::info!(model = %filename, "Downloading CLIP model...");
    let response = ureq::get(url)
        .call()
        .map_err(|e| anyhow!("Failed to download model: {}", e))?;

    // Write to a temp name so an interrupted download never looks complete
    let partial = dir.join(format!("{filename}.part"));
    let mut file = std::fs::File::create(&partial)?;
    std::io::copy(&mut response.into_reader(), &mut file)?;
    std::fs::rename(&partial, &model_path)?;

    tracing::info!(model = %filename, path = ?model_path, "CLIP model downloaded");
    Ok(model_path)
}

/// Resize to 224x224 and lay out as normalized NCHW floats.
fn preprocess(img: &DynamicImage) -> Vec<f32> {
    let resized = img.resize_exact(INPUT_SIZE, INPUT_SIZE, image::imageops::FilterType::Triangle);
    let rgb = resized.to_rgb8();

    let plane = (INPUT_SIZE * INPUT_SIZE) as usize;
    let mut input = vec![0.0f32; 3 * plane];
    for (idx, pixel) in rgb.pixels().enumerate() {
        for c in 0..3 {
            input[c * plane + idx] = (pixel[c] as f32 / 255.0 - MEAN[c]) / STD[c];
        }
    }
    input
}

fn l2_normalize(mut v: Vec<f32>) -> Vec<f32> {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        v.iter_mut().for_each(|x| *x /= norm);
    }
    v
}

fn run_visual_encoder(session: &mut Session, img: &DynamicImage) -> Result<Vec<f32>> {
    let input_tensor = Tensor::from_array((
        [1usize, 3, INPUT_SIZE as usize, INPUT_SIZE as usize],
        preprocess(img).into_boxed_slice(),
    ))?;

    let outputs = session.run(ort::inputs!["pixel_values" => input_tensor])?;

    let embedding_output = outputs
        .iter()
        .next()
        .ok_or_else(|| anyhow!("No embedding output"))?;

    let (_shape, embedding_data) = embedding_output.1.try_extract_tensor::<f32>()?;

    Ok(l2_normalize(embedding_data.to_vec()))
}
