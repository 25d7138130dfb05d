//! Vision-language captioning model.
//!
//! [`CaptionModel`] is the boundary the rest of the crate talks to;
//! [`BlipCaptioner`] implements it with candle's BLIP port.

use std::path::PathBuf;
use std::sync::Mutex;

use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::generation::LogitsProcessor;
use candle_transformers::models::blip;
use hf_hub::{Repo, RepoType, api::sync::Api};
use image::{RgbImage, imageops::FilterType};
use tokenizers::Tokenizer;

/// Upper bound on generated sequence length, start token included.
pub const MAX_CAPTION_TOKENS: usize = 50;

const IMAGE_SIZE: u32 = 384;
// BLIP uses [SEP] both to start decoding and to end it.
const SEP_TOKEN_ID: u32 = 30522;
const IMAGE_MEAN: [f32; 3] = [0.481_454_66, 0.457_827_5, 0.408_210_73];
const IMAGE_STD: [f32; 3] = [0.268_629_54, 0.261_302_6, 0.275_777_1];

#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("model error: {0}")]
    Candle(#[from] candle_core::Error),

    #[error("tokenizer error: {0}")]
    Tokenizer(String),

    #[error("failed to download model files: {0}")]
    Hub(#[from] hf_hub::api::sync::ApiError),

    #[error("failed to read model files: {0}")]
    Io(#[from] std::io::Error),

    #[error("checkpoint does not match the blip-image-captioning-large architecture: {0}")]
    UnsupportedCheckpoint(candle_core::Error),

    #[error("captioning model is unavailable after an earlier failure")]
    Poisoned,
}

/// Produces a caption for an RGB image. Implementations block.
pub trait CaptionModel: Send + Sync {
    fn caption(&self, image: &RgbImage) -> Result<String, ModelError>;
}

#[derive(Clone, Debug)]
pub enum ModelSource {
    /// Directory containing `model.safetensors` and `tokenizer.json`.
    Local(PathBuf),
    Hub { model_id: String, revision: String },
}

/// BLIP captioner on the CPU.
///
/// Only checkpoints with the `blip-image-captioning-large` layout load;
/// candle ships no other BLIP captioning config.
pub struct BlipCaptioner {
    model: Mutex<blip::BlipForConditionalGeneration>,
    tokenizer: Tokenizer,
    device: Device,
}

impl BlipCaptioner {
    pub fn load(source: &ModelSource) -> Result<Self, ModelError> {
        let (weights, tokenizer) = resolve_files(source)?;
        tracing::info!(weights = %weights.display(), "loading BLIP weights");

        let device = Device::Cpu;
        let config = blip::Config::image_captioning_large();
        let data = std::fs::read(&weights)?;
        let vb = VarBuilder::from_buffered_safetensors(data, DType::F32, &device)?;
        let model = blip::BlipForConditionalGeneration::new(&config, vb)
            .map_err(ModelError::UnsupportedCheckpoint)?;
        let tokenizer =
            Tokenizer::from_file(&tokenizer).map_err(|e| ModelError::Tokenizer(e.to_string()))?;

        Ok(Self {
            model: Mutex::new(model),
            tokenizer,
            device,
        })
    }

    fn generate(&self, pixels: &Tensor) -> Result<Vec<u32>, ModelError> {
        let mut model = self.model.lock().map_err(|_| ModelError::Poisoned)?;

        let image_embeds = pixels.unsqueeze(0)?.apply(model.vision_model())?;
        let mut token_ids = vec![SEP_TOKEN_ID];
        let decoded = decode_greedy(&mut model, &image_embeds, &mut token_ids, &self.device);

        model.reset_kv_cache();
        decoded?;
        Ok(token_ids)
    }
}

impl CaptionModel for BlipCaptioner {
    fn caption(&self, image: &RgbImage) -> Result<String, ModelError> {
        let pixels = preprocess(image, &self.device)?;
        let token_ids = self.generate(&pixels)?;
        let caption = self
            .tokenizer
            .decode(&token_ids[1..], true)
            .map_err(|e| ModelError::Tokenizer(e.to_string()))?;
        Ok(caption.trim().to_string())
    }
}

fn resolve_files(source: &ModelSource) -> Result<(PathBuf, PathBuf), ModelError> {
    match source {
        ModelSource::Local(dir) => Ok((
            existing(dir.join("model.safetensors"))?,
            existing(dir.join("tokenizer.json"))?,
        )),
        ModelSource::Hub { model_id, revision } => {
            let api = Api::new()?;
            let weights = api
                .repo(Repo::with_revision(model_id.clone(), RepoType::Model, revision.clone()))
                .get("model.safetensors")?;
            let tokenizer = api.model(model_id.clone()).get("tokenizer.json")?;
            Ok((weights, tokenizer))
        }
    }
}

/// Extends `token_ids` one token at a time until [SEP] or the length cap.
fn decode_greedy(
    model: &mut blip::BlipForConditionalGeneration,
    image_embeds: &Tensor,
    token_ids: &mut Vec<u32>,
    device: &Device,
) -> Result<(), candle_core::Error> {
    // No temperature and no top-p means argmax sampling.
    let mut logits_processor = LogitsProcessor::new(0, None, None);

    while token_ids.len() < MAX_CAPTION_TOKENS {
        // The decoder keeps a KV cache, so only the newest token is fed.
        let last = token_ids.len() - 1;
        let input_ids = Tensor::new(&token_ids[last..], device)?.unsqueeze(0)?;
        let logits = model.text_decoder().forward(&input_ids, image_embeds)?;
        let logits = logits.squeeze(0)?;
        let logits = logits.get(logits.dim(0)? - 1)?;
        let token = logits_processor.sample(&logits)?;
        if token == SEP_TOKEN_ID {
            break;
        }
        token_ids.push(token);
    }
    Ok(())
}

fn existing(path: PathBuf) -> Result<PathBuf, ModelError> {
    if path.is_file() {
        Ok(path)
    } else {
        Err(ModelError::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("{} does not exist", path.display()),
        )))
    }
}

/// Resizes to the model's input size and normalises into a CHW float tensor.
fn preprocess(image: &RgbImage, device: &Device) -> Result<Tensor, candle_core::Error> {
    let resized = image::imageops::resize(image, IMAGE_SIZE, IMAGE_SIZE, FilterType::Triangle);
    let size = IMAGE_SIZE as usize;
    let data = Tensor::from_vec(resized.into_raw(), (size, size, 3), device)?.permute((2, 0, 1))?;
    let mean = Tensor::new(&IMAGE_MEAN, device)?.reshape((3, 1, 1))?;
    let std = Tensor::new(&IMAGE_STD, device)?.reshape((3, 1, 1))?;
    (data.to_dtype(DType::F32)? / 255.)?
        .broadcast_sub(&mean)?
        .broadcast_div(&std)
}
