use anyhow::{Result, bail};
use async_trait::async_trait;
use axum::body::Bytes;
use candle_core::utils::{cuda_is_available, metal_is_available};
use candle_core::{DType, Device, Module, Tensor};
use candle_nn::VarBuilder;
use candle_nn::ops::softmax;
use candle_transformers::models::resnet;
use hf_hub::{Repo, RepoType, api::tokio::Api};
use image::imageops::FilterType;
use std::path::PathBuf;
use std::sync::Arc;

use crate::engine::BatchedEngine;

const RESIZE: u32 = 256;
const CROP: u32 = 224;
/// Per-channel means in BGR order, on the 0..255 scale.
const BGR_MEAN: [f32; 3] = [104.0, 117.0, 123.0];
const NUM_CLASSES: usize = 2;

/// Two-class ResNet-50 scoring images with the open-NSFW preprocessing.
pub struct ResnetEngine {
    model: Arc<candle_nn::Func<'static>>,
    device: Device,
}

#[derive(Debug, Clone)]
pub struct ResnetConfig {
    pub model_id: Option<String>,
    pub model_path: Option<PathBuf>,
    pub revision: String,
    pub cpu: bool,
}

impl Default for ResnetConfig {
    fn default() -> Self {
        Self {
            model_id: None,
            model_path: None,
            revision: "main".to_string(),
            cpu: false,
        }
    }
}

impl ResnetEngine {
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

    #[tracing::instrument(skip(config), fields(model_id = ?config.model_id, cpu = config.cpu))]
    pub async fn new(config: ResnetConfig) -> Result<Self> {
        let device = Self::device(config.cpu)?;

        let weights_filename = match (&config.model_path, &config.model_id) {
            (Some(base_path), _) => {
                if !base_path.is_dir() {
                    bail!("Model path {} is not a directory.", base_path.display());
                }
                base_path.join("model.safetensors")
            }
            (None, Some(model_id)) => {
                let repo = Repo::with_revision(
                    model_id.clone(),
                    RepoType::Model,
                    config.revision.clone(),
                );
                Api::new()?.repo(repo).get("model.safetensors").await?
            }
            (None, None) => bail!("Either model_id or model_path must be specified"),
        };

        let vb = unsafe {
            VarBuilder::from_mmaped_safetensors(&[weights_filename], DType::F32, &device)?
        };
        let model = resnet::resnet50(NUM_CLASSES, vb)?;

        Ok(Self {
            model: Arc::new(model),
            device,
        })
    }
}

/// Decodes an image into a `(3, 224, 224)` BGR, mean-subtracted buffer.
fn preprocess(image: &[u8]) -> Result<Vec<f32>> {
    let decoded = image::load_from_memory(image)?;
    let resized = decoded
        .resize_exact(RESIZE, RESIZE, FilterType::Triangle)
        .to_rgb8();
    let offset = (RESIZE - CROP) / 2;
    let cropped = image::imageops::crop_imm(&resized, offset, offset, CROP, CROP).to_image();

    let plane = (CROP * CROP) as usize;
    let mut data = vec![0f32; 3 * plane];
    for (x, y, pixel) in cropped.enumerate_pixels() {
        let idx = (y * CROP + x) as usize;
        let [r, g, b] = pixel.0;
        data[idx] = b as f32 - BGR_MEAN[0];
        data[plane + idx] = g as f32 - BGR_MEAN[1];
        data[2 * plane + idx] = r as f32 - BGR_MEAN[2];
    }
    Ok(data)
}

#[async_trait]
impl BatchedEngine for ResnetEngine {
    #[tracing::instrument(skip(self, images), fields(batch_size = images.len()))]
    async fn probabilities_batch(&self, images: Vec<Bytes>) -> Result<Vec<Result<Vec<f32>>>> {
        let model = self.model.clone();
        let device = self.device.clone();

        tokio::task::spawn_blocking(move || -> Result<Vec<Result<Vec<f32>>>> {
            // Undecodable images fail on their own; the rest share one forward pass.
            let mut results: Vec<Result<Vec<f32>>> = Vec::with_capacity(images.len());
            let mut tensors = Vec::new();
            let mut positions = Vec::new();
            for (position, image) in images.iter().enumerate() {
                match preprocess(image).and_then(|data| {
                    Ok(Tensor::from_vec(data, (3, CROP as usize, CROP as usize), &device)?)
                }) {
                    Ok(tensor) => {
                        tensors.push(tensor);
                        positions.push(position);
                        results.push(Ok(Vec::new()));
                    }
                    Err(e) => results.push(Err(e)),
                }
            }

            if tensors.is_empty() {
                return Ok(results);
            }

            let batch = Tensor::stack(&tensors, 0)?;
            let logits = model.forward(&batch)?;
            let probs = softmax(&logits, 1)?.to_vec2::<f32>()?;

            for (position, row) in positions.into_iter().zip(probs) {
                results[position] = Ok(row);
            }
            Ok(results)
        })
        .await?
    }
}
