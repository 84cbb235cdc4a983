//! Process-wide sketch network, loaded once and shared by every request.

use std::sync::{Mutex, OnceLock};

use burn::tensor::backend::Backend;
use burn::tensor::{Tensor, TensorData};
use tracing::info;

use super::backend::{
    ComputeBackend, CpuBackend, CpuDevice, GpuBackend, GpuDevice, init_cubecl_config, init_wgpu,
    resolve_backend,
};
#[cfg(feature = "cuda")]
use super::backend::{CudaGpuBackend, CudaGpuDevice};
use super::network::{SketchNet, SketchNetConfig, check_input_dims};
use super::weights::load_weights;
use super::{EMBEDDING_DIM, ForwardMode, INPUT_CHANNELS, INPUT_SIZE, SketchEmbedder};
use crate::config::ModelSettings;
use crate::error::{RetrievalError, ShapeOrigin};
use crate::preprocess::{SketchImage, stack_batch};

enum SketchModelInner {
    Cpu {
        model: SketchNet<CpuBackend>,
        device: CpuDevice,
    },
    Wgpu {
        model: SketchNet<GpuBackend>,
        device: GpuDevice,
    },
    #[cfg(feature = "cuda")]
    Cuda {
        model: SketchNet<CudaGpuBackend>,
        device: CudaGpuDevice,
    },
}

/// Loaded network weights bound to a compute device.
pub struct SketchModel {
    inner: SketchModelInner,
    class_num: usize,
}

/// All four network heads for one image.
#[derive(Clone, Debug, PartialEq)]
pub struct SketchPrediction {
    pub class_probs: Vec<f32>,
    /// Auxiliary head after inception 4a.
    pub aux1_probs: Vec<f32>,
    /// Auxiliary head after inception 4d.
    pub aux2_probs: Vec<f32>,
    pub embedding: Vec<f32>,
}

static SKETCH_MODEL: OnceLock<Mutex<Option<SketchModel>>> = OnceLock::new();

impl SketchModel {
    /// Load the weight bundle named by `settings` onto the resolved backend.
    pub fn load(settings: &ModelSettings) -> Result<Self, RetrievalError> {
        let path = settings.resolved_weights_path()?;
        let config = SketchNetConfig::new(settings.class_num);
        let backend = resolve_backend(settings.backend);
        let inner = match backend {
            ComputeBackend::Cpu => {
                let device = CpuDevice::default();
                let model = load_weights::<CpuBackend>(&config, &path, &device)?;
                SketchModelInner::Cpu { model, device }
            }
            #[cfg(feature = "cuda")]
            ComputeBackend::Cuda => {
                init_cubecl_config();
                let device = CudaGpuDevice::default();
                let model = load_weights::<CudaGpuBackend>(&config, &path, &device)?;
                SketchModelInner::Cuda { model, device }
            }
            #[cfg(not(feature = "cuda"))]
            ComputeBackend::Cuda => Self::load_wgpu(&config, &path)?,
            ComputeBackend::Wgpu => Self::load_wgpu(&config, &path)?,
        };
        info!("Sketch network ready on {} backend", backend.as_str());
        Ok(Self {
            inner,
            class_num: settings.class_num,
        })
    }

    fn load_wgpu(
        config: &SketchNetConfig,
        path: &std::path::Path,
    ) -> Result<SketchModelInner, RetrievalError> {
        init_cubecl_config();
        let device = GpuDevice::default();
        init_wgpu(&device);
        let model = load_weights::<GpuBackend>(config, path, &device)?;
        Ok(SketchModelInner::Wgpu { model, device })
    }

    /// Wrap an in-memory CPU network, e.g. freshly initialized or trained in-process.
    pub fn from_cpu(model: SketchNet<CpuBackend>) -> Self {
        let class_num = model.class_num();
        Self {
            inner: SketchModelInner::Cpu {
                model,
                device: CpuDevice::default(),
            },
            class_num,
        }
    }

    pub fn class_num(&self) -> usize {
        self.class_num
    }

    pub fn backend(&self) -> ComputeBackend {
        match &self.inner {
            SketchModelInner::Cpu { .. } => ComputeBackend::Cpu,
            SketchModelInner::Wgpu { .. } => ComputeBackend::Wgpu,
            #[cfg(feature = "cuda")]
            SketchModelInner::Cuda { .. } => ComputeBackend::Cuda,
        }
    }

    /// Embedding rows for `images`, in inference mode.
    pub fn embed(&self, images: &[SketchImage]) -> Result<Vec<Vec<f32>>, RetrievalError> {
        if images.is_empty() {
            return Ok(Vec::new());
        }
        let data = batch_data(images)?;
        match &self.inner {
            SketchModelInner::Cpu { model, device } => run_embedding(model, device, data, images.len()),
            SketchModelInner::Wgpu { model, device } => run_embedding(model, device, data, images.len()),
            #[cfg(feature = "cuda")]
            SketchModelInner::Cuda { model, device } => run_embedding(model, device, data, images.len()),
        }
    }

    /// Full forward pass: main and auxiliary class probabilities plus embedding per image.
    pub fn predict(&self, images: &[SketchImage]) -> Result<Vec<SketchPrediction>, RetrievalError> {
        if images.is_empty() {
            return Ok(Vec::new());
        }
        let data = batch_data(images)?;
        match &self.inner {
            SketchModelInner::Cpu { model, device } => run_predict(model, device, data, images.len()),
            SketchModelInner::Wgpu { model, device } => run_predict(model, device, data, images.len()),
            #[cfg(feature = "cuda")]
            SketchModelInner::Cuda { model, device } => run_predict(model, device, data, images.len()),
        }
    }
}

impl SketchEmbedder for SketchModel {
    fn embed_batch(&self, images: &[SketchImage]) -> Result<Vec<Vec<f32>>, RetrievalError> {
        self.embed(images)
    }
}

fn batch_data(images: &[SketchImage]) -> Result<TensorData, RetrievalError> {
    let dims = [images.len(), INPUT_CHANNELS, INPUT_SIZE, INPUT_SIZE];
    check_input_dims(dims)?;
    Ok(TensorData::new(stack_batch(images), dims))
}

fn run_embedding<B: Backend>(
    model: &SketchNet<B>,
    device: &B::Device,
    data: TensorData,
    batch: usize,
) -> Result<Vec<Vec<f32>>, RetrievalError> {
    let input = Tensor::<B, 4>::from_data(data, device);
    let embedding = model.forward_embedding(input, ForwardMode::Inference);
    split_rows(embedding, batch, EMBEDDING_DIM)
}

fn run_predict<B: Backend>(
    model: &SketchNet<B>,
    device: &B::Device,
    data: TensorData,
    batch: usize,
) -> Result<Vec<SketchPrediction>, RetrievalError> {
    let input = Tensor::<B, 4>::from_data(data, device);
    let output = model.forward(input, ForwardMode::Inference);
    let class_num = model.class_num();
    let probs = split_rows(output.class_probs, batch, class_num)?;
    let aux1 = split_rows(output.aux1_probs, batch, class_num)?;
    let aux2 = split_rows(output.aux2_probs, batch, class_num)?;
    let embeddings = split_rows(output.embedding, batch, EMBEDDING_DIM)?;
    Ok(probs
        .into_iter()
        .zip(aux1)
        .zip(aux2)
        .zip(embeddings)
        .map(|(((class_probs, aux1_probs), aux2_probs), embedding)| SketchPrediction {
            class_probs,
            aux1_probs,
            aux2_probs,
            embedding,
        })
        .collect())
}

fn split_rows<B: Backend>(
    tensor: Tensor<B, 2>,
    batch: usize,
    width: usize,
) -> Result<Vec<Vec<f32>>, RetrievalError> {
    let dims = tensor.dims();
    if dims != [batch, width] {
        return Err(RetrievalError::shape(ShapeOrigin::Output, "network output", &[batch, width], &dims));
    }
    let data = tensor.into_data();
    let flat = data
        .as_slice::<f32>()
        .map_err(|err| RetrievalError::Inference(format!("failed to read output tensor: {err:?}")))?;
    Ok(flat.chunks(width).map(<[f32]>::to_vec).collect())
}

/// Load the shared model now; a second call keeps the already loaded one.
pub fn init_sketch_model(settings: &ModelSettings) -> Result<(), RetrievalError> {
    let mutex = SKETCH_MODEL.get_or_init(|| Mutex::new(None));
    let mut guard = mutex
        .lock()
        .map_err(|_| RetrievalError::Inference("sketch model lock poisoned".into()))?;
    if guard.is_none() {
        *guard = Some(SketchModel::load(settings)?);
    }
    Ok(())
}

/// Replace the shared model with an already constructed one.
pub fn install_sketch_model(model: SketchModel) -> Result<(), RetrievalError> {
    let mutex = SKETCH_MODEL.get_or_init(|| Mutex::new(None));
    let mut guard = mutex
        .lock()
        .map_err(|_| RetrievalError::Inference("sketch model lock poisoned".into()))?;
    *guard = Some(model);
    Ok(())
}

/// Run `f` against the shared model, loading it from settings on first use.
pub fn with_sketch_model<T>(
    settings: &ModelSettings,
    f: impl FnOnce(&SketchModel) -> Result<T, RetrievalError>,
) -> Result<T, RetrievalError> {
    let mutex = SKETCH_MODEL.get_or_init(|| Mutex::new(None));
    let mut guard = mutex
        .lock()
        .map_err(|_| RetrievalError::Inference("sketch model lock poisoned".into()))?;
    if guard.is_none() {
        *guard = Some(SketchModel::load(settings)?);
    }
    let model = guard
        .as_ref()
        .ok_or_else(|| RetrievalError::Inference("sketch model missing after load".into()))?;
    f(model)
}

/// Drop the shared model; the next use loads it again.
pub fn reset_sketch_model() {
    let mutex = SKETCH_MODEL.get_or_init(|| Mutex::new(None));
    if let Ok(mut guard) = mutex.lock() {
        *guard = None;
    }
}

/// Embedder backed by the process-wide model.
#[derive(Clone, Debug, Default)]
pub struct SharedSketchModel {
    settings: ModelSettings,
}

impl SharedSketchModel {
    /// `settings` are used only if the shared model has not been loaded yet.
    pub fn new(settings: ModelSettings) -> Self {
        Self { settings }
    }
}

impl SketchEmbedder for SharedSketchModel {
    fn embed_batch(&self, images: &[SketchImage]) -> Result<Vec<Vec<f32>>, RetrievalError> {
        with_sketch_model(&self.settings, |model| model.embed(images))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::save_weights;

    /// Serializes tests that touch the process-wide model.
    static SHARED_MODEL_LOCK: Mutex<()> = Mutex::new(());

    fn cpu_model(class_num: usize) -> SketchModel {
        SketchModel::from_cpu(SketchNetConfig::new(class_num).init(&CpuDevice::default()))
    }

    fn settings_at(path: std::path::PathBuf, class_num: usize) -> ModelSettings {
        ModelSettings {
            weights_path: Some(path),
            class_num,
            backend: ComputeBackend::Cpu,
        }
    }

    fn shared_class_num(settings: &ModelSettings) -> Result<usize, RetrievalError> {
        with_sketch_model(settings, |model| Ok(model.class_num()))
    }

    fn sketch(fill: f32) -> SketchImage {
        SketchImage::from_chw(vec![fill; INPUT_CHANNELS * INPUT_SIZE * INPUT_SIZE], INPUT_SIZE).unwrap()
    }

    #[test]
    fn missing_weights_fail_at_load() {
        let dir = tempfile::tempdir().unwrap();
        let settings = ModelSettings {
            weights_path: Some(dir.path().join("missing")),
            class_num: 5,
            backend: ComputeBackend::Cpu,
        };
        let err = SketchModel::load(&settings).err().unwrap();
        assert!(err.is_fatal());
    }

    #[test]
    fn empty_batch_skips_the_network() {
        let model = cpu_model(3);
        assert_eq!(model.class_num(), 3);
        assert_eq!(model.backend(), ComputeBackend::Cpu);
        assert!(model.embed(&[]).unwrap().is_empty());
        assert!(model.predict(&[]).unwrap().is_empty());
    }

    #[test]
    fn predict_returns_every_head_per_image() {
        let model = cpu_model(5);
        let images = [sketch(0.0), sketch(1.0)];
        let predictions = model.predict(&images).unwrap();
        assert_eq!(predictions.len(), 2);
        for prediction in &predictions {
            for probs in [&prediction.class_probs, &prediction.aux1_probs, &prediction.aux2_probs] {
                assert_eq!(probs.len(), 5);
                assert!(probs.iter().all(|p| *p >= 0.0));
                assert!((probs.iter().sum::<f32>() - 1.0).abs() < 1e-4);
            }
            assert_eq!(prediction.embedding.len(), EMBEDDING_DIM);
        }
        let embedded = model.embed(&images).unwrap();
        for (prediction, row) in predictions.iter().zip(&embedded) {
            for (a, b) in prediction.embedding.iter().zip(row) {
                assert!((a - b).abs() < 1e-4);
            }
        }
    }

    #[test]
    fn shared_model_lives_until_reset() {
        let _lock = SHARED_MODEL_LOCK.lock().unwrap_or_else(|err| err.into_inner());
        let dir = tempfile::tempdir().unwrap();
        let missing = settings_at(dir.path().join("missing"), 3);
        reset_sketch_model();

        install_sketch_model(cpu_model(3)).unwrap();
        // Loaded model wins over settings that would fail to load.
        init_sketch_model(&missing).unwrap();
        assert_eq!(shared_class_num(&missing).unwrap(), 3);

        install_sketch_model(cpu_model(4)).unwrap();
        assert_eq!(shared_class_num(&missing).unwrap(), 4);

        reset_sketch_model();
        let err = shared_class_num(&missing).unwrap_err();
        assert!(matches!(err, RetrievalError::WeightLoadFailure { .. }));

        let path = dir.path().join("sketchnet");
        let config = SketchNetConfig::new(6);
        save_weights(&config.init::<CpuBackend>(&CpuDevice::default()), &config, &path).unwrap();
        let saved = settings_at(path, 6);
        init_sketch_model(&saved).unwrap();
        assert_eq!(shared_class_num(&missing).unwrap(), 6);
        let shared = SharedSketchModel::new(missing);
        assert_eq!(shared.embed_batch(&[sketch(0.5)]).unwrap()[0].len(), EMBEDDING_DIM);
        reset_sketch_model();
    }
}
