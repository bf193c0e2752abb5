use std::path::Path;
use std::sync::Mutex;
use tch::{CModule, Device, Kind, Tensor};

use super::{Classifier, InferenceError, TensorLayout};
use crate::imaging::NormalizedTensor;

/// TorchScript classifier. The module handle is not `Sync`, so forward passes
/// on one model are serialized.
pub struct TorchClassifier {
    module: Mutex<CModule>,
    device: Device,
    layout: TensorLayout,
    name: String,
}

impl TorchClassifier {
    pub fn load(path: &Path, layout: TensorLayout) -> Result<Self, tch::TchError> {
        let device = Device::cuda_if_available();
        let module = CModule::load_on_device(path, device)?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "torchscript".to_string());
        log::info!("Loaded TorchScript module {} on {:?}", name, device);
        Ok(Self {
            module: Mutex::new(module),
            device,
            layout,
            name,
        })
    }

    fn to_input(&self, input: &NormalizedTensor) -> Tensor {
        let shape = input.shape();
        let (height, width, channels) = (
            shape.height as i64,
            shape.width as i64,
            shape.channels as i64,
        );
        let batch = Tensor::from_slice(&input.to_vec()).view([1, height, width, channels]);
        let batch = match self.layout {
            TensorLayout::Nhwc => batch,
            TensorLayout::Nchw => batch.permute([0, 3, 1, 2]).contiguous(),
        };
        batch.to_device(self.device)
    }
}

impl Classifier for TorchClassifier {
    fn name(&self) -> &str {
        &self.name
    }

    fn forward(&self, input: &NormalizedTensor) -> Result<Vec<f32>, InferenceError> {
        let tensor = self.to_input(input);
        let module = self
            .module
            .lock()
            .map_err(|_| InferenceError::Backend("model lock poisoned".to_string()))?;
        let output = tch::no_grad(|| module.forward_ts(&[tensor]))?;

        let output_flat = output
            .to_kind(Kind::Float)
            .to_device(Device::Cpu)
            .view([-1]);
        let num_elements = output_flat.size()[0] as usize;
        let mut output_vec = vec![0.0f32; num_elements];
        output_flat.copy_data(&mut output_vec, num_elements);
        Ok(output_vec)
    }
}
