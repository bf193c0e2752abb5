use shared::{DrawingKind, ModelStatus};
use std::collections::HashMap;
use std::fs::File;
use std::path::Path;
use std::sync::Arc;
use strum::IntoEnumIterator;

use super::{ClassificationResult, Classifier, InferenceError, StartupError};
use crate::config::{ModelSpec, ModelsConfig};
use crate::imaging::NormalizedTensor;

struct LoadedModel {
    spec: ModelSpec,
    classifier: Arc<dyn Classifier>,
}

/// Immutable set of loaded classifiers, one per drawing kind.
#[derive(Clone, Default)]
pub struct ModelRunner {
    models: HashMap<DrawingKind, Arc<LoadedModel>>,
}

impl ModelRunner {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn with_model(
        mut self,
        kind: DrawingKind,
        spec: ModelSpec,
        classifier: Arc<dyn Classifier>,
    ) -> Self {
        self.models
            .insert(kind, Arc::new(LoadedModel { spec, classifier }));
        self
    }

    /// Loads every model named in `config` and warms each one up with an
    /// all-zero input. All weight files are checked before any is loaded.
    pub fn load(config: &ModelsConfig) -> Result<Self, StartupError> {
        for kind in DrawingKind::iter() {
            let path = config.weights_path(kind);
            File::open(&path).map_err(|source| StartupError::MissingWeights {
                kind,
                path: path.clone(),
                source,
            })?;
        }

        let mut runner = Self::empty();
        for kind in DrawingKind::iter() {
            let spec = config.spec(kind).clone();
            let path = config.weights_path(kind);
            log::info!("Loading {} model from {}", kind, path.display());
            let classifier = load_classifier(kind, &path, &spec)?;
            runner = runner.with_model(kind, spec, classifier);
            log::info!("{} model loaded successfully", kind.title());
        }

        runner.warm_up()?;
        log::info!("All models loaded and tested successfully");
        Ok(runner)
    }

    pub fn warm_up(&self) -> Result<(), StartupError> {
        for (kind, model) in &self.models {
            let zeros = NormalizedTensor::zeros(model.spec.input);
            self.infer(&zeros, *kind)
                .map_err(|source| StartupError::WarmUp {
                    kind: *kind,
                    source,
                })?;
            log::info!("{} model prediction test successful", kind.title());
        }
        Ok(())
    }

    pub fn spec(&self, kind: DrawingKind) -> Result<&ModelSpec, InferenceError> {
        self.models
            .get(&kind)
            .map(|m| &m.spec)
            .ok_or(InferenceError::ModelNotLoaded(kind))
    }

    pub fn infer(
        &self,
        tensor: &NormalizedTensor,
        kind: DrawingKind,
    ) -> Result<ClassificationResult, InferenceError> {
        let model = self
            .models
            .get(&kind)
            .ok_or(InferenceError::ModelNotLoaded(kind))?;

        let actual = tensor.shape();
        if actual != model.spec.input {
            return Err(InferenceError::ShapeMismatch {
                kind,
                expected: model.spec.input,
                actual,
            });
        }

        let raw = model.classifier.forward(tensor)?;
        log::debug!("{} model ({}) raw output: {:?}", kind, model.classifier.name(), raw);
        ClassificationResult::from_raw(
            &raw,
            &model.spec.labels,
            &model.spec.positive_label,
            model.spec.output,
        )
    }

    pub fn status(&self) -> Vec<ModelStatus> {
        DrawingKind::iter()
            .filter_map(|kind| {
                self.models.get(&kind).map(|m| ModelStatus {
                    kind,
                    input_shape: m.spec.input,
                    labels: m.spec.labels.clone(),
                })
            })
            .collect()
    }

    pub fn is_loaded(&self, kind: DrawingKind) -> bool {
        self.models.contains_key(&kind)
    }
}

#[cfg(feature = "torch")]
fn load_classifier(
    kind: DrawingKind,
    path: &Path,
    spec: &ModelSpec,
) -> Result<Arc<dyn Classifier>, StartupError> {
    let classifier = super::torch::TorchClassifier::load(path, spec.layout).map_err(|e| {
        StartupError::LoadFailed {
            kind,
            path: path.to_path_buf(),
            message: e.to_string(),
        }
    })?;
    Ok(Arc::new(classifier))
}

#[cfg(not(feature = "torch"))]
fn load_classifier(
    _kind: DrawingKind,
    _path: &Path,
    _spec: &ModelSpec,
) -> Result<Arc<dyn Classifier>, StartupError> {
    Err(StartupError::BackendUnavailable)
}
