//! Built-in model catalog
//!
//! The catalog is immutable after startup. Availability is resolved once from
//! the engine capabilities of the running build.

use serde::Serialize;
use std::fmt;

use crate::engine::EngineCapabilities;
use crate::error::{UpscaleError, UpscaleResult};

/// On-disk format of a model artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageFormat {
    /// Frozen TensorFlow graph consumed by the dedicated super-resolution engine
    ClassicalGraph,
    /// ONNX graph consumed by a general inference session
    TensorGraph,
}

impl StorageFormat {
    /// File extension used in the model store
    pub fn extension(self) -> &'static str {
        match self {
            Self::ClassicalGraph => "pb",
            Self::TensorGraph => "onnx",
        }
    }

    /// Engine family that executes this format
    pub fn backend_kind(self) -> BackendKind {
        match self {
            Self::ClassicalGraph => BackendKind::OpenCvDnn,
            Self::TensorGraph => BackendKind::OnnxRuntime,
        }
    }
}

/// Engine family behind a loaded model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// OpenCV `dnn_superres`
    OpenCvDnn,
    /// ONNX Runtime session
    OnnxRuntime,
}

impl BackendKind {
    /// Stable name reported to callers
    pub fn as_str(self) -> &'static str {
        match self {
            Self::OpenCvDnn => "opencv_dnn",
            Self::OnnxRuntime => "onnx_runtime",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Coarse speed/quality grouping shown in listings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelCategory {
    /// Real-time capable
    Fast,
    /// Slower, higher fidelity
    Quality,
    /// General purpose
    General,
}

/// Static description of one upscaling model
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelDescriptor {
    /// Unique catalog key
    pub id: String,
    /// Human-readable name
    pub name: String,
    /// Short description
    pub description: String,
    /// Linear output/input ratio
    pub scale: u32,
    /// Artifact format
    pub format: StorageFormat,
    /// Engine family
    pub backend_kind: BackendKind,
    /// Listing group
    pub category: ModelCategory,
    /// Algorithm name for the classical engine (`fsrcnn`, `espcn`, ...)
    pub architecture: Option<String>,
    /// Download sources, tried in order
    pub urls: Vec<String>,
    /// Whether this deployment can execute the model
    pub available: bool,
}

impl ModelDescriptor {
    /// Classical-graph descriptor
    pub fn classical(
        id: impl Into<String>,
        architecture: impl Into<String>,
        scale: u32,
        url: impl Into<String>,
    ) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            description: String::new(),
            scale,
            format: StorageFormat::ClassicalGraph,
            backend_kind: BackendKind::OpenCvDnn,
            category: ModelCategory::General,
            architecture: Some(architecture.into()),
            urls: vec![url.into()],
            available: true,
        }
    }

    /// General tensor-graph descriptor
    pub fn tensor_graph(id: impl Into<String>, scale: u32, url: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            description: String::new(),
            scale,
            format: StorageFormat::TensorGraph,
            backend_kind: BackendKind::OnnxRuntime,
            category: ModelCategory::General,
            architecture: None,
            urls: vec![url.into()],
            available: true,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_category(mut self, category: ModelCategory) -> Self {
        self.category = category;
        self
    }

    pub fn with_urls(mut self, urls: Vec<String>) -> Self {
        self.urls = urls;
        self
    }

    /// File name inside the model store
    pub fn file_name(&self) -> String {
        format!("{}.{}", self.id, self.format.extension())
    }
}

const FSRCNN_BASE: &str = "https://raw.githubusercontent.com/Saafke/FSRCNN_Tensorflow/master/models";
const ESPCN_BASE: &str = "https://raw.githubusercontent.com/fannymonori/TF-ESPCN/master/export";
const LAPSRN_BASE: &str = "https://raw.githubusercontent.com/fannymonori/TF-LapSRN/master/export";
const EDSR_BASE: &str = "https://github.com/Saafke/EDSR_Tensorflow/raw/master/models";
const REALESRGAN_BASE: &str =
    "https://github.com/Kuschel-code/JellyfinUpscalerPlugin/releases/download/models-v1.0";

/// Immutable set of known models
#[derive(Debug, Clone)]
pub struct ModelCatalog {
    models: Vec<ModelDescriptor>,
}

impl ModelCatalog {
    pub fn new(models: Vec<ModelDescriptor>) -> Self {
        Self { models }
    }

    /// Catalog shipped with the service
    pub fn builtin() -> Self {
        use ModelCategory::{Fast, General, Quality};

        let models = vec![
            ModelDescriptor::classical("fsrcnn-x2", "fsrcnn", 2, format!("{FSRCNN_BASE}/FSRCNN_x2.pb"))
                .with_name("FSRCNN x2 (Fast)")
                .with_description("Very fast 2x upscaling, good for real-time")
                .with_category(Fast),
            ModelDescriptor::classical("fsrcnn-x3", "fsrcnn", 3, format!("{FSRCNN_BASE}/FSRCNN_x3.pb"))
                .with_name("FSRCNN x3 (Fast)")
                .with_description("Fast 3x upscaling")
                .with_category(Fast),
            ModelDescriptor::classical("fsrcnn-x4", "fsrcnn", 4, format!("{FSRCNN_BASE}/FSRCNN_x4.pb"))
                .with_name("FSRCNN x4 (Fast)")
                .with_description("Fast 4x upscaling, lower quality but quick")
                .with_category(Fast),
            ModelDescriptor::classical("espcn-x2", "espcn", 2, format!("{ESPCN_BASE}/ESPCN_x2.pb"))
                .with_name("ESPCN x2 (Fastest)")
                .with_description("Fastest model, minimal quality improvement")
                .with_category(Fast),
            ModelDescriptor::classical("espcn-x3", "espcn", 3, format!("{ESPCN_BASE}/ESPCN_x3.pb"))
                .with_name("ESPCN x3 (Fastest)")
                .with_description("Fastest 3x model")
                .with_category(Fast),
            ModelDescriptor::classical("espcn-x4", "espcn", 4, format!("{ESPCN_BASE}/ESPCN_x4.pb"))
                .with_name("ESPCN x4 (Fastest)")
                .with_description("Fastest 4x model")
                .with_category(Fast),
            ModelDescriptor::classical("lapsrn-x2", "lapsrn", 2, format!("{LAPSRN_BASE}/LapSRN_x2.pb"))
                .with_name("LapSRN x2 (Quality)")
                .with_description("Good quality 2x upscaling")
                .with_category(Quality),
            ModelDescriptor::classical("lapsrn-x4", "lapsrn", 4, format!("{LAPSRN_BASE}/LapSRN_x4.pb"))
                .with_name("LapSRN x4 (Quality)")
                .with_description("Good quality 4x upscaling")
                .with_category(Quality),
            ModelDescriptor::classical("lapsrn-x8", "lapsrn", 8, format!("{LAPSRN_BASE}/LapSRN_x8.pb"))
                .with_name("LapSRN x8 (Quality)")
                .with_description("Extreme 8x upscaling")
                .with_category(Quality),
            ModelDescriptor::classical("edsr-x2", "edsr", 2, format!("{EDSR_BASE}/EDSR_x2.pb"))
                .with_name("EDSR x2 (Best Quality)")
                .with_description("Best quality 2x, requires more VRAM")
                .with_category(Quality),
            ModelDescriptor::classical("edsr-x3", "edsr", 3, format!("{EDSR_BASE}/EDSR_x3.pb"))
                .with_name("EDSR x3 (Best Quality)")
                .with_description("Best quality 3x")
                .with_category(Quality),
            ModelDescriptor::classical("edsr-x4", "edsr", 4, format!("{EDSR_BASE}/EDSR_x4.pb"))
                .with_name("EDSR x4 (Best Quality)")
                .with_description("Best quality 4x, slowest")
                .with_category(Quality),
            ModelDescriptor::tensor_graph("realesrgan-x2", 2, format!("{REALESRGAN_BASE}/realesrgan-x2.onnx"))
                .with_name("Real-ESRGAN x2")
                .with_description("General-purpose 2x restoration and upscaling")
                .with_category(General),
            ModelDescriptor::tensor_graph("realesrgan-x4", 4, format!("{REALESRGAN_BASE}/realesrgan-x4.onnx"))
                .with_name("Real-ESRGAN x4")
                .with_description("General-purpose 4x restoration and upscaling")
                .with_category(General),
        ];

        Self::new(models)
    }

    /// Marks every descriptor whose format has no runtime as unavailable
    pub fn with_capabilities(mut self, capabilities: &EngineCapabilities) -> Self {
        for model in &mut self.models {
            if !capabilities.supports(model.format) {
                model.available = false;
            }
        }
        self
    }

    pub fn resolve(&self, id: &str) -> UpscaleResult<&ModelDescriptor> {
        self.models
            .iter()
            .find(|m| m.id == id)
            .ok_or_else(|| UpscaleError::NotFound(id.to_string()))
    }

    pub fn iter(&self) -> impl Iterator<Item = &ModelDescriptor> {
        self.models.iter()
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_builtin_ids_are_unique() {
        let catalog = ModelCatalog::builtin();
        let ids: HashSet<_> = catalog.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids.len(), catalog.len());
        assert_eq!(catalog.len(), 14);
    }

    #[test]
    fn test_builtin_formats_match_backend() {
        for model in ModelCatalog::builtin().iter() {
            assert_eq!(model.backend_kind, model.format.backend_kind());
            assert!(model.scale >= 2);
            assert!(!model.urls.is_empty());
            match model.format {
                StorageFormat::ClassicalGraph => assert!(model.architecture.is_some()),
                StorageFormat::TensorGraph => assert!(model.architecture.is_none()),
            }
        }
    }

    #[test]
    fn test_resolve_unknown() {
        let catalog = ModelCatalog::builtin();
        let err = catalog.resolve("does-not-exist").unwrap_err();
        assert!(matches!(err, UpscaleError::NotFound(id) if id == "does-not-exist"));
    }

    #[test]
    fn test_file_name_uses_format_extension() {
        let catalog = ModelCatalog::builtin();
        assert_eq!(catalog.resolve("fsrcnn-x2").unwrap().file_name(), "fsrcnn-x2.pb");
        assert_eq!(
            catalog.resolve("realesrgan-x4").unwrap().file_name(),
            "realesrgan-x4.onnx"
        );
    }

    #[test]
    fn test_capabilities_mark_unavailable() {
        let caps = EngineCapabilities {
            classical: false,
            tensor_graph: true,
            available_providers: vec!["CPUExecutionProvider".into()],
        };
        let catalog = ModelCatalog::builtin().with_capabilities(&caps);
        assert!(!catalog.resolve("edsr-x4").unwrap().available);
        assert!(catalog.resolve("realesrgan-x2").unwrap().available);
    }
}
