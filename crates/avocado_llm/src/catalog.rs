//! The built-in model catalog and resource-estimate helpers.
//!
//! The catalog itself is immutable static data: which models exist, where their GGUF
//! files live, and what they cost to run. Download/availability state changes at
//! runtime and lives in a separate [`ModelStatusMap`] keyed by model name, so catalog
//! lookups never observe half-updated entries.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::template::ChatTemplate;

/// Overhead factor added on top of raw weight memory for KV cache and scratch buffers.
const MEMORY_BUFFER_FACTOR: f64 = 1.2;

/// The reference point for CPU estimates: a 3B-parameter Q4_K_M model on six cores is
/// pegged at 90% utilization, and other models scale linearly from there.
const REFERENCE_SIZE_BILLIONS: f64 = 3.0;
const REFERENCE_CORES: f64 = 6.0;
const REFERENCE_CPU_TARGET: f64 = 90.0;

/// GGUF quantization schemes the catalog knows how to estimate.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Quantization {
    /// 3-bit importance-matrix quantization.
    Iq3Xs,
    /// 4-bit k-quant, small.
    Q4KS,
    /// 4-bit k-quant, medium.
    Q4KM,
    /// 5-bit k-quant, small.
    Q5KS,
    /// 5-bit k-quant, medium.
    Q5KM,
    /// 8-bit round-to-nearest.
    Q8_0,
}

impl Quantization {
    /// Average storage cost per weight.
    pub fn bits_per_parameter(&self) -> f64 {
        match self {
            Quantization::Iq3Xs => 3.0,
            Quantization::Q4KS | Quantization::Q4KM => 4.0,
            Quantization::Q5KS | Quantization::Q5KM => 5.0,
            Quantization::Q8_0 => 8.0,
        }
    }

    /// Efficiency factor used by the CPU estimate; tracks the bit width, and the
    /// estimate divides by it, so wider quantizations scale the figure down.
    pub fn computational_efficiency(&self) -> f64 {
        self.bits_per_parameter()
    }

    /// The scheme's conventional GGUF suffix.
    pub fn code(&self) -> &'static str {
        match self {
            Quantization::Iq3Xs => "IQ3_XS",
            Quantization::Q4KS => "Q4_K_S",
            Quantization::Q4KM => "Q4_K_M",
            Quantization::Q5KS => "Q5_K_S",
            Quantization::Q5KM => "Q5_K_M",
            Quantization::Q8_0 => "Q8_0",
        }
    }
}

impl fmt::Display for Quantization {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// One model the application can offer: identity, download source, and the template
/// its family expects.
#[derive(Clone, Copy, Debug)]
pub struct ModelSpec {
    /// Catalog key; also the GGUF filename stem.
    pub name: &'static str,

    /// Where to fetch the weights; `None` for models shipped inside the app bundle.
    pub url: Option<&'static str>,

    /// The on-disk GGUF filename.
    pub filename: &'static str,

    /// Parameter count in billions.
    pub size_billions: f64,

    /// Quantization of the published GGUF file.
    pub quantization: Quantization,

    /// Prompt format the model was trained on.
    pub template: ChatTemplate,

    /// Human-readable blurb shown in model pickers.
    pub description: &'static str,
}

impl ModelSpec {
    /// Estimated resident memory: raw weight bytes plus a fixed overhead factor for
    /// the KV cache and scratch buffers.
    pub fn bytes_in_memory(&self) -> f64 {
        let bytes_per_parameter = self.quantization.bits_per_parameter() / 8.0;
        self.size_billions * 1_000_000_000.0 * bytes_per_parameter * MEMORY_BUFFER_FACTOR
    }

    /// [`bytes_in_memory`][ModelSpec::bytes_in_memory] as a percentage of
    /// `device_bytes` of physical memory.
    pub fn memory_percentage(&self, device_bytes: u64) -> f64 {
        self.bytes_in_memory() / device_bytes as f64 * 100.0
    }

    /// Estimated CPU utilization percentage while decoding on `cpu_cores` cores.
    ///
    /// Scales the reference point linearly by parameter count, inversely by core
    /// count, and by quantization cost relative to Q4_K_M. Values above 100 mean the
    /// device cannot sustain real-time decoding.
    pub fn cpu_usage(&self, cpu_cores: usize) -> f64 {
        let reference_efficiency = Quantization::Q4KM.computational_efficiency();
        let scale = (self.size_billions / REFERENCE_SIZE_BILLIONS)
            * (REFERENCE_CORES / cpu_cores as f64)
            * (reference_efficiency / self.quantization.computational_efficiency());

        scale * REFERENCE_CPU_TARGET
    }
}

/// Every model the application offers, in presentation order. The first entry is the
/// bundled default.
static CATALOG: &[ModelSpec] = &[
    ModelSpec {
        name: "Llama-3.2-1B-Instruct-Q4_K_M",
        url: None,
        filename: "Llama-3.2-1B-Instruct-Q4_K_M.gguf",
        size_billions: 1.0,
        quantization: Quantization::Q4KM,
        template: ChatTemplate::Llama3,
        description: "Selected as the default model due to its optimal fit for most \
                      applications. Developed by Meta, this model is well-suited for \
                      general-purpose tasks, balancing accuracy and speed across all \
                      compatible devices.",
    },
    ModelSpec {
        name: "Llama-3.2-3B-Instruct-Q4_K_M",
        url: Some(
            "https://huggingface.co/bartowski/Llama-3.2-3B-Instruct-GGUF/resolve/main/Llama-3.2-3B-Instruct-Q4_K_M.gguf",
        ),
        filename: "Llama-3.2-3B-Instruct-Q4_K_M.gguf",
        size_billions: 3.0,
        quantization: Quantization::Q4KM,
        template: ChatTemplate::Llama3,
        description: "Larger model for applications needing higher accuracy. Created \
                      by Meta, it is ideal for more complex tasks, maintaining \
                      compatibility with all devices.",
    },
    ModelSpec {
        name: "gemma-2-2b-it-Q4_K_M",
        url: Some(
            "https://huggingface.co/bartowski/gemma-2-2b-it-GGUF/resolve/main/gemma-2-2b-it-Q4_K_M.gguf",
        ),
        filename: "gemma-2-2b-it-Q4_K_M.gguf",
        size_billions: 2.0,
        quantization: Quantization::Q4KM,
        template: ChatTemplate::Gemma,
        description: "Previously the default model. Developed by Google, this model \
                      is compatible with all devices and suitable for standard \
                      applications requiring reliable performance.",
    },
    ModelSpec {
        name: "qwen2.5-1.5b-instruct-q4_k_m",
        url: Some(
            "https://huggingface.co/Qwen/Qwen2.5-1.5B-Instruct-GGUF/resolve/main/qwen2.5-1.5b-instruct-q4_k_m.gguf",
        ),
        filename: "qwen2.5-1.5b-instruct-q4_k_m.gguf",
        size_billions: 1.5,
        quantization: Quantization::Q4KM,
        template: ChatTemplate::ChatMl,
        description: "Compact model by Alibaba for applications where speed is \
                      prioritized over precision. Compatible with all devices and \
                      suitable for basic tasks.",
    },
    ModelSpec {
        name: "qwen2.5-coder-1.5b-instruct-q4_k_m",
        url: Some(
            "https://huggingface.co/Qwen/Qwen2.5-Coder-1.5B-Instruct-GGUF/resolve/main/qwen2.5-coder-1.5b-instruct-q4_k_m.gguf",
        ),
        filename: "qwen2.5-coder-1.5b-instruct-q4_k_m.gguf",
        size_billions: 1.5,
        quantization: Quantization::Q4KM,
        template: ChatTemplate::ChatMl,
        description: "Model optimized for coding applications by Alibaba, for \
                      efficient, device-compatible coding tasks with moderate \
                      precision.",
    },
    ModelSpec {
        name: "Meta-Llama-3.1-8B-Instruct-IQ3_XS",
        url: Some(
            "https://huggingface.co/bartowski/Meta-Llama-3.1-8B-Instruct-GGUF/resolve/main/Meta-Llama-3.1-8B-Instruct-IQ3_XS.gguf",
        ),
        filename: "Meta-Llama-3.1-8B-Instruct-IQ3_XS.gguf",
        size_billions: 8.0,
        quantization: Quantization::Iq3Xs,
        template: ChatTemplate::Llama3,
        description: "High-performance model for applications demanding advanced \
                      accuracy and complexity. Created by Meta, this model is ideal \
                      for intensive tasks and compatible across multiple devices.",
    },
    ModelSpec {
        name: "smollm2-1.7b-instruct-q4_k_m",
        url: Some(
            "https://huggingface.co/HuggingFaceTB/SmolLM2-1.7B-Instruct-GGUF/resolve/main/smollm2-1.7b-instruct-q4_k_m.gguf",
        ),
        filename: "smollm2-1.7b-instruct-q4_k_m.gguf",
        size_billions: 1.7,
        quantization: Quantization::Q4KM,
        template: ChatTemplate::ChatMl,
        description: "SmolLM2-1.7B optimized for instruction following with a \
                      quantized Q4_K_M precision. Designed for efficient usage on \
                      edge devices, balancing model performance and resource \
                      constraints.",
    },
    ModelSpec {
        name: "smollm2-360m-instruct-q8_0",
        url: Some(
            "https://huggingface.co/HuggingFaceTB/SmolLM2-360M-Instruct-GGUF/resolve/main/smollm2-360m-instruct-q8_0.gguf",
        ),
        filename: "smollm2-360m-instruct-q8_0.gguf",
        size_billions: 0.36,
        quantization: Quantization::Q8_0,
        template: ChatTemplate::ChatMl,
        description: "SmolLM2-360M optimized for instruction following with \
                      quantized Q8_0 precision. Ideal for lightweight deployment on \
                      edge devices with limited resources, maintaining efficient \
                      performance.",
    },
    ModelSpec {
        name: "granite-3.0-2b-instruct-Q4_K_M",
        url: Some(
            "https://huggingface.co/lmstudio-community/granite-3.0-2b-instruct-GGUF/resolve/main/granite-3.0-2b-instruct-Q4_K_M.gguf",
        ),
        filename: "granite-3.0-2b-instruct-Q4_K_M.gguf",
        size_billions: 2.0,
        quantization: Quantization::Q4KM,
        template: ChatTemplate::Granite,
        description: "Granite 3.0 by IBM, a 2B parameter model optimized for \
                      instruction-following tasks with Q4_K_M quantization, providing \
                      efficient performance for high-quality responses on edge \
                      devices.",
    },
    ModelSpec {
        name: "granite-3.0-3b-a800m-instruct-Q4_K_M",
        url: Some(
            "https://huggingface.co/lmstudio-community/granite-3.0-3b-a800m-instruct-GGUF/resolve/main/granite-3.0-3b-a800m-instruct-Q4_K_M.gguf",
        ),
        filename: "granite-3.0-3b-a800m-instruct-Q4_K_M.gguf",
        size_billions: 3.0,
        quantization: Quantization::Q4KM,
        template: ChatTemplate::Granite,
        description: "Granite 3.0 by IBM, a 3B parameter model with A800M \
                      optimization for instruction-following tasks, quantized with \
                      Q4_K_M for efficient inference on edge devices.",
    },
];

/// All known models, in presentation order.
pub fn catalog() -> &'static [ModelSpec] {
    CATALOG
}

/// Looks up a model by its catalog name.
pub fn find(name: &str) -> Option<&'static ModelSpec> {
    CATALOG.iter().find(|spec| spec.name == name)
}

/// Whether a model's weights are present on this device.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AvailabilityStatus {
    /// Not on disk; can be fetched from its URL.
    Download,

    /// A fetch is in flight.
    Downloading,

    /// Weights are on disk and ready to load.
    Downloaded,
}

/// Mutable per-model availability, kept apart from the static catalog.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ModelStatusMap(HashMap<String, AvailabilityStatus>);

impl ModelStatusMap {
    /// An empty map; every model reports [`AvailabilityStatus::Download`].
    pub fn new() -> Self {
        Self::default()
    }

    /// The recorded status for `name`, defaulting to needing a download.
    pub fn status(&self, name: &str) -> AvailabilityStatus {
        self.0
            .get(name)
            .copied()
            .unwrap_or(AvailabilityStatus::Download)
    }

    /// Records a status change for `name`.
    pub fn set_status(&mut self, name: impl Into<String>, status: AvailabilityStatus) {
        self.0.insert(name.into(), status);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalog_is_stable_and_named_uniquely() {
        let names: Vec<_> = catalog().iter().map(|spec| spec.name).collect();
        let mut deduped = names.clone();
        deduped.sort_unstable();
        deduped.dedup();

        assert_eq!(names.len(), 10);
        assert_eq!(deduped.len(), names.len());

        // Only the bundled default ships without a download URL.
        assert!(catalog()[0].url.is_none());
        assert!(catalog()[1..].iter().all(|spec| spec.url.is_some()));
    }

    #[test]
    fn find_matches_exact_names() {
        let spec = find("gemma-2-2b-it-Q4_K_M").unwrap();
        assert_eq!(spec.template, ChatTemplate::Gemma);
        assert_eq!(spec.quantization, Quantization::Q4KM);

        assert!(find("gemma-2-2b-it-q4_k_m").is_none());
    }

    #[test]
    fn memory_estimate_for_a_q4_model() {
        let spec = find("Llama-3.2-1B-Instruct-Q4_K_M").unwrap();

        // One billion 4-bit weights plus 20% overhead.
        assert!((spec.bytes_in_memory() - 600_000_000.0).abs() < 1.0);

        let pct = spec.memory_percentage(6_000_000_000);
        assert!((pct - 10.0).abs() < 1e-6);
    }

    #[test]
    fn reference_model_pegs_the_cpu_scale() {
        let spec = find("Llama-3.2-3B-Instruct-Q4_K_M").unwrap();
        assert!((spec.cpu_usage(6) - 90.0).abs() < 1e-6);

        // Twice the cores, half the load.
        assert!((spec.cpu_usage(12) - 45.0).abs() < 1e-6);
    }

    #[test]
    fn cpu_estimate_scales_inversely_with_quantization_width() {
        let base = *find("Llama-3.2-3B-Instruct-Q4_K_M").unwrap();
        let q8 = ModelSpec {
            quantization: Quantization::Q8_0,
            ..base
        };
        let iq3 = ModelSpec {
            quantization: Quantization::Iq3Xs,
            ..base
        };

        // The estimate divides by the efficiency factor: 3-bit scales 4/3 up from the
        // Q4_K_M reference, 8-bit scales 4/8 down.
        assert!((iq3.cpu_usage(6) - 120.0).abs() < 1e-6);
        assert!((q8.cpu_usage(6) - 45.0).abs() < 1e-6);
        assert!(iq3.cpu_usage(6) > base.cpu_usage(6));
        assert!(base.cpu_usage(6) > q8.cpu_usage(6));
    }

    #[test]
    fn status_map_defaults_to_download() {
        let mut statuses = ModelStatusMap::new();
        assert_eq!(statuses.status("anything"), AvailabilityStatus::Download);

        statuses.set_status("anything", AvailabilityStatus::Downloading);
        assert_eq!(statuses.status("anything"), AvailabilityStatus::Downloading);

        statuses.set_status("anything", AvailabilityStatus::Downloaded);
        assert_eq!(statuses.status("anything"), AvailabilityStatus::Downloaded);

        // Unrelated entries are untouched.
        assert_eq!(statuses.status("other"), AvailabilityStatus::Download);
    }
}
