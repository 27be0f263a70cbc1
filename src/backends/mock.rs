//! Deterministic in-process backend
//!
//! Segments by colour distance to the top-left pixel, which works for any
//! subject photographed on a plain background. Used by tests and benches so
//! the full pipeline can run without a model file.

use crate::{
    config::RemovalConfig,
    error::{BgRemovalError, Result},
    inference::InferenceBackend,
    models::{ModelInfo, PreprocessingConfig},
};
use instant::Duration;
use ndarray::{Array4, Axis};
use std::sync::{Arc, Mutex};

/// Distance in normalised units above which a pixel counts as foreground
pub const DEFAULT_THRESHOLD: f32 = 0.5;

/// Mock backend for testing
#[derive(Debug, Clone)]
pub struct MockBackend {
    initialized: bool,
    model_info: ModelInfo,
    preprocessing_config: PreprocessingConfig,
    threshold: f32,
    /// Fixed `(height, width)` output, sampled nearest-neighbour from the input
    fixed_output: Option<(usize, usize)>,
    call_history: Arc<Mutex<Vec<String>>>,
    should_fail_init: bool,
    should_fail_inference: bool,
}

impl MockBackend {
    #[must_use]
    pub fn new() -> Self {
        Self {
            initialized: false,
            model_info: ModelInfo {
                name: "mock-contrast".to_string(),
                precision: "fp32".to_string(),
                size_bytes: 0,
                input_shape: (1, 3, 384, 384),
                output_shape: (1, 1, 384, 384),
            },
            preprocessing_config: PreprocessingConfig::imagenet(384),
            threshold: DEFAULT_THRESHOLD,
            fixed_output: None,
            call_history: Arc::new(Mutex::new(Vec::new())),
            should_fail_init: false,
            should_fail_inference: false,
        }
    }

    /// A backend whose `initialize` always fails
    #[must_use]
    pub fn new_failing_init() -> Self {
        Self {
            should_fail_init: true,
            ..Self::new()
        }
    }

    /// A backend whose `infer` always fails
    #[must_use]
    pub fn new_failing_inference() -> Self {
        Self {
            should_fail_inference: true,
            ..Self::new()
        }
    }

    /// Emit masks at a fixed resolution regardless of input size
    #[must_use]
    pub fn with_fixed_output(mut self, height: usize, width: usize) -> Self {
        self.fixed_output = Some((height.max(1), width.max(1)));
        self.model_info.output_shape = (1, 1, height.max(1), width.max(1));
        self
    }

    #[must_use]
    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.threshold = threshold;
        self
    }

    #[must_use]
    pub fn with_preprocessing_config(mut self, config: PreprocessingConfig) -> Self {
        let [height, width] = config.target_size;
        self.model_info.input_shape = (1, 3, height as usize, width as usize);
        self.preprocessing_config = config;
        self
    }

    /// Shared handle to the recorded method calls
    #[must_use]
    pub fn call_history(&self) -> Arc<Mutex<Vec<String>>> {
        Arc::clone(&self.call_history)
    }

    fn record_call(&self, method: &str) {
        if let Ok(mut history) = self.call_history.lock() {
            history.push(method.to_string());
        }
    }

    #[allow(clippy::indexing_slicing)]
    // Safe: every index is bounded by the input shape checked in `infer`
    fn segment(&self, input: &Array4<f32>) -> Array4<f32> {
        let (batch, _, in_h, in_w) = input.dim();
        let (out_h, out_w) = self.fixed_output.unwrap_or((in_h, in_w));
        let mut output = Array4::<f32>::zeros((batch, 1, out_h, out_w));

        for (b, image) in input.axis_iter(Axis(0)).enumerate() {
            let reference = [image[[0, 0, 0]], image[[1, 0, 0]], image[[2, 0, 0]]];
            for y in 0..out_h {
                let src_y = y * in_h / out_h;
                for x in 0..out_w {
                    let src_x = x * in_w / out_w;
                    let distance = (0..3)
                        .map(|c| (image[[c, src_y, src_x]] - reference[c]).powi(2))
                        .sum::<f32>()
                        .sqrt();
                    if distance > self.threshold {
                        output[[b, 0, y, x]] = 1.0;
                    }
                }
            }
        }

        output
    }
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl InferenceBackend for MockBackend {
    fn initialize(&mut self, _config: &RemovalConfig) -> Result<Option<Duration>> {
        self.record_call("initialize");

        if self.should_fail_init {
            return Err(BgRemovalError::model("Mock backend initialization failed"));
        }
        if self.initialized {
            return Ok(None);
        }

        self.initialized = true;
        Ok(Some(Duration::from_millis(0)))
    }

    fn infer(&mut self, input: &Array4<f32>) -> Result<Array4<f32>> {
        self.record_call("infer");

        if !self.initialized {
            return Err(BgRemovalError::inference("Mock backend not initialized"));
        }
        if self.should_fail_inference {
            return Err(BgRemovalError::inference("Mock backend inference failed"));
        }

        let (batch, channels, height, width) = input.dim();
        if batch == 0 || channels != 3 || height == 0 || width == 0 {
            return Err(BgRemovalError::inference(format!(
                "Expected Nx3xHxW input, got {:?}",
                input.shape()
            )));
        }

        Ok(self.segment(input))
    }

    fn get_preprocessing_config(&self) -> Result<PreprocessingConfig> {
        Ok(self.preprocessing_config.clone())
    }

    fn get_model_info(&self) -> Result<ModelInfo> {
        Ok(self.model_info.clone())
    }

    fn is_initialized(&self) -> bool {
        self.initialized
    }
}
