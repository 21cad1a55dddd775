use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use veriface_core::types::{DEFAULT_DETECTION_THRESHOLD, DEFAULT_VERIFICATION_THRESHOLD};
use veriface_core::Thresholds;
use veriface_hw::CropRegion;

/// Config file picked up from the working directory when no other is given.
pub const DEFAULT_CONFIG_FILE: &str = "veriface.toml";

/// Runtime configuration.
///
/// Built from defaults, then an optional TOML file, then `VERIFACE_*`
/// environment variables.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// V4L2 device path (default: /dev/video0).
    pub camera_device: String,
    /// Requested capture resolution; the driver may choose another.
    pub capture_width: u32,
    pub capture_height: u32,
    /// Number of frames to discard after opening the camera (auto-exposure settling).
    pub warmup_frames: usize,
    /// Frames to try before giving up on finding one that is not dark.
    pub max_capture_attempts: usize,
    /// Root of the input image and reference directories.
    pub data_dir: PathBuf,
    /// Live capture file, overwritten on every verification.
    /// Defaults to `<data_dir>/input_image/input_image.jpg`.
    pub input_image: Option<PathBuf>,
    /// Reference images. Defaults to `<data_dir>/verification_images`.
    pub verification_dir: Option<PathBuf>,
    /// Siamese network exported to ONNX.
    pub model_path: PathBuf,
    /// ONNX Runtime intra-op threads.
    pub intra_threads: usize,
    /// Per-pair score cutoff.
    pub detection_threshold: f32,
    /// Fraction of matching references required.
    pub verification_threshold: f32,
    /// Preview tick interval for `watch`.
    pub refresh_interval_ms: u64,
    /// Square region of the frame used for verification. Defaults to the
    /// largest centred square.
    pub crop: Option<CropRegion>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            camera_device: "/dev/video0".to_string(),
            capture_width: 1280,
            capture_height: 720,
            warmup_frames: 4,
            max_capture_attempts: 10,
            data_dir: PathBuf::from("application_data"),
            input_image: None,
            verification_dir: None,
            model_path: PathBuf::from("siamesemodel.onnx"),
            intra_threads: 2,
            detection_threshold: DEFAULT_DETECTION_THRESHOLD,
            verification_threshold: DEFAULT_VERIFICATION_THRESHOLD,
            refresh_interval_ms: 30,
            crop: None,
        }
    }
}

impl Config {
    /// Resolve the config file, apply environment overrides and validate.
    ///
    /// File lookup order: `explicit`, `$VERIFACE_CONFIG`, `./veriface.toml`.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        Self::load_with(explicit, |key| std::env::var(key).ok())
    }

    /// [`Config::load`] with environment variables read through `lookup`.
    pub fn load_with(
        explicit: Option<&Path>,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        let file = explicit
            .map(Path::to_path_buf)
            .or_else(|| lookup("VERIFACE_CONFIG").map(PathBuf::from))
            .or_else(|| {
                let default = PathBuf::from(DEFAULT_CONFIG_FILE);
                default.exists().then_some(default)
            });

        let mut config = match file {
            Some(path) => {
                tracing::debug!(path = %path.display(), "loading config file");
                let contents = std::fs::read_to_string(&path)
                    .with_context(|| format!("reading config file {}", path.display()))?;
                Self::from_toml_str(&contents)
                    .with_context(|| format!("parsing config file {}", path.display()))?
            }
            None => Self::default(),
        };

        config.apply_env(&lookup);
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self> {
        Ok(toml::from_str(contents)?)
    }

    /// Override fields from `VERIFACE_*` variables, looked up through `lookup`.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("VERIFACE_CAMERA_DEVICE") {
            self.camera_device = v;
        }
        if let Some(v) = lookup("VERIFACE_DATA_DIR") {
            self.data_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("VERIFACE_INPUT_IMAGE") {
            self.input_image = Some(PathBuf::from(v));
        }
        if let Some(v) = lookup("VERIFACE_VERIFICATION_DIR") {
            self.verification_dir = Some(PathBuf::from(v));
        }
        if let Some(v) = lookup("VERIFACE_MODEL_PATH") {
            self.model_path = PathBuf::from(v);
        }
        env_parse(&lookup, "VERIFACE_CAPTURE_WIDTH", &mut self.capture_width);
        env_parse(&lookup, "VERIFACE_CAPTURE_HEIGHT", &mut self.capture_height);
        env_parse(&lookup, "VERIFACE_WARMUP_FRAMES", &mut self.warmup_frames);
        env_parse(&lookup, "VERIFACE_MAX_CAPTURE_ATTEMPTS", &mut self.max_capture_attempts);
        env_parse(&lookup, "VERIFACE_INTRA_THREADS", &mut self.intra_threads);
        env_parse(&lookup, "VERIFACE_DETECTION_THRESHOLD", &mut self.detection_threshold);
        env_parse(&lookup, "VERIFACE_VERIFICATION_THRESHOLD", &mut self.verification_threshold);
        env_parse(&lookup, "VERIFACE_REFRESH_INTERVAL_MS", &mut self.refresh_interval_ms);
    }

    pub fn validate(&self) -> Result<()> {
        self.thresholds()?;
        if self.capture_width == 0 || self.capture_height == 0 {
            bail!(
                "capture resolution must be non-zero, got {}x{}",
                self.capture_width,
                self.capture_height
            );
        }
        if self.max_capture_attempts == 0 {
            bail!("max_capture_attempts must be at least 1");
        }
        if self.intra_threads == 0 {
            bail!("intra_threads must be at least 1");
        }
        if self.refresh_interval_ms == 0 {
            bail!("refresh_interval_ms must be at least 1");
        }
        if let Some(crop) = self.crop {
            if crop.size == 0 {
                bail!("crop.size must be non-zero");
            }
        }
        Ok(())
    }

    pub fn thresholds(&self) -> Result<Thresholds> {
        Ok(Thresholds::new(
            self.detection_threshold,
            self.verification_threshold,
        )?)
    }

    pub fn input_image_path(&self) -> PathBuf {
        self.input_image
            .clone()
            .unwrap_or_else(|| self.data_dir.join("input_image").join("input_image.jpg"))
    }

    pub fn verification_dir_path(&self) -> PathBuf {
        self.verification_dir
            .clone()
            .unwrap_or_else(|| self.data_dir.join("verification_images"))
    }

    pub fn model_path_str(&self) -> String {
        self.model_path.to_string_lossy().into_owned()
    }
}

fn env_parse<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, target: &mut T) {
    let Some(raw) = lookup(key) else {
        return;
    };
    match raw.parse() {
        Ok(value) => *target = value,
        Err(_) => tracing::warn!(key, value = %raw, "ignoring unparsable environment override"),
    }
}
