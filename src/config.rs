//! Startup configuration.
//!
//! Three layers, lowest precedence first:
//! 1. Built-in defaults (`csi://0`, 640x480 @ 30 fps).
//! 2. Command-line flags.
//! 3. Structured parameter source: a JSON file named by `CAMERAD_CONFIG`,
//!    plus `CAMERAD_DEVICE` / `CAMERAD_WIDTH` / `CAMERAD_HEIGHT` /
//!    `CAMERAD_FRAMERATE` environment variables.
//!
//! The parameter source is authoritative: when it supplies a value it wins,
//! and command-line flags only override the built-in defaults.

use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::Path;

pub const DEFAULT_DEVICE: &str = "csi://0";
pub const DEFAULT_WIDTH: u32 = 640;
pub const DEFAULT_HEIGHT: u32 = 480;
pub const DEFAULT_FRAMERATE: f64 = 30.0;

/// Immutable capture configuration.
///
/// Fixed once the capture source is opened; changing it requires closing and
/// reopening the source. The 180° mount-correction rotation and the input
/// capture direction are not options, the backends apply them unconditionally.
#[derive(Clone, Debug, PartialEq)]
pub struct CaptureConfig {
    /// Device resource (e.g. `csi://0`, `/dev/video0`, `stub://bench`).
    pub resource: String,
    /// Requested capture width.
    pub width: u32,
    /// Requested capture height.
    pub height: u32,
    /// Requested frame rate. The device may negotiate a different one.
    pub framerate: f64,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            resource: DEFAULT_DEVICE.to_string(),
            width: DEFAULT_WIDTH,
            height: DEFAULT_HEIGHT,
            framerate: DEFAULT_FRAMERATE,
        }
    }
}

/// Values supplied on the command line. `None` means "flag not given".
#[derive(Clone, Debug, Default)]
pub struct CliOverrides {
    pub device: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub framerate: Option<f64>,
}

/// Values supplied by the structured parameter source (file and environment).
#[derive(Debug, Default, Deserialize)]
pub struct ParamSource {
    pub device: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub framerate: Option<f64>,
}

impl CaptureConfig {
    /// Load the effective configuration: defaults, CLI, then the parameter
    /// source on top.
    pub fn load(cli: CliOverrides) -> Result<Self> {
        let mut params = match std::env::var("CAMERAD_CONFIG").ok() {
            Some(path) => read_param_file(Path::new(&path))?,
            None => ParamSource::default(),
        };
        apply_env(&mut params)?;

        let config = Self::resolve(cli, params);
        config.validate()?;
        Ok(config)
    }

    /// Pure precedence resolution, separated from I/O so it can be tested.
    pub fn resolve(cli: CliOverrides, params: ParamSource) -> Self {
        Self {
            resource: params
                .device
                .or(cli.device)
                .unwrap_or_else(|| DEFAULT_DEVICE.to_string()),
            width: params.width.or(cli.width).unwrap_or(DEFAULT_WIDTH),
            height: params.height.or(cli.height).unwrap_or(DEFAULT_HEIGHT),
            framerate: params
                .framerate
                .or(cli.framerate)
                .unwrap_or(DEFAULT_FRAMERATE),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.resource.trim().is_empty() {
            return Err(anyhow!("capture device must not be empty"));
        }
        if self.width == 0 || self.height == 0 {
            return Err(anyhow!(
                "capture geometry must be non-zero, got {}x{}",
                self.width,
                self.height
            ));
        }
        if !self.framerate.is_finite() || self.framerate <= 0.0 {
            return Err(anyhow!(
                "framerate must be a positive number, got {}",
                self.framerate
            ));
        }
        Ok(())
    }
}

fn read_param_file(path: &Path) -> Result<ParamSource> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let params = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(params)
}

fn apply_env(params: &mut ParamSource) -> Result<()> {
    if let Ok(device) = std::env::var("CAMERAD_DEVICE") {
        if !device.trim().is_empty() {
            params.device = Some(device);
        }
    }
    if let Ok(width) = std::env::var("CAMERAD_WIDTH") {
        params.width = Some(
            width
                .parse()
                .map_err(|_| anyhow!("CAMERAD_WIDTH must be an integer"))?,
        );
    }
    if let Ok(height) = std::env::var("CAMERAD_HEIGHT") {
        params.height = Some(
            height
                .parse()
                .map_err(|_| anyhow!("CAMERAD_HEIGHT must be an integer"))?,
        );
    }
    if let Ok(framerate) = std::env::var("CAMERAD_FRAMERATE") {
        params.framerate = Some(
            framerate
                .parse()
                .map_err(|_| anyhow!("CAMERAD_FRAMERATE must be a number"))?,
        );
    }
    Ok(())
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
