//! JSON session configuration for the fusion driver.

use anyhow::{Context, Result};
use fusor_math::{Point3, Transform};
use fusor_volume::{CameraIntrinsics, VolumeParams};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Grid placement and resolution.
#[derive(Debug, Deserialize)]
pub struct VolumeConfig {
    /// Voxel counts along each axis.
    pub dims: [usize; 3],
    /// Metric edge length of one voxel.
    pub voxel_length: f32,
    /// Metric truncation distance.
    pub sdf_trunc: f32,
    /// World position of the grid's origin corner.
    pub origin: [f32; 3],
}

impl VolumeConfig {
    pub fn params(&self) -> VolumeParams {
        VolumeParams::anchored(
            self.dims,
            self.voxel_length,
            self.sdf_trunc,
            Point3::new(self.origin[0], self.origin[1], self.origin[2]),
        )
    }
}

/// One recorded frame: a depth map dump plus the camera pose it was
/// captured under.
#[derive(Debug, Deserialize)]
pub struct FrameConfig {
    /// Path to a single-channel depth map in metres, relative to the
    /// config file.
    pub depth: PathBuf,
    /// Camera-to-world pose, 16 values column-major.
    pub pose: [f32; 16],
}

impl FrameConfig {
    pub fn pose(&self) -> Transform {
        Transform::from_cols_array(self.pose)
    }
}

/// A whole fusion session.
#[derive(Debug, Deserialize)]
pub struct SessionConfig {
    pub volume: VolumeConfig,
    pub camera: CameraIntrinsics,
    /// Metres per raw depth unit used when re-quantizing the recorded
    /// maps (e.g. 0.001 for millimetre precision).
    pub depth_scale: f32,
    pub frames: Vec<FrameConfig>,
}

impl SessionConfig {
    /// Load a session config; frame paths become relative to the
    /// config file's directory.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let mut config: SessionConfig = serde_json::from_str(&text)
            .with_context(|| format!("parsing config {}", path.display()))?;
        // serde bypasses the validating constructor; re-run it here.
        let c = &config.camera;
        CameraIntrinsics::new(c.fx, c.fy, c.cx, c.cy, c.width, c.height)
            .context("invalid camera intrinsics in config")?;
        if let Some(dir) = path.parent() {
            for frame in &mut config.frames {
                if frame.depth.is_relative() {
                    frame.depth = dir.join(&frame.depth);
                }
            }
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_session_config() {
        let text = r#"{
            "volume": {
                "dims": [64, 64, 64],
                "voxel_length": 0.03125,
                "sdf_trunc": 0.1,
                "origin": [-1.0, -1.0, 0.0]
            },
            "camera": {
                "fx": 525.0, "fy": 525.0,
                "cx": 319.5, "cy": 239.5,
                "width": 640, "height": 480
            },
            "depth_scale": 0.001,
            "frames": [
                { "depth": "frame_0000.bin",
                  "pose": [1,0,0,0, 0,1,0,0, 0,0,1,0, 0,0,0,1] }
            ]
        }"#;
        let config: SessionConfig = serde_json::from_str(text).unwrap();
        assert_eq!(config.volume.dims, [64, 64, 64]);
        assert_eq!(config.frames.len(), 1);
        let pose = config.frames[0].pose();
        assert_eq!(pose, Transform::identity());
    }
}
