#![warn(missing_docs)]

//! Binary persistence formats around the fusor engine.
//!
//! Two fixed little-endian layouts:
//!
//! - **Vertex/depth maps**: a `rows, cols, channels` `i32` header
//!   followed by `rows` scanlines of `channels * cols` `f32` values.
//!   Used for ray-cast debug dumps and for feeding recorded depth
//!   frames back into fusion.
//! - **Volume checkpoints**: grid parameters, the volume-to-world
//!   transform, and the three voxel sequences, restorable into a
//!   [`fusor_volume::TsdfVolume`].
//!
//! Both readers validate every length they can derive from the header
//! and fail loudly rather than truncating.

mod checkpoint;
mod vertex_map;

pub use checkpoint::{load_checkpoint, save_checkpoint, CHECKPOINT_VERSION};
pub use vertex_map::{
    read_channels, read_depth_map, write_channels, write_depth_map, write_vertex_map, ChannelMap,
};

use thiserror::Error;

/// Errors from reading or writing fusor binary formats.
#[derive(Debug, Error)]
pub enum IoError {
    /// Underlying I/O failure.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// The file does not start with the expected magic bytes.
    #[error("bad magic {0:?}, not a fusor checkpoint")]
    BadMagic([u8; 4]),

    /// The checkpoint was written by an unknown format version.
    #[error("unsupported checkpoint version {0}")]
    UnsupportedVersion(u32),

    /// A header field is out of range.
    #[error("invalid header: rows={rows}, cols={cols}, channels={channels}")]
    InvalidHeader {
        /// Row count from the header.
        rows: i32,
        /// Column count from the header.
        cols: i32,
        /// Channel count from the header.
        channels: i32,
    },

    /// A payload length disagrees with what the header promises.
    #[error("{what} holds {actual} elements, header promises {expected}")]
    PayloadMismatch {
        /// Which section mismatched.
        what: &'static str,
        /// Element count derived from the header.
        expected: usize,
        /// Element count actually present.
        actual: usize,
    },
}
