//! Volume checkpoint format.
//!
//! Layout, all little-endian:
//!
//! ```text
//! magic    b"FVOX"
//! version  u32
//! dims     3 x u32
//! voxel_length, sdf_trunc   f32
//! volume_to_world           16 x f32, column-major
//! tsdf     N x f32
//! weight   N x u8
//! color    3N x i32
//! ```
//!
//! `N = dims.x * dims.y * dims.z`; every section length is validated
//! against `dims` on load.

use crate::IoError;
use fusor_math::Transform;
use fusor_volume::{VolumeParams, VolumeSnapshot};
use std::io::{Read, Write};

/// Format version written by [`save_checkpoint`].
pub const CHECKPOINT_VERSION: u32 = 1;

const MAGIC: [u8; 4] = *b"FVOX";

fn read_u32<R: Read>(r: &mut R) -> Result<u32, IoError> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

fn read_f32<R: Read>(r: &mut R) -> Result<f32, IoError> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf)?;
    Ok(f32::from_le_bytes(buf))
}

/// Persist a volume's parameters and voxel data.
pub fn save_checkpoint<W: Write>(
    mut w: W,
    params: &VolumeParams,
    snapshot: &VolumeSnapshot,
) -> Result<(), IoError> {
    let n = params.voxel_count();
    for (what, actual) in [
        ("tsdf", snapshot.tsdf.len()),
        ("weight", snapshot.weight.len()),
        ("color", snapshot.color.len()),
    ] {
        if actual != n {
            return Err(IoError::PayloadMismatch {
                what,
                expected: n,
                actual,
            });
        }
    }

    w.write_all(&MAGIC)?;
    w.write_all(&CHECKPOINT_VERSION.to_le_bytes())?;
    for d in params.dims {
        w.write_all(&(d as u32).to_le_bytes())?;
    }
    w.write_all(&params.voxel_length.to_le_bytes())?;
    w.write_all(&params.sdf_trunc.to_le_bytes())?;
    for value in params.volume_to_world.to_cols_array() {
        w.write_all(&value.to_le_bytes())?;
    }
    for value in &snapshot.tsdf {
        w.write_all(&value.to_le_bytes())?;
    }
    w.write_all(&snapshot.weight)?;
    for rgb in &snapshot.color {
        for channel in rgb {
            w.write_all(&channel.to_le_bytes())?;
        }
    }
    Ok(())
}

/// Load a checkpoint; the pair rebuilds a volume via
/// `TsdfVolume::from_parts`.
pub fn load_checkpoint<R: Read>(mut r: R) -> Result<(VolumeParams, VolumeSnapshot), IoError> {
    let mut magic = [0u8; 4];
    r.read_exact(&mut magic)?;
    if magic != MAGIC {
        return Err(IoError::BadMagic(magic));
    }
    let version = read_u32(&mut r)?;
    if version != CHECKPOINT_VERSION {
        return Err(IoError::UnsupportedVersion(version));
    }

    let dims = [
        read_u32(&mut r)? as usize,
        read_u32(&mut r)? as usize,
        read_u32(&mut r)? as usize,
    ];
    let voxel_length = read_f32(&mut r)?;
    let sdf_trunc = read_f32(&mut r)?;
    let mut cols = [0f32; 16];
    for slot in cols.iter_mut() {
        *slot = read_f32(&mut r)?;
    }
    let params = VolumeParams {
        dims,
        voxel_length,
        sdf_trunc,
        volume_to_world: Transform::from_cols_array(cols),
    };

    let n = params.voxel_count();
    let mut tsdf = Vec::with_capacity(n);
    for _ in 0..n {
        tsdf.push(read_f32(&mut r)?);
    }
    let mut weight = vec![0u8; n];
    r.read_exact(&mut weight)?;
    let mut color_bytes = vec![0u8; n * 3 * 4];
    r.read_exact(&mut color_bytes)?;
    let color = color_bytes
        .chunks_exact(12)
        .map(|c| {
            [
                i32::from_le_bytes([c[0], c[1], c[2], c[3]]),
                i32::from_le_bytes([c[4], c[5], c[6], c[7]]),
                i32::from_le_bytes([c[8], c[9], c[10], c[11]]),
            ]
        })
        .collect();

    Ok((
        params,
        VolumeSnapshot {
            tsdf,
            weight,
            color,
        },
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use fusor_math::Point3;
    use fusor_volume::TsdfVolume;
    use std::io::Cursor;

    fn sample_volume() -> TsdfVolume {
        let mut v = TsdfVolume::new(VolumeParams::anchored(
            [3, 4, 5],
            0.05,
            0.2,
            Point3::new(0.5, -0.5, 1.0),
        ))
        .unwrap();
        let mut snap = v.snapshot();
        snap.tsdf[7] = -0.33;
        snap.weight[7] = 21;
        snap.color[7] = [12, 200, 77];
        v.restore(&snap).unwrap();
        v
    }

    #[test]
    fn test_checkpoint_round_trip() {
        let v = sample_volume();
        let mut buf = Vec::new();
        save_checkpoint(&mut buf, &v.params(), &v.snapshot()).unwrap();

        let (params, snapshot) = load_checkpoint(Cursor::new(buf)).unwrap();
        assert_eq!(params, v.params());
        assert_eq!(snapshot, v.snapshot());

        let rebuilt = TsdfVolume::from_parts(params, &snapshot).unwrap();
        assert_eq!(rebuilt.snapshot(), v.snapshot());
    }

    #[test]
    fn test_bad_magic_rejected() {
        let err = load_checkpoint(Cursor::new(b"NOPE....".to_vec())).unwrap_err();
        assert!(matches!(err, IoError::BadMagic(_)));
    }

    #[test]
    fn test_unknown_version_rejected() {
        let v = sample_volume();
        let mut buf = Vec::new();
        save_checkpoint(&mut buf, &v.params(), &v.snapshot()).unwrap();
        buf[4..8].copy_from_slice(&99u32.to_le_bytes());
        let err = load_checkpoint(Cursor::new(buf)).unwrap_err();
        assert!(matches!(err, IoError::UnsupportedVersion(99)));
    }

    #[test]
    fn test_truncated_checkpoint_rejected() {
        let v = sample_volume();
        let mut buf = Vec::new();
        save_checkpoint(&mut buf, &v.params(), &v.snapshot()).unwrap();
        buf.truncate(buf.len() - 10);
        assert!(load_checkpoint(Cursor::new(buf)).is_err());
    }

    #[test]
    fn test_snapshot_length_validated_on_save() {
        let v = sample_volume();
        let mut snap = v.snapshot();
        snap.tsdf.pop();
        let err = save_checkpoint(Vec::new(), &v.params(), &snap).unwrap_err();
        assert!(matches!(
            err,
            IoError::PayloadMismatch { what: "tsdf", .. }
        ));
    }
}
