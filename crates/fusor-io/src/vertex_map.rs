//! The 3-int-header float-scanline map format.
//!
//! Layout: `rows: i32, cols: i32, channels: i32` followed by
//! `rows * cols * channels` little-endian `f32`, row by row.

use crate::IoError;
use fusor_volume::Image2;
use std::io::{Read, Write};

/// A decoded map: header plus the flat row-major float payload.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelMap {
    /// Number of rows (image height).
    pub rows: usize,
    /// Number of columns (image width).
    pub cols: usize,
    /// Values per pixel.
    pub channels: usize,
    /// `rows * cols * channels` floats, row-major, channels interleaved.
    pub data: Vec<f32>,
}

/// Write a flat channel map.
pub fn write_channels<W: Write>(
    mut w: W,
    rows: usize,
    cols: usize,
    channels: usize,
    data: &[f32],
) -> Result<(), IoError> {
    let expected = rows * cols * channels;
    if data.len() != expected {
        return Err(IoError::PayloadMismatch {
            what: "channel data",
            expected,
            actual: data.len(),
        });
    }
    for dim in [rows, cols, channels] {
        w.write_all(&(dim as i32).to_le_bytes())?;
    }
    for value in data {
        w.write_all(&value.to_le_bytes())?;
    }
    Ok(())
}

/// Read a flat channel map, validating the header and payload length.
pub fn read_channels<R: Read>(mut r: R) -> Result<ChannelMap, IoError> {
    let mut header = [0i32; 3];
    for slot in header.iter_mut() {
        let mut buf = [0u8; 4];
        r.read_exact(&mut buf)?;
        *slot = i32::from_le_bytes(buf);
    }
    let [rows, cols, channels] = header;
    if rows < 0 || cols < 0 || channels <= 0 {
        return Err(IoError::InvalidHeader {
            rows,
            cols,
            channels,
        });
    }
    let count = rows as usize * cols as usize * channels as usize;
    let mut bytes = vec![0u8; count * 4];
    r.read_exact(&mut bytes)?;
    let data = bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect();
    Ok(ChannelMap {
        rows: rows as usize,
        cols: cols as usize,
        channels: channels as usize,
        data,
    })
}

/// Write a 3-channel vertex map (e.g. ray-cast output with NaN misses).
pub fn write_vertex_map<W: Write>(w: W, map: &Image2<[f32; 3]>) -> Result<(), IoError> {
    let mut flat = Vec::with_capacity(map.width() * map.height() * 3);
    for px in map.as_slice() {
        flat.extend_from_slice(px);
    }
    write_channels(w, map.height(), map.width(), 3, &flat)
}

/// Write a single-channel depth map in metres.
pub fn write_depth_map<W: Write>(w: W, map: &Image2<f32>) -> Result<(), IoError> {
    write_channels(w, map.height(), map.width(), 1, map.as_slice())
}

/// Read a single-channel depth map in metres.
pub fn read_depth_map<R: Read>(r: R) -> Result<Image2<f32>, IoError> {
    let map = read_channels(r)?;
    if map.channels != 1 {
        return Err(IoError::PayloadMismatch {
            what: "depth channels",
            expected: 1,
            actual: map.channels,
        });
    }
    Image2::from_vec(map.cols, map.rows, map.data).ok_or(IoError::InvalidHeader {
        rows: map.rows as i32,
        cols: map.cols as i32,
        channels: 1,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_channels_round_trip() {
        let data: Vec<f32> = (0..24).map(|i| i as f32 * 0.5).collect();
        let mut buf = Vec::new();
        write_channels(&mut buf, 2, 4, 3, &data).unwrap();
        // 3 ints + 24 floats.
        assert_eq!(buf.len(), 12 + 24 * 4);
        let back = read_channels(Cursor::new(buf)).unwrap();
        assert_eq!(back.rows, 2);
        assert_eq!(back.cols, 4);
        assert_eq!(back.channels, 3);
        assert_eq!(back.data, data);
    }

    #[test]
    fn test_payload_length_validated_on_write() {
        let err = write_channels(Vec::new(), 2, 4, 3, &[0.0; 5]).unwrap_err();
        assert!(matches!(err, IoError::PayloadMismatch { .. }));
    }

    #[test]
    fn test_truncated_payload_rejected() {
        let mut buf = Vec::new();
        write_channels(&mut buf, 2, 2, 1, &[1.0, 2.0, 3.0, 4.0]).unwrap();
        buf.truncate(buf.len() - 3);
        assert!(read_channels(Cursor::new(buf)).is_err());
    }

    #[test]
    fn test_negative_header_rejected() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&(-1i32).to_le_bytes());
        buf.extend_from_slice(&4i32.to_le_bytes());
        buf.extend_from_slice(&1i32.to_le_bytes());
        let err = read_channels(Cursor::new(buf)).unwrap_err();
        assert!(matches!(err, IoError::InvalidHeader { .. }));
    }

    #[test]
    fn test_vertex_map_round_trip_with_nan() {
        let mut img = Image2::new(3, 2, [0.0f32; 3]);
        img.set(1, 0, [1.0, 2.0, 3.0]);
        img.set(2, 1, [f32::NAN; 3]);
        let mut buf = Vec::new();
        write_vertex_map(&mut buf, &img).unwrap();
        let back = read_channels(Cursor::new(buf)).unwrap();
        assert_eq!(back.channels, 3);
        assert_eq!(back.data[3..6], [1.0, 2.0, 3.0]);
        assert!(back.data[5 * 3].is_nan());
    }

    #[test]
    fn test_depth_map_round_trip() {
        let mut img = Image2::new(4, 3, 0.0f32);
        img.set(2, 1, 1.25);
        let mut buf = Vec::new();
        write_depth_map(&mut buf, &img).unwrap();
        let back = read_depth_map(Cursor::new(buf)).unwrap();
        assert_eq!(back, img);
    }
}
