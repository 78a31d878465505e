// Normalizes a captured plane into tightly packed rows
//
// Display drivers commonly pad each row to an alignment boundary, so the
// row stride of a plane can exceed width * pixel_stride. Frames leave this
// module with those padding bytes removed.

use crate::error::CaptureError;
use crate::platform::Plane;

/// Checks that `plane` holds a full `width` x `height` image
///
/// The final row only needs `width * pixel_stride` bytes; platforms often
/// omit the trailing padding of the last row.
pub fn check_plane(plane: &Plane<'_>, width: usize, height: usize) -> Result<(), CaptureError> {
    if width == 0 || height == 0 {
        return Err(CaptureError::ImageAcquisitionTransient(format!(
            "image has a zero dimension ({}x{})",
            width, height
        )));
    }

    if plane.pixel_stride == 0 {
        return Err(CaptureError::ImageAcquisitionTransient(
            "pixel stride is zero".to_string(),
        ));
    }

    let row_bytes = width
        .checked_mul(plane.pixel_stride)
        .ok_or_else(|| overflow(width, height))?;
    if plane.row_stride < row_bytes {
        return Err(CaptureError::ImageAcquisitionTransient(format!(
            "row stride {} smaller than row bytes {}",
            plane.row_stride, row_bytes
        )));
    }

    let required = (height - 1)
        .checked_mul(plane.row_stride)
        .and_then(|n| n.checked_add(row_bytes))
        .ok_or_else(|| overflow(width, height))?;
    if plane.data.len() < required {
        return Err(CaptureError::ImageAcquisitionTransient(format!(
            "plane holds {} bytes, {} required",
            plane.data.len(),
            required
        )));
    }

    Ok(())
}

fn overflow(width: usize, height: usize) -> CaptureError {
    CaptureError::ImageAcquisitionTransient(format!(
        "plane size for {}x{} overflows",
        width, height
    ))
}

/// Copies `plane` into a buffer of exactly `width * height * pixel_stride` bytes
///
/// Callers must run [`check_plane`] first.
pub fn repack(plane: &Plane<'_>, width: usize, height: usize) -> Vec<u8> {
    let row_bytes = width * plane.pixel_stride;
    let packed_len = row_bytes * height;

    if plane.row_stride == row_bytes {
        return plane.data[..packed_len].to_vec();
    }

    let mut packed = Vec::with_capacity(packed_len);
    for row in plane.data.chunks(plane.row_stride).take(height) {
        packed.extend_from_slice(&row[..row_bytes]);
    }
    packed
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Inserts `padding` filler bytes after every row of a packed buffer
    fn pad_rows(packed: &[u8], row_bytes: usize, padding: usize) -> Vec<u8> {
        let mut padded = Vec::new();
        for row in packed.chunks(row_bytes) {
            padded.extend_from_slice(row);
            padded.extend(std::iter::repeat(0xEE).take(padding));
        }
        padded
    }

    fn pattern(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    #[test]
    fn test_packed_plane_is_copied_verbatim() {
        let data = pattern(4 * 3 * 4);
        let plane = Plane {
            data: &data,
            pixel_stride: 4,
            row_stride: 16,
        };

        assert!(check_plane(&plane, 4, 3).is_ok());
        assert_eq!(repack(&plane, 4, 3), data);
    }

    #[test]
    fn test_padded_plane_drops_padding() {
        let (width, height, padding) = (5usize, 4usize, 12usize);
        let row_bytes = width * 4;
        let padded = pad_rows(&pattern(row_bytes * height), row_bytes, padding);
        let plane = Plane {
            data: &padded,
            pixel_stride: 4,
            row_stride: row_bytes + padding,
        };

        let packed = repack(&plane, width, height);
        assert_eq!(packed.len(), width * height * 4);
        assert!(!packed.contains(&0xEE));
        for (y, row) in packed.chunks(row_bytes).enumerate() {
            let start = y * plane.row_stride;
            assert_eq!(row, &padded[start..start + row_bytes]);
        }
    }

    #[test]
    fn test_padding_round_trip_restores_original() {
        let (width, height) = (7usize, 6usize);
        let original = pattern(width * height * 4);
        let padded = pad_rows(&original, width * 4, 36);
        let plane = Plane {
            data: &padded,
            pixel_stride: 4,
            row_stride: width * 4 + 36,
        };

        assert!(check_plane(&plane, width, height).is_ok());
        assert_eq!(repack(&plane, width, height), original);
    }

    #[test]
    fn test_last_row_without_padding_is_accepted() {
        let (width, height, row_stride) = (3usize, 3usize, 16usize);
        let mut data = pad_rows(&pattern(width * 4 * height), width * 4, 4);
        data.truncate(data.len() - 4);
        let plane = Plane {
            data: &data,
            pixel_stride: 4,
            row_stride,
        };

        assert!(check_plane(&plane, width, height).is_ok());
        assert_eq!(repack(&plane, width, height), pattern(width * 4 * height));
    }

    #[test]
    fn test_check_plane_rejects_malformed_input() {
        let data = vec![0u8; 64];
        let plane = Plane {
            data: &data,
            pixel_stride: 4,
            row_stride: 16,
        };

        assert!(check_plane(&plane, 0, 4).is_err());
        assert!(check_plane(&plane, 5, 1).is_err()); // stride shorter than row
        assert!(check_plane(&plane, 4, 5).is_err()); // buffer too short

        let zero_stride = Plane {
            pixel_stride: 0,
            ..plane
        };
        assert!(check_plane(&zero_stride, 4, 4).is_err());
    }

    #[test]
    fn test_oversized_strides_are_rejected() {
        let data = vec![0u8; 64];
        let wide_pixels = Plane {
            data: &data,
            pixel_stride: usize::MAX,
            row_stride: usize::MAX,
        };
        let tall_rows = Plane {
            data: &data,
            pixel_stride: 4,
            row_stride: usize::MAX / 2,
        };

        assert!(matches!(
            check_plane(&wide_pixels, 2, 1),
            Err(CaptureError::ImageAcquisitionTransient(_))
        ));
        assert!(matches!(
            check_plane(&tall_rows, 4, 4),
            Err(CaptureError::ImageAcquisitionTransient(_))
        ));
    }
}
