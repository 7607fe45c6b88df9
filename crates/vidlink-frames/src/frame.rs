use bytes::{Bytes, BytesMut};
use vidlink_core::{FrameError, Plane, Resolution};

// MARK: - I420FrameView

/// Borrowed I420 frame as delivered by a frame-ready callback.
///
/// The plane slices belong to the decoder and are only valid while the
/// callback runs. Rows may be padded (`stride_* >= plane width`).
#[derive(Debug, Clone, Copy)]
pub struct I420FrameView<'a> {
    pub width: u32,
    pub height: u32,
    pub y: &'a [u8],
    pub u: &'a [u8],
    pub v: &'a [u8],
    pub stride_y: u32,
    pub stride_u: u32,
    pub stride_v: u32,
    pub timestamp_us: u64,
}

impl<'a> I420FrameView<'a> {
    /// View over tightly packed planes (stride equals plane width).
    pub fn packed(
        resolution: Resolution,
        y: &'a [u8],
        u: &'a [u8],
        v: &'a [u8],
        timestamp_us: u64,
    ) -> Self {
        let chroma = resolution.chroma();
        Self {
            width: resolution.width,
            height: resolution.height,
            y,
            u,
            v,
            stride_y: resolution.width,
            stride_u: chroma.width,
            stride_v: chroma.width,
            timestamp_us,
        }
    }

    pub fn resolution(&self) -> Resolution {
        Resolution::new(self.width, self.height)
    }

    /// Checks dimensions, strides and plane lengths.
    pub fn validate(&self) -> Result<(), FrameError> {
        let res = self.resolution();
        if res.is_empty() {
            return Err(FrameError::InvalidDimensions { width: self.width, height: self.height });
        }
        let chroma = res.chroma();
        check_plane(Plane::Y, self.y, self.stride_y, res)?;
        check_plane(Plane::U, self.u, self.stride_u, chroma)?;
        check_plane(Plane::V, self.v, self.stride_v, chroma)?;
        Ok(())
    }
}

fn check_plane(plane: Plane, data: &[u8], stride: u32, dims: Resolution) -> Result<(), FrameError> {
    if stride < dims.width {
        return Err(FrameError::StrideTooSmall { plane, stride, min: dims.width });
    }
    // The last row need not carry padding
    let min = stride as usize * (dims.height as usize - 1) + dims.width as usize;
    if data.len() < min {
        return Err(FrameError::PlaneTooSmall { plane, len: data.len(), min });
    }
    Ok(())
}

// MARK: - I420FrameStorage

/// Owned copy of an I420 frame, planes packed back to back (Y, U, V).
///
/// Storages are recycled by [`crate::VideoFrameQueue`]; `copy_from` only
/// grows the buffer when a larger frame arrives.
#[derive(Debug, Default)]
pub struct I420FrameStorage {
    width: u32,
    height: u32,
    timestamp_us: u64,
    buffer: BytesMut,
}

impl I420FrameStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes needed to hold a packed I420 frame of `res`.
    pub fn packed_len(res: Resolution) -> usize {
        let chroma = res.chroma();
        res.total_pixels() as usize + 2 * chroma.total_pixels() as usize
    }

    /// Copies `view` into this storage, dropping any row padding.
    pub fn copy_from(&mut self, view: &I420FrameView<'_>) -> Result<(), FrameError> {
        view.validate()?;
        let res = view.resolution();
        let chroma = res.chroma();

        self.buffer.clear();
        self.buffer.reserve(Self::packed_len(res));
        copy_rows(&mut self.buffer, view.y, view.stride_y, res);
        copy_rows(&mut self.buffer, view.u, view.stride_u, chroma);
        copy_rows(&mut self.buffer, view.v, view.stride_v, chroma);

        self.width = view.width;
        self.height = view.height;
        self.timestamp_us = view.timestamp_us;
        Ok(())
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn resolution(&self) -> Resolution {
        Resolution::new(self.width, self.height)
    }

    pub fn timestamp_us(&self) -> u64 {
        self.timestamp_us
    }

    pub fn y(&self) -> &[u8] {
        let luma = self.resolution().total_pixels() as usize;
        &self.buffer[..luma]
    }

    pub fn u(&self) -> &[u8] {
        let luma = self.resolution().total_pixels() as usize;
        let chroma = self.resolution().chroma().total_pixels() as usize;
        &self.buffer[luma..luma + chroma]
    }

    pub fn v(&self) -> &[u8] {
        let luma = self.resolution().total_pixels() as usize;
        let chroma = self.resolution().chroma().total_pixels() as usize;
        &self.buffer[luma + chroma..luma + 2 * chroma]
    }

    /// Packed view over this storage.
    pub fn as_view(&self) -> I420FrameView<'_> {
        I420FrameView::packed(self.resolution(), self.y(), self.u(), self.v(), self.timestamp_us)
    }

    /// Allocated buffer size, kept across reuse.
    pub fn capacity(&self) -> usize {
        self.buffer.capacity()
    }

    /// Immutable copy of the packed planes.
    pub fn to_bytes(&self) -> Bytes {
        Bytes::copy_from_slice(&self.buffer)
    }
}

fn copy_rows(dst: &mut BytesMut, src: &[u8], stride: u32, dims: Resolution) {
    let (stride, width) = (stride as usize, dims.width as usize);
    for row in 0..dims.height as usize {
        let start = row * stride;
        dst.extend_from_slice(&src[start..start + width]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn planes(res: Resolution, fill: u8) -> (Vec<u8>, Vec<u8>, Vec<u8>) {
        let c = res.chroma().total_pixels() as usize;
        (vec![fill; res.total_pixels() as usize], vec![fill + 1; c], vec![fill + 2; c])
    }

    #[test]
    fn copies_packed_planes() {
        let res = Resolution::new(4, 2);
        let (y, u, v) = planes(res, 10);
        let view = I420FrameView::packed(res, &y, &u, &v, 42);

        let mut storage = I420FrameStorage::new();
        storage.copy_from(&view).unwrap();

        assert_eq!(storage.resolution(), res);
        assert_eq!(storage.timestamp_us(), 42);
        assert_eq!(storage.y(), &y[..]);
        assert_eq!(storage.u(), &u[..]);
        assert_eq!(storage.v(), &v[..]);
        assert_eq!(storage.to_bytes().len(), I420FrameStorage::packed_len(res));
    }

    #[test]
    fn strips_row_padding() {
        // 2×2 luma with stride 4, 1×1 chroma with stride 3
        let y = [1, 2, 0xEE, 0xEE, 3, 4];
        let u = [5, 0xEE, 0xEE];
        let v = [6];
        let view = I420FrameView {
            width: 2,
            height: 2,
            y: &y,
            u: &u,
            v: &v,
            stride_y: 4,
            stride_u: 3,
            stride_v: 1,
            timestamp_us: 0,
        };

        let mut storage = I420FrameStorage::new();
        storage.copy_from(&view).unwrap();
        assert_eq!(storage.y(), &[1, 2, 3, 4]);
        assert_eq!(storage.u(), &[5]);
        assert_eq!(storage.v(), &[6]);
    }

    #[test]
    fn rejects_bad_views() {
        let res = Resolution::new(4, 4);
        let (y, u, v) = planes(res, 0);

        let empty = I420FrameView::packed(Resolution::new(0, 4), &y, &u, &v, 0);
        assert!(matches!(empty.validate(), Err(FrameError::InvalidDimensions { .. })));

        let short = I420FrameView::packed(res, &y[..10], &u, &v, 0);
        assert!(matches!(
            short.validate(),
            Err(FrameError::PlaneTooSmall { plane: Plane::Y, .. })
        ));

        let mut narrow = I420FrameView::packed(res, &y, &u, &v, 0);
        narrow.stride_v = 1;
        assert!(matches!(
            narrow.validate(),
            Err(FrameError::StrideTooSmall { plane: Plane::V, .. })
        ));

        let mut storage = I420FrameStorage::new();
        assert!(storage.copy_from(&short).is_err());
    }

    #[test]
    fn reuse_keeps_allocation() {
        let big = Resolution::new(64, 32);
        let small = Resolution::new(16, 8);
        let (y, u, v) = planes(big, 0);
        let (ys, us, vs) = planes(small, 50);

        let mut storage = I420FrameStorage::new();
        storage.copy_from(&I420FrameView::packed(big, &y, &u, &v, 1)).unwrap();
        let cap = storage.capacity();

        storage.copy_from(&I420FrameView::packed(small, &ys, &us, &vs, 2)).unwrap();
        assert_eq!(storage.capacity(), cap);
        assert_eq!(storage.resolution(), small);
        assert_eq!(storage.y(), &ys[..]);
    }

    #[test]
    fn as_view_roundtrips_through_validate() {
        let res = Resolution::new(6, 3);
        let (y, u, v) = planes(res, 7);
        let mut storage = I420FrameStorage::new();
        storage.copy_from(&I420FrameView::packed(res, &y, &u, &v, 9)).unwrap();
        let view = storage.as_view();
        assert!(view.validate().is_ok());
        assert_eq!(view.timestamp_us, 9);
    }
}
