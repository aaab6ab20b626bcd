//! Rewrites linearly scanned RGBA images into the GPU tiling layouts used by
//! Vivante memory controllers, and reads them back.
//!
//! Every operation walks the *source* rectangle row by row. The scalar path
//! moves one pixel per step; the vectorized path aligns each row on a
//! destination column that is a multiple of four and then moves
//! [`TileLayout::vector_batch`] pixels per step. Both produce identical
//! output.

mod layout;
mod vectorized;

pub use layout::{
    SUPER_TILE_EDGE, TILE_EDGE, TileLayout, linear_index, super_tiled_index, tiled_index,
};
pub use vectorized::vectorized_supported;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ImageGeometry {
    pub width: u32,
    pub height: u32,
    /// Pixels per row (linear) or per tile row (tiled).
    pub pitch: u32,
}

impl ImageGeometry {
    pub const fn new(width: u32, height: u32, pitch: u32) -> Self {
        Self {
            width,
            height,
            pitch,
        }
    }

    pub const fn packed(width: u32, height: u32) -> Self {
        Self::new(width, height, width)
    }

    pub const fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    fn linear_len(&self) -> usize {
        if self.is_empty() {
            return 0;
        }
        (self.height as usize - 1) * self.pitch as usize + self.width as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CodecPath {
    Scalar,
    Vectorized,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileCodec {
    path: CodecPath,
}

impl TileCodec {
    /// Selects the vectorized path when requested and supported by the CPU.
    pub fn new(request_vectorized: bool) -> Self {
        if !request_vectorized {
            return Self::scalar();
        }
        if vectorized_supported() {
            log::debug!("tile codec using vectorized path");
            return Self {
                path: CodecPath::Vectorized,
            };
        }
        log::warn!("vectorized tile codec requested but unsupported by this CPU, using scalar path");
        Self::scalar()
    }

    pub const fn scalar() -> Self {
        Self {
            path: CodecPath::Scalar,
        }
    }

    pub const fn path(&self) -> CodecPath {
        self.path
    }

    /// Writes the linear image `src` into `dst` at (`dest_x`, `dest_y`).
    ///
    /// # Panics
    ///
    /// When the source rectangle does not fit inside the destination image or
    /// either buffer is shorter than its geometry requires.
    pub fn store(
        &self,
        layout: TileLayout,
        dst: &mut [u32],
        dst_geometry: ImageGeometry,
        dest_x: u32,
        dest_y: u32,
        src: &[u32],
        src_geometry: ImageGeometry,
    ) {
        assert_region(
            layout,
            dst.len(),
            dst_geometry,
            dest_x,
            dest_y,
            src.len(),
            src_geometry,
        );
        let src_pitch = src_geometry.pitch;
        self.walk(
            layout,
            dst_geometry,
            dest_x,
            dest_y,
            src_geometry,
            |tiled, row, column, len| {
                let linear = (row * src_pitch + column) as usize;
                copy_run(&mut dst[tiled..tiled + len], &src[linear..linear + len]);
            },
        );
    }

    /// Reads the rectangle at (`src_x`, `src_y`) of `src`, sized by
    /// `dst_geometry`, into the linear image `dst`.
    pub fn load(
        &self,
        layout: TileLayout,
        src: &[u32],
        src_geometry: ImageGeometry,
        src_x: u32,
        src_y: u32,
        dst: &mut [u32],
        dst_geometry: ImageGeometry,
    ) {
        assert_region(
            layout,
            src.len(),
            src_geometry,
            src_x,
            src_y,
            dst.len(),
            dst_geometry,
        );
        let dst_pitch = dst_geometry.pitch;
        self.walk(
            layout,
            src_geometry,
            src_x,
            src_y,
            dst_geometry,
            |tiled, row, column, len| {
                let linear = (row * dst_pitch + column) as usize;
                copy_run(&mut dst[linear..linear + len], &src[tiled..tiled + len]);
            },
        );
    }

    /// Visits `region` placed at (`origin_x`, `origin_y`) of the tiled image
    /// as runs that are contiguous in both images.
    fn walk(
        &self,
        layout: TileLayout,
        tiled_geometry: ImageGeometry,
        origin_x: u32,
        origin_y: u32,
        region: ImageGeometry,
        mut visit: impl FnMut(usize, u32, u32, usize),
    ) {
        let batch = match self.path {
            CodecPath::Scalar => 1,
            CodecPath::Vectorized => layout.vector_batch(),
        };
        for row in 0..region.height {
            let y = origin_y + row;
            let mut column = 0;
            if batch > 1 {
                while column < region.width && (origin_x + column) % TILE_EDGE != 0 {
                    visit(layout.index(origin_x + column, y, tiled_geometry) as usize, row, column, 1);
                    column += 1;
                }
                while column + batch <= region.width {
                    let tiled = layout.index(origin_x + column, y, tiled_geometry) as usize;
                    visit(tiled, row, column, batch as usize);
                    column += batch;
                }
            }
            while column < region.width {
                visit(layout.index(origin_x + column, y, tiled_geometry) as usize, row, column, 1);
                column += 1;
            }
        }
    }
}

impl Default for TileCodec {
    fn default() -> Self {
        Self::scalar()
    }
}

fn copy_run(dst: &mut [u32], src: &[u32]) {
    if dst.len() == 1 {
        dst[0] = src[0];
    } else {
        vectorized::copy_lanes(dst, src);
    }
}

fn assert_region(
    layout: TileLayout,
    tiled_len: usize,
    tiled_geometry: ImageGeometry,
    x: u32,
    y: u32,
    linear_len: usize,
    linear_geometry: ImageGeometry,
) {
    layout.assert_geometry(tiled_geometry);
    assert!(
        linear_geometry.pitch >= linear_geometry.width,
        "linear pitch {} is smaller than width {}",
        linear_geometry.pitch,
        linear_geometry.width
    );
    let fits_x = x
        .checked_add(linear_geometry.width)
        .is_some_and(|right| right <= tiled_geometry.width);
    let fits_y = y
        .checked_add(linear_geometry.height)
        .is_some_and(|bottom| bottom <= tiled_geometry.height);
    assert!(
        fits_x && fits_y,
        "{}x{} region at ({x}, {y}) exceeds {}x{} image",
        linear_geometry.width,
        linear_geometry.height,
        tiled_geometry.width,
        tiled_geometry.height
    );
    let addressable = layout.addressable_len(tiled_geometry);
    assert!(
        tiled_len >= addressable,
        "{layout:?} image holds {tiled_len} pixels, layout addresses {addressable}"
    );
    let required = linear_geometry.linear_len();
    assert!(
        linear_len >= required,
        "linear image holds {linear_len} pixels, geometry requires {required}"
    );
}

#[cfg(test)]
mod tests;
