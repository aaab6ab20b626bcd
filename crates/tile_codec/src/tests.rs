use std::collections::HashSet;

use quickcheck::TestResult;
use quickcheck_macros::quickcheck;

use super::*;

fn vectorized_codec() -> TileCodec {
    TileCodec {
        path: CodecPath::Vectorized,
    }
}

fn numbered_pixels(len: usize) -> Vec<u32> {
    (0..len as u32).map(|value| value.wrapping_mul(2_654_435_761) | 1).collect()
}

fn destination_geometry(layout: TileLayout, width: u32, height: u32) -> ImageGeometry {
    match layout {
        TileLayout::Linear => ImageGeometry::new(width, height, width + 3),
        TileLayout::Tiled => ImageGeometry::new(width, height, width.next_multiple_of(4)),
        TileLayout::SuperTiled => ImageGeometry::packed(
            width.next_multiple_of(SUPER_TILE_EDGE),
            height.next_multiple_of(SUPER_TILE_EDGE),
        ),
    }
}

#[quickcheck]
fn vectorized_store_matches_scalar(
    layout_pick: u8,
    dest_x: u8,
    dest_y: u8,
    width: u8,
    height: u8,
    extra_pitch: u8,
) -> TestResult {
    let layout = TileLayout::ALL[layout_pick as usize % TileLayout::ALL.len()];
    let (dest_x, dest_y) = (dest_x as u32 % 70, dest_y as u32 % 70);
    let (width, height) = (width as u32 % 90, height as u32 % 40);
    if width == 0 || height == 0 {
        return TestResult::discard();
    }
    let dst_geometry = destination_geometry(layout, dest_x + width, dest_y + height);
    let src_geometry = ImageGeometry::new(width, height, width + extra_pitch as u32 % 8);
    let src = numbered_pixels(src_geometry.linear_len());
    let dst_len = layout.addressable_len(dst_geometry);

    let mut scalar_dst = vec![0u32; dst_len];
    let mut vector_dst = vec![0u32; dst_len];
    TileCodec::scalar().store(
        layout,
        &mut scalar_dst,
        dst_geometry,
        dest_x,
        dest_y,
        &src,
        src_geometry,
    );
    vectorized_codec().store(
        layout,
        &mut vector_dst,
        dst_geometry,
        dest_x,
        dest_y,
        &src,
        src_geometry,
    );

    TestResult::from_bool(scalar_dst == vector_dst)
}

#[quickcheck]
fn vectorized_load_matches_scalar(layout_pick: u8, src_x: u8, src_y: u8, width: u8) -> TestResult {
    let layout = TileLayout::ALL[layout_pick as usize % TileLayout::ALL.len()];
    let tiled_geometry = destination_geometry(layout, 128, 128);
    let (src_x, src_y) = (src_x as u32 % 64, src_y as u32 % 64);
    let width = width as u32 % 64;
    if width == 0 {
        return TestResult::discard();
    }
    let tiled = numbered_pixels(layout.addressable_len(tiled_geometry));
    let region = ImageGeometry::packed(width, 9);

    let mut scalar_out = vec![0u32; region.linear_len()];
    let mut vector_out = vec![0u32; region.linear_len()];
    TileCodec::scalar().load(layout, &tiled, tiled_geometry, src_x, src_y, &mut scalar_out, region);
    vectorized_codec().load(layout, &tiled, tiled_geometry, src_x, src_y, &mut vector_out, region);

    TestResult::from_bool(scalar_out == vector_out)
}

#[test]
fn linear_store_is_a_straight_row_copy() {
    let src_geometry = ImageGeometry::new(37, 11, 40);
    let src = numbered_pixels(src_geometry.linear_len());
    let dst_geometry = ImageGeometry::new(64, 32, 72);

    for codec in [TileCodec::scalar(), vectorized_codec()] {
        let mut dst = vec![0u32; TileLayout::Linear.addressable_len(dst_geometry)];
        codec.store(TileLayout::Linear, &mut dst, dst_geometry, 5, 3, &src, src_geometry);

        for y in 0..dst_geometry.height {
            for x in 0..dst_geometry.width {
                let written = dst[(y * dst_geometry.pitch + x) as usize];
                let inside = (5..42).contains(&x) && (3..14).contains(&y);
                let expected = if inside {
                    src[((y - 3) * src_geometry.pitch + (x - 5)) as usize]
                } else {
                    0
                };
                assert_eq!(written, expected, "pixel ({x}, {y}) via {:?}", codec.path());
            }
        }
    }
}

#[test]
fn tiled_index_is_a_bijection_over_the_padded_image() {
    let geometry = ImageGeometry::new(20, 12, 20);
    let mut seen = HashSet::new();
    for y in 0..geometry.height {
        for x in 0..geometry.width {
            let index = TileLayout::Tiled.index(x, y, geometry);
            assert!((index as usize) < TileLayout::Tiled.addressable_len(geometry));
            assert!(seen.insert(index), "index {index} hit twice");
        }
    }
    assert_eq!(seen.len(), 240);
}

#[test]
fn tiled_index_places_four_by_four_blocks_contiguously() {
    assert_eq!(tiled_index(0, 0, 8), 0);
    assert_eq!(tiled_index(3, 0, 8), 3);
    assert_eq!(tiled_index(0, 1, 8), 4);
    assert_eq!(tiled_index(3, 3, 8), 15);
    assert_eq!(tiled_index(4, 0, 8), 16);
    assert_eq!(tiled_index(0, 4, 8), 32);
}

#[test]
fn super_tiled_index_covers_each_block_exactly_once() {
    let geometry = ImageGeometry::packed(128, 64);
    let mut seen = vec![false; TileLayout::SuperTiled.addressable_len(geometry)];
    for y in 0..geometry.height {
        for x in 0..geometry.width {
            let index = super_tiled_index(x, y, geometry.width) as usize;
            assert!(!seen[index], "index {index} hit twice");
            seen[index] = true;
        }
    }
    assert!(seen.iter().all(|hit| *hit));
    assert_eq!(super_tiled_index(64, 0, 128), 4096);
    assert_eq!(super_tiled_index(0, 64, 128), 8192);
}

#[test]
fn super_tiled_round_trip_restores_the_source() {
    let geometry = ImageGeometry::packed(128, 128);
    let src = numbered_pixels(geometry.linear_len());
    for codec in [TileCodec::scalar(), vectorized_codec()] {
        let mut tiled = vec![0u32; TileLayout::SuperTiled.addressable_len(geometry)];
        codec.store(TileLayout::SuperTiled, &mut tiled, geometry, 0, 0, &src, geometry);
        assert_ne!(tiled, src, "super-tiling must reorder pixels");

        let mut restored = vec![0u32; src.len()];
        codec.load(TileLayout::SuperTiled, &tiled, geometry, 0, 0, &mut restored, geometry);
        assert_eq!(restored, src);
    }
}

#[test]
fn store_leaves_pixels_outside_the_rectangle_untouched() {
    let dst_geometry = ImageGeometry::packed(64, 64);
    let src_geometry = ImageGeometry::packed(13, 7);
    let src = vec![0xffff_ffffu32; src_geometry.linear_len()];
    let mut dst = vec![0u32; TileLayout::SuperTiled.addressable_len(dst_geometry)];

    vectorized_codec().store(TileLayout::SuperTiled, &mut dst, dst_geometry, 6, 9, &src, src_geometry);

    let written = dst.iter().filter(|pixel| **pixel != 0).count();
    assert_eq!(written, 13 * 7);
    let mut region = vec![0u32; src_geometry.linear_len()];
    TileCodec::scalar().load(TileLayout::SuperTiled, &dst, dst_geometry, 6, 9, &mut region, src_geometry);
    assert_eq!(region, src);
}

fn assert_each_index_written_once(
    layout: TileLayout,
    dst: &[u32],
    dst_geometry: ImageGeometry,
    dest_x: u32,
    dest_y: u32,
    src_geometry: ImageGeometry,
    untouched: u32,
    label: &str,
) {
    let mut expected = HashSet::new();
    for y in 0..src_geometry.height {
        for x in 0..src_geometry.width {
            expected.insert(layout.index(dest_x + x, dest_y + y, dst_geometry) as usize);
        }
    }
    assert_eq!(
        expected.len(),
        src_geometry.width as usize * src_geometry.height as usize,
        "{label}: index collision"
    );
    let mut seen = HashSet::new();
    for (index, pixel) in dst.iter().enumerate() {
        if expected.contains(&index) {
            assert_ne!(*pixel, untouched, "{label}: index {index} never written");
            assert!(seen.insert(*pixel), "{label}: pixel {pixel} written twice");
        } else {
            assert_eq!(*pixel, untouched, "{label}: index {index} outside the region");
        }
    }
}

#[test]
fn full_frame_store_writes_every_index_once() {
    for (name, codec) in [("scalar", TileCodec::scalar()), ("vectorized", vectorized_codec())] {
        let dst_geometry = ImageGeometry::new(36, 12, 36);
        let src_geometry = ImageGeometry::packed(36, 12);
        let src: Vec<u32> = (1..=36 * 12).collect();
        let mut dst = vec![0u32; TileLayout::Tiled.addressable_len(dst_geometry)];
        codec.store(TileLayout::Tiled, &mut dst, dst_geometry, 0, 0, &src, src_geometry);
        assert_each_index_written_once(
            TileLayout::Tiled,
            &dst,
            dst_geometry,
            0,
            0,
            src_geometry,
            0,
            &format!("tiled {name}"),
        );

        let dst_geometry = ImageGeometry::packed(128, 64);
        let src: Vec<u32> = (1..=128 * 64).collect();
        let mut dst = vec![0u32; TileLayout::SuperTiled.addressable_len(dst_geometry)];
        codec.store(TileLayout::SuperTiled, &mut dst, dst_geometry, 0, 0, &src, dst_geometry);
        assert_each_index_written_once(
            TileLayout::SuperTiled,
            &dst,
            dst_geometry,
            0,
            0,
            dst_geometry,
            0,
            &format!("super-tiled {name}"),
        );
    }
}

#[test]
fn odd_width_region_leaves_the_rest_untouched() {
    const UNTOUCHED: u32 = u32::MAX;
    for (name, codec) in [("scalar", TileCodec::scalar()), ("vectorized", vectorized_codec())] {
        for (layout, dst_geometry) in [
            (TileLayout::Tiled, ImageGeometry::new(60, 24, 60)),
            (TileLayout::SuperTiled, ImageGeometry::packed(128, 64)),
        ] {
            let src_geometry = ImageGeometry::new(45, 17, 47);
            let src: Vec<u32> = (1..=src_geometry.linear_len() as u32).collect();
            let mut dst = vec![UNTOUCHED; layout.addressable_len(dst_geometry)];
            codec.store(layout, &mut dst, dst_geometry, 7, 3, &src, src_geometry);
            assert_each_index_written_once(
                layout,
                &dst,
                dst_geometry,
                7,
                3,
                src_geometry,
                UNTOUCHED,
                &format!("{layout:?} {name}"),
            );
        }
    }
}

#[test]
fn empty_source_writes_nothing() {
    let dst_geometry = ImageGeometry::packed(8, 8);
    let mut dst = vec![7u32; 64];
    TileCodec::scalar().store(TileLayout::Tiled, &mut dst, dst_geometry, 8, 8, &[], ImageGeometry::packed(0, 0));
    assert!(dst.iter().all(|pixel| *pixel == 7));
}

#[test]
#[should_panic(expected = "exceeds")]
fn store_past_the_right_edge_panics() {
    let dst_geometry = ImageGeometry::packed(16, 16);
    let src_geometry = ImageGeometry::packed(8, 4);
    let mut dst = vec![0u32; 256];
    TileCodec::scalar().store(
        TileLayout::Linear,
        &mut dst,
        dst_geometry,
        9,
        0,
        &vec![1; 32],
        src_geometry,
    );
}

#[test]
#[should_panic(expected = "layout addresses")]
fn store_into_short_tiled_buffer_panics() {
    let dst_geometry = ImageGeometry::packed(8, 6);
    let mut dst = vec![0u32; 48];
    TileCodec::scalar().store(
        TileLayout::Tiled,
        &mut dst,
        dst_geometry,
        0,
        0,
        &[1; 4],
        ImageGeometry::packed(2, 2),
    );
}

#[test]
#[should_panic(expected = "multiple of 64")]
fn super_tiled_store_rejects_unaligned_images() {
    let dst_geometry = ImageGeometry::packed(96, 64);
    let mut dst = vec![0u32; 96 * 64];
    TileCodec::scalar().store(
        TileLayout::SuperTiled,
        &mut dst,
        dst_geometry,
        0,
        0,
        &[1; 4],
        ImageGeometry::packed(2, 2),
    );
}

#[test]
fn scalar_request_never_vectorizes() {
    assert_eq!(TileCodec::new(false).path(), CodecPath::Scalar);
    let requested = TileCodec::new(true).path();
    let expected = if vectorized_supported() {
        CodecPath::Vectorized
    } else {
        CodecPath::Scalar
    };
    assert_eq!(requested, expected);
}

#[test]
fn modifiers_map_onto_layouts() {
    use render_protocol::BufferModifier;

    assert_eq!(TileLayout::from(BufferModifier::Linear), TileLayout::Linear);
    assert_eq!(TileLayout::from(BufferModifier::VivanteTiled), TileLayout::Tiled);
    assert_eq!(
        TileLayout::from(BufferModifier::VivanteSuperTiled),
        TileLayout::SuperTiled
    );
}
