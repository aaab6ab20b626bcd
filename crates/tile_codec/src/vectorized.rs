use std::sync::OnceLock;

static VECTOR_UNIT: OnceLock<bool> = OnceLock::new();

/// Whether the running CPU has the 128-bit unit used by the vectorized path.
pub fn vectorized_supported() -> bool {
    *VECTOR_UNIT.get_or_init(detect)
}

#[cfg(target_arch = "x86_64")]
fn detect() -> bool {
    is_x86_feature_detected!("sse2")
}

#[cfg(target_arch = "aarch64")]
fn detect() -> bool {
    std::arch::is_aarch64_feature_detected!("neon")
}

#[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
fn detect() -> bool {
    false
}

/// Copies `src` into `dst` four pixels at a time. Both slices must have the
/// same length, a multiple of four.
pub(crate) fn copy_lanes(dst: &mut [u32], src: &[u32]) {
    assert_eq!(dst.len(), src.len(), "lane copy length mismatch");
    assert!(dst.len() % 4 == 0, "lane copy of {} pixels", dst.len());
    for (dst_lane, src_lane) in dst.chunks_exact_mut(4).zip(src.chunks_exact(4)) {
        copy4(dst_lane, src_lane);
    }
}

#[cfg(target_arch = "x86_64")]
#[inline]
fn copy4(dst: &mut [u32], src: &[u32]) {
    use std::arch::x86_64::{__m128i, _mm_loadu_si128, _mm_storeu_si128};

    debug_assert!(dst.len() == 4 && src.len() == 4);
    // SAFETY: both chunks hold exactly four u32 values; loadu/storeu accept
    // unaligned pointers and SSE2 is part of the x86_64 baseline.
    unsafe {
        let lane = _mm_loadu_si128(src.as_ptr().cast::<__m128i>());
        _mm_storeu_si128(dst.as_mut_ptr().cast::<__m128i>(), lane);
    }
}

#[cfg(target_arch = "aarch64")]
#[inline]
fn copy4(dst: &mut [u32], src: &[u32]) {
    use std::arch::aarch64::{vld1q_u32, vst1q_u32};

    debug_assert!(dst.len() == 4 && src.len() == 4);
    // SAFETY: both chunks hold exactly four u32 values and NEON is part of
    // the aarch64 baseline.
    unsafe {
        let lane = vld1q_u32(src.as_ptr());
        vst1q_u32(dst.as_mut_ptr(), lane);
    }
}

#[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
#[inline]
fn copy4(dst: &mut [u32], src: &[u32]) {
    dst.copy_from_slice(src);
}
