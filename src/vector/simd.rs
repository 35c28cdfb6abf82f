//! Dot-product kernels over row bytes. Rows live at unaligned offsets inside
//! the packed buffer, so the f32 kernels read little-endian bytes; AVX2
//! variants are picked at runtime with a scalar fallback.

#[inline]
pub fn dot_f32_le(a: &[u8], b: &[u8]) -> f32 {
    debug_assert_eq!(a.len(), b.len());
    debug_assert_eq!(a.len() % 4, 0);
    #[cfg(target_arch = "x86_64")]
    {
        if std::is_x86_feature_detected!("avx2") && a.len() >= 32 {
            unsafe {
                return dot_f32_le_avx2(a, b);
            }
        }
    }
    dot_f32_le_scalar(a, b)
}

#[inline]
pub fn l2_sq_f32_le(a: &[u8], b: &[u8]) -> f32 {
    debug_assert_eq!(a.len(), b.len());
    debug_assert_eq!(a.len() % 4, 0);
    #[cfg(target_arch = "x86_64")]
    {
        if std::is_x86_feature_detected!("avx2") && a.len() >= 32 {
            unsafe {
                return l2_sq_f32_le_avx2(a, b);
            }
        }
    }
    l2_sq_f32_le_scalar(a, b)
}

#[inline]
pub fn dot_i8(a: &[i8], b: &[i8]) -> i32 {
    debug_assert_eq!(a.len(), b.len());
    #[cfg(target_arch = "x86_64")]
    {
        if std::is_x86_feature_detected!("avx2") && a.len() >= 32 {
            unsafe {
                return dot_i8_avx2(a, b);
            }
        }
    }
    dot_i8_scalar(a, b)
}

#[inline]
fn read_f32(bytes: &[u8], i: usize) -> f32 {
    f32::from_le_bytes([bytes[i], bytes[i + 1], bytes[i + 2], bytes[i + 3]])
}

#[inline]
fn dot_f32_le_scalar(a: &[u8], b: &[u8]) -> f32 {
    let mut sum = 0.0f32;
    let mut i = 0;
    while i + 4 <= a.len() {
        sum += read_f32(a, i) * read_f32(b, i);
        i += 4;
    }
    sum
}

#[inline]
fn l2_sq_f32_le_scalar(a: &[u8], b: &[u8]) -> f32 {
    let mut sum = 0.0f32;
    let mut i = 0;
    while i + 4 <= a.len() {
        let d = read_f32(a, i) - read_f32(b, i);
        sum += d * d;
        i += 4;
    }
    sum
}

pub fn dot_i8_scalar(a: &[i8], b: &[i8]) -> i32 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (*x as i32) * (*y as i32))
        .sum()
}

#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "avx2")]
unsafe fn dot_f32_le_avx2(a: &[u8], b: &[u8]) -> f32 {
    use std::arch::x86_64::*;

    let mut acc = _mm256_setzero_ps();
    let mut i = 0usize;
    while i + 32 <= a.len() {
        let va = _mm256_loadu_ps(a.as_ptr().add(i) as *const f32);
        let vb = _mm256_loadu_ps(b.as_ptr().add(i) as *const f32);
        acc = _mm256_add_ps(acc, _mm256_mul_ps(va, vb));
        i += 32;
    }
    let mut tmp = [0f32; 8];
    _mm256_storeu_ps(tmp.as_mut_ptr(), acc);
    let mut sum = tmp.iter().sum::<f32>();
    while i + 4 <= a.len() {
        sum += read_f32(a, i) * read_f32(b, i);
        i += 4;
    }
    sum
}

#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "avx2")]
unsafe fn l2_sq_f32_le_avx2(a: &[u8], b: &[u8]) -> f32 {
    use std::arch::x86_64::*;

    let mut acc = _mm256_setzero_ps();
    let mut i = 0usize;
    while i + 32 <= a.len() {
        let va = _mm256_loadu_ps(a.as_ptr().add(i) as *const f32);
        let vb = _mm256_loadu_ps(b.as_ptr().add(i) as *const f32);
        let diff = _mm256_sub_ps(va, vb);
        acc = _mm256_add_ps(acc, _mm256_mul_ps(diff, diff));
        i += 32;
    }
    let mut tmp = [0f32; 8];
    _mm256_storeu_ps(tmp.as_mut_ptr(), acc);
    let mut sum = tmp.iter().sum::<f32>();
    while i + 4 <= a.len() {
        let d = read_f32(a, i) - read_f32(b, i);
        sum += d * d;
        i += 4;
    }
    sum
}

#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "avx2")]
unsafe fn dot_i8_avx2(a: &[i8], b: &[i8]) -> i32 {
    use std::arch::x86_64::*;

    let mut sum = _mm256_setzero_si256();
    let mut i = 0usize;
    while i + 32 <= a.len() {
        let va = _mm256_loadu_si256(a.as_ptr().add(i) as *const __m256i);
        let vb = _mm256_loadu_si256(b.as_ptr().add(i) as *const __m256i);

        let va_lo = _mm256_cvtepi8_epi16(_mm256_castsi256_si128(va));
        let vb_lo = _mm256_cvtepi8_epi16(_mm256_castsi256_si128(vb));
        let va_hi = _mm256_cvtepi8_epi16(_mm256_extracti128_si256(va, 1));
        let vb_hi = _mm256_cvtepi8_epi16(_mm256_extracti128_si256(vb, 1));

        let prod_lo = _mm256_mullo_epi16(va_lo, vb_lo);
        let prod_hi = _mm256_mullo_epi16(va_hi, vb_hi);
        let ones = _mm256_set1_epi16(1);
        sum = _mm256_add_epi32(sum, _mm256_madd_epi16(prod_lo, ones));
        sum = _mm256_add_epi32(sum, _mm256_madd_epi16(prod_hi, ones));
        i += 32;
    }
    let mut tmp = [0i32; 8];
    _mm256_storeu_si256(tmp.as_mut_ptr() as *mut __m256i, sum);
    let mut acc = tmp.iter().sum::<i32>();
    while i < a.len() {
        acc += (a[i] as i32) * (b[i] as i32);
        i += 1;
    }
    acc
}
