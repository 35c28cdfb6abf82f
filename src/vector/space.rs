use crate::vector::quantizer::Quantization;
use crate::vector::simd;

/// Distance family over encoded rows. L2 scores are raw distances and get
/// reversed to similarities by the caller; inner product scores are already
/// higher-is-better.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Distance {
    L2,
    Ip,
}

impl Distance {
    pub fn from_type_str(s: &str) -> Option<Self> {
        match s {
            "l2" => Some(Distance::L2),
            "ip" => Some(Distance::Ip),
            _ => None,
        }
    }

    pub fn reverses_score(self) -> bool {
        self == Distance::L2
    }
}

/// One raw-score function `d(a, b)` over two encoded rows of the same layout.
#[derive(Debug, Clone, Copy)]
pub struct Space {
    distance: Distance,
    quantization: Quantization,
    dim: usize,
}

#[inline]
fn as_i8(bytes: &[u8]) -> &[i8] {
    // i8 and u8 share size and alignment
    unsafe { std::slice::from_raw_parts(bytes.as_ptr() as *const i8, bytes.len()) }
}

#[inline]
fn meta_f32(bytes: &[u8], at: usize) -> f32 {
    f32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
}

impl Space {
    pub fn new(distance: Distance, quantization: Quantization, dim: usize) -> Self {
        Self {
            distance,
            quantization,
            dim,
        }
    }

    /// Raw score between two encoded vectors; int8 rows carry their scale
    /// (and, for L2, the squared norm of the original floats).
    pub fn raw_score(&self, a: &[u8], b: &[u8]) -> f32 {
        match (self.quantization, self.distance) {
            (Quantization::Float, Distance::Ip) => simd::dot_f32_le(a, b),
            (Quantization::Float, Distance::L2) => simd::l2_sq_f32_le(a, b),
            (Quantization::Int8, Distance::Ip) => {
                let ip = simd::dot_i8(as_i8(&a[..self.dim]), as_i8(&b[..self.dim]));
                let scale_a = meta_f32(a, self.dim);
                let scale_b = meta_f32(b, self.dim);
                ip as f32 * scale_a * scale_b
            }
            (Quantization::Int8, Distance::L2) => {
                let ip = simd::dot_i8(as_i8(&a[..self.dim]), as_i8(&b[..self.dim]));
                let scale_a = meta_f32(a, self.dim);
                let norm_a = meta_f32(a, self.dim + 4);
                let scale_b = meta_f32(b, self.dim);
                let norm_b = meta_f32(b, self.dim + 4);
                let real_ip = ip as f32 * scale_a * scale_b;
                (norm_a + norm_b - 2.0 * real_ip).max(0.0)
            }
        }
    }
}
