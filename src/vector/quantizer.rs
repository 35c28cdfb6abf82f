use crate::vector::VectorError;

/// How dense vectors are stored inside a row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Quantization {
    /// Raw little-endian f32s.
    Float,
    /// Per-vector symmetric int8: `[i8 × dim][scale f32]`, plus the squared
    /// norm of the original vector when the space needs it (L2).
    Int8,
}

impl Quantization {
    pub fn from_type_str(s: &str) -> Option<Self> {
        match s {
            "float" => Some(Quantization::Float),
            "int8" => Some(Quantization::Int8),
            _ => None,
        }
    }
}

/// Encodes one dense vector into its row bytes.
#[derive(Debug, Clone)]
pub struct Quantizer {
    quantization: Quantization,
    dim: usize,
    store_norm: bool,
}

impl Quantizer {
    pub fn new(quantization: Quantization, dim: usize, store_norm: bool) -> Self {
        Self {
            quantization,
            dim,
            store_norm: store_norm && quantization == Quantization::Int8,
        }
    }

    pub fn encoded_size(&self) -> usize {
        match self.quantization {
            Quantization::Float => self.dim * 4,
            Quantization::Int8 => self.dim + 4 + if self.store_norm { 4 } else { 0 },
        }
    }

    pub fn encode(&self, vector: &[f32], out: &mut [u8]) -> Result<(), VectorError> {
        if vector.len() != self.dim {
            return Err(VectorError::DimMismatch {
                expected: self.dim,
                got: vector.len(),
            });
        }
        debug_assert_eq!(out.len(), self.encoded_size());
        match self.quantization {
            Quantization::Float => {
                for (chunk, v) in out.chunks_exact_mut(4).zip(vector) {
                    chunk.copy_from_slice(&v.to_le_bytes());
                }
            }
            Quantization::Int8 => {
                let mut max_abs = 0.0f32;
                for &x in vector {
                    max_abs = max_abs.max(x.abs());
                }
                let scale = if max_abs <= f32::EPSILON {
                    1.0
                } else {
                    max_abs / 127.0
                };
                for (slot, &x) in out[..self.dim].iter_mut().zip(vector) {
                    *slot = (x / scale).round().clamp(-127.0, 127.0) as i8 as u8;
                }
                out[self.dim..self.dim + 4].copy_from_slice(&scale.to_le_bytes());
                if self.store_norm {
                    let norm_sq: f32 = vector.iter().map(|x| x * x).sum();
                    out[self.dim + 4..self.dim + 8].copy_from_slice(&norm_sq.to_le_bytes());
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, Rng, SeedableRng};

    #[test]
    fn float_is_passthrough() {
        let q = Quantizer::new(Quantization::Float, 3, false);
        let mut out = vec![0u8; q.encoded_size()];
        q.encode(&[1.0, -2.5, 0.25], &mut out).unwrap();
        let decoded: Vec<f32> = out
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes(c.try_into().unwrap()))
            .collect();
        assert_eq!(decoded, vec![1.0, -2.5, 0.25]);
    }

    #[test]
    fn int8_layout_and_scale() {
        let q = Quantizer::new(Quantization::Int8, 4, true);
        assert_eq!(q.encoded_size(), 4 + 8);
        let v = [0.5f32, -1.0, 0.25, 1.0];
        let mut out = vec![0u8; q.encoded_size()];
        q.encode(&v, &mut out).unwrap();

        let scale = f32::from_le_bytes(out[4..8].try_into().unwrap());
        assert!((scale - 1.0 / 127.0).abs() < 1e-6);
        let norm = f32::from_le_bytes(out[8..12].try_into().unwrap());
        let expect_norm: f32 = v.iter().map(|x| x * x).sum();
        assert!((norm - expect_norm).abs() < 1e-6);

        let codes: Vec<i8> = out[..4].iter().map(|&b| b as i8).collect();
        for (code, x) in codes.iter().zip(&v) {
            assert!(((*code as f32) * scale - x).abs() <= scale);
        }
    }

    #[test]
    fn int8_reconstruction_error_is_small() {
        let mut rng = StdRng::seed_from_u64(99);
        let q = Quantizer::new(Quantization::Int8, 64, false);
        let v: Vec<f32> = (0..64).map(|_| rng.gen_range(-1.0..1.0)).collect();
        let mut out = vec![0u8; q.encoded_size()];
        q.encode(&v, &mut out).unwrap();
        let scale = f32::from_le_bytes(out[64..68].try_into().unwrap());
        for (i, x) in v.iter().enumerate() {
            let decoded = (out[i] as i8) as f32 * scale;
            assert!((decoded - x).abs() <= scale * 0.51 + 1e-6);
        }
    }

    #[test]
    fn zero_vector_keeps_unit_scale() {
        let q = Quantizer::new(Quantization::Int8, 3, false);
        let mut out = vec![0u8; q.encoded_size()];
        q.encode(&[0.0, 0.0, 0.0], &mut out).unwrap();
        let scale = f32::from_le_bytes(out[3..7].try_into().unwrap());
        assert_eq!(scale, 1.0);
    }

    #[test]
    fn wrong_dim_is_rejected() {
        let q = Quantizer::new(Quantization::Float, 4, false);
        let mut out = vec![0u8; q.encoded_size()];
        assert!(q.encode(&[1.0, 2.0], &mut out).is_err());
    }
}
