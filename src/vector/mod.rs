pub mod quantizer;
pub mod simd;
pub mod space;
pub mod sparse;

use crate::io;
use crate::meta::VectorIndexMeta;
use crate::scalar::bitmap::Bitmap;
use crate::scalar::field::LabelOffsetMap;
use parking_lot::RwLock;
use quantizer::{Quantization, Quantizer};
use space::{Distance, Space};
use sparse::SparseHead;
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;
use std::sync::Arc;

pub const FLAT_INDEX_FILE: &str = "index_flat.data";

const LABEL_BYTES: usize = 8;
const OFFSET_BYTES: usize = 4;

#[derive(Debug, thiserror::Error)]
pub enum VectorError {
    #[error("vector dimension mismatch: expected {expected}, got {got}")]
    DimMismatch { expected: usize, got: usize },
    #[error("unsupported distance type '{0}'")]
    UnsupportedDistance(String),
    #[error("unsupported quantization type '{0}'")]
    UnsupportedQuantization(String),
    #[error("sparse terms/values length mismatch: {terms} != {values}")]
    SparseLengthMismatch { terms: usize, values: usize },
    #[error("sparse row {row} out of bounds")]
    SparseRowOutOfBounds { row: usize },
    #[error("dense rows {dense} and sparse rows {sparse} diverged")]
    SparseDenseMismatch { dense: usize, sparse: usize },
    #[error("corrupt vector index: {0}")]
    Corrupt(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Row-packed brute-force dense store. A row is the encoded vector followed
/// by the u64 label and the u32 logical offset; deletes backfill the hole
/// with the last row so the buffer stays dense, while logical offsets keep
/// the scalar side's keys stable.
pub struct FlatIndex {
    dim: usize,
    distance: Distance,
    quantizer: Quantizer,
    space: Space,
    row_bytes: usize,
    vec_bytes: usize,
    buf: Vec<u8>,
    capacity: usize,
    count: usize,
    label_to_slot: HashMap<u64, usize>,
    offset_to_slot: HashMap<u32, usize>,
    next_logical_offset: u64,
    sparse: Option<SparseHead>,
    search_alpha: f32,
    label_offsets: Arc<LabelOffsetMap>,
}

struct ScoredHit {
    score: f32,
    label: u64,
}

impl PartialEq for ScoredHit {
    fn eq(&self, other: &Self) -> bool {
        self.score == other.score
    }
}
impl Eq for ScoredHit {}
impl PartialOrd for ScoredHit {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for ScoredHit {
    fn cmp(&self, other: &Self) -> Ordering {
        self.score
            .partial_cmp(&other.score)
            .unwrap_or(Ordering::Equal)
    }
}

impl FlatIndex {
    pub fn new(meta: &VectorIndexMeta) -> Result<Self, VectorError> {
        let distance = Distance::from_type_str(&meta.distance_type)
            .ok_or_else(|| VectorError::UnsupportedDistance(meta.distance_type.clone()))?;
        let quantization = Quantization::from_type_str(&meta.quantization_type)
            .ok_or_else(|| VectorError::UnsupportedQuantization(meta.quantization_type.clone()))?;
        let dim = meta.dimension;
        let quantizer = Quantizer::new(quantization, dim, distance == Distance::L2);
        let vec_bytes = quantizer.encoded_size();
        let row_bytes = vec_bytes + LABEL_BYTES + OFFSET_BYTES;
        let capacity = meta.max_element_count.max(1);
        let sparse = meta
            .enable_sparse
            .then(|| SparseHead::new(distance == Distance::L2));
        Ok(Self {
            dim,
            distance,
            quantizer,
            space: Space::new(distance, quantization, dim),
            row_bytes,
            vec_bytes,
            buf: vec![0u8; capacity * row_bytes],
            capacity,
            count: 0,
            label_to_slot: HashMap::new(),
            offset_to_slot: HashMap::new(),
            next_logical_offset: 0,
            sparse,
            search_alpha: meta.search_sparse_alpha,
            label_offsets: Arc::new(RwLock::new(HashMap::new())),
        })
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Shared label→offset view for the scalar side's `label_in` seam.
    pub fn label_offsets(&self) -> &Arc<LabelOffsetMap> {
        &self.label_offsets
    }

    fn row(&self, slot: usize) -> &[u8] {
        &self.buf[slot * self.row_bytes..(slot + 1) * self.row_bytes]
    }

    fn row_label(&self, slot: usize) -> u64 {
        let at = slot * self.row_bytes + self.vec_bytes;
        u64::from_le_bytes(self.buf[at..at + 8].try_into().expect("label slot"))
    }

    fn row_offset(&self, slot: usize) -> u32 {
        let at = slot * self.row_bytes + self.vec_bytes + LABEL_BYTES;
        u32::from_le_bytes(self.buf[at..at + 4].try_into().expect("offset slot"))
    }

    pub fn offset_by_label(&self, label: u64) -> Option<u32> {
        self.label_to_slot.get(&label).map(|&slot| self.row_offset(slot))
    }

    pub fn label_by_offset(&self, offset: u32) -> Option<u64> {
        self.offset_to_slot.get(&offset).map(|&slot| self.row_label(slot))
    }

    /// Adds or overwrites one record. A new label appends a row, allocates
    /// the next logical offset and keeps the sparse side's row count equal to
    /// the dense side's.
    pub fn add(
        &mut self,
        label: u64,
        vector: &[f32],
        sparse_terms: &[String],
        sparse_values: &[f32],
    ) -> Result<(), VectorError> {
        if vector.len() != self.dim {
            return Err(VectorError::DimMismatch {
                expected: self.dim,
                got: vector.len(),
            });
        }
        let has_sparse_payload = !sparse_terms.is_empty() || !sparse_values.is_empty();

        let slot = if let Some(&slot) = self.label_to_slot.get(&label) {
            if has_sparse_payload {
                if let Some(head) = &mut self.sparse {
                    head.update_record(slot, sparse_terms, sparse_values)?;
                }
            }
            slot
        } else {
            if let Some(head) = &mut self.sparse {
                if self.count != head.rows() {
                    return Err(VectorError::SparseDenseMismatch {
                        dense: self.count,
                        sparse: head.rows(),
                    });
                }
                if has_sparse_payload {
                    head.append_record(sparse_terms, sparse_values)?;
                } else {
                    head.append_empty()?;
                }
            }
            if self.count >= self.capacity {
                self.grow(self.count * 2 + 1);
            }
            let slot = self.count;
            let logical_offset = self.next_logical_offset as u32;
            self.next_logical_offset += 1;
            self.label_to_slot.insert(label, slot);
            self.offset_to_slot.insert(logical_offset, slot);
            self.label_offsets.write().insert(label, logical_offset);
            let at = slot * self.row_bytes + self.vec_bytes + LABEL_BYTES;
            self.buf[at..at + 4].copy_from_slice(&logical_offset.to_le_bytes());
            self.count += 1;
            slot
        };

        let start = slot * self.row_bytes;
        self.quantizer
            .encode(vector, &mut self.buf[start..start + self.vec_bytes])?;
        self.buf[start + self.vec_bytes..start + self.vec_bytes + LABEL_BYTES]
            .copy_from_slice(&label.to_le_bytes());
        Ok(())
    }

    /// Swap-with-last delete; returns false for an absent label.
    pub fn delete(&mut self, label: u64) -> Result<bool, VectorError> {
        let Some(slot) = self.label_to_slot.remove(&label) else {
            return Ok(false);
        };
        let removed_offset = self.row_offset(slot);
        self.offset_to_slot.remove(&removed_offset);
        self.label_offsets.write().remove(&label);

        let last = self.count - 1;
        if slot != last {
            let src = last * self.row_bytes;
            let dst = slot * self.row_bytes;
            self.buf.copy_within(src..src + self.row_bytes, dst);

            let moved_label = self.row_label(slot);
            let moved_offset = self.row_offset(slot);
            self.label_to_slot.insert(moved_label, slot);
            self.offset_to_slot.insert(moved_offset, slot);
        }
        if let Some(head) = &mut self.sparse {
            head.swap_remove(slot)?;
        }
        self.count -= 1;
        Ok(true)
    }

    /// Bitmap-filtered brute-force k-NN with dense/sparse score fusion.
    /// Results come back descending by combined score.
    pub fn search(
        &self,
        query: &[f32],
        k: usize,
        filter: Option<&Bitmap>,
        sparse_terms: &[String],
        sparse_values: &[f32],
    ) -> Result<(Vec<u64>, Vec<f32>), VectorError> {
        if query.len() != self.dim {
            return Err(VectorError::DimMismatch {
                expected: self.dim,
                got: query.len(),
            });
        }
        if k == 0 || self.count == 0 {
            return Ok((Vec::new(), Vec::new()));
        }
        let mut encoded = vec![0u8; self.vec_bytes];
        self.quantizer.encode(query, &mut encoded)?;

        let sparse_query = match &self.sparse {
            Some(head) if self.search_alpha > 0.0 && !sparse_terms.is_empty() => {
                Some(head.lookup_query(sparse_terms, sparse_values)?)
            }
            _ => None,
        };

        let mut heap: BinaryHeap<std::cmp::Reverse<ScoredHit>> =
            BinaryHeap::with_capacity(k + 1);
        let consider = |slot: usize, heap: &mut BinaryHeap<std::cmp::Reverse<ScoredHit>>| {
            let row = self.row(slot);
            let score = self.combined_score(&encoded, &row[..self.vec_bytes], slot, &sparse_query);
            let label = self.row_label(slot);
            if heap.len() < k {
                heap.push(std::cmp::Reverse(ScoredHit { score, label }));
            } else if score > heap.peek().expect("heap non-empty").0.score {
                heap.pop();
                heap.push(std::cmp::Reverse(ScoredHit { score, label }));
            }
        };

        match filter {
            None => {
                for slot in 0..self.count {
                    consider(slot, &mut heap);
                }
            }
            Some(bitmap) => {
                if bitmap.is_empty() {
                    return Ok((Vec::new(), Vec::new()));
                }
                let mut offsets = Vec::new();
                bitmap.get_set_list(&mut offsets);
                for offset in offsets {
                    let Some(&slot) = self.offset_to_slot.get(&offset) else {
                        continue;
                    };
                    consider(slot, &mut heap);
                }
            }
        }

        let sorted = heap.into_sorted_vec();
        let mut labels = Vec::with_capacity(sorted.len());
        let mut scores = Vec::with_capacity(sorted.len());
        for std::cmp::Reverse(hit) in sorted {
            labels.push(hit.label);
            scores.push(hit.score);
        }
        Ok((labels, scores))
    }

    fn combined_score(
        &self,
        query: &[u8],
        row_vec: &[u8],
        slot: usize,
        sparse_query: &Option<(Vec<u32>, Vec<f32>)>,
    ) -> f32 {
        let dense_raw = self.space.raw_score(query, row_vec);
        let dense = if self.distance.reverses_score() {
            1.0 - dense_raw
        } else {
            dense_raw
        };
        let (Some(head), Some((q_ids, q_vals))) = (&self.sparse, sparse_query) else {
            return dense;
        };
        let sparse_raw = head.score(q_ids, q_vals, slot);
        let sparse_score = if self.distance.reverses_score() {
            1.0 - sparse_raw
        } else {
            sparse_raw
        };
        dense * (1.0 - self.search_alpha) + sparse_score * self.search_alpha
    }

    fn grow(&mut self, new_capacity: usize) {
        self.buf.resize(new_capacity * self.row_bytes, 0);
        self.capacity = new_capacity;
    }

    pub fn save(&self, dir: &Path) -> Result<(), VectorError> {
        let path = dir.join(FLAT_INDEX_FILE);
        let file = File::create(&path)?;
        let mut w = BufWriter::new(file);
        io::write_u64(&mut w, self.capacity as u64)?;
        io::write_u64(&mut w, self.row_bytes as u64)?;
        io::write_u64(&mut w, self.count as u64)?;
        w.write_all(&self.buf[..self.capacity * self.row_bytes])?;
        io::write_u64(&mut w, self.next_logical_offset)?;
        w.flush()?;
        if let Some(head) = &self.sparse {
            head.save(dir)?;
        }
        Ok(())
    }

    pub fn load(&mut self, dir: &Path) -> Result<(), VectorError> {
        let path = dir.join(FLAT_INDEX_FILE);
        let file = File::open(&path)?;
        let mut r = BufReader::new(file);
        let capacity = io::read_u64(&mut r)? as usize;
        let row_bytes = io::read_u64(&mut r)? as usize;
        if row_bytes != self.row_bytes {
            return Err(VectorError::Corrupt(format!(
                "row size mismatch: file has {row_bytes}, index expects {}",
                self.row_bytes
            )));
        }
        self.count = io::read_u64(&mut r)? as usize;
        if self.count > capacity {
            return Err(VectorError::Corrupt(format!(
                "count {} exceeds capacity {capacity}",
                self.count
            )));
        }
        self.capacity = capacity.max(1);
        self.buf = vec![0u8; self.capacity * self.row_bytes];
        r.read_exact(&mut self.buf[..capacity * self.row_bytes])?;
        self.next_logical_offset = match io::read_u64(&mut r) {
            Ok(v) => v,
            Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => 0,
            Err(err) => return Err(err.into()),
        };
        self.rebuild_maps();
        if let Some(head) = &mut self.sparse {
            head.load(dir)?;
            if head.rows() != self.count {
                return Err(VectorError::SparseDenseMismatch {
                    dense: self.count,
                    sparse: head.rows(),
                });
            }
        }
        Ok(())
    }

    fn rebuild_maps(&mut self) {
        self.label_to_slot.clear();
        self.offset_to_slot.clear();
        let mut shared = self.label_offsets.write();
        shared.clear();
        let mut max_offset = 0u32;
        for slot in 0..self.count {
            let label = self.row_label(slot);
            let offset = self.row_offset(slot);
            self.label_to_slot.insert(label, slot);
            self.offset_to_slot.insert(offset, slot);
            shared.insert(label, offset);
            max_offset = max_offset.max(offset);
        }
        if self.count > 0 && self.next_logical_offset <= max_offset as u64 {
            self.next_logical_offset = max_offset as u64 + 1;
        }
    }
}
