use crate::io;
use crate::vector::VectorError;
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;
use xxhash_rust::xxh64::xxh64;

pub const SPARSE_ROWS_FILE: &str = "sparse_retrieval_row_base.bin";

/// Stable hash of a user term string.
pub type TermKey = u64;
/// Dense term id assigned by the dictionary, never reassigned.
pub type TermId = u32;

pub fn hash_term(term: &str) -> TermKey {
    xxh64(term.as_bytes(), 0)
}

/// CSR-compressed sparse rows: `offsets[0] = 0`, row i spans
/// `flat[offsets[i]..offsets[i+1]]`, indices sorted ascending within a row.
#[derive(Debug, Clone)]
pub struct SparseRows {
    flat_indices: Vec<TermId>,
    flat_values: Vec<f32>,
    offsets: Vec<usize>,
}

impl Default for SparseRows {
    fn default() -> Self {
        Self {
            flat_indices: Vec::new(),
            flat_values: Vec::new(),
            offsets: vec![0],
        }
    }
}

impl SparseRows {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rows(&self) -> usize {
        self.offsets.len() - 1
    }

    pub fn entries(&self) -> usize {
        *self.offsets.last().expect("offsets never empty")
    }

    pub fn append(&mut self, indices: &[TermId], values: &[f32]) -> Result<(), VectorError> {
        if indices.len() != values.len() {
            return Err(VectorError::SparseLengthMismatch {
                terms: indices.len(),
                values: values.len(),
            });
        }
        self.flat_indices.extend_from_slice(indices);
        self.flat_values.extend_from_slice(values);
        self.offsets.push(self.flat_indices.len());
        Ok(())
    }

    /// In-place replace on equal length; otherwise shift the tail and adjust
    /// every subsequent offset by the length delta.
    pub fn update(
        &mut self,
        row: usize,
        indices: &[TermId],
        values: &[f32],
    ) -> Result<(), VectorError> {
        if row >= self.rows() {
            return Err(VectorError::SparseRowOutOfBounds { row });
        }
        if indices.len() != values.len() {
            return Err(VectorError::SparseLengthMismatch {
                terms: indices.len(),
                values: values.len(),
            });
        }
        let start = self.offsets[row];
        let end = self.offsets[row + 1];
        let old_len = end - start;
        let new_len = indices.len();

        if new_len == old_len {
            self.flat_indices[start..end].copy_from_slice(indices);
            self.flat_values[start..end].copy_from_slice(values);
            return Ok(());
        }
        self.flat_indices.splice(start..end, indices.iter().copied());
        self.flat_values.splice(start..end, values.iter().copied());
        let delta = new_len as isize - old_len as isize;
        for off in &mut self.offsets[row + 1..] {
            *off = (*off as isize + delta) as usize;
        }
        Ok(())
    }

    pub fn pop_back(&mut self) {
        if self.offsets.len() <= 1 {
            return;
        }
        let last_start = self.offsets[self.offsets.len() - 2];
        self.flat_indices.truncate(last_start);
        self.flat_values.truncate(last_start);
        self.offsets.pop();
    }

    /// Zero-copy slice pair for one row.
    pub fn view(&self, row: usize) -> (&[TermId], &[f32]) {
        let start = self.offsets[row];
        let end = self.offsets[row + 1];
        (&self.flat_indices[start..end], &self.flat_values[start..end])
    }

    pub fn get_row(&self, row: usize) -> (Vec<TermId>, Vec<f32>) {
        let (idx, vals) = self.view(row);
        (idx.to_vec(), vals.to_vec())
    }
}

/// Two-pointer merge over sorted index arrays accumulating the dot product.
pub fn dot_reduce(a_idx: &[TermId], a_val: &[f32], b_idx: &[TermId], b_val: &[f32]) -> f32 {
    let mut acc = 0.0f32;
    let (mut i, mut j) = (0usize, 0usize);
    while i < a_idx.len() && j < b_idx.len() {
        match a_idx[i].cmp(&b_idx[j]) {
            std::cmp::Ordering::Equal => {
                acc += a_val[i] * b_val[j];
                i += 1;
                j += 1;
            }
            std::cmp::Ordering::Less => i += 1,
            std::cmp::Ordering::Greater => j += 1,
        }
    }
    acc
}

/// Squared L2: matching indices contribute `(a-b)²`, unmatched ones their
/// squares from either side.
pub fn squared_l2_reduce(a_idx: &[TermId], a_val: &[f32], b_idx: &[TermId], b_val: &[f32]) -> f32 {
    let mut acc = 0.0f32;
    let (mut i, mut j) = (0usize, 0usize);
    while i < a_idx.len() && j < b_idx.len() {
        match a_idx[i].cmp(&b_idx[j]) {
            std::cmp::Ordering::Equal => {
                let d = a_val[i] - b_val[j];
                acc += d * d;
                i += 1;
                j += 1;
            }
            std::cmp::Ordering::Less => {
                acc += a_val[i] * a_val[i];
                i += 1;
            }
            std::cmp::Ordering::Greater => {
                acc += b_val[j] * b_val[j];
                j += 1;
            }
        }
    }
    while i < a_idx.len() {
        acc += a_val[i] * a_val[i];
        i += 1;
    }
    while j < b_idx.len() {
        acc += b_val[j] * b_val[j];
        j += 1;
    }
    acc
}

/// Sparse retrieval head: the global term dictionary, the CSR rows and the
/// reduction the configured space uses.
#[derive(Debug)]
pub struct SparseHead {
    term_ids: HashMap<TermKey, TermId>,
    terms: Vec<TermKey>,
    rows: SparseRows,
    use_l2: bool,
}

impl SparseHead {
    pub fn new(use_l2: bool) -> Self {
        Self {
            term_ids: HashMap::new(),
            terms: Vec::new(),
            rows: SparseRows::new(),
            use_l2,
        }
    }

    pub fn rows(&self) -> usize {
        self.rows.rows()
    }

    pub fn term_count(&self) -> usize {
        self.terms.len()
    }

    fn term_id_or_insert(&mut self, key: TermKey) -> TermId {
        match self.term_ids.get(&key) {
            Some(id) => *id,
            None => {
                let id = self.terms.len() as TermId;
                self.terms.push(key);
                self.term_ids.insert(key, id);
                id
            }
        }
    }

    /// Hashes the raw terms, sums duplicate contributions, assigns ids to
    /// unseen terms, and returns the (id, value) pairs sorted by id.
    pub fn index_record(
        &mut self,
        raw_terms: &[String],
        values: &[f32],
    ) -> Result<(Vec<TermId>, Vec<f32>), VectorError> {
        if raw_terms.len() != values.len() {
            return Err(VectorError::SparseLengthMismatch {
                terms: raw_terms.len(),
                values: values.len(),
            });
        }
        let mut by_id: HashMap<TermId, f32> = HashMap::with_capacity(raw_terms.len());
        for (term, &val) in raw_terms.iter().zip(values) {
            let id = self.term_id_or_insert(hash_term(term));
            *by_id.entry(id).or_insert(0.0) += val;
        }
        let mut pairs: Vec<(TermId, f32)> = by_id.into_iter().collect();
        pairs.sort_unstable_by_key(|(id, _)| *id);
        let ids = pairs.iter().map(|(id, _)| *id).collect();
        let vals = pairs.iter().map(|(_, v)| *v).collect();
        Ok((ids, vals))
    }

    /// Query-side transform: lookup only, unknown terms resolve to misses.
    pub fn lookup_query(
        &self,
        raw_terms: &[String],
        values: &[f32],
    ) -> Result<(Vec<TermId>, Vec<f32>), VectorError> {
        if raw_terms.len() != values.len() {
            return Err(VectorError::SparseLengthMismatch {
                terms: raw_terms.len(),
                values: values.len(),
            });
        }
        let mut by_id: HashMap<TermId, f32> = HashMap::with_capacity(raw_terms.len());
        for (term, &val) in raw_terms.iter().zip(values) {
            if let Some(id) = self.term_ids.get(&hash_term(term)) {
                *by_id.entry(*id).or_insert(0.0) += val;
            }
        }
        let mut pairs: Vec<(TermId, f32)> = by_id.into_iter().collect();
        pairs.sort_unstable_by_key(|(id, _)| *id);
        let ids = pairs.iter().map(|(id, _)| *id).collect();
        let vals = pairs.iter().map(|(_, v)| *v).collect();
        Ok((ids, vals))
    }

    pub fn append_record(
        &mut self,
        raw_terms: &[String],
        values: &[f32],
    ) -> Result<(), VectorError> {
        let (ids, vals) = self.index_record(raw_terms, values)?;
        self.rows.append(&ids, &vals)
    }

    pub fn append_empty(&mut self) -> Result<(), VectorError> {
        self.rows.append(&[], &[])
    }

    pub fn update_record(
        &mut self,
        row: usize,
        raw_terms: &[String],
        values: &[f32],
    ) -> Result<(), VectorError> {
        let (ids, vals) = self.index_record(raw_terms, values)?;
        self.rows.update(row, &ids, &vals)
    }

    /// Overwrites `row` with the last row's content and drops the tail, the
    /// sparse half of the dense store's swap-with-last delete.
    pub fn swap_remove(&mut self, row: usize) -> Result<(), VectorError> {
        let last = self.rows.rows().saturating_sub(1);
        if row != last {
            let (ids, vals) = self.rows.get_row(last);
            self.rows.update(row, &ids, &vals)?;
        }
        self.rows.pop_back();
        Ok(())
    }

    /// Raw sparse score between a transformed query and a stored row.
    pub fn score(&self, query_ids: &[TermId], query_vals: &[f32], row: usize) -> f32 {
        let (row_ids, row_vals) = self.rows.view(row);
        if self.use_l2 {
            squared_l2_reduce(query_ids, query_vals, row_ids, row_vals)
        } else {
            dot_reduce(query_ids, query_vals, row_ids, row_vals)
        }
    }

    pub fn save(&self, dir: &Path) -> Result<(), VectorError> {
        let path = dir.join(SPARSE_ROWS_FILE);
        let file = File::create(&path)?;
        let mut w = BufWriter::new(file);
        let rows = self.rows.rows() as u64;
        let cols = self.terms.len() as u64;
        let avg_entries = if rows > 0 {
            self.rows.entries() as u64 / rows + 1
        } else {
            50
        };
        io::write_u64(&mut w, rows)?;
        io::write_u64(&mut w, cols)?;
        io::write_u64(&mut w, avg_entries)?;
        for key in &self.terms {
            io::write_u64(&mut w, *key)?;
        }
        for row in 0..self.rows.rows() {
            io::write_u32(&mut w, row as u32)?;
            let (ids, vals) = self.rows.view(row);
            io::write_u32(&mut w, ids.len() as u32)?;
            for id in ids {
                io::write_u32(&mut w, *id)?;
            }
            for val in vals {
                io::write_f32(&mut w, *val)?;
            }
        }
        w.flush()?;
        Ok(())
    }

    pub fn load(&mut self, dir: &Path) -> Result<(), VectorError> {
        let path = dir.join(SPARSE_ROWS_FILE);
        let file = File::open(&path)?;
        let mut r = BufReader::new(file);
        let rows = io::read_u64(&mut r)?;
        let cols = io::read_u64(&mut r)?;
        let _avg_entries = io::read_u64(&mut r)?;

        self.term_ids.clear();
        self.terms.clear();
        self.rows = SparseRows::new();
        for id in 0..cols {
            let key = io::read_u64(&mut r)?;
            if self.term_ids.insert(key, id as TermId).is_some() {
                return Err(VectorError::Corrupt(format!(
                    "duplicate term key {key:#x} in sparse rows"
                )));
            }
            self.terms.push(key);
        }
        for row in 0..rows {
            let idx = io::read_u32(&mut r)?;
            if idx as u64 != row {
                return Err(VectorError::Corrupt(format!(
                    "sparse row index {idx} does not match position {row}"
                )));
            }
            let entries = io::read_u32(&mut r)? as u64;
            if entries > cols {
                return Err(VectorError::Corrupt(format!(
                    "sparse row {row} has {entries} entries but only {cols} terms exist"
                )));
            }
            let mut ids = Vec::with_capacity(entries as usize);
            for _ in 0..entries {
                ids.push(io::read_u32(&mut r)?);
            }
            let mut vals = Vec::with_capacity(entries as usize);
            for _ in 0..entries {
                vals.push(io::read_f32(&mut r)?);
            }
            self.rows.append(&ids, &vals)?;
        }
        Ok(())
    }
}
