use crate::io;
use crate::scalar::bitmap::Bitmap;
use crate::scalar::ScalarError;
use std::io::{Read, Write};

/// Target slot length; a slot splits once it exceeds twice this.
pub(crate) const SLOT_SIZE: usize = 10_000;
/// Oversizing factor for the multi-condition candidate bucket.
const SORT_MULTIPLIER: usize = 2;
/// Score reported for offsets outside the map, kept comparable.
pub(crate) const ABSENT_SCORE: f64 = -99_999_999.0;

/// Offsets admitted by a filter predicate; `None` admits everything.
pub type OffsetFilter<'a> = Option<&'a dyn Fn(u32) -> bool>;

#[derive(Debug, Default, Clone)]
pub struct TopK {
    pub offsets: Vec<u32>,
    pub scores: Vec<f32>,
}

#[derive(Debug, Clone)]
struct Slot {
    left: f64,
    right: f64,
    bitmap: Bitmap,
    values: Vec<f64>,
    offsets: Vec<u32>,
}

impl Slot {
    fn singleton(offset: u32, value: f64) -> Self {
        let mut bitmap = Bitmap::new();
        bitmap.set(offset);
        Self {
            left: value,
            right: value,
            bitmap,
            values: vec![value],
            offsets: vec![offset],
        }
    }

    fn lower_bound(&self, v: f64) -> usize {
        self.values.partition_point(|x| *x < v)
    }

    fn upper_bound(&self, v: f64) -> usize {
        self.values.partition_point(|x| *x <= v)
    }

    fn right_border(&self, lower_than: f64, include_le: bool) -> usize {
        if include_le {
            self.upper_bound(lower_than)
        } else {
            self.lower_bound(lower_than)
        }
    }

    fn left_border(&self, greater_than: f64, include_ge: bool) -> usize {
        if include_ge {
            self.lower_bound(greater_than)
        } else {
            self.upper_bound(greater_than)
        }
    }

    fn collect_lower(&self, to: &mut Bitmap, lower_than: f64, include_le: bool) -> u32 {
        let bound = self.right_border(lower_than, include_le);
        for &o in &self.offsets[..bound] {
            to.set(o);
        }
        bound as u32
    }

    fn collect_greater(&self, to: &mut Bitmap, greater_than: f64, include_ge: bool) -> u32 {
        let bound = self.left_border(greater_than, include_ge);
        for &o in &self.offsets[bound..] {
            to.set(o);
        }
        (self.offsets.len() - bound) as u32
    }

    fn collect_range(
        &self,
        to: &mut Bitmap,
        lower_than: f64,
        include_le: bool,
        greater_than: f64,
        include_ge: bool,
    ) -> u32 {
        let l = self.left_border(greater_than, include_ge);
        let r = self.right_border(lower_than, include_le);
        for &o in &self.offsets[l..r.max(l)] {
            to.set(o);
        }
        r.saturating_sub(l) as u32
    }

    /// Moves the upper half into `self`'s successor and returns it.
    fn split_half(&mut self) -> Slot {
        let split_idx = self.values.len() / 2;
        let values = self.values.split_off(split_idx);
        let offsets = self.offsets.split_off(split_idx);
        let mut bitmap = Bitmap::new();
        bitmap.set_many(&offsets);
        let new_slot = Slot {
            left: values[0],
            right: *values.last().expect("split keeps both halves non-empty"),
            bitmap,
            values,
            offsets,
        };
        self.bitmap.clear();
        self.bitmap.set_many(&self.offsets);
        self.right = *self.values.last().expect("split keeps both halves non-empty");
        new_slot
    }
}

/// Associative `offset -> f64` container sharded into value-sorted slots.
/// `offset_to_value` (NaN = absent) is the authoritative per-offset lookup;
/// the slots serve range, top-k and center-anchored queries.
#[derive(Debug, Default, Clone)]
pub struct RangedMap {
    offset_to_value: Vec<f64>,
    slots: Vec<Slot>,
}

impl RangedMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// One past the highest offset ever written, NaN holes included.
    pub fn len(&self) -> u32 {
        self.offset_to_value.len() as u32
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn value(&self, offset: u32) -> Option<f64> {
        match self.offset_to_value.get(offset as usize) {
            Some(v) if !v.is_nan() => Some(*v),
            _ => None,
        }
    }

    /// Raw score for sort comparators; out-of-range offsets get a sentinel
    /// that orders below any real value.
    pub fn score_or_absent(&self, offset: u32) -> f64 {
        self.offset_to_value
            .get(offset as usize)
            .copied()
            .unwrap_or(ABSENT_SCORE)
    }

    pub fn add(&mut self, offset: u32, value: f64) -> Result<(), ScalarError> {
        let idx = offset as usize;
        if idx < self.offset_to_value.len() && !self.offset_to_value[idx].is_nan() {
            return Err(ScalarError::DuplicateRangeAdd { offset });
        }
        if idx >= self.offset_to_value.len() {
            self.offset_to_value.resize(idx + 1, f64::NAN);
        }
        self.offset_to_value[idx] = value;

        if self.slots.is_empty() {
            self.slots.push(Slot::singleton(offset, value));
            return Ok(());
        }

        let slot_idx = self.find_right_slot_index(value, true).max(0) as usize;
        let slot = &mut self.slots[slot_idx];
        slot.bitmap.set(offset);
        let at = slot.upper_bound(value);
        slot.values.insert(at, value);
        slot.offsets.insert(at, offset);
        slot.left = slot.left.min(value);
        slot.right = slot.right.max(value);

        if slot.values.len() > SLOT_SIZE * 2 {
            let new_slot = slot.split_half();
            self.slots.insert(slot_idx + 1, new_slot);
        }
        Ok(())
    }

    pub fn delete(&mut self, offset: u32) -> Result<(), ScalarError> {
        if self.slots.is_empty() {
            return Err(ScalarError::OffsetNotFound { offset });
        }
        let idx = offset as usize;
        if idx >= self.offset_to_value.len() || self.offset_to_value[idx].is_nan() {
            tracing::warn!(offset, size = self.offset_to_value.len(), "ranged map delete of absent offset");
            return Err(ScalarError::OffsetNotFound { offset });
        }
        let value = self.offset_to_value[idx];
        self.offset_to_value[idx] = f64::NAN;

        let mut slot_idx = self.find_left_slot_index(value, true).max(0) as usize;
        while slot_idx < self.slots.len() && !self.slots[slot_idx].bitmap.is_set(offset) {
            slot_idx += 1;
        }
        if slot_idx >= self.slots.len() {
            tracing::warn!(offset, value, "ranged map delete found no slot holding the offset");
            return Err(ScalarError::OffsetNotFound { offset });
        }

        let slot = &mut self.slots[slot_idx];
        slot.bitmap.unset(offset);
        let mut at = slot.lower_bound(value);
        while at < slot.offsets.len() && slot.offsets[at] != offset {
            at += 1;
        }
        if at >= slot.offsets.len() {
            return Err(ScalarError::OffsetNotFound { offset });
        }
        slot.offsets.remove(at);
        slot.values.remove(at);
        if slot.values.is_empty() {
            self.slots.remove(slot_idx);
        } else {
            slot.left = slot.values[0];
            slot.right = *slot.values.last().expect("non-empty");
        }
        Ok(())
    }

    /// Offsets whose value lies inside the described interval, or outside it
    /// when `range_out`. `None` means no offset matched.
    pub fn range_bitmap(
        &self,
        range_out: bool,
        lower_than: f64,
        include_le: bool,
        greater_than: f64,
        include_ge: bool,
    ) -> Option<Bitmap> {
        if self.slots.is_empty() {
            return None;
        }
        let (mut lower_than, mut include_le, mut greater_than, mut include_ge) =
            (lower_than, include_le, greater_than, include_ge);
        if range_out && lower_than < greater_than {
            std::mem::swap(&mut lower_than, &mut greater_than);
            std::mem::swap(&mut include_le, &mut include_ge);
        }

        let r_index = self.find_right_slot_index(lower_than, include_le);
        let l_index = self.find_left_slot_index(greater_than, include_ge);
        let slot_count = self.slots.len() as isize;

        let mut out = Bitmap::new();
        let mut cnt: u32 = 0;
        if !range_out {
            let mut i = l_index + 1;
            while i < r_index {
                out.union(&self.slots[i as usize].bitmap);
                cnt += self.slots[i as usize].offsets.len() as u32;
                i += 1;
            }
            if r_index != -1 && l_index != slot_count {
                if l_index < r_index {
                    cnt += self.slots[r_index as usize].collect_lower(&mut out, lower_than, include_le);
                    cnt += self.slots[l_index as usize].collect_greater(&mut out, greater_than, include_ge);
                } else if l_index == r_index {
                    cnt += self.slots[r_index as usize].collect_range(
                        &mut out,
                        lower_than,
                        include_le,
                        greater_than,
                        include_ge,
                    );
                }
            }
        } else {
            for i in 0..l_index.max(0) {
                out.union(&self.slots[i as usize].bitmap);
                cnt += self.slots[i as usize].offsets.len() as u32;
            }
            if l_index != slot_count {
                cnt += self.slots[l_index as usize].collect_lower(&mut out, greater_than, !include_ge);
            }
            let mut i = r_index + 1;
            while i < slot_count {
                out.union(&self.slots[i as usize].bitmap);
                cnt += self.slots[i as usize].offsets.len() as u32;
                i += 1;
            }
            if r_index != -1 && r_index != slot_count {
                cnt += self.slots[r_index as usize].collect_greater(&mut out, lower_than, !include_le);
            }
        }

        if cnt == 0 {
            None
        } else {
            Some(out)
        }
    }

    /// Up to k offsets scanned in value order, skipping offsets the filter
    /// rejects.
    pub fn top_k(&self, topk: usize, order_asc: bool, admit: OffsetFilter<'_>) -> TopK {
        let mut out = TopK::default();
        out.offsets.reserve(topk.min(1024));
        out.scores.reserve(topk.min(1024));
        let mut cnt = 0usize;
        if order_asc {
            'outer: for slot in &self.slots {
                for (i, &o) in slot.offsets.iter().enumerate() {
                    if let Some(f) = admit {
                        if !f(o) {
                            continue;
                        }
                    }
                    out.scores.push(slot.values[i] as f32);
                    out.offsets.push(o);
                    cnt += 1;
                    if cnt >= topk {
                        break 'outer;
                    }
                }
            }
        } else {
            'outer_desc: for slot in self.slots.iter().rev() {
                for (i, &o) in slot.offsets.iter().enumerate().rev() {
                    if let Some(f) = admit {
                        if !f(o) {
                            continue;
                        }
                    }
                    out.scores.push(slot.values[i] as f32);
                    out.offsets.push(o);
                    cnt += 1;
                    if cnt >= topk {
                        break 'outer_desc;
                    }
                }
            }
        }
        out
    }

    /// Up to k offsets ordered by |value - center|, ties by increasing value.
    /// Ascending distance only.
    pub fn top_k_center1d(&self, topk: usize, center: f64, admit: OffsetFilter<'_>) -> TopK {
        let mut out = TopK::default();
        if self.slots.is_empty() {
            return out;
        }
        let slot_count = self.slots.len() as isize;
        let mut cnt = 0usize;

        // Backward cursor (slot_l, off_l) and forward cursor (slot_r, off_r)
        // around the run of values equal to center.
        let (mut slot_l, mut off_l, mut slot_r, mut off_r): (isize, isize, isize, isize);
        if self.slots[0].values[0] > center {
            slot_l = -1;
            off_l = 0;
            slot_r = 0;
            off_r = 0;
        } else if self.slots[slot_count as usize - 1]
            .values
            .last()
            .copied()
            .expect("slots hold at least one value")
            < center
        {
            slot_l = slot_count;
            off_l = 0;
            slot_r = slot_count;
            off_r = 0;
        } else {
            let mut sl = 0isize;
            while sl < slot_count {
                if *self.slots[sl as usize].values.last().expect("non-empty") >= center {
                    break;
                }
                sl += 1;
            }
            slot_l = sl;
            off_l = self.slots[sl as usize].lower_bound(center) as isize;
            let mut sr = slot_count - 1;
            while sr >= 0 {
                if *self.slots[sr as usize].values.last().expect("non-empty") <= center {
                    break;
                }
                sr -= 1;
            }
            slot_r = sr + 1;
            off_r = if slot_r == slot_count {
                0
            } else {
                self.slots[slot_r as usize].upper_bound(center) as isize
            };
        }

        // Values equal to center first.
        if slot_l != -1 {
            let (mut si, mut oi) = (slot_l, off_l);
            while (si < slot_r || (si == slot_r && oi < off_r)) && cnt < topk {
                let slot = &self.slots[si as usize];
                let o = slot.offsets[oi as usize];
                if admit.map_or(true, |f| f(o)) {
                    out.scores.push(slot.values[oi as usize] as f32);
                    out.offsets.push(o);
                    cnt += 1;
                }
                oi += 1;
                if oi == slot.offsets.len() as isize {
                    si += 1;
                    oi = 0;
                }
            }
            self.step_back(&mut slot_l, &mut off_l);
        }

        // Expand outward, nearer side first.
        while cnt < topk && (slot_l != -1 || slot_r != slot_count) {
            if let Some(f) = admit {
                while slot_l != -1 && !f(self.slots[slot_l as usize].offsets[off_l as usize]) {
                    self.step_back(&mut slot_l, &mut off_l);
                }
                while slot_r != slot_count && !f(self.slots[slot_r as usize].offsets[off_r as usize]) {
                    self.step_forward(&mut slot_r, &mut off_r);
                }
            }
            if slot_l == -1 && slot_r == slot_count {
                break;
            }
            let take_left = if slot_l != -1 && slot_r != slot_count {
                let vl = self.slots[slot_l as usize].values[off_l as usize];
                let vr = self.slots[slot_r as usize].values[off_r as usize];
                (center - vl).abs() <= (vr - center).abs()
            } else {
                slot_l != -1
            };
            if take_left {
                let slot = &self.slots[slot_l as usize];
                out.scores.push(slot.values[off_l as usize] as f32);
                out.offsets.push(slot.offsets[off_l as usize]);
                self.step_back(&mut slot_l, &mut off_l);
            } else {
                let slot = &self.slots[slot_r as usize];
                out.scores.push(slot.values[off_r as usize] as f32);
                out.offsets.push(slot.offsets[off_r as usize]);
                self.step_forward(&mut slot_r, &mut off_r);
            }
            cnt += 1;
        }
        out
    }

    /// Top-k by this map's value with multi-field tie-breaking: an oversized
    /// bucket is collected by the primary key (equal-value overflow past k is
    /// allowed), then sorted lexicographically by (primary, conditions...).
    pub fn top_k_with_conditions(
        &self,
        topk: usize,
        order_asc: bool,
        admit: OffsetFilter<'_>,
        conditions: &[(&RangedMap, bool)],
    ) -> TopK {
        let max_size = topk.saturating_mul(SORT_MULTIPLIER).max(1);
        let mut bucket: Vec<u32> = Vec::with_capacity(max_size);
        let mut cnt = 0usize;
        let mut last_score = 0.0f64;

        let slot_iter: Box<dyn Iterator<Item = &Slot>> = if order_asc {
            Box::new(self.slots.iter())
        } else {
            Box::new(self.slots.iter().rev())
        };
        'outer: for slot in slot_iter {
            let idx_iter: Box<dyn Iterator<Item = usize>> = if order_asc {
                Box::new(0..slot.offsets.len())
            } else {
                Box::new((0..slot.offsets.len()).rev())
            };
            for i in idx_iter {
                let o = slot.offsets[i];
                if let Some(f) = admit {
                    if !f(o) {
                        continue;
                    }
                }
                let this_score = slot.values[i];
                bucket.push(o);
                cnt += 1;
                if cnt >= max_size {
                    break 'outer;
                }
                if cnt > topk.max(1) && last_score != this_score {
                    break 'outer;
                }
                last_score = this_score;
            }
        }
        self.sort_with_conditions(bucket, topk, order_asc, conditions)
    }

    fn sort_with_conditions(
        &self,
        mut offsets: Vec<u32>,
        topk: usize,
        order_asc: bool,
        conditions: &[(&RangedMap, bool)],
    ) -> TopK {
        offsets.sort_by(|&a, &b| {
            let (va, vb) = (self.score_or_absent(a), self.score_or_absent(b));
            if va != vb {
                let ord = va.partial_cmp(&vb).unwrap_or(std::cmp::Ordering::Equal);
                return if order_asc { ord } else { ord.reverse() };
            }
            for (map, asc) in conditions {
                let (ca, cb) = (map.score_or_absent(a), map.score_or_absent(b));
                if ca != cb {
                    let ord = ca.partial_cmp(&cb).unwrap_or(std::cmp::Ordering::Equal);
                    return if *asc { ord } else { ord.reverse() };
                }
            }
            std::cmp::Ordering::Equal
        });
        offsets.truncate(topk);
        let scores = offsets
            .iter()
            .map(|&o| self.score_or_absent(o) as f32)
            .collect();
        TopK { offsets, scores }
    }

    fn step_back(&self, slot: &mut isize, off: &mut isize) {
        *off -= 1;
        if *off == -1 {
            *slot -= 1;
            if *slot != -1 {
                *off = self.slots[*slot as usize].offsets.len() as isize - 1;
            }
        }
    }

    fn step_forward(&self, slot: &mut isize, off: &mut isize) {
        *off += 1;
        if *off == self.slots[*slot as usize].offsets.len() as isize {
            *slot += 1;
            *off = 0;
        }
    }

    /// Index of the slot whose interval holds `val` when searching from the
    /// right; -1 when every slot lies above it.
    fn find_right_slot_index(&self, lower_than: f64, include_le: bool) -> isize {
        let mut slot_idx = if include_le {
            self.slot_upper_bound_idx(lower_than)
        } else {
            self.slot_lower_bound_idx(lower_than)
        };
        slot_idx = slot_idx.min(self.slots.len() as isize - 1);
        let boundary = self.slots[slot_idx as usize].left;
        let below = if include_le {
            lower_than < boundary
        } else {
            lower_than <= boundary
        };
        if below {
            slot_idx -= 1;
        }
        slot_idx
    }

    /// Index of the first slot that can hold `val`; `slots.len()` when every
    /// slot lies below it.
    fn find_left_slot_index(&self, greater_than: f64, include_ge: bool) -> isize {
        if include_ge {
            self.slot_lower_bound_idx(greater_than)
        } else {
            self.slot_upper_bound_idx(greater_than)
        }
    }

    fn slot_lower_bound_idx(&self, val: f64) -> isize {
        let (mut l, mut r) = (0isize, self.slots.len() as isize);
        while l < r {
            let mid = l + (r - l) / 2;
            let slot = &self.slots[mid as usize];
            if val > slot.right {
                l = mid + 1;
            } else if val <= slot.left {
                r = mid;
            } else {
                return mid;
            }
        }
        l
    }

    fn slot_upper_bound_idx(&self, val: f64) -> isize {
        let (mut l, mut r) = (0isize, self.slots.len() as isize);
        while l < r {
            let mid = l + (r - l) / 2;
            let slot = &self.slots[mid as usize];
            if val >= slot.right {
                l = mid + 1;
            } else if val < slot.left {
                r = mid;
            } else {
                return mid;
            }
        }
        l
    }

    pub fn serialize_into<W: Write>(&self, w: &mut W) -> std::io::Result<()> {
        io::write_u32(w, self.slots.len() as u32)?;
        for slot in &self.slots {
            io::write_f64(w, slot.left)?;
            io::write_f64(w, slot.right)?;
            io::write_str(w, &slot.bitmap.serialize())?;
            io::write_u32(w, slot.values.len() as u32)?;
            for v in &slot.values {
                io::write_f64(w, *v)?;
            }
            io::write_u32(w, slot.offsets.len() as u32)?;
            for o in &slot.offsets {
                io::write_u32(w, *o)?;
            }
        }
        io::write_u32(w, self.offset_to_value.len() as u32)?;
        for v in &self.offset_to_value {
            io::write_f64(w, *v)?;
        }
        Ok(())
    }

    pub fn deserialize_from<R: Read>(r: &mut R) -> std::io::Result<Self> {
        let slot_count = io::read_u32(r)? as usize;
        let mut slots = Vec::with_capacity(slot_count);
        for _ in 0..slot_count {
            let left = io::read_f64(r)?;
            let right = io::read_f64(r)?;
            let blob = io::read_str(r)?;
            let bitmap = Bitmap::deserialize(&blob)?;
            let value_count = io::read_u32(r)? as usize;
            let mut values = Vec::with_capacity(value_count);
            for _ in 0..value_count {
                values.push(io::read_f64(r)?);
            }
            let offset_count = io::read_u32(r)? as usize;
            let mut offsets = Vec::with_capacity(offset_count);
            for _ in 0..offset_count {
                offsets.push(io::read_u32(r)?);
            }
            slots.push(Slot {
                left,
                right,
                bitmap,
                values,
                offsets,
            });
        }
        let len = io::read_u32(r)? as usize;
        let mut offset_to_value = Vec::with_capacity(len);
        for _ in 0..len {
            offset_to_value.push(io::read_f64(r)?);
        }
        Ok(Self {
            offset_to_value,
            slots,
        })
    }

    #[cfg(test)]
    fn check_invariants(&self) {
        for slot in &self.slots {
            assert_eq!(slot.values.len(), slot.offsets.len());
            assert!(slot.values.windows(2).all(|w| w[0] <= w[1]));
            assert_eq!(slot.bitmap.cardinality() as usize, slot.offsets.len());
            for (&o, &v) in slot.offsets.iter().zip(&slot.values) {
                assert!(slot.bitmap.is_set(o));
                assert_eq!(self.offset_to_value[o as usize], v);
            }
        }
        for w in self.slots.windows(2) {
            assert!(w[0].left <= w[1].left);
        }
    }
}

/// Squared-Euclidean radius filter over a pair of 1-D maps.
pub struct RangedMap2d<'a> {
    x: &'a RangedMap,
    y: &'a RangedMap,
}

impl<'a> RangedMap2d<'a> {
    pub fn new(x: &'a RangedMap, y: &'a RangedMap) -> Self {
        Self { x, y }
    }

    fn dist_square_to(&self, x: f64, y: f64, offset: u32) -> f64 {
        let dx = self.x.offset_to_value[offset as usize] - x;
        let dy = self.y.offset_to_value[offset as usize] - y;
        dx * dx + dy * dy
    }

    pub fn range2d_bitmap(&self, x: f64, y: f64, radius: f64) -> Option<Bitmap> {
        if radius <= 0.0 {
            return None;
        }
        let mut hits = self
            .x
            .range_bitmap(false, x + radius, true, x - radius, true)?;
        if hits.is_empty() {
            return None;
        }
        let on_y = self.y.range_bitmap(false, y + radius, true, y - radius, true)?;
        if on_y.is_empty() {
            return None;
        }
        hits.intersect(&on_y);

        let mut offsets = Vec::new();
        hits.get_set_list(&mut offsets);
        let r2 = radius * radius;
        for o in offsets {
            if self.dist_square_to(x, y, o) > r2 {
                hits.unset(o);
            }
        }
        if hits.cached_cardinality() == 0 {
            None
        } else {
            Some(hits)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, Rng, SeedableRng};
    use std::io::Cursor;

    fn naive_range(model: &[(u32, f64)], lt: f64, le: bool, gt: f64, ge: bool) -> Vec<u32> {
        let mut hits: Vec<u32> = model
            .iter()
            .filter(|(_, v)| {
                let above = if ge { *v >= gt } else { *v > gt };
                let below = if le { *v <= lt } else { *v < lt };
                above && below
            })
            .map(|(o, _)| *o)
            .collect();
        hits.sort_unstable();
        hits
    }

    fn collect(bm: Option<Bitmap>) -> Vec<u32> {
        let mut out = Vec::new();
        if let Some(b) = bm {
            b.get_set_list(&mut out);
        }
        out
    }

    #[test]
    fn duplicate_add_is_rejected() {
        let mut m = RangedMap::new();
        m.add(1, 0.5).unwrap();
        assert!(m.add(1, 0.6).is_err());
        m.delete(1).unwrap();
        m.add(1, 0.6).unwrap();
    }

    #[test]
    fn delete_absent_is_rejected() {
        let mut m = RangedMap::new();
        assert!(m.delete(0).is_err());
        m.add(0, 1.0).unwrap();
        assert!(m.delete(5).is_err());
    }

    #[test]
    fn invariants_under_random_ops() {
        let mut rng = StdRng::seed_from_u64(42);
        let mut m = RangedMap::new();
        let mut model: Vec<(u32, f64)> = Vec::new();
        for step in 0..4000u32 {
            if !model.is_empty() && rng.gen_bool(0.3) {
                let i = rng.gen_range(0..model.len());
                let (o, _) = model.swap_remove(i);
                m.delete(o).unwrap();
            } else {
                let v = rng.gen_range(-100.0..100.0);
                m.add(step, v).unwrap();
                model.push((step, v));
            }
            if step % 500 == 0 {
                m.check_invariants();
            }
        }
        m.check_invariants();
        for (o, v) in &model {
            assert_eq!(m.value(*o), Some(*v));
        }
    }

    #[test]
    fn range_bitmap_matches_naive() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut m = RangedMap::new();
        let mut model = Vec::new();
        for o in 0..3000u32 {
            let v = rng.gen_range(-50.0..50.0);
            m.add(o, v).unwrap();
            model.push((o, v));
        }
        for _ in 0..50 {
            let a = rng.gen_range(-60.0..60.0);
            let b = rng.gen_range(-60.0..60.0);
            let (gt, lt) = if a < b { (a, b) } else { (b, a) };
            let (le, ge) = (rng.gen_bool(0.5), rng.gen_bool(0.5));
            assert_eq!(
                collect(m.range_bitmap(false, lt, le, gt, ge)),
                naive_range(&model, lt, le, gt, ge),
                "lt={lt} le={le} gt={gt} ge={ge}"
            );
        }
    }

    #[test]
    fn range_out_complements_range() {
        let mut m = RangedMap::new();
        for o in 0..200u32 {
            m.add(o, o as f64).unwrap();
        }
        let inside = collect(m.range_bitmap(false, 150.0, true, 50.0, true));
        let outside = collect(m.range_bitmap(true, 150.0, true, 50.0, true));
        let mut all: Vec<u32> = inside.iter().chain(outside.iter()).copied().collect();
        all.sort_unstable();
        assert_eq!(all, (0..200).collect::<Vec<_>>());
        assert!(outside.iter().all(|&o| !(50..=150).contains(&o)));
    }

    #[test]
    fn range_out_swaps_inverted_bounds() {
        let mut m = RangedMap::new();
        for o in 0..100u32 {
            m.add(o, o as f64).unwrap();
        }
        // lower 20 < greater 80: bounds and inclusivity swap before eval.
        let a = collect(m.range_bitmap(true, 20.0, true, 80.0, false));
        let b = collect(m.range_bitmap(true, 80.0, false, 20.0, true));
        assert_eq!(a, b);
    }

    #[test]
    fn top_k_orders_and_filters() {
        let mut m = RangedMap::new();
        for o in 0..100u32 {
            m.add(o, (o % 10) as f64).unwrap();
        }
        let asc = m.top_k(5, true, None);
        assert_eq!(asc.scores, vec![0.0; 5]);
        let desc = m.top_k(3, false, None);
        assert_eq!(desc.scores, vec![9.0; 3]);

        let admit = |o: u32| o >= 50;
        let filtered = m.top_k(4, true, Some(&admit as &dyn Fn(u32) -> bool));
        assert!(filtered.offsets.iter().all(|&o| o >= 50));
        assert_eq!(filtered.scores, vec![0.0; 4]);
    }

    #[test]
    fn top_k_center1d_matches_naive() {
        let mut rng = StdRng::seed_from_u64(3);
        let mut m = RangedMap::new();
        let mut model = Vec::new();
        for o in 0..500u32 {
            let v = rng.gen_range(-10.0..10.0);
            m.add(o, v).unwrap();
            model.push(v);
        }
        for center in [-11.0, -3.2, 0.0, 4.7, 11.5] {
            let got = m.top_k_center1d(20, center, None);
            let mut expect: Vec<f64> = model.clone();
            expect.sort_by(|a, b| {
                ((a - center).abs(), *a)
                    .partial_cmp(&((b - center).abs(), *b))
                    .unwrap()
            });
            let expect: Vec<f32> = expect.into_iter().take(20).map(|v| v as f32).collect();
            assert_eq!(got.scores, expect, "center={center}");
        }
    }

    #[test]
    fn top_k_center1d_skips_filtered() {
        let mut m = RangedMap::new();
        for o in 0..10u32 {
            m.add(o, o as f64).unwrap();
        }
        let admit = |o: u32| o % 2 == 0;
        let got = m.top_k_center1d(3, 5.0, Some(&admit as &dyn Fn(u32) -> bool));
        assert_eq!(got.offsets, vec![4, 6, 2]);
    }

    #[test]
    fn conditions_break_ties() {
        let mut primary = RangedMap::new();
        let mut secondary = RangedMap::new();
        // primary all equal, secondary distinct
        for o in 0..6u32 {
            primary.add(o, 1.0).unwrap();
            secondary.add(o, (5 - o) as f64).unwrap();
        }
        let got = primary.top_k_with_conditions(3, true, None, &[(&secondary, true)]);
        assert_eq!(got.offsets, vec![5, 4, 3]);
        let got = primary.top_k_with_conditions(3, true, None, &[(&secondary, false)]);
        assert_eq!(got.offsets, vec![0, 1, 2]);
    }

    #[test]
    fn conditions_primary_dominates() {
        let mut primary = RangedMap::new();
        let mut secondary = RangedMap::new();
        for o in 0..20u32 {
            primary.add(o, (o / 2) as f64).unwrap();
            secondary.add(o, (o % 2) as f64).unwrap();
        }
        let got = primary.top_k_with_conditions(4, false, None, &[(&secondary, true)]);
        assert_eq!(got.offsets, vec![18, 19, 16, 17]);
    }

    #[test]
    fn slot_split_preserves_queries() {
        let mut m = RangedMap::new();
        let n = (SLOT_SIZE * 2 + 500) as u32;
        for o in 0..n {
            m.add(o, (o as f64) * 0.5).unwrap();
        }
        m.check_invariants();
        let hits = collect(m.range_bitmap(false, 10.0, true, 0.0, true));
        assert_eq!(hits, (0..=20).collect::<Vec<_>>());
    }

    #[test]
    fn serialize_round_trip() {
        let mut rng = StdRng::seed_from_u64(17);
        let mut m = RangedMap::new();
        for o in 0..1000u32 {
            m.add(o, rng.gen_range(-5.0..5.0)).unwrap();
        }
        m.delete(3).unwrap();
        m.delete(500).unwrap();
        let mut buf = Vec::new();
        m.serialize_into(&mut buf).unwrap();
        let decoded = RangedMap::deserialize_from(&mut Cursor::new(buf)).unwrap();
        decoded.check_invariants();
        assert_eq!(decoded.len(), m.len());
        for o in 0..1000u32 {
            assert_eq!(decoded.value(o), m.value(o));
        }
        assert_eq!(
            collect(decoded.range_bitmap(false, 1.0, true, -1.0, false)),
            collect(m.range_bitmap(false, 1.0, true, -1.0, false))
        );
    }

    #[test]
    fn radius_2d_prunes_corners() {
        let mut xs = RangedMap::new();
        let mut ys = RangedMap::new();
        // offsets on a grid: 0..25 → (x, y) in [0,5)²
        for o in 0..25u32 {
            xs.add(o, (o % 5) as f64).unwrap();
            ys.add(o, (o / 5) as f64).unwrap();
        }
        let map2d = RangedMap2d::new(&xs, &ys);
        let hits = collect(map2d.range2d_bitmap(2.0, 2.0, 1.0));
        // Only the plus-shape around (2,2) is within radius 1.
        assert_eq!(hits, vec![7, 11, 12, 13, 17]);
        assert!(map2d.range2d_bitmap(2.0, 2.0, 0.0).is_none());
    }
}
