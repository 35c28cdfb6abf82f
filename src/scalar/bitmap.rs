use roaring::RoaringBitmap;
use std::collections::BTreeSet;
use std::io;

/// Above this cardinality the set representation is promoted to roaring.
const SET_THRESHOLD: usize = 32;

/// Set of u32 offsets with a dual representation: an ordered set for small
/// cardinalities and a roaring bitmap otherwise. Promotion happens
/// automatically when a write crosses the threshold; demotion only on
/// deserialization. Callers observe a single set abstraction.
#[derive(Clone, Debug)]
pub struct Bitmap {
    repr: Repr,
    cached_len: Option<u32>,
}

#[derive(Clone, Debug)]
enum Repr {
    Small(BTreeSet<u32>),
    Roaring(RoaringBitmap),
}

impl Default for Bitmap {
    fn default() -> Self {
        Self::new()
    }
}

impl Bitmap {
    pub fn new() -> Self {
        Self {
            repr: Repr::Small(BTreeSet::new()),
            cached_len: None,
        }
    }

    pub fn from_offsets(offsets: &[u32]) -> Self {
        let mut b = Self::new();
        b.set_many(offsets);
        b
    }

    pub fn set(&mut self, id: u32) {
        match &mut self.repr {
            Repr::Roaring(r) => {
                r.insert(id);
            }
            Repr::Small(s) => {
                s.insert(id);
                if s.len() > SET_THRESHOLD {
                    self.promote();
                }
            }
        }
        self.cached_len = None;
    }

    pub fn unset(&mut self, id: u32) {
        match &mut self.repr {
            Repr::Roaring(r) => {
                r.remove(id);
            }
            Repr::Small(s) => {
                s.remove(&id);
            }
        }
        self.cached_len = None;
    }

    pub fn is_set(&self, id: u32) -> bool {
        match &self.repr {
            Repr::Roaring(r) => r.contains(id),
            Repr::Small(s) => s.contains(&id),
        }
    }

    /// Adds the half-open range `[from, to)`.
    pub fn set_range(&mut self, from: u32, to: u32) {
        self.promote();
        if let Repr::Roaring(r) = &mut self.repr {
            r.insert_range(from..to);
        }
        self.cached_len = None;
    }

    pub fn set_many(&mut self, ids: &[u32]) {
        if !ids.is_empty() {
            self.promote();
            if let Repr::Roaring(r) = &mut self.repr {
                r.extend(ids.iter().copied());
            }
        }
        self.cached_len = None;
    }

    pub fn cardinality(&self) -> u32 {
        match &self.repr {
            Repr::Roaring(r) => r.len() as u32,
            Repr::Small(s) => s.len() as u32,
        }
    }

    /// Memoized cardinality; the memo is dropped by every mutation.
    pub fn cached_cardinality(&mut self) -> u32 {
        match self.cached_len {
            Some(n) => n,
            None => {
                let n = self.cardinality();
                self.cached_len = Some(n);
                n
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        match &self.repr {
            Repr::Roaring(r) => r.is_empty(),
            Repr::Small(s) => s.is_empty(),
        }
    }

    pub fn is_compressed(&self) -> bool {
        matches!(self.repr, Repr::Roaring(_))
    }

    pub fn clear(&mut self) {
        self.repr = Repr::Small(BTreeSet::new());
        self.cached_len = None;
    }

    pub fn union(&mut self, other: &Bitmap) {
        match &other.repr {
            Repr::Roaring(o) => {
                self.promote();
                if let Repr::Roaring(r) = &mut self.repr {
                    *r |= o;
                }
            }
            Repr::Small(o) => {
                for &id in o {
                    self.set(id);
                }
            }
        }
        self.cached_len = None;
    }

    pub fn intersect(&mut self, other: &Bitmap) {
        let demoted = match (&mut self.repr, &other.repr) {
            (Repr::Roaring(r), Repr::Roaring(o)) => {
                *r &= o;
                None
            }
            (Repr::Roaring(r), Repr::Small(o)) => Some(
                o.iter()
                    .copied()
                    .filter(|&id| r.contains(id))
                    .collect::<BTreeSet<u32>>(),
            ),
            (Repr::Small(s), Repr::Roaring(o)) => {
                s.retain(|&id| o.contains(id));
                None
            }
            (Repr::Small(s), Repr::Small(o)) => {
                s.retain(|id| o.contains(id));
                None
            }
        };
        if let Some(kept) = demoted {
            self.repr = Repr::Small(kept);
        }
        self.cached_len = None;
    }

    pub fn exclude(&mut self, other: &Bitmap) {
        match &other.repr {
            Repr::Small(o) => {
                for &id in o {
                    self.unset(id);
                }
            }
            Repr::Roaring(o) => match &mut self.repr {
                Repr::Roaring(r) => {
                    *r -= o;
                }
                Repr::Small(s) => {
                    s.retain(|&id| !o.contains(id));
                }
            },
        }
        self.cached_len = None;
    }

    pub fn xor(&mut self, other: &Bitmap) {
        self.promote();
        if let Repr::Roaring(r) = &mut self.repr {
            match &other.repr {
                Repr::Roaring(o) => *r ^= o,
                Repr::Small(o) => {
                    let tmp: RoaringBitmap = o.iter().copied().collect();
                    *r ^= tmp;
                }
            }
        }
        self.cached_len = None;
    }

    /// OR-fold of many operands: compressed operands are folded in first,
    /// small ones afterwards one id at a time.
    pub fn fast_union(&mut self, bitmaps: &[&Bitmap]) {
        if bitmaps.is_empty() {
            return;
        }
        if bitmaps.len() == 1 {
            self.union(bitmaps[0]);
            return;
        }
        self.promote();
        if let Repr::Roaring(r) = &mut self.repr {
            for b in bitmaps {
                if let Repr::Roaring(o) = &b.repr {
                    *r |= o;
                }
            }
        }
        for b in bitmaps {
            if let Repr::Small(o) = &b.repr {
                for &id in o {
                    self.set(id);
                }
            }
        }
        self.cached_len = None;
    }

    /// Materializes the ascending id sequence into `out`.
    pub fn get_set_list(&self, out: &mut Vec<u32>) {
        out.clear();
        match &self.repr {
            Repr::Roaring(r) => out.extend(r.iter()),
            Repr::Small(s) => out.extend(s.iter().copied()),
        }
    }

    /// The `[offset, offset + limit)` slice of the ascending sequence, where
    /// `offset` is a rank. Returns the number of ids produced.
    pub fn get_range_list(&mut self, out: &mut Vec<u32>, limit: u32, offset: u32) -> u32 {
        let total = self.cached_cardinality();
        if total <= offset {
            out.clear();
            return 0;
        }
        let real_limit = (total - offset).min(limit) as usize;
        out.clear();
        out.reserve(real_limit);
        match &self.repr {
            Repr::Roaring(r) => out.extend(r.iter().skip(offset as usize).take(real_limit)),
            Repr::Small(s) => out.extend(s.iter().copied().skip(offset as usize).take(real_limit)),
        }
        out.len() as u32
    }

    /// Portable roaring byte format regardless of the live representation.
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        match &self.repr {
            Repr::Roaring(r) => {
                buf.reserve(r.serialized_size());
                r.serialize_into(&mut buf).expect("vec write is infallible");
            }
            Repr::Small(s) => {
                let tmp: RoaringBitmap = s.iter().copied().collect();
                buf.reserve(tmp.serialized_size());
                tmp.serialize_into(&mut buf)
                    .expect("vec write is infallible");
            }
        }
        buf
    }

    /// The backing representation is chosen from the decoded cardinality.
    pub fn deserialize(bytes: &[u8]) -> io::Result<Self> {
        let r = RoaringBitmap::deserialize_from(bytes)?;
        let repr = if r.len() as usize <= SET_THRESHOLD {
            Repr::Small(r.iter().collect())
        } else {
            Repr::Roaring(r)
        };
        Ok(Self {
            repr,
            cached_len: None,
        })
    }

    fn promote(&mut self) {
        if let Repr::Small(s) = &self.repr {
            self.repr = Repr::Roaring(s.iter().copied().collect());
        }
    }
}
