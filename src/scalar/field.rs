use crate::fields::{FieldValue, FieldValues};
use crate::io;
use crate::scalar::bitmap::Bitmap;
use crate::scalar::path_trie::PathTrie;
use crate::scalar::ranged_map::{OffsetFilter, RangedMap, RangedMap2d, TopK};
use crate::scalar::ScalarError;
use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::io::{Read, Write};
use std::sync::Weak;

/// Shared label -> logical-offset view owned by the vector store and handed
/// to the field set for the `label_in` seam.
pub type LabelOffsetMap = RwLock<HashMap<u64, u32>>;

/// What a field indexes: inverted bitmaps, a range map, both, or a path trie.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Enum,
    Range,
    EnumAndRange,
    Path,
}

impl FieldKind {
    pub fn type_id(self) -> i32 {
        match self {
            FieldKind::Enum => 1,
            FieldKind::Range => 2,
            FieldKind::EnumAndRange => 3,
            FieldKind::Path => 4,
        }
    }

    pub fn from_type_id(id: i32) -> Option<Self> {
        match id {
            1 => Some(FieldKind::Enum),
            2 => Some(FieldKind::Range),
            3 => Some(FieldKind::EnumAndRange),
            4 => Some(FieldKind::Path),
            _ => None,
        }
    }

    /// Schema type string as it appears in the manager meta.
    pub fn from_type_str(s: &str) -> Option<Self> {
        match s {
            "int64" => Some(FieldKind::EnumAndRange),
            "float32" => Some(FieldKind::Range),
            "string" | "bool" => Some(FieldKind::Enum),
            "path" => Some(FieldKind::Path),
            _ => None,
        }
    }
}

/// Containers for one field. Enum-shaped kinds hold per-key bitmaps, range
/// kinds a RangedMap, path fields a trie over the normalised keys.
#[derive(Debug)]
pub struct FieldGroup {
    name: String,
    kind: FieldKind,
    bitmaps: BTreeMap<String, Bitmap>,
    ranged: Option<RangedMap>,
    trie: Option<PathTrie>,
    element_size: u32,
}

fn normalize_path_key(key: &str) -> String {
    if key.is_empty() || key.starts_with('/') {
        key.to_string()
    } else {
        format!("/{key}")
    }
}

impl FieldGroup {
    pub fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
            bitmaps: BTreeMap::new(),
            ranged: matches!(kind, FieldKind::Range | FieldKind::EnumAndRange)
                .then(RangedMap::new),
            trie: matches!(kind, FieldKind::Path).then(PathTrie::new),
            element_size: 0,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> FieldKind {
        self.kind
    }

    pub fn ranged(&self) -> Option<&RangedMap> {
        self.ranged.as_ref()
    }

    fn bump_element_size(&mut self, offset: u32) {
        self.element_size = self.element_size.max(offset + 1);
    }

    fn set_key(&mut self, key: &str, offset: u32) {
        let key = if self.trie.is_some() {
            normalize_path_key(key)
        } else {
            key.to_string()
        };
        if let Some(trie) = &mut self.trie {
            if !self.bitmaps.contains_key(&key) {
                trie.add_key(&key);
            }
        }
        self.bitmaps.entry(key).or_default().set(offset);
    }

    fn unset_key(&mut self, key: &str, offset: u32) {
        let key = if self.trie.is_some() {
            normalize_path_key(key)
        } else {
            key.to_string()
        };
        if let Some(bm) = self.bitmaps.get_mut(&key) {
            bm.unset(offset);
        }
    }

    /// Multi-valued strings split on ';', one bitmap key per token.
    pub fn add_str(&mut self, value: &str, offset: u32) {
        if value.contains(';') {
            for token in value.split(';') {
                self.set_key(token, offset);
            }
        } else {
            self.set_key(value, offset);
        }
        self.bump_element_size(offset);
    }

    pub fn add_i64(&mut self, value: i64, offset: u32) -> Result<(), ScalarError> {
        self.set_key(&value.to_string(), offset);
        if let Some(ranged) = &mut self.ranged {
            ranged.add(offset, value as f64)?;
        }
        self.bump_element_size(offset);
        Ok(())
    }

    pub fn add_f64(&mut self, value: f64, offset: u32) -> Result<(), ScalarError> {
        let ranged = self
            .ranged
            .as_mut()
            .ok_or_else(|| ScalarError::TypeMismatch {
                field: self.name.clone(),
            })?;
        ranged.add(offset, value)?;
        self.bump_element_size(offset);
        Ok(())
    }

    pub fn delete_str(&mut self, value: &str, offset: u32) -> Result<(), ScalarError> {
        if offset >= self.element_size {
            return Err(ScalarError::OffsetOutOfRange {
                offset,
                element_size: self.element_size,
            });
        }
        if value.contains(';') {
            for token in value.split(';') {
                self.unset_key(token, offset);
            }
        } else {
            self.unset_key(value, offset);
        }
        Ok(())
    }

    pub fn delete_i64(&mut self, value: i64, offset: u32) -> Result<(), ScalarError> {
        if offset >= self.element_size {
            return Err(ScalarError::OffsetOutOfRange {
                offset,
                element_size: self.element_size,
            });
        }
        self.unset_key(&value.to_string(), offset);
        if let Some(ranged) = &mut self.ranged {
            ranged.delete(offset)?;
        }
        Ok(())
    }

    pub fn delete_f64(&mut self, offset: u32) -> Result<(), ScalarError> {
        if offset >= self.element_size {
            return Err(ScalarError::OffsetOutOfRange {
                offset,
                element_size: self.element_size,
            });
        }
        let ranged = self
            .ranged
            .as_mut()
            .ok_or_else(|| ScalarError::TypeMismatch {
                field: self.name.clone(),
            })?;
        ranged.delete(offset)?;
        Ok(())
    }

    /// Owned copy for one exact key; unknown keys yield an empty bitmap.
    pub fn bitmap_copy(&self, key: &str) -> Bitmap {
        self.bitmaps.get(key).cloned().unwrap_or_default()
    }

    pub fn bitmap(&self, key: &str) -> Option<&Bitmap> {
        self.bitmaps.get(key)
    }

    /// Union over bitmaps whose keys start with `prefix`; `None` when no key
    /// matched.
    pub fn bitmap_by_prefix(&self, prefix: &str) -> Option<Bitmap> {
        self.union_matching(|key| key.starts_with(prefix))
    }

    /// Union over bitmaps whose keys contain `substring`.
    pub fn bitmap_by_contains(&self, substring: &str) -> Option<Bitmap> {
        self.union_matching(|key| key.contains(substring))
    }

    /// Union over bitmaps whose keys match `pattern`; an invalid pattern is a
    /// no-match.
    pub fn bitmap_by_regex(&self, pattern: &str) -> Option<Bitmap> {
        let re = match regex::Regex::new(pattern) {
            Ok(re) => re,
            Err(err) => {
                tracing::warn!(pattern, error = %err, "invalid regex pattern in filter");
                return None;
            }
        };
        self.union_matching(|key| re.is_match(key))
    }

    fn union_matching(&self, matches: impl Fn(&str) -> bool) -> Option<Bitmap> {
        let mut result: Option<Bitmap> = None;
        for (key, bm) in &self.bitmaps {
            if !matches(key) {
                continue;
            }
            match &mut result {
                None => result = Some(bm.clone()),
                Some(acc) => acc.union(bm),
            }
        }
        result
    }

    /// Per-key counts intersected with an optional filter. Returns the
    /// per-key bitmaps alongside so a second field can join against them.
    fn count_enums(
        &self,
        valid: Option<&Bitmap>,
        enum_count: &mut BTreeMap<String, u32>,
        enum_bitmaps: &mut BTreeMap<String, Bitmap>,
    ) {
        match valid {
            Some(valid) => {
                for (key, bm) in &self.bitmaps {
                    let mut key_bitmap = bm.clone();
                    key_bitmap.intersect(valid);
                    enum_count.insert(key.clone(), key_bitmap.cached_cardinality());
                    enum_bitmaps.insert(key.clone(), key_bitmap);
                }
                if self.ranged.is_some() {
                    enum_count.insert(self.name.clone(), valid.cardinality());
                }
            }
            None => {
                for (key, bm) in &self.bitmaps {
                    enum_count.insert(key.clone(), bm.cardinality());
                    enum_bitmaps.insert(key.clone(), bm.clone());
                }
                if let Some(ranged) = &self.ranged {
                    enum_count.insert(self.name.clone(), ranged.len());
                }
            }
        }
    }

    /// Joint counts against the first field's per-key bitmaps, keyed
    /// `"k1,k2"`; zero-count pairs are dropped.
    fn count_enums_joint(
        &self,
        first_enum_bitmaps: &BTreeMap<String, Bitmap>,
        enum_count: &mut BTreeMap<String, u32>,
    ) {
        for (prefix, valid) in first_enum_bitmaps {
            for (key, bm) in &self.bitmaps {
                let mut joint = bm.clone();
                joint.intersect(valid);
                let cnt = joint.cached_cardinality();
                if cnt > 0 {
                    enum_count.insert(format!("{prefix},{key}"), cnt);
                }
            }
            if self.ranged.is_some() {
                enum_count.insert(prefix.clone(), valid.cardinality());
            }
        }
    }

    pub fn serialize_into<W: Write>(&self, w: &mut W) -> std::io::Result<()> {
        io::write_i32(w, self.kind.type_id())?;
        io::write_i32(w, self.bitmaps.len() as i32)?;
        io::write_i32(w, self.element_size as i32)?;
        match self.kind {
            FieldKind::Enum => self.write_bitmaps(w)?,
            FieldKind::Range => {
                self.ranged
                    .as_ref()
                    .expect("range kind owns a map")
                    .serialize_into(w)?;
            }
            FieldKind::EnumAndRange => {
                self.write_bitmaps(w)?;
                self.ranged
                    .as_ref()
                    .expect("range kind owns a map")
                    .serialize_into(w)?;
            }
            FieldKind::Path => {
                self.write_bitmaps(w)?;
                self.trie
                    .as_ref()
                    .expect("path kind owns a trie")
                    .serialize_into(w)?;
            }
        }
        Ok(())
    }

    fn write_bitmaps<W: Write>(&self, w: &mut W) -> std::io::Result<()> {
        for (key, bm) in &self.bitmaps {
            io::write_str(w, key.as_bytes())?;
            io::write_str(w, &bm.serialize())?;
        }
        Ok(())
    }

    pub fn deserialize_from<R: Read>(name: String, r: &mut R) -> std::io::Result<Self> {
        let type_id = io::read_i32(r)?;
        let kind = FieldKind::from_type_id(type_id).ok_or_else(|| {
            std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("unknown field type id {type_id}"),
            )
        })?;
        let bitmap_count = io::read_i32(r)?;
        if bitmap_count < 0 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "negative bitmap count",
            ));
        }
        let element_size = io::read_i32(r)?.max(0) as u32;
        let mut group = FieldGroup::new(name, kind);
        group.element_size = element_size;
        match kind {
            FieldKind::Enum => group.read_bitmaps(r, bitmap_count as usize)?,
            FieldKind::Range => {
                group.ranged = Some(RangedMap::deserialize_from(r)?);
            }
            FieldKind::EnumAndRange => {
                group.read_bitmaps(r, bitmap_count as usize)?;
                group.ranged = Some(RangedMap::deserialize_from(r)?);
            }
            FieldKind::Path => {
                group.read_bitmaps(r, bitmap_count as usize)?;
                group.trie = Some(PathTrie::deserialize_from(r)?);
            }
        }
        Ok(group)
    }

    fn read_bitmaps<R: Read>(&mut self, r: &mut R, count: usize) -> std::io::Result<()> {
        for _ in 0..count {
            let key = io::read_utf8(r)?;
            let blob = io::read_str(r)?;
            self.bitmaps.insert(key, Bitmap::deserialize(&blob)?);
        }
        Ok(())
    }
}

const GROUP_SET_VERSION: i32 = 1;

/// Aggregate of all field groups for the collection. Owns the element-size
/// watermark and the label→offset converter seam.
#[derive(Debug, Default)]
pub struct FieldSet {
    groups: BTreeMap<String, FieldGroup>,
    element_size: u32,
    label_offsets: Option<Weak<LabelOffsetMap>>,
}

impl FieldSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_group(&mut self, group: FieldGroup) -> Result<(), ScalarError> {
        if self.groups.contains_key(group.name()) {
            return Err(ScalarError::DuplicateField {
                field: group.name().to_string(),
            });
        }
        self.groups.insert(group.name().to_string(), group);
        Ok(())
    }

    pub fn group(&self, field: &str) -> Option<&FieldGroup> {
        self.groups.get(field)
    }

    pub fn element_size(&self) -> u32 {
        self.element_size
    }

    pub fn is_path_field(&self, field: &str) -> bool {
        self.groups
            .get(field)
            .map_or(false, |g| g.kind() == FieldKind::Path)
    }

    /// Bitmap of the full offset space `[0, element_size)`; complement is
    /// implemented by subtraction from this.
    pub fn full_temp(&self) -> Bitmap {
        let mut b = Bitmap::new();
        b.set_range(0, self.element_size);
        b
    }

    pub fn register_label_offsets(&mut self, map: Weak<LabelOffsetMap>) {
        self.label_offsets = Some(map);
    }

    /// Resolves labels through the registered converter; `None` when the
    /// converter is absent or its owner is gone.
    pub fn offsets_for_labels(&self, labels: &[u64]) -> Option<Vec<u32>> {
        let map = self.label_offsets.as_ref()?.upgrade()?;
        let map = map.read();
        let mut out = Vec::with_capacity(labels.len());
        for label in labels {
            if let Some(offset) = map.get(label) {
                out.push(*offset);
            }
        }
        Some(out)
    }

    /// Applies one record's typed values at `offset`. Unknown fields and type
    /// mismatches are skipped with a warning; the first hard error (duplicate
    /// range add) is reported after the record is processed.
    pub fn add_values(&mut self, values: &FieldValues, offset: u32) -> Result<(), ScalarError> {
        if values.is_empty() {
            return Ok(());
        }
        let mut first_err = None;
        for (field, value) in values.iter() {
            let Some(group) = self.groups.get_mut(field) else {
                tracing::warn!(field = %field, "add skipped: field not in schema");
                continue;
            };
            let res = match (group.kind(), value) {
                (FieldKind::Enum | FieldKind::Path, FieldValue::Str(s)) => {
                    group.add_str(s, offset);
                    Ok(())
                }
                (FieldKind::Enum, FieldValue::Bool(b)) => {
                    group.add_str(if *b { "1" } else { "0" }, offset);
                    Ok(())
                }
                (FieldKind::Enum, FieldValue::Int(i)) => {
                    group.add_str(&i.to_string(), offset);
                    Ok(())
                }
                (FieldKind::EnumAndRange, FieldValue::Int(i)) => group.add_i64(*i, offset),
                (FieldKind::EnumAndRange | FieldKind::Range, FieldValue::Float(f)) => {
                    group.add_f64(*f, offset)
                }
                (FieldKind::Range, FieldValue::Int(i)) => group.add_f64(*i as f64, offset),
                (kind, value) => {
                    tracing::warn!(field = %field, ?kind, ?value, "add skipped: value type does not match field kind");
                    continue;
                }
            };
            if let Err(err) = res {
                tracing::warn!(field = %field, offset, error = %err, "field add failed");
                first_err.get_or_insert(err);
            }
        }
        self.element_size = self.element_size.max(offset + 1);
        match first_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    pub fn delete_values(&mut self, values: &FieldValues, offset: u32) -> Result<(), ScalarError> {
        if values.is_empty() {
            return Ok(());
        }
        if offset >= self.element_size {
            tracing::warn!(offset, element_size = self.element_size, "delete skipped: offset beyond watermark");
            return Err(ScalarError::OffsetOutOfRange {
                offset,
                element_size: self.element_size,
            });
        }
        let mut first_err = None;
        for (field, value) in values.iter() {
            let Some(group) = self.groups.get_mut(field) else {
                continue;
            };
            let res = match (group.kind(), value) {
                (FieldKind::Enum | FieldKind::Path, FieldValue::Str(s)) => {
                    group.delete_str(s, offset)
                }
                (FieldKind::Enum, FieldValue::Bool(b)) => {
                    group.delete_str(if *b { "1" } else { "0" }, offset)
                }
                (FieldKind::Enum, FieldValue::Int(i)) => group.delete_str(&i.to_string(), offset),
                (FieldKind::EnumAndRange, FieldValue::Int(i)) => group.delete_i64(*i, offset),
                (FieldKind::EnumAndRange | FieldKind::Range, FieldValue::Float(_))
                | (FieldKind::Range, FieldValue::Int(_)) => group.delete_f64(offset),
                (kind, value) => {
                    tracing::warn!(field = %field, ?kind, ?value, "delete skipped: value type does not match field kind");
                    continue;
                }
            };
            if let Err(err) = res {
                tracing::warn!(field = %field, offset, error = %err, "field delete failed");
                first_err.get_or_insert(err);
            }
        }
        match first_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Union of exact-key bitmaps; `None` for an unknown field or empty keys.
    pub fn field_copy(&self, field: &str, keys: &[String]) -> Option<Bitmap> {
        let group = self.groups.get(field)?;
        match keys {
            [] => None,
            [key] => Some(group.bitmap_copy(key)),
            many => {
                let mut out = Bitmap::new();
                let existing: Vec<&Bitmap> =
                    many.iter().filter_map(|k| group.bitmap(k)).collect();
                out.fast_union(&existing);
                Some(out)
            }
        }
    }

    /// `full ∖ union(keys)`.
    pub fn field_exclude_copy(&self, field: &str, keys: &[String]) -> Bitmap {
        let mut out = self.full_temp();
        if let Some(union) = self.field_copy(field, keys) {
            out.exclude(&union);
        }
        out
    }

    /// Union of every path bitmap within `depth` below each key; an explicit
    /// `"/"` or `""` with unbounded depth matches the full set.
    pub fn path_field_copy(&self, field: &str, keys: &[String], depth: i32) -> Option<Bitmap> {
        let group = self.groups.get(field)?;
        if depth == -1 && keys.iter().any(|k| k == "/" || k.is_empty()) {
            return Some(self.full_temp());
        }
        let trie = group.trie.as_ref()?;
        let mut all_keys = BTreeSet::new();
        for prefix in keys {
            trie.collect_bitmap_keys(prefix, depth, &mut all_keys);
        }
        let to_union: Vec<&Bitmap> = all_keys.iter().filter_map(|k| group.bitmap(k)).collect();
        let mut out = Bitmap::new();
        out.fast_union(&to_union);
        Some(out)
    }

    pub fn path_field_exclude_copy(&self, field: &str, keys: &[String], depth: i32) -> Bitmap {
        let mut out = self.full_temp();
        if let Some(matched) = self.path_field_copy(field, keys, depth) {
            out.exclude(&matched);
        }
        out
    }

    pub fn range_copy(
        &self,
        range_out: bool,
        field: &str,
        lower_than: f64,
        include_le: bool,
        greater_than: f64,
        include_ge: bool,
    ) -> Option<Bitmap> {
        let group = self.groups.get(field).or_else(|| {
            tracing::warn!(field, "range query on unknown field");
            None
        })?;
        group
            .ranged()?
            .range_bitmap(range_out, lower_than, include_le, greater_than, include_ge)
    }

    pub fn range2d_copy(&self, fields: &[String], center: &[f64], radius: f64) -> Option<Bitmap> {
        if fields.len() != 2 || center.len() != 2 {
            return None;
        }
        let x = self.groups.get(&fields[0])?.ranged()?;
        let y = self.groups.get(&fields[1])?.ranged()?;
        RangedMap2d::new(x, y).range2d_bitmap(center[0], center[1], radius)
    }

    /// Path fields get the '/' normalisation applied to the probe.
    pub fn field_prefix_copy(&self, field: &str, prefix: &str) -> Option<Bitmap> {
        let group = self.groups.get(field)?;
        if self.is_path_field(field) {
            group.bitmap_by_prefix(&normalize_path_key(prefix))
        } else {
            group.bitmap_by_prefix(prefix)
        }
    }

    pub fn field_contains_copy(&self, field: &str, substring: &str) -> Option<Bitmap> {
        self.groups.get(field)?.bitmap_by_contains(substring)
    }

    pub fn field_regex_copy(&self, field: &str, pattern: &str) -> Option<Bitmap> {
        self.groups.get(field)?.bitmap_by_regex(pattern)
    }

    pub fn ranged(&self, field: &str) -> Option<&RangedMap> {
        self.groups.get(field)?.ranged()
    }

    pub fn top_k(
        &self,
        field: &str,
        topk: usize,
        order_asc: bool,
        admit: OffsetFilter<'_>,
    ) -> Option<TopK> {
        Some(self.ranged(field)?.top_k(topk, order_asc, admit))
    }

    pub fn top_k_center1d(
        &self,
        field: &str,
        topk: usize,
        center: f64,
        admit: OffsetFilter<'_>,
    ) -> Option<TopK> {
        Some(self.ranged(field)?.top_k_center1d(topk, center, admit))
    }

    pub fn top_k_with_conditions(
        &self,
        fields: &[String],
        topk: usize,
        order_ascs: &[bool],
        admit: OffsetFilter<'_>,
    ) -> Option<TopK> {
        let first = self.ranged(&fields[0])?;
        let mut conditions: Vec<(&RangedMap, bool)> = Vec::with_capacity(fields.len() - 1);
        for (field, asc) in fields.iter().zip(order_ascs.iter()).skip(1) {
            conditions.push((self.ranged(field)?, *asc));
        }
        Some(first.top_k_with_conditions(topk, order_ascs[0], admit, &conditions))
    }

    /// Enum counts for one field, or joint `"k1,k2"` counts for two.
    pub fn count_field_enums(
        &self,
        fields: &[String],
        valid: Option<&Bitmap>,
    ) -> Result<BTreeMap<String, u32>, ScalarError> {
        let mut enum_count = BTreeMap::new();
        match fields {
            [field] => {
                let group = self.groups.get(field).ok_or_else(|| ScalarError::UnknownField {
                    field: field.clone(),
                })?;
                let mut bitmaps = BTreeMap::new();
                group.count_enums(valid, &mut enum_count, &mut bitmaps);
            }
            [first, second] => {
                let first_group =
                    self.groups.get(first).ok_or_else(|| ScalarError::UnknownField {
                        field: first.clone(),
                    })?;
                let second_group =
                    self.groups.get(second).ok_or_else(|| ScalarError::UnknownField {
                        field: second.clone(),
                    })?;
                let mut first_counts = BTreeMap::new();
                let mut first_bitmaps = BTreeMap::new();
                first_group.count_enums(valid, &mut first_counts, &mut first_bitmaps);
                second_group.count_enums_joint(&first_bitmaps, &mut enum_count);
            }
            _ => {
                return Err(ScalarError::BadCountFields {
                    count: fields.len(),
                })
            }
        }
        Ok(enum_count)
    }

    pub fn serialize_into<W: Write>(&self, w: &mut W) -> std::io::Result<()> {
        io::write_i32(w, GROUP_SET_VERSION)?;
        io::write_i32(w, self.groups.len() as i32)?;
        io::write_i32(w, self.element_size as i32)?;
        for (name, group) in &self.groups {
            io::write_str(w, name.as_bytes())?;
            group.serialize_into(w)?;
        }
        Ok(())
    }

    pub fn deserialize_from<R: Read>(r: &mut R) -> std::io::Result<Self> {
        let version = io::read_i32(r)?;
        if version != GROUP_SET_VERSION {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("unsupported group set version {version}"),
            ));
        }
        let field_count = io::read_i32(r)?;
        let element_size = io::read_i32(r)?.max(0) as u32;
        let mut set = FieldSet::new();
        for _ in 0..field_count.max(0) {
            let name = io::read_utf8(r)?;
            let group = FieldGroup::deserialize_from(name.clone(), r)?;
            set.groups.insert(name, group);
        }
        set.element_size = element_size;
        Ok(set)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(b: &Bitmap) -> Vec<u32> {
        let mut out = Vec::new();
        b.get_set_list(&mut out);
        out
    }

    fn sample_set() -> FieldSet {
        let mut set = FieldSet::new();
        set.add_group(FieldGroup::new("title", FieldKind::Enum)).unwrap();
        set.add_group(FieldGroup::new("count", FieldKind::EnumAndRange)).unwrap();
        set.add_group(FieldGroup::new("weight", FieldKind::Range)).unwrap();
        set.add_group(FieldGroup::new("dir", FieldKind::Path)).unwrap();
        set
    }

    fn values(pairs: &[(&str, FieldValue)]) -> FieldValues {
        let mut fv = FieldValues::new();
        for (k, v) in pairs {
            fv.insert(*k, v.clone());
        }
        fv
    }

    #[test]
    fn add_and_query_enum_keys() {
        let mut set = sample_set();
        set.add_values(&values(&[("title", FieldValue::Str("apple".into()))]), 0)
            .unwrap();
        set.add_values(&values(&[("title", FieldValue::Str("banana;cherry".into()))]), 1)
            .unwrap();

        let apple = set.field_copy("title", &["apple".into()]).unwrap();
        assert_eq!(ids(&apple), vec![0]);
        let both = set
            .field_copy("title", &["banana".into(), "cherry".into()])
            .unwrap();
        assert_eq!(ids(&both), vec![1]);
        let missing = set.field_copy("title", &["durian".into()]).unwrap();
        assert!(missing.is_empty());
    }

    #[test]
    fn exclude_is_complement_of_union() {
        let mut set = sample_set();
        for (o, t) in [(0, "a"), (1, "b"), (2, "a")] {
            set.add_values(&values(&[("title", FieldValue::Str(t.into()))]), o)
                .unwrap();
        }
        let not_a = set.field_exclude_copy("title", &["a".into()]);
        assert_eq!(ids(&not_a), vec![1]);
    }

    #[test]
    fn int64_field_feeds_both_sides() {
        let mut set = sample_set();
        set.add_values(&values(&[("count", FieldValue::Int(10))]), 0).unwrap();
        set.add_values(&values(&[("count", FieldValue::Int(20))]), 1).unwrap();

        let exact = set.field_copy("count", &["10".into()]).unwrap();
        assert_eq!(ids(&exact), vec![0]);
        let in_range = set
            .range_copy(false, "count", f64::MAX, true, 15.0, true)
            .unwrap();
        assert_eq!(ids(&in_range), vec![1]);
    }

    #[test]
    fn type_mismatch_skips_field() {
        let mut set = sample_set();
        // float into an enum field is dropped, the record otherwise lands
        set.add_values(
            &values(&[
                ("title", FieldValue::Float(3.5)),
                ("weight", FieldValue::Float(3.5)),
            ]),
            0,
        )
        .unwrap();
        assert!(set.range_copy(false, "weight", 4.0, true, 3.0, true).is_some());
        assert_eq!(set.element_size(), 1);
    }

    #[test]
    fn unknown_field_is_skipped() {
        let mut set = sample_set();
        set.add_values(&values(&[("nope", FieldValue::Int(1))]), 0).unwrap();
        assert_eq!(set.element_size(), 1);
    }

    #[test]
    fn delete_beyond_watermark_is_rejected() {
        let mut set = sample_set();
        set.add_values(&values(&[("title", FieldValue::Str("a".into()))]), 0)
            .unwrap();
        let res = set.delete_values(&values(&[("title", FieldValue::Str("a".into()))]), 5);
        assert!(res.is_err());
    }

    #[test]
    fn path_field_depth_query() {
        let mut set = sample_set();
        for (o, p) in [(0u32, "/a/b"), (1, "/a/c"), (2, "/a/b/d"), (3, "x")] {
            set.add_values(&values(&[("dir", FieldValue::Str(p.into()))]), o)
                .unwrap();
        }
        // keys without a leading '/' are normalised on write
        let x = set.path_field_copy("dir", &["/x".into()], -1).unwrap();
        assert_eq!(ids(&x), vec![3]);

        let under_a = set.path_field_copy("dir", &["/a".into()], -1).unwrap();
        assert_eq!(ids(&under_a), vec![0, 1, 2]);
        let shallow = set.path_field_copy("dir", &["/a".into()], 1).unwrap();
        assert_eq!(ids(&shallow), vec![0, 1]);

        // "/" with unbounded depth matches the full set
        let all = set.path_field_copy("dir", &["/".into()], -1).unwrap();
        assert_eq!(ids(&all), vec![0, 1, 2, 3]);

        let excluded = set.path_field_exclude_copy("dir", &["/a".into()], -1);
        assert_eq!(ids(&excluded), vec![3]);
    }

    #[test]
    fn prefix_contains_regex_queries() {
        let mut set = sample_set();
        for (o, t) in [(0, "foobar"), (1, "foobaz"), (2, "other")] {
            set.add_values(&values(&[("title", FieldValue::Str(t.into()))]), o)
                .unwrap();
        }
        assert_eq!(ids(&set.field_prefix_copy("title", "foob").unwrap()), vec![0, 1]);
        assert_eq!(ids(&set.field_contains_copy("title", "oba").unwrap()), vec![0, 1]);
        assert_eq!(ids(&set.field_regex_copy("title", "ba[rz]$").unwrap()), vec![0, 1]);
        assert!(set.field_prefix_copy("title", "zzz").is_none());
        assert!(set.field_regex_copy("title", "(").is_none());
    }

    #[test]
    fn counts_single_and_joint() {
        let mut set = sample_set();
        set.add_group(FieldGroup::new("color", FieldKind::Enum)).unwrap();
        for (o, t, c) in [(0, "a", "red"), (1, "a", "blue"), (2, "b", "red")] {
            set.add_values(
                &values(&[
                    ("title", FieldValue::Str(t.into())),
                    ("color", FieldValue::Str(c.into())),
                ]),
                o,
            )
            .unwrap();
        }
        let counts = set.count_field_enums(&["title".into()], None).unwrap();
        assert_eq!(counts.get("a"), Some(&2));
        assert_eq!(counts.get("b"), Some(&1));

        let mut valid = Bitmap::new();
        valid.set(0);
        valid.set(2);
        let counts = set.count_field_enums(&["title".into()], Some(&valid)).unwrap();
        assert_eq!(counts.get("a"), Some(&1));

        let joint = set
            .count_field_enums(&["title".into(), "color".into()], None)
            .unwrap();
        assert_eq!(joint.get("a,red"), Some(&1));
        assert_eq!(joint.get("a,blue"), Some(&1));
        assert_eq!(joint.get("b,red"), Some(&1));
        assert_eq!(joint.get("b,blue"), None);
    }

    #[test]
    fn label_converter_seam() {
        use std::sync::Arc;
        let mut set = sample_set();
        assert!(set.offsets_for_labels(&[1]).is_none());

        let map: Arc<LabelOffsetMap> = Arc::new(RwLock::new(HashMap::new()));
        map.write().insert(1001, 0);
        map.write().insert(1002, 7);
        set.register_label_offsets(Arc::downgrade(&map));
        assert_eq!(set.offsets_for_labels(&[1001, 9999, 1002]).unwrap(), vec![0, 7]);

        drop(map);
        assert!(set.offsets_for_labels(&[1001]).is_none());
    }

    #[test]
    fn serialize_round_trip() {
        let mut set = sample_set();
        for (o, t, c, w, p) in [
            (0u32, "apple", 10i64, 0.5, "/fruit/red"),
            (1, "banana", 20, 1.5, "/fruit/yellow"),
            (2, "cherry;berry", 30, 2.5, "/fruit/red/small"),
        ] {
            set.add_values(
                &values(&[
                    ("title", FieldValue::Str(t.into())),
                    ("count", FieldValue::Int(c)),
                    ("weight", FieldValue::Float(w)),
                    ("dir", FieldValue::Str(p.into())),
                ]),
                o,
            )
            .unwrap();
        }
        let mut buf = Vec::new();
        set.serialize_into(&mut buf).unwrap();
        let decoded = FieldSet::deserialize_from(&mut std::io::Cursor::new(buf)).unwrap();

        assert_eq!(decoded.element_size(), set.element_size());
        assert_eq!(
            ids(&decoded.field_copy("title", &["berry".into()]).unwrap()),
            vec![2]
        );
        assert_eq!(
            ids(&decoded
                .range_copy(false, "count", 25.0, true, 15.0, true)
                .unwrap()),
            vec![1]
        );
        assert_eq!(
            ids(&decoded.path_field_copy("dir", &["/fruit/red".into()], -1).unwrap()),
            vec![0, 2]
        );
    }
}
