// SPDX-License-Identifier: GPL-3.0-or-later
//! Interned labels: named `(segment, byte offset)` locations.
//!
//! Labels are created during linking and instruction decoding, then renamed
//! canonically (`L1`, `L2`, ... in address order) once all of them exist.
//! Offsets are byte offsets and need not be word-aligned; mid-word labels are
//! kept and reported by the renderers.

use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LabelId(pub usize);

#[derive(Debug, Clone)]
pub struct Label {
    pub target_segment: usize,
    pub offset: usize,
    pub name: String,
}

#[derive(Debug, Default)]
pub struct LabelTable {
    labels: Vec<Label>,
    by_offset: Vec<HashMap<usize, LabelId>>,
}

impl LabelTable {
    pub fn new(n_segments: usize) -> Self {
        LabelTable {
            labels: Vec::new(),
            by_offset: vec![HashMap::new(); n_segments],
        }
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Existing label id for this location, or a fresh one named `L<id>`.
    pub fn get_or_create(&mut self, seg: usize, offset: usize) -> LabelId {
        if let Some(&id) = self.by_offset[seg].get(&offset) {
            return id;
        }
        let id = LabelId(self.labels.len());
        self.labels.push(Label {
            target_segment: seg,
            offset,
            name: format!("L{}", id.0),
        });
        self.by_offset[seg].insert(offset, id);
        id
    }

    pub fn get_at(&self, seg: usize, offset: usize) -> Option<LabelId> {
        self.by_offset.get(seg)?.get(&offset).copied()
    }

    pub fn get(&self, id: LabelId) -> &Label {
        &self.labels[id.0]
    }

    pub fn name(&self, id: LabelId) -> &str {
        &self.labels[id.0].name
    }

    pub fn set_name(&mut self, id: LabelId, name: impl Into<String>) {
        self.labels[id.0].name = name.into();
    }

    /// Rename every label `L1..Ln` in ascending `(segment, offset)` order.
    /// Clears any custom names. Returns the number of labels.
    pub fn set_ordered_names(&mut self) -> usize {
        let mut indices: Vec<usize> = (0..self.labels.len()).collect();
        indices.sort_by_key(|&i| (self.labels[i].target_segment, self.labels[i].offset));
        for (rank, &i) in indices.iter().enumerate() {
            self.labels[i].name = format!("L{}", rank + 1);
        }
        self.labels.len()
    }
}
