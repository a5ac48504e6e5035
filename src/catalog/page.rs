// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/// One page of an ordered listing
#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// Position of the first item within the full listing
    pub offset: usize,
    pub limit: usize,
    /// Size of the full listing
    pub total: usize,
}

impl<T> Page<T> {
    /// Cut a page out of an already ordered listing
    pub fn from_ordered(all: Vec<T>, offset: usize, limit: usize) -> Self {
        let total = all.len();
        let items = all.into_iter().skip(offset).take(limit).collect();
        Self {
            items,
            offset,
            limit,
            total,
        }
    }

    pub fn has_more(&self) -> bool {
        self.offset.saturating_add(self.limit) < self.total
    }

    pub fn next_offset(&self) -> Option<usize> {
        self.has_more().then(|| self.offset + self.limit)
    }

    pub fn previous_offset(&self) -> Option<usize> {
        (self.offset > 0).then(|| self.offset.saturating_sub(self.limit))
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}
