//! Pipeline items and batches.

use crate::error::CoreResult;
use serde::{Deserialize, Serialize};

/// Category of a gameplay event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ItemKind {
    /// Snapshot of the running game.
    GameState,
    /// Achievement progress.
    Achievement,
    /// Challenge result.
    Challenge,
    /// Training session record.
    Training,
    /// Tag scan.
    Tag,
    /// Recorded route.
    Route,
    /// Application-defined data.
    Custom,
}

/// One event owned by the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    /// Event category.
    pub kind: ItemKind,
    /// Producer-assigned id.
    pub id: u32,
    /// Admission time in clock milliseconds.
    pub timestamp: u64,
    /// Payload bytes, zstd-framed when `compressed` is set.
    pub payload: Vec<u8>,
    /// Whether `payload` holds the compressed form.
    pub compressed: bool,
    /// Higher values are processed first.
    pub priority: u32,
    /// Set once the processor accepted the item.
    pub processed: bool,
}

impl Item {
    /// Creates an unprocessed, uncompressed item.
    pub fn new(kind: ItemKind, id: u32, timestamp: u64, payload: Vec<u8>, priority: u32) -> Self {
        Self {
            kind,
            id,
            timestamp,
            payload,
            compressed: false,
            priority,
            processed: false,
        }
    }

    /// Size of the stored payload in bytes.
    pub fn size(&self) -> usize {
        self.payload.len()
    }

    /// Returns the original payload, decompressing if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if a compressed payload is corrupt.
    pub fn decoded_payload(&self) -> CoreResult<Vec<u8>> {
        if self.compressed {
            Ok(tagsync_codec::decompress(&self.payload)?)
        } else {
            Ok(self.payload.clone())
        }
    }
}

/// An ordered group of items uploaded as a unit.
///
/// `total_size` always equals the sum of the stored payload sizes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Batch {
    items: Vec<Item>,
    total_size: usize,
}

impl Batch {
    /// Creates an empty batch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Items in their current order.
    pub fn items(&self) -> &[Item] {
        &self.items
    }

    /// Number of items.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Returns true if the batch holds no items.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Sum of payload sizes.
    pub fn total_size(&self) -> usize {
        self.total_size
    }

    /// Iterates over the items.
    pub fn iter(&self) -> std::slice::Iter<'_, Item> {
        self.items.iter()
    }

    pub(crate) fn push(&mut self, item: Item) {
        self.total_size += item.size();
        self.items.push(item);
    }

    pub(crate) fn get(&self, index: usize) -> Option<&Item> {
        self.items.get(index)
    }

    /// Stable sort, highest priority first.
    pub(crate) fn sort_by_priority(&mut self) {
        self.items.sort_by(|a, b| b.priority.cmp(&a.priority));
    }

    pub(crate) fn replace_payload(&mut self, index: usize, payload: Vec<u8>, compressed: bool) {
        if let Some(item) = self.items.get_mut(index) {
            self.total_size = self.total_size - item.payload.len() + payload.len();
            item.payload = payload;
            item.compressed = compressed;
        }
    }

    pub(crate) fn mark_processed(&mut self, index: usize) {
        if let Some(item) = self.items.get_mut(index) {
            item.processed = true;
        }
    }

    /// Drops every item and returns how many there were.
    pub(crate) fn clear(&mut self) -> usize {
        let count = self.items.len();
        self.items.clear();
        self.total_size = 0;
        count
    }
}

impl<'a> IntoIterator for &'a Batch {
    type Item = &'a Item;
    type IntoIter = std::slice::Iter<'a, Item>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(id: u32, priority: u32, size: usize) -> Item {
        Item::new(ItemKind::Tag, id, 0, vec![1; size], priority)
    }

    #[test]
    fn total_size_tracks_payloads() {
        let mut batch = Batch::new();
        batch.push(item(1, 0, 10));
        batch.push(item(2, 0, 30));
        assert_eq!(batch.total_size(), 40);

        batch.replace_payload(1, vec![0; 5], true);
        assert_eq!(batch.total_size(), 15);
        assert!(batch.items()[1].compressed);

        assert_eq!(batch.clear(), 2);
        assert_eq!(batch.total_size(), 0);
    }

    #[test]
    fn priority_sort_is_stable() {
        let mut batch = Batch::new();
        batch.push(item(1, 1, 1));
        batch.push(item(2, 5, 1));
        batch.push(item(3, 1, 1));
        batch.push(item(4, 5, 1));
        batch.sort_by_priority();

        let ids: Vec<u32> = batch.iter().map(|i| i.id).collect();
        assert_eq!(ids, vec![2, 4, 1, 3]);
    }

    #[test]
    fn decoded_payload_of_compressed_item() {
        let original = vec![9u8; 1024];
        let mut it = item(1, 0, 0);
        it.payload = tagsync_codec::compress_max(&original).unwrap();
        it.compressed = true;
        assert_eq!(it.decoded_payload().unwrap(), original);
    }
}
