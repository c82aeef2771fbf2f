//! Admission filters.

use super::item::Item;
use std::fmt;
use std::sync::Arc;

/// Predicate used by [`Filter::Custom`].
pub type ItemPredicate = Arc<dyn Fn(&Item) -> bool + Send + Sync>;

/// Decides at insertion time whether an item enters the batch.
///
/// Filters are stateless with respect to the batch contents.
#[derive(Clone, Default)]
pub enum Filter {
    /// Accept everything.
    #[default]
    None,
    /// Accept if `now - threshold > 0`, i.e. the clock has passed `threshold`.
    ///
    /// This is not a recency window: any threshold below the current time
    /// admits every item.
    Timestamp(u64),
    /// Accept if `priority >= threshold`.
    Priority(u32),
    /// Accept if the payload is at most `threshold` bytes.
    Size(u32),
    /// Accept if the predicate returns true for the constructed item.
    Custom(ItemPredicate),
}

impl Filter {
    /// Builds a custom filter from a closure.
    pub fn custom<F>(predicate: F) -> Self
    where
        F: Fn(&Item) -> bool + Send + Sync + 'static,
    {
        Filter::Custom(Arc::new(predicate))
    }

    /// Evaluates the filter for `item` at time `now`.
    pub fn admits(&self, item: &Item, now: u64) -> bool {
        match self {
            Filter::None => true,
            Filter::Timestamp(threshold) => now.checked_sub(*threshold).is_some_and(|d| d > 0),
            Filter::Priority(threshold) => item.priority >= *threshold,
            Filter::Size(threshold) => item.size() as u64 <= u64::from(*threshold),
            Filter::Custom(predicate) => predicate(item),
        }
    }
}

impl fmt::Debug for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Filter::None => write!(f, "None"),
            Filter::Timestamp(t) => write!(f, "Timestamp({t})"),
            Filter::Priority(t) => write!(f, "Priority({t})"),
            Filter::Size(t) => write!(f, "Size({t})"),
            Filter::Custom(_) => write!(f, "Custom(..)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::item::ItemKind;

    fn item(priority: u32, size: usize) -> Item {
        Item::new(ItemKind::Achievement, 1, 0, vec![0; size], priority)
    }

    #[test]
    fn priority_threshold_is_inclusive() {
        let filter = Filter::Priority(3);
        assert!(!filter.admits(&item(2, 1), 0));
        assert!(filter.admits(&item(3, 1), 0));
    }

    #[test]
    fn size_threshold_is_inclusive() {
        let filter = Filter::Size(4);
        assert!(filter.admits(&item(0, 4), 0));
        assert!(!filter.admits(&item(0, 5), 0));
    }

    #[test]
    fn timestamp_rule_is_literal() {
        let filter = Filter::Timestamp(1_000);
        assert!(!filter.admits(&item(0, 1), 999));
        assert!(!filter.admits(&item(0, 1), 1_000));
        assert!(filter.admits(&item(0, 1), 1_001));
        // far in the past still admits: not a recency window
        assert!(Filter::Timestamp(1).admits(&item(0, 1), 10_000_000));
    }

    #[test]
    fn custom_sees_the_item() {
        let filter = Filter::custom(|item| item.kind == ItemKind::Achievement && item.id == 1);
        assert!(filter.admits(&item(0, 1), 0));
        assert_eq!(format!("{filter:?}"), "Custom(..)");
    }
}
