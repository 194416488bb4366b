//! Orders the scheduling queue by pod priority.

use std::sync::Arc;

use polaris_framework::{Plugin, QueuedPodInfo, SortPlugin};

pub const PRIORITY_SORT: &str = "PrioritySort";

/// Higher priority first; among equal priorities the older pod wins.
#[derive(Debug, Default)]
pub struct PrioritySort;

impl Plugin for PrioritySort {
    fn name(&self) -> &str {
        PRIORITY_SORT
    }

    fn as_sort(self: Arc<Self>) -> Option<Arc<dyn SortPlugin>> {
        Some(self)
    }
}

impl SortPlugin for PrioritySort {
    fn less(&self, a: &QueuedPodInfo, b: &QueuedPodInfo) -> bool {
        let (a, b) = (a.pod(), b.pod());
        match a.priority().cmp(&b.priority()) {
            std::cmp::Ordering::Greater => true,
            std::cmp::Ordering::Less => false,
            // A pod without a creation timestamp counts as oldest.
            std::cmp::Ordering::Equal => {
                a.metadata.creation_timestamp < b.metadata.creation_timestamp
            }
        }
    }
}
