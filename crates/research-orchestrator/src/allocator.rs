//! Centralized evidence id allocator. Parallel research completions are
//! merged in impact-rank order and ids are handed out here, so the sequence
//! is deterministic and gap-free regardless of completion order.

use research_core::types::EvidenceBundle;

pub struct EvidenceIdAllocator {
    next: u32,
}

impl EvidenceIdAllocator {
    pub fn new() -> Self {
        Self { next: 1 }
    }

    /// Resume past the highest id already present in the bundle.
    pub fn resuming(bundle: &EvidenceBundle) -> Self {
        let highest = bundle
            .all_items()
            .filter_map(|item| item.id.strip_prefix("ev_")?.parse::<u32>().ok())
            .max()
            .unwrap_or(0);
        Self { next: highest + 1 }
    }

    pub fn allocate(&mut self) -> String {
        let id = format!("ev_{:03}", self.next);
        self.next += 1;
        id
    }
}

impl Default for EvidenceIdAllocator {
    fn default() -> Self {
        Self::new()
    }
}
