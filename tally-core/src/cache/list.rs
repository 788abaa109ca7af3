//! Arena-backed doubly linked recency list
//!
//! Entries live in a slot table and link to each other by index, so there
//! are no owning cycles. Freed slots are kept on a free list and reused.

/// Index of an entry's slot
pub type SlotId = usize;

#[derive(Debug)]
struct Slot {
    key: String,
    count: u64,
    prev: Option<SlotId>,
    next: Option<SlotId>,
}

/// Entries ordered from most (head) to least (tail) recently used
#[derive(Debug, Default)]
pub struct RecencyList {
    slots: Vec<Slot>,
    free: Vec<SlotId>,
    head: Option<SlotId>,
    tail: Option<SlotId>,
    len: usize,
}

impl RecencyList {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: Vec::with_capacity(capacity),
            ..Default::default()
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[cfg(test)]
    pub fn head(&self) -> Option<SlotId> {
        self.head
    }

    #[cfg(test)]
    pub fn tail(&self) -> Option<SlotId> {
        self.tail
    }

    /// Store a new entry as the most recently used
    pub fn push_front(&mut self, key: String, count: u64) -> SlotId {
        let slot = Slot {
            key,
            count,
            prev: None,
            next: None,
        };
        let id = match self.free.pop() {
            Some(id) => {
                self.slots[id] = slot;
                id
            }
            None => {
                self.slots.push(slot);
                self.slots.len() - 1
            }
        };
        self.attach(id);
        self.len += 1;
        id
    }

    /// Move an entry to the head
    pub fn promote(&mut self, id: SlotId) {
        if self.head == Some(id) {
            return;
        }
        self.detach(id);
        self.attach(id);
    }

    /// Remove the least recently used entry
    pub fn pop_back(&mut self) -> Option<(String, u64)> {
        let id = self.tail?;
        self.detach(id);
        self.len -= 1;
        self.free.push(id);

        let slot = &mut self.slots[id];
        Some((std::mem::take(&mut slot.key), std::mem::take(&mut slot.count)))
    }

    pub fn count(&self, id: SlotId) -> u64 {
        self.slots[id].count
    }

    pub fn add(&mut self, id: SlotId, amount: u64) -> u64 {
        let slot = &mut self.slots[id];
        slot.count = slot.count.saturating_add(amount);
        slot.count
    }

    /// Iterate from most to least recently used
    pub fn iter(&self) -> impl Iterator<Item = (&str, u64)> + '_ {
        let mut cursor = self.head;
        std::iter::from_fn(move || {
            let slot = &self.slots[cursor?];
            cursor = slot.next;
            Some((slot.key.as_str(), slot.count))
        })
    }

    /// Link an unlinked entry in as the new head
    fn attach(&mut self, id: SlotId) {
        self.slots[id].prev = None;
        self.slots[id].next = self.head;
        match self.head {
            Some(old_head) => self.slots[old_head].prev = Some(id),
            None => self.tail = Some(id),
        }
        self.head = Some(id);
    }

    /// Unlink an entry from wherever it sits
    fn detach(&mut self, id: SlotId) {
        let (prev, next) = {
            let slot = &self.slots[id];
            (slot.prev, slot.next)
        };

        match prev {
            Some(prev) => self.slots[prev].next = next,
            None => self.head = next,
        }
        match next {
            Some(next) => self.slots[next].prev = prev,
            None => self.tail = prev,
        }

        let slot = &mut self.slots[id];
        slot.prev = None;
        slot.next = None;
    }
}
