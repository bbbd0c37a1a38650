//! LRU List Module
//!
//! Circular doubly-linked recency list stored in an arena of slots.

// == Slot Id ==
/// Stable index of a node inside an [`LruList`].
pub type SlotId = usize;

// == Node ==
#[derive(Debug)]
struct Node<T> {
    prev: SlotId,
    next: SlotId,
    /// Value of the list clock when this node was last placed at the head
    timestamp: u64,
    /// None while the slot sits on the free list
    value: Option<T>,
}

// == LRU List ==
/// Tracks recency order for LRU eviction.
///
/// Nodes live in a `Vec` and link to each other by slot index, so linking,
/// unlinking and relocating are all O(1). Reclaimed slots are kept on a
/// free list and reused. The list is circular:
/// - `head` = most recently touched
/// - `head.prev` = least recently touched (the tail)
///
/// Every placement at the head advances a clock (`head_time`) and stamps the
/// node with it, so callers can tell how far a node has aged.
#[derive(Debug)]
pub struct LruList<T> {
    nodes: Vec<Node<T>>,
    free: Vec<SlotId>,
    head: Option<SlotId>,
    len: usize,
    head_time: u64,
}

impl<T> Default for LruList<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> LruList<T> {
    // == Constructor ==
    /// Creates a new empty list.
    pub fn new() -> Self {
        Self {
            nodes: Vec::new(),
            free: Vec::new(),
            head: None,
            len: 0,
            head_time: 0,
        }
    }

    // == Push Front ==
    /// Links a new value at the head.
    ///
    /// Returns the slot it occupies and the timestamp it was stamped with.
    pub fn push_front(&mut self, value: T) -> (SlotId, u64) {
        let slot = match self.free.pop() {
            Some(slot) => {
                self.nodes[slot].value = Some(value);
                slot
            }
            None => {
                self.nodes.push(Node {
                    prev: 0,
                    next: 0,
                    timestamp: 0,
                    value: Some(value),
                });
                self.nodes.len() - 1
            }
        };
        self.len += 1;
        let stamp = self.link_front(slot);
        (slot, stamp)
    }

    // == Move To Front ==
    /// Relocates an occupied slot to the head and restamps it.
    ///
    /// Returns the new timestamp, or None if the slot is not occupied.
    pub fn move_to_front(&mut self, slot: SlotId) -> Option<u64> {
        if !self.is_occupied(slot) {
            return None;
        }
        if self.head == Some(slot) {
            self.head_time += 1;
            self.nodes[slot].timestamp = self.head_time;
            return Some(self.head_time);
        }
        self.unlink(slot);
        Some(self.link_front(slot))
    }

    // == Remove ==
    /// Unlinks a slot and returns its value. The slot becomes reusable.
    pub fn remove(&mut self, slot: SlotId) -> Option<T> {
        if !self.is_occupied(slot) {
            return None;
        }
        self.unlink(slot);
        self.len -= 1;
        self.free.push(slot);
        self.nodes[slot].value.take()
    }

    // == Pop Back ==
    /// Removes and returns the least recently touched value.
    pub fn pop_back(&mut self) -> Option<T> {
        let tail = self.tail()?;
        self.remove(tail)
    }

    // == Peek Back ==
    /// Returns the least recently touched value without removing it.
    pub fn peek_back(&self) -> Option<&T> {
        self.tail().and_then(|slot| self.get(slot))
    }

    /// Returns the slot of the least recently touched value.
    pub fn tail(&self) -> Option<SlotId> {
        self.head.map(|head| self.nodes[head].prev)
    }

    /// Returns the slot of the most recently touched value.
    pub fn head(&self) -> Option<SlotId> {
        self.head
    }

    /// Returns the value stored in `slot`, if occupied.
    pub fn get(&self, slot: SlotId) -> Option<&T> {
        self.nodes.get(slot).and_then(|node| node.value.as_ref())
    }

    /// Returns the timestamp of an occupied slot.
    pub fn timestamp(&self, slot: SlotId) -> Option<u64> {
        if self.is_occupied(slot) {
            Some(self.nodes[slot].timestamp)
        } else {
            None
        }
    }

    /// Returns the current value of the list clock.
    pub fn head_time(&self) -> u64 {
        self.head_time
    }

    // == Length ==
    /// Returns the number of linked values.
    pub fn len(&self) -> usize {
        self.len
    }

    // == Is Empty ==
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    // == Iter ==
    /// Iterates from the head (most recent) to the tail (least recent).
    pub fn iter(&self) -> Iter<'_, T> {
        Iter {
            list: self,
            next: self.head,
            remaining: self.len,
        }
    }

    // == Drain ==
    /// Removes every value, head first, and resets the arena.
    ///
    /// The clock keeps running so timestamps stay monotonic.
    pub fn drain(&mut self) -> Vec<T> {
        let mut values = Vec::with_capacity(self.len);
        let mut next = self.head;
        for _ in 0..self.len {
            let Some(slot) = next else { break };
            next = Some(self.nodes[slot].next);
            if let Some(value) = self.nodes[slot].value.take() {
                values.push(value);
            }
        }
        self.nodes.clear();
        self.free.clear();
        self.head = None;
        self.len = 0;
        values
    }

    fn is_occupied(&self, slot: SlotId) -> bool {
        self.nodes
            .get(slot)
            .is_some_and(|node| node.value.is_some())
    }

    // Caller guarantees `slot` is occupied but detached.
    fn link_front(&mut self, slot: SlotId) -> u64 {
        match self.head {
            Some(head) => {
                let tail = self.nodes[head].prev;
                self.nodes[slot].prev = tail;
                self.nodes[slot].next = head;
                self.nodes[tail].next = slot;
                self.nodes[head].prev = slot;
            }
            None => {
                self.nodes[slot].prev = slot;
                self.nodes[slot].next = slot;
            }
        }
        self.head = Some(slot);
        self.head_time += 1;
        self.nodes[slot].timestamp = self.head_time;
        self.head_time
    }

    // Caller guarantees `slot` is occupied and linked.
    fn unlink(&mut self, slot: SlotId) {
        let prev = self.nodes[slot].prev;
        let next = self.nodes[slot].next;
        if next == slot {
            self.head = None;
        } else {
            self.nodes[prev].next = next;
            self.nodes[next].prev = prev;
            if self.head == Some(slot) {
                self.head = Some(next);
            }
        }
        self.nodes[slot].prev = slot;
        self.nodes[slot].next = slot;
    }
}

// == Iterator ==
/// Head-to-tail iterator over an [`LruList`].
pub struct Iter<'a, T> {
    list: &'a LruList<T>,
    next: Option<SlotId>,
    remaining: usize,
}

impl<'a, T> Iterator for Iter<'a, T> {
    type Item = &'a T;

    fn next(&mut self) -> Option<&'a T> {
        if self.remaining == 0 {
            return None;
        }
        let slot = self.next?;
        let node = &self.list.nodes[slot];
        self.remaining -= 1;
        self.next = Some(node.next);
        node.value.as_ref()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}
