//! Binary min-heap shared by the timer queue and path search.
//!
//! Ordering comes from [`HeapKey::heap_less`] rather than `Ord` so that
//! wrapping tick comparisons can be used as the heap order.

/// Strict "sorts before" relation for heap elements.
pub trait HeapKey {
    fn heap_less(&self, other: &Self) -> bool;
}

#[derive(Debug, Clone)]
pub struct MinHeap<T> {
    data: Vec<T>,
}

impl<T> Default for MinHeap<T> {
    fn default() -> Self {
        MinHeap { data: Vec::new() }
    }
}

impl<T: HeapKey> MinHeap<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        MinHeap { data: Vec::with_capacity(capacity) }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn clear(&mut self) {
        self.data.clear();
    }

    /// Grow storage in fixed chunks when full.
    pub fn ensure(&mut self, extra: usize, chunk: usize) {
        if self.data.len() + extra > self.data.capacity() {
            self.data.reserve(extra.max(chunk));
        }
    }

    pub fn peek(&self) -> Option<&T> {
        self.data.first()
    }

    pub fn push(&mut self, item: T) {
        self.data.push(item);
        let last = self.data.len() - 1;
        self.sift_up(last);
    }

    pub fn pop(&mut self) -> Option<T> {
        self.remove_at(0)
    }

    /// Remove the element at `index`, restoring the heap property.
    pub fn remove_at(&mut self, index: usize) -> Option<T> {
        if index >= self.data.len() {
            return None;
        }
        let removed = self.data.swap_remove(index);
        if index < self.data.len() {
            self.restore(index);
        }
        Some(removed)
    }

    /// Mutate the element at `index` in place and move it to its new position.
    pub fn update_at<F: FnOnce(&mut T)>(&mut self, index: usize, f: F) -> bool {
        match self.data.get_mut(index) {
            Some(item) => {
                f(item);
                self.restore(index);
                true
            }
            None => false,
        }
    }

    /// Linear search for an element. O(n).
    pub fn position<P: FnMut(&T) -> bool>(&self, pred: P) -> Option<usize> {
        self.data.iter().position(pred)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.data.iter()
    }

    fn restore(&mut self, index: usize) {
        if index > 0 && self.data[index].heap_less(&self.data[(index - 1) / 2]) {
            self.sift_up(index);
        } else {
            self.sift_down(index);
        }
    }

    fn sift_up(&mut self, mut index: usize) {
        while index > 0 {
            let parent = (index - 1) / 2;
            if !self.data[index].heap_less(&self.data[parent]) {
                break;
            }
            self.data.swap(index, parent);
            index = parent;
        }
    }

    fn sift_down(&mut self, mut index: usize) {
        let len = self.data.len();
        loop {
            let left = 2 * index + 1;
            if left >= len {
                break;
            }
            let right = left + 1;
            let mut child = left;
            if right < len && self.data[right].heap_less(&self.data[left]) {
                child = right;
            }
            if !self.data[child].heap_less(&self.data[index]) {
                break;
            }
            self.data.swap(index, child);
            index = child;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq)]
    struct Key(i64);

    impl HeapKey for Key {
        fn heap_less(&self, other: &Self) -> bool {
            self.0 < other.0
        }
    }

    fn assert_heap(heap: &MinHeap<Key>) {
        let items: Vec<_> = heap.iter().copied().collect();
        for i in 1..items.len() {
            assert!(items[(i - 1) / 2].0 <= items[i].0, "heap property broken at {i}: {items:?}");
        }
        if let Some(top) = heap.peek() {
            assert!(items.iter().all(|k| top.0 <= k.0));
        }
    }

    #[test]
    fn test_pop_sorted() {
        let mut heap = MinHeap::new();
        for v in [5, 3, 9, 1, 7, 2, 8] {
            heap.push(Key(v));
        }
        let mut out = Vec::new();
        while let Some(k) = heap.pop() {
            out.push(k.0);
        }
        assert_eq!(out, vec![1, 2, 3, 5, 7, 8, 9]);
    }

    #[test]
    fn test_invariant_under_mixed_ops() {
        let mut heap = MinHeap::new();
        let mut seed: u64 = 0x2545_F491_4F6C_DD1D;
        let mut next = || {
            seed ^= seed << 13;
            seed ^= seed >> 7;
            seed ^= seed << 17;
            seed
        };
        for _ in 0..2000 {
            match next() % 4 {
                0 | 1 => heap.push(Key((next() % 1000) as i64)),
                2 => {
                    heap.pop();
                }
                _ => {
                    if !heap.is_empty() {
                        let idx = (next() as usize) % heap.len();
                        if next() % 2 == 0 {
                            heap.remove_at(idx);
                        } else {
                            let v = (next() % 1000) as i64;
                            heap.update_at(idx, |k| k.0 = v);
                        }
                    }
                }
            }
            assert_heap(&heap);
        }
    }

    #[test]
    fn test_remove_out_of_range() {
        let mut heap: MinHeap<Key> = MinHeap::new();
        assert!(heap.remove_at(0).is_none());
        assert!(!heap.update_at(3, |k| k.0 = 1));
    }

    #[test]
    fn test_position() {
        let mut heap = MinHeap::with_capacity(4);
        heap.push(Key(4));
        heap.push(Key(2));
        let idx = heap.position(|k| k.0 == 4).unwrap();
        assert_eq!(heap.remove_at(idx), Some(Key(4)));
        assert_eq!(heap.len(), 1);
    }
}
