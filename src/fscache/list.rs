//! Access-ordered list backed by an arena
//!
//! Nodes live in a `Vec` and link to each other by index. Vacated slots go
//! on a free list and are reused, so handles stay valid until their node
//! is removed.

/// Stable reference to a node in an [`AccessList`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Handle(usize);

#[derive(Debug)]
struct Node<T> {
    value: T,
    prev: Option<usize>,
    next: Option<usize>,
}

/// Doubly-linked list, most recently used at the front
#[derive(Debug)]
pub(crate) struct AccessList<T> {
    nodes: Vec<Option<Node<T>>>,
    free: Vec<usize>,
    head: Option<usize>,
    tail: Option<usize>,
    len: usize,
}

impl<T> AccessList<T> {
    pub(crate) fn new() -> Self {
        Self {
            nodes: Vec::new(),
            free: Vec::new(),
            head: None,
            tail: None,
            len: 0,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }

    /// Insert a value as most recently used
    pub(crate) fn push_front(&mut self, value: T) -> Handle {
        let node = Node {
            value,
            prev: None,
            next: None,
        };
        let idx = match self.free.pop() {
            Some(idx) => {
                self.nodes[idx] = Some(node);
                idx
            }
            None => {
                self.nodes.push(Some(node));
                self.nodes.len() - 1
            }
        };
        self.link_front(idx);
        self.len += 1;
        Handle(idx)
    }

    pub(crate) fn get(&self, handle: Handle) -> Option<&T> {
        self.node(handle.0).map(|node| &node.value)
    }

    /// Least recently used node
    pub(crate) fn back(&self) -> Option<Handle> {
        self.tail.map(Handle)
    }

    /// Mark a node as most recently used
    pub(crate) fn move_to_front(&mut self, handle: Handle) {
        if self.head == Some(handle.0) || self.node(handle.0).is_none() {
            return;
        }
        self.unlink(handle.0);
        self.link_front(handle.0);
    }

    /// Remove a node from any position, returning its value
    pub(crate) fn remove(&mut self, handle: Handle) -> Option<T> {
        self.node(handle.0)?;
        self.unlink(handle.0);
        let node = self.nodes[handle.0].take()?;
        self.free.push(handle.0);
        self.len -= 1;
        Some(node.value)
    }

    /// Values from most to least recently used
    #[cfg(test)]
    pub(crate) fn iter(&self) -> impl Iterator<Item = &T> + '_ {
        let mut cursor = self.head;
        std::iter::from_fn(move || {
            let node = self.node(cursor?)?;
            cursor = node.next;
            Some(&node.value)
        })
    }

    fn node(&self, idx: usize) -> Option<&Node<T>> {
        self.nodes.get(idx).and_then(Option::as_ref)
    }

    fn node_mut(&mut self, idx: usize) -> Option<&mut Node<T>> {
        self.nodes.get_mut(idx).and_then(Option::as_mut)
    }

    fn link_front(&mut self, idx: usize) {
        let old_head = self.head;
        if let Some(node) = self.node_mut(idx) {
            node.prev = None;
            node.next = old_head;
        }
        match old_head.and_then(|h| self.node_mut(h)) {
            Some(head) => head.prev = Some(idx),
            None => self.tail = Some(idx),
        }
        self.head = Some(idx);
    }

    fn unlink(&mut self, idx: usize) {
        let Some((prev, next)) = self.node(idx).map(|n| (n.prev, n.next)) else {
            return;
        };

        match prev.and_then(|p| self.node_mut(p)) {
            Some(p) => p.next = next,
            // First element
            None => self.head = next,
        }
        match next.and_then(|n| self.node_mut(n)) {
            Some(n) => n.prev = prev,
            // Last element
            None => self.tail = prev,
        }

        if let Some(node) = self.node_mut(idx) {
            node.prev = None;
            node.next = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn order(list: &AccessList<&'static str>) -> Vec<&'static str> {
        list.iter().copied().collect()
    }

    #[test]
    fn test_push_front_orders_by_recency() {
        let mut list = AccessList::new();
        let a = list.push_front("a");
        list.push_front("b");
        list.push_front("c");

        assert_eq!(order(&list), vec!["c", "b", "a"]);
        assert_eq!(list.back(), Some(a));
        assert_eq!(list.len(), 3);
    }

    #[test]
    fn test_move_to_front() {
        let mut list = AccessList::new();
        let a = list.push_front("a");
        let b = list.push_front("b");
        let c = list.push_front("c");

        list.move_to_front(a);
        assert_eq!(order(&list), vec!["a", "c", "b"]);
        assert_eq!(list.back(), Some(b));

        // Already at front
        list.move_to_front(a);
        assert_eq!(order(&list), vec!["a", "c", "b"]);

        list.move_to_front(c);
        assert_eq!(order(&list), vec!["c", "a", "b"]);
    }

    #[test]
    fn test_remove_from_any_position() {
        let mut list = AccessList::new();
        let a = list.push_front("a");
        let b = list.push_front("b");
        let c = list.push_front("c");

        assert_eq!(list.remove(b), Some("b"));
        assert_eq!(order(&list), vec!["c", "a"]);

        assert_eq!(list.remove(c), Some("c"));
        assert_eq!(order(&list), vec!["a"]);
        assert_eq!(list.back(), Some(a));

        // Removing the sole element resets head and tail
        assert_eq!(list.remove(a), Some("a"));
        assert_eq!(list.len(), 0);
        assert_eq!(list.back(), None);
        assert_eq!(order(&list), Vec::<&str>::new());

        // Stale handle
        assert_eq!(list.remove(a), None);
        assert!(list.get(a).is_none());
    }

    #[test]
    fn test_slots_are_reused() {
        let mut list = AccessList::new();
        let a = list.push_front("a");
        list.push_front("b");
        list.remove(a);

        let c = list.push_front("c");
        assert_eq!(c, a);
        assert_eq!(list.get(c), Some(&"c"));
        assert_eq!(list.nodes.len(), 2);
        assert_eq!(order(&list), vec!["c", "b"]);
    }
}
