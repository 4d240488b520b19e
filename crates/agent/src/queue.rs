//! Thread-safe FIFO of pending external inputs.
//!
//! Producers (API handlers, webhooks, cron, tools) push; the worker
//! drains everything in one shot at the top of a turn. Push order
//! across concurrent producers is the serialized order of lock
//! acquisition.

use std::collections::VecDeque;

use parking_lot::Mutex;

use keel_domain::input::Input;

#[derive(Default)]
pub struct InputQueue {
    items: Mutex<VecDeque<Input>>,
}

impl InputQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, input: Input) {
        self.items.lock().push_back(input);
    }

    /// Atomically remove and return all queued inputs, in push order.
    pub fn drain(&self) -> Vec<Input> {
        self.items.lock().drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn input(content: &str) -> Input {
        Input::new("s1", content, "api")
    }

    #[test]
    fn drain_returns_fifo_order() {
        let q = InputQueue::new();
        q.push(input("a"));
        q.push(input("b"));
        q.push(input("c"));
        assert_eq!(q.len(), 3);

        let drained = q.drain();
        let contents: Vec<_> = drained.iter().map(|i| i.content.as_str()).collect();
        assert_eq!(contents, vec!["a", "b", "c"]);
        assert!(q.is_empty());
    }

    #[test]
    fn drain_empty_queue() {
        let q = InputQueue::new();
        assert!(q.drain().is_empty());
        assert_eq!(q.len(), 0);
    }

    #[test]
    fn push_after_drain_works() {
        let q = InputQueue::new();
        q.push(input("a"));
        q.drain();
        q.push(input("b"));
        assert_eq!(q.drain()[0].content, "b");
    }

    #[test]
    fn concurrent_pushes_all_arrive() {
        let q = Arc::new(InputQueue::new());
        let mut handles = Vec::new();
        for t in 0..8 {
            let q = q.clone();
            handles.push(std::thread::spawn(move || {
                for i in 0..100 {
                    q.push(Input::new("s1", format!("t{t}-{i}"), "api"));
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }

        let drained = q.drain();
        assert_eq!(drained.len(), 800);

        // FIFO per producer: each thread's items appear in its own order.
        for t in 0..8 {
            let prefix = format!("t{t}-");
            let seq: Vec<usize> = drained
                .iter()
                .filter_map(|i| i.content.strip_prefix(&prefix))
                .map(|n| n.parse().unwrap())
                .collect();
            assert_eq!(seq, (0..100).collect::<Vec<_>>());
        }
    }
}
