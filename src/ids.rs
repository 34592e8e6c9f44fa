//! Session id generation.
//!
//! Ids are millisecond timestamps rendered as strings. Two starts within the
//! same millisecond would collide, so the generator never hands out a value
//! less than or equal to the previous one.

use std::sync::atomic::{AtomicI64, Ordering};

use chrono::Utc;

use crate::model::SessionId;

#[derive(Debug, Default)]
pub struct SessionIdGenerator {
    last: AtomicI64,
}

impl SessionIdGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_id(&self) -> SessionId {
        let now = Utc::now().timestamp_millis();
        let mut prev = self.last.load(Ordering::Relaxed);
        loop {
            let candidate = now.max(prev + 1);
            match self
                .last
                .compare_exchange_weak(prev, candidate, Ordering::AcqRel, Ordering::Relaxed)
            {
                Ok(_) => return SessionId::new(candidate.to_string()),
                Err(actual) => prev = actual,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::Arc;

    use super::*;

    #[test]
    fn ids_are_strictly_increasing() {
        let ids = SessionIdGenerator::new();
        let mut prev: i64 = 0;
        for _ in 0..1000 {
            let id: i64 = ids.next_id().as_str().parse().unwrap();
            assert!(id > prev);
            prev = id;
        }
    }

    #[test]
    fn no_collisions_across_threads() {
        let ids = Arc::new(SessionIdGenerator::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let ids = Arc::clone(&ids);
                std::thread::spawn(move || (0..500).map(|_| ids.next_id()).collect::<Vec<_>>())
            })
            .collect();

        let mut seen = HashSet::new();
        for h in handles {
            for id in h.join().unwrap() {
                assert!(seen.insert(id));
            }
        }
        assert_eq!(seen.len(), 4000);
    }
}
