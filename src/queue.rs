use crate::types::IpInfo;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// RTT-sorted, size-bounded store of accepted endpoints.
///
/// Holds the `max_size` lowest-RTT entries seen so far (unbounded when `max_size` is 0).
/// Safe to read while a scan is still inserting.
#[derive(Debug, Default)]
pub struct ResultQueue {
    entries: Mutex<Vec<IpInfo>>,
    max_size: usize,
}

impl ResultQueue {
    pub fn new(max_size: usize) -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            max_size,
        }
    }

    /// Insert in RTT order; returns the entry evicted to stay within capacity, if any.
    pub fn enqueue(&self, info: IpInfo) -> Option<IpInfo> {
        let mut q = self.lock();
        let idx = q.partition_point(|x| x.rtt <= info.rtt);
        q.insert(idx, info);
        if self.max_size > 0 && q.len() > self.max_size {
            return q.pop();
        }
        None
    }

    /// Snapshot of the current contents, ascending by RTT unless `desc`.
    pub fn available_ips(&self, desc: bool) -> Vec<IpInfo> {
        let mut out = self.lock().clone();
        if desc {
            out.reverse();
        }
        out
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // insert/pop never leave the Vec unsorted, so a poisoned lock is still consistent.
    fn lock(&self) -> MutexGuard<'_, Vec<IpInfo>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;
    use std::time::Duration;

    fn info(last: u8, rtt_ms: u64) -> IpInfo {
        let addr: SocketAddr = format!("10.0.0.{last}:2408").parse().unwrap();
        IpInfo::new(addr, Duration::from_millis(rtt_ms))
    }

    fn rtts(q: &ResultQueue, desc: bool) -> Vec<u128> {
        q.available_ips(desc).iter().map(|i| i.rtt.as_millis()).collect()
    }

    #[test]
    fn keeps_ascending_order() {
        let q = ResultQueue::new(0);
        for (i, ms) in [50, 10, 30, 10, 90, 20].into_iter().enumerate() {
            q.enqueue(info(i as u8 + 1, ms));
        }
        assert_eq!(rtts(&q, false), vec![10, 10, 20, 30, 50, 90]);
        assert_eq!(rtts(&q, true), vec![90, 50, 30, 20, 10, 10]);
    }

    #[test]
    fn evicts_highest_rtt_when_full() {
        let q = ResultQueue::new(3);
        assert!(q.enqueue(info(1, 40)).is_none());
        assert!(q.enqueue(info(2, 20)).is_none());
        assert!(q.enqueue(info(3, 30)).is_none());
        let evicted = q.enqueue(info(4, 10)).unwrap();
        assert_eq!(evicted.rtt, Duration::from_millis(40));
        // a worse entry than everything retained is evicted immediately
        let evicted = q.enqueue(info(5, 99)).unwrap();
        assert_eq!(evicted.addr.ip().to_string(), "10.0.0.5");
        assert_eq!(rtts(&q, false), vec![10, 20, 30]);
        assert_eq!(q.len(), 3);
    }

    #[test]
    fn duplicates_are_independent_measurements() {
        let q = ResultQueue::new(0);
        q.enqueue(info(1, 10));
        q.enqueue(info(1, 12));
        assert_eq!(q.len(), 2);
    }

    #[test]
    fn snapshot_is_a_copy() {
        let q = ResultQueue::new(0);
        q.enqueue(info(1, 10));
        let snap = q.available_ips(false);
        q.enqueue(info(2, 5));
        assert_eq!(snap.len(), 1);
        assert_eq!(q.len(), 2);
    }
}
