//! Sequencer Tests
//!
//! Ranges must be disjoint and increasing under concurrency, and the file
//! backed sequencer must never go backwards across a restart.

#[cfg(test)]
mod tests {
    use crate::sequence::{FileSequencer, MemorySequencer, Sequencer};
    use std::sync::Arc;

    #[test]
    fn test_memory_sequencer_starts_at_one() {
        let seq = MemorySequencer::new();
        assert_eq!(seq.next_file_id(1), (1, 1));
        assert_eq!(seq.next_file_id(5), (2, 5));
        assert_eq!(seq.peek(), 7);
    }

    #[test]
    fn test_zero_count_still_claims_one_key() {
        let seq = MemorySequencer::new();
        let (a, count) = seq.next_file_id(0);
        let (b, _) = seq.next_file_id(1);
        assert_eq!(count, 1);
        assert!(b > a);
    }

    #[test]
    fn test_set_max_only_moves_forward() {
        let seq = MemorySequencer::new();
        seq.set_max(100);
        assert_eq!(seq.peek(), 101);
        seq.set_max(10);
        assert_eq!(seq.peek(), 101);
        assert_eq!(seq.next_file_id(1).0, 101);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_ranges_are_disjoint() {
        let seq = Arc::new(MemorySequencer::new());
        let mut handles = Vec::new();

        for worker in 0..8u64 {
            let seq = seq.clone();
            handles.push(tokio::spawn(async move {
                let mut ranges = Vec::new();
                for i in 0..500u64 {
                    let count = (worker + i) % 7 + 1;
                    let (start, granted) = seq.next_file_id(count);
                    assert_eq!(granted, count);
                    ranges.push((start, granted));
                }
                ranges
            }));
        }

        let mut all = Vec::new();
        for handle in handles {
            let ranges = handle.await.unwrap();
            // each caller observes strictly increasing starts
            for pair in ranges.windows(2) {
                assert!(pair[1].0 >= pair[0].0 + pair[0].1);
            }
            all.extend(ranges);
        }

        all.sort();
        for pair in all.windows(2) {
            let (start, count) = pair[0];
            assert!(start + count <= pair[1].0, "overlap between {:?}", pair);
        }
    }

    #[test]
    fn test_file_sequencer_resumes_past_issued_keys() {
        let path = std::env::temp_dir().join(format!("seq-{}.json", uuid::Uuid::new_v4()));

        let last = {
            let seq = FileSequencer::open(&path).unwrap();
            let (start, count) = seq.next_file_id(25);
            assert_eq!(start, 1);
            start + count - 1
        };

        let seq = FileSequencer::open(&path).unwrap();
        let (start, _) = seq.next_file_id(1);
        assert!(start > last, "restart reissued key {}", start);

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_file_sequencer_set_max_persists() {
        let path = std::env::temp_dir().join(format!("seq-{}.json", uuid::Uuid::new_v4()));

        {
            let seq = FileSequencer::open(&path).unwrap();
            seq.set_max(50_000);
            assert_eq!(seq.peek(), 50_001);
        }

        let seq = FileSequencer::open(&path).unwrap();
        assert!(seq.peek() > 50_000);

        let _ = std::fs::remove_file(&path);
    }
}
