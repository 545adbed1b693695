//! Batch Module Tests
//!
//! This module contains unit tests for the machine-affinity distribution layer.
//!
//! ## Test Scopes
//! - **PathBatch**: Verifies machine inference, distribution policies, and
//!   completion accounting.
//! - **DispatchLog**: Validates record format and restart reconciliation
//!   against a prior run's log.

#[cfg(test)]
mod tests {
    use crate::batch::dispatch_log::DispatchLog;
    use crate::batch::path_batch::{BatchNext, DistributionPolicy, PathBatch, LOCAL_MACHINE};
    use std::io::Write;

    // ============================================================
    // TEST 1: PathBatch - Machine Inference
    // ============================================================

    #[test]
    fn test_add_path_buckets_by_inferred_machine() {
        // ARRANGE
        let batch = PathBatch::new(DistributionPolicy::Randomized);

        // ACT: one path per inference convention
        batch.add_path("alpha:/data/part-0|arg");
        batch.add_path("/mnt/bravo/data/part-1|arg");
        batch.add_path("/tmp/no-machine-here|arg");

        // ASSERT: three distinct machine queues
        assert_eq!(batch.machine_count(), 3);
        assert_eq!(batch.get_remaining_estimate(), 3);
        assert!(!batch.is_cache_machine("alpha"));
        assert!(!batch.is_cache_machine(LOCAL_MACHINE));
    }

    #[test]
    fn test_cache_convention_registers_proxy_machine() {
        // ARRANGE
        let batch = PathBatch::new(DistributionPolicy::OwnOnly { accept_help: false });

        // ACT: charlie serves a cached copy of delta's data
        batch.add_path("charlie^delta:/data/part-9|arg");

        // ASSERT
        assert!(batch.is_cache_machine("charlie"));
        assert_eq!(batch.machine_count(), 1);
    }

    // ============================================================
    // TEST 2: PathBatch - Distribution Policies
    // ============================================================

    #[test]
    fn test_own_only_prefers_own_queue() {
        // ARRANGE
        let batch = PathBatch::new(DistributionPolicy::OwnOnly { accept_help: false });
        batch.add_path("alpha:/data/a|x");
        batch.add_path("bravo:/data/b|x");

        // ACT
        let next = batch.get_next("bravo");

        // ASSERT: bravo is handed its own work, not alpha's
        assert_eq!(next, BatchNext::Path("bravo:/data/b|x".to_string()));
    }

    #[test]
    fn test_own_only_never_steals_cache_work() {
        // ARRANGE: the only remaining work is another machine's cached copy
        let batch = PathBatch::new(DistributionPolicy::OwnOnly { accept_help: false });
        batch.add_path("charlie^delta:/data/part-9|arg");

        // ACT
        let next = batch.get_next("alpha");

        // ASSERT: alpha must wait, and the work is still there for charlie
        assert_eq!(next, BatchNext::Waiting);
        assert_eq!(batch.get_remaining_estimate(), 1);
        assert!(matches!(batch.get_next("charlie"), BatchNext::Path(_)));
    }

    #[test]
    fn test_own_only_helps_with_non_cache_work() {
        // ARRANGE: bravo's plain queue is fair game for a finished machine
        let batch = PathBatch::new(DistributionPolicy::OwnOnly { accept_help: false });
        batch.add_path("bravo:/data/b|x");

        // ACT
        let next = batch.get_next("alpha");

        // ASSERT
        assert_eq!(next, BatchNext::Path("bravo:/data/b|x".to_string()));
    }

    #[test]
    fn test_accept_help_falls_back_to_cache_queues() {
        // ARRANGE
        let batch = PathBatch::new(DistributionPolicy::OwnOnly { accept_help: true });
        batch.add_path("charlie^delta:/data/part-9|arg");

        // ACT
        let next = batch.get_next("alpha");

        // ASSERT: with accept_help the cache owner's work can be taken
        assert_eq!(next, BatchNext::Path("charlie^delta:/data/part-9|arg".to_string()));
    }

    #[test]
    fn test_randomized_drains_everything() {
        // ARRANGE
        let batch = PathBatch::new(DistributionPolicy::Randomized);
        batch.add_path("alpha:/data/a|x");
        batch.add_path("bravo:/data/b|x");
        batch.add_path("charlie^delta:/data/c|x");

        // ACT: any requester may take any queue
        let mut seen = Vec::new();
        for _ in 0..3 {
            match batch.get_next("whoever") {
                BatchNext::Path(p) => seen.push(p),
                other => panic!("expected a path, got {:?}", other),
            }
        }

        // ASSERT
        assert_eq!(seen.len(), 3);
        assert_eq!(batch.get_next("whoever"), BatchNext::Done);
        assert!(batch.is_complete());
    }

    // ============================================================
    // TEST 3: PathBatch - Completion Accounting
    // ============================================================

    #[test]
    fn test_done_only_when_map_is_empty() {
        // ARRANGE
        let batch = PathBatch::new(DistributionPolicy::Randomized);
        assert_eq!(batch.get_next("alpha"), BatchNext::Done);

        batch.add_path("alpha:/data/a|x");
        assert!(!batch.is_complete());

        // ACT: drain the single unit
        assert!(matches!(batch.get_next("alpha"), BatchNext::Path(_)));

        // ASSERT: the emptied queue was evicted, so the batch is complete
        assert!(batch.is_complete());
        assert_eq!(batch.get_remaining_estimate(), 0);
        assert_eq!(batch.get_next("alpha"), BatchNext::Done);
    }

    #[test]
    fn test_remove_path_updates_estimate() {
        // ARRANGE
        let batch = PathBatch::new(DistributionPolicy::Randomized);
        batch.add_path("alpha:/data/a|x");
        batch.add_path("alpha:/data/b|x");

        // ACT
        assert!(batch.remove_path("alpha:/data/a|x"));
        assert!(!batch.remove_path("alpha:/data/a|x"));

        // ASSERT
        assert_eq!(batch.get_remaining_estimate(), 1);
        assert!(!batch.is_complete());
    }

    // ============================================================
    // TEST 4: Batch File Loading
    // ============================================================

    #[test]
    fn test_load_file_skips_comments_and_blanks() {
        // ARRANGE
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("batch.txt");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "# header comment").unwrap();
        writeln!(file, "alpha:/data/a|x").unwrap();
        writeln!(file).unwrap();
        writeln!(file, "echo skipped shell line").unwrap();
        writeln!(file, "bravo:/data/b|x").unwrap();

        let batch = PathBatch::new(DistributionPolicy::Randomized);

        // ACT
        let added = batch.load_file(&path).unwrap();

        // ASSERT
        assert_eq!(added, 2);
        assert_eq!(batch.get_remaining_estimate(), 2);
    }

    // ============================================================
    // TEST 5: DispatchLog - Record Format and Replay
    // ============================================================

    #[test]
    fn test_dispatch_log_record_format() {
        // ARRANGE
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dispatch.log");
        let log = DispatchLog::open(&path).unwrap();

        // ACT: work string itself contains pipes
        log.record("alpha:/data/a|arg1|arg2", "node-1").unwrap();
        log.close().unwrap();

        // ASSERT: trailing fields parse from the right
        let content = std::fs::read_to_string(&path).unwrap();
        let line = content.lines().next().unwrap();
        let trailing: Vec<&str> = line.rsplitn(4, '|').collect();
        assert_eq!(trailing.len(), 4);
        assert_eq!(trailing[1], "node-1");
        assert!(trailing[2].parse::<u64>().is_ok());

        let keys = DispatchLog::read_dispatched_keys(&path).unwrap();
        assert_eq!(keys, vec!["alpha:/data/a".to_string()]);
    }

    #[test]
    fn test_read_dispatched_keys_skips_malformed_lines() {
        // ARRANGE
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dispatch.log");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "garbage without pipes").unwrap();
        writeln!(file, "alpha:/data/a|123|node-1|2026-01-01 00:00:00.000").unwrap();

        // ACT
        let keys = DispatchLog::read_dispatched_keys(&path).unwrap();

        // ASSERT
        assert_eq!(keys, vec!["alpha:/data/a".to_string()]);
    }

    // ============================================================
    // TEST 6: Restart Reconciliation
    // ============================================================

    #[test]
    fn test_restart_removes_exactly_the_dispatched_paths() {
        // ARRANGE: first run dispatched 3 of 5 paths
        let dir = tempfile::tempdir().unwrap();
        let log_path = dir.path().join("dispatch.log");
        let log = DispatchLog::open(&log_path).unwrap();
        log.record("alpha:/data/a|x", "node-1").unwrap();
        log.record("bravo:/data/b|x", "node-2").unwrap();
        log.record("alpha:/data/c|x", "node-1").unwrap();
        log.close().unwrap();

        // Fresh batch load on restart, as if from the same batch file
        let batch = PathBatch::new(DistributionPolicy::Randomized);
        batch.add_path("alpha:/data/a|x");
        batch.add_path("bravo:/data/b|x");
        batch.add_path("alpha:/data/c|x");
        batch.add_path("alpha:/data/d|x");
        batch.add_path("bravo:/data/e|x");

        // ACT
        let removed = batch.remove_finished_work(&log_path).unwrap();

        // ASSERT: exactly the logged work is gone
        assert_eq!(removed, 3);
        assert_eq!(batch.get_remaining_estimate(), 2);
        let mut remaining = Vec::new();
        loop {
            match batch.get_next("anyone") {
                BatchNext::Path(p) => remaining.push(p),
                BatchNext::Done => break,
                BatchNext::Waiting => panic!("unexpected waiting"),
            }
        }
        remaining.sort();
        assert_eq!(
            remaining,
            vec!["alpha:/data/d|x".to_string(), "bravo:/data/e|x".to_string()]
        );
    }
}
