//! Work Module Tests
//!
//! This module contains unit and integration tests for the work distribution
//! primitives.
//!
//! ## Test Scopes
//! - **Unit Of Work**: Verifies payload-only identity, failure recording, and
//!   the persisted JSON form.
//! - **Factories**: Exercises each factory strategy against the shared
//!   completion rule (queues empty + source exhausted + done observed + no
//!   checked-out units).
//! - **Work Pool**: Runs real units through the bounded pool, including the
//!   failure paths and reclaim-on-shutdown.

#[cfg(test)]
mod tests {
    use crate::cluster::transport::MessageSender;
    use crate::error::{ClusterJobError, Result};
    use crate::server::protocol::{WORK_IS_DONE, WORK_IS_WAITING};
    use crate::work::basic::BasicWorkFactory;
    use crate::work::client::ClientWorkFactory;
    use crate::work::factory::{NextWork, WorkFactory};
    use crate::work::partitioned::PartitionWorkFactory;
    use crate::work::persisted::PersistedWorkFactory;
    use crate::work::pool::SimpleWorkPool;
    use crate::work::unit::{UnitOfWork, WorkStatus};
    use async_trait::async_trait;
    use std::collections::HashSet;
    use std::io::Write;
    use std::path::Path;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    async fn expect_unit(factory: &dyn WorkFactory) -> Arc<UnitOfWork> {
        match factory.get_next().await {
            NextWork::Unit(unit) => unit,
            other => panic!("expected a unit, got {:?}", other),
        }
    }

    // ============================================================
    // TEST 1: UnitOfWork - Identity and Failure Recording
    // ============================================================

    #[test]
    fn test_unit_identity_is_payload_only() {
        // ARRANGE: same payload, divergent statuses
        let a = UnitOfWork::new("crawl|page-7");
        let b = UnitOfWork::with_status("crawl|page-7", WorkStatus::Completed);
        b.record_failure(Some("boom".to_string()));

        // ASSERT: equality and hashing ignore status and failure reason
        assert_eq!(a, b);
        let mut set = HashSet::new();
        set.insert(a);
        assert!(set.contains(&b));
    }

    #[test]
    fn test_record_failure_distinguishes_failed_from_error() {
        let plain = UnitOfWork::new("u");
        plain.record_failure(None);
        assert_eq!(plain.work_status(), WorkStatus::Failed);
        assert_eq!(plain.failure_reason(), None);

        let traced = UnitOfWork::new("u");
        traced.record_failure(Some("stack trace".to_string()));
        assert_eq!(traced.work_status(), WorkStatus::Error);
        assert_eq!(traced.failure_reason(), Some("stack trace".to_string()));
    }

    #[test]
    fn test_unit_json_round_trip_keeps_status() {
        let unit = UnitOfWork::with_status("payload", WorkStatus::Failed);
        unit.record_failure(Some("why".to_string()));

        let json = serde_json::to_string(&unit).unwrap();
        let back: UnitOfWork = serde_json::from_str(&json).unwrap();

        assert_eq!(back.contents(), "payload");
        assert_eq!(back.work_status(), WorkStatus::Error);
        assert_eq!(back.failure_reason(), Some("why".to_string()));
    }

    #[test]
    fn test_compare_and_set_claims_once() {
        let unit = UnitOfWork::with_status("u", WorkStatus::Submitted);

        assert!(unit.compare_and_set_work_status(WorkStatus::Submitted, WorkStatus::Processing));
        // Second claimant loses
        assert!(!unit.compare_and_set_work_status(WorkStatus::Submitted, WorkStatus::Processing));
        assert_eq!(unit.work_status(), WorkStatus::Processing);
    }

    // ============================================================
    // TEST 2: BasicWorkFactory - Serving Order and Completion
    // ============================================================

    #[tokio::test]
    async fn test_basic_factory_serves_then_completes() {
        // ARRANGE
        let factory = BasicWorkFactory::from_contents(vec!["a", "b"]);

        // ACT: drain both units
        let a = expect_unit(&factory).await;
        let b = expect_unit(&factory).await;
        assert_eq!(a.contents(), "a");
        assert_eq!(b.contents(), "b");

        // ASSERT: done, but not complete until both are released
        assert!(factory.get_next().await.is_done());
        assert!(!factory.is_complete());

        factory.release(&a);
        assert!(!factory.is_complete());
        factory.release(&b);
        assert!(factory.is_complete());
    }

    #[tokio::test]
    async fn test_front_injection_preempts_native_work() {
        // ARRANGE
        let factory = BasicWorkFactory::from_contents(vec!["native"]);
        factory.add_to_front(Arc::new(UnitOfWork::new("urgent")));

        // ACT / ASSERT: injected front work wins
        assert_eq!(expect_unit(&factory).await.contents(), "urgent");
        assert_eq!(expect_unit(&factory).await.contents(), "native");
    }

    #[tokio::test]
    async fn test_back_injection_served_after_source_exhausts() {
        // ARRANGE
        let factory = BasicWorkFactory::from_contents(vec!["native"]);
        factory.add_to_back(Arc::new(UnitOfWork::new("overflow")));

        // ACT / ASSERT
        assert_eq!(expect_unit(&factory).await.contents(), "native");
        assert_eq!(expect_unit(&factory).await.contents(), "overflow");
        assert!(factory.get_next().await.is_done());
    }

    #[tokio::test]
    async fn test_injection_after_done_reopens_the_factory() {
        // ARRANGE: empty factory already reported done
        let factory = BasicWorkFactory::from_contents(Vec::<String>::new());
        assert!(factory.get_next().await.is_done());
        assert!(factory.is_complete());

        // ACT: late injection
        factory.add_to_front(Arc::new(UnitOfWork::new("late")));

        // ASSERT: no longer complete until the late unit is done
        assert!(!factory.is_complete());
        let late = expect_unit(&factory).await;
        factory.release(&late);
        assert!(factory.is_complete());
    }

    // ============================================================
    // TEST 3: PartitionWorkFactory - File Rotation
    // ============================================================

    #[tokio::test]
    async fn test_partition_factory_drains_file_before_rotating() {
        // ARRANGE: two matching files (3 + 2 lines) and one non-matching
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("part-000.txt"), "a1\na2\na3\n").unwrap();
        std::fs::write(dir.path().join("part-001.txt"), "b1\nb2\n").unwrap();
        std::fs::write(dir.path().join("README"), "ignored\n").unwrap();

        let factory = PartitionWorkFactory::new(dir.path(), r"^part-\d+\.txt$").unwrap();

        // ACT: drain everything
        let mut served = Vec::new();
        loop {
            match factory.get_next().await {
                NextWork::Unit(unit) => {
                    served.push(unit.contents().to_string());
                    factory.release(&unit);
                }
                NextWork::Done => break,
                NextWork::Waiting => panic!("unexpected waiting"),
            }
        }

        // ASSERT: 5 units, first file fully drained before the second starts
        assert_eq!(served, vec!["a1", "a2", "a3", "b1", "b2"]);
        assert!(factory.is_complete());
    }

    #[test]
    fn test_partition_factory_rejects_bad_pattern() {
        let dir = tempfile::tempdir().unwrap();
        let result = PartitionWorkFactory::new(dir.path(), "([unclosed");
        assert!(matches!(result, Err(ClusterJobError::Config(_))));
    }

    // ============================================================
    // TEST 4: PersistedWorkFactory - Replay and Reprocess
    // ============================================================

    fn write_units(path: &Path, units: &[UnitOfWork]) {
        let mut file = std::fs::File::create(path).unwrap();
        for unit in units {
            writeln!(file, "{}", serde_json::to_string(unit).unwrap()).unwrap();
        }
    }

    #[tokio::test]
    async fn test_persisted_replay_skips_completed_serves_failed() {
        // ARRANGE: input of three units; prior run completed one and failed one
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.jsonl");
        let output = dir.path().join("out.jsonl");
        write_units(
            &input,
            &[
                UnitOfWork::new("u1"),
                UnitOfWork::new("u2"),
                UnitOfWork::new("u3"),
            ],
        );
        write_units(
            &output,
            &[
                UnitOfWork::with_status("u1", WorkStatus::Completed),
                UnitOfWork::with_status("u2", WorkStatus::Failed),
            ],
        );

        let factory = PersistedWorkFactory::new(
            &input,
            &output,
            true,
            vec![WorkStatus::Failed, WorkStatus::Error],
        )
        .unwrap();

        // ACT / ASSERT: u1 is skipped, u2 (failed last run) and u3 are served
        assert_eq!(expect_unit(&factory).await.contents(), "u2");
        assert_eq!(expect_unit(&factory).await.contents(), "u3");
        assert!(factory.get_next().await.is_done());
    }

    #[test]
    fn test_persisted_replay_without_prior_output_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.jsonl");
        write_units(&input, &[UnitOfWork::new("u1")]);

        let result = PersistedWorkFactory::new(
            &input,
            &dir.path().join("missing.jsonl"),
            true,
            vec![],
        );
        assert!(matches!(result, Err(ClusterJobError::Restart(_))));
    }

    #[tokio::test]
    async fn test_persisted_release_appends_final_status() {
        // ARRANGE
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.jsonl");
        let output = dir.path().join("out.jsonl");
        write_units(&input, &[UnitOfWork::new("u1")]);

        let factory = PersistedWorkFactory::new(&input, &output, false, vec![]).unwrap();

        // ACT: process the unit and close the stream
        let unit = expect_unit(&factory).await;
        unit.set_work_status(WorkStatus::Completed);
        factory.release(&unit);
        factory.close().unwrap();

        // ASSERT: output holds the final record plus the end sentinel
        let recorded: Vec<UnitOfWork> = std::fs::read_to_string(&output)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(recorded.len(), 2);
        assert_eq!(recorded[0].contents(), "u1");
        assert_eq!(recorded[0].work_status(), WorkStatus::Completed);
        assert_eq!(recorded[1].work_status(), WorkStatus::AllDone);
    }

    #[tokio::test]
    async fn test_persisted_input_sentinel_ends_the_stream() {
        // ARRANGE: input ends with an explicit AllDone sentinel
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.jsonl");
        let output = dir.path().join("out.jsonl");
        write_units(
            &input,
            &[
                UnitOfWork::new("u1"),
                UnitOfWork::with_status("", WorkStatus::AllDone),
                UnitOfWork::new("never-served"),
            ],
        );

        let factory = PersistedWorkFactory::new(&input, &output, false, vec![]).unwrap();

        // ACT / ASSERT: nothing past the sentinel is served
        let unit = expect_unit(&factory).await;
        assert_eq!(unit.contents(), "u1");
        assert!(factory.get_next().await.is_done());
        factory.release(&unit);
        assert!(factory.is_complete());
    }

    // ============================================================
    // TEST 5: ClientWorkFactory - Remote Pull
    // ============================================================

    /// Transport stub fed from a fixed response script.
    struct ScriptedSender {
        responses: Mutex<Vec<Result<String>>>,
        requests: Mutex<Vec<String>>,
    }

    impl ScriptedSender {
        fn new(responses: Vec<Result<String>>) -> Self {
            Self {
                responses: Mutex::new(responses),
                requests: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl MessageSender for ScriptedSender {
        async fn send_request(&self, _node: &str, _job_id: u64, line: &str) -> Result<String> {
            self.requests.lock().unwrap().push(line.to_string());
            let mut responses = self.responses.lock().unwrap();
            if responses.is_empty() {
                Err(ClusterJobError::Transport("script exhausted".to_string()))
            } else {
                responses.remove(0)
            }
        }

        async fn deliver_file(
            &self,
            _node: &str,
            _remote_dir: &Path,
            _file_name: &str,
            _bytes: Vec<u8>,
        ) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_client_factory_pulls_until_done_sentinel() {
        // ARRANGE: server hands out two work strings, then the done sentinel
        let sender = Arc::new(ScriptedSender::new(vec![
            Ok("w1".to_string()),
            Ok(WORK_IS_WAITING.to_string()),
            Ok("w2".to_string()),
            Ok(WORK_IS_DONE.to_string()),
        ]));
        let factory = ClientWorkFactory::new(sender.clone(), "server-node", 9, 4, "client-node");

        // ACT / ASSERT
        let w1 = expect_unit(&factory).await;
        assert_eq!(w1.contents(), "w1");
        assert!(matches!(factory.get_next().await, NextWork::Waiting));
        let w2 = expect_unit(&factory).await;
        assert_eq!(w2.contents(), "w2");
        assert!(factory.get_next().await.is_done());

        factory.release(&w1);
        factory.release(&w2);
        assert!(factory.is_complete());

        // Every round-trip carried this side's identity
        let requests = sender.requests.lock().unwrap();
        assert!(requests.iter().all(|r| r == "get|4|client-node"));
    }

    #[tokio::test]
    async fn test_client_factory_gives_up_after_failure_budget() {
        // ARRANGE: server is dead; every request fails
        let sender = Arc::new(ScriptedSender::new(Vec::new()));
        let factory = ClientWorkFactory::new(sender, "server-node", 9, 4, "client-node")
            .with_failure_budget(2);

        // ACT: first failure is tolerated
        assert!(matches!(factory.get_next().await, NextWork::Waiting));
        // Second failure spends the budget
        assert!(factory.get_next().await.is_done());

        // ASSERT: the exhausted budget counts as normal completion
        assert!(factory.is_complete());
    }

    // ============================================================
    // TEST 6: SimpleWorkPool - Lifecycle and Reclaim
    // ============================================================

    #[tokio::test]
    async fn test_pool_runs_units_and_releases_them() {
        // ARRANGE
        let factory = Arc::new(BasicWorkFactory::from_contents(vec!["a", "b", "c"]));
        let ran = Arc::new(AtomicUsize::new(0));
        let ran_clone = ran.clone();

        let pool = SimpleWorkPool::new(factory.clone(), 2, move |_unit, _cancel| {
            let ran = ran_clone.clone();
            async move {
                ran.fetch_add(1, Ordering::SeqCst);
                Ok(true)
            }
        });

        // ACT: feed the whole factory through the pool
        while let NextWork::Unit(unit) = factory.get_next().await {
            pool.add_work(unit).await.unwrap();
        }
        let reclaimed = pool.shutdown(Duration::from_secs(5)).await;

        // ASSERT
        assert_eq!(reclaimed, 0);
        assert_eq!(ran.load(Ordering::SeqCst), 3);
        assert!(factory.is_complete());
    }

    #[tokio::test]
    async fn test_pool_records_failures_on_the_unit() {
        // ARRANGE: handler fails "bad" plainly and errors on "ugly"
        let factory = Arc::new(BasicWorkFactory::from_contents(vec!["good", "bad", "ugly"]));

        let pool = SimpleWorkPool::new(factory.clone(), 1, |unit, _cancel| async move {
            match unit.contents() {
                "good" => Ok(true),
                "bad" => Ok(false),
                _ => Err(anyhow::anyhow!("handler blew up")),
            }
        });

        let good = expect_unit(&*factory).await;
        let bad = expect_unit(&*factory).await;
        let ugly = expect_unit(&*factory).await;

        // ACT
        pool.add_work(good.clone()).await.unwrap();
        pool.add_work(bad.clone()).await.unwrap();
        pool.add_work(ugly.clone()).await.unwrap();
        pool.shutdown(Duration::from_secs(5)).await;

        // ASSERT
        assert_eq!(good.work_status(), WorkStatus::Completed);
        assert_eq!(bad.work_status(), WorkStatus::Failed);
        assert_eq!(bad.failure_reason(), None);
        assert_eq!(ugly.work_status(), WorkStatus::Error);
        assert!(ugly.failure_reason().unwrap().contains("handler blew up"));
    }

    #[tokio::test]
    async fn test_pool_rejects_work_after_shutdown() {
        let factory = Arc::new(BasicWorkFactory::from_contents(Vec::<String>::new()));
        let pool = SimpleWorkPool::new(factory, 1, |_unit, _cancel| async { Ok(true) });

        pool.shutdown(Duration::from_millis(100)).await;

        let result = pool.add_work(Arc::new(UnitOfWork::new("late"))).await;
        assert!(matches!(result, Err(ClusterJobError::PoolClosed)));
    }

    #[tokio::test]
    async fn test_pool_reclaims_stuck_units_on_shutdown() {
        // ARRANGE: a handler that never finishes
        let factory = Arc::new(BasicWorkFactory::from_contents(vec!["stuck"]));

        let pool = SimpleWorkPool::new(factory.clone(), 1, |_unit, _cancel| async move {
            std::future::pending::<()>().await;
            Ok(true)
        });

        let unit = expect_unit(&*factory).await;
        pool.add_work(unit.clone()).await.unwrap();

        // ACT: drain window far shorter than the handler
        let reclaimed = pool.shutdown(Duration::from_millis(100)).await;

        // ASSERT: the unit went back to the front of its source, reset
        assert_eq!(reclaimed, 1);
        assert_eq!(unit.work_status(), WorkStatus::Initialized);
        assert_eq!(expect_unit(&*factory).await.contents(), "stuck");
    }

    #[tokio::test]
    async fn test_pool_drops_duplicate_payload_while_in_flight() {
        // ARRANGE: the first "twin" blocks until we let it go
        let factory = Arc::new(BasicWorkFactory::from_contents(Vec::<String>::new()));
        let released = Arc::new(AtomicBool::new(false));
        let released_clone = released.clone();

        let pool = SimpleWorkPool::new(factory.clone(), 2, move |_unit, _cancel| {
            let released = released_clone.clone();
            async move {
                while !released.load(Ordering::SeqCst) {
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
                Ok(true)
            }
        });

        let first = Arc::new(UnitOfWork::new("twin"));
        let second = Arc::new(UnitOfWork::new("twin"));

        // ACT: submit two units with the same payload
        pool.add_work(first.clone()).await.unwrap();
        pool.add_work(second.clone()).await.unwrap();

        // ASSERT: the duplicate was dropped, not tracked alongside the first
        assert_eq!(pool.in_flight_count(), 1);

        released.store(true, Ordering::SeqCst);
        let reclaimed = pool.shutdown(Duration::from_secs(5)).await;
        assert_eq!(reclaimed, 0);
        assert_eq!(first.work_status(), WorkStatus::Completed);
        // The duplicate never ran; it kept its pre-submission status
        assert_eq!(second.work_status(), WorkStatus::Initialized);
    }
}
