// Upload coordinator tests against an in-memory remote: block partitioning
// and ordering, ticket reuse, retry budgets, and progress reporting.

mod common;

use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};

use capture_uplink::error::UploadError;
use capture_uplink::UploadCoordinator;
use common::{fast_upload_config, FakeRemote};

const MIB: usize = 1024 * 1024;

#[tokio::test]
async fn three_and_a_half_mib_upload_as_four_ordered_blocks() {
    let remote = Arc::new(FakeRemote::new());
    let coordinator =
        UploadCoordinator::new(remote.clone()).with_config(fast_upload_config(MIB));

    let buffer = vec![0xABu8; 3 * MIB + MIB / 2];
    let key = coordinator.upload(&buffer, "audio/wav").await.unwrap();
    assert_eq!(key, "remote-key-1");

    let puts = remote.puts.lock().unwrap();
    assert_eq!(puts.len(), 4, "3 full blocks + 1 partial");
    assert_eq!(puts[0].payload.len(), MIB);
    assert_eq!(puts[3].payload.len(), MIB / 2);

    // Uniform-length ids whose lexical order is the upload order
    let first_len = puts[0].block_id.len();
    assert!(puts.iter().all(|p| p.block_id.len() == first_len));

    let commits = remote.commits.lock().unwrap();
    assert_eq!(commits.len(), 1);
    let (_, block_list) = &commits[0];
    let mut sorted = block_list.clone();
    sorted.sort();
    assert_eq!(*block_list, sorted, "commit list must be in ascending ordinal order");
    assert_eq!(
        block_list,
        &puts.iter().map(|p| p.block_id.clone()).collect::<Vec<_>>()
    );
}

#[tokio::test]
async fn buffer_smaller_than_block_size_is_exactly_one_block() {
    let remote = Arc::new(FakeRemote::new());
    let coordinator =
        UploadCoordinator::new(remote.clone()).with_config(fast_upload_config(MIB));

    coordinator.upload(b"tiny", "audio/wav").await.unwrap();

    assert_eq!(remote.put_count(), 1);
    assert_eq!(remote.committed_bytes().unwrap(), b"tiny");
}

#[tokio::test]
async fn progress_is_reported_after_each_block() {
    let remote = Arc::new(FakeRemote::new());
    let seen: Arc<Mutex<Vec<u8>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);

    let coordinator = UploadCoordinator::new(remote)
        .with_config(fast_upload_config(MIB))
        .with_progress(Arc::new(move |p| sink.lock().unwrap().push(p)));

    let buffer = vec![1u8; 4 * MIB];
    coordinator.upload(&buffer, "audio/wav").await.unwrap();

    assert_eq!(*seen.lock().unwrap(), vec![25, 50, 75, 100]);
}

#[tokio::test]
async fn one_transient_block_failure_consumes_one_retry() {
    let remote = Arc::new(FakeRemote::failing_blocks(1));
    let coordinator =
        UploadCoordinator::new(remote.clone()).with_config(fast_upload_config(MIB));

    let buffer = vec![2u8; 2 * MIB];
    coordinator.upload(&buffer, "audio/wav").await.unwrap();

    // Attempt 1 dies on block 0; attempt 2 ships both blocks and commits.
    assert_eq!(remote.put_count(), 2);
    assert_eq!(remote.commit_count(), 1);
    // The ticket was reused across the retry, not re-fetched.
    assert_eq!(remote.tickets_issued.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn permanently_failing_blocks_stop_at_the_attempt_budget() {
    let remote = Arc::new(FakeRemote::new());
    remote.always_fail_blocks.store(true, Ordering::SeqCst);
    let coordinator =
        UploadCoordinator::new(remote.clone()).with_config(fast_upload_config(MIB));

    let err = coordinator.upload(b"data", "audio/wav").await.unwrap_err();
    assert!(matches!(err, UploadError::Network(_)));

    // 2 attempts total, each failing on the first (only) block; no commit.
    assert_eq!(remote.put_attempts.load(Ordering::SeqCst), 2);
    assert_eq!(remote.put_count(), 0);
    assert_eq!(remote.commit_count(), 0);
}

#[tokio::test]
async fn rejected_commit_retries_the_whole_unit_then_surfaces() {
    let remote = Arc::new(FakeRemote::failing_commits(2));
    let coordinator =
        UploadCoordinator::new(remote.clone()).with_config(fast_upload_config(MIB));

    let buffer = vec![3u8; 2 * MIB];
    let err = coordinator.upload(&buffer, "audio/wav").await.unwrap_err();
    assert!(matches!(err, UploadError::RemoteRejected { status: 500, .. }));

    // Both attempts re-uploaded every block before the commit was rejected.
    assert_eq!(remote.put_count(), 4);
    assert_eq!(remote.tickets_issued.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn ticket_issuance_retries_on_its_own_budget() {
    let remote = Arc::new(FakeRemote::new());
    remote.fail_tickets.store(2, Ordering::SeqCst);
    let coordinator =
        UploadCoordinator::new(remote.clone()).with_config(fast_upload_config(MIB));

    // Two outages still fit in the 3-attempt ticket budget.
    coordinator.upload(b"payload", "audio/wav").await.unwrap();
    assert_eq!(remote.tickets_issued.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn exhausted_ticket_budget_is_fatal() {
    let remote = Arc::new(FakeRemote::new());
    remote.fail_tickets.store(5, Ordering::SeqCst);
    let coordinator =
        UploadCoordinator::new(remote.clone()).with_config(fast_upload_config(MIB));

    let err = coordinator.upload(b"payload", "audio/wav").await.unwrap_err();
    assert!(matches!(err, UploadError::TicketUnavailable(_)));

    // 3 attempts consumed, 2 outages left uncharged, nothing uploaded.
    assert_eq!(remote.fail_tickets.load(Ordering::SeqCst), 2);
    assert_eq!(remote.put_count(), 0);
}
