//! End-to-end subscription tests against the in-memory chain.
//!
//! Every test runs a real manager with a short poll interval and bounds each
//! wait with a timeout, so a broken stream fails instead of hanging.

use std::sync::Arc;
use std::time::Duration;

use chainstream_core::{
    BlockNumber, Direction, FilterCriteria, InMemoryChain, LogEntry, StreamConfig, StreamError,
    StreamItem, Subscription, SubscriptionKind, SubscriptionManager, Termination,
};
use futures::StreamExt;
use tokio::time::timeout;

// ─── Helpers ──────────────────────────────────────────────────────────────────

const WAIT: Duration = Duration::from_secs(5);

fn manager(chain: &Arc<InMemoryChain>) -> SubscriptionManager {
    let config = StreamConfig {
        poll_interval_ms: 10,
        ..StreamConfig::default()
    };
    SubscriptionManager::new(chain.clone(), config).unwrap()
}

async fn take(sub: &mut Subscription, n: usize) -> Vec<StreamItem> {
    timeout(WAIT, sub.by_ref().take(n).collect::<Vec<_>>())
        .await
        .expect("stream stalled")
}

async fn take_all(sub: &mut Subscription) -> Vec<StreamItem> {
    timeout(WAIT, sub.by_ref().collect::<Vec<_>>())
        .await
        .expect("stream did not end")
}

fn numbers(items: &[StreamItem]) -> Vec<BlockNumber> {
    items.iter().filter_map(StreamItem::block_number).collect()
}

/// Wait until a live walker has anchored itself at the current tip.
async fn first_tick(chain: &InMemoryChain) {
    timeout(WAIT, async {
        while chain.tip_requests() == 0 {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await
    .expect("walker never ticked");
}

fn replay(start: BlockNumber, end: BlockNumber) -> SubscriptionKind {
    SubscriptionKind::ReplayRange {
        start: start.into(),
        end: end.into(),
        direction: None,
        full_transactions: false,
    }
}

// ─── Replay ───────────────────────────────────────────────────────────────────

#[tokio::test]
async fn ascending_replay_emits_each_block_once() {
    let chain = Arc::new(InMemoryChain::with_tip(120, 0));
    let mgr = manager(&chain);
    let (mut sub, _errors) = mgr
        .subscribe(SubscriptionKind::ReplayRange {
            start: 100.into(),
            end: 105.into(),
            direction: Some(Direction::Ascending),
            full_transactions: false,
        })
        .unwrap();

    assert_eq!(numbers(&take_all(&mut sub).await), vec![100, 101, 102, 103, 104, 105]);
    assert_eq!(sub.termination().await, Termination::Completed);
}

#[tokio::test]
async fn descending_replay_emits_each_block_once() {
    let chain = Arc::new(InMemoryChain::with_tip(120, 0));
    let mgr = manager(&chain);
    let (mut sub, _errors) = mgr
        .subscribe(SubscriptionKind::ReplayRange {
            start: 100.into(),
            end: 95.into(),
            direction: Some(Direction::Descending),
            full_transactions: true,
        })
        .unwrap();

    assert_eq!(numbers(&take_all(&mut sub).await), vec![100, 99, 98, 97, 96, 95]);
    assert_eq!(sub.termination().await, Termination::Completed);
}

#[tokio::test]
async fn replay_past_the_tip_completes_at_the_tip() {
    let chain = Arc::new(InMemoryChain::with_tip(12, 0));
    let mgr = manager(&chain);
    let (mut sub, mut errors) = mgr.subscribe(replay(10, 50)).unwrap();

    assert_eq!(numbers(&take_all(&mut sub).await), vec![10, 11, 12]);
    assert_eq!(sub.termination().await, Termination::Completed);
    assert!(errors.drain().is_empty());
}

#[tokio::test]
async fn then_live_has_no_gap_or_duplicate_at_the_seam() {
    let chain = Arc::new(InMemoryChain::with_tip(50, 0));
    // The tip moves while the historical part is still being walked.
    chain.mine_on_block_request(47, 3);
    let mgr = manager(&chain);
    let (mut sub, _errors) = mgr
        .subscribe(SubscriptionKind::ReplayRangeThenLive {
            start: 45.into(),
            full_transactions: false,
        })
        .unwrap();

    let mut seen = numbers(&take(&mut sub, 9).await);
    chain.mine(1);
    seen.extend(numbers(&take(&mut sub, 1).await));

    assert_eq!(seen, (45..=54).collect::<Vec<_>>());
}

#[tokio::test]
async fn replayed_transactions_keep_their_position() {
    let chain = Arc::new(InMemoryChain::with_tip(20, 2));
    let mgr = manager(&chain);
    let (mut sub, _errors) = mgr
        .subscribe(SubscriptionKind::ReplayTransactions {
            start: 4.into(),
            end: 5.into(),
        })
        .unwrap();

    let positions: Vec<_> = take_all(&mut sub)
        .await
        .into_iter()
        .filter_map(StreamItem::into_transaction)
        .map(|tx| (tx.block_number, tx.transaction_index))
        .collect();
    assert_eq!(
        positions,
        vec![(Some(4), Some(0)), (Some(4), Some(1)), (Some(5), Some(0)), (Some(5), Some(1))]
    );
}

#[tokio::test]
async fn resubscribing_reproduces_the_same_sequence() {
    let chain = Arc::new(InMemoryChain::with_tip(30, 1));
    let mgr = manager(&chain);
    let kind = SubscriptionKind::ReplayTransactionsThenLive { start: 25.into() };

    let (mut first, _e1) = mgr.subscribe(kind.clone()).unwrap();
    let a = take(&mut first, 4).await;
    assert_eq!(mgr.unsubscribe(first).await, Termination::Cancelled);

    let (mut second, _e2) = mgr.subscribe(kind).unwrap();
    let b = take(&mut second, 4).await;

    assert_eq!(numbers(&a), vec![25, 26, 27, 28]);
    assert_eq!(a, b);
}

// ─── Live ─────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn live_blocks_are_consecutive() {
    let chain = Arc::new(InMemoryChain::with_tip(10, 0));
    let mgr = manager(&chain);
    let (mut sub, _errors) = mgr
        .subscribe(SubscriptionKind::Blocks {
            full_transactions: false,
        })
        .unwrap();
    first_tick(&chain).await;

    chain.mine(2);
    let mut seen = numbers(&take(&mut sub, 2).await);
    chain.mine(4);
    seen.extend(numbers(&take(&mut sub, 4).await));

    assert_eq!(seen, vec![11, 12, 13, 14, 15, 16]);
    assert!(seen.windows(2).all(|w| w[1] == w[0] + 1));
}

#[tokio::test]
async fn live_transactions_flatten_blocks_in_order() {
    let chain = Arc::new(InMemoryChain::with_tip(10, 2));
    let mgr = manager(&chain);
    let (mut sub, _errors) = mgr.subscribe(SubscriptionKind::Transactions).unwrap();
    first_tick(&chain).await;
    chain.mine(2);

    let hashes: Vec<_> = take(&mut sub, 4)
        .await
        .into_iter()
        .filter_map(StreamItem::into_transaction)
        .map(|tx| tx.hash)
        .collect();
    assert_eq!(
        hashes,
        vec![
            InMemoryChain::transaction_hash(11, 0),
            InMemoryChain::transaction_hash(11, 1),
            InMemoryChain::transaction_hash(12, 0),
            InMemoryChain::transaction_hash(12, 1),
        ]
    );
}

#[tokio::test]
async fn new_block_hashes_match_the_blocks() {
    let chain = Arc::new(InMemoryChain::with_tip(3, 0));
    let mgr = manager(&chain);
    let (mut sub, _errors) = mgr.subscribe(SubscriptionKind::NewBlockHashes).unwrap();
    first_tick(&chain).await;
    chain.mine(1);

    assert_eq!(
        take(&mut sub, 1).await,
        vec![StreamItem::BlockHash {
            number: 4,
            hash: InMemoryChain::block_hash(4)
        }]
    );
}

#[tokio::test]
async fn tip_regression_is_skipped() {
    let chain = Arc::new(InMemoryChain::with_tip(10, 0));
    let mgr = manager(&chain);
    let (mut sub, mut errors) = mgr.subscribe(SubscriptionKind::NewBlockHashes).unwrap();
    first_tick(&chain).await;

    chain.mine(2);
    assert_eq!(numbers(&take(&mut sub, 2).await), vec![11, 12]);

    chain.report_tip(Some(8));
    assert!(timeout(Duration::from_millis(60), sub.next()).await.is_err());

    chain.report_tip(None);
    chain.mine(1);
    assert_eq!(numbers(&take(&mut sub, 1).await), vec![13]);
    assert!(errors.drain().is_empty());
}

#[tokio::test]
async fn logs_match_on_second_topic_only() {
    let chain = Arc::new(InMemoryChain::with_tip(10, 0));
    let log = |address: &str, first: &str, second: &str, index: u32| LogEntry {
        address: address.into(),
        topics: vec![first.into(), second.into()],
        data: "0x".into(),
        block_number: 11,
        transaction_hash: InMemoryChain::transaction_hash(11, 0),
        transaction_index: 0,
        log_index: index,
    };
    chain.add_log(log("0x01", "0xaa", "0xabc", 0));
    chain.add_log(log("0x02", "0xbb", "0xdef", 1));
    chain.add_log(log("0x03", "0xcc", "0xabc", 2));

    let mgr = manager(&chain);
    let filter = FilterCriteria::default().any_topic().topic("0xabc");
    let (mut sub, _errors) = mgr.subscribe(SubscriptionKind::LogsMatching(filter)).unwrap();
    first_tick(&chain).await;
    chain.mine(1);

    let addresses: Vec<_> = take(&mut sub, 2)
        .await
        .into_iter()
        .filter_map(StreamItem::into_log)
        .map(|l| l.address)
        .collect();
    assert_eq!(addresses, vec!["0x01", "0x03"]);
}

// ─── Pending pool ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn pending_hashes_are_delivered_once() {
    let chain = Arc::new(InMemoryChain::new());
    chain.set_pending(&["0xa", "0xb"]);
    let mgr = manager(&chain);
    let (mut sub, _errors) = mgr.subscribe(SubscriptionKind::PendingTransactionHashes).unwrap();

    assert_eq!(
        take(&mut sub, 2).await,
        vec![
            StreamItem::TransactionHash("0xa".into()),
            StreamItem::TransactionHash("0xb".into())
        ]
    );
    chain.push_pending("0xc");
    assert_eq!(take(&mut sub, 1).await, vec![StreamItem::TransactionHash("0xc".into())]);
}

// ─── Failures and cancellation ────────────────────────────────────────────────

#[tokio::test]
async fn failed_fetch_is_retried_without_skipping() {
    let chain = Arc::new(InMemoryChain::with_tip(110, 0));
    chain.fail_block(102, 2);
    let mgr = manager(&chain);
    let (mut sub, mut errors) = mgr.subscribe(replay(100, 103)).unwrap();

    assert_eq!(numbers(&take_all(&mut sub).await), vec![100, 101, 102, 103]);
    assert_eq!(sub.termination().await, Termination::Completed);

    let reported = errors.drain();
    assert_eq!(reported.len(), 2);
    assert!(reported.iter().all(StreamError::is_transient));
    let retries = chain.block_requests().iter().filter(|&&n| n == 102).count();
    assert_eq!(retries, 3);
}

#[tokio::test]
async fn cancel_mid_scan_stops_emission() {
    let chain = Arc::new(InMemoryChain::with_tip(200, 0));
    let mgr = manager(&chain);
    let (mut sub, _errors) = mgr.subscribe(replay(100, 110)).unwrap();

    assert_eq!(numbers(&take(&mut sub, 2).await), vec![100, 101]);
    assert_eq!(sub.cancel().await, Termination::Cancelled);
    assert_eq!(sub.next().await, None);
    assert_eq!(mgr.active_count(), 0);
}

#[tokio::test]
async fn malformed_block_fails_the_subscription() {
    let chain = Arc::new(InMemoryChain::with_tip(10, 0));
    chain.corrupt_block(3);
    let mgr = manager(&chain);
    let (mut sub, mut errors) = mgr.subscribe(replay(1, 5)).unwrap();

    assert_eq!(numbers(&take_all(&mut sub).await), vec![1, 2]);
    let termination = sub.termination().await;
    assert!(matches!(termination, Termination::Failed(StreamError::Malformed(_))));

    let reported = timeout(WAIT, errors.recv()).await.unwrap();
    assert!(matches!(reported, Some(StreamError::Malformed(_))));
}

#[tokio::test]
async fn fatal_error_reaches_a_full_error_channel() {
    let chain = Arc::new(InMemoryChain::with_tip(10, 0));
    chain.fail_block(2, 1);
    chain.corrupt_block(3);
    let config = StreamConfig {
        poll_interval_ms: 10,
        error_channel_capacity: 1,
        ..StreamConfig::default()
    };
    let mgr = SubscriptionManager::new(chain.clone(), config).unwrap();
    let (mut sub, mut errors) = mgr.subscribe(replay(1, 5)).unwrap();

    assert_eq!(numbers(&take_all(&mut sub).await), vec![1, 2]);
    let termination = sub.termination().await;
    assert!(matches!(termination, Termination::Failed(StreamError::Malformed(_))));

    let reported = errors.drain();
    assert_eq!(reported.len(), 2);
    assert!(reported[0].is_transient());
    assert!(matches!(reported[1], StreamError::Malformed(_)));
}

#[tokio::test]
async fn slow_consumer_holds_back_the_walker() {
    let chain = Arc::new(InMemoryChain::with_tip(100, 0));
    let mgr = manager(&chain);
    let (mut sub, _errors) = mgr.subscribe(replay(1, 50)).unwrap();

    take(&mut sub, 1).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    // One item buffered, one fetched and waiting for room.
    assert!(chain.block_requests().len() <= 3);
}

#[tokio::test]
async fn streams_keep_the_tip_cache_current() {
    let chain = Arc::new(InMemoryChain::with_tip(40, 0));
    let mgr = manager(&chain);
    let (mut sub, _errors) = mgr.subscribe(SubscriptionKind::NewBlockHashes).unwrap();
    first_tick(&chain).await;
    chain.mine(1);
    take(&mut sub, 1).await;

    assert_eq!(mgr.tip_cache().cached_tip(), Some(41));
    assert_eq!(mgr.tip_cache().offset(), 500);
}
