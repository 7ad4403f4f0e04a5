//! Background discovery of incoming notes and unshields.
//!
//! Both pollers are plain values with an explicit async `tick()`; the
//! host owns the loop and the cadence. A tick that arrives while another
//! is in flight is dropped, not queued, and a tick before the minimum
//! inter-query interval is refused. RPC failures are swallowed: the
//! cursor stays put and the same window is retried on the next tick.
//!
//! Processed events are deduplicated through a persisted, FIFO-capped
//! set; an event is marked processed *before* its result is delivered so
//! re-entry after a crash cannot double-apply it.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tracing::debug;

use alloy_primitives::{Address, B256};
use dogenado_crypto::{fr_to_hex, Fr};

use crate::error::WalletError;
use crate::events::{
    address_topic, parse_transfer, parse_unshield, transfer_topic, unshield_topic, UnshieldEvent,
};
use crate::memo::decrypt_note_memo;
use crate::notes::Note;
use crate::rpc::{ChainAdapter, LogFilter};

/// Poller tuning knobs.
#[derive(Clone, Debug)]
pub struct ScannerConfig {
    /// Minimum spacing between chain queries.
    pub min_poll_interval: Duration,
    /// Largest block window per poll.
    pub max_window: u64,
    /// How far below the chain head an uninitialized cursor starts.
    pub bootstrap_lookback: u64,
    /// Soft cap on the processed-event set.
    pub processed_cap: usize,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            min_poll_interval: Duration::from_secs(5),
            max_window: 10_000,
            bootstrap_lookback: 1_000,
            processed_cap: 500,
        }
    }
}

/// FIFO-capped dedup set for processed events.
#[derive(Clone, Debug)]
pub struct ProcessedSet {
    order: VecDeque<String>,
    lookup: HashSet<String>,
    cap: usize,
}

impl ProcessedSet {
    pub fn new(cap: usize) -> Self {
        Self {
            order: VecDeque::new(),
            lookup: HashSet::new(),
            cap,
        }
    }

    pub fn from_entries(cap: usize, entries: impl IntoIterator<Item = String>) -> Self {
        let mut set = Self::new(cap);
        for entry in entries {
            set.insert(entry);
        }
        set
    }

    pub fn contains(&self, key: &str) -> bool {
        self.lookup.contains(key)
    }

    /// Insert a key, evicting the oldest entries past the cap.
    /// Returns false when the key was already present.
    pub fn insert(&mut self, key: String) -> bool {
        if !self.lookup.insert(key.clone()) {
            return false;
        }
        self.order.push_back(key);
        while self.order.len() > self.cap {
            if let Some(evicted) = self.order.pop_front() {
                self.lookup.remove(&evicted);
            }
        }
        true
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Entries in insertion order, for persistence.
    pub fn entries(&self) -> Vec<String> {
        self.order.iter().cloned().collect()
    }
}

/// A note recovered from a transfer memo addressed to us.
#[derive(Clone, Debug)]
pub struct DiscoveredNote {
    pub note: Note,
    pub leaf_index: u64,
    pub tx_hash: B256,
    pub block_number: u64,
}

/// What one `tick()` did.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TickOutcome {
    /// The window was scanned.
    Scanned { events: usize, discovered: usize },
    /// The poller is stopped or a tick was already in flight.
    Dropped,
    /// Called again before the minimum interval elapsed.
    RateLimited,
    /// The RPC failed; the cursor was not advanced.
    Failed,
}

fn transfer_key(tx_hash: &B256, commitment: &Fr) -> String {
    format!("{tx_hash:#x}:{}", fr_to_hex(commitment))
}

fn unshield_key(tx_hash: &B256, nullifier_hash: &B256) -> String {
    format!("{tx_hash:#x}:{nullifier_hash:#x}")
}

/// Polls transfer events and trial-decrypts their memos.
pub struct TransferScanner {
    adapter: Arc<dyn ChainAdapter>,
    pool: Address,
    own_address: Fr,
    config: ScannerConfig,
    cursor: Option<u64>,
    processed: ProcessedSet,
    last_poll: Option<Instant>,
    in_flight: bool,
    stopped: bool,
    sender: mpsc::UnboundedSender<DiscoveredNote>,
}

impl TransferScanner {
    pub fn new(
        adapter: Arc<dyn ChainAdapter>,
        pool: Address,
        own_address: Fr,
        config: ScannerConfig,
    ) -> (Self, mpsc::UnboundedReceiver<DiscoveredNote>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let processed = ProcessedSet::new(config.processed_cap);
        (
            Self {
                adapter,
                pool,
                own_address,
                config,
                cursor: None,
                processed,
                last_poll: None,
                in_flight: false,
                stopped: false,
                sender,
            },
            receiver,
        )
    }

    /// Seed cursor and dedup set from persisted state.
    pub fn restore_state(&mut self, cursor: Option<u64>, processed: Vec<String>) {
        self.cursor = cursor;
        self.processed = ProcessedSet::from_entries(self.config.processed_cap, processed);
    }

    pub fn cursor(&self) -> Option<u64> {
        self.cursor
    }

    pub fn processed_entries(&self) -> Vec<String> {
        self.processed.entries()
    }

    /// Stop the poller. Idempotent and synchronous; an in-flight RPC is
    /// not aborted, its result is simply discarded.
    pub fn stop(&mut self) {
        self.stopped = true;
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    pub async fn tick(&mut self) -> TickOutcome {
        if self.stopped || self.in_flight {
            return TickOutcome::Dropped;
        }
        if let Some(last) = self.last_poll {
            if last.elapsed() < self.config.min_poll_interval {
                return TickOutcome::RateLimited;
            }
        }
        self.in_flight = true;
        let result = self.poll().await;
        self.in_flight = false;
        self.last_poll = Some(Instant::now());
        if self.stopped {
            return TickOutcome::Dropped;
        }
        match result {
            Ok(outcome) => outcome,
            Err(err) => {
                debug!(error = %err, "transfer scan failed; window will be retried");
                TickOutcome::Failed
            }
        }
    }

    async fn poll(&mut self) -> Result<TickOutcome, WalletError> {
        let head = self.adapter.block_number().await?;
        let from = match self.cursor {
            Some(cursor) => cursor.saturating_add(1),
            None => head.saturating_sub(self.config.bootstrap_lookback),
        };
        if from > head {
            return Ok(TickOutcome::Scanned {
                events: 0,
                discovered: 0,
            });
        }
        let to = head.min(from.saturating_add(self.config.max_window - 1));
        let filter = LogFilter {
            address: self.pool,
            topics: vec![Some(transfer_topic())],
            from_block: from,
            to_block: to,
        };
        let logs = self.adapter.get_logs(&filter).await?;

        let mut discovered = 0usize;
        for log in &logs {
            let event = match parse_transfer(log, self.pool) {
                Ok(event) => event,
                Err(err) => {
                    debug!(error = %err, "skipping malformed transfer event");
                    continue;
                }
            };
            for (leaf_index, commitment, memo) in event.outputs() {
                let key = transfer_key(&event.tx_hash, &commitment);
                if self.processed.contains(&key) {
                    continue;
                }
                match decrypt_note_memo(memo, self.own_address) {
                    Ok(mut note) if note.commitment == commitment => {
                        note.leaf_index = Some(leaf_index);
                        // Mark before delivering so a redelivery after a
                        // crash cannot double-apply.
                        self.processed.insert(key);
                        discovered += 1;
                        let _ = self.sender.send(DiscoveredNote {
                            note,
                            leaf_index,
                            tx_hash: event.tx_hash,
                            block_number: event.block_number,
                        });
                    }
                    // A mismatched commitment or failed decryption just
                    // means the memo is for someone else.
                    Ok(_) | Err(WalletError::DecryptionFailed) => {}
                    Err(err) => debug!(error = %err, "memo rejected"),
                }
            }
        }
        self.cursor = Some(to);
        Ok(TickOutcome::Scanned {
            events: logs.len(),
            discovered,
        })
    }
}

/// Polls unshield events addressed to the connected public wallet.
pub struct UnshieldWatcher {
    adapter: Arc<dyn ChainAdapter>,
    pool: Address,
    recipient: Address,
    config: ScannerConfig,
    cursor: Option<u64>,
    processed: ProcessedSet,
    last_poll: Option<Instant>,
    in_flight: bool,
    stopped: bool,
    sender: mpsc::UnboundedSender<UnshieldEvent>,
}

impl UnshieldWatcher {
    pub fn new(
        adapter: Arc<dyn ChainAdapter>,
        pool: Address,
        recipient: Address,
        config: ScannerConfig,
    ) -> (Self, mpsc::UnboundedReceiver<UnshieldEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let processed = ProcessedSet::new(config.processed_cap);
        (
            Self {
                adapter,
                pool,
                recipient,
                config,
                cursor: None,
                processed,
                last_poll: None,
                in_flight: false,
                stopped: false,
                sender,
            },
            receiver,
        )
    }

    pub fn restore_state(&mut self, cursor: Option<u64>, processed: Vec<String>) {
        self.cursor = cursor;
        self.processed = ProcessedSet::from_entries(self.config.processed_cap, processed);
    }

    pub fn cursor(&self) -> Option<u64> {
        self.cursor
    }

    pub fn processed_entries(&self) -> Vec<String> {
        self.processed.entries()
    }

    pub fn stop(&mut self) {
        self.stopped = true;
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    pub async fn tick(&mut self) -> TickOutcome {
        if self.stopped || self.in_flight {
            return TickOutcome::Dropped;
        }
        if let Some(last) = self.last_poll {
            if last.elapsed() < self.config.min_poll_interval {
                return TickOutcome::RateLimited;
            }
        }
        self.in_flight = true;
        let result = self.poll().await;
        self.in_flight = false;
        self.last_poll = Some(Instant::now());
        if self.stopped {
            return TickOutcome::Dropped;
        }
        match result {
            Ok(outcome) => outcome,
            Err(err) => {
                debug!(error = %err, "unshield poll failed; window will be retried");
                TickOutcome::Failed
            }
        }
    }

    async fn poll(&mut self) -> Result<TickOutcome, WalletError> {
        let head = self.adapter.block_number().await?;
        let from = match self.cursor {
            Some(cursor) => cursor.saturating_add(1),
            None => head.saturating_sub(self.config.bootstrap_lookback),
        };
        if from > head {
            return Ok(TickOutcome::Scanned {
                events: 0,
                discovered: 0,
            });
        }
        let to = head.min(from.saturating_add(self.config.max_window - 1));
        let filter = LogFilter {
            address: self.pool,
            topics: vec![
                Some(unshield_topic()),
                None,
                Some(address_topic(self.recipient)),
            ],
            from_block: from,
            to_block: to,
        };
        let logs = self.adapter.get_logs(&filter).await?;

        let mut discovered = 0usize;
        for log in &logs {
            // Strict validation: signature, topic shapes, contract origin
            // and the fee bound are all enforced by the parser.
            let event = match parse_unshield(log, self.pool) {
                Ok(event) => event,
                Err(err) => {
                    debug!(error = %err, "skipping malformed unshield event");
                    continue;
                }
            };
            if event.recipient != self.recipient {
                continue;
            }
            let key = unshield_key(&event.tx_hash, &event.nullifier_hash);
            if self.processed.contains(&key) {
                continue;
            }
            self.processed.insert(key);
            discovered += 1;
            let _ = self.sender.send(event);
        }
        self.cursor = Some(to);
        Ok(TickOutcome::Scanned {
            events: logs.len(),
            discovered,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::tests::{transfer_log, POOL};
    use crate::events::Log;
    use crate::keys::Identity;
    use crate::memo::encrypt_note_memo;
    use crate::notes::{Note, TokenInfo};
    use alloy_primitives::U256;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct MockChain {
        head: Mutex<u64>,
        logs: Mutex<Vec<Log>>,
        fail_rpc: Mutex<bool>,
    }

    impl MockChain {
        fn new(head: u64) -> Self {
            Self {
                head: Mutex::new(head),
                logs: Mutex::new(Vec::new()),
                fail_rpc: Mutex::new(false),
            }
        }

        fn push_log(&self, log: Log) {
            self.logs.lock().unwrap().push(log);
        }

        fn set_head(&self, head: u64) {
            *self.head.lock().unwrap() = head;
        }

        fn set_failing(&self, failing: bool) {
            *self.fail_rpc.lock().unwrap() = failing;
        }
    }

    #[async_trait]
    impl ChainAdapter for MockChain {
        async fn block_number(&self) -> Result<u64, WalletError> {
            if *self.fail_rpc.lock().unwrap() {
                return Err(WalletError::NetworkUnavailable("mock outage".into()));
            }
            Ok(*self.head.lock().unwrap())
        }

        async fn get_logs(&self, filter: &LogFilter) -> Result<Vec<Log>, WalletError> {
            if *self.fail_rpc.lock().unwrap() {
                return Err(WalletError::NetworkUnavailable("mock outage".into()));
            }
            Ok(self
                .logs
                .lock()
                .unwrap()
                .iter()
                .filter(|log| {
                    log.block_number >= filter.from_block
                        && log.block_number <= filter.to_block
                        && filter.topics.iter().enumerate().all(|(i, topic)| {
                            topic.is_none() || log.topics.get(i) == topic.as_ref()
                        })
                })
                .cloned()
                .collect())
        }

        async fn call(&self, _to: Address, _data: Vec<u8>) -> Result<Vec<u8>, WalletError> {
            Ok(vec![0u8; 32])
        }

        async fn balance(&self, _address: Address) -> Result<U256, WalletError> {
            Ok(U256::ZERO)
        }

        async fn send_raw_transaction(&self, _raw: Vec<u8>) -> Result<B256, WalletError> {
            Ok(B256::ZERO)
        }
    }

    fn doge() -> TokenInfo {
        TokenInfo {
            symbol: "DOGE".into(),
            address: Address::ZERO,
            decimals: 18,
            is_native: true,
        }
    }

    fn fast_config() -> ScannerConfig {
        ScannerConfig {
            min_poll_interval: Duration::from_millis(0),
            ..ScannerConfig::default()
        }
    }

    /// A transfer log whose first output is addressed to `recipient`.
    fn transfer_for(recipient: &Identity, leaf: u64, block: u64, tx: u8) -> (Log, Note) {
        let note = Note::create(1_000, recipient.shielded_address(), doge()).unwrap();
        let decoy = Note::create(2_000, Fr::from(0xdeadu64), doge()).unwrap();
        let memo = encrypt_note_memo(&note).unwrap();
        let decoy_memo = encrypt_note_memo(&decoy).unwrap();
        let log = transfer_log(
            B256::repeat_byte(0x0f),
            (leaf, leaf + 1),
            (note.commitment, decoy.commitment),
            (&memo.to_bytes(), &decoy_memo.to_bytes()),
            block,
            B256::repeat_byte(tx),
        );
        (log, note)
    }

    #[test]
    fn processed_set_caps_fifo() {
        let mut set = ProcessedSet::new(3);
        for i in 0..5 {
            assert!(set.insert(format!("key-{i}")));
        }
        assert_eq!(set.len(), 3);
        assert!(!set.contains("key-0"));
        assert!(!set.contains("key-1"));
        assert!(set.contains("key-4"));
        assert!(!set.insert("key-4".into()));
    }

    #[tokio::test]
    async fn discovers_own_note_exactly_once_across_overlapping_polls() {
        let recipient = Identity::recover(Fr::from(5u64)).unwrap();
        let chain = Arc::new(MockChain::new(100));
        let (log, expected) = transfer_for(&recipient, 7, 90, 0x31);
        chain.push_log(log);

        let (mut scanner, mut rx) = TransferScanner::new(
            chain.clone(),
            POOL,
            recipient.shielded_address(),
            fast_config(),
        );

        let first = scanner.tick().await;
        assert_eq!(
            first,
            TickOutcome::Scanned {
                events: 1,
                discovered: 1
            }
        );

        // Rewind the cursor to force an overlapping window; the dedup set
        // must keep the second application a no-op.
        let entries = scanner.processed_entries();
        assert_eq!(entries.len(), 1);
        scanner.restore_state(Some(50), entries);
        let second = scanner.tick().await;
        assert_eq!(
            second,
            TickOutcome::Scanned {
                events: 1,
                discovered: 0
            }
        );

        let discovered = rx.recv().await.unwrap();
        assert_eq!(discovered.note.commitment, expected.commitment);
        assert_eq!(discovered.leaf_index, 7);
        assert_eq!(discovered.note.leaf_index, Some(7));
        assert!(rx.try_recv().is_err());
        assert_eq!(scanner.processed_entries().len(), 1);
    }

    #[tokio::test]
    async fn foreign_memos_are_ignored() {
        let recipient = Identity::recover(Fr::from(5u64)).unwrap();
        let other = Identity::recover(Fr::from(6u64)).unwrap();
        let chain = Arc::new(MockChain::new(100));
        let (log, _) = transfer_for(&other, 3, 90, 0x32);
        chain.push_log(log);

        let (mut scanner, mut rx) = TransferScanner::new(
            chain,
            POOL,
            recipient.shielded_address(),
            fast_config(),
        );
        assert_eq!(
            scanner.tick().await,
            TickOutcome::Scanned {
                events: 1,
                discovered: 0
            }
        );
        assert!(rx.try_recv().is_err());
        assert!(scanner.processed_entries().is_empty());
    }

    #[tokio::test]
    async fn window_is_clamped_and_cursor_advances() {
        let recipient = Identity::recover(Fr::from(5u64)).unwrap();
        let chain = Arc::new(MockChain::new(50_000));
        let (mut scanner, _rx) = TransferScanner::new(
            chain.clone(),
            POOL,
            recipient.shielded_address(),
            fast_config(),
        );

        // Bootstrap: cursor starts 1000 below head, window capped at 10k.
        scanner.tick().await;
        assert_eq!(scanner.cursor(), Some(50_000));

        chain.set_head(70_000);
        scanner.tick().await;
        // 50_001 + 10_000 - 1
        assert_eq!(scanner.cursor(), Some(60_000));
    }

    #[tokio::test]
    async fn rpc_failure_leaves_cursor_for_retry() {
        let recipient = Identity::recover(Fr::from(5u64)).unwrap();
        let chain = Arc::new(MockChain::new(100));
        let (log, _) = transfer_for(&recipient, 1, 95, 0x33);
        chain.push_log(log);

        let (mut scanner, mut rx) = TransferScanner::new(
            chain.clone(),
            POOL,
            recipient.shielded_address(),
            fast_config(),
        );

        chain.set_failing(true);
        assert_eq!(scanner.tick().await, TickOutcome::Failed);
        assert_eq!(scanner.cursor(), None);

        chain.set_failing(false);
        assert_eq!(
            scanner.tick().await,
            TickOutcome::Scanned {
                events: 1,
                discovered: 1
            }
        );
        assert!(rx.recv().await.is_some());
    }

    #[tokio::test]
    async fn rate_limit_and_stop_are_enforced() {
        let recipient = Identity::recover(Fr::from(5u64)).unwrap();
        let chain = Arc::new(MockChain::new(100));
        let (mut scanner, _rx) = TransferScanner::new(
            chain,
            POOL,
            recipient.shielded_address(),
            ScannerConfig::default(),
        );

        assert!(matches!(scanner.tick().await, TickOutcome::Scanned { .. }));
        assert_eq!(scanner.tick().await, TickOutcome::RateLimited);

        scanner.stop();
        scanner.stop(); // idempotent
        assert!(scanner.is_stopped());
        assert_eq!(scanner.tick().await, TickOutcome::Dropped);
    }

    #[tokio::test]
    async fn unshield_watcher_fires_once_per_event() {
        use crate::events::{address_topic, unshield_topic};

        let recipient = Address::repeat_byte(0x55);
        let chain = Arc::new(MockChain::new(100));

        let mut data = Vec::new();
        data.extend_from_slice(&U256::from(900u64).to_be_bytes::<32>());
        data.extend_from_slice(&[0u8; 32]);
        data.extend_from_slice(&[0u8; 32]);
        data.extend_from_slice(&U256::from(25u64).to_be_bytes::<32>());
        data.extend_from_slice(&U256::from(1_700_000_000u64).to_be_bytes::<32>());
        chain.push_log(Log {
            address: POOL,
            topics: vec![
                unshield_topic(),
                B256::repeat_byte(0x09),
                address_topic(recipient),
                address_topic(Address::ZERO),
            ],
            data,
            block_number: 90,
            tx_hash: B256::repeat_byte(0x41),
        });

        let (mut watcher, mut rx) =
            UnshieldWatcher::new(chain, POOL, recipient, fast_config());

        assert_eq!(
            watcher.tick().await,
            TickOutcome::Scanned {
                events: 1,
                discovered: 1
            }
        );
        let event = rx.recv().await.unwrap();
        assert_eq!(event.recipient, recipient);
        assert_eq!(event.amount, U256::from(900u64));

        // Overlap the window again: dedup by (tx, nullifier) holds.
        watcher.restore_state(Some(80), watcher.processed_entries());
        assert_eq!(
            watcher.tick().await,
            TickOutcome::Scanned {
                events: 1,
                discovered: 0
            }
        );
        assert!(rx.try_recv().is_err());
    }
}
