use async_trait::async_trait;
use px_types::{AccountId, ColorPair, Pixel, TxHandle};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::{Mutex, Semaphore, mpsc, watch};
use tracing::debug;

use crate::{AccountWatch, LedgerClient, LedgerError, PixelSubscription, TxOutcome};

/// Outcome forced onto the next `submit_pixel` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptedSubmit {
    Reject,
    BroadcastFailure(String),
    Revert,
}

/// Number of calls made to each ledger operation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallCounts {
    pub get_total_count: usize,
    pub get_all_pixels: usize,
    pub subscribe_new_pixel: usize,
    pub submit_pixel: usize,
    pub await_confirmation: usize,
}

#[derive(Default)]
struct Counters {
    get_total_count: AtomicUsize,
    get_all_pixels: AtomicUsize,
    subscribe_new_pixel: AtomicUsize,
    submit_pixel: AtomicUsize,
    await_confirmation: AtomicUsize,
}

struct PendingWrite {
    submitter: AccountId,
    colors: ColorPair,
    revert: bool,
}

struct State {
    pixels: Vec<Pixel>,
    clock: u64,
    next_tx: u64,
    pending: HashMap<TxHandle, PendingWrite>,
    script: VecDeque<ScriptedSubmit>,
    subscribers: Vec<mpsc::UnboundedSender<Pixel>>,
}

struct Inner {
    state: Mutex<State>,
    signer: AccountWatch,
    counters: Counters,
    hold_confirmations: AtomicBool,
    releases: Semaphore,
    redeliver: AtomicBool,
    fail_queries: AtomicBool,
}

/// In-process ledger with the same observable behaviour as the contract.
///
/// Writes are mined on `await_confirmation`: the pixel is stamped with the
/// ledger clock, appended, and emitted to every live subscriber.
#[derive(Clone)]
pub struct MemoryLedger {
    inner: Arc<Inner>,
}

impl MemoryLedger {
    /// Ledger clock starts here, in seconds since epoch.
    pub const GENESIS: u64 = 1_650_000_000;

    pub fn new(signer: AccountWatch) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State {
                    pixels: Vec::new(),
                    clock: Self::GENESIS,
                    next_tx: 1,
                    pending: HashMap::new(),
                    script: VecDeque::new(),
                    subscribers: Vec::new(),
                }),
                signer,
                counters: Counters::default(),
                hold_confirmations: AtomicBool::new(false),
                releases: Semaphore::new(0),
                redeliver: AtomicBool::new(false),
                fail_queries: AtomicBool::new(false),
            }),
        }
    }

    /// Ledger that always signs as `account`.
    pub fn with_signer(account: AccountId) -> Self {
        let (_, signer) = watch::channel(Some(account));
        Self::new(signer)
    }

    /// Appends existing history without emitting events.
    pub async fn seed(&self, pixels: impl IntoIterator<Item = Pixel>) {
        let mut state = self.inner.state.lock().await;
        for pixel in pixels {
            state.clock = state.clock.max(pixel.submitted_at);
            state.pixels.push(pixel);
        }
    }

    /// A write by another client: appended and emitted.
    pub async fn mine_external(&self, submitter: AccountId, colors: &ColorPair) -> Pixel {
        let mut state = self.inner.state.lock().await;
        self.append_and_emit(&mut state, submitter, colors)
    }

    /// Emits `pixel` again without touching ledger state, as a transport
    /// redelivery would.
    pub async fn redeliver(&self, pixel: &Pixel) {
        let mut state = self.inner.state.lock().await;
        Self::emit(&mut state, pixel, false);
    }

    pub async fn script_next_submit(&self, outcome: ScriptedSubmit) {
        self.inner.state.lock().await.script.push_back(outcome);
    }

    /// While held, each confirmation waits for one `release_confirmation`.
    pub fn hold_confirmations(&self, hold: bool) {
        self.inner.hold_confirmations.store(hold, Ordering::SeqCst);
    }

    pub fn release_confirmation(&self) {
        self.inner.releases.add_permits(1);
    }

    /// Every emitted event is delivered twice.
    pub fn redeliver_events(&self, enabled: bool) {
        self.inner.redeliver.store(enabled, Ordering::SeqCst);
    }

    /// Count and list queries fail with `LedgerError::Query`.
    pub fn fail_queries(&self, fail: bool) {
        self.inner.fail_queries.store(fail, Ordering::SeqCst);
    }

    pub async fn pixels(&self) -> Vec<Pixel> {
        self.inner.state.lock().await.pixels.clone()
    }

    pub async fn live_subscribers(&self) -> usize {
        let state = self.inner.state.lock().await;
        state.subscribers.iter().filter(|tx| !tx.is_closed()).count()
    }

    pub fn calls(&self) -> CallCounts {
        let counters = &self.inner.counters;
        CallCounts {
            get_total_count: counters.get_total_count.load(Ordering::SeqCst),
            get_all_pixels: counters.get_all_pixels.load(Ordering::SeqCst),
            subscribe_new_pixel: counters.subscribe_new_pixel.load(Ordering::SeqCst),
            submit_pixel: counters.submit_pixel.load(Ordering::SeqCst),
            await_confirmation: counters.await_confirmation.load(Ordering::SeqCst),
        }
    }

    fn append_and_emit(&self, state: &mut State, submitter: AccountId, colors: &ColorPair) -> Pixel {
        state.clock += 1;
        let pixel = Pixel::from_colors(submitter, state.clock, colors);
        state.pixels.push(pixel.clone());
        let twice = self.inner.redeliver.load(Ordering::SeqCst);
        Self::emit(state, &pixel, twice);
        pixel
    }

    fn emit(state: &mut State, pixel: &Pixel, twice: bool) {
        state.subscribers.retain(|tx| {
            let delivered = tx.send(pixel.clone()).is_ok();
            if delivered && twice {
                let _ = tx.send(pixel.clone());
            }
            delivered
        });
    }

    fn check_queries(&self) -> Result<(), LedgerError> {
        if self.inner.fail_queries.load(Ordering::SeqCst) {
            return Err(LedgerError::Query("ledger unavailable".to_owned()));
        }
        Ok(())
    }
}

#[async_trait]
impl LedgerClient for MemoryLedger {
    async fn get_total_count(&self) -> Result<u64, LedgerError> {
        self.inner.counters.get_total_count.fetch_add(1, Ordering::SeqCst);
        self.check_queries()?;
        Ok(self.inner.state.lock().await.pixels.len() as u64)
    }

    async fn get_all_pixels(&self) -> Result<Vec<Pixel>, LedgerError> {
        self.inner.counters.get_all_pixels.fetch_add(1, Ordering::SeqCst);
        self.check_queries()?;
        Ok(self.pixels().await)
    }

    async fn subscribe_new_pixel(&self) -> Result<PixelSubscription, LedgerError> {
        self.inner.counters.subscribe_new_pixel.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.state.lock().await.subscribers.push(tx);
        Ok(PixelSubscription::new(rx))
    }

    async fn submit_pixel(&self, colors: &ColorPair) -> Result<TxHandle, LedgerError> {
        self.inner.counters.submit_pixel.fetch_add(1, Ordering::SeqCst);
        let submitter = self
            .inner
            .signer
            .borrow()
            .clone()
            .ok_or(LedgerError::NoProvider)?;

        let mut state = self.inner.state.lock().await;
        let revert = match state.script.pop_front() {
            Some(ScriptedSubmit::Reject) => return Err(LedgerError::SubmissionRejected),
            Some(ScriptedSubmit::BroadcastFailure(message)) => {
                return Err(LedgerError::Broadcast(message));
            }
            Some(ScriptedSubmit::Revert) => true,
            None => false,
        };

        let handle = TxHandle(format!("0x{:064x}", state.next_tx));
        state.next_tx += 1;
        state.pending.insert(
            handle.clone(),
            PendingWrite {
                submitter,
                colors: colors.clone(),
                revert,
            },
        );
        debug!("memory ledger accepted {}", handle);
        Ok(handle)
    }

    async fn await_confirmation(&self, handle: &TxHandle) -> Result<TxOutcome, LedgerError> {
        self.inner.counters.await_confirmation.fetch_add(1, Ordering::SeqCst);
        if self.inner.hold_confirmations.load(Ordering::SeqCst) {
            self.inner
                .releases
                .acquire()
                .await
                .map_err(|err| LedgerError::Query(err.to_string()))?
                .forget();
        }

        let mut state = self.inner.state.lock().await;
        let write = state
            .pending
            .remove(handle)
            .ok_or_else(|| LedgerError::Query(format!("unknown transaction {handle}")))?;

        if write.revert {
            return Ok(TxOutcome::Reverted);
        }
        self.append_and_emit(&mut state, write.submitter, &write.colors);
        Ok(TxOutcome::Confirmed)
    }
}
