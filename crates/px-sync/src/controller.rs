use px_color::ColorPairGenerator;
use px_ledger::{LedgerClient, LedgerError, PixelSubscription, TxOutcome};
use px_types::{ColorPair, Pixel, TxHandle};
use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};

use crate::state::{
    FailureReason, HydrationReport, SubmissionState, SubmitError, SyncEvent, SyncView,
};

const EVENT_CAPACITY: usize = 256;

/// Owns the canonical pixel list and the submission state machine.
///
/// Every mutation goes through `&mut self`, so the controller is the single
/// writer for both. Subscription events are pulled from the ledger's channel
/// and deduplicated on the full `(submitter, submitted_at, color_a, color_b)`
/// tuple before they are appended.
pub struct PixelSyncController {
    ledger: Arc<dyn LedgerClient>,
    colors: Arc<dyn ColorPairGenerator>,
    pixels: Vec<Pixel>,
    seen: HashSet<Pixel>,
    total_count: Option<u64>,
    submission: SubmissionState,
    draft: ColorPair,
    subscription: Option<PixelSubscription>,
    view: watch::Sender<SyncView>,
    events: broadcast::Sender<SyncEvent>,
}

impl PixelSyncController {
    pub fn new(ledger: Arc<dyn LedgerClient>, colors: Arc<dyn ColorPairGenerator>) -> Self {
        let draft = colors.generate();
        let (view, _) = watch::channel(SyncView {
            pixels: Vec::new(),
            total_count: None,
            submission: SubmissionState::Idle,
            draft: draft.clone(),
        });
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        Self {
            ledger,
            colors,
            pixels: Vec::new(),
            seen: HashSet::new(),
            total_count: None,
            submission: SubmissionState::Idle,
            draft,
            subscription: None,
            view,
            events,
        }
    }

    pub fn pixels(&self) -> &[Pixel] {
        &self.pixels
    }

    pub fn total_count(&self) -> Option<u64> {
        self.total_count
    }

    pub fn submission(&self) -> &SubmissionState {
        &self.submission
    }

    pub fn draft(&self) -> &ColorPair {
        &self.draft
    }

    pub fn is_subscribed(&self) -> bool {
        self.subscription.is_some()
    }

    pub fn watch(&self) -> watch::Receiver<SyncView> {
        self.view.subscribe()
    }

    pub fn events(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    /// Loads the ledger into the canonical list.
    ///
    /// The live subscription is opened before the bulk read, and whatever it
    /// buffered meanwhile is merged afterwards, so a pixel mined during
    /// hydration is neither missed nor duplicated. Safe to call again: the
    /// existing subscription is kept and known pixels are skipped. Failures
    /// are logged, never returned.
    pub async fn hydrate(&mut self) -> HydrationReport {
        if self.subscription.is_none() {
            let subscribed = self.ledger.subscribe_new_pixel().await;
            match subscribed {
                Ok(subscription) => self.subscription = Some(subscription),
                Err(err) => warn!("could not subscribe to new pixels: {}", err),
            }
        }

        self.refresh_count().await;

        let mut report = HydrationReport {
            subscribed: self.subscription.is_some(),
            ..HydrationReport::default()
        };

        let loaded = self.ledger.get_all_pixels().await;
        match loaded {
            Ok(pixels) => {
                report.fetched = pixels.len();
                for pixel in pixels {
                    if self.ingest(pixel) {
                        report.appended += 1;
                    }
                }
            }
            Err(err) => warn!("could not load pixels: {}", err),
        }

        report.appended += self.drain_subscription();
        info!(
            "hydrated {} pixels ({} fetched, {} new, subscribed: {})",
            self.pixels.len(),
            report.fetched,
            report.appended,
            report.subscribed
        );
        report
    }

    /// Appends `pixel` unless an identical tuple is already present.
    pub fn ingest(&mut self, pixel: Pixel) -> bool {
        if !self.seen.insert(pixel.clone()) {
            debug!(
                "dropping duplicate pixel from {} at {}",
                pixel.submitter, pixel.submitted_at
            );
            return false;
        }

        self.pixels.push(pixel.clone());
        self.view.send_modify(|view| view.pixels.push(pixel.clone()));
        self.emit(SyncEvent::PixelAppended(pixel));
        true
    }

    /// Ingests every event already waiting on the subscription.
    pub fn drain_subscription(&mut self) -> usize {
        let mut appended = 0;
        while let Some(pixel) = self.subscription.as_mut().and_then(PixelSubscription::try_recv) {
            if self.ingest(pixel) {
                appended += 1;
            }
        }
        appended
    }

    /// Waits for the next subscription event and ingests it.
    ///
    /// Returns whether it was new, or `None` when there is no live
    /// subscription. A closed subscription is dropped.
    pub async fn process_next(&mut self) -> Option<bool> {
        let next = self.subscription.as_mut()?.recv().await;
        match next {
            Some(pixel) => Some(self.ingest(pixel)),
            None => {
                warn!("new pixel subscription closed by the ledger");
                self.subscription = None;
                None
            }
        }
    }

    /// Best-effort refresh of the displayed total. The count never goes
    /// backwards.
    pub async fn refresh_count(&mut self) -> Option<u64> {
        let fetched = self.ledger.get_total_count().await;
        self.apply_count(fetched)
    }

    fn apply_count(&mut self, fetched: Result<u64, LedgerError>) -> Option<u64> {
        match fetched {
            Ok(count) => {
                let count = match self.total_count {
                    Some(known) if known > count => {
                        debug!("ignoring stale pixel count {} (known {})", count, known);
                        known
                    }
                    _ => count,
                };
                self.total_count = Some(count);
                self.view.send_modify(|view| view.total_count = Some(count));
                self.emit(SyncEvent::CountRefreshed(count));
            }
            Err(err) => warn!("could not refresh pixel count: {}", err),
        }
        self.total_count
    }

    pub fn randomize_colors(&mut self) -> &ColorPair {
        let pair = self.colors.generate();
        self.set_colors(pair);
        &self.draft
    }

    /// Replaces the draft with user-chosen colours.
    pub fn set_colors(&mut self, colors: ColorPair) {
        self.draft = colors.clone();
        self.view.send_modify(|view| view.draft = colors.clone());
        self.emit(SyncEvent::DraftChanged(colors));
    }

    pub fn ensure_idle(&self) -> Result<(), SubmitError> {
        if self.submission.is_idle() {
            Ok(())
        } else {
            Err(SubmitError::Busy(self.submission.clone()))
        }
    }

    pub async fn submit_draft(&mut self) -> Result<SubmissionState, SubmitError> {
        let colors = self.draft.clone();
        self.submit(colors).await
    }

    /// Drives one submission to a terminal state and returns it.
    ///
    /// Refused without touching the ledger unless the state is `Idle`. A
    /// confirmed pixel is not appended here; it arrives through the
    /// subscription like everyone else's. Subscription events keep being
    /// ingested while the write is pending.
    pub async fn submit(&mut self, colors: ColorPair) -> Result<SubmissionState, SubmitError> {
        let mut write = self.begin_submit(colors)?;
        loop {
            tokio::select! {
                step = write.next_step() => {
                    if let Some(state) = self.advance(&mut write, step) {
                        return Ok(state);
                    }
                }
                Some(pixel) = next_event(&mut self.subscription) => {
                    self.ingest(pixel);
                }
            }
        }
    }

    /// Moves to `AwaitingSignature` and hands back the ledger work of the
    /// write. The caller polls it and feeds each step to `advance`.
    pub(crate) fn begin_submit(&mut self, colors: ColorPair) -> Result<InFlightWrite, SubmitError> {
        self.ensure_idle()?;
        info!("submitting pixel {} -> {}", colors.color_a, colors.color_b);
        self.set_submission(SubmissionState::AwaitingSignature);
        Ok(InFlightWrite::broadcast(Arc::clone(&self.ledger), colors))
    }

    /// Applies one finished step of `write`. Returns the terminal state once
    /// the write is done; until then `write` has moved on to its next step.
    pub(crate) fn advance(
        &mut self,
        write: &mut InFlightWrite,
        step: WriteStep,
    ) -> Option<SubmissionState> {
        match step {
            WriteStep::Broadcast { count, handle } => {
                self.apply_count(count);
                match handle {
                    Ok(handle) => {
                        info!("mining {}", handle);
                        self.set_submission(SubmissionState::Pending(handle.clone()));
                        *write = InFlightWrite::confirmation(Arc::clone(&self.ledger), handle);
                        None
                    }
                    Err(err) => Some(self.fail(err.into())),
                }
            }
            WriteStep::Mined {
                handle,
                outcome,
                count,
            } => {
                let state = match outcome {
                    Ok(TxOutcome::Confirmed) => {
                        // The mined pixel is usually already buffered.
                        self.drain_subscription();
                        info!("mined {}", handle);
                        self.set_submission(SubmissionState::Confirmed(handle));
                        self.submission.clone()
                    }
                    Ok(TxOutcome::Reverted) => self.fail(FailureReason::Reverted),
                    Err(err) => self.fail(err.into()),
                };
                if let Some(count) = count {
                    self.apply_count(count);
                }
                self.drain_subscription();
                Some(state)
            }
        }
    }

    /// Clears a terminal state back to `Idle`. Returns whether anything changed.
    pub fn acknowledge(&mut self) -> bool {
        if !self.submission.is_terminal() {
            return false;
        }
        self.set_submission(SubmissionState::Idle);
        true
    }

    /// Unsubscribes from the ledger. Dropping the controller does the same.
    pub fn shutdown(&mut self) {
        if let Some(subscription) = self.subscription.take() {
            subscription.unsubscribe();
            info!("pixel sync controller unsubscribed");
        }
    }

    fn fail(&mut self, reason: FailureReason) -> SubmissionState {
        warn!("pixel submission failed: {}", reason);
        self.set_submission(SubmissionState::Failed(reason));
        self.submission.clone()
    }

    fn set_submission(&mut self, next: SubmissionState) {
        debug!("submission {:?} -> {:?}", self.submission, next);
        self.submission = next.clone();
        self.view.send_modify(|view| view.submission = next.clone());
        self.emit(SyncEvent::SubmissionChanged(next));
    }

    fn emit(&self, event: SyncEvent) {
        // Nobody listening is fine.
        let _ = self.events.send(event);
    }
}

async fn next_event(subscription: &mut Option<PixelSubscription>) -> Option<Pixel> {
    match subscription {
        Some(subscription) => subscription.recv().await,
        None => std::future::pending().await,
    }
}

/// Result of one ledger round trip of a write.
pub(crate) enum WriteStep {
    /// Count read before signing, and the broadcast itself.
    Broadcast {
        count: Result<u64, LedgerError>,
        handle: Result<TxHandle, LedgerError>,
    },
    /// Mining outcome, plus a fresh count when it was confirmed.
    Mined {
        handle: TxHandle,
        outcome: Result<TxOutcome, LedgerError>,
        count: Option<Result<u64, LedgerError>>,
    },
}

type StepFuture = Pin<Box<dyn Future<Output = WriteStep> + Send>>;

/// Ledger work of the current submission, detached from the controller so
/// its owner can keep serving other work while it runs. Dropping it abandons
/// the wait.
pub(crate) struct InFlightWrite {
    step: StepFuture,
}

impl InFlightWrite {
    fn broadcast(ledger: Arc<dyn LedgerClient>, colors: ColorPair) -> Self {
        Self {
            step: Box::pin(async move {
                let count = ledger.get_total_count().await;
                let handle = ledger.submit_pixel(&colors).await;
                WriteStep::Broadcast { count, handle }
            }),
        }
    }

    fn confirmation(ledger: Arc<dyn LedgerClient>, handle: TxHandle) -> Self {
        Self {
            step: Box::pin(async move {
                let outcome = ledger.await_confirmation(&handle).await;
                let count = match outcome {
                    Ok(TxOutcome::Confirmed) => Some(ledger.get_total_count().await),
                    _ => None,
                };
                WriteStep::Mined {
                    handle,
                    outcome,
                    count,
                }
            }),
        }
    }

    /// Waits for the current step. Must not be polled again after it
    /// completes until `advance` has moved the write on.
    pub(crate) async fn next_step(&mut self) -> WriteStep {
        (&mut self.step).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use px_color::SeededColorPairs;
    use px_ledger::MemoryLedger;
    use px_types::AccountId;
    use proptest::prelude::*;

    fn controller() -> PixelSyncController {
        let ledger = MemoryLedger::with_signer(AccountId("0xaa".to_owned()));
        PixelSyncController::new(Arc::new(ledger), Arc::new(SeededColorPairs::new(1)))
    }

    fn pixel(account: u8, at: u64, color: u8) -> Pixel {
        Pixel::new(
            AccountId(format!("0x{account:02x}")),
            at,
            format!("{color:06x}"),
            "000000",
        )
    }

    #[test]
    fn ingest_drops_exact_duplicates_only() {
        let mut controller = controller();
        assert!(controller.ingest(pixel(1, 10, 1)));
        assert!(!controller.ingest(pixel(1, 10, 1)));
        assert!(controller.ingest(pixel(1, 11, 1)));
        assert!(controller.ingest(pixel(2, 10, 1)));
        assert_eq!(controller.pixels().len(), 3);
        assert_eq!(controller.watch().borrow().pixels.len(), 3);
    }

    #[test]
    fn acknowledge_outside_terminal_state_is_noop() {
        let mut controller = controller();
        assert!(!controller.acknowledge());
        assert_eq!(controller.submission(), &SubmissionState::Idle);
    }

    #[test]
    fn set_colors_updates_draft_and_view() {
        let mut controller = controller();
        let colors = ColorPair::parse("#123456", "abcdef").expect("valid colors");
        controller.set_colors(colors.clone());
        assert_eq!(controller.draft(), &colors);
        assert_eq!(controller.watch().borrow().draft, colors);
    }

    proptest! {
        #[test]
        fn canonical_list_holds_each_tuple_once(
            deliveries in prop::collection::vec((0u8..4, 0u64..4, 0u8..3), 0..64)
        ) {
            let mut controller = controller();
            let mut expected: Vec<Pixel> = Vec::new();
            for (account, at, color) in deliveries {
                let next = pixel(account, at, color);
                let appended = controller.ingest(next.clone());
                prop_assert_eq!(appended, !expected.contains(&next));
                if appended {
                    expected.push(next);
                }
            }
            prop_assert_eq!(controller.pixels(), expected.as_slice());
        }
    }
}
