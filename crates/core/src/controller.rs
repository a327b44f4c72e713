//! Session controller: owns the reader and delivery tasks
//!
//! ```text
//! process stdout -> reader task -> event buffer -> delivery task -> subscribers
//!                       |                               ^
//!                  Snapshot (watch)                     |
//!                       ^                               |
//!             CommandDispatcher ------- advisories -----+
//! ```
//!
//! The reader task decodes each line and applies it to the shared snapshot
//! as soon as it is read, so session state is current whether or not anyone
//! is subscribed. The delivery task hands every update to all subscribers in
//! the order the lines were read. While nobody is subscribed it holds the
//! next update and the buffer absorbs the backlog under its overflow policy.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{mpsc, watch, Notify};
use tokio::task::JoinHandle;
use tokio_stream::StreamExt;

use crate::channel::{LineChannel, LineStream, ProcessChannel, StopOutcome};
use crate::config::SessionConfig;
use crate::dispatcher::{CommandDispatcher, Exchange, PendingPrompt};
use crate::error::Result;
use crate::protocol::decode;
use crate::session::Session;
use crate::streaming::{event_buffer, EventReceiver, EventSender};
use crate::types::{EcuCommand, EcuEvent};

/// Current session state and exchange bookkeeping
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct Snapshot {
    pub session: Session,
    pub exchange: Exchange,
}

impl Snapshot {
    pub(crate) fn on_issued(&mut self, command: &EcuCommand) {
        if let EcuCommand::FlashMap(map_id) = command {
            self.session.begin_flash(map_id);
        }
        self.exchange.on_issued(command);
    }

    pub(crate) fn on_aborted(&mut self, command: &EcuCommand) {
        if let EcuCommand::FlashMap(map_id) = command {
            if self.session.pending_map.as_deref() == Some(map_id.as_str()) {
                self.session.pending_map = None;
            }
        }
        self.exchange.on_aborted(command);
    }

    pub(crate) fn on_event(&mut self, event: &EcuEvent) {
        self.session.apply_event(event);
        self.exchange.on_event(event);
    }
}

/// Where a delivered event came from
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub enum Origin {
    /// Decoded from a process output line
    Process,
    /// Raised by the dispatcher
    Local,
}

/// One delivered event with the session state after applying it
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Update {
    /// 1-based delivery sequence number, assigned by the delivery task
    pub seq: u64,
    pub origin: Origin,
    pub event: EcuEvent,
    pub session: Session,
    pub pending_prompt: Option<PendingPrompt>,
}

/// Receiver of session updates
///
/// Called on the delivery task: implementations must return quickly and
/// hand long-running work elsewhere.
pub trait Subscriber: Send + Sync {
    fn on_update(&self, update: &Update);

    /// Process output has ended and every buffered event was delivered
    fn on_close(&self) {}

    /// Closed subscribers are dropped from the fan-out
    fn is_closed(&self) -> bool {
        false
    }
}

impl Subscriber for mpsc::UnboundedSender<Update> {
    fn on_update(&self, update: &Update) {
        let _ = self.send(update.clone());
    }

    fn is_closed(&self) -> bool {
        mpsc::UnboundedSender::is_closed(self)
    }
}

/// Handle returned by [`SessionController::subscribe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

#[derive(Default)]
struct Subscribers {
    list: Mutex<Vec<(SubscriptionId, Arc<dyn Subscriber>)>>,
    next_id: AtomicU64,
    joined: Notify,
}

impl Subscribers {
    fn list(&self) -> MutexGuard<'_, Vec<(SubscriptionId, Arc<dyn Subscriber>)>> {
        self.list.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn add(&self, subscriber: Arc<dyn Subscriber>) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::SeqCst));
        self.list().push((id, subscriber));
        self.joined.notify_waiters();
        id
    }

    fn remove(&self, id: SubscriptionId) -> bool {
        let mut list = self.list();
        let before = list.len();
        list.retain(|(sid, _)| *sid != id);
        list.len() != before
    }

    /// Prune closed subscribers and return the live ones
    fn live(&self) -> Vec<Arc<dyn Subscriber>> {
        let mut list = self.list();
        list.retain(|(_, s)| !s.is_closed());
        list.iter().map(|(_, s)| s.clone()).collect()
    }

    async fn wait_for_any(&self) -> Vec<Arc<dyn Subscriber>> {
        loop {
            let notified = self.joined.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let live = self.live();
            if !live.is_empty() {
                return live;
            }
            tracing::trace!("No subscribers, holding events");
            notified.await;
        }
    }
}

/// Headless controller for one ECU session
pub struct SessionController {
    dispatcher: Arc<CommandDispatcher>,
    subscribers: Arc<Subscribers>,
    state: Arc<watch::Sender<Snapshot>>,
    terminate_timeout: Duration,
    reader: Mutex<Option<JoinHandle<()>>>,
    delivery: Mutex<Option<JoinHandle<()>>>,
}

impl SessionController {
    /// Spawn the ECU process and start the session
    pub fn launch(config: &SessionConfig) -> Result<Self> {
        let (channel, lines) = ProcessChannel::start(config)?;
        tracing::debug!("Attaching session to pid {:?}", channel.id());
        Ok(Self::attach(Arc::new(channel), lines, config))
    }

    /// Start a session over an existing channel
    ///
    /// Must be called from within a Tokio runtime.
    pub fn attach(channel: Arc<dyn LineChannel>, lines: LineStream, config: &SessionConfig) -> Self {
        let (events_tx, events_rx) = event_buffer(config.buffer_capacity, config.overflow_policy);
        let (advisory_tx, advisory_rx) = mpsc::unbounded_channel();
        let state = Arc::new(watch::Sender::new(Snapshot::default()));
        let subscribers = Arc::new(Subscribers::default());

        let dispatcher = Arc::new(CommandDispatcher::new(
            channel,
            state.clone(),
            advisory_tx,
            config.quit_command.clone(),
            config.grace_timeout,
            config.terminate_timeout,
        ));

        let reader = tokio::spawn(read_lines(lines, state.clone(), events_tx));
        let delivery = tokio::spawn(deliver(events_rx, advisory_rx, subscribers.clone()));

        tracing::info!(
            "Session started (buffer {}, {:?})",
            config.buffer_capacity,
            config.overflow_policy
        );

        Self {
            dispatcher,
            subscribers,
            state,
            terminate_timeout: config.terminate_timeout,
            reader: Mutex::new(Some(reader)),
            delivery: Mutex::new(Some(delivery)),
        }
    }

    /// Command dispatcher for this session
    pub fn dispatcher(&self) -> &CommandDispatcher {
        &self.dispatcher
    }

    /// Shared handle to the dispatcher, for use from other tasks
    pub fn dispatcher_handle(&self) -> Arc<CommandDispatcher> {
        self.dispatcher.clone()
    }

    /// Register a subscriber. Buffered events start flowing to it immediately.
    pub fn subscribe(&self, subscriber: Arc<dyn Subscriber>) -> SubscriptionId {
        let id = self.subscribers.add(subscriber);
        tracing::debug!("Subscriber {:?} added", id);
        id
    }

    /// Subscribe through an unbounded channel
    pub fn subscribe_channel(&self) -> mpsc::UnboundedReceiver<Update> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribe(Arc::new(tx));
        rx
    }

    /// Remove a subscriber. Returns false if it was not registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.subscribers.remove(id)
    }

    /// Watch the snapshot without subscribing to events
    pub fn watch(&self) -> watch::Receiver<Snapshot> {
        self.state.subscribe()
    }

    /// Current state
    pub fn snapshot(&self) -> Snapshot {
        self.state.borrow().clone()
    }

    /// Current session
    pub fn session(&self) -> Session {
        self.state.borrow().session.clone()
    }

    /// Stop the process and wait for the reader to finish
    ///
    /// When subscribers are attached, also waits for the remaining events to
    /// be delivered.
    pub async fn quit(&self) -> Result<StopOutcome> {
        let outcome = self.dispatcher.quit().await?;

        let reader = take_handle(&self.reader);
        if let Some(handle) = reader {
            join_or_abort(handle, self.terminate_timeout, "reader").await;
        }

        if !self.subscribers.live().is_empty() {
            let delivery = take_handle(&self.delivery);
            if let Some(handle) = delivery {
                join_or_abort(handle, self.terminate_timeout, "delivery").await;
            }
        }

        tracing::info!("Session closed ({:?})", outcome);
        Ok(outcome)
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        for slot in [&self.reader, &self.delivery] {
            if let Some(handle) = take_handle(slot) {
                handle.abort();
            }
        }
    }
}

fn take_handle(slot: &Mutex<Option<JoinHandle<()>>>) -> Option<JoinHandle<()>> {
    slot.lock().unwrap_or_else(|e| e.into_inner()).take()
}

async fn join_or_abort(handle: JoinHandle<()>, limit: Duration, name: &str) {
    let abort = handle.abort_handle();
    match tokio::time::timeout(limit, handle).await {
        Ok(Ok(())) => tracing::debug!("{} task completed", name),
        Ok(Err(e)) => tracing::error!("{} task failed: {}", name, e),
        Err(_) => {
            tracing::warn!("{} task did not finish within {}ms", name, limit.as_millis());
            abort.abort();
        }
    }
}

/// Reader task: decode, apply and queue each line until the output ends
async fn read_lines(
    mut lines: LineStream,
    state: Arc<watch::Sender<Snapshot>>,
    events: EventSender<Update>,
) {
    while let Some(line) = lines.next().await {
        let event = decode(&line);
        let mut update = None;
        state.send_modify(|snapshot| {
            snapshot.on_event(&event);
            update = Some(Update {
                seq: 0,
                origin: Origin::Process,
                event,
                session: snapshot.session.clone(),
                pending_prompt: snapshot.exchange.pending_prompt.clone(),
            });
        });
        let Some(update) = update else { continue };
        if events.send(update).await.is_err() {
            break;
        }
    }
    tracing::info!("ECU process output closed");
}

/// Delivery task: fan out in order, local advisories ahead of queued output
async fn deliver(
    mut events: EventReceiver<Update>,
    mut advisories: mpsc::UnboundedReceiver<Update>,
    subscribers: Arc<Subscribers>,
) {
    let mut seq = 0u64;

    loop {
        let mut update = tokio::select! {
            biased;
            Some(update) = advisories.recv() => update,
            next = events.recv() => match next {
                Some(update) => update,
                None => break,
            },
        };

        let targets = subscribers.wait_for_any().await;

        seq += 1;
        update.seq = seq;
        tracing::trace!("Delivering #{} {} to {} subscribers", seq, update.event.kind(), targets.len());
        for subscriber in &targets {
            subscriber.on_update(&update);
        }
    }

    for subscriber in subscribers.live() {
        subscriber.on_close();
    }
    tracing::debug!("Delivery finished after {} events", seq);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::MockChannel;
    use crate::dispatcher::Verification;
    use crate::session::Compliance;
    use crate::streaming::OverflowPolicy;
    use crate::types::EcuClass;
    use tokio::time::{timeout, Duration};

    fn mock_session(config: &SessionConfig) -> (SessionController, Arc<MockChannel>) {
        let (channel, lines) = MockChannel::new();
        let channel = Arc::new(channel);
        let controller = SessionController::attach(channel.clone(), lines, config);
        (controller, channel)
    }

    async fn next(rx: &mut mpsc::UnboundedReceiver<Update>) -> Update {
        timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("update not delivered in time")
            .expect("subscriber channel closed")
    }

    #[tokio::test]
    async fn test_identify_scenario() {
        let (controller, channel) = mock_session(&SessionConfig::default());
        let mut rx = controller.subscribe_channel();

        channel.emit("ECU_SIM_READY");
        assert_eq!(next(&mut rx).await.event, EcuEvent::Ready);

        controller.dispatcher().identify().await.unwrap();
        assert_eq!(channel.written(), vec!["IDENTIFY"]);

        channel.emit("VIN: 1HD1KB4137K123456, ECU: ROAD, ALLOWED: R_A,R_B,R_C");
        let update = next(&mut rx).await;
        assert_eq!(update.seq, 2);
        assert_eq!(update.session.vehicle_id.as_deref(), Some("1HD1KB4137K123456"));
        assert_eq!(update.session.ecu_class, EcuClass::Road);
        assert_eq!(update.session.allowed_maps.len(), 3);
        assert!(update.session.ready);
    }

    #[tokio::test]
    async fn test_race_flash_on_road_ecu_scenario() {
        let (controller, channel) = mock_session(&SessionConfig::default());
        let mut rx = controller.subscribe_channel();

        channel.emit("VIN: 123456, ECU: ROAD, ALLOWED: R_A,R_B,R_C");
        next(&mut rx).await;

        controller.dispatcher().flash_map("X_C").await.unwrap();
        let advisory = next(&mut rx).await;
        assert_eq!(advisory.origin, Origin::Local);
        assert!(matches!(advisory.event, EcuEvent::Warning { .. }));
        assert_eq!(channel.written(), vec!["FLASH_MAP X_C"]);

        channel.emit("PROMPT: Re-enter VIN from motorcycle documents for verification:");
        let prompt = next(&mut rx).await;
        let pending = prompt.pending_prompt.expect("prompt should be pending");
        assert_eq!(pending.command, Some(EcuCommand::FlashMap("X_C".into())));
        assert_eq!(prompt.session.pending_map.as_deref(), Some("X_C"));

        controller.dispatcher().respond_to_prompt("123456").await.unwrap();
        channel.emit("SUCCESS: flashed");
        let success = next(&mut rx).await;
        assert_eq!(success.session.flashed_map.as_deref(), Some("X_C"));
        assert_eq!(success.session.pending_map, None);
        assert_eq!(success.pending_prompt, None);

        assert_eq!(controller.session(), success.session);
        assert_eq!(
            controller.dispatcher().verify(),
            Verification::Violation {
                map: "X_C".into(),
                horsepower: 100
            }
        );
    }

    #[tokio::test]
    async fn test_flash_error_abandons_pending_map() {
        let (controller, channel) = mock_session(&SessionConfig::default());
        let mut rx = controller.subscribe_channel();

        channel.emit("VIN: 234567, ECU: ROAD, ALLOWED: R_A,R_B");
        next(&mut rx).await;

        controller.dispatcher().flash_map("R_A").await.unwrap();
        channel.emit("ERROR: VIN mismatch. Please try again.");
        let update = next(&mut rx).await;
        assert!(matches!(update.event, EcuEvent::Error { .. }));
        assert_eq!(update.session.pending_map, None);
        assert_eq!(update.session.flashed_map, None);
        assert_eq!(controller.dispatcher().verify(), Verification::NoMapFlashed);
    }

    #[tokio::test]
    async fn test_malformed_identify_leaves_session_unchanged() {
        let (controller, channel) = mock_session(&SessionConfig::default());
        let mut rx = controller.subscribe_channel();

        channel.emit("VIN: onlyonefield");
        let update = next(&mut rx).await;
        assert!(matches!(update.event, EcuEvent::Warning { .. }));
        assert_eq!(update.session, Session::default());
        assert_eq!(controller.dispatcher().verify(), Verification::NoVehicle);
    }

    #[tokio::test]
    async fn test_events_delivered_in_order_to_every_subscriber() {
        let (controller, channel) = mock_session(&SessionConfig::default());
        let mut first = controller.subscribe_channel();
        let mut second = controller.subscribe_channel();

        channel.emit("VIN: 123456, ECU: RACE, ALLOWED: R_A,R_B,R_C");
        channel.emit("PROMPT: Re-enter VIN");
        channel.emit("SUCCESS: flashed");

        for rx in [&mut first, &mut second] {
            let kinds = [
                next(rx).await.event.kind(),
                next(rx).await.event.kind(),
                next(rx).await.event.kind(),
            ];
            assert_eq!(kinds, ["identify", "prompt", "success"]);
        }
    }

    #[tokio::test]
    async fn test_events_buffered_until_subscriber_joins() {
        let (controller, channel) = mock_session(&SessionConfig::default());

        channel.emit("ECU_SIM_READY");
        channel.emit("diagnostic line");
        channel.emit("WARNING: low voltage");
        tokio::time::sleep(Duration::from_millis(50)).await;

        let mut rx = controller.subscribe_channel();
        assert_eq!(next(&mut rx).await.event, EcuEvent::Ready);
        assert_eq!(next(&mut rx).await.event, EcuEvent::raw("diagnostic line"));
        let third = next(&mut rx).await;
        assert_eq!(third.seq, 3);
        assert_eq!(third.event, EcuEvent::warning("WARNING: low voltage"));
    }

    #[tokio::test]
    async fn test_dropped_receiver_is_pruned() {
        let (controller, channel) = mock_session(&SessionConfig::default());
        let gone = controller.subscribe_channel();
        drop(gone);

        channel.emit("ECU_SIM_READY");
        tokio::time::sleep(Duration::from_millis(50)).await;

        let mut rx = controller.subscribe_channel();
        assert_eq!(next(&mut rx).await.event, EcuEvent::Ready);
    }

    #[tokio::test]
    async fn test_unsubscribe() {
        let (controller, _channel) = mock_session(&SessionConfig::default());
        let (tx, _rx) = mpsc::unbounded_channel();
        let id = controller.subscribe(Arc::new(tx));
        assert!(controller.unsubscribe(id));
        assert!(!controller.unsubscribe(id));
    }

    struct Recorder {
        seen: Mutex<Vec<u64>>,
        closed: Arc<Notify>,
    }

    impl Subscriber for Recorder {
        fn on_update(&self, update: &Update) {
            self.seen.lock().unwrap().push(update.seq);
        }

        fn on_close(&self) {
            self.closed.notify_one();
        }
    }

    #[tokio::test]
    async fn test_close_after_process_exit() {
        let (controller, channel) = mock_session(&SessionConfig::default());
        let closed = Arc::new(Notify::new());
        let recorder = Arc::new(Recorder {
            seen: Mutex::new(Vec::new()),
            closed: closed.clone(),
        });
        controller.subscribe(recorder.clone());

        channel.emit("ECU_SIM_READY");
        channel.emit("QUIT_ACK");
        channel.exit();

        timeout(Duration::from_secs(1), closed.notified())
            .await
            .expect("on_close not called");
        assert_eq!(*recorder.seen.lock().unwrap(), vec![1, 2]);
        assert!(matches!(
            controller.dispatcher().identify().await,
            Err(crate::CoreError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn test_quit_is_idempotent() {
        let (controller, channel) = mock_session(&SessionConfig::default());
        let _rx = controller.subscribe_channel();

        assert_eq!(controller.quit().await.unwrap(), StopOutcome::Graceful);
        assert_eq!(controller.quit().await.unwrap(), StopOutcome::AlreadyStopped);
        assert_eq!(channel.written(), vec!["QUIT"]);
    }

    #[tokio::test]
    async fn test_drop_oldest_policy_under_load() {
        let config = SessionConfig::default().with_buffer(2, OverflowPolicy::DropOldest);
        let (controller, channel) = mock_session(&config);

        for i in 0..5 {
            channel.emit(&format!("line {}", i));
        }
        tokio::time::sleep(Duration::from_millis(50)).await;

        let mut rx = controller.subscribe_channel();
        let mut texts = Vec::new();
        while let Ok(Some(update)) = timeout(Duration::from_millis(100), rx.recv()).await {
            if let EcuEvent::Raw { text } = update.event {
                texts.push(text);
            }
        }
        assert!(texts.len() < 5, "nothing was dropped: {:?}", texts);
        assert_eq!(texts.last().map(String::as_str), Some("line 4"));
        let mut sorted = texts.clone();
        sorted.sort();
        assert_eq!(texts, sorted);
    }

    #[tokio::test]
    async fn test_backpressure_keeps_every_event() {
        let config = SessionConfig::default().with_buffer(2, OverflowPolicy::Backpressure);
        let (controller, channel) = mock_session(&config);

        for i in 0..10 {
            channel.emit(&format!("line {}", i));
        }
        tokio::time::sleep(Duration::from_millis(50)).await;

        let mut rx = controller.subscribe_channel();
        for i in 0..10 {
            assert_eq!(next(&mut rx).await.event, EcuEvent::raw(format!("line {}", i)));
        }
    }

    #[tokio::test]
    async fn test_state_tracks_output_without_subscribers() {
        let config = SessionConfig::default().with_buffer(1, OverflowPolicy::Backpressure);
        let (controller, channel) = mock_session(&config);

        channel.emit("ECU_SIM_READY");
        channel.emit("diagnostic line");
        channel.emit("VIN: 123456, ECU: ROAD, ALLOWED: R_A,R_B");
        channel.emit("another line");
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(controller.session().vehicle_id.as_deref(), Some("123456"));
        assert_eq!(controller.session().ecu_class, EcuClass::Road);

        timeout(Duration::from_millis(500), controller.dispatcher().identify())
            .await
            .expect("identify must not wait for a subscriber")
            .unwrap();
        assert_eq!(controller.dispatcher().abandon_exchange(), Some(EcuCommand::Identify));
        timeout(Duration::from_millis(500), controller.dispatcher().flash_map("X_A"))
            .await
            .expect("flash advisory must not wait for a subscriber")
            .unwrap();
        assert_eq!(channel.written(), vec!["IDENTIFY", "FLASH_MAP X_A"]);

        let mut rx = controller.subscribe_channel();
        assert_eq!(next(&mut rx).await.event, EcuEvent::Ready);
    }

    #[tokio::test]
    async fn test_concurrent_command_does_not_interleave() {
        let (controller, channel) = mock_session(&SessionConfig::default());
        let mut rx = controller.subscribe_channel();

        channel.emit("VIN: 123456, ECU: ROAD, ALLOWED: R_A,R_B,R_C");
        next(&mut rx).await;

        let flash = controller.dispatcher_handle();
        let identify = controller.dispatcher_handle();
        let (first, second) = tokio::join!(
            async move { flash.flash_map("R_A").await },
            async move {
                tokio::task::yield_now().await;
                identify.identify().await
            }
        );
        first.unwrap();
        assert!(matches!(second, Err(crate::CoreError::Busy(_))));

        channel.emit("PROMPT: Re-enter VIN from motorcycle documents for verification:");
        let prompt = next(&mut rx).await;
        assert!(prompt.pending_prompt.is_some());
        assert!(matches!(
            controller.dispatcher().identify().await,
            Err(crate::CoreError::PromptOutstanding(_))
        ));

        controller.dispatcher().respond_to_prompt("123456").await.unwrap();
        channel.emit("SUCCESS: flashed");
        let success = next(&mut rx).await;
        assert_eq!(success.session.flashed_map.as_deref(), Some("R_A"));
        assert_eq!(controller.dispatcher().in_flight(), None);
        assert_eq!(channel.written(), vec!["FLASH_MAP R_A", "123456"]);

        controller.dispatcher().identify().await.unwrap();
        assert_eq!(channel.written().last().map(String::as_str), Some("IDENTIFY"));
    }

    #[tokio::test]
    async fn test_compliance_on_race_ecu() {
        let (controller, channel) = mock_session(&SessionConfig::default());
        let mut rx = controller.subscribe_channel();

        channel.emit("VIN: 345678, ECU: RACE, allowed_maps: R_A,R_B,R_C");
        next(&mut rx).await;
        controller.dispatcher().flash_map("X_B").await.unwrap();
        channel.emit("WARNING: Map not in standard allowed list for this VIN");
        channel.emit("SUCCESS: Map 'X_B' (Race B - 77 HP, 77HP) flashed to VIN 345678");
        next(&mut rx).await;
        let success = next(&mut rx).await;

        assert_eq!(success.session.compliance(), Compliance::Compliant);
        assert_eq!(controller.dispatcher().verify().compliance(), Compliance::Compliant);
    }

    #[cfg(unix)]
    fn simulator(script: &str) -> SessionConfig {
        SessionConfig::with_program("/bin/sh")
            .with_arg("-c")
            .with_arg(script)
            .with_timeouts(Duration::from_millis(300), Duration::from_secs(2))
    }

    #[cfg(unix)]
    const SIMULATOR: &str = r#"
echo ECU_SIM_READY
while read line; do
  case "$line" in
    IDENTIFY) echo "VIN: 123456, ECU: ROAD, ALLOWED: R_A,R_B,R_C" ;;
    "FLASH_MAP "*)
      echo "PROMPT: Re-enter VIN from motorcycle documents for verification:"
      read vin
      if [ "$vin" = 123456 ]; then echo "SUCCESS: flashed"; else echo "ERROR: VIN mismatch"; fi ;;
    QUIT) echo QUIT_ACK; exit 0 ;;
    *) echo "ERROR: unknown command" ;;
  esac
done
"#;

    #[cfg(unix)]
    #[tokio::test]
    async fn test_full_session_against_process() {
        let controller = SessionController::launch(&simulator(SIMULATOR)).unwrap();
        let mut rx = controller.subscribe_channel();
        assert_eq!(next(&mut rx).await.event, EcuEvent::Ready);

        controller.dispatcher().identify().await.unwrap();
        let identified = next(&mut rx).await;
        assert_eq!(identified.session.ecu_class, EcuClass::Road);

        controller.dispatcher().flash_map("R_B").await.unwrap();
        let prompt = next(&mut rx).await;
        assert!(matches!(prompt.event, EcuEvent::Prompt { .. }));
        assert!(controller.dispatcher().pending_prompt().is_some());

        controller.dispatcher().respond_to_prompt("123456").await.unwrap();
        let success = next(&mut rx).await;
        assert_eq!(success.session.flashed_map.as_deref(), Some("R_B"));
        assert_eq!(controller.dispatcher().verify().compliance(), Compliance::Compliant);

        assert_eq!(controller.quit().await.unwrap(), StopOutcome::Graceful);
        assert_eq!(rx.try_recv().map(|u| u.event), Ok(EcuEvent::QuitAck));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_quit_unresponsive_process() {
        let controller = SessionController::launch(&simulator("echo ECU_SIM_READY; exec sleep 30")).unwrap();
        let mut rx = controller.subscribe_channel();
        assert_eq!(next(&mut rx).await.event, EcuEvent::Ready);

        let outcome = controller.quit().await.unwrap();
        assert_eq!(outcome, StopOutcome::Terminated);
        assert!(!controller.dispatcher().is_connected());
    }
}
