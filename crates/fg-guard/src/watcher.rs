//! Tokio driver for [`WatcherSession`].
//!
//! Timers, checks and the stream each run as their own task and report back
//! over one event channel; the driver loop is the only place session state
//! changes. Stream events carry the generation of the connection that
//! produced them so a replaced socket cannot leak late events.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};

use crate::check::StatusSource;
use crate::session::{Action, Trigger, WatcherSession};
use crate::state::{GuardSettings, GuardState};
use crate::transport::{StreamConnector, StreamSender, PING_MESSAGE};

const SEND_TIMEOUT: Duration = Duration::from_secs(2);

enum Event {
    Trigger(Trigger),
    Connected {
        generation: u64,
        sender: Box<dyn StreamSender>,
    },
    Stream {
        generation: u64,
        trigger: Trigger,
    },
}

type SharedSender = Arc<AsyncMutex<Box<dyn StreamSender>>>;

/// Output slot shared by the handle and the driver.
///
/// Sends and `close` take the same lock, so once `close` returns no further
/// state reaches the receiver and the channel is closed.
#[derive(Clone)]
struct Outbox(Arc<Mutex<Option<mpsc::UnboundedSender<GuardState>>>>);

impl Outbox {
    fn new(tx: mpsc::UnboundedSender<GuardState>) -> Self {
        Self(Arc::new(Mutex::new(Some(tx))))
    }

    fn slot(&self) -> MutexGuard<'_, Option<mpsc::UnboundedSender<GuardState>>> {
        self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn send(&self, state: GuardState) {
        if let Some(tx) = self.slot().as_ref() {
            let _ = tx.send(state);
        }
    }

    fn close(&self) {
        self.slot().take();
    }
}

/// Handle to a running guard watcher.
///
/// Guard states arrive on the receiver returned by [`GuardWatcher::start`].
/// The receiver closes once the watcher has shut down, either after
/// [`stop`](Self::stop) or after emitting its first inactive state.
pub struct GuardWatcher {
    stopped: Arc<AtomicBool>,
    out: Outbox,
    events: mpsc::UnboundedSender<Event>,
    task: Option<JoinHandle<()>>,
}

impl GuardWatcher {
    /// Start watching. Streaming is used when `settings.streaming` is set, a
    /// connector is supplied and the server URL yields a stream URL.
    pub fn start(
        settings: GuardSettings,
        source: Arc<dyn StatusSource>,
        connector: Option<Arc<dyn StreamConnector>>,
    ) -> (Self, mpsc::UnboundedReceiver<GuardState>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let stopped = Arc::new(AtomicBool::new(false));
        let out = Outbox::new(out_tx);

        let stream = match (settings.streaming, connector) {
            (true, Some(connector)) => settings
                .stream_url()
                .map(|url| (connector, url.to_string())),
            _ => None,
        };
        let session = WatcherSession::new(stream.is_some(), settings.unlock_on_waiting);

        let driver = Driver {
            session,
            settings,
            source,
            stream,
            events: events_tx.clone(),
            out: out.clone(),
            stopped: stopped.clone(),
            generation: 0,
            sender: None,
            poll: None,
            heartbeat: None,
            ping: None,
            ping_send: None,
            reconnect: None,
            socket: None,
        };
        let task = tokio::spawn(driver.run(events_rx));

        (
            Self {
                stopped,
                out,
                events: events_tx,
                task: Some(task),
            },
            out_rx,
        )
    }

    /// Stop immediately. No state is emitted after this returns, even by
    /// checks already in flight, and the receiver closes once drained.
    /// Idempotent.
    pub fn stop(&self) {
        if !self.stopped.swap(true, Ordering::SeqCst) {
            log::debug!("Guard watcher stop requested");
        }
        self.out.close();
        let _ = self.events.send(Event::Trigger(Trigger::Stop));
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Wait until every timer and socket has been released.
    pub async fn join(mut self) {
        let Some(task) = self.task.take() else {
            return;
        };
        if let Err(e) = task.await {
            log::warn!("Guard watcher task failed: {}", e);
        }
    }
}

impl Drop for GuardWatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

struct Driver {
    session: WatcherSession,
    settings: GuardSettings,
    source: Arc<dyn StatusSource>,
    stream: Option<(Arc<dyn StreamConnector>, String)>,
    events: mpsc::UnboundedSender<Event>,
    out: Outbox,
    stopped: Arc<AtomicBool>,
    generation: u64,
    sender: Option<SharedSender>,
    poll: Option<JoinHandle<()>>,
    heartbeat: Option<JoinHandle<()>>,
    ping: Option<JoinHandle<()>>,
    ping_send: Option<JoinHandle<()>>,
    reconnect: Option<JoinHandle<()>>,
    socket: Option<JoinHandle<()>>,
}

impl Driver {
    async fn run(mut self, mut events: mpsc::UnboundedReceiver<Event>) {
        let mut running = self.apply(Trigger::Start);

        while running {
            let Some(event) = events.recv().await else {
                break;
            };
            let trigger = match event {
                Event::Trigger(trigger) => trigger,
                Event::Connected { generation, sender } => {
                    if generation != self.generation {
                        continue;
                    }
                    self.sender = Some(Arc::new(AsyncMutex::new(sender)));
                    Trigger::StreamOpened
                }
                Event::Stream {
                    generation,
                    trigger,
                } => {
                    if generation != self.generation {
                        continue;
                    }
                    if matches!(trigger, Trigger::StreamClosed | Trigger::StreamError) {
                        self.sender = None;
                    }
                    trigger
                }
            };
            running = self.apply(trigger);
        }

        self.shutdown().await;
    }

    /// Returns `false` once the session has shut down.
    fn apply(&mut self, trigger: Trigger) -> bool {
        let trigger = if self.stopped.load(Ordering::SeqCst) {
            Trigger::Stop
        } else {
            trigger
        };

        for action in self.session.handle(trigger) {
            match action {
                Action::StartPolling => {
                    let period = self.settings.poll_interval();
                    self.poll = Some(self.ticker(period, true, Trigger::PollTick));
                }
                Action::StartHeartbeat => {
                    let period = self.settings.heartbeat_interval();
                    self.heartbeat = Some(self.ticker(period, false, Trigger::HeartbeatTick));
                }
                Action::StartPing => {
                    abort(&mut self.ping);
                    let period = self.settings.ping_interval();
                    self.ping = Some(self.ticker(period, false, Trigger::PingTick));
                }
                Action::StopPing => abort(&mut self.ping),
                Action::RunCheck => self.run_check(),
                Action::Emit(state) => self.emit(state),
                Action::OpenStream => self.open_stream(),
                Action::SendPing => self.send_ping(),
                Action::ScheduleReconnect(delay) => {
                    abort(&mut self.reconnect);
                    log::debug!("Status stream reconnect in {:?}", delay);
                    let events = self.events.clone();
                    self.reconnect = Some(tokio::spawn(async move {
                        time::sleep(delay).await;
                        let _ = events.send(Event::Trigger(Trigger::ReconnectDue));
                    }));
                }
                Action::Shutdown => {
                    self.stopped.store(true, Ordering::SeqCst);
                    return false;
                }
            }
        }
        true
    }

    fn emit(&self, state: GuardState) {
        log::debug!("Guard state: {:?}", state);
        self.out.send(state);
    }

    fn ticker(&self, period: Duration, immediate: bool, trigger: Trigger) -> JoinHandle<()> {
        let events = self.events.clone();
        let first = if immediate { Instant::now() } else { Instant::now() + period };
        tokio::spawn(async move {
            let mut interval = time::interval_at(first, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                if events.send(Event::Trigger(trigger.clone())).is_err() {
                    break;
                }
            }
        })
    }

    /// Checks run detached; results landing after shutdown are dropped.
    fn run_check(&self) {
        let source = self.source.clone();
        let settings = self.settings.clone();
        let events = self.events.clone();
        tokio::spawn(async move {
            let check_task = tokio::spawn(async move { source.fetch(&settings).await });
            let state = match check_task.await {
                Ok(Ok(state)) => state,
                Ok(Err(e)) => {
                    log::debug!("Guard check failed: {}", e);
                    GuardState::offline()
                }
                Err(e) => {
                    log::warn!("Guard check task died: {}", e);
                    GuardState::offline()
                }
            };
            let _ = events.send(Event::Trigger(Trigger::CheckCompleted(state)));
        });
    }

    fn open_stream(&mut self) {
        abort(&mut self.socket);
        self.sender = None;
        self.generation += 1;
        let generation = self.generation;

        let Some((connector, url)) = self.stream.clone() else {
            return;
        };
        let events = self.events.clone();
        self.socket = Some(tokio::spawn(async move {
            let stream_event = |trigger| Event::Stream {
                generation,
                trigger,
            };
            let mut receiver = match connector.connect(&url).await {
                Ok((sender, receiver)) => {
                    if events.send(Event::Connected { generation, sender }).is_err() {
                        return;
                    }
                    receiver
                }
                Err(e) => {
                    log::debug!("Status stream connect to {} failed: {}", url, e);
                    let _ = events.send(stream_event(Trigger::StreamError));
                    return;
                }
            };
            loop {
                let trigger = match receiver.recv().await {
                    Some(Ok(text)) => Trigger::StreamMessage(text),
                    Some(Err(e)) => {
                        log::debug!("Status stream error: {}", e);
                        let _ = events.send(stream_event(Trigger::StreamError));
                        return;
                    }
                    None => {
                        let _ = events.send(stream_event(Trigger::StreamClosed));
                        return;
                    }
                };
                if events.send(stream_event(trigger)).is_err() {
                    return;
                }
            }
        }));
    }

    /// Sends run detached so a stalled socket cannot hold up the event loop.
    /// A tick is skipped while the previous ping is still pending.
    fn send_ping(&mut self) {
        let Some(sender) = self.sender.clone() else {
            return;
        };
        let Ok(mut sender) = sender.try_lock_owned() else {
            log::debug!("Status stream ping skipped, previous send still pending");
            return;
        };
        self.ping_send = Some(tokio::spawn(async move {
            match time::timeout(SEND_TIMEOUT, sender.send_text(PING_MESSAGE.to_string())).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => log::debug!("Status stream ping failed: {}", e),
                Err(_) => log::debug!("Status stream ping timed out"),
            }
        }));
    }

    async fn shutdown(&mut self) {
        self.stopped.store(true, Ordering::SeqCst);
        self.out.close();
        for task in [
            &mut self.poll,
            &mut self.heartbeat,
            &mut self.ping,
            &mut self.ping_send,
            &mut self.reconnect,
            &mut self.socket,
        ] {
            abort(task);
        }
        if let Some(sender) = self.sender.take() {
            let _ = time::timeout(SEND_TIMEOUT, async move {
                sender.lock().await.close().await;
            })
            .await;
        }
        log::debug!("Guard watcher shut down");
    }
}

fn abort(task: &mut Option<JoinHandle<()>>) {
    if let Some(task) = task.take() {
        task.abort();
    }
}
