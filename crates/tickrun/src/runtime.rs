//! # Bridge Runtime
//!
//! Owns the listener, the session table, and the launched script
//! processes. The embedding game loop keeps the [`MainQueueWorker`] and
//! calls in here to fan events out; everything else runs on the tokio
//! side.

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::path::Path;
use std::path::PathBuf;
use std::sync::atomic::AtomicU32;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::net::TcpListener;
use tokio::sync::Mutex;

use tickhost::codec::Serializer;
use tickhost::event::BatchOutcome;
use tickhost::event::EventOutcome;
use tickhost::event::HostEvent;
use tickhost::event::HostEventBatch;
use tickhost::queue::MainQueue;
use tickhost::queue::MainQueueWorker;
use tickhost::queue::TickClock;
use tickhost::HostApi;
use tickwire::Message;
use tickwire::WireValue;

use crate::config::BridgeConfig;
use crate::error::RunResult;
use crate::launch::discover_scripts;
use crate::launch::LaunchSpec;
use crate::launch::ScriptHandle;
use crate::launch::ScriptLauncher;
use crate::session::Session;
use crate::session::SessionContext;
use crate::session::TokenLedger;
use crate::subscribe::Priority;

pub struct BridgeRuntime {
    config: Arc<BridgeConfig>,
    api: Arc<dyn HostApi>,
    launcher: Box<dyn ScriptLauncher>,
    queue: MainQueue,
    clock: TickClock,
    sessions: Arc<DashMap<u64, Arc<Session>>>,
    next_session: AtomicU64,
    bound_port: AtomicU32,
    tokens: Arc<TokenLedger>,
    scripts: Arc<Mutex<HashMap<String, ScriptHandle>>>,
}

impl BridgeRuntime {
    pub fn new(
        config: BridgeConfig,
        api: Arc<dyn HostApi>,
        launcher: Box<dyn ScriptLauncher>,
        queue: MainQueue,
        clock: TickClock,
    ) -> Arc<Self> {
        Arc::new(Self {
            config: Arc::new(config),
            api,
            launcher,
            queue,
            clock,
            sessions: Arc::new(DashMap::new()),
            next_session: AtomicU64::new(1),
            bound_port: AtomicU32::new(0),
            tokens: Arc::new(TokenLedger::new()),
            scripts: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    /// Bind the listener and start accepting sessions. Returns the bound
    /// port, which matters when the config asked for an ephemeral one.
    pub async fn start(self: &Arc<Self>) -> RunResult<u16> {
        let listener = TcpListener::bind(("127.0.0.1", self.config.port)).await?;
        let port = listener.local_addr()?.port();
        self.bound_port.store(port as u32, Ordering::SeqCst);
        tracing::info!(port, "bridge listening");

        let runtime = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                let (stream, addr) = match listener.accept().await {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        tracing::warn!(error = %e, "accept failed");
                        continue;
                    }
                };
                tracing::debug!(%addr, "incoming connection");
                let runtime = Arc::clone(&runtime);
                tokio::spawn(async move {
                    let id = runtime.next_session.fetch_add(1, Ordering::Relaxed);
                    let sessions = Arc::clone(&runtime.sessions);
                    let ctx = SessionContext {
                        config: Arc::clone(&runtime.config),
                        api: Arc::clone(&runtime.api),
                        queue: runtime.queue.clone(),
                        tokens: Arc::clone(&runtime.tokens),
                    };
                    let on_close = move || {
                        sessions.remove(&id);
                    };
                    match Session::accept(id, stream, ctx, on_close).await {
                        Ok(session) => {
                            runtime.sessions.insert(id, Arc::clone(&session));
                            // The reader may have already ended, making its
                            // removal a no-op; re-check after the insert.
                            if session.is_closed() {
                                runtime.sessions.remove(&id);
                            }
                        }
                        Err(e) => {
                            tracing::warn!(%addr, error = %e, "session rejected");
                        }
                    }
                });
            }
        });
        Ok(port)
    }

    pub fn port(&self) -> u16 {
        self.bound_port.load(Ordering::SeqCst) as u16
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Every command any connected script registered.
    pub fn registered_commands(&self) -> Vec<(String, Option<String>)> {
        self.sessions
            .iter()
            .flat_map(|entry| entry.commands())
            .collect()
    }

    /// Mint a single-use auth token for a session that will connect by
    /// some means other than [`launch_scripts`](Self::launch_scripts).
    pub fn issue_token(&self) -> String {
        self.tokens.issue()
    }

    /// Launch every discovered script in `dir` against this bridge, each
    /// with its own single-use token and connect deadline.
    pub async fn launch_scripts(&self, dir: &Path) -> RunResult<usize> {
        let found = discover_scripts(dir, &self.config.script_extension)?;
        for script in &found {
            let token = self.tokens.issue();
            let spec = LaunchSpec {
                script: script.clone(),
                port: self.port(),
                token: token.clone(),
            };
            let handle = self.launcher.launch(&spec).await?;
            self.scripts.lock().await.insert(token.clone(), handle);
            self.watch_connect(token, script.clone());
        }
        Ok(found.len())
    }

    /// Fail a launched script whose session never authenticates within the
    /// connect window: its token is withdrawn and its process stopped.
    fn watch_connect(&self, token: String, script: PathBuf) {
        let tokens = Arc::clone(&self.tokens);
        let handles = Arc::clone(&self.scripts);
        let api = Arc::clone(&self.api);
        let window = self.config.connect_timeout;
        let grace = self.config.kill_grace;
        tokio::spawn(async move {
            tokio::time::sleep(window).await;
            if !tokens.revoke(&token) {
                return;
            }
            tracing::warn!(script = %script.display(), "script never connected");
            api.debug_broadcast(&format!(
                "script {} did not connect within {:?}",
                script.display(),
                window
            ));
            if let Some(handle) = handles.lock().await.remove(&token) {
                handle.stop(grace).await;
            }
        });
    }

    /// Subscribed sessions for one event, ordered so higher priorities get
    /// the last word. Delivery filters are applied and recorded here.
    fn targets_for(&self, event: &str) -> Vec<tickhost::event::EventTarget> {
        let tick = self.clock.current_tick();
        let mut interested: Vec<_> = self
            .sessions
            .iter()
            .filter(|entry| entry.should_deliver(event, tick))
            .map(|entry| {
                let priority = entry.priority_of(event);
                let mut target = entry.event_target();
                target.can_cancel = priority != Some(Priority::Monitor);
                (priority, target)
            })
            .collect();
        interested.sort_by_key(|(priority, _)| *priority);
        interested.into_iter().map(|(_, target)| target).collect()
    }

    /// Deliver a cancellable event and block until handlers resolve it or
    /// the deadline passes. Must run on the tick thread.
    pub fn dispatch_event(
        &self,
        event: &mut dyn HostEvent,
        worker: &mut MainQueueWorker,
    ) -> EventOutcome {
        let targets = self.targets_for(event.name());
        tickhost::dispatch_event(event, &targets, worker, self.config.event_wait)
    }

    /// Deliver a multi-subject event under the collective batch deadline.
    /// Must run on the tick thread.
    pub fn dispatch_event_batch(
        &self,
        batch: &dyn HostEventBatch,
        worker: &mut MainQueueWorker,
    ) -> BatchOutcome {
        let targets = self.targets_for(batch.name());
        tickhost::dispatch_event_batch(batch, &targets, worker, self.config.batch_event_wait)
    }

    /// Fire-and-forget notification. Subscribed sessions get the payload,
    /// nobody gets a vote, and the caller never blocks.
    pub fn announce(
        &self,
        event: &str,
        build: impl Fn(&Serializer) -> BTreeMap<String, WireValue>,
    ) {
        for target in self.targets_for(event) {
            let payload = build(&Serializer::new(&target.registry));
            let _ = target.sender.send(Message::Event {
                event: event.to_string(),
                payload: WireValue::Map(payload),
            });
        }
    }

    /// Orderly stop: ask every script, wait for acks, then stop processes
    /// with the configured grace.
    pub async fn shutdown(&self) {
        let sessions: Vec<_> = self
            .sessions
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        for session in sessions {
            if !session.shutdown(self.config.shutdown_ack_timeout).await {
                tracing::warn!(session = session.id(), "no shutdown ack");
            }
        }
        self.sessions.clear();

        let handles = std::mem::take(&mut *self.scripts.lock().await);
        for handle in handles.into_values() {
            handle.stop(self.config.kill_grace).await;
        }
        tracing::info!("bridge stopped");
    }
}
