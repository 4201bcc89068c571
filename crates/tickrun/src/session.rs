//! # Script Session
//!
//! One authenticated connection to one script process. The reader task
//! routes inbound messages: calls, batches, and waits are queued for the
//! tick thread, while event resolutions are applied immediately on the I/O
//! task, because the tick thread may be parked waiting for exactly that
//! resolution. All outbound traffic funnels through a single writer task
//! so frames never interleave.

use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::sync::Notify;

use tickhost::event::EventTarget;
use tickhost::event::EventWaiter;
use tickhost::queue::MainQueue;
use tickhost::run_batch;
use tickhost::Dispatcher;
use tickhost::HostApi;
use tickhost::ObjectRegistry;
use tickwire::read_message;
use tickwire::write_message;
use tickwire::Message;
use tickwire::WireValue;
use tickwire::MAX_AUTH_FRAME_LEN;
use tickwire::MAX_FRAME_LEN;

use crate::config::fresh_token;
use crate::config::BridgeConfig;
use crate::error::RunError;
use crate::error::RunResult;
use crate::subscribe::Priority;
use crate::subscribe::Subscription;
use crate::subscribe::SubscriptionSet;

/// Single-use auth tokens for sessions that have not connected yet. One
/// token is minted per launched script; redeeming it consumes it, so a
/// token authenticates exactly one session.
pub struct TokenLedger {
    pending: DashMap<String, ()>,
}

impl TokenLedger {
    pub fn new() -> Self {
        Self {
            pending: DashMap::new(),
        }
    }

    /// Mint a token a future session may authenticate with.
    pub fn issue(&self) -> String {
        let token = fresh_token();
        self.pending.insert(token.clone(), ());
        token
    }

    /// Consume a presented token. False means unknown or already used.
    pub fn redeem(&self, token: &str) -> bool {
        self.pending.remove(token).is_some()
    }

    /// Withdraw a token whose script never showed up. False if it was
    /// already redeemed.
    pub fn revoke(&self, token: &str) -> bool {
        self.pending.remove(token).is_some()
    }

    pub fn outstanding(&self) -> usize {
        self.pending.len()
    }
}

impl Default for TokenLedger {
    fn default() -> Self {
        Self::new()
    }
}

/// Shared host machinery a session plugs into.
#[derive(Clone)]
pub struct SessionContext {
    pub config: Arc<BridgeConfig>,
    pub api: Arc<dyn HostApi>,
    pub queue: MainQueue,
    pub tokens: Arc<TokenLedger>,
}

pub struct Session {
    id: u64,
    outbound: mpsc::UnboundedSender<Message>,
    api: Arc<dyn HostApi>,
    registry: Arc<ObjectRegistry>,
    waiter: Arc<EventWaiter>,
    subscriptions: Arc<SubscriptionSet>,
    commands: DashMap<String, Option<String>>,
    ready: AtomicBool,
    closed: AtomicBool,
    ack: Notify,
}

impl Session {
    /// Authenticate a fresh connection and spawn its reader and writer
    /// tasks. `on_close` runs once when the connection ends, however it
    /// ends.
    pub async fn accept(
        id: u64,
        stream: TcpStream,
        ctx: SessionContext,
        on_close: impl FnOnce() + Send + 'static,
    ) -> RunResult<Arc<Session>> {
        let (mut reader, mut writer) = stream.into_split();
        authenticate(&mut reader, &ctx).await?;

        let (outbound, mut rx) = mpsc::unbounded_channel::<Message>();
        let session = Arc::new(Session {
            id,
            outbound,
            api: Arc::clone(&ctx.api),
            registry: Arc::new(ObjectRegistry::new()),
            waiter: Arc::new(EventWaiter::new()),
            subscriptions: Arc::new(SubscriptionSet::new()),
            commands: DashMap::new(),
            ready: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            ack: Notify::new(),
        });

        tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                if let Err(e) = write_message(&mut writer, &message).await {
                    tracing::warn!(session = id, error = %e, "write failed, dropping writer");
                    break;
                }
            }
        });

        let dispatcher = Arc::new(Dispatcher::new(
            Arc::clone(&session.registry),
            Arc::clone(&ctx.api),
        ));
        let reader_session = Arc::clone(&session);
        tokio::spawn(async move {
            loop {
                match read_message(&mut reader, MAX_FRAME_LEN).await {
                    Ok(Some(message)) => reader_session.route(message, &dispatcher, &ctx.queue),
                    Ok(None) => {
                        tracing::info!(session = id, "script disconnected");
                        break;
                    }
                    Err(e) => {
                        tracing::warn!(session = id, error = %e, "read failed, closing session");
                        reader_session
                            .api
                            .debug_broadcast(&format!("script session {} dropped: {}", id, e));
                        break;
                    }
                }
            }
            reader_session.closed.store(true, Ordering::SeqCst);
            reader_session.registry.clear();
            on_close();
        });

        tracing::info!(session = id, "session established");
        Ok(session)
    }

    fn route(&self, message: Message, dispatcher: &Arc<Dispatcher>, queue: &MainQueue) {
        match message {
            Message::Call(request) => {
                let dispatcher = Arc::clone(dispatcher);
                let outbound = self.outbound.clone();
                queue.submit(move || {
                    let _ = outbound.send(dispatcher.dispatch(&request));
                });
            }
            Message::CallBatch { atomic, messages } => {
                let dispatcher = Arc::clone(dispatcher);
                let outbound = self.outbound.clone();
                queue.submit(move || {
                    for response in run_batch(&dispatcher, atomic, &messages) {
                        let _ = outbound.send(response);
                    }
                });
            }
            Message::Wait { id, ticks } => {
                let outbound = self.outbound.clone();
                queue.submit_after(ticks, move || {
                    let _ = outbound.send(Message::ret(id, WireValue::Null));
                });
            }
            Message::Subscribe {
                event,
                once_per_tick,
                throttle_ms,
                priority,
            } => {
                tracing::debug!(session = self.id, %event, "subscribed");
                self.subscriptions.insert(Subscription {
                    event,
                    once_per_tick,
                    throttle_ms,
                    priority: Priority::parse(priority.as_deref()),
                });
            }
            Message::Release { handles } => self.registry.release(&handles),
            Message::RegisterCommand { name, permission } => {
                tracing::info!(session = self.id, command = %name, "registered command");
                self.api.command_registered(&name, permission.as_deref());
                self.commands.insert(name, permission);
            }
            Message::Ready => {
                if !self.ready.swap(true, Ordering::SeqCst) {
                    self.send(Message::Event {
                        event: "server_boot".to_string(),
                        payload: WireValue::Map(Default::default()),
                    });
                }
            }
            // Event resolutions bypass the queue: the tick thread may be
            // blocked waiting on them.
            Message::EventDone { id } => self.waiter.resolve_done(id),
            Message::EventCancel { id } => self.waiter.resolve_cancel(id),
            Message::EventResult {
                id,
                result,
                result_type,
            } => self.waiter.resolve_result(id, result, result_type),
            Message::ShutdownAck => self.ack.notify_one(),
            other => {
                tracing::warn!(session = self.id, message = ?other, "unexpected inbound message");
            }
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn send(&self, message: Message) -> bool {
        self.outbound.send(message).is_ok()
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    /// Whether the reader task has ended.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// View of this session as an event dispatch target.
    pub fn event_target(&self) -> EventTarget {
        EventTarget {
            sender: self.outbound.clone(),
            waiter: Arc::clone(&self.waiter),
            registry: Arc::clone(&self.registry),
            can_cancel: true,
        }
    }

    pub fn should_deliver(&self, event: &str, tick: u64) -> bool {
        self.subscriptions.should_deliver(event, tick)
    }

    pub fn priority_of(&self, event: &str) -> Option<Priority> {
        self.subscriptions.priority_of(event)
    }

    /// Commands this script registered, with their permission nodes.
    pub fn commands(&self) -> Vec<(String, Option<String>)> {
        self.commands
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    /// Ask the script to stop and wait for its acknowledgement. Returns
    /// whether the ack arrived in time.
    pub async fn shutdown(&self, timeout: Duration) -> bool {
        if !self.send(Message::Shutdown) {
            return false;
        }
        tokio::time::timeout(timeout, self.ack.notified())
            .await
            .is_ok()
    }
}

async fn authenticate(reader: &mut OwnedReadHalf, ctx: &SessionContext) -> RunResult<()> {
    let message = tokio::time::timeout(
        ctx.config.handshake_timeout,
        read_message(reader, MAX_AUTH_FRAME_LEN),
    )
    .await
    .map_err(|_| RunError::HandshakeTimeout)??;

    match message {
        Some(Message::Auth { token }) if ctx.tokens.redeem(&token) => Ok(()),
        Some(_) => Err(RunError::AuthRejected),
        None => Err(RunError::HandshakeClosed),
    }
}
