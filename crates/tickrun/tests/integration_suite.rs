//! End-to-end tests over loopback TCP: an in-process fake script drives
//! the bridge exactly the way a launched script process would.

use std::any::Any;
use std::collections::BTreeMap;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicI64;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tokio::net::TcpStream;

use tickhost::codec::Serializer;
use tickhost::event::EventOverride;
use tickhost::event::HostEvent;
use tickhost::object;
use tickhost::queue::main_queue;
use tickhost::CallError;
use tickhost::CapabilityTable;
use tickhost::FacadeMap;
use tickhost::HostApi;
use tickhost::HostObject;
use tickhost::HostValue;
use tickhost::ObjectRef;
use tickhost::ParamKind;
use tickrun::BridgeConfig;
use tickrun::BridgeRuntime;
use tickrun::LaunchSpec;
use tickrun::NullLauncher;
use tickrun::ScriptHandle;
use tickrun::ScriptLauncher;
use tickrun::TickThread;
use tickwire::read_message;
use tickwire::write_message;
use tickwire::CallRequest;
use tickwire::Message;
use tickwire::WireValue;
use tickwire::MAX_FRAME_LEN;

struct Counter {
    value: AtomicI64,
    gone: AtomicBool,
    caps: CapabilityTable,
}

impl Counter {
    fn new() -> Self {
        let mut caps = CapabilityTable::new();
        caps.method("add", [ParamKind::Int], |target, args| {
            let counter = object::downcast::<Counter>(target)?;
            let n = args[0].as_i64().unwrap_or(0);
            Ok(HostValue::Int(
                counter.value.fetch_add(n, Ordering::SeqCst) + n,
            ))
        });
        caps.method("fail", Vec::<ParamKind>::new(), |_, _| {
            Err(CallError::app("boom"))
        });
        caps.method("child", Vec::<ParamKind>::new(), |_, _| {
            Ok(HostValue::object(Counter::new()))
        });
        Self {
            value: AtomicI64::new(0),
            gone: AtomicBool::new(false),
            caps,
        }
    }
}

impl HostObject for Counter {
    fn type_name(&self) -> &str {
        "Counter"
    }

    fn capabilities(&self) -> &CapabilityTable {
        &self.caps
    }

    fn is_gone(&self) -> bool {
        self.gone.load(Ordering::SeqCst)
    }

    fn get_attr(&self, name: &str) -> Option<HostValue> {
        (name == "value").then(|| HostValue::Int(self.value.load(Ordering::SeqCst)))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

struct TestHost {
    facades: FacadeMap,
    commands: std::sync::Mutex<Vec<(String, Option<String>)>>,
    debug: std::sync::Mutex<Vec<String>>,
}

impl TestHost {
    fn new() -> Arc<Self> {
        let facades = FacadeMap::new();
        facades.insert("counter", Arc::new(Counter::new()) as ObjectRef);
        Arc::new(Self {
            facades,
            commands: std::sync::Mutex::new(Vec::new()),
            debug: std::sync::Mutex::new(Vec::new()),
        })
    }
}

impl HostApi for TestHost {
    fn facade(&self, name: &str) -> Option<ObjectRef> {
        self.facades.get(name)
    }

    fn resolve_ref(&self, _ref_type: &str, _id: &str) -> Option<ObjectRef> {
        None
    }

    fn construct(
        &self,
        _type_name: &str,
        _fields: &BTreeMap<String, HostValue>,
    ) -> Option<HostValue> {
        None
    }

    fn command_registered(&self, name: &str, permission: Option<&str>) {
        self.commands
            .lock()
            .unwrap()
            .push((name.to_string(), permission.map(str::to_string)));
    }

    fn debug_broadcast(&self, message: &str) {
        self.debug.lock().unwrap().push(message.to_string());
    }
}

/// Launcher that starts nothing but remembers each script's token, the way
/// a connecting script process would learn it from the environment.
struct RecordingLauncher {
    tokens: Arc<std::sync::Mutex<Vec<String>>>,
}

#[async_trait]
impl ScriptLauncher for RecordingLauncher {
    async fn launch(&self, spec: &LaunchSpec) -> tickrun::RunResult<ScriptHandle> {
        self.tokens.lock().unwrap().push(spec.token.clone());
        NullLauncher.launch(spec).await
    }
}

struct ChatEvent {
    message: String,
    cancelled: bool,
}

impl HostEvent for ChatEvent {
    fn name(&self) -> &str {
        "player_chat"
    }

    fn fields(&self, _serializer: &Serializer) -> BTreeMap<String, WireValue> {
        BTreeMap::from([("message".to_string(), WireValue::str(&self.message))])
    }

    fn set_cancelled(&mut self) {
        self.cancelled = true;
    }

    fn apply_override(&mut self, value: &EventOverride) {
        if let EventOverride::Chat(text) = value {
            self.message = text.clone();
        }
    }
}

struct Bridge {
    runtime: Arc<BridgeRuntime>,
    host: Arc<TestHost>,
    tick: Option<TickThread>,
    port: u16,
}

impl Drop for Bridge {
    fn drop(&mut self) {
        if let Some(tick) = self.tick.take() {
            tick.stop();
        }
    }
}

/// Start a bridge with the given config and launcher whose tick thread
/// runs `on_tick` after each drain.
async fn start_bridge_custom<F>(
    config: BridgeConfig,
    launcher: Box<dyn ScriptLauncher>,
    on_tick_of: impl FnOnce(Arc<BridgeRuntime>) -> F,
) -> Result<Bridge>
where
    F: FnMut(&mut tickhost::queue::MainQueueWorker) + Send + 'static,
{
    let (queue, worker) = main_queue();
    let clock = worker.clock();
    let host = TestHost::new();
    let runtime = BridgeRuntime::new(
        config,
        Arc::clone(&host) as Arc<dyn HostApi>,
        launcher,
        queue,
        clock,
    );
    let port = runtime.start().await?;
    let on_tick = on_tick_of(Arc::clone(&runtime));
    let tick = TickThread::spawn(worker, Duration::from_millis(5), on_tick);
    Ok(Bridge {
        runtime,
        host,
        tick: Some(tick),
        port,
    })
}

async fn start_bridge_with<F>(on_tick_of: impl FnOnce(Arc<BridgeRuntime>) -> F) -> Result<Bridge>
where
    F: FnMut(&mut tickhost::queue::MainQueueWorker) + Send + 'static,
{
    let config = BridgeConfig {
        handshake_timeout: Duration::from_secs(2),
        shutdown_ack_timeout: Duration::from_secs(2),
        ..BridgeConfig::default()
    };
    start_bridge_custom(config, Box::new(NullLauncher), on_tick_of).await
}

async fn start_bridge() -> Result<Bridge> {
    start_bridge_with(|_| |_: &mut tickhost::queue::MainQueueWorker| {}).await
}

struct Client {
    stream: TcpStream,
}

impl Client {
    async fn connect(bridge: &Bridge) -> Result<Client> {
        let token = bridge.runtime.issue_token();
        Self::connect_with_token(bridge, &token).await
    }

    async fn connect_with_token(bridge: &Bridge, token: &str) -> Result<Client> {
        let stream = TcpStream::connect(("127.0.0.1", bridge.port)).await?;
        let mut client = Client { stream };
        client
            .send(&Message::Auth {
                token: token.to_string(),
            })
            .await?;
        Ok(client)
    }

    async fn send(&mut self, message: &Message) -> Result<()> {
        write_message(&mut self.stream, message).await?;
        Ok(())
    }

    async fn recv(&mut self) -> Result<Option<Message>> {
        let message = tokio::time::timeout(
            Duration::from_secs(3),
            read_message(&mut self.stream, MAX_FRAME_LEN),
        )
        .await??;
        Ok(message)
    }

    async fn recv_some(&mut self) -> Result<Message> {
        self.recv()
            .await?
            .ok_or_else(|| anyhow::anyhow!("connection closed"))
    }

    async fn call(&mut self, request: CallRequest) -> Result<Message> {
        self.send(&Message::Call(request)).await?;
        self.recv_some().await
    }
}

fn facade_call(id: i64, target: &str, method: &str, args: Vec<WireValue>) -> CallRequest {
    CallRequest {
        id,
        target: Some(target.to_string()),
        method: method.to_string(),
        args_list: args,
        ..CallRequest::default()
    }
}

fn handle_call(id: i64, handle: u64, method: &str, args: Vec<WireValue>) -> CallRequest {
    CallRequest {
        id,
        handle: Some(handle),
        method: method.to_string(),
        args_list: args,
        ..CallRequest::default()
    }
}

#[tokio::test]
async fn wrong_token_is_disconnected_without_a_reply() -> Result<()> {
    let bridge = start_bridge().await?;
    let mut client = Client::connect_with_token(&bridge, "not-the-token").await?;
    client
        .send(&Message::Call(facade_call(1, "counter", "add", vec![])))
        .await
        .ok();
    assert!(client.recv().await?.is_none());
    Ok(())
}

#[tokio::test]
async fn auth_tokens_are_single_use() -> Result<()> {
    let bridge = start_bridge().await?;
    let token = bridge.runtime.issue_token();

    let mut first = Client::connect_with_token(&bridge, &token).await?;
    let response = first
        .call(facade_call(1, "counter", "add", vec![WireValue::Int(1)]))
        .await?;
    assert!(matches!(response, Message::Return { .. }));

    // The same token cannot authenticate a second session.
    let mut second = Client::connect_with_token(&bridge, &token).await?;
    second
        .send(&Message::Call(facade_call(2, "counter", "add", vec![])))
        .await
        .ok();
    assert!(second.recv().await?.is_none());
    Ok(())
}

#[tokio::test]
async fn unconnected_scripts_lose_their_token() -> Result<()> {
    let recorded = Arc::new(std::sync::Mutex::new(Vec::new()));
    let config = BridgeConfig {
        connect_timeout: Duration::from_millis(100),
        handshake_timeout: Duration::from_secs(2),
        ..BridgeConfig::default()
    };
    let bridge = start_bridge_custom(
        config,
        Box::new(RecordingLauncher {
            tokens: Arc::clone(&recorded),
        }),
        |_| |_: &mut tickhost::queue::MainQueueWorker| {},
    )
    .await?;

    let dir = std::env::temp_dir().join(format!("tickbridge-launch-{}", tickrun::fresh_token()));
    std::fs::create_dir_all(&dir)?;
    std::fs::write(dir.join("bot.py"), "")?;
    assert_eq!(bridge.runtime.launch_scripts(&dir).await?, 1);
    let token = recorded.lock().unwrap()[0].clone();

    tokio::time::sleep(Duration::from_millis(400)).await;

    let mut client = Client::connect_with_token(&bridge, &token).await?;
    client
        .send(&Message::Call(facade_call(1, "counter", "add", vec![])))
        .await
        .ok();
    assert!(client.recv().await?.is_none());
    assert!(bridge
        .host
        .debug
        .lock()
        .unwrap()
        .iter()
        .any(|m| m.contains("bot.py")));

    std::fs::remove_dir_all(&dir)?;
    Ok(())
}

#[tokio::test]
async fn instant_disconnects_leave_no_session_behind() -> Result<()> {
    let bridge = start_bridge().await?;
    let token = bridge.runtime.issue_token();
    drop(Client::connect_with_token(&bridge, &token).await?);

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(bridge.runtime.session_count(), 0);
    Ok(())
}

#[tokio::test]
async fn calls_round_trip_through_the_tick_thread() -> Result<()> {
    let bridge = start_bridge().await?;
    let mut client = Client::connect(&bridge).await?;

    let response = client
        .call(facade_call(1, "counter", "add", vec![WireValue::Int(5)]))
        .await?;
    let Message::Return { id, result } = response else {
        panic!("expected return, got {:?}", response);
    };
    assert_eq!(id, 1);
    assert_eq!(result, WireValue::Int(5));

    let mut request = facade_call(2, "counter", "get_attr", vec![]);
    request.field = Some("value".into());
    let Message::Return { result, .. } = client.call(request).await? else {
        panic!("expected return");
    };
    assert_eq!(result, WireValue::Int(5));
    Ok(())
}

#[tokio::test]
async fn released_handles_report_entity_gone() -> Result<()> {
    let bridge = start_bridge().await?;
    let mut client = Client::connect(&bridge).await?;

    let Message::Return { result, .. } = client
        .call(facade_call(1, "counter", "child", vec![]))
        .await?
    else {
        panic!("expected return");
    };
    let WireValue::Handle { id: handle, .. } = result else {
        panic!("expected handle, got {:?}", result);
    };

    let Message::Return { result, .. } = client
        .call(handle_call(2, handle, "add", vec![WireValue::Int(3)]))
        .await?
    else {
        panic!("expected return");
    };
    assert_eq!(result, WireValue::Int(3));

    client
        .send(&Message::Release {
            handles: vec![handle],
        })
        .await?;
    let response = client
        .call(handle_call(3, handle, "add", vec![WireValue::Int(1)]))
        .await?;
    let Message::Error { code, .. } = response else {
        panic!("expected error, got {:?}", response);
    };
    assert_eq!(code.as_deref(), Some("ENTITY_GONE"));

    // Closing a released handle is still fine.
    let response = client.call(handle_call(4, handle, "close", vec![])).await?;
    assert!(matches!(
        response,
        Message::Return {
            result: WireValue::Null,
            ..
        }
    ));
    Ok(())
}

#[tokio::test]
async fn atomic_batches_abort_over_the_wire() -> Result<()> {
    let bridge = start_bridge().await?;
    let mut client = Client::connect(&bridge).await?;

    client
        .send(&Message::CallBatch {
            atomic: true,
            messages: vec![
                facade_call(1, "counter", "add", vec![WireValue::Int(1)]),
                facade_call(2, "counter", "fail", vec![]),
                facade_call(3, "counter", "add", vec![WireValue::Int(1)]),
            ],
        })
        .await?;

    let mut codes = BTreeMap::new();
    for _ in 0..3 {
        let Message::Error { id, code, .. } = client.recv_some().await? else {
            panic!("expected error");
        };
        codes.insert(id, code);
    }
    assert_eq!(codes[&1].as_deref(), Some("ATOMIC_ABORT"));
    assert_eq!(codes[&2], None);
    assert_eq!(codes[&3].as_deref(), Some("ATOMIC_ABORT"));
    Ok(())
}

#[tokio::test]
async fn wait_returns_null_after_its_ticks() -> Result<()> {
    let bridge = start_bridge().await?;
    let mut client = Client::connect(&bridge).await?;

    client.send(&Message::Wait { id: 9, ticks: 2 }).await?;
    let response = client.recv_some().await?;
    assert!(matches!(
        response,
        Message::Return {
            id: 9,
            result: WireValue::Null
        }
    ));
    Ok(())
}

#[tokio::test]
async fn ready_is_answered_with_server_boot() -> Result<()> {
    let bridge = start_bridge().await?;
    let mut client = Client::connect(&bridge).await?;

    client.send(&Message::Ready).await?;
    let Message::Event { event, .. } = client.recv_some().await? else {
        panic!("expected event");
    };
    assert_eq!(event, "server_boot");
    Ok(())
}

#[tokio::test]
async fn announcements_reach_subscribed_sessions() -> Result<()> {
    let bridge = start_bridge().await?;
    let mut client = Client::connect(&bridge).await?;

    client
        .send(&Message::Subscribe {
            event: "scoreboard".into(),
            once_per_tick: false,
            throttle_ms: 0,
            priority: None,
        })
        .await?;
    // Routing is sequential per session, so a completed call means the
    // subscription is in place.
    client
        .call(facade_call(1, "counter", "add", vec![WireValue::Int(0)]))
        .await?;

    bridge.runtime.announce("scoreboard", |_| {
        BTreeMap::from([("points".to_string(), WireValue::Int(10))])
    });

    let Message::Event { event, payload } = client.recv_some().await? else {
        panic!("expected event");
    };
    assert_eq!(event, "scoreboard");
    let WireValue::Map(map) = payload else {
        panic!("expected map payload");
    };
    assert_eq!(map["points"], WireValue::Int(10));
    Ok(())
}

#[tokio::test]
async fn registered_commands_reach_the_host() -> Result<()> {
    let bridge = start_bridge().await?;
    let mut client = Client::connect(&bridge).await?;

    client
        .send(&Message::RegisterCommand {
            name: "home".into(),
            permission: Some("scripts.home".into()),
        })
        .await?;
    client
        .call(facade_call(1, "counter", "add", vec![WireValue::Int(0)]))
        .await?;

    assert_eq!(
        *bridge.host.commands.lock().unwrap(),
        vec![("home".to_string(), Some("scripts.home".to_string()))]
    );
    assert_eq!(
        bridge.runtime.registered_commands(),
        vec![("home".to_string(), Some("scripts.home".to_string()))]
    );
    Ok(())
}

#[tokio::test]
async fn chat_events_can_be_cancelled_over_the_wire() -> Result<()> {
    let trigger = Arc::new(AtomicBool::new(false));
    let (outcome_tx, outcome_rx) = std::sync::mpsc::channel();

    let tick_trigger = Arc::clone(&trigger);
    let bridge = start_bridge_with(move |runtime| {
        move |worker: &mut tickhost::queue::MainQueueWorker| {
            if tick_trigger.swap(false, Ordering::SeqCst) {
                let mut event = ChatEvent {
                    message: "hello".into(),
                    cancelled: false,
                };
                let outcome = runtime.dispatch_event(&mut event, worker);
                let _ = outcome_tx.send((outcome, event.cancelled));
            }
        }
    })
    .await?;

    let mut client = Client::connect(&bridge).await?;
    client
        .send(&Message::Subscribe {
            event: "player_chat".into(),
            once_per_tick: false,
            throttle_ms: 0,
            priority: None,
        })
        .await?;
    client
        .call(facade_call(1, "counter", "add", vec![WireValue::Int(0)]))
        .await?;

    trigger.store(true, Ordering::SeqCst);
    let Message::Event { event, payload } = client.recv_some().await? else {
        panic!("expected event");
    };
    assert_eq!(event, "player_chat");
    let WireValue::Map(map) = payload else {
        panic!("expected map payload");
    };
    let event_id = map["id"].as_i64().unwrap();
    client.send(&Message::EventCancel { id: event_id }).await?;

    let (outcome, cancelled) = tokio::task::spawn_blocking(move || {
        outcome_rx.recv_timeout(Duration::from_secs(3))
    })
    .await??;
    assert!(outcome.cancelled);
    assert!(!outcome.timed_out);
    assert!(cancelled);
    Ok(())
}

#[tokio::test]
async fn shutdown_waits_for_the_ack() -> Result<()> {
    let bridge = start_bridge().await?;
    let mut client = Client::connect(&bridge).await?;
    client
        .call(facade_call(1, "counter", "add", vec![WireValue::Int(0)]))
        .await?;
    assert_eq!(bridge.runtime.session_count(), 1);

    let responder = tokio::spawn(async move {
        loop {
            match client.recv().await {
                Ok(Some(Message::Shutdown)) => {
                    let _ = client.send(&Message::ShutdownAck).await;
                }
                Ok(Some(_)) => continue,
                _ => break,
            }
        }
    });

    bridge.runtime.shutdown().await;
    assert_eq!(bridge.runtime.session_count(), 0);
    responder.abort();
    Ok(())
}
