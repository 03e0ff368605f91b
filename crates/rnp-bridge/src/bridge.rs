//! Call/response/callback semantics on top of a [`ChannelEnd`]
//!
//! Both processes run an [`RpcBridge`]. Either side can:
//! - call methods on objects registered by the peer ([`RpcBridge::call`])
//! - expose its own objects ([`RpcBridge::register_object`])
//!
//! Callbacks passed as arguments are swapped for `{"callbackRef": id}` markers
//! on the way out and turned back into invocable stubs on the way in.
//! Invoking a stub posts a `callback` message; the originating bridge finds
//! the live function by id and runs it.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, watch, Mutex, RwLock};

use crate::callback::{Callback, CallbackRegistry, WeakCallback};
use crate::channel::ChannelEnd;
use crate::message::{callback_marker, parse_callback_marker, BridgeMessage};
use crate::object::{Arg, Args, RemoteObject};
use rnp_core::prelude::*;

/// Continuation of an outstanding call
type PendingCall = oneshot::Sender<Result<Value>>;

/// Handle to a bridge. Cheap to clone; all clones share one bridge.
#[derive(Clone)]
pub struct RpcBridge {
    inner: Arc<BridgeInner>,
}

struct BridgeInner {
    outbound: mpsc::UnboundedSender<BridgeMessage>,
    /// Per-bridge counters, both starting at 1
    next_call_id: AtomicU64,
    next_callback_id: AtomicU64,
    pending: Mutex<HashMap<u64, PendingCall>>,
    /// Our callbacks that the peer may invoke
    callbacks: Mutex<CallbackRegistry>,
    /// Stubs for the peer's callbacks, one per remote id while anyone holds it
    stubs: Mutex<HashMap<u64, WeakCallback>>,
    objects: RwLock<HashMap<String, Arc<dyn RemoteObject>>>,
    closed: AtomicBool,
    closed_tx: watch::Sender<bool>,
}

impl std::fmt::Debug for RpcBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcBridge")
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

impl RpcBridge {
    /// Start a bridge over `channel`.
    ///
    /// Spawns the receive loop, which runs until the peer closes the channel
    /// or [`RpcBridge::close`] is called. Must be called inside a tokio runtime.
    pub fn new(channel: ChannelEnd) -> Self {
        Self::with_objects(channel, Vec::new())
    }

    /// Like [`RpcBridge::new`], with `objects` registered before the first
    /// message is read, so early calls never miss them.
    pub fn with_objects(
        channel: ChannelEnd,
        objects: Vec<(String, Arc<dyn RemoteObject>)>,
    ) -> Self {
        let (outbound, inbound) = channel.into_parts();
        let (closed_tx, _) = watch::channel(false);

        let bridge = Self {
            inner: Arc::new(BridgeInner {
                outbound,
                next_call_id: AtomicU64::new(1),
                next_callback_id: AtomicU64::new(1),
                pending: Mutex::new(HashMap::new()),
                callbacks: Mutex::new(CallbackRegistry::default()),
                stubs: Mutex::new(HashMap::new()),
                objects: RwLock::new(objects.into_iter().collect()),
                closed: AtomicBool::new(false),
                closed_tx,
            }),
        };

        tokio::spawn(bridge.clone().receive_loop(inbound));
        bridge
    }

    // ─────────────────────────────────────────────────────────────
    // Calling the peer
    // ─────────────────────────────────────────────────────────────

    /// Call `object.method(args)` on the peer and wait for its result.
    ///
    /// Resolves with the peer's `result` (null when absent), or fails with
    /// [`Error::CallRejected`] carrying the peer's error payload unchanged, or
    /// [`Error::ChannelClosed`] if the channel goes away first.
    pub async fn call(&self, object: &str, method: &str, args: Vec<Arg>) -> Result<Value> {
        if self.is_closed() {
            return Err(Error::ChannelClosed);
        }

        let call_id = self.inner.next_call_id.fetch_add(1, Ordering::SeqCst);

        let mut wire_args = Vec::with_capacity(args.len());
        for arg in args {
            match arg {
                Arg::Value(value) => wire_args.push(value),
                Arg::Callback(callback) => {
                    let id = self.register_callback(&callback).await;
                    wire_args.push(callback_marker(id));
                }
            }
        }

        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.inner.pending.lock().await;
            // Teardown drains under this lock after setting `closed`, so a call
            // registered past that point must not wait for a drain.
            if self.is_closed() {
                return Err(Error::ChannelClosed);
            }
            pending.insert(call_id, tx);
        }

        debug!("Calling #{} {}.{}", call_id, object, method);

        let sent = self.inner.outbound.send(BridgeMessage::Call {
            call_id,
            object: object.to_string(),
            method: method.to_string(),
            args: wire_args,
        });
        if sent.is_err() {
            self.inner.pending.lock().await.remove(&call_id);
            return Err(Error::ChannelClosed);
        }

        match rx.await {
            Ok(outcome) => outcome,
            Err(_) => Err(Error::ChannelClosed),
        }
    }

    /// [`RpcBridge::call`] with the result deserialized into `T`
    pub async fn call_as<T: DeserializeOwned>(
        &self,
        object: &str,
        method: &str,
        args: Vec<Arg>,
    ) -> Result<T> {
        let value = self.call(object, method, args).await?;
        Ok(serde_json::from_value(value)?)
    }

    /// Id under which `callback` is known to the peer, allocating on first use
    async fn register_callback(&self, callback: &Callback) -> u64 {
        let mut callbacks = self.inner.callbacks.lock().await;
        callbacks.register(callback, || {
            self.inner.next_callback_id.fetch_add(1, Ordering::SeqCst)
        })
    }

    /// Stop routing peer invocations to `callback`.
    ///
    /// Returns the id it was registered under. Passing the same callback in a
    /// later call registers it again under a new id.
    pub async fn release_callback(&self, callback: &Callback) -> Option<u64> {
        self.inner.callbacks.lock().await.release(callback)
    }

    /// Number of callbacks currently registered with the peer
    pub async fn callback_count(&self) -> usize {
        self.inner.callbacks.lock().await.len()
    }

    /// Number of calls waiting for a result
    pub async fn pending_count(&self) -> usize {
        self.inner.pending.lock().await.len()
    }

    // ─────────────────────────────────────────────────────────────
    // Serving the peer
    // ─────────────────────────────────────────────────────────────

    /// Expose `object` to the peer under `name`, replacing any previous one
    pub async fn register_object(&self, name: impl Into<String>, object: Arc<dyn RemoteObject>) {
        let name = name.into();
        debug!("Registering remote object '{}'", name);
        self.inner.objects.write().await.insert(name, object);
    }

    // ─────────────────────────────────────────────────────────────
    // Lifecycle
    // ─────────────────────────────────────────────────────────────

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Tear the bridge down: reject every pending call with
    /// [`Error::ChannelClosed`] and stop the receive loop. Idempotent.
    pub async fn close(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        let drained: Vec<(u64, PendingCall)> = {
            let mut pending = self.inner.pending.lock().await;
            pending.drain().collect()
        };

        if !drained.is_empty() {
            info!("Rejecting {} pending call(s): channel closed", drained.len());
        }
        for (call_id, tx) in drained {
            trace!("Rejecting call #{}", call_id);
            let _ = tx.send(Err(Error::ChannelClosed));
        }

        self.inner.closed_tx.send_replace(true);
    }

    /// Wait until the bridge has been closed (by the peer or locally)
    pub async fn closed(&self) {
        let mut rx = self.inner.closed_tx.subscribe();
        // An Err means the sender is gone, which only happens with the bridge
        let _ = rx.wait_for(|closed| *closed).await;
    }

    async fn receive_loop(self, mut inbound: mpsc::UnboundedReceiver<BridgeMessage>) {
        let mut closed_rx = self.inner.closed_tx.subscribe();

        loop {
            tokio::select! {
                message = inbound.recv() => {
                    match message {
                        Some(message) => self.handle_message(message).await,
                        None => {
                            info!("Bridge channel closed by peer");
                            break;
                        }
                    }
                }
                // The watch guard must not outlive this branch's future
                _ = async { let _ = closed_rx.wait_for(|closed| *closed).await; } => {
                    debug!("Bridge closed locally");
                    break;
                }
            }
        }

        self.close().await;
    }

    async fn handle_message(&self, message: BridgeMessage) {
        match message {
            BridgeMessage::Call {
                call_id,
                object,
                method,
                args,
            } => self.handle_call(call_id, object, method, args).await,
            BridgeMessage::CallResult {
                call_id,
                result,
                error,
            } => self.handle_call_result(call_id, result, error).await,
            BridgeMessage::Callback { callback_id, args } => {
                self.handle_callback(callback_id, args).await
            }
        }
    }

    async fn handle_call_result(&self, call_id: u64, result: Option<Value>, error: Option<Value>) {
        let Some(tx) = self.inner.pending.lock().await.remove(&call_id) else {
            // Already settled, never issued, or issued by a superseded caller
            debug!("{}", Error::UnknownCorrelation { id: call_id });
            return;
        };

        let outcome = match error {
            Some(payload) => Err(Error::CallRejected { payload }),
            None => Ok(result.unwrap_or(Value::Null)),
        };
        if tx.send(outcome).is_err() {
            debug!("Caller of #{} stopped waiting", call_id);
        }
    }

    async fn handle_callback(&self, callback_id: u64, args: Vec<Value>) {
        let callback = self.inner.callbacks.lock().await.get(callback_id);
        match callback {
            Some(callback) => callback.invoke(args),
            None => debug!("{}", Error::UnknownCorrelation { id: callback_id }),
        }
    }

    async fn handle_call(&self, call_id: u64, object: String, method: String, args: Vec<Value>) {
        let target = self.inner.objects.read().await.get(&object).cloned();
        let Some(target) = target else {
            warn!("Call #{} for unknown object '{}'", call_id, object);
            self.reply(
                call_id,
                Err(Error::protocol(format!("Unknown object '{}'", object))),
            );
            return;
        };

        let args = self.rehydrate(args).await;

        // dispatch runs here, in message order; only its future is detached
        let dispatched = catch_unwind(AssertUnwindSafe(|| target.dispatch(&method, args)));
        let future = match dispatched {
            Ok(future) => future,
            Err(_) => {
                error!("Handler for {}.{} panicked", object, method);
                self.reply(
                    call_id,
                    Err(Error::protocol(format!(
                        "Internal error in {}.{}",
                        object, method
                    ))),
                );
                return;
            }
        };

        let bridge = self.clone();
        tokio::spawn(async move {
            let outcome = match tokio::spawn(future).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    error!("Handler for {}.{} failed: {}", object, method, e);
                    Err(Error::protocol(format!(
                        "Internal error in {}.{}",
                        object, method
                    )))
                }
            };
            if let Err(e) = &outcome {
                debug!("Call #{} {}.{} rejected: {}", call_id, object, method, e);
            }
            bridge.reply(call_id, outcome);
        });
    }

    fn reply(&self, call_id: u64, outcome: Result<Value>) {
        if self
            .inner
            .outbound
            .send(BridgeMessage::call_result(call_id, outcome))
            .is_err()
        {
            debug!("Dropping result of #{}: channel closed", call_id);
        }
    }

    /// Replace callback markers with stubs that post `callback` messages
    async fn rehydrate(&self, args: Vec<Value>) -> Args {
        let mut rehydrated = Vec::with_capacity(args.len());
        for value in args {
            match parse_callback_marker(&value) {
                Some(callback_id) => rehydrated.push(Arg::Callback(self.stub(callback_id).await)),
                None => rehydrated.push(Arg::Value(value)),
            }
        }
        Args::new(rehydrated)
    }

    /// Stub for the peer's callback `callback_id`.
    ///
    /// While any holder keeps the stub alive, the same id yields the same
    /// handle, so the peer passing one function twice is seen as one
    /// function. Entries whose stubs were all dropped are evicted.
    async fn stub(&self, callback_id: u64) -> Callback {
        let mut stubs = self.inner.stubs.lock().await;
        stubs.retain(|_, stub| stub.is_alive());

        if let Some(stub) = stubs.get(&callback_id).and_then(WeakCallback::upgrade) {
            return stub;
        }

        let outbound = self.inner.outbound.clone();
        let stub = Callback::new(move |args| {
            if outbound
                .send(BridgeMessage::Callback { callback_id, args })
                .is_err()
            {
                debug!("Dropping callback #{}: channel closed", callback_id);
            }
        });
        stubs.insert(callback_id, stub.downgrade());
        stub
    }

    /// Number of peer callbacks with a live stub on this side
    pub async fn stub_count(&self) -> usize {
        let stubs = self.inner.stubs.lock().await;
        stubs.values().filter(|stub| stub.is_alive()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::in_memory_pair;
    use crate::object::{unknown_method, CallFuture};
    use futures_util::FutureExt;
    use serde_json::json;
    use std::time::Duration;

    /// Object used by the tests: echoes, fails, panics, and calls back
    struct TestObject;

    impl RemoteObject for TestObject {
        fn dispatch(&self, method: &str, args: Args) -> CallFuture {
            match method {
                "echo" => {
                    let value = args.value::<Value>(0, "value");
                    async move { value }.boxed()
                }
                "fail" => async {
                    Err::<Value, _>(Error::CallRejected {
                        payload: json!({"code": 42, "message": "no"}),
                    })
                }
                .boxed(),
                "panicSync" => panic!("sync boom"),
                "panicAsync" => async { explode() }.boxed(),
                "notify" => {
                    let callback = args.callback(0, "listener");
                    async move {
                        let callback = callback?;
                        callback.invoke(vec![json!("first")]);
                        callback.invoke(vec![json!("second"), json!(2)]);
                        Ok(Value::Null)
                    }
                    .boxed()
                }
                "sameStub" => {
                    let first = args.callback(0, "a");
                    let second = args.callback(1, "b");
                    async move { Ok(json!(first?.same_as(&second?))) }.boxed()
                }
                other => {
                    let err = unknown_method("test", other);
                    async move { Err(err) }.boxed()
                }
            }
        }
    }

    fn explode() -> Result<Value> {
        panic!("async boom")
    }

    async fn connected() -> (RpcBridge, RpcBridge) {
        let (ui_end, controller_end) = in_memory_pair();
        let ui = RpcBridge::new(ui_end);
        let controller = RpcBridge::new(controller_end);
        controller
            .register_object("test", Arc::new(TestObject))
            .await;
        (ui, controller)
    }

    async fn next_call(raw: &mut ChannelEnd) -> (u64, Vec<Value>) {
        match tokio::time::timeout(Duration::from_secs(1), raw.recv()).await {
            Ok(Some(BridgeMessage::Call { call_id, args, .. })) => (call_id, args),
            other => panic!("expected a call, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_call_resolves_with_result() {
        let (ui, _controller) = connected().await;
        let result = ui
            .call("test", "echo", vec![json!({"a": [1, 2]}).into()])
            .await
            .unwrap();
        assert_eq!(result, json!({"a": [1, 2]}));
        assert_eq!(ui.pending_count().await, 0);
    }

    #[tokio::test]
    async fn test_call_as_deserializes() {
        let (ui, _controller) = connected().await;
        let n: u32 = ui.call_as("test", "echo", vec![json!(7).into()]).await.unwrap();
        assert_eq!(n, 7);
    }

    #[tokio::test]
    async fn test_error_payload_is_passed_verbatim() {
        let (ui, _controller) = connected().await;
        let err = ui.call("test", "fail", vec![]).await.unwrap_err();
        match err {
            Error::CallRejected { payload } => {
                assert_eq!(payload, json!({"code": 42, "message": "no"}))
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unknown_object_and_method_are_rejected() {
        let (ui, _controller) = connected().await;

        let err = ui.call("nope", "echo", vec![]).await.unwrap_err();
        assert!(matches!(err, Error::CallRejected { .. }));

        let err = ui.call("test", "nope", vec![]).await.unwrap_err();
        match err {
            Error::CallRejected { payload } => {
                assert_eq!(payload["kind"], "protocol");
                assert!(payload["message"].as_str().unwrap().contains("test.nope"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_handler_panics_are_contained() {
        let (ui, _controller) = connected().await;

        assert!(ui.call("test", "panicSync", vec![]).await.is_err());
        assert!(ui.call("test", "panicAsync", vec![]).await.is_err());

        // The controller keeps serving
        let result = ui.call("test", "echo", vec![json!(1).into()]).await.unwrap();
        assert_eq!(result, json!(1));
    }

    #[tokio::test]
    async fn test_callbacks_are_invoked_across_the_bridge() {
        let (ui, _controller) = connected().await;
        let (tx, mut rx) = mpsc::unbounded_channel();
        let listener = Callback::new(move |args| {
            let _ = tx.send(args);
        });

        ui.call("test", "notify", vec![listener.into()]).await.unwrap();

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert_eq!(first, vec![json!("first")]);
        assert_eq!(second, vec![json!("second"), json!(2)]);
    }

    #[tokio::test]
    async fn test_same_callback_reuses_id() {
        let (ui_end, mut raw) = in_memory_pair();
        let ui = RpcBridge::new(ui_end);

        let a = Callback::new(|_| {});
        let b = Callback::new(|_| {});

        let ui_clone = ui.clone();
        let (a1, a2, b1) = (a.clone(), a.clone(), b.clone());
        tokio::spawn(async move {
            let _ = ui_clone
                .call("obj", "m", vec![a1.into(), a2.into(), b1.into()])
                .await;
        });
        let (_, args) = next_call(&mut raw).await;
        assert_eq!(args[0], json!({"callbackRef": 1}));
        assert_eq!(args[1], json!({"callbackRef": 1}));
        assert_eq!(args[2], json!({"callbackRef": 2}));

        // Across calls too
        let ui_clone = ui.clone();
        tokio::spawn(async move {
            let _ = ui_clone.call("obj", "m", vec![a.into()]).await;
        });
        let (_, args) = next_call(&mut raw).await;
        assert_eq!(args[0], json!({"callbackRef": 1}));
        assert_eq!(ui.callback_count().await, 2);
    }

    #[tokio::test]
    async fn test_released_callback_is_no_longer_invoked() {
        let (ui_end, mut raw) = in_memory_pair();
        let ui = RpcBridge::new(ui_end);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let listener = Callback::new(move |_| {
            let _ = tx.send(());
        });

        let ui_clone = ui.clone();
        let listener_clone = listener.clone();
        tokio::spawn(async move {
            let _ = ui_clone.call("obj", "m", vec![listener_clone.into()]).await;
        });
        let (call_id, _) = next_call(&mut raw).await;

        raw.send(BridgeMessage::Callback {
            callback_id: 1,
            args: vec![],
        })
        .unwrap();
        assert!(rx.recv().await.is_some());

        assert_eq!(ui.release_callback(&listener).await, Some(1));
        raw.send(BridgeMessage::Callback {
            callback_id: 1,
            args: vec![],
        })
        .unwrap();
        // Settle the call so we know the callback message was processed first
        raw.send(BridgeMessage::call_result(call_id, Ok(Value::Null)))
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_repeated_markers_rehydrate_to_same_stub() {
        let (ui, _controller) = connected().await;
        let listener = Callback::new(|_| {});

        let same = ui
            .call(
                "test",
                "sameStub",
                vec![listener.clone().into(), listener.into()],
            )
            .await
            .unwrap();
        assert_eq!(same, json!(true));

        let same = ui
            .call(
                "test",
                "sameStub",
                vec![Callback::new(|_| {}).into(), Callback::new(|_| {}).into()],
            )
            .await
            .unwrap();
        assert_eq!(same, json!(false));
    }

    #[tokio::test]
    async fn test_dropped_stubs_are_evicted() {
        let (_ui, controller) = connected().await;

        let first = controller.stub(4).await;
        assert!(controller.stub(4).await.same_as(&first));
        assert_eq!(controller.stub_count().await, 1);

        drop(first);
        assert_eq!(controller.stub_count().await, 0);

        let _again = controller.stub(9).await;
        assert_eq!(controller.inner.stubs.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn test_stubs_end_with_the_handler() {
        let (ui, controller) = connected().await;
        let listener = Callback::new(|_| {});

        ui.call("test", "notify", vec![listener.into()]).await.unwrap();

        let deadline = tokio::time::Instant::now() + Duration::from_secs(1);
        while controller.stub_count().await > 0 {
            assert!(tokio::time::Instant::now() < deadline, "stub still alive");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    #[tokio::test]
    async fn test_bad_lines_leave_bridge_serving() {
        use crate::channel::ndjson;
        use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

        let (controller_io, ui_io) = tokio::io::duplex(4096);
        let (controller_read, controller_write) = tokio::io::split(controller_io);
        let controller = RpcBridge::with_objects(
            ndjson(controller_read, controller_write),
            vec![("test".to_string(), Arc::new(TestObject) as Arc<dyn RemoteObject>)],
        );

        let (ui_read, mut ui_write) = tokio::io::split(ui_io);
        ui_write.write_all(b"\xff\xfe garbage\n").await.unwrap();
        ui_write
            .write_all(b"{\"command\":\"call\",\"callId\":5,\"object\":\"test\"}\n")
            .await
            .unwrap();
        ui_write
            .write_all(b"{\"command\":\"call\",\"callId\":6,\"object\":\"test\",\"method\":\"echo\",\"args\":[1]}\n")
            .await
            .unwrap();

        let mut lines = BufReader::new(ui_read).lines();
        let mut replies = Vec::new();
        for _ in 0..2 {
            let line = tokio::time::timeout(Duration::from_secs(1), lines.next_line())
                .await
                .unwrap()
                .unwrap()
                .unwrap();
            replies.push(serde_json::from_str::<Value>(&line).unwrap());
        }

        assert_eq!(replies[0]["callId"], 5);
        assert_eq!(replies[0]["error"]["kind"], "protocol");
        assert_eq!(
            replies[1],
            json!({"command": "callResult", "callId": 6, "result": 1})
        );
        assert!(!controller.is_closed());
    }

    #[tokio::test]
    async fn test_responses_may_arrive_out_of_order() {
        let (ui_end, mut raw) = in_memory_pair();
        let ui = RpcBridge::new(ui_end);

        let first = tokio::spawn({
            let ui = ui.clone();
            async move { ui.call("obj", "a", vec![]).await }
        });
        let (first_id, _) = next_call(&mut raw).await;
        let second = tokio::spawn({
            let ui = ui.clone();
            async move { ui.call("obj", "b", vec![]).await }
        });
        let (second_id, _) = next_call(&mut raw).await;
        assert!(second_id > first_id);

        raw.send(BridgeMessage::call_result(second_id, Ok(json!("b"))))
            .unwrap();
        raw.send(BridgeMessage::call_result(first_id, Ok(json!("a"))))
            .unwrap();

        assert_eq!(first.await.unwrap().unwrap(), json!("a"));
        assert_eq!(second.await.unwrap().unwrap(), json!("b"));
    }

    #[tokio::test]
    async fn test_unknown_and_duplicate_results_are_ignored() {
        let (ui_end, mut raw) = in_memory_pair();
        let ui = RpcBridge::new(ui_end);

        raw.send(BridgeMessage::call_result(999, Ok(json!("stray"))))
            .unwrap();
        raw.send(BridgeMessage::Callback {
            callback_id: 999,
            args: vec![],
        })
        .unwrap();

        let call = tokio::spawn({
            let ui = ui.clone();
            async move { ui.call("obj", "m", vec![]).await }
        });
        let (call_id, _) = next_call(&mut raw).await;
        raw.send(BridgeMessage::call_result(call_id, Ok(json!(1))))
            .unwrap();
        raw.send(BridgeMessage::call_result(call_id, Ok(json!(2))))
            .unwrap();

        assert_eq!(call.await.unwrap().unwrap(), json!(1));
        assert!(!ui.is_closed());
    }

    #[tokio::test]
    async fn test_teardown_rejects_all_pending_calls() {
        let (ui_end, mut raw) = in_memory_pair();
        let ui = RpcBridge::new(ui_end);

        let mut calls = Vec::new();
        for _ in 0..3 {
            let ui = ui.clone();
            calls.push(tokio::spawn(async move { ui.call("obj", "m", vec![]).await }));
        }
        for _ in 0..3 {
            next_call(&mut raw).await;
        }
        assert_eq!(ui.pending_count().await, 3);

        drop(raw);

        for call in calls {
            let result = call.await.unwrap();
            assert!(matches!(result, Err(Error::ChannelClosed)));
        }
        assert_eq!(ui.pending_count().await, 0);
        ui.closed().await;
        assert!(ui.is_closed());

        // Calls after teardown fail immediately
        assert!(matches!(
            ui.call("obj", "m", vec![]).await,
            Err(Error::ChannelClosed)
        ));
    }

    #[tokio::test]
    async fn test_local_close_is_idempotent() {
        let (ui_end, mut raw) = in_memory_pair();
        let ui = RpcBridge::new(ui_end);

        let call = tokio::spawn({
            let ui = ui.clone();
            async move { ui.call("obj", "m", vec![]).await }
        });
        next_call(&mut raw).await;

        ui.close().await;
        ui.close().await;
        assert!(matches!(call.await.unwrap(), Err(Error::ChannelClosed)));
    }

    #[tokio::test]
    async fn test_call_ids_are_per_bridge() {
        let (a_end, mut a_raw) = in_memory_pair();
        let (b_end, mut b_raw) = in_memory_pair();
        let a = RpcBridge::new(a_end);
        let b = RpcBridge::new(b_end);

        tokio::spawn(async move {
            let _ = a.call("obj", "m", vec![]).await;
        });
        tokio::spawn(async move {
            let _ = b.call("obj", "m", vec![]).await;
        });

        assert_eq!(next_call(&mut a_raw).await.0, 1);
        assert_eq!(next_call(&mut b_raw).await.0, 1);
    }
}
