//! Integration tests for statewire.
//!
//! Both ends of every connection run in-process over `tokio::io::duplex`.

use std::convert::Infallible;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Once};
use std::time::Duration;

use crypto_box::aead::OsRng;
use rmpv::Value;
use statewire::codec::{CipherCodec, DefaultStatefulCodec, SecretKey};
use statewire::dispatch::{MethodSerializer, NamedMethodSerializer};
use statewire::executor::BoxFuture;
use statewire::protocol::{ExtendedRpc, Rpc, RpcResponse};
use statewire::{
    Caller, Client, ClientBuilder, Dispatcher, InvocationError, Message, MessageHandler,
    MethodSignature, ObjectRegistry, SerialExecutor, Service, WireError,
};
use tokio::sync::{mpsc, Notify};

static INIT: Once = Once::new();

fn init_tracing() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::from_default_env()
                    .add_directive(tracing::Level::DEBUG.into()),
            )
            .with_test_writer()
            .init();
    });
}

const TIMEOUT: Duration = Duration::from_secs(5);

fn sum() -> MethodSignature {
    MethodSignature::new("sum", ["i64", "i64"])
}

fn calculator(gate: Arc<Notify>) -> Arc<ObjectRegistry> {
    let registry = Arc::new(ObjectRegistry::new());
    registry.register(
        "calc",
        Arc::new(
            Service::builder("calc")
                .method("sum", &["i64", "i64"], |(a, b): (i64, i64)| async move {
                    Ok::<_, Infallible>(a + b)
                })
                .method("divide", &["i64", "i64"], |(a, b): (i64, i64)| async move {
                    a.checked_div(b).ok_or("division by zero")
                })
                .method("gated", &[], move |(): ()| {
                    let gate = gate.clone();
                    async move {
                        gate.notified().await;
                        Ok::<_, Infallible>("opened")
                    }
                })
                .build(),
        ),
    );
    registry
}

/// Counts descriptor resolutions on the serving side.
#[derive(Default)]
struct CountingSerializer(AtomicUsize);

impl MethodSerializer for CountingSerializer {
    fn to_descriptor(&self, signature: &MethodSignature) -> Value {
        NamedMethodSerializer.to_descriptor(signature)
    }

    fn from_descriptor(&self, descriptor: &Value) -> Result<MethodSignature, InvocationError> {
        self.0.fetch_add(1, Ordering::SeqCst);
        NamedMethodSerializer.from_descriptor(descriptor)
    }
}

/// Forwards every inbound reply to a channel.
struct Replies(mpsc::UnboundedSender<RpcResponse>);

impl MessageHandler<Message> for Replies {
    fn on_message(&self, _client: Client<Message>, message: Message) -> BoxFuture<'static, ()> {
        if let Message::Response(reply) = message {
            let _ = self.0.send(reply);
        }
        Box::pin(async {})
    }
}

async fn next_reply(rx: &mut mpsc::UnboundedReceiver<RpcResponse>) -> RpcResponse {
    tokio::time::timeout(TIMEOUT, rx.recv())
        .await
        .expect("reply in time")
        .expect("connection open")
}

/// Call `sum(2,3)` as the first use of method id 1, then `sum(10,20)` on the
/// cached binding.
#[tokio::test]
async fn test_sum_with_cached_binding() {
    init_tracing();
    let (left, right) = tokio::io::duplex(64 * 1024);

    let serializer = Arc::new(CountingSerializer::default());
    let dispatcher = Dispatcher::builder(calculator(Arc::new(Notify::new())))
        .method_serializer(serializer.clone())
        .build();
    let _server = ClientBuilder::<Message>::new().connect(right, Arc::new(dispatcher));

    let (tx, mut rx) = mpsc::unbounded_channel();
    let connection = ClientBuilder::<Message>::new()
        .executor(Arc::new(SerialExecutor::spawn()))
        .connect(left, Arc::new(Replies(tx)));
    let client = connection.client();

    client.send(
        ExtendedRpc::with_id(
            100,
            NamedMethodSerializer.to_descriptor(&sum()),
            1,
            Value::from("calc"),
            vec![Value::from(2), Value::from(3)],
        )
        .into(),
    );
    assert_eq!(next_reply(&mut rx).await, RpcResponse::ok(100, Value::from(5)));

    client.send(Rpc::with_id(101, 1, Value::from("calc"), vec![Value::from(10), Value::from(20)]).into());
    assert_eq!(next_reply(&mut rx).await, RpcResponse::ok(101, Value::from(30)));

    assert_eq!(serializer.0.load(Ordering::SeqCst), 1);
}

/// A plain call that overtakes its binding call waits for it.
#[tokio::test]
async fn test_call_before_binding_waits() {
    init_tracing();
    let (left, right) = tokio::io::duplex(64 * 1024);

    let _server = ClientBuilder::<Message>::new().connect(
        right,
        Arc::new(Dispatcher::new(calculator(Arc::new(Notify::new())))),
    );

    let (tx, mut rx) = mpsc::unbounded_channel();
    let connection = ClientBuilder::<Message>::new().connect(left, Arc::new(Replies(tx)));
    let client = connection.client();

    client.send(Rpc::with_id(201, 9, Value::from("calc"), vec![Value::from(1), Value::from(1)]).into());

    // Give the server time to start waiting on method id 9.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(rx.try_recv().is_err());

    client.send(
        ExtendedRpc::with_id(
            200,
            NamedMethodSerializer.to_descriptor(&sum()),
            9,
            Value::from("calc"),
            vec![Value::from(4), Value::from(5)],
        )
        .into(),
    );

    let mut replies = vec![next_reply(&mut rx).await, next_reply(&mut rx).await];
    replies.sort_by_key(|r| r.id);
    assert_eq!(
        replies,
        vec![RpcResponse::ok(200, Value::from(9)), RpcResponse::ok(201, Value::from(2))]
    );
}

#[tokio::test(start_paused = true)]
async fn test_binding_timeout_is_an_exception() {
    init_tracing();
    let (left, right) = tokio::io::duplex(64 * 1024);

    let dispatcher = Dispatcher::builder(calculator(Arc::new(Notify::new())))
        .binding_timeout(Some(Duration::from_secs(2)))
        .build();
    let _server = ClientBuilder::<Message>::new().connect(right, Arc::new(dispatcher));

    let (tx, mut rx) = mpsc::unbounded_channel();
    let connection = ClientBuilder::<Message>::new().connect(left, Arc::new(Replies(tx)));

    connection
        .client()
        .send(Rpc::with_id(300, 42, Value::from("calc"), vec![]).into());

    let reply = rx.recv().await.unwrap();
    assert_eq!(reply.id, 300);
    assert_eq!(reply.response, None);
    assert!(matches!(
        reply.exception,
        Some(InvocationError::BindingTimeout { method_id: 42, .. })
    ));
}

/// Failed calls are answered in-band and the connection keeps serving.
#[tokio::test]
async fn test_exceptions_do_not_close_the_connection() {
    init_tracing();
    let (left, right) = tokio::io::duplex(64 * 1024);

    let _server = ClientBuilder::<Message>::new().connect(
        right,
        Arc::new(Dispatcher::new(calculator(Arc::new(Notify::new())))),
    );

    let caller = Caller::new();
    let connection = ClientBuilder::<Message>::new().connect(left, Arc::new(caller.clone()));
    let client = connection.client();
    let divide = MethodSignature::new("divide", ["i64", "i64"]);

    let err = caller
        .invoke::<_, i64>(client, "calc", &divide, (1, 0))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        WireError::Remote(InvocationError::Failed(ref m)) if m == "division by zero"
    ));

    let err = caller
        .invoke::<_, i64>(client, "nobody", &sum(), (1, 2))
        .await
        .unwrap_err();
    assert!(matches!(err, WireError::Remote(InvocationError::NoSuchTarget(_))));

    let missing = MethodSignature::new("sum", ["String"]);
    let err = caller
        .invoke::<_, i64>(client, "calc", &missing, ("x",))
        .await
        .unwrap_err();
    assert!(matches!(err, WireError::Remote(InvocationError::NoSuchMethod(_))));

    let ten: i64 = caller.invoke(client, "calc", &divide, (100, 10)).await.unwrap();
    assert_eq!(ten, 10);
    assert_eq!(caller.method_id(&divide), Some(1));
}

/// Concurrent calls complete out of order on a multi-worker executor.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_handling_may_complete_out_of_order() {
    init_tracing();
    let (left, right) = tokio::io::duplex(64 * 1024);

    let gate = Arc::new(Notify::new());
    let _server = ClientBuilder::<Message>::new().connect(right, Arc::new(Dispatcher::new(calculator(gate.clone()))));

    let caller = Caller::new();
    let connection = ClientBuilder::<Message>::new().connect(left, Arc::new(caller.clone()));
    let client = connection.client().clone();

    let gated = {
        let (caller, client) = (caller.clone(), client.clone());
        tokio::spawn(async move {
            let gated = MethodSignature::new("gated", Vec::<String>::new());
            caller.invoke::<_, String>(&client, "calc", &gated, ()).await
        })
    };

    let five: i64 = tokio::time::timeout(TIMEOUT, caller.invoke(&client, "calc", &sum(), (2, 3)))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(five, 5);
    assert!(!gated.is_finished());

    gate.notify_one();
    let opened = tokio::time::timeout(TIMEOUT, gated).await.unwrap().unwrap().unwrap();
    assert_eq!(opened, "opened");
}

#[tokio::test]
async fn test_encrypted_round_trip() {
    init_tracing();
    let (left, right) = tokio::io::duplex(64 * 1024);

    let client_key = SecretKey::generate(&mut OsRng);
    let server_key = SecretKey::generate(&mut OsRng);

    let server_codec = CipherCodec::new(
        DefaultStatefulCodec::<Message>::new(),
        Some(client_key.public_key()),
        Some(server_key.clone()),
    );
    let _server = ClientBuilder::<Message>::new()
        .codec(Arc::new(server_codec))
        .connect(right, Arc::new(Dispatcher::new(calculator(Arc::new(Notify::new())))));

    let client_codec = CipherCodec::new(
        DefaultStatefulCodec::<Message>::new(),
        Some(server_key.public_key()),
        Some(client_key),
    );
    let caller = Caller::new();
    let connection = ClientBuilder::<Message>::new()
        .codec(Arc::new(client_codec))
        .connect(left, Arc::new(caller.clone()));

    for (a, b) in [(2, 3), (10, 20), (-4, 4)] {
        let total: i64 = tokio::time::timeout(
            TIMEOUT,
            caller.invoke(connection.client(), "calc", &sum(), (a, b)),
        )
        .await
        .unwrap()
        .unwrap();
        assert_eq!(total, a + b);
    }
}

/// A peer sealing for the wrong key makes the receiver drop the connection.
#[tokio::test]
async fn test_key_mismatch_is_fatal() {
    init_tracing();
    let (left, right) = tokio::io::duplex(64 * 1024);

    let server_key = SecretKey::generate(&mut OsRng);
    let stranger = SecretKey::generate(&mut OsRng);

    let server = ClientBuilder::<Message>::new()
        .codec(Arc::new(CipherCodec::new(
            DefaultStatefulCodec::<Message>::new(),
            None,
            Some(server_key),
        )))
        .connect(right, Arc::new(Dispatcher::new(calculator(Arc::new(Notify::new())))));

    let caller = Caller::new();
    let connection = ClientBuilder::<Message>::new()
        .codec(Arc::new(CipherCodec::new(
            DefaultStatefulCodec::<Message>::new(),
            Some(stranger.public_key()),
            None,
        )))
        .connect(left, Arc::new(caller.clone()));

    let client = connection.client().clone();
    let call = tokio::spawn(async move {
        caller.invoke::<_, i64>(&client, "calc", &sum(), (2, 3)).await
    });

    let result = tokio::time::timeout(TIMEOUT, server.wait_for_shutdown())
        .await
        .unwrap();
    assert!(matches!(result, Err(WireError::Cipher(_))));
    call.abort();
}
