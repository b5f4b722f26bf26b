//! Telemetry receiver round-trip: hello handshake, frame decode, store
//! merge, and rejection of bad signatures.

use futures_util::{SinkExt, StreamExt};
use prost::Message as _;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::Message;

use vlink_core::store::LatestStore;
use vlink_core::value::FieldValue;
use vlink_daemon::fanout::FrameFanout;
use vlink_daemon::receiver::TelemetryReceiver;
use vlink_daemon::sinks::spawn_store_sink;
use vlink_protocol::vehicle::{
    value::Kind, Datum, HelloChallenge, HelloRequest, Payload, Timestamp, Value,
};
use vlink_protocol::{flatbuf, schnorr};

const TEST_VIN: &str = "5YJ3E1EA1NF000000";

struct Rig {
    addr: SocketAddr,
    store: Arc<LatestStore>,
    vehicle_key: p256::SecretKey,
    _shutdown: watch::Sender<bool>,
}

async fn start_receiver() -> Rig {
    let vehicle_key = p256::SecretKey::random(&mut rand::rngs::OsRng);
    let fanout = Arc::new(FrameFanout::new());
    let store = Arc::new(LatestStore::new());
    let (_stats, _handle) = spawn_store_sink(&fanout, store.clone());

    let receiver = TelemetryReceiver::bind(
        SocketAddr::from(([127, 0, 0, 1], 0)),
        TEST_VIN,
        Some(vehicle_key.public_key()),
        fanout.clone(),
    )
    .await
    .expect("bind receiver");
    let addr = receiver.local_addr();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(receiver.run(shutdown_rx));

    Rig {
        addr,
        store,
        vehicle_key,
        _shutdown: shutdown_tx,
    }
}

type Ws = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;

async fn connect(addr: SocketAddr) -> (Ws, Vec<u8>) {
    let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}"))
        .await
        .expect("connect");
    let challenge = match ws.next().await.expect("challenge").expect("frame") {
        Message::Binary(raw) => HelloChallenge::decode(raw.as_slice()).expect("challenge decode"),
        other => panic!("expected binary challenge, got {other:?}"),
    };
    (ws, challenge.nonce)
}

async fn authenticate(ws: &mut Ws, nonce: &[u8], key: &p256::SecretKey, vin: &str) {
    let hello = HelloRequest {
        vin: vin.to_string(),
        signature: schnorr::sign(key, nonce),
    };
    ws.send(Message::Binary(hello.encode_to_vec()))
        .await
        .expect("send hello");
}

async fn wait_for_field(store: &LatestStore, field: &str) -> FieldValue {
    for _ in 0..100 {
        if let Some(snapshot) = store.get(field) {
            return snapshot.value;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("field {field} never arrived in store");
}

fn soc_payload(soc: i32) -> Vec<u8> {
    Payload {
        data: vec![Datum {
            key: 8,
            value: Some(Value {
                kind: Some(Kind::IntValue(soc)),
            }),
        }],
        created_at: Some(Timestamp {
            seconds: 1_700_000_000,
            nanos: 0,
        }),
        vin: TEST_VIN.to_string(),
        is_resend: false,
    }
    .encode_to_vec()
}

#[tokio::test]
async fn protobuf_frame_lands_in_store() {
    let rig = start_receiver().await;
    let (mut ws, nonce) = connect(rig.addr).await;
    authenticate(&mut ws, &nonce, &rig.vehicle_key, TEST_VIN).await;

    ws.send(Message::Binary(soc_payload(72)))
        .await
        .expect("send frame");

    let value = wait_for_field(&rig.store, "Soc").await;
    assert_eq!(value, FieldValue::Int(72));
    assert_eq!(rig.store.get("Soc").expect("snapshot").updated_at_ms, 1_700_000_000_000);
}

#[tokio::test]
async fn flatbuf_frame_is_auto_detected() {
    let rig = start_receiver().await;
    let (mut ws, nonce) = connect(rig.addr).await;
    authenticate(&mut ws, &nonce, &rig.vehicle_key, TEST_VIN).await;

    let raw = flatbuf::build_payload(
        TEST_VIN,
        1_700_000_001_000,
        &[(86, flatbuf::DatumValue::Double(14.5))],
        false,
    );
    ws.send(Message::Binary(raw)).await.expect("send frame");

    let value = wait_for_field(&rig.store, "OutsideTemp").await;
    assert_eq!(value, FieldValue::Float(14.5));
}

#[tokio::test]
async fn malformed_frame_does_not_close_connection() {
    let rig = start_receiver().await;
    let (mut ws, nonce) = connect(rig.addr).await;
    authenticate(&mut ws, &nonce, &rig.vehicle_key, TEST_VIN).await;

    ws.send(Message::Binary(vec![0xFF, 0x00, 0xFF]))
        .await
        .expect("send garbage");
    ws.send(Message::Binary(soc_payload(55)))
        .await
        .expect("send valid frame");

    let value = wait_for_field(&rig.store, "Soc").await;
    assert_eq!(value, FieldValue::Int(55));
}

#[tokio::test]
async fn bad_signature_closes_with_policy_violation() {
    let rig = start_receiver().await;
    let (mut ws, nonce) = connect(rig.addr).await;

    // Sign with the wrong key.
    let imposter = p256::SecretKey::random(&mut rand::rngs::OsRng);
    authenticate(&mut ws, &nonce, &imposter, TEST_VIN).await;

    loop {
        match ws.next().await {
            Some(Ok(Message::Close(Some(frame)))) => {
                assert_eq!(frame.code, CloseCode::Policy);
                break;
            }
            Some(Ok(_)) => continue,
            Some(Err(_)) | None => break, // closed without frame is acceptable on some paths
        }
    }
    assert!(rig.store.get("Soc").is_none());
}

#[tokio::test]
async fn vin_mismatch_is_rejected() {
    let rig = start_receiver().await;
    let (mut ws, nonce) = connect(rig.addr).await;
    authenticate(&mut ws, &nonce, &rig.vehicle_key, "WRONGVIN000000000").await;

    loop {
        match ws.next().await {
            Some(Ok(Message::Close(Some(frame)))) => {
                assert_eq!(frame.code, CloseCode::Policy);
                break;
            }
            Some(Ok(_)) => continue,
            Some(Err(_)) | None => break,
        }
    }
}
