use mavbridge_core::command::{AckStatus, CommandError};
use mavbridge_core::config::EngineConfig;
use mavbridge_core::params::ParamError;
use mavbridge_core::protocol::{Codec, SenderInfo, TypedMessage, Value};
use mavbridge_core::schema::SchemaRegistry;
use mavbridge_core::vehicle::{FlightMode, Phase, VehicleEngine};
use pretty_assertions::assert_eq;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;

const PARAM_COUNT: u16 = 20;
const SILENT_OPCODE: u16 = 31000;
const UNSUPPORTED_OPCODE: u16 = 999;

/// How the simulated vehicle behaves
#[derive(Default)]
struct Behaviour {
    /// Parameter indices the vehicle never sends
    withheld: Vec<u16>,
}

/// Everything the simulated vehicle received
#[derive(Default)]
struct Received {
    commands: Vec<(u16, u8)>,
    list_requests: usize,
}

fn param_name(index: u16) -> String {
    if index == 0 {
        "RO_LOCK".to_string()
    } else {
        format!("P{}", index)
    }
}

fn frame(codec: &Codec, name: &str, fields: Vec<(&str, Value)>) -> Vec<u8> {
    let fields: HashMap<String, Value> = fields
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();
    let sender = SenderInfo {
        seq: 0,
        system_id: 1,
        component_id: 1,
    };
    let packet = codec.pack_named(name, &fields, sender).unwrap();
    codec.encode(&packet).unwrap()
}

fn param_value(codec: &Codec, name: &str, value: f32, index: u16) -> Vec<u8> {
    frame(
        codec,
        "PARAM_VALUE",
        vec![
            ("param_id", Value::text(name)),
            ("param_value", Value::F32(value)),
            ("param_type", Value::U8(9)),
            ("param_count", Value::U16(PARAM_COUNT)),
            ("param_index", Value::U16(index)),
        ],
    )
}

/// Answer one outbound message the way a PX4 vehicle would
fn respond(
    engine: &VehicleEngine,
    codec: &Codec,
    behaviour: &Behaviour,
    received: &Mutex<Received>,
    values: &mut HashMap<String, f32>,
    msg: TypedMessage,
) {
    match msg.name.as_str() {
        "COMMAND_LONG" => {
            let opcode = msg.get_u64("command").unwrap() as u16;
            let confirmation = msg.get_u64("confirmation").unwrap() as u8;
            received.lock().unwrap().commands.push((opcode, confirmation));
            let reply = match opcode {
                520 => frame(
                    codec,
                    "AUTOPILOT_VERSION",
                    vec![("capabilities", Value::U64(0xE4EF))],
                ),
                SILENT_OPCODE => return,
                UNSUPPORTED_OPCODE => frame(
                    codec,
                    "COMMAND_ACK",
                    vec![("command", Value::U16(opcode)), ("result", Value::U8(3))],
                ),
                _ => frame(
                    codec,
                    "COMMAND_ACK",
                    vec![("command", Value::U16(opcode)), ("result", Value::U8(0))],
                ),
            };
            engine.process_datagram(&reply);
        }
        "PARAM_REQUEST_LIST" => {
            received.lock().unwrap().list_requests += 1;
            for index in 0..PARAM_COUNT {
                if behaviour.withheld.contains(&index) {
                    continue;
                }
                let name = param_name(index);
                let value = values.get(&name).copied().unwrap_or(0.0);
                engine.process_datagram(&param_value(codec, &name, value, index));
            }
        }
        "PARAM_REQUEST_READ" => {
            let index = msg.get_u64("param_index").unwrap() as u16;
            if !behaviour.withheld.contains(&index) {
                let name = param_name(index);
                let value = values.get(&name).copied().unwrap_or(0.0);
                engine.process_datagram(&param_value(codec, &name, value, index));
            }
        }
        "PARAM_SET" => {
            let name = msg.get_str("param_id").unwrap();
            let requested = msg.get_f64("param_value").unwrap() as f32;
            if !name.starts_with("RO_") {
                values.insert(name.clone(), requested);
            }
            let value = values.get(&name).copied().unwrap_or(0.0);
            engine.process_datagram(&param_value(codec, &name, value, u16::MAX));
        }
        _ => {}
    }
}

fn spawn_vehicle(
    engine: VehicleEngine,
    mut outbound: mpsc::Receiver<Vec<u8>>,
    codec: Arc<Codec>,
    behaviour: Behaviour,
) -> Arc<Mutex<Received>> {
    let received = Arc::new(Mutex::new(Received::default()));
    let log = Arc::clone(&received);
    tokio::spawn(async move {
        let mut values = HashMap::new();
        let mut heartbeat = tokio::time::interval(Duration::from_secs(1));
        loop {
            tokio::select! {
                _ = heartbeat.tick() => {
                    let custom = (3u32 << 24) | (4u32 << 16);
                    engine.process_datagram(&frame(
                        &codec,
                        "HEARTBEAT",
                        vec![("base_mode", Value::U8(1)), ("custom_mode", Value::U32(custom))],
                    ));
                }
                bytes = outbound.recv() => {
                    let Some(bytes) = bytes else { break };
                    let packet = codec.decode(&bytes).unwrap();
                    assert_eq!(packet.header.system_id, 255);
                    assert_eq!(packet.header.component_id, 190);
                    let msg = codec.unpack(&packet).unwrap();
                    respond(&engine, &codec, &behaviour, &log, &mut values, msg);
                }
            }
        }
    });
    received
}

fn start(behaviour: Behaviour) -> (VehicleEngine, Arc<Mutex<Received>>) {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    let codec = Arc::new(Codec::new(Arc::new(SchemaRegistry::builtin().unwrap())));
    let (engine, outbound) = VehicleEngine::start(Arc::clone(&codec), EngineConfig::default());
    let received = spawn_vehicle(engine.clone(), outbound, codec, behaviour);
    (engine, received)
}

#[tokio::test(start_paused = true)]
async fn test_reaches_ready() {
    let (engine, received) = start(Behaviour::default());
    assert_eq!(engine.phase(), Phase::Offline);

    tokio::time::sleep(Duration::from_secs(3)).await;
    let state = engine.snapshot();
    assert_eq!(state.phase, Phase::Ready);
    assert_eq!(state.capabilities, Some(0xE4EF));
    assert_eq!(state.system_id, Some(1));
    assert_eq!(state.mode, Some(FlightMode::Hold));
    assert!(!state.armed);

    assert!(engine.missing_params().is_empty());
    let params = engine.all_params();
    assert_eq!(params.total, Some(PARAM_COUNT));
    assert_eq!(params.received, PARAM_COUNT as usize);
    assert!(!params.forced);
    assert_eq!(received.lock().unwrap().list_requests, 1);
    assert!(engine.wait_for_params(1, Duration::from_millis(10)).await);
    engine.shutdown();
}

#[tokio::test(start_paused = true)]
async fn test_commands_dispatched_by_opcode() {
    let (engine, received) = start(Behaviour::default());
    tokio::time::sleep(Duration::from_secs(3)).await;
    received.lock().unwrap().commands.clear();

    let home = engine.set_home(47.39, 8.54, 488.0, false);
    let mode = engine.set_mode_and_arm(Some(FlightMode::Position), Some(true));
    let generic = engine.submit_command(400, [1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0]);

    assert_eq!(mode.wait().await, Ok(AckStatus::Accepted));
    assert_eq!(home.wait().await, Ok(AckStatus::Accepted));
    assert_eq!(generic.wait().await, Ok(AckStatus::Accepted));

    let sent: Vec<u16> = received
        .lock()
        .unwrap()
        .commands
        .iter()
        .map(|(opcode, _)| *opcode)
        .collect();
    assert_eq!(sent, vec![176, 179, 400]);

    let last = engine.last_command().unwrap();
    assert_eq!(last.opcode, 400);
    assert_eq!(last.status, AckStatus::Accepted);
    engine.clear_last_command();
    assert!(engine.last_command().is_none());
    engine.shutdown();
}

#[tokio::test(start_paused = true)]
async fn test_rejected_command_is_terminal() {
    let (engine, received) = start(Behaviour::default());
    tokio::time::sleep(Duration::from_secs(3)).await;

    let handle = engine.submit_command(UNSUPPORTED_OPCODE, [0.0; 7]);
    assert_eq!(
        handle.wait().await,
        Err(CommandError::Rejected {
            opcode: UNSUPPORTED_OPCODE,
            status: AckStatus::Unsupported
        })
    );
    let sends = received
        .lock()
        .unwrap()
        .commands
        .iter()
        .filter(|(opcode, _)| *opcode == UNSUPPORTED_OPCODE)
        .count();
    assert_eq!(sends, 1);
    engine.shutdown();
}

#[tokio::test(start_paused = true)]
async fn test_unacknowledged_command_sent_six_times() {
    let (engine, received) = start(Behaviour::default());
    tokio::time::sleep(Duration::from_secs(3)).await;

    let handle = engine.submit_command(SILENT_OPCODE, [0.0; 7]);
    assert_eq!(
        handle.wait().await,
        Err(CommandError::TimedOut {
            opcode: SILENT_OPCODE,
            attempts: 6
        })
    );
    let confirmations: Vec<u8> = received
        .lock()
        .unwrap()
        .commands
        .iter()
        .filter(|(opcode, _)| *opcode == SILENT_OPCODE)
        .map(|(_, confirmation)| *confirmation)
        .collect();
    assert_eq!(confirmations, vec![0, 1, 2, 3, 4, 5]);
    engine.shutdown();
}

#[tokio::test(start_paused = true)]
async fn test_missing_params_force_ready_after_timeout() {
    let (engine, _received) = start(Behaviour {
        withheld: vec![3, 17],
    });

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(engine.phase(), Phase::SyncingParameters);
    assert_eq!(engine.missing_params(), vec![3, 17]);
    assert!(!engine.wait_for_params(2, Duration::from_millis(100)).await);

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(engine.phase(), Phase::Ready);
    assert_eq!(engine.missing_params(), vec![3, 17]);
    let params = engine.all_params();
    assert!(params.forced);
    assert_eq!(params.received, PARAM_COUNT as usize - 2);
    assert!(matches!(
        engine.get_param("P3"),
        Err(ParamError::NotFound(_))
    ));
    assert!(matches!(
        engine.get_param_by_index(17).await,
        Err(ParamError::Unavailable { index: 17 })
    ));
    assert_eq!(engine.get_param_by_index(5).await.unwrap(), 0.0);
    engine.shutdown();
}

#[tokio::test(start_paused = true)]
async fn test_set_param_read_back() {
    let (engine, _received) = start(Behaviour::default());
    tokio::time::sleep(Duration::from_secs(3)).await;

    engine.set_param("P5", 2.5).await.unwrap();
    assert_eq!(engine.get_param("P5").unwrap(), 2.5);

    match engine.set_param("RO_LOCK", 1.0).await {
        Err(ParamError::SetFailed {
            name,
            expected,
            actual,
        }) => {
            assert_eq!(name, "RO_LOCK");
            assert_eq!(expected, 1.0);
            assert_eq!(actual, 0.0);
        }
        other => panic!("expected SetFailed, got {:?}", other),
    }
    engine.shutdown();
}

#[tokio::test(start_paused = true)]
async fn test_refresh_params_resyncs() {
    let (engine, received) = start(Behaviour::default());
    tokio::time::sleep(Duration::from_secs(3)).await;
    assert_eq!(engine.phase(), Phase::Ready);

    engine.refresh_params();
    assert_eq!(engine.phase(), Phase::SyncingParameters);
    assert_eq!(engine.all_params().total, None);

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(engine.phase(), Phase::Ready);
    assert_eq!(received.lock().unwrap().list_requests, 2);
    engine.shutdown();
}

fn bare_engine() -> (VehicleEngine, mpsc::Receiver<Vec<u8>>, Arc<Codec>) {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    let codec = Arc::new(Codec::new(Arc::new(SchemaRegistry::builtin().unwrap())));
    let (engine, outbound) = VehicleEngine::start(Arc::clone(&codec), EngineConfig::default());
    (engine, outbound, codec)
}

fn hold_heartbeat(codec: &Codec, base_mode: u8) -> Vec<u8> {
    let custom = (3u32 << 24) | (4u32 << 16);
    frame(
        codec,
        "HEARTBEAT",
        vec![("base_mode", Value::U8(base_mode)), ("custom_mode", Value::U32(custom))],
    )
}

/// Opcodes of the COMMAND_LONGs waiting on the outbound channel
fn sent_commands(outbound: &mut mpsc::Receiver<Vec<u8>>, codec: &Codec) -> Vec<u16> {
    let mut opcodes = Vec::new();
    while let Ok(bytes) = outbound.try_recv() {
        let msg = codec.unpack(&codec.decode(&bytes).unwrap()).unwrap();
        if msg.name == "COMMAND_LONG" {
            opcodes.push(msg.get_u64("command").unwrap() as u16);
        }
    }
    opcodes
}

#[tokio::test(start_paused = true)]
async fn test_stream_reader_handles_split_frames() {
    let (engine, _outbound, codec) = bare_engine();
    let mut raw = engine.subscribe_raw();
    let (mut link, engine_side) = tokio::io::duplex(64);
    let reader = engine.spawn_reader(engine_side);

    let heartbeat = hold_heartbeat(&codec, 128 | 1);
    let status = frame(
        &codec,
        "STATUSTEXT",
        vec![("severity", Value::U8(4)), ("text", Value::text("Battery low"))],
    );
    let mut stream = vec![0x00, 0x13, 0x37];
    stream.extend_from_slice(&heartbeat);
    stream.extend_from_slice(&status);
    for chunk in stream.chunks(5) {
        link.write_all(chunk).await.unwrap();
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    tokio::time::sleep(Duration::from_millis(10)).await;

    let state = engine.snapshot();
    assert!(state.armed);
    assert_eq!(state.mode, Some(FlightMode::Hold));
    assert_eq!(state.system_id, Some(1));
    let log = engine.take_syslog();
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].text, "Battery low");

    assert_eq!(raw.recv().await.unwrap().as_ref(), heartbeat.as_slice());
    assert_eq!(raw.recv().await.unwrap().as_ref(), status.as_slice());

    // The link stays open; shutdown alone ends the reader
    engine.shutdown();
    let result = tokio::time::timeout(Duration::from_secs(1), reader)
        .await
        .expect("reader should stop on shutdown")
        .unwrap();
    assert!(result.is_ok());
    drop(link);
}

#[tokio::test(start_paused = true)]
async fn test_stream_reader_recovers_stray_start_byte_at_close() {
    let (engine, _outbound, codec) = bare_engine();
    let (mut link, engine_side) = tokio::io::duplex(64);
    let reader = engine.spawn_reader(engine_side);

    // The stray start byte announces a frame longer than the whole stream
    let mut stream = vec![0xFE];
    stream.extend_from_slice(&hold_heartbeat(&codec, 128));
    link.write_all(&stream).await.unwrap();
    drop(link);

    let result = tokio::time::timeout(Duration::from_secs(1), reader)
        .await
        .expect("reader should stop when the link closes")
        .unwrap();
    assert!(result.is_ok());
    let state = engine.snapshot();
    assert!(state.armed);
    assert!(state.unknown.is_empty());
    engine.shutdown();
}

#[tokio::test(start_paused = true)]
async fn test_heartbeat_recovery_requests_capabilities_again() {
    let (engine, mut outbound, codec) = bare_engine();
    engine.process_datagram(&hold_heartbeat(&codec, 1));
    tokio::time::sleep(Duration::from_millis(600)).await;
    assert_eq!(engine.phase(), Phase::AwaitingCapabilities);
    assert!(sent_commands(&mut outbound, &codec).contains(&520));

    tokio::time::sleep(Duration::from_secs(7)).await;
    assert_eq!(engine.phase(), Phase::Offline);
    sent_commands(&mut outbound, &codec);
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(sent_commands(&mut outbound, &codec).is_empty());

    engine.process_datagram(&hold_heartbeat(&codec, 1));
    tokio::time::sleep(Duration::from_millis(600)).await;
    let state = engine.snapshot();
    assert_eq!(state.phase, Phase::AwaitingCapabilities);
    assert_eq!(state.capabilities, None);
    assert!(sent_commands(&mut outbound, &codec).contains(&520));
    engine.shutdown();
}
