//! The engine is transport-free, so these tests run whole protocol
//! conversations by feeding crafted server frames into a connection.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::{Bytes, BytesMut};

use gelx_client::raw::{Advance, Connection, DumpFlow, ExecuteFlow, Flow, ParseFlow};
use gelx_client::Config;
use gelx_errors::{
    AuthenticationError, Error, ProtocolError, UnsupportedProtocolVersionError,
};
use gelx_protocol::codec::{scalar_codec, STD_INT64};
use gelx_protocol::common::Capabilities;
use gelx_protocol::encoding::Output;
use gelx_protocol::features::ProtocolVersion;
use gelx_protocol::registry::CodecRegistry;
use gelx_protocol::server_message::{
    Authentication, CommandComplete, Data, RawPacket, ReadyForCommand, ServerHandshake,
    ServerKeyData, ServerMessage, TransactionState,
};
use gelx_protocol::value::Value;

fn config() -> Config {
    Config::new("localhost", 5656)
        .user("tester")
        .password("secret")
        .database("app")
}

fn server_bytes(messages: &[ServerMessage]) -> Vec<u8> {
    let proto = ProtocolVersion::current();
    let mut buf = BytesMut::new();
    for message in messages {
        message.encode(&mut Output::new(&proto, &mut buf)).unwrap();
    }
    buf.to_vec()
}

fn ready() -> ServerMessage {
    ServerMessage::ReadyForCommand(ReadyForCommand {
        annotations: HashMap::new(),
        transaction_state: TransactionState::NotInTransaction,
    })
}

enum Outcome {
    Done,
    NeedsMoreInput,
    Failed(Error),
}

/// Pump the engine until it finishes, starves, or fails; collect writes.
fn drive(conn: &mut Connection, flow: &mut dyn Flow, writes: &mut Vec<Bytes>) -> Outcome {
    loop {
        match conn.advance(flow) {
            Ok(Advance::Write(frame)) => writes.push(frame),
            Ok(Advance::Read) => return Outcome::NeedsMoreInput,
            Ok(Advance::Done) => return Outcome::Done,
            Err(error) => return Outcome::Failed(error),
        }
    }
}

#[test]
fn handshake_reaches_ready() {
    let (mut conn, mut flow) = Connection::connect(&config());
    let mut writes = Vec::new();

    // the client speaks first
    assert!(matches!(
        drive(&mut conn, &mut flow, &mut writes),
        Outcome::NeedsMoreInput
    ));
    assert_eq!(writes.len(), 1);
    assert_eq!(writes[0][0], b'V');

    conn.feed(&server_bytes(&[
        ServerMessage::ServerHandshake(ServerHandshake {
            major_ver: 3,
            minor_ver: 0,
            extensions: HashMap::new(),
        }),
        ServerMessage::Authentication(Authentication::Ok),
        ServerMessage::ServerKeyData(ServerKeyData { data: [7u8; 32] }),
        ready(),
    ]));
    assert!(matches!(
        drive(&mut conn, &mut flow, &mut writes),
        Outcome::Done
    ));
    assert!(conn.is_consistent());
    assert_eq!(conn.server_key(), Some(&[7u8; 32]));
    assert_eq!(
        conn.transaction_state(),
        TransactionState::NotInTransaction
    );
}

#[test]
fn legacy_server_offer_is_refused() {
    let (mut conn, mut flow) = Connection::connect(&config());
    let mut writes = Vec::new();
    drive(&mut conn, &mut flow, &mut writes);

    conn.feed(&server_bytes(&[ServerMessage::ServerHandshake(
        ServerHandshake {
            major_ver: 0,
            minor_ver: 13,
            extensions: HashMap::new(),
        },
    )]));
    let Outcome::Failed(error) = drive(&mut conn, &mut flow, &mut writes) else {
        panic!("expected the handshake to fail");
    };
    assert!(error.is::<UnsupportedProtocolVersionError>());
}

#[test]
fn unsupported_sasl_methods_are_refused() {
    let (mut conn, mut flow) = Connection::connect(&config());
    let mut writes = Vec::new();
    drive(&mut conn, &mut flow, &mut writes);

    conn.feed(&server_bytes(&[ServerMessage::Authentication(
        Authentication::Sasl {
            methods: vec!["SCRAM-SHA-1".to_string()],
        },
    )]));
    let Outcome::Failed(error) = drive(&mut conn, &mut flow, &mut writes) else {
        panic!("expected authentication to fail");
    };
    assert!(error.is::<AuthenticationError>());
}

#[test]
fn sasl_offer_sends_initial_response() {
    let (mut conn, mut flow) = Connection::connect(&config());
    let mut writes = Vec::new();
    drive(&mut conn, &mut flow, &mut writes);
    writes.clear();

    conn.feed(&server_bytes(&[ServerMessage::Authentication(
        Authentication::Sasl {
            methods: vec!["SCRAM-SHA-256".to_string()],
        },
    )]));
    assert!(matches!(
        drive(&mut conn, &mut flow, &mut writes),
        Outcome::NeedsMoreInput
    ));
    assert_eq!(writes.len(), 1);
    assert_eq!(writes[0][0], b'p');
    let payload = String::from_utf8_lossy(&writes[0]);
    assert!(payload.contains("SCRAM-SHA-256"));
    assert!(payload.contains("n=tester,r="));
}

fn connected() -> Connection {
    let (mut conn, mut flow) = Connection::connect(&config());
    let mut writes = Vec::new();
    drive(&mut conn, &mut flow, &mut writes);
    conn.feed(&server_bytes(&[
        ServerMessage::Authentication(Authentication::Ok),
        ready(),
    ]));
    assert!(matches!(
        drive(&mut conn, &mut flow, &mut writes),
        Outcome::Done
    ));
    // drain the handshake frame
    writes.clear();
    conn
}

fn int64_row(value: i64) -> Bytes {
    Bytes::copy_from_slice(&value.to_be_bytes())
}

fn complete() -> ServerMessage {
    ServerMessage::CommandComplete(CommandComplete {
        annotations: HashMap::new(),
        capabilities: Capabilities::empty(),
        status: "SELECT".to_string(),
        state: None,
    })
}

#[test]
fn execute_flow_collects_rows_in_order() {
    let mut conn = connected();
    conn.begin_request().unwrap();
    let registry = Arc::new(CodecRegistry::new());
    let mut flow = ExecuteFlow::new(scalar_codec(&STD_INT64).unwrap(), registry);
    let mut writes = Vec::new();

    conn.feed(&server_bytes(&[
        ServerMessage::Data(Data {
            data: vec![int64_row(1), int64_row(2)],
        }),
        ServerMessage::Data(Data {
            data: vec![int64_row(3)],
        }),
        complete(),
        ready(),
    ]));
    assert!(matches!(
        drive(&mut conn, &mut flow, &mut writes),
        Outcome::Done
    ));
    assert_eq!(
        flow.rows,
        vec![Value::Int64(1), Value::Int64(2), Value::Int64(3)]
    );
    assert!(flow.error.is_none());
    assert!(flow.decode_error.is_none());
    assert_eq!(flow.status.as_deref(), Some("SELECT"));
    assert!(conn.is_consistent());
}

#[test]
fn decode_errors_are_deferred_and_later_rows_drained() {
    let mut conn = connected();
    conn.begin_request().unwrap();
    let registry = Arc::new(CodecRegistry::new());
    let mut flow = ExecuteFlow::new(scalar_codec(&STD_INT64).unwrap(), registry);
    let mut writes = Vec::new();

    conn.feed(&server_bytes(&[
        ServerMessage::Data(Data {
            data: vec![int64_row(1)],
        }),
        ServerMessage::Data(Data {
            // three bytes cannot be an int64
            data: vec![Bytes::from_static(b"bad")],
        }),
        ServerMessage::Data(Data {
            data: vec![int64_row(3)],
        }),
        complete(),
        ready(),
    ]));
    // the bad row must not break the protocol: the flow still drains
    // to ReadyForCommand and the connection stays usable
    assert!(matches!(
        drive(&mut conn, &mut flow, &mut writes),
        Outcome::Done
    ));
    assert!(flow.decode_error.is_some());
    assert_eq!(flow.rows, vec![Value::Int64(1)]);
    assert!(conn.is_consistent());
}

#[test]
fn parse_flow_captures_error_until_ready() {
    let mut conn = connected();
    conn.begin_request().unwrap();
    let mut flow = ParseFlow::new();
    let mut writes = Vec::new();

    conn.feed(&server_bytes(&[
        ServerMessage::ErrorResponse(gelx_protocol::server_message::ErrorResponse {
            severity: gelx_protocol::server_message::ErrorSeverity::Error,
            code: 0x04010000, // invalid syntax
            message: "Unexpected token".to_string(),
            attributes: HashMap::new(),
        }),
        ready(),
    ]));
    assert!(matches!(
        drive(&mut conn, &mut flow, &mut writes),
        Outcome::Done
    ));
    let response = flow.error.expect("error was captured");
    assert_eq!(response.code, 0x04010000);
    // the connection already drained ReadyForCommand
    assert!(conn.is_consistent());
}

#[test]
fn dump_block_before_header_is_fatal() {
    let mut conn = connected();
    conn.begin_request().unwrap();
    let mut blocks = Vec::new();
    let mut sink = |packet: RawPacket| {
        blocks.push(packet.data);
        Ok(())
    };
    let mut flow = DumpFlow::new(&mut sink);
    let mut writes = Vec::new();

    conn.feed(&server_bytes(&[ServerMessage::DumpBlock(RawPacket {
        data: Bytes::from_static(b"block"),
    })]));
    let Outcome::Failed(error) = drive(&mut conn, &mut flow, &mut writes) else {
        panic!("expected a protocol error");
    };
    assert!(error.is::<ProtocolError>());
}

#[test]
fn dump_streams_blocks_after_header() {
    let mut conn = connected();
    conn.begin_request().unwrap();
    let mut blocks = Vec::new();
    let mut sink = |packet: RawPacket| {
        blocks.push(packet.data);
        Ok(())
    };
    let mut flow = DumpFlow::new(&mut sink);
    let mut writes = Vec::new();

    conn.feed(&server_bytes(&[
        ServerMessage::DumpHeader(RawPacket {
            data: Bytes::from_static(b"header"),
        }),
        ServerMessage::DumpBlock(RawPacket {
            data: Bytes::from_static(b"one"),
        }),
        ServerMessage::DumpBlock(RawPacket {
            data: Bytes::from_static(b"two"),
        }),
        complete(),
        ready(),
    ]));
    assert!(matches!(
        drive(&mut conn, &mut flow, &mut writes),
        Outcome::Done
    ));
    assert_eq!(flow.header.unwrap().data, Bytes::from_static(b"header"));
    assert_eq!(blocks, vec![Bytes::from_static(b"one"), Bytes::from_static(b"two")]);
}

#[test]
fn requests_never_interleave() {
    let mut conn = connected();
    conn.begin_request().unwrap();
    // a second request while one is in flight is refused
    assert!(conn.begin_request().is_err());
}
