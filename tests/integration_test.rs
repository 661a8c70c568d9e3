use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use mbtcp::client::{ClientConfig, ErrorCode, ModbusClient};
use mbtcp::server::{
    BankDataHandler, ChangeNotice, DataBank, DataChange, ModbusServer, ServerConfig, WriteOrigin,
};
use mbtcp::{ExceptionCode, RequestError};

fn loopback_config() -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".parse().unwrap(),
        port: 0,
        ..Default::default()
    }
}

async fn start_server(bank: Arc<DataBank>) -> (ModbusServer, SocketAddr) {
    let mut server =
        ModbusServer::with_handler(loopback_config(), Arc::new(BankDataHandler::new(bank)));
    server.start().await.unwrap();
    let addr = server.local_addr().unwrap();
    (server, addr)
}

fn client_for(addr: SocketAddr) -> ModbusClient {
    ModbusClient::new(ClientConfig {
        host: addr.ip().to_string(),
        port: addr.port(),
        timeout: Duration::from_secs(1),
        ..Default::default()
    })
    .unwrap()
}

#[tokio::test]
async fn requests_and_responses_round_trip() {
    let bank = Arc::new(DataBank::new());
    let (mut server, addr) = start_server(bank.clone()).await;
    let mut client = client_for(addr);

    bank.set_discrete_inputs(0, &[true, false]).unwrap();
    bank.set_input_registers(0, &[0xCAFE, 0x0001]).unwrap();

    assert_eq!(
        client.read_discrete_inputs(0, 2).await.unwrap(),
        vec![true, false]
    );
    assert_eq!(
        client.read_input_registers(0, 2).await.unwrap(),
        vec![0xCAFE, 0x0001]
    );

    client.write_single_coil(10, true).await.unwrap();
    assert_eq!(
        client.read_coils(9, 3).await.unwrap(),
        vec![false, true, false]
    );
    assert_eq!(bank.get_coils(10, 1).unwrap(), vec![true]);

    client.write_single_register(7, 0x0102).await.unwrap();
    assert_eq!(client.read_holding_registers(7, 1).await.unwrap(), vec![0x0102]);

    let pattern = [true, false, true, true, false, true, false, true, true];
    client.write_multiple_coils(100, &pattern).await.unwrap();
    assert_eq!(client.read_coils(100, 9).await.unwrap(), pattern.to_vec());

    client.write_multiple_registers(10, &[44, 55]).await.unwrap();
    assert_eq!(
        client.read_holding_registers(10, 2).await.unwrap(),
        vec![44, 55]
    );

    assert_eq!(client.last_error(), ErrorCode::NoError);
    assert_eq!(client.last_exception(), None);

    server.stop().await;
}

#[tokio::test]
async fn read_write_multiple_applies_the_write_before_the_read() {
    let bank = Arc::new(DataBank::new());
    let (mut server, addr) = start_server(bank.clone()).await;
    let mut client = client_for(addr);

    bank.set_holding_registers(200, &[9, 9, 9], WriteOrigin::Internal)
        .unwrap();

    // read range overlaps the write range, so the response carries the new values
    let values = client
        .write_read_multiple_registers(200, &[1, 2, 3], 200, 3)
        .await
        .unwrap();
    assert_eq!(values, vec![1, 2, 3]);
    assert_eq!(bank.get_holding_registers(200, 3).unwrap(), vec![1, 2, 3]);

    server.stop().await;
}

#[tokio::test]
async fn wire_writes_notify_subscribers_with_the_client_origin() {
    let bank = Arc::new(DataBank::new());
    let (mut server, addr) = start_server(bank.clone()).await;
    let mut client = client_for(addr);

    let notices: Arc<Mutex<Vec<ChangeNotice>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = notices.clone();
    bank.subscribe(move |notice| sink.lock().unwrap().push(notice.clone()));

    client.write_single_coil(3, true).await.unwrap();
    client.write_multiple_registers(0, &[5, 6]).await.unwrap();

    let notices = notices.lock().unwrap();
    assert_eq!(notices.len(), 2);
    assert_eq!(
        notices[0].change,
        DataChange::Coils {
            start: 3,
            values: vec![true],
        }
    );
    assert_eq!(
        notices[1].change,
        DataChange::HoldingRegisters {
            start: 0,
            values: vec![5, 6],
        }
    );
    for notice in notices.iter() {
        match notice.origin {
            WriteOrigin::Remote(peer) => assert_eq!(peer.ip(), addr.ip()),
            WriteOrigin::Internal => panic!("wire write reported as internal"),
        }
    }

    server.stop().await;
}

#[tokio::test]
async fn reads_past_the_bank_capacity_produce_exception_two() {
    let bank = Arc::new(DataBank::with_sizes(100, 100, 100, 100));
    let (mut server, addr) = start_server(bank).await;
    let mut client = client_for(addr);

    let err = client.read_coils(95, 10).await.err().unwrap();
    assert_eq!(err, RequestError::Exception(ExceptionCode::IllegalDataAddress));
    assert_eq!(
        client.last_exception(),
        Some(ExceptionCode::IllegalDataAddress)
    );
    // a well-formed exception response is not a transport error
    assert_eq!(client.last_error(), ErrorCode::NoError);
    assert!(client.is_open());

    server.stop().await;
}

#[tokio::test]
async fn unknown_function_codes_produce_exception_one() {
    let bank = Arc::new(DataBank::new());
    let (mut server, addr) = start_server(bank).await;
    let mut client = client_for(addr);

    let err = client.custom_request(&[0x41, 0x00]).await.err().unwrap();
    assert_eq!(err, RequestError::Exception(ExceptionCode::IllegalFunction));
    assert_eq!(client.last_exception(), Some(ExceptionCode::IllegalFunction));

    server.stop().await;
}

#[tokio::test]
async fn custom_requests_return_the_raw_response_pdu() {
    let bank = Arc::new(DataBank::new());
    let (mut server, addr) = start_server(bank.clone()).await;
    let mut client = client_for(addr);

    bank.set_holding_registers(0, &[0x006F], WriteOrigin::Internal)
        .unwrap();

    // read holding registers 0..1 as a raw PDU
    let response = client
        .custom_request(&[0x03, 0x00, 0x00, 0x00, 0x01])
        .await
        .unwrap();
    assert_eq!(response, vec![0x03, 0x02, 0x00, 0x6F]);

    server.stop().await;
}

#[tokio::test]
async fn wire_level_read_holding_registers_echo() {
    let bank = Arc::new(DataBank::new());
    let (mut server, addr) = start_server(bank.clone()).await;

    bank.set_holding_registers(0, &[0, 111, 0, 0], WriteOrigin::Internal)
        .unwrap();

    let mut socket = TcpStream::connect(addr).await.unwrap();
    socket
        .write_all(&[
            0xE7, 0x53, 0x00, 0x00, 0x00, 0x06, 0x01, 0x03, 0x00, 0x00, 0x00, 0x04,
        ])
        .await
        .unwrap();

    let mut response = [0u8; 17];
    socket.read_exact(&mut response).await.unwrap();
    assert_eq!(
        response,
        [
            0xE7, 0x53, 0x00, 0x00, 0x00, 0x0B, 0x01, 0x03, 0x08, 0x00, 0x00, 0x00, 0x6F, 0x00,
            0x00, 0x00, 0x00,
        ]
    );

    server.stop().await;
}

#[tokio::test]
async fn wire_level_illegal_coil_value_produces_exception_three() {
    let bank = Arc::new(DataBank::new());
    let (mut server, addr) = start_server(bank).await;

    let mut socket = TcpStream::connect(addr).await.unwrap();
    socket
        .write_all(&[
            0x00, 0x01, 0x00, 0x00, 0x00, 0x06, 0x01, 0x05, 0x00, 0x0A, 0x12, 0x34,
        ])
        .await
        .unwrap();

    let mut response = [0u8; 9];
    socket.read_exact(&mut response).await.unwrap();
    assert_eq!(
        response,
        [0x00, 0x01, 0x00, 0x00, 0x00, 0x03, 0x01, 0x85, 0x03]
    );

    server.stop().await;
}

#[tokio::test]
async fn malformed_frames_close_the_connection_without_a_response() {
    let bank = Arc::new(DataBank::new());
    let (mut server, addr) = start_server(bank).await;

    let mut socket = TcpStream::connect(addr).await.unwrap();
    // bad protocol id
    socket
        .write_all(&[
            0x00, 0x01, 0xCA, 0xFE, 0x00, 0x06, 0x01, 0x03, 0x00, 0x00, 0x00, 0x01,
        ])
        .await
        .unwrap();

    let mut buffer = [0u8; 16];
    let read = socket.read(&mut buffer).await.unwrap();
    assert_eq!(read, 0, "server must close instead of responding");

    server.stop().await;
}

#[tokio::test]
async fn transaction_id_mismatch_fails_the_request() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut request = [0u8; 12];
        socket.read_exact(&mut request).await.unwrap();

        // echo a valid response with the transaction id incremented by one
        let tx = u16::from_be_bytes([request[0], request[1]]).wrapping_add(1);
        let mut response = tx.to_be_bytes().to_vec();
        response.extend_from_slice(&[0x00, 0x00, 0x00, 0x05, 0x01, 0x03, 0x02, 0x00, 0x00]);
        socket.write_all(&response).await.unwrap();

        // hold the socket open until the client gives up
        let _ = socket.read(&mut [0u8; 1]).await;
    });

    let mut client = client_for(addr);
    let err = client.read_holding_registers(0, 1).await.err().unwrap();
    assert!(
        matches!(
            err,
            RequestError::BadResponse(mbtcp::AduParseError::TxIdMismatch(_, _))
        ),
        "unexpected error: {err:?}"
    );
    assert_eq!(client.last_error(), ErrorCode::Recv);
    assert!(!client.is_open());
}

#[tokio::test]
async fn auto_open_reopens_after_the_peer_drops_the_connection() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    // serve exactly one request per connection, then drop it
    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                return;
            };
            let mut request = [0u8; 12];
            if socket.read_exact(&mut request).await.is_err() {
                continue;
            }
            let mut response = request[0..2].to_vec();
            response.extend_from_slice(&[0x00, 0x00, 0x00, 0x05, 0x01, 0x03, 0x02, 0x00, 0x6F]);
            let _ = socket.write_all(&response).await;
        }
    });

    let mut client = client_for(addr);

    assert_eq!(client.read_holding_registers(0, 1).await.unwrap(), vec![111]);
    assert!(client.is_open());

    // let the FIN from the one-shot server arrive
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(client.read_holding_registers(0, 1).await.unwrap(), vec![111]);
    assert_eq!(client.last_error(), ErrorCode::NoError);
}

#[tokio::test]
async fn timeouts_close_the_socket_to_resynchronize() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut request = [0u8; 12];
        let _ = socket.read_exact(&mut request).await;
        // never respond
        let _ = socket.read(&mut [0u8; 1]).await;
    });

    let mut client = ModbusClient::new(ClientConfig {
        host: addr.ip().to_string(),
        port: addr.port(),
        timeout: Duration::from_millis(200),
        ..Default::default()
    })
    .unwrap();

    let err = client.read_coils(0, 1).await.err().unwrap();
    assert_eq!(err, RequestError::ResponseTimeout);
    assert_eq!(client.last_error(), ErrorCode::Timeout);
    assert!(!client.is_open());
}

#[tokio::test]
async fn auto_close_is_suspended_by_an_explicit_open() {
    let bank = Arc::new(DataBank::new());
    let (mut server, addr) = start_server(bank).await;

    let mut client = ModbusClient::new(ClientConfig {
        host: addr.ip().to_string(),
        port: addr.port(),
        timeout: Duration::from_secs(1),
        auto_close: true,
        ..Default::default()
    })
    .unwrap();

    client.read_coils(0, 1).await.unwrap();
    assert!(!client.is_open(), "auto_close must close after the request");

    client.open().await.unwrap();
    client.read_coils(0, 1).await.unwrap();
    assert!(client.is_open(), "an explicit open is held across requests");

    client.close();
    assert!(!client.is_open());

    server.stop().await;
}

#[tokio::test]
async fn server_lifecycle_is_idempotent() {
    let bank = Arc::new(DataBank::new());
    let mut server =
        ModbusServer::with_handler(loopback_config(), Arc::new(BankDataHandler::new(bank)));

    assert!(!server.is_running());
    server.start().await.unwrap();
    assert!(server.is_running());
    let addr = server.local_addr().unwrap();

    // starting while running does not rebind
    server.start().await.unwrap();
    assert_eq!(server.local_addr(), Some(addr));

    let mut client = client_for(addr);
    client.read_coils(0, 1).await.unwrap();

    server.stop().await;
    assert!(!server.is_running());
    server.stop().await;

    // requests against the stopped server fail to connect
    let mut closed_client = client_for(addr);
    assert!(closed_client.read_coils(0, 1).await.is_err());
    assert!(matches!(
        closed_client.last_error(),
        ErrorCode::Connect | ErrorCode::Recv
    ));

    // the server can be started again after a stop
    server.start().await.unwrap();
    assert!(server.is_running());
    server.stop().await;
}

#[tokio::test]
async fn changing_the_endpoint_closes_the_connection() {
    let bank = Arc::new(DataBank::new());
    let (mut server, addr) = start_server(bank).await;
    let mut client = client_for(addr);

    client.open().await.unwrap();
    assert!(client.is_open());

    client.set_port(addr.port().wrapping_add(1).max(1)).unwrap();
    assert!(!client.is_open());

    server.stop().await;
}
