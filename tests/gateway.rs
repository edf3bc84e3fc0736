use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use neasmart_gateway::{dpt9001, http};
use neasmart_gateway::facade::{Facade, ZoneUpdate};
use neasmart_gateway::server::{self, Server};
use neasmart_gateway::slave::{HoldingRegistersRequest, NeaSmartHandler, RequestHandler as _};
use neasmart_gateway::store::{Bank, RegisterStore};
use tokio::io::{AsyncReadExt as _, AsyncWriteExt as _};
use tokio::net::TcpStream;
use tower::util::ServiceExt as _;

const UNIT: u8 = 240;

async fn start(
    store: Arc<RegisterStore>,
    max_clients: usize,
    client_timeout: Duration,
) -> SocketAddr {
    let args = server::Args {
        modbus_listen: "127.0.0.1:0".to_string(),
        unit_id: UNIT,
        max_clients,
        client_timeout: client_timeout.into(),
    };
    let handler = Arc::new(NeaSmartHandler::new(store, UNIT));
    let server = Server::bind(&args, handler).await.unwrap();
    let address = server.local_addr().unwrap();
    tokio::spawn(server.run());
    address
}

fn frame(transaction_id: u16, unit_id: u8, pdu: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(7 + pdu.len());
    frame.extend(transaction_id.to_be_bytes());
    frame.extend([0u8, 0]);
    frame.extend((pdu.len() as u16 + 1).to_be_bytes());
    frame.push(unit_id);
    frame.extend(pdu);
    frame
}

/// Returns the transaction id, unit id and PDU of the next response.
async fn response(stream: &mut TcpStream) -> (u16, u8, Vec<u8>) {
    let mut header = [0u8; 7];
    stream.read_exact(&mut header).await.unwrap();
    assert_eq!(&header[2..4], &[0, 0], "protocol id");
    let length = u16::from_be_bytes([header[4], header[5]]);
    let mut pdu = vec![0u8; usize::from(length) - 1];
    stream.read_exact(&mut pdu).await.unwrap();
    (u16::from_be_bytes([header[0], header[1]]), header[6], pdu)
}

async fn exchange(stream: &mut TcpStream, transaction_id: u16, pdu: &[u8]) -> Vec<u8> {
    stream.write_all(&frame(transaction_id, UNIT, pdu)).await.unwrap();
    let (tid, unit_id, pdu) = response(stream).await;
    assert_eq!(tid, transaction_id);
    assert_eq!(unit_id, UNIT);
    pdu
}

fn read_holdings(address: u16, count: u16) -> Vec<u8> {
    let mut pdu = vec![3];
    pdu.extend(address.to_be_bytes());
    pdu.extend(count.to_be_bytes());
    pdu
}

fn write_holdings(address: u16, values: &[u16]) -> Vec<u8> {
    let mut pdu = vec![16];
    pdu.extend(address.to_be_bytes());
    pdu.extend((values.len() as u16).to_be_bytes());
    pdu.push((values.len() * 2) as u8);
    for value in values {
        pdu.extend(value.to_be_bytes());
    }
    pdu
}

fn registers(pdu: &[u8]) -> Vec<u16> {
    assert_eq!(pdu[0], 3);
    assert_eq!(usize::from(pdu[1]), pdu.len() - 2);
    pdu[2..].chunks(2).map(|c| u16::from_be_bytes([c[0], c[1]])).collect()
}

#[tokio::test]
async fn controller_writes_reach_the_facade() {
    let store = Arc::new(RegisterStore::new());
    let facade = Facade::new(Arc::clone(&store));
    let address = start(Arc::clone(&store), 5, Duration::from_secs(30)).await;
    let mut stream = TcpStream::connect(address).await.unwrap();

    let values = [2, dpt9001::encode(21.5), dpt9001::encode(20.0)];
    let ack = exchange(&mut stream, 1, &write_holdings(300, &values)).await;
    assert_eq!(ack, [16, 0x01, 0x2C, 0x00, 0x03]);

    let zone = facade.zone(1, 3).unwrap();
    assert_eq!(zone.state, 2);
    assert_eq!(zone.setpoint, 21.5);
    assert_eq!(zone.temperature, 20.0);

    let read = exchange(&mut stream, 2, &read_holdings(300, 3)).await;
    assert_eq!(registers(&read), [0, 0, 0]);
}

#[tokio::test]
async fn facade_commands_reach_the_controller() {
    let store = Arc::new(RegisterStore::new());
    let facade = Facade::new(Arc::clone(&store));
    let address = start(Arc::clone(&store), 5, Duration::from_secs(30)).await;
    let mut stream = TcpStream::connect(address).await.unwrap();

    let update = ZoneUpdate { state: Some(2), setpoint: Some(21.5) };
    facade.update_zone(1, 3, &update).unwrap();
    let request = axum::http::Request::builder()
        .method("POST")
        .uri("/mode")
        .header("content-type", "application/json")
        .body(axum::body::Body::from(r#"{"mode": 4}"#))
        .unwrap();
    let response = http::router(facade.clone()).oneshot(request).await.unwrap();
    assert_eq!(response.status(), axum::http::StatusCode::ACCEPTED);

    let read = exchange(&mut stream, 7, &read_holdings(300, 2)).await;
    assert_eq!(registers(&read), [2, 0x0C33]);
    let read = exchange(&mut stream, 8, &read_holdings(1, 1)).await;
    assert_eq!(registers(&read), [4]);
    assert_eq!(facade.zone(1, 3).unwrap().setpoint, 0.0);
    assert_eq!(facade.mode().mode, 0);
}

#[tokio::test]
async fn single_register_write_is_echoed() {
    let store = Arc::new(RegisterStore::new());
    let address = start(Arc::clone(&store), 5, Duration::from_secs(30)).await;
    let mut stream = TcpStream::connect(address).await.unwrap();
    let ack = exchange(&mut stream, 3, &[6, 0x00, 0x07, 0x85, 0xDA]).await;
    assert_eq!(ack, [6, 0x00, 0x07, 0x85, 0xDA]);
    assert_eq!(store.lock().get(Bank::Mirror, 7), 0x85DA);
}

#[tokio::test]
async fn exceptions() {
    let store = Arc::new(RegisterStore::new());
    let address = start(store, 5, Duration::from_secs(30)).await;
    let mut stream = TcpStream::connect(address).await.unwrap();
    // Input registers.
    assert_eq!(exchange(&mut stream, 1, &[4, 0, 0, 0, 1]).await, [0x84, 1]);
    // Coils.
    assert_eq!(exchange(&mut stream, 2, &[1, 0, 0, 0, 1]).await, [0x81, 1]);
    // Unknown function.
    assert_eq!(exchange(&mut stream, 3, &[0x2B, 0x0E, 0x01, 0x00]).await, [0xAB, 1]);
    assert_eq!(exchange(&mut stream, 4, &read_holdings(0xFFFF, 2)).await, [0x83, 2]);
    assert_eq!(exchange(&mut stream, 5, &read_holdings(0, 0)).await, [0x83, 3]);
    assert_eq!(exchange(&mut stream, 6, &read_holdings(0, 126)).await, [0x83, 3]);
    // The connection survives all of the above.
    assert_eq!(registers(&exchange(&mut stream, 7, &read_holdings(0, 1)).await), [0]);
}

#[tokio::test]
async fn other_units_get_no_response() {
    let store = Arc::new(RegisterStore::new());
    let address = start(Arc::clone(&store), 5, Duration::from_secs(30)).await;
    let mut stream = TcpStream::connect(address).await.unwrap();
    stream.write_all(&frame(1, 17, &write_holdings(7, &[5]))).await.unwrap();
    stream.write_all(&frame(1, 17, &read_holdings(0, 0))).await.unwrap();
    stream.write_all(&frame(1, 17, &[0x2B, 0x0E, 0x01, 0x00])).await.unwrap();
    stream.write_all(&frame(1, 17, &[4, 0, 0, 0, 1])).await.unwrap();
    let mut byte = [0u8; 1];
    let silence = tokio::time::timeout(Duration::from_millis(200), stream.read(&mut byte)).await;
    assert!(silence.is_err(), "got a response for another unit");
    assert_eq!(store.lock().get(Bank::Mirror, 7), 0);

    stream.write_all(&frame(2, 0, &write_holdings(7, &[5]))).await.unwrap();
    let (tid, unit_id, pdu) = response(&mut stream).await;
    assert_eq!((tid, unit_id), (2, 0));
    assert_eq!(pdu, [16, 0, 7, 0, 1]);
    assert_eq!(store.lock().get(Bank::Mirror, 7), 5);
}

#[tokio::test]
async fn connections_beyond_the_limit_are_closed() {
    let store = Arc::new(RegisterStore::new());
    let address = start(store, 1, Duration::from_secs(30)).await;
    let mut first = TcpStream::connect(address).await.unwrap();
    exchange(&mut first, 1, &read_holdings(0, 1)).await;

    let mut second = TcpStream::connect(address).await.unwrap();
    let mut byte = [0u8; 1];
    let closed =
        tokio::time::timeout(Duration::from_secs(5), second.read(&mut byte)).await.unwrap();
    assert!(matches!(closed, Ok(0) | Err(_)), "{closed:?}");

    exchange(&mut first, 2, &read_holdings(0, 1)).await;
}

#[tokio::test]
async fn idle_connections_are_closed() {
    let store = Arc::new(RegisterStore::new());
    let address = start(store, 1, Duration::from_millis(100)).await;
    let mut idle = TcpStream::connect(address).await.unwrap();
    let mut byte = [0u8; 1];
    let closed = tokio::time::timeout(Duration::from_secs(5), idle.read(&mut byte)).await.unwrap();
    assert!(matches!(closed, Ok(0) | Err(_)), "{closed:?}");

    // The slot is released again.
    tokio::time::sleep(Duration::from_millis(200)).await;
    let mut next = TcpStream::connect(address).await.unwrap();
    exchange(&mut next, 1, &read_holdings(0, 1)).await;
}

#[test]
fn block_writes_are_never_torn() {
    let store = Arc::new(RegisterStore::new());
    let handler = NeaSmartHandler::new(Arc::clone(&store), UNIT);
    std::thread::scope(|scope| {
        for writer in 0..4u16 {
            let handler = &handler;
            scope.spawn(move || {
                for round in 0..500u16 {
                    let value = writer * 1000 + round;
                    let req = HoldingRegistersRequest {
                        unit_id: UNIT,
                        is_write: true,
                        address: 100,
                        quantity: 4,
                        args: vec![value; 4],
                    };
                    handler.handle_holding_registers(&req).unwrap();
                }
            });
        }
        for _ in 0..2 {
            let store = &store;
            scope.spawn(move || {
                for _ in 0..2000 {
                    let banks = store.lock();
                    let first = banks.get(Bank::Mirror, 100);
                    for address in 101..104 {
                        assert_eq!(banks.get(Bank::Mirror, address), first);
                    }
                }
            });
        }
    });
}
