//! Circuit-level integration tests driving real `TcpListener`/`TcpStream`
//! sockets end to end: a synthetic 3-relay chain plus a plain TCP origin,
//! with no directory HTTP round trip (the `NodeList` is built by hand).

use pq_ntor::client::CircuitBuilder;
use pq_ntor::config::Mode;
use pq_ntor::node::{NodeInfo, NodeList, NodeRole};
use pq_ntor::relay::{RelayNode, Role};
use pq_ntor_core::cell::RelayCell;
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::Arc;
use std::time::Duration;

/// Spawn one relay hop on an OS-assigned port and return its port plus the
/// 20-byte identity it was given.
fn spawn_relay(role: Role, identity: [u8; 20]) -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let node = Arc::new(RelayNode::new(
        role,
        identity,
        Mode::Pq,
        "127.0.0.1".to_string(),
        1,
    ));
    std::thread::spawn(move || {
        let _ = node.run(listener);
    });
    port
}

fn synthetic_nodes() -> (NodeList, u16, u16, u16) {
    let guard_port = spawn_relay(Role::Guard, [0x01u8; 20]);
    let middle_port = spawn_relay(Role::Middle, [0x02u8; 20]);
    let exit_port = spawn_relay(Role::Exit, [0x03u8; 20]);

    let mut nodes = NodeList::default();
    nodes.guards.push(NodeInfo {
        hostname: "127.0.0.1".into(),
        port: guard_port,
        role: NodeRole::Guard,
        identity: [0x01u8; 20],
    });
    nodes.middles.push(NodeInfo {
        hostname: "127.0.0.1".into(),
        port: middle_port,
        role: NodeRole::Middle,
        identity: [0x02u8; 20],
    });
    nodes.exits.push(NodeInfo {
        hostname: "127.0.0.1".into(),
        port: exit_port,
        role: NodeRole::Exit,
        identity: [0x03u8; 20],
    });

    // Give each accept loop a moment to start listening before the client
    // dials in.
    std::thread::sleep(Duration::from_millis(50));
    (nodes, guard_port, middle_port, exit_port)
}

/// Scenario C: 3-hop circuit build against a synthetic directory.
#[test]
fn three_hop_circuit_builds_and_layers_match() {
    let (nodes, _, _, _) = synthetic_nodes();
    let builder = CircuitBuilder::new(Mode::Pq);
    let circuit = builder.build_circuit(&nodes).unwrap();

    assert!(circuit.established);
    assert_eq!(circuit.layer_count(), 3);
    assert!(circuit.middle.is_some());
    assert!(circuit.exit.is_some());
}

/// A bare TCP origin: accepts one connection, replies with a canned HTTP
/// response, keeps the connection open until the peer closes it.
fn spawn_http_origin() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    std::thread::spawn(move || {
        if let Ok((mut stream, _)) = listener.accept() {
            let mut buf = [0u8; 1024];
            let _ = stream.read(&mut buf);
            let _ = stream.write_all(b"HTTP/1.0 200 OK\r\nContent-Length: 3\r\n\r\nOK\n");
        }
    });
    port
}

/// Scenario D: HTTP through the circuit.
#[test]
fn http_request_round_trips_through_circuit() {
    let (nodes, _, _, _) = synthetic_nodes();
    let origin_port = spawn_http_origin();
    std::thread::sleep(Duration::from_millis(50));

    let builder = CircuitBuilder::new(Mode::Pq);
    let mut circuit = builder.build_circuit(&nodes).unwrap();

    builder.begin_stream(&mut circuit, "127.0.0.1", origin_port).unwrap();
    builder
        .send_data(&mut circuit, b"GET / HTTP/1.0\r\nHost: 127.0.0.1\r\n\r\n")
        .unwrap();

    let mut received = Vec::new();
    let mut buf = [0u8; 4096];
    loop {
        let n = builder.recv_data(&mut circuit, &mut buf).unwrap();
        if n == 0 {
            break;
        }
        received.extend_from_slice(&buf[..n]);
        if received.len() >= b"HTTP/1.0 200 OK\r\nContent-Length: 3\r\n\r\nOK\n".len() {
            break;
        }
    }

    let text = String::from_utf8_lossy(&received);
    assert!(text.starts_with("HTTP/1.0 200"), "got: {text}");
    assert!(text.contains("OK"));
}

/// Scenario E: closing the Guard fd tears the circuit down. We can't
/// inspect a relay's private circuit table from outside, so the
/// observable proxy is that the Guard relay keeps accepting and servicing
/// fresh circuits afterward rather than wedging.
#[test]
fn dropping_circuit_does_not_wedge_the_guard() {
    let (nodes, _, _, _) = synthetic_nodes();
    let builder = CircuitBuilder::new(Mode::Pq);

    {
        let circuit = builder.build_circuit(&nodes).unwrap();
        assert!(circuit.established);
    } // Circuit, and its Guard TcpStream, drop here -> DESTROY-equivalent close.

    std::thread::sleep(Duration::from_millis(50));

    let second = builder.build_circuit(&nodes).unwrap();
    assert!(second.established);
    assert_eq!(second.layer_count(), 3);
}

/// A bare TCP echo target: echoes back every byte it reads until the
/// client side closes the connection.
fn spawn_echo_target() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    std::thread::spawn(move || {
        if let Ok((mut stream, _)) = listener.accept() {
            let mut buf = [0u8; 4096];
            loop {
                match stream.read(&mut buf) {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        if stream.write_all(&buf[..n]).is_err() {
                            break;
                        }
                    }
                }
            }
        }
    });
    port
}

/// Scenario F: RELAY_DATA fragmentation. A payload of
/// `3 * (payload_len - 11) + 7` bytes must fragment into exactly 4 cells
/// and reassemble byte-for-byte at the far end.
#[test]
fn oversized_payload_fragments_into_four_cells_and_reassembles() {
    let (nodes, _, _, _) = synthetic_nodes();
    let echo_port = spawn_echo_target();
    std::thread::sleep(Duration::from_millis(50));

    let builder = CircuitBuilder::new(Mode::Pq);
    let mut circuit = builder.build_circuit(&nodes).unwrap();
    builder.begin_stream(&mut circuit, "127.0.0.1", echo_port).unwrap();

    let payload_len = 3 * RelayCell::MAX_DATA_LEN + 7;
    let payload: Vec<u8> = (0..payload_len).map(|i| (i % 251) as u8).collect();
    assert_eq!(payload.chunks(RelayCell::MAX_DATA_LEN).count(), 4);

    builder.send_data(&mut circuit, &payload).unwrap();

    let mut received = Vec::with_capacity(payload_len);
    let mut buf = vec![0u8; RelayCell::MAX_DATA_LEN];
    while received.len() < payload_len {
        let n = builder.recv_data(&mut circuit, &mut buf).unwrap();
        if n == 0 {
            break;
        }
        received.extend_from_slice(&buf[..n]);
    }

    assert_eq!(received, payload);
}
