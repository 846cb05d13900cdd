//! Socket-level tests driving a real `Server` over a loopback connection.
//!
//! Each test binds to port 0 and recovers the OS-assigned address through
//! the `serving` callback, the way a caller would learn it in production.

use std::io::{Read, Write};
use std::net::TcpStream;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use flux_resp::{Callbacks, Server};

fn spawn_echo_server() -> String {
    let (tx, rx) = mpsc::channel();
    let callbacks = Callbacks::<()>::new()
        .on_serving(move |addrs| {
            tx.send(addrs[0].clone()).unwrap();
        })
        .on_command(|conn, args| {
            if args[0].eq_ignore_ascii_case(b"echo") && args.len() == 2 {
                conn.write_bulk(Some(&args[1]));
            } else if args[0].eq_ignore_ascii_case(b"ping") {
                conn.write_status("PONG");
            } else {
                conn.write_error("ERR unknown command");
            }
        });
    let server = Server::<()>::new(["127.0.0.1:0"]).with_callbacks(callbacks);
    thread::spawn(move || {
        server.run().unwrap();
    });
    rx.recv_timeout(Duration::from_secs(2)).unwrap().trim_start_matches("tcp://").to_string()
}

fn read_reply(stream: &mut TcpStream, expect_len: usize) -> Vec<u8> {
    let mut buf = vec![0u8; expect_len];
    let mut read = 0;
    stream.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
    while read < expect_len {
        let n = stream.read(&mut buf[read..]).unwrap();
        assert!(n > 0, "connection closed early");
        read += n;
    }
    buf
}

#[test]
fn resp_command_round_trips() {
    let addr = spawn_echo_server();
    let mut stream = TcpStream::connect(addr).unwrap();
    stream.write_all(b"*2\r\n$4\r\nECHO\r\n$5\r\nhello\r\n").unwrap();
    let reply = read_reply(&mut stream, b"$5\r\nhello\r\n".len());
    assert_eq!(reply, b"$5\r\nhello\r\n");
}

#[test]
fn inline_command_round_trips() {
    let addr = spawn_echo_server();
    let mut stream = TcpStream::connect(addr).unwrap();
    stream.write_all(b"ping\n").unwrap();
    let reply = read_reply(&mut stream, b"+PONG\r\n".len());
    assert_eq!(reply, b"+PONG\r\n");
}

#[test]
fn fragmented_resp_command_still_dispatches() {
    let addr = spawn_echo_server();
    let mut stream = TcpStream::connect(addr).unwrap();
    let whole = b"*2\r\n$4\r\nECHO\r\n$2\r\nhi\r\n";
    stream.write_all(&whole[..6]).unwrap();
    thread::sleep(Duration::from_millis(50));
    stream.write_all(&whole[6..]).unwrap();
    let reply = read_reply(&mut stream, b"$2\r\nhi\r\n".len());
    assert_eq!(reply, b"$2\r\nhi\r\n");
}

#[test]
fn quit_replies_ok_then_closes_connection() {
    let addr = spawn_echo_server();
    let mut stream = TcpStream::connect(addr).unwrap();
    stream.write_all(b"quit\r\n").unwrap();
    let reply = read_reply(&mut stream, b"+OK\r\n".len());
    assert_eq!(reply, b"+OK\r\n");
    let mut rest = [0u8; 8];
    stream.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
    let n = stream.read(&mut rest).unwrap();
    assert_eq!(n, 0, "server should have closed the connection after quit");
}

#[test]
fn protocol_error_writes_error_then_closes_connection() {
    let addr = spawn_echo_server();
    let mut stream = TcpStream::connect(addr).unwrap();
    stream.write_all(b"*-5\r\n").unwrap();
    let expected = b"-ERR Protocol error: invalid multibulk length\r\n";
    let reply = read_reply(&mut stream, expected.len());
    assert_eq!(reply, expected);
    let mut rest = [0u8; 8];
    let n = stream.read(&mut rest).unwrap();
    assert_eq!(n, 0);
}

#[test]
fn telnet_with_quoted_argument_round_trips() {
    let addr = spawn_echo_server();
    let mut stream = TcpStream::connect(addr).unwrap();
    stream.write_all(b"echo \"hello world\"\n").unwrap();
    let reply = read_reply(&mut stream, b"$11\r\nhello world\r\n".len());
    assert_eq!(reply, b"$11\r\nhello world\r\n");
}

#[test]
fn unknown_command_gets_an_error_reply_and_stays_connected() {
    let addr = spawn_echo_server();
    let mut stream = TcpStream::connect(addr).unwrap();
    stream.write_all(b"*1\r\n$7\r\nBOGUSOP\r\n").unwrap();
    let reply = read_reply(&mut stream, b"-ERR unknown command\r\n".len());
    assert_eq!(reply, b"-ERR unknown command\r\n");
    stream.write_all(b"ping\n").unwrap();
    let reply = read_reply(&mut stream, b"+PONG\r\n".len());
    assert_eq!(reply, b"+PONG\r\n");
}
