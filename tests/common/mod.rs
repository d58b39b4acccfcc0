//! A scripted single-connection STOMP broker for integration tests.
//!
//! The broker runs on a plain thread with a blocking socket, records every
//! frame the client sends, and answers according to a `Script`.

#![allow(dead_code)]

use bytes::BytesMut;
use iridium_worker::Frame;
use iridium_worker::codec::{StompCodec, StompItem};
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tokio_util::codec::{Decoder, Encoder};

/// How the mock broker behaves.
#[derive(Debug, Clone)]
pub struct Script {
    /// `version` header of CONNECTED.
    pub version: &'static str,
    /// `heart-beat` header of CONNECTED.
    pub heartbeat: &'static str,
    /// Answer the handshake with this ERROR message instead of CONNECTED.
    pub reject_connect: Option<&'static str>,
    /// Answer SUBSCRIBE with this ERROR message instead of a RECEIPT.
    pub reject_subscribe: Option<&'static str>,
    /// Never confirm SUBSCRIBE and deliver nothing.
    pub ignore_subscribe: bool,
    /// Bodies delivered right after the subscription is confirmed.
    pub bodies: Vec<String>,
}

impl Script {
    pub fn delivering(bodies: &[&str]) -> Self {
        Self {
            version: "1.2",
            heartbeat: "0,0",
            reject_connect: None,
            reject_subscribe: None,
            ignore_subscribe: false,
            bodies: bodies.iter().map(|b| b.to_string()).collect(),
        }
    }
}

pub struct MockBroker {
    pub addr: String,
    handle: JoinHandle<Vec<Frame>>,
}

impl MockBroker {
    /// Bind to an ephemeral port and serve exactly one client.
    pub fn start(script: Script) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind mock broker");
        let addr = listener.local_addr().unwrap().to_string();
        let handle = thread::spawn(move || {
            let (stream, _) = listener.accept().expect("accept client");
            serve(stream, script)
        });
        Self { addr, handle }
    }

    /// Wait for the session to end and return every frame the client sent.
    pub fn frames(self) -> Vec<Frame> {
        self.handle.join().expect("mock broker panicked")
    }
}

/// Commands of the recorded frames, in order.
pub fn commands(frames: &[Frame]) -> Vec<&str> {
    frames.iter().map(|f| f.command.as_str()).collect()
}

/// Frames with the given command, in order.
pub fn with_command<'a>(frames: &'a [Frame], command: &str) -> Vec<&'a Frame> {
    frames.iter().filter(|f| f.command == command).collect()
}

struct Wire {
    stream: TcpStream,
    buf: BytesMut,
    codec: StompCodec,
}

impl Wire {
    fn read_frame(&mut self) -> Option<Frame> {
        loop {
            match self.codec.decode(&mut self.buf) {
                Ok(Some(StompItem::Frame(f))) => return Some(f),
                Ok(Some(StompItem::Heartbeat)) => continue,
                Ok(None) => {}
                Err(_) => return None,
            }
            let mut chunk = [0u8; 4096];
            match self.stream.read(&mut chunk) {
                Ok(0) | Err(_) => return None,
                Ok(n) => self.buf.extend_from_slice(&chunk[..n]),
            }
        }
    }

    fn write(&mut self, frame: Frame) {
        let mut out = BytesMut::new();
        self.codec
            .encode(StompItem::Frame(frame), &mut out)
            .expect("encode");
        self.stream.write_all(&out).expect("write to client");
        self.stream.flush().expect("flush");
    }
}

fn serve(stream: TcpStream, script: Script) -> Vec<Frame> {
    stream
        .set_read_timeout(Some(Duration::from_secs(10)))
        .unwrap();
    let mut wire = Wire {
        stream,
        buf: BytesMut::new(),
        codec: StompCodec::new(),
    };
    let mut seen = Vec::new();

    while let Some(frame) = wire.read_frame() {
        seen.push(frame.clone());
        match frame.command.as_str() {
            "STOMP" | "CONNECT" => {
                if let Some(message) = script.reject_connect {
                    wire.write(
                        Frame::new("ERROR")
                            .header("message", message)
                            .set_body(b"bad credentials".to_vec()),
                    );
                    break;
                }
                wire.write(
                    Frame::new("CONNECTED")
                        .header("version", script.version)
                        .header("heart-beat", script.heartbeat)
                        .header("server", "mock/1.0")
                        .header("session", "s-1"),
                );
            }
            "SUBSCRIBE" if script.ignore_subscribe => {}
            "SUBSCRIBE" => {
                let receipt = frame.get_header("receipt").map(str::to_string);
                if let Some(message) = script.reject_subscribe {
                    let mut error = Frame::new("ERROR").header("message", message);
                    if let Some(id) = receipt {
                        error = error.header("receipt-id", id);
                    }
                    wire.write(error);
                    continue;
                }
                if let Some(id) = receipt {
                    wire.write(Frame::new("RECEIPT").header("receipt-id", id));
                }
                let sub = frame.get_header("id").unwrap_or_default().to_string();
                let dest = frame.get_header("destination").unwrap_or_default().to_string();
                for (i, body) in script.bodies.iter().enumerate() {
                    wire.write(
                        Frame::new("MESSAGE")
                            .header("subscription", &sub)
                            .header("message-id", format!("m{}", i + 1))
                            .header("ack", format!("a{}", i + 1))
                            .header("destination", &dest)
                            .set_body(body.as_bytes().to_vec()),
                    );
                }
            }
            "DISCONNECT" => {
                if let Some(id) = frame.get_header("receipt") {
                    wire.write(Frame::new("RECEIPT").header("receipt-id", id));
                }
                break;
            }
            _ => {}
        }
    }
    seen
}
