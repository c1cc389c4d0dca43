//! In-process Modbus TCP unit for integration tests.
//!
//! Speaks MBAP framing for function codes 0x01 (read coils) and
//! 0x05 (write single coil) over a table of 9999 coils.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

const READ_COILS: u8 = 0x01;
const WRITE_SINGLE_COIL: u8 = 0x05;

const ILLEGAL_FUNCTION: u8 = 0x01;
const ILLEGAL_DATA_ADDRESS: u8 = 0x02;
const ILLEGAL_DATA_VALUE: u8 = 0x03;
const SERVER_DEVICE_FAILURE: u8 = 0x04;

/// How the device answers requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Behavior {
    /// Answer every request once.
    Normal,
    /// Read requests but never answer.
    Silent,
    /// Like `Normal`, but resend every read response shortly after.
    StaleEcho,
    /// Answer reads with a single data byte whatever the count.
    ShortRead,
    /// Apply writes but echo the opposite value.
    WrongEcho,
}

struct State {
    coils: Mutex<Vec<bool>>,
    requests: AtomicUsize,
    failing_reads: AtomicUsize,
}

pub struct TestDevice {
    addr: SocketAddr,
    state: Arc<State>,
    task: JoinHandle<()>,
}

impl TestDevice {
    pub async fn spawn() -> Self {
        Self::spawn_with(Behavior::Normal).await
    }

    pub async fn spawn_with(behavior: Behavior) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind test device");
        let addr = listener.local_addr().expect("test device address");
        let state = Arc::new(State {
            coils: Mutex::new(vec![false; 9999]),
            requests: AtomicUsize::new(0),
            failing_reads: AtomicUsize::new(0),
        });

        let task = tokio::spawn(serve(listener, state.clone(), behavior));

        Self { addr, state, task }
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Set a coil by zero-based protocol address.
    pub fn set_coil(&self, address: u16, value: bool) {
        self.state.coils.lock().unwrap()[address as usize] = value;
    }

    /// Get a coil by zero-based protocol address.
    pub fn coil(&self, address: u16) -> bool {
        self.state.coils.lock().unwrap()[address as usize]
    }

    /// Requests received so far.
    pub fn requests(&self) -> usize {
        self.state.requests.load(Ordering::SeqCst)
    }

    /// Answer the next `n` read requests with a device failure exception.
    pub fn fail_next_reads(&self, n: usize) {
        self.state.failing_reads.store(n, Ordering::SeqCst);
    }
}

impl Drop for TestDevice {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn serve(listener: TcpListener, state: Arc<State>, behavior: Behavior) {
    while let Ok((stream, _)) = listener.accept().await {
        tokio::spawn(handle(stream, state.clone(), behavior));
    }
}

async fn handle(mut stream: TcpStream, state: Arc<State>, behavior: Behavior) {
    loop {
        // transaction id, protocol id, length, unit id
        let mut header = [0u8; 7];
        if stream.read_exact(&mut header).await.is_err() {
            return;
        }
        let length = u16::from_be_bytes([header[4], header[5]]) as usize;
        if length < 2 {
            return;
        }
        let mut pdu = vec![0u8; length - 1];
        if stream.read_exact(&mut pdu).await.is_err() {
            return;
        }
        state.requests.fetch_add(1, Ordering::SeqCst);

        if behavior == Behavior::Silent {
            continue;
        }

        let response = distort(respond(&state, &pdu), behavior);
        let mut frame = Vec::with_capacity(7 + response.len());
        frame.extend_from_slice(&header[..4]);
        frame.extend_from_slice(&((response.len() + 1) as u16).to_be_bytes());
        frame.push(header[6]);
        frame.extend_from_slice(&response);

        if stream.write_all(&frame).await.is_err() {
            return;
        }

        if behavior == Behavior::StaleEcho && pdu[0] == READ_COILS {
            tokio::time::sleep(Duration::from_millis(20)).await;
            if stream.write_all(&frame).await.is_err() {
                return;
            }
        }
    }
}

fn distort(mut response: Vec<u8>, behavior: Behavior) -> Vec<u8> {
    match (behavior, response[0]) {
        (Behavior::ShortRead, READ_COILS) => {
            response.truncate(3);
            response[1] = 1;
        }
        (Behavior::WrongEcho, WRITE_SINGLE_COIL) => {
            response[3] ^= 0xFF;
        }
        _ => {}
    }
    response
}

fn exception(function: u8, code: u8) -> Vec<u8> {
    vec![function | 0x80, code]
}

fn respond(state: &State, pdu: &[u8]) -> Vec<u8> {
    let function = pdu[0];
    if pdu.len() < 5 {
        return exception(function, ILLEGAL_DATA_VALUE);
    }
    let address = u16::from_be_bytes([pdu[1], pdu[2]]) as usize;
    let operand = u16::from_be_bytes([pdu[3], pdu[4]]);

    match function {
        READ_COILS => {
            let failing = state
                .failing_reads
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
            if failing.is_ok() {
                return exception(function, SERVER_DEVICE_FAILURE);
            }

            let count = operand as usize;
            let coils = state.coils.lock().unwrap();
            if count == 0 || address + count > coils.len() {
                return exception(function, ILLEGAL_DATA_ADDRESS);
            }

            let mut bytes = vec![0u8; count.div_ceil(8)];
            for (i, coil) in coils[address..address + count].iter().enumerate() {
                if *coil {
                    bytes[i / 8] |= 1 << (i % 8);
                }
            }

            let mut response = vec![function, bytes.len() as u8];
            response.extend_from_slice(&bytes);
            response
        }
        WRITE_SINGLE_COIL => {
            let value = match operand {
                0xFF00 => true,
                0x0000 => false,
                _ => return exception(function, ILLEGAL_DATA_VALUE),
            };

            let mut coils = state.coils.lock().unwrap();
            if address >= coils.len() {
                return exception(function, ILLEGAL_DATA_ADDRESS);
            }
            coils[address] = value;

            // Echo of the request
            pdu[..5].to_vec()
        }
        _ => exception(function, ILLEGAL_FUNCTION),
    }
}
