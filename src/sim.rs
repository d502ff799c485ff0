//! In-process loopback simulator (spec.md §1, §6): realizes the UDP, TCP,
//! and HTTP wire contracts closely enough to exercise the core end-to-end
//! without hardware. Test-only — never linked into a release binary.

use std::net::SocketAddr;

use byteorder::{BigEndian, ByteOrder};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, UdpSocket};
use tokio::task::JoinHandle;

use crate::wire::request::REQUEST_LEN;
use crate::wire::response::RESPONSE_LEN;
use crate::wire::tcp::{CAL_RESPONSE_HEADER, CAL_RESPONSE_LEN, TCP_REQUEST_LEN};

/// UDP sensor simulator: on a start-infinite request, streams `sequences` as
/// fixed-count response frames and then idles; on a stop request, exits.
pub struct UdpSimulator {
    pub addr: SocketAddr,
    task: JoinHandle<()>,
}

impl UdpSimulator {
    pub async fn spawn(sequences: Vec<u32>, counts: [i32; 6]) -> Self {
        Self::spawn_paced(sequences, counts, std::time::Duration::ZERO).await
    }

    /// Like `spawn`, but sleeps `inter_frame` between datagrams — useful for
    /// scenarios that need wall-clock spread between samples (e.g. forcing a
    /// writer's flush interval to elapse mid-stream).
    pub async fn spawn_paced(sequences: Vec<u32>, counts: [i32; 6], inter_frame: std::time::Duration) -> Self {
        let socket = UdpSocket::bind("127.0.0.1:0").await.expect("bind sim udp socket");
        let addr = socket.local_addr().expect("sim udp socket has a local addr");

        let task = tokio::spawn(async move {
            let mut buf = [0u8; REQUEST_LEN];
            loop {
                let (n, peer) = match socket.recv_from(&mut buf).await {
                    Ok(v) => v,
                    Err(_) => break,
                };
                if n < 4 {
                    continue;
                }
                match BigEndian::read_u16(&buf[2..4]) {
                    0x0002 => {
                        for (i, seq) in sequences.iter().enumerate() {
                            let mut frame = [0u8; RESPONSE_LEN];
                            BigEndian::write_u32(&mut frame[0..4], *seq);
                            BigEndian::write_u32(&mut frame[4..8], i as u32);
                            BigEndian::write_u32(&mut frame[8..12], 0);
                            for (c, v) in counts.iter().enumerate() {
                                let off = 12 + c * 4;
                                BigEndian::write_i32(&mut frame[off..off + 4], *v);
                            }
                            if socket.send_to(&frame, peer).await.is_err() {
                                break;
                            }
                            if !inter_frame.is_zero() {
                                tokio::time::sleep(inter_frame).await;
                            }
                        }
                    }
                    0x0000 => break,
                    _ => {}
                }
            }
        });

        Self { addr, task }
    }

    pub fn stop(self) {
        self.task.abort();
    }
}

/// TCP command-channel simulator: answers READCALINFO with a fixed cpf/cpt
/// and acknowledges bias/write-transform frames by simply accepting them.
pub struct TcpSimulator {
    pub addr: SocketAddr,
    task: JoinHandle<()>,
}

impl TcpSimulator {
    pub async fn spawn(cpf: u32, cpt: u32) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind sim tcp listener");
        let addr = listener.local_addr().expect("sim tcp listener has a local addr");

        let task = tokio::spawn(async move {
            loop {
                let (mut stream, _) = match listener.accept().await {
                    Ok(v) => v,
                    Err(_) => break,
                };
                let mut req = [0u8; TCP_REQUEST_LEN];
                if stream.read_exact(&mut req).await.is_err() {
                    continue;
                }
                if req[0] == 0x01 {
                    let mut reply = [0u8; CAL_RESPONSE_LEN];
                    BigEndian::write_u16(&mut reply[0..2], CAL_RESPONSE_HEADER);
                    reply[2] = 1;
                    reply[3] = 2;
                    BigEndian::write_u32(&mut reply[4..8], cpf);
                    BigEndian::write_u32(&mut reply[8..12], cpt);
                    for i in 0..6u16 {
                        BigEndian::write_u16(&mut reply[12 + (i as usize) * 2..14 + (i as usize) * 2], i + 1);
                    }
                    let _ = stream.write_all(&reply).await;
                }
                // bias/write-transform frames carry no reply; the write
                // itself already completed by the time this loop resumes.
            }
        });

        Self { addr, task }
    }

    pub fn stop(self) {
        self.task.abort();
    }
}

/// Behavior of the HTTP calibration simulator (spec.md §8 S5).
#[derive(Debug, Clone, Copy)]
pub enum HttpSimBehavior {
    ServeXml { cpf: f64, cpt: f64 },
    Fail500,
}

/// Minimal hand-rolled HTTP/1.1 responder, in the same manual-framing style
/// as the rest of the wire layer: no server crate, just enough bytes on the
/// wire for `reqwest` to parse a status line and body.
pub struct HttpSimulator {
    pub addr: SocketAddr,
    task: JoinHandle<()>,
}

impl HttpSimulator {
    pub async fn spawn(behavior: HttpSimBehavior) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind sim http listener");
        let addr = listener.local_addr().expect("sim http listener has a local addr");

        let task = tokio::spawn(async move {
            loop {
                let (mut stream, _) = match listener.accept().await {
                    Ok(v) => v,
                    Err(_) => break,
                };
                let mut discard = [0u8; 1024];
                let _ = stream.read(&mut discard).await;

                let (status_line, body) = match behavior {
                    HttpSimBehavior::ServeXml { cpf, cpt } => (
                        "HTTP/1.1 200 OK",
                        format!(
                            "<Calibration><CountsPerForce>{cpf}</CountsPerForce><CountsPerTorque>{cpt}</CountsPerTorque></Calibration>"
                        ),
                    ),
                    HttpSimBehavior::Fail500 => ("HTTP/1.1 500 Internal Server Error", String::new()),
                };
                let response = format!(
                    "{status_line}\r\nContent-Type: text/xml\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                    body.len()
                );
                let _ = stream.write_all(response.as_bytes()).await;
                let _ = stream.shutdown().await;
            }
        });

        Self { addr, task }
    }

    pub fn stop(self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::request::{encode_request, RdtCommand};
    use crate::wire::response::decode_response;

    #[tokio::test]
    async fn udp_simulator_replays_requested_sequence() {
        let sim = UdpSimulator::spawn(vec![1, 2, 3], [1000, -1000, 5000, 100, -100, 50]).await;
        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        client.connect(sim.addr).await.unwrap();
        client.send(&encode_request(RdtCommand::StartInfinite, 0)).await.unwrap();

        let mut buf = [0u8; RESPONSE_LEN];
        let mut seqs = Vec::new();
        for _ in 0..3 {
            let n = client.recv(&mut buf).await.unwrap();
            let decoded = decode_response(&buf[..n]).unwrap();
            seqs.push(decoded.rdt_sequence);
        }
        assert_eq!(seqs, vec![1, 2, 3]);
        sim.stop();
    }

    #[tokio::test]
    async fn tcp_simulator_answers_calinfo() {
        let sim = TcpSimulator::spawn(500_000, 800_000).await;
        let mut stream = tokio::net::TcpStream::connect(sim.addr).await.unwrap();
        stream.write_all(&crate::wire::tcp::calibration_request()).await.unwrap();
        let mut buf = [0u8; CAL_RESPONSE_LEN];
        stream.read_exact(&mut buf).await.unwrap();
        let reply = crate::wire::tcp::decode_calibration_reply(&buf).unwrap();
        assert_eq!(reply.cpf, 500_000);
        assert_eq!(reply.cpt, 800_000);
        sim.stop();
    }
}
