//! Scripted in-memory socket layer.
//!
//! Counts resolve/open/connect/close calls, records every sent request and
//! socket option, and replays a shared queue of receive steps. Sockets pop
//! steps in call order, so a script spans reconnects. An exhausted script
//! behaves like a silent peer.

#![allow(dead_code)]

use std::collections::{HashSet, VecDeque};
use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use downloader_client::Protocol;
use downloader_client::protocol::coap::message::{
    Block, CoapOption, Message, MessageType, code, option,
};
use downloader_client::transport::{AddressFamily, Network, OpenError, Socket, SocketOption};
use parking_lot::Mutex;

type Responder = Box<dyn Fn(&[u8]) -> Vec<u8> + Send + Sync>;

/// One scripted result of a `recv` call.
pub enum Step {
    /// These bytes arrive.
    Data(Vec<u8>),
    /// Bytes computed from the last request sent on the receiving socket.
    Respond(Responder),
    /// The call fails with this error kind.
    Error(io::ErrorKind),
    /// Zero-length read.
    Closed,
    /// Nothing arrives.
    Hang,
}

impl Step {
    pub fn data(bytes: impl Into<Vec<u8>>) -> Self {
        Self::Data(bytes.into())
    }

    pub fn respond(f: impl Fn(&[u8]) -> Vec<u8> + Send + Sync + 'static) -> Self {
        Self::Respond(Box::new(f))
    }
}

#[derive(Default)]
struct Inner {
    steps: Mutex<VecDeque<Step>>,
    unresolvable: Mutex<HashSet<String>>,
    refuse_family: Mutex<Option<AddressFamily>>,
    failing_option: Mutex<Option<&'static str>>,
    failing_sends: AtomicUsize,

    resolve_calls: AtomicUsize,
    open_calls: AtomicUsize,
    connect_calls: AtomicUsize,
    close_calls: AtomicUsize,
    sent: Mutex<Vec<Vec<u8>>>,
    options: Mutex<Vec<SocketOption>>,
    connected: Mutex<Vec<SocketAddr>>,
}

/// Cloneable handle; clones share the script and the counters.
#[derive(Clone, Default)]
pub struct MockNetwork {
    inner: Arc<Inner>,
}

impl MockNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// The socket layer handed to `Client::with_network`.
    pub fn network(&self) -> Arc<dyn Network> {
        Arc::new(self.clone())
    }

    pub fn push(&self, step: Step) -> &Self {
        self.inner.steps.lock().push_back(step);
        self
    }

    pub fn script(&self, steps: impl IntoIterator<Item = Step>) -> &Self {
        self.inner.steps.lock().extend(steps);
        self
    }

    /// `host` fails to resolve in every family.
    pub fn unresolvable(&self, host: &str) -> &Self {
        self.inner.unresolvable.lock().insert(host.to_string());
        self
    }

    /// Connections to addresses of `family` are refused.
    pub fn refuse(&self, family: AddressFamily) -> &Self {
        *self.inner.refuse_family.lock() = Some(family);
        self
    }

    /// Setting the option with this name fails.
    pub fn fail_option(&self, name: &'static str) -> &Self {
        *self.inner.failing_option.lock() = Some(name);
        self
    }

    /// The next `count` send calls fail with a broken pipe.
    pub fn fail_sends(&self, count: usize) -> &Self {
        self.inner.failing_sends.store(count, Ordering::SeqCst);
        self
    }

    pub fn resolve_calls(&self) -> usize {
        self.inner.resolve_calls.load(Ordering::SeqCst)
    }

    pub fn open_calls(&self) -> usize {
        self.inner.open_calls.load(Ordering::SeqCst)
    }

    pub fn connect_calls(&self) -> usize {
        self.inner.connect_calls.load(Ordering::SeqCst)
    }

    pub fn close_calls(&self) -> usize {
        self.inner.close_calls.load(Ordering::SeqCst)
    }

    /// Every request sent, in order, including retransmissions.
    pub fn sent(&self) -> Vec<Vec<u8>> {
        self.inner.sent.lock().clone()
    }

    /// Sent requests as text, for HTTP.
    pub fn sent_text(&self) -> Vec<String> {
        self.sent()
            .iter()
            .map(|bytes| String::from_utf8_lossy(bytes).into_owned())
            .collect()
    }

    /// Names of the socket options set, in order, across all sockets.
    pub fn option_names(&self) -> Vec<&'static str> {
        self.inner.options.lock().iter().map(SocketOption::name).collect()
    }

    pub fn options(&self) -> Vec<SocketOption> {
        self.inner.options.lock().clone()
    }

    /// Addresses successfully connected to.
    pub fn connected(&self) -> Vec<SocketAddr> {
        self.inner.connected.lock().clone()
    }

    pub fn steps_left(&self) -> usize {
        self.inner.steps.lock().len()
    }
}

#[async_trait]
impl Network for MockNetwork {
    async fn resolve(
        &self,
        host: &str,
        port: u16,
        family: AddressFamily,
    ) -> io::Result<Vec<SocketAddr>> {
        self.inner.resolve_calls.fetch_add(1, Ordering::SeqCst);
        if self.inner.unresolvable.lock().contains(host) {
            return Err(io::Error::new(io::ErrorKind::NotFound, "no such host"));
        }
        let ip = match family {
            AddressFamily::Ipv4 => IpAddr::V4(Ipv4Addr::LOCALHOST),
            AddressFamily::Ipv6 => IpAddr::V6(Ipv6Addr::LOCALHOST),
        };
        Ok(vec![SocketAddr::new(ip, port)])
    }

    fn open(&self, family: AddressFamily, protocol: Protocol) -> Result<Box<dyn Socket>, OpenError> {
        self.inner.open_calls.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockSocket {
            inner: Arc::clone(&self.inner),
            family,
            datagram: protocol.is_datagram(),
            last_sent: Vec::new(),
        }))
    }
}

struct MockSocket {
    inner: Arc<Inner>,
    family: AddressFamily,
    datagram: bool,
    last_sent: Vec<u8>,
}

#[async_trait]
impl Socket for MockSocket {
    fn set_option(&mut self, option: &SocketOption) -> io::Result<()> {
        if *self.inner.failing_option.lock() == Some(option.name()) {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "rejected"));
        }
        self.inner.options.lock().push(option.clone());
        Ok(())
    }

    async fn connect(&mut self, addr: SocketAddr) -> io::Result<()> {
        self.inner.connect_calls.fetch_add(1, Ordering::SeqCst);
        if *self.inner.refuse_family.lock() == Some(self.family) {
            return Err(io::ErrorKind::ConnectionRefused.into());
        }
        self.inner.connected.lock().push(addr);
        Ok(())
    }

    async fn send(&mut self, buf: &[u8]) -> io::Result<usize> {
        let failing = &self.inner.failing_sends;
        if failing
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(io::ErrorKind::BrokenPipe.into());
        }
        self.inner.sent.lock().push(buf.to_vec());
        self.last_sent = buf.to_vec();
        Ok(buf.len())
    }

    async fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let step = self.inner.steps.lock().pop_front();
        let bytes = match step {
            Some(Step::Data(bytes)) => bytes,
            Some(Step::Respond(respond)) => respond(&self.last_sent),
            Some(Step::Error(kind)) => return Err(kind.into()),
            Some(Step::Closed) => return Ok(0),
            Some(Step::Hang) | None => return std::future::pending().await,
        };
        let len = bytes.len().min(buf.len());
        buf[..len].copy_from_slice(&bytes[..len]);
        if len < bytes.len() && !self.datagram {
            // A stream delivers the rest on the next call.
            self.inner
                .steps
                .lock()
                .push_front(Step::Data(bytes[len..].to_vec()));
        }
        Ok(len)
    }

    fn close(&mut self) -> io::Result<()> {
        self.inner.close_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Deterministic test payload: `len` bytes counting up from zero.
pub fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

/// ACK carrying the block the request asked for.
pub fn coap_response(content: &[u8], request: &[u8]) -> Vec<u8> {
    let request_message = Message::decode(request).unwrap();
    let block = request_message.block2().unwrap().unwrap();
    coap_block(content, request, block.num)
}

/// ACK to `request` carrying block `num` of `content`, whatever was asked.
///
/// Size2 is included when the request asked for it.
pub fn coap_block(content: &[u8], request: &[u8], num: u32) -> Vec<u8> {
    let request = Message::decode(request).unwrap();
    let requested = request.block2().unwrap().unwrap();
    let size = requested.size();
    let start = (num as usize * size).min(content.len());
    let end = (start + size).min(content.len());

    let mut options = vec![
        Block {
            num,
            more: end < content.len(),
            szx: requested.szx,
        }
        .to_option(option::BLOCK2)
        .unwrap(),
    ];
    if request.size2().is_some() {
        options.push(CoapOption::uint(option::SIZE2, content.len() as u32));
    }

    Message {
        kind: MessageType::Acknowledgement,
        code: code::CONTENT,
        message_id: request.message_id,
        token: request.token.clone(),
        options,
        payload: &content[start..end],
    }
    .encode()
    .unwrap()
}

/// Step answering the pending CoAP request with the block it asked for.
pub fn coap_server(content: &Arc<Vec<u8>>) -> Step {
    let content = Arc::clone(content);
    Step::respond(move |request| coap_response(&content, request))
}

/// Block number and Size2 presence of a sent CoAP request.
pub fn coap_requested_block(request: &[u8]) -> (u32, bool) {
    let message = Message::decode(request).unwrap();
    let block = message.block2().unwrap().unwrap();
    (block.num, message.size2().is_some())
}

/// `200 OK` carrying all of `body`.
pub fn http_ok(body: &[u8]) -> Vec<u8> {
    let mut response = format!("HTTP/1.1 200 OK\r\nContent-Length: {}\r\n\r\n", body.len())
        .into_bytes();
    response.extend_from_slice(body);
    response
}

/// `206 Partial Content` for `body` starting at `start` of a `total`-byte
/// object.
pub fn http_partial(body: &[u8], start: usize, total: usize) -> Vec<u8> {
    let end = start + body.len() - 1;
    let mut response = format!(
        "HTTP/1.1 206 Partial Content\r\nContent-Range: bytes {start}-{end}/{total}\r\n\
         Content-Length: {}\r\n\r\n",
        body.len()
    )
    .into_bytes();
    response.extend_from_slice(body);
    response
}
