//! LwM2M device over plain CoAP/UDP
//!
//! Usage:
//!   cargo run --example device_server -- --objects objects.json [--data instances.json] [--port 5683]
//!   cargo run --example device_server -- --config client.json
//!

use clap::Parser;
use coap_lite::{CoapOption, MessageClass, MessageType, Packet, RequestType, ResponseType};
use lwm2m_engine::coap_types::{Exchange, Method, PeerId, Response, ResponseCode};
use lwm2m_engine::observe::{Notification, NotificationDispatcher, NotificationSink};
use lwm2m_engine::{
    ClientConfig, Format, LwM2mError, ObjectModel, ObservationRegistry, Path, RequestHandler,
    Result,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::net::{SocketAddr, UdpSocket};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU16, Ordering};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "device-server")]
#[command(about = "LwM2M device - serve an object tree via CoAP")]
struct Args {
    /// Client configuration file (JSON); overrides --objects/--data
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Object definition file (JSON)
    #[arg(short, long)]
    objects: Option<PathBuf>,

    /// Initial instance data file (JSON, optional)
    #[arg(short, long)]
    data: Option<PathBuf>,

    /// Client endpoint name
    #[arg(short, long, default_value = "lwm2m-engine-demo")]
    endpoint: String,

    /// UDP port to listen on
    #[arg(short, long, default_value = "5683")]
    port: u16,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

/// Pushes notifications as non-confirmable CoAP messages
struct UdpSink {
    socket: UdpSocket,
    /// Observe request token per (peer, path)
    tokens: Mutex<HashMap<(PeerId, Path), Vec<u8>>>,
    message_id: AtomicU16,
}

impl UdpSink {
    fn remember(&self, peer: PeerId, path: Path, token: Vec<u8>) {
        self.tokens.lock().insert((peer, path), token);
    }
}

impl NotificationSink for UdpSink {
    fn deliver(&self, notification: &Notification) -> Result<()> {
        let key = (notification.peer.clone(), notification.path);
        let token = {
            let mut tokens = self.tokens.lock();
            // a final notification ends the relation
            let token = if notification.code.is_success() {
                tokens.get(&key).cloned()
            } else {
                tokens.remove(&key)
            };
            token.ok_or_else(|| {
                LwM2mError::Encode(format!("no observe token for {}", notification.path))
            })?
        };
        let addr: SocketAddr = notification
            .peer
            .as_str()
            .parse()
            .map_err(|_| LwM2mError::Encode(format!("peer {} is not an address", notification.peer)))?;

        let mut packet = Packet::new();
        packet.header.set_type(MessageType::NonConfirmable);
        packet.header.code = MessageClass::Response(response_type(notification.code));
        packet.header.message_id = self.message_id.fetch_add(1, Ordering::Relaxed);
        packet.set_token(token);
        if notification.code.is_success() {
            // observe sequence is 24 bits on the wire
            packet.set_observe_value((notification.seq & 0xFF_FFFF) as u32);
        }
        if let Some(format) = notification.content_format {
            packet.add_option(CoapOption::ContentFormat, uint_option(format.as_u16()));
        }
        packet.payload = notification.payload.clone();

        let bytes = packet
            .to_bytes()
            .map_err(|e| LwM2mError::Encode(format!("{e:?}")))?;
        self.socket.send_to(&bytes, addr)?;
        debug!(peer = %addr, path = %notification.path, code = %notification.code, seq = notification.seq, "Notification sent");
        Ok(())
    }
}

fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let default_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    let config = match (&args.config, &args.objects) {
        (Some(path), _) => ClientConfig::from_file(path)?,
        (None, Some(objects)) => ClientConfig {
            endpoint: args.endpoint.clone(),
            objects: objects.clone(),
            data: args.data.clone(),
            notification_format: None,
        },
        (None, None) => return Err("either --config or --objects is required".into()),
    };

    run_server(&config, args.port)?;
    Ok(())
}

fn run_server(config: &ClientConfig, port: u16) -> Result<()> {
    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("║              LwM2M Device (CoAP/UDP)                         ║");
    println!("╚══════════════════════════════════════════════════════════════╝\n");

    let bootstrap = config.bootstrap_request()?;
    let model: ObjectModel = config.load_model()?;
    let tree = Arc::new(config.load_tree(&model)?);
    info!(endpoint = bootstrap.endpoint(), objects = model.len(), "Object tree loaded");

    let socket = UdpSocket::bind(format!("0.0.0.0:{port}"))?;
    socket.set_read_timeout(Some(std::time::Duration::from_millis(500)))?;

    let registry = Arc::new(ObservationRegistry::new());
    let sink = Arc::new(UdpSink {
        socket: socket.try_clone()?,
        tokens: Mutex::new(HashMap::new()),
        message_id: AtomicU16::new(1),
    });
    let dispatcher = NotificationDispatcher::new(registry.clone(), model.clone(), sink.clone())
        .with_default_format(config.notification_format()?);
    tree.add_listener(Arc::new(dispatcher));
    let handler = RequestHandler::new(tree, registry);

    // Set up Ctrl+C handler
    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        println!("\n\nReceived Ctrl+C, shutting down...");
        r.store(false, Ordering::SeqCst);
    })
    .map_err(|e| LwM2mError::Io(std::io::Error::other(e.to_string())))?;

    println!("\n────────────────────────────────────────────────────────────────");
    println!("Device listening on: coap://0.0.0.0:{port}");
    println!("Endpoint:            {}", bootstrap.endpoint());
    println!("────────────────────────────────────────────────────────────────");
    println!("\nQuick test:");
    println!("  coap-client -m get coap://127.0.0.1:{port}/3/0");
    println!("  coap-client -m get -A 40 coap://127.0.0.1:{port}/3/0");
    println!("\nWaiting for requests... (Ctrl+C to stop)\n");

    let mut buf = [0u8; 1500];

    while running.load(Ordering::SeqCst) {
        let (len, src) = match socket.recv_from(&mut buf) {
            Ok(r) => r,
            Err(e)
                if e.kind() == std::io::ErrorKind::WouldBlock
                    || e.kind() == std::io::ErrorKind::TimedOut
                    || e.kind() == std::io::ErrorKind::Interrupted =>
            {
                continue; // Check running flag (also handles Ctrl+C interrupt)
            }
            Err(e) => return Err(e.into()),
        };

        let packet = match Packet::from_bytes(&buf[..len]) {
            Ok(packet) => packet,
            Err(e) => {
                warn!(peer = %src, error = ?e, "Undecodable packet");
                continue;
            }
        };

        match packet.header.code {
            // Reset to a notification ends the peer's observations
            MessageClass::Empty if packet.header.get_type() == MessageType::Reset => {
                handler.disconnect(&PeerId::from(src));
                continue;
            }
            MessageClass::Empty => continue,
            _ => {}
        }

        let reply = match to_exchange(&packet, src) {
            Some(exchange) => {
                let response = handler.handle(&exchange);
                if exchange.method == Method::Get
                    && exchange.observe == Some(0)
                    && response.code.is_success()
                    && let Ok(path) = Path::parse(&exchange.path)
                {
                    sink.remember(exchange.peer.clone(), path, packet.get_token().to_vec());
                }
                to_packet(&packet, &exchange, &response)
            }
            None => empty_reply(&packet, ResponseType::MethodNotAllowed),
        };

        match reply.to_bytes() {
            Ok(bytes) => {
                socket.send_to(&bytes, src)?;
            }
            Err(e) => warn!(peer = %src, error = ?e, "Reply could not be encoded"),
        }
    }

    info!("Device stopped");
    Ok(())
}

/// Decode a request packet into an exchange
fn to_exchange(packet: &Packet, src: SocketAddr) -> Option<Exchange> {
    let method = match packet.header.code {
        MessageClass::Request(RequestType::Get) => Method::Get,
        MessageClass::Request(RequestType::Put) => Method::Put,
        MessageClass::Request(RequestType::Post) => Method::Post,
        MessageClass::Request(RequestType::Delete) => Method::Delete,
        _ => return None,
    };

    let strings = |option: CoapOption| -> Vec<String> {
        packet
            .get_option(option)
            .map(|values| {
                values
                    .iter()
                    .map(|v| String::from_utf8_lossy(v).into_owned())
                    .collect()
            })
            .unwrap_or_default()
    };
    let number = |option: CoapOption| {
        packet
            .get_option(option)
            .and_then(|values| values.front())
            .map(|v| v.iter().fold(0u32, |acc, b| (acc << 8) | u32::from(*b)))
    };

    let mut exchange = Exchange::new(src, method, strings(CoapOption::UriPath).join("/"));
    exchange.query = strings(CoapOption::UriQuery);
    exchange.observe = number(CoapOption::Observe);
    exchange.accept = number(CoapOption::Accept).and_then(|v| u16::try_from(v).ok());
    exchange.content_format = number(CoapOption::ContentFormat).and_then(|v| u16::try_from(v).ok());
    exchange.payload = packet.payload.clone();
    Some(exchange)
}

/// Encode a response as the piggybacked reply to `request`
fn to_packet(request: &Packet, exchange: &Exchange, response: &Response) -> Packet {
    let mut packet = empty_reply(request, response_type(response.code));

    if let Some(location) = &response.location {
        for segment in location.split('/').filter(|s| !s.is_empty()) {
            packet.add_option(CoapOption::LocationPath, segment.as_bytes().to_vec());
        }
    }
    if exchange.observe == Some(0) && response.code.is_success() {
        packet.set_observe_value(0);
    }
    if let Some(format) = response.content_format {
        packet.add_option(CoapOption::ContentFormat, uint_option(format.as_u16()));
    }
    packet.payload = response.payload.clone();

    debug!(
        peer = %exchange.peer,
        method = %exchange.method,
        path = %exchange.path,
        code = %response.code,
        format = ?response.content_format.and_then(Format::from_content_format),
        bytes = response.payload.len(),
        "Reply"
    );
    packet
}

fn empty_reply(request: &Packet, code: ResponseType) -> Packet {
    let mut packet = Packet::new();
    let kind = match request.header.get_type() {
        MessageType::Confirmable => MessageType::Acknowledgement,
        _ => MessageType::NonConfirmable,
    };
    packet.header.set_type(kind);
    packet.header.message_id = request.header.message_id;
    packet.header.code = MessageClass::Response(code);
    packet.set_token(request.get_token().to_vec());
    packet
}

fn response_type(code: ResponseCode) -> ResponseType {
    match code {
        ResponseCode::Created => ResponseType::Created,
        ResponseCode::Deleted => ResponseType::Deleted,
        ResponseCode::Changed => ResponseType::Changed,
        ResponseCode::Content => ResponseType::Content,
        ResponseCode::BadRequest => ResponseType::BadRequest,
        ResponseCode::Unauthorized => ResponseType::Unauthorized,
        ResponseCode::NotFound => ResponseType::NotFound,
        ResponseCode::MethodNotAllowed => ResponseType::MethodNotAllowed,
        ResponseCode::InternalServerError => ResponseType::InternalServerError,
    }
}

/// Minimal big-endian encoding of an unsigned option value
fn uint_option(value: u16) -> Vec<u8> {
    match value {
        0 => Vec::new(),
        1..=0xFF => vec![value as u8],
        _ => value.to_be_bytes().to_vec(),
    }
}
