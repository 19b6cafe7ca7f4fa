//! Serving one RTR client connection (§5, RFC 6810 / RFC 8210).
//!
//! [`handle`] runs the whole lifetime of one TCP connection: it waits for
//! the client's first PDU to learn which protocol version it speaks,
//! answers it with either a full snapshot (Reset Query) or an incremental
//! update (Serial Query), and then sits in a loop answering further
//! queries and forwarding serial-change notifications until the client
//! disconnects or goes idle past its timeout.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use log::{debug, warn};
use tokio::time::timeout;
use crate::config::Config;
use crate::payload::{DeltaUpdate, History};
use crate::utils::sync::Mutex;
use super::notify::NotifySender;
use super::pdu::{Pdu, PrefixPdu, RouterKeyPdu, VERSION_0, VERSION_1};
use super::serial::Serial;

mod error_code {
    pub const NO_DATA_AVAILABLE: u16 = 2;
    pub const INVALID_REQUEST: u16 = 3;
    pub const UNSUPPORTED_PROTOCOL_VERSION: u16 = 4;
}

/// Timers sent to clients on End Of Data (RFC 8210 §5.8), derived from the
/// configured validation cycle rather than the RFC's suggested defaults --
/// there's no point telling a client to poll faster than data can change.
struct Timers {
    refresh: u32,
    retry: u32,
    expire: u32,
}

impl Timers {
    fn from_config(config: &Config) -> Self {
        let refresh = config.refresh.as_secs().min(u32::MAX as u64) as u32;
        Timers {
            refresh,
            retry: refresh / 6,
            expire: refresh * 2,
        }
    }
}


//------------ Registry ----------------------------------------------------------

/// Tracks the set of currently connected clients.
///
/// Purely informational -- nothing in the protocol state machine needs
/// it -- but it gives the operator a way to see who's connected without
/// reaching for `netstat`.
#[derive(Default)]
pub struct Registry {
    next_id: AtomicU64,
    clients: Mutex<HashMap<u64, SocketAddr>>,
}

impl Registry {
    pub fn new() -> Self {
        Registry::default()
    }

    fn register(&self, addr: SocketAddr) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.clients.lock().insert(id, addr);
        id
    }

    fn unregister(&self, id: u64) {
        self.clients.lock().remove(&id);
    }

    pub fn len(&self) -> usize {
        self.clients.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn for_each(&self, mut f: impl FnMut(SocketAddr)) {
        for addr in self.clients.lock().values() {
            f(*addr)
        }
    }
}


//------------ handle --------------------------------------------------------------

/// Drives one client connection end to end.
///
/// Never returns an error: any failure -- a malformed PDU, a dropped
/// socket, an idle timeout -- just ends this client's session. The
/// listener loop in `server.rs` treats every connection independently.
pub async fn handle(
    mut sock: tokio::net::TcpStream,
    addr: SocketAddr,
    registry: std::sync::Arc<Registry>,
    history: History,
    notify: NotifySender,
    config: Config,
) {
    let id = registry.register(addr);
    debug!("RTR client {} connected.", addr);

    let mut notify_rx = notify.subscribe();
    let timers = Timers::from_config(&config);

    let version = match initial_exchange(
        &mut sock, &history, &timers, config.rtr_client_timeout,
    ).await {
        Ok(version) => version,
        Err(reason) => {
            debug!("RTR client {} disconnected during setup: {}.", addr, reason);
            registry.unregister(id);
            return
        }
    };

    loop {
        tokio::select! {
            update = notify_rx.recv() => {
                match update {
                    Ok((session_id, _serial)) if session_id == history.session_id() => {
                        let pdu = Pdu::SerialNotify {
                            session_id, serial: history.serial(),
                        };
                        if send(&mut sock, &pdu, version).await.is_err() {
                            break
                        }
                    }
                    Ok(_) => {}
                    Err(_) => {
                        // Lagged or the sender was dropped; the client will
                        // find out about the current serial on its next
                        // Serial Query regardless.
                    }
                }
            }
            read = timeout(config.rtr_client_timeout, Pdu::read(&mut sock)) => {
                match read {
                    Err(_) => {
                        debug!("RTR client {} idle timeout, disconnecting.", addr);
                        break
                    }
                    Ok(Err(err)) => {
                        debug!("RTR client {}: {}.", addr, err);
                        break
                    }
                    Ok(Ok((client_version, pdu))) => {
                        if !respond(
                            &mut sock, client_version, pdu, &history, &timers,
                        ).await {
                            break
                        }
                    }
                }
            }
        }
    }

    registry.unregister(id);
    debug!("RTR client {} disconnected.", addr);
}

/// Waits for and answers the client's first PDU, returning the protocol
/// version to use for the rest of the connection.
async fn initial_exchange(
    sock: &mut tokio::net::TcpStream,
    history: &History,
    timers: &Timers,
    idle_timeout: std::time::Duration,
) -> Result<u8, String> {
    let (version, pdu) = timeout(idle_timeout, Pdu::read(sock)).await
        .map_err(|_| "timed out waiting for initial request".to_string())?
        .map_err(|err| err.to_string())?;

    if version != VERSION_0 && version != VERSION_1 {
        let err = Pdu::ErrorReport {
            error_code: error_code::UNSUPPORTED_PROTOCOL_VERSION,
            erroneous_pdu: bytes::Bytes::new(),
            text: "only protocol versions 0 and 1 are supported".into(),
        };
        let _ = send(sock, &err, VERSION_1).await;
        return Err(format!("client requested unsupported version {}", version))
    }

    if !respond(sock, version, pdu, history, timers).await {
        return Err("failed to answer initial request".to_string())
    }
    Ok(version)
}

/// Answers one client PDU. Returns `false` if the connection should be
/// torn down.
async fn respond(
    sock: &mut tokio::net::TcpStream,
    version: u8,
    pdu: Pdu,
    history: &History,
    timers: &Timers,
) -> bool {
    match pdu {
        Pdu::ResetQuery => send_snapshot(sock, version, history, timers).await,
        Pdu::SerialQuery { session_id, serial } => {
            send_update(sock, version, session_id, serial, history, timers).await
        }
        Pdu::ErrorReport { error_code, text, .. } => {
            warn!(
                "RTR client reported an error (code {}): {}", error_code, text
            );
            false
        }
        other => {
            let err = Pdu::ErrorReport {
                error_code: error_code::INVALID_REQUEST,
                erroneous_pdu: bytes::Bytes::new(),
                text: format!("unexpected PDU from client: {:?}", other),
            };
            let _ = send(sock, &err, version).await;
            false
        }
    }
}

/// Sends a Cache Response, every VRP and router key as payload PDUs, and
/// an End Of Data, i.e. the full current state (RFC 8210 §5.3).
async fn send_snapshot(
    sock: &mut tokio::net::TcpStream, version: u8, history: &History, timers: &Timers,
) -> bool {
    let session_id = history.session_id();
    let snapshot = match history.current() {
        Some(snapshot) => snapshot,
        None => {
            let err = Pdu::ErrorReport {
                error_code: error_code::NO_DATA_AVAILABLE,
                erroneous_pdu: bytes::Bytes::new(),
                text: "no validated data available yet".into(),
            };
            let _ = send(sock, &err, version).await;
            return false
        }
    };

    if send(sock, &Pdu::CacheResponse { session_id }, version).await.is_err() {
        return false
    }
    for vrp in snapshot.vrps() {
        let pdu = PrefixPdu::new(
            PrefixPdu::ANNOUNCE, vrp.prefix, vrp.max_length, vrp.asn,
        );
        if send_prefix(sock, &pdu, version).await.is_err() {
            return false
        }
    }
    if version >= VERSION_1 {
        for key in snapshot.router_keys() {
            let pdu = RouterKeyPdu::new(
                RouterKeyPdu::ANNOUNCE, key.ski, key.asn, key.spki.clone(),
            );
            if send_router_key(sock, &pdu, version).await.is_err() {
                return false
            }
        }
    }
    send(sock, &end_of_data(session_id, history.serial(), timers), version)
        .await.is_ok()
}

/// Answers a Serial Query with either an incremental update or, if the
/// client's serial is outside the retained window, a full Cache Reset.
async fn send_update(
    sock: &mut tokio::net::TcpStream,
    version: u8,
    session_id: u16,
    serial: Serial,
    history: &History,
    timers: &Timers,
) -> bool {
    if session_id != history.session_id() {
        return send(sock, &Pdu::CacheReset, version).await.is_ok()
    }
    match history.delta_since(serial) {
        DeltaUpdate::UpToDate => {
            if send(sock, &Pdu::CacheResponse { session_id }, version).await.is_err() {
                return false
            }
            send(
                sock, &end_of_data(session_id, history.serial(), timers), version,
            ).await.is_ok()
        }
        DeltaUpdate::CacheReset => {
            send(sock, &Pdu::CacheReset, version).await.is_ok()
        }
        DeltaUpdate::Deltas(deltas) => {
            if send(sock, &Pdu::CacheResponse { session_id }, version).await.is_err() {
                return false
            }
            for delta in &deltas {
                for vrp in delta.removed_vrps() {
                    let pdu = PrefixPdu::new(
                        PrefixPdu::WITHDRAW, vrp.prefix, vrp.max_length, vrp.asn,
                    );
                    if send_prefix(sock, &pdu, version).await.is_err() {
                        return false
                    }
                }
                for vrp in delta.added_vrps() {
                    let pdu = PrefixPdu::new(
                        PrefixPdu::ANNOUNCE, vrp.prefix, vrp.max_length, vrp.asn,
                    );
                    if send_prefix(sock, &pdu, version).await.is_err() {
                        return false
                    }
                }
                if version >= VERSION_1 {
                    for key in delta.removed_router_keys() {
                        let pdu = RouterKeyPdu::new(
                            RouterKeyPdu::WITHDRAW, key.ski, key.asn, key.spki.clone(),
                        );
                        if send_router_key(sock, &pdu, version).await.is_err() {
                            return false
                        }
                    }
                    for key in delta.added_router_keys() {
                        let pdu = RouterKeyPdu::new(
                            RouterKeyPdu::ANNOUNCE, key.ski, key.asn, key.spki.clone(),
                        );
                        if send_router_key(sock, &pdu, version).await.is_err() {
                            return false
                        }
                    }
                }
            }
            send(
                sock, &end_of_data(session_id, history.serial(), timers), version,
            ).await.is_ok()
        }
    }
}

fn end_of_data(session_id: u16, serial: Serial, timers: &Timers) -> Pdu {
    Pdu::EndOfData {
        session_id, serial,
        refresh: timers.refresh, retry: timers.retry, expire: timers.expire,
    }
}

async fn send(
    sock: &mut tokio::net::TcpStream, pdu: &Pdu, version: u8,
) -> Result<(), std::io::Error> {
    pdu.write(sock, version).await
}

async fn send_prefix(
    sock: &mut tokio::net::TcpStream, pdu: &PrefixPdu, version: u8,
) -> Result<(), std::io::Error> {
    pdu.write(sock, version).await
}

async fn send_router_key(
    sock: &mut tokio::net::TcpStream, pdu: &RouterKeyPdu, version: u8,
) -> Result<(), std::io::Error> {
    pdu.write(sock, version).await
}


#[cfg(test)]
mod test {
    use std::time::Duration;
    use bytes::{Buf, Bytes};
    use log::LevelFilter;
    use tokio::io::AsyncReadExt;
    use tokio::net::{TcpListener, TcpStream};
    use crate::config::{FilterPolicy, LogTarget};
    use crate::payload::{History, PayloadSnapshot, Vrp};
    use crate::resources::{Afi, Prefix};
    use super::*;

    fn config() -> Config {
        Config {
            cache_dir: "/tmp/rpki-relay-test/repository".into(),
            tal_dir: "/tmp/rpki-relay-test/tals".into(),
            exceptions: None,
            strict: false,
            stale_manifest: FilterPolicy::Warn,
            verbose: LevelFilter::Warn,
            log_target: LogTarget::Stderr,
            refresh: Duration::from_secs(600),
            history_size: 10,
            validation_timeout: Duration::from_secs(300),
            rtr_listen: Vec::new(),
            rtr_client_timeout: Duration::from_secs(600),
        }
    }

    fn vrp(asn: u32) -> Vrp {
        Vrp::new(asn, Prefix::new(Afi::Ipv4, 0xC0000200, 24), 24)
    }

    /// A connected TCP pair on loopback, standing in for a router socket
    /// without touching any real network.
    async fn socket_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let connect = TcpStream::connect(addr);
        let (accept, connect) = tokio::join!(listener.accept(), connect);
        (accept.unwrap().0, connect.unwrap())
    }

    /// Reads one raw PDU header plus body off `sock`, for PDU types this
    /// server never needs to parse as a client (Cache Response, the
    /// payload PDUs, End Of Data). Only `Pdu::read` itself round-trips
    /// client-originated PDUs, so the server-to-client direction is
    /// checked against the wire format directly here.
    async fn read_raw(sock: &mut TcpStream) -> (u8, u8, u16, Bytes) {
        let mut header = [0u8; 8];
        sock.read_exact(&mut header).await.unwrap();
        let mut header_buf = Bytes::copy_from_slice(&header);
        let version = header_buf.get_u8();
        let pdu_type = header_buf.get_u8();
        let field = header_buf.get_u16();
        let len = header_buf.get_u32();
        let mut body = vec![0u8; len as usize - 8];
        sock.read_exact(&mut body).await.unwrap();
        (version, pdu_type, field, Bytes::from(body))
    }

    const CACHE_RESPONSE: u8 = 3;
    const IPV4_PREFIX: u8 = 4;
    const END_OF_DATA: u8 = 7;
    const CACHE_RESET: u8 = 8;

    /// S4: a Reset Query gets a full dump -- Cache Response, one Prefix
    /// PDU per VRP with the announce flag, then End Of Data carrying the
    /// current session and serial.
    #[tokio::test]
    async fn reset_query_sends_full_snapshot() {
        let history = History::from_config(&config());
        history.commit(PayloadSnapshot::new(vec![vrp(1), vrp(2)], Vec::new()));
        let timers = Timers::from_config(&config());
        let (mut server, mut client) = socket_pair().await;

        let (session_id, serial) = history.session_and_serial();
        let task = tokio::spawn(async move {
            send_snapshot(&mut server, VERSION_1, &history, &timers).await
        });

        let (_, pdu_type, field, _) = read_raw(&mut client).await;
        assert_eq!(pdu_type, CACHE_RESPONSE);
        assert_eq!(field, session_id);

        let mut seen = Vec::new();
        loop {
            let (_, pdu_type, field, body) = read_raw(&mut client).await;
            if pdu_type == END_OF_DATA {
                assert_eq!(field, session_id);
                let mut body = body;
                assert_eq!(Serial::from(body.get_u32()), serial);
                break
            }
            assert_eq!(pdu_type, IPV4_PREFIX);
            assert_eq!(body[0], PrefixPdu::ANNOUNCE);
            seen.push(body[8..12].to_vec());
        }
        assert_eq!(seen.len(), 2);
        assert!(task.await.unwrap());
    }

    /// S5: a client holding an older serial with its deltas still
    /// retained gets exactly those deltas, in order, as a Cache Response
    /// followed by per-VRP update PDUs and an End Of Data at the new
    /// serial.
    #[tokio::test]
    async fn serial_query_with_retained_history_sends_delta() {
        let history = History::from_config(&config());
        history.commit(PayloadSnapshot::new(vec![vrp(1)], Vec::new()));
        let (session_id, from_serial) = history.session_and_serial();
        history.commit(PayloadSnapshot::new(vec![vrp(1), vrp(2)], Vec::new()));
        let to_serial = history.serial();
        assert_ne!(from_serial, to_serial);

        let timers = Timers::from_config(&config());
        let (mut server, mut client) = socket_pair().await;
        let task = tokio::spawn(async move {
            send_update(
                &mut server, VERSION_1, session_id, from_serial, &history, &timers,
            ).await
        });

        let (_, pdu_type, field, _) = read_raw(&mut client).await;
        assert_eq!(pdu_type, CACHE_RESPONSE);
        assert_eq!(field, session_id);

        let (_, pdu_type, _, body) = read_raw(&mut client).await;
        assert_eq!(pdu_type, IPV4_PREFIX);
        assert_eq!(body[0], PrefixPdu::ANNOUNCE);
        assert_eq!(u32::from_be_bytes([body[8], body[9], body[10], body[11]]), 2);

        let (_, pdu_type, field, mut body) = read_raw(&mut client).await;
        assert_eq!(pdu_type, END_OF_DATA);
        assert_eq!(field, session_id);
        assert_eq!(Serial::from(body.get_u32()), to_serial);
        assert!(task.await.unwrap());
    }

    /// S6: a client whose serial predates every retained delta gets a
    /// bare Cache Reset and no payload PDUs.
    #[tokio::test]
    async fn serial_query_outside_retained_window_resets() {
        let history = History::from_config(&config());
        history.commit(PayloadSnapshot::new(vec![vrp(1)], Vec::new()));
        let (session_id, _) = history.session_and_serial();

        let timers = Timers::from_config(&config());
        let (mut server, mut client) = socket_pair().await;
        let task = tokio::spawn(async move {
            send_update(
                &mut server, VERSION_1, session_id, Serial::from(9999),
                &history, &timers,
            ).await
        });

        let (_, pdu_type, _, _) = read_raw(&mut client).await;
        assert_eq!(pdu_type, CACHE_RESET);
        assert!(task.await.unwrap());
    }

    /// A Serial Query naming a session the database has since rotated
    /// away from also gets a Cache Reset, independent of the serial.
    #[tokio::test]
    async fn serial_query_with_stale_session_resets() {
        let history = History::from_config(&config());
        history.commit(PayloadSnapshot::new(vec![vrp(1)], Vec::new()));
        let current_session = history.session_id();
        let other_session = current_session.wrapping_add(1);

        let timers = Timers::from_config(&config());
        let (mut server, mut client) = socket_pair().await;
        let task = tokio::spawn(async move {
            send_update(
                &mut server, VERSION_1, other_session, Serial::from(0),
                &history, &timers,
            ).await
        });

        let (_, pdu_type, _, _) = read_raw(&mut client).await;
        assert_eq!(pdu_type, CACHE_RESET);
        assert!(task.await.unwrap());
    }

    /// A connecting client's Reset Query is answered end to end through
    /// `respond`, the same dispatch `handle` uses for every PDU it reads
    /// off the wire.
    #[tokio::test]
    async fn respond_dispatches_reset_query_to_full_snapshot() {
        let history = History::from_config(&config());
        history.commit(PayloadSnapshot::new(vec![vrp(1)], Vec::new()));
        let timers = Timers::from_config(&config());
        let (mut server, mut client) = socket_pair().await;

        let task = tokio::spawn(async move {
            respond(&mut server, VERSION_1, Pdu::ResetQuery, &history, &timers).await
        });

        let (_, pdu_type, _, _) = read_raw(&mut client).await;
        assert_eq!(pdu_type, CACHE_RESPONSE);
        assert!(task.await.unwrap());
    }
}

