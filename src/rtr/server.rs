//! The RTR server's entry point.
//!
//! [`run`] binds every configured listen address, accepts connections
//! forever, and spawns one task per client via [`client::handle`]. A
//! second background task watches [`History`] for newly committed
//! serials and republishes them through the shared [`NotifySender`] so
//! every connected client learns about new data without polling.

use std::future::Future;
use std::sync::Arc;
use log::{error, info};
use tokio::net::TcpListener;
use crate::config::Config;
use crate::error::Failed;
use crate::payload::History;
use super::client::{self, Registry};
use super::notify::{self, NotifySender};

/// Runs the RTR server until cancelled or a listener fails outright.
///
/// Binding at least one of the configured addresses is required for this
/// to be useful; if `config.rtr_listen` is empty the server simply has
/// nothing to accept and sits idle alongside the watcher, matching the
/// "nothing configured, nothing served" behaviour of an empty TAL set on
/// the validation side.
pub fn run(
    history: History, config: Config,
) -> impl Future<Output = Result<(), Failed>> {
    async move {
        let notify = NotifySender::new();
        let registry = Arc::new(Registry::new());

        let mut listeners = Vec::new();
        for addr in &config.rtr_listen {
            match TcpListener::bind(addr).await {
                Ok(listener) => {
                    info!("RTR server listening on {}.", addr);
                    listeners.push(listener);
                }
                Err(err) => {
                    error!("Failed to bind RTR listener on {}: {}.", addr, err);
                    return Err(Failed)
                }
            }
        }

        let mut accept_tasks = tokio::task::JoinSet::new();
        for listener in listeners {
            accept_tasks.spawn(accept_loop(
                listener, registry.clone(), history.clone(),
                notify.clone(), config.clone(),
            ));
        }

        tokio::select! {
            _ = notify::watch(history.clone(), notify.clone()) => Ok(()),
            Some(res) = accept_tasks.join_next() => {
                match res {
                    Ok(()) => Ok(()),
                    Err(_) => {
                        error!("An RTR listener task panicked.");
                        Err(Failed)
                    }
                }
            }
        }
    }
}

/// Accepts connections on one bound listener, forever.
///
/// A per-connection accept failure is logged and doesn't bring the
/// listener down; only the loop exiting due to a task panic elsewhere
/// tears the server down, via the `JoinSet` in [`run`].
async fn accept_loop(
    listener: TcpListener,
    registry: Arc<Registry>,
    history: History,
    notify: NotifySender,
    config: Config,
) {
    loop {
        match listener.accept().await {
            Ok((sock, addr)) => {
                tokio::spawn(client::handle(
                    sock, addr, registry.clone(), history.clone(),
                    notify.clone(), config.clone(),
                ));
            }
            Err(err) => {
                error!("Failed to accept an RTR connection: {}.", err);
            }
        }
    }
}


#[cfg(test)]
mod test {
    use std::sync::Arc;
    use std::time::Duration;
    use bytes::{Buf, Bytes};
    use log::LevelFilter;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};
    use crate::config::{FilterPolicy, LogTarget};
    use crate::payload::{History, PayloadSnapshot, Vrp};
    use crate::resources::{Afi, Prefix};
    use crate::rtr::pdu::VERSION_1;
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

    const RESET_QUERY: u8 = 2;
    const CACHE_RESPONSE: u8 = 3;
    const IPV4_PREFIX: u8 = 4;
    const END_OF_DATA: u8 = 7;

    /// End-to-end through the real listener: accepting a connection,
    /// registering it, and answering a Reset Query with the committed
    /// snapshot (S4), exercising `accept_loop` and `client::handle`
    /// together rather than either in isolation.
    #[tokio::test]
    async fn accept_loop_serves_a_connecting_client() {
        let history = History::from_config(&config());
        history.commit(PayloadSnapshot::new(
            vec![Vrp::new(64496, Prefix::new(Afi::Ipv4, 0xC0000200, 24), 24)],
            Vec::new(),
        ));
        let registry = Arc::new(Registry::new());
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(accept_loop(
            listener, registry.clone(), history.clone(),
            NotifySender::new(), config(),
        ));

        let mut client = TcpStream::connect(addr).await.unwrap();
        let mut request = Vec::new();
        request.extend_from_slice(&[VERSION_1, RESET_QUERY, 0, 0]);
        request.extend_from_slice(&8u32.to_be_bytes());
        client.write_all(&request).await.unwrap();

        let (_, pdu_type, _, _) = read_raw(&mut client).await;
        assert_eq!(pdu_type, CACHE_RESPONSE);
        let (_, pdu_type, _, _) = read_raw(&mut client).await;
        assert_eq!(pdu_type, IPV4_PREFIX);
        let (_, pdu_type, _, _) = read_raw(&mut client).await;
        assert_eq!(pdu_type, END_OF_DATA);

        assert_eq!(registry.len(), 1);
    }
}
