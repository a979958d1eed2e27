//! The accept loop: binds the listener, provisions the host key, and hands
//! each incoming connection to its own protocol task (driving the `russh`
//! handshake) and negotiator/worker task (driving the chat session).

use std::borrow::Cow;
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use russh::keys::{Algorithm, HashAlg};
use russh::{MethodKind, MethodSet, Preferred};
use tokio::net::TcpListener;
use tokio::sync::mpsc::unbounded_channel;
use tracing::{error, info, warn};

use tnt_core::rate_limit::Admission;

use crate::handler::ServerHandler;
use crate::keys::provision_host_key;
use crate::worker;
use crate::{AppState, Config};

fn build_russh_config(host_key: russh::keys::PrivateKey) -> russh::server::Config {
    russh::server::Config {
        auth_rejection_time: Duration::from_secs(1),
        auth_rejection_time_initial: Some(Duration::from_secs(0)),
        methods: MethodSet::from(&[MethodKind::Password, MethodKind::None][..]),
        keys: vec![host_key],
        event_buffer_size: 100,
        nodelay: true,
        preferred: Preferred {
            key: Cow::Borrowed(&[
                Algorithm::Ed25519,
                Algorithm::Rsa {
                    hash: Some(HashAlg::Sha512),
                },
                Algorithm::Rsa { hash: None },
            ]),
            ..<_>::default()
        },
        ..<_>::default()
    }
}

pub async fn run(config: Config, host_key_path: PathBuf, log_path: PathBuf) -> Result<()> {
    let host_key = provision_host_key(&host_key_path).context("provisioning host key")?;
    let russh_config = Arc::new(build_russh_config(host_key));

    let state = Arc::new(AppState::new(config, log_path));

    let addr = format!("{}:{}", state.config.bind_addr, state.config.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!(%addr, "listening");

    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(pair) => pair,
            Err(e) => {
                error!(error = %e, "accept failed");
                continue;
            }
        };
        let peer_ip = peer.ip().to_string();
        let state = state.clone();
        let russh_config = russh_config.clone();

        if state.config.rate_limit_enabled
            && (state.rate_limiter.is_blocked(&peer_ip)
                || state.rate_limiter.admit_connection(&peer_ip) == Admission::Denied)
        {
            deny_with_delay(stream);
            continue;
        }
        if state.session_count.load(Ordering::SeqCst) >= state.config.max_connections {
            deny_with_delay(stream);
            continue;
        }
        if !state
            .per_ip_connections
            .try_acquire(&peer_ip, state.config.max_conn_per_ip)
        {
            deny_with_delay(stream);
            continue;
        }
        state.session_count.fetch_add(1, Ordering::SeqCst);

        let _ = stream.set_nodelay(true);
        let (event_tx, event_rx) = unbounded_channel();
        let handler = ServerHandler::new(state.clone(), peer_ip.clone(), event_tx);

        tokio::spawn(worker::run(state, peer_ip.clone(), event_rx));
        tokio::spawn(async move {
            if let Err(e) = run_stream(russh_config, stream, handler).await {
                warn!(peer = %peer_ip, error = %e, "ssh protocol session ended with an error");
            }
        });
    }
}

/// Closes a denied connection after a short delay instead of dropping it
/// immediately, so a scripted reconnect storm can't busy-loop against the
/// accept loop. The delay runs on its own task so a burst of denials doesn't
/// stall accepting the next, possibly legitimate, connection.
fn deny_with_delay(stream: tokio::net::TcpStream) {
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        drop(stream);
    });
}

async fn run_stream(
    config: Arc<russh::server::Config>,
    socket: tokio::net::TcpStream,
    handler: ServerHandler,
) -> Result<()> {
    let session = russh::server::run_stream(config, socket, handler).await?;
    session.await?;
    Ok(())
}
