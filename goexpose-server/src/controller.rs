/// Server control loop (spec §4.4): `Listening -> Authenticating -> Paired
/// -> Draining -> Listening`. Only one `Session` is permitted at a time; the
/// control listener is closed while `Paired` and rebound on return to
/// `Listening`, so a second dial during a live pairing fails fast rather
/// than queuing.
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;
use tokio_util::sync::CancellationToken;

use goexpose_proto::config::ProxyPoolConfig;
use goexpose_proto::GoExposeError;

use crate::session::run_session;

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

enum ServerState {
    Listening,
    Authenticating { tcp: tokio::net::TcpStream, peer_addr: SocketAddr },
    Paired { tls: tokio_rustls::server::TlsStream<tokio::net::TcpStream>, peer_addr: SocketAddr },
    Draining,
}

pub async fn run(
    listen_addr: SocketAddr,
    tls_config: Arc<rustls::ServerConfig>,
    proxy_cfg: ProxyPoolConfig,
    accept_timeout: Duration,
    shutdown: CancellationToken,
) -> Result<(), GoExposeError> {
    let acceptor = TlsAcceptor::from(tls_config);
    let mut listener = bind_listener(listen_addr).await?;
    let mut state = ServerState::Listening;

    loop {
        state = match state {
            ServerState::Listening => {
                tracing::info!(%listen_addr, "listening for control connections");
                tokio::select! {
                    _ = shutdown.cancelled() => return Ok(()),
                    accepted = listener.accept() => match accepted {
                        Ok((tcp, peer_addr)) => ServerState::Authenticating { tcp, peer_addr },
                        Err(e) => {
                            tracing::warn!(error = %e, "accept failed");
                            ServerState::Listening
                        }
                    },
                }
            }

            ServerState::Authenticating { tcp, peer_addr } => {
                tracing::debug!(%peer_addr, "authenticating control connection");
                match tokio::time::timeout(HANDSHAKE_TIMEOUT, acceptor.accept(tcp)).await {
                    Ok(Ok(tls)) => ServerState::Paired { tls, peer_addr },
                    Ok(Err(e)) => {
                        tracing::warn!(%peer_addr, error = %e, "TLS handshake failed");
                        ServerState::Listening
                    }
                    Err(_) => {
                        tracing::warn!(%peer_addr, "TLS handshake timed out");
                        ServerState::Listening
                    }
                }
            }

            ServerState::Paired { tls, peer_addr } => {
                // Drop the listener: only one Session is permitted, so no
                // further control connections are accepted until we drain.
                drop(listener);
                tracing::info!(%peer_addr, "paired");

                let session_token = shutdown.child_token();
                run_session(tls, peer_addr, proxy_cfg.clone(), accept_timeout, session_token).await;
                ServerState::Draining
            }

            ServerState::Draining => {
                if shutdown.is_cancelled() {
                    return Ok(());
                }
                listener = bind_listener(listen_addr).await?;
                ServerState::Listening
            }
        };
    }
}

async fn bind_listener(addr: SocketAddr) -> Result<TcpListener, GoExposeError> {
    TcpListener::bind(addr).await.map_err(|source| GoExposeError::Bind { addr: addr.to_string(), source })
}
