/// Per-port exposer task (spec §4.5): owns one external listener for the
/// lifetime of one exposure. Each accepted external connection triggers a
/// rendezvous — open a fresh proxy-port listener, announce `Connect` on the
/// control channel, accept the Client's dial within the configured timeout,
/// validate its peer IP, then hand both sockets to a relay pair.
use std::net::IpAddr;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use goexpose_proto::{relay_pair, ControlFrame};

/// Runs until session/port cancellation or a listener error. Always returns
/// its own `(external_port, proxy_port)` so the dispatcher — the sole owner
/// of the Exposure map and PortQueue — can reclaim both on completion.
pub async fn run_exposer(
    external_port: u16,
    proxy_port: u16,
    peer_ip: IpAddr,
    outbound: mpsc::Sender<ControlFrame>,
    accept_timeout: Duration,
    cancel: CancellationToken,
) -> (u16, u16) {
    let listener = match TcpListener::bind(("0.0.0.0", external_port)).await {
        Ok(l) => l,
        Err(e) => {
            tracing::warn!(external_port, error = %e, "failed to bind exposed port");
            return (external_port, proxy_port);
        }
    };
    tracing::info!(external_port, proxy_port, "exposure listening");

    loop {
        let external = tokio::select! {
            _ = cancel.cancelled() => break,
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, _addr)) => stream,
                    Err(e) => {
                        tracing::warn!(external_port, error = %e, "accept failed, exiting exposure");
                        break;
                    }
                }
            }
        };

        if let Err(e) =
            rendezvous(external, external_port, proxy_port, peer_ip, &outbound, accept_timeout, &cancel).await
        {
            tracing::debug!(external_port, error = %e, "rendezvous failed, continuing to accept");
        }
    }

    tracing::info!(external_port, "exposure stopped");
    (external_port, proxy_port)
}

async fn rendezvous(
    external: TcpStream,
    external_port: u16,
    proxy_port: u16,
    peer_ip: IpAddr,
    outbound: &mpsc::Sender<ControlFrame>,
    accept_timeout: Duration,
    cancel: &CancellationToken,
) -> std::io::Result<()> {
    let proxy_listener = TcpListener::bind(("0.0.0.0", proxy_port)).await?;

    if outbound.send(ControlFrame::connect(external_port, proxy_port)).await.is_err() {
        return Err(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "control channel closed"));
    }

    // The 2-second window (spec §4.5 step d) covers the whole rendezvous, not
    // just the first candidate: an impostor dialing and getting rejected
    // must not cost the real Client its chance to connect within the same
    // deadline (spec §8 S6).
    let accepted =
        tokio::time::timeout(accept_timeout, accept_matching_peer(&proxy_listener, external_port, peer_ip)).await;
    let proxy_stream = match accepted {
        Ok(Ok(stream)) => stream,
        Ok(Err(e)) => return Err(e),
        Err(_) => return Err(std::io::Error::new(std::io::ErrorKind::TimedOut, "proxy rendezvous timed out")),
    };

    drop(proxy_listener);

    let flow_cancel = cancel.child_token();
    relay_pair(external, proxy_stream, flow_cancel).await;
    Ok(())
}

/// Accepts on `proxy_listener` until a connection whose peer IP matches
/// `peer_ip` arrives, silently dropping any impostor in between. Bounded by
/// the caller's `timeout`, not by a fixed number of attempts.
async fn accept_matching_peer(
    proxy_listener: &TcpListener,
    external_port: u16,
    peer_ip: IpAddr,
) -> std::io::Result<TcpStream> {
    loop {
        let (proxy_stream, proxy_addr) = proxy_listener.accept().await?;
        if proxy_addr.ip() == peer_ip {
            return Ok(proxy_stream);
        }
        tracing::warn!(
            external_port,
            got = %proxy_addr.ip(),
            expected = %peer_ip,
            "rejecting proxy connection from unexpected peer, still waiting for the real one"
        );
        // proxy_stream is dropped here; keep accepting within the same deadline.
    }
}
