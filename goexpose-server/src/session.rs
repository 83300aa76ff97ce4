/// Server-side session (spec §4.5): the exposure engine. Owns the control
/// connection's read/write halves, the outbound frame queue, the Exposure
/// map and the PortQueue. Only this task ever mutates the map or the queue —
/// per-port exposer tasks report their own completion instead of touching
/// either directly.
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use goexpose_proto::config::ProxyPoolConfig;
use goexpose_proto::{ControlFrame, FrameCodec, FrameType, PortQueue};

use crate::exposer::run_exposer;

struct ExposureHandle {
    proxy_port: u16,
    cancel: CancellationToken,
}

/// Drives one pairing end to end: dispatches inbound frames, tracks active
/// exposures, and tears everything down in order once the session
/// cancellation token fires (Unpair, control-read error, or shutdown).
pub async fn run_session<S>(
    stream: S,
    peer_addr: SocketAddr,
    proxy_cfg: ProxyPoolConfig,
    accept_timeout: Duration,
    session_token: CancellationToken,
) where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (mut reader, writer) = tokio::io::split(stream);
    let codec = FrameCodec::default();
    let (tx, rx) = mpsc::channel::<ControlFrame>(100);

    let egress = tokio::spawn(egress_task(writer, codec, rx));

    let mut exposures: HashMap<u16, ExposureHandle> = HashMap::new();
    let mut port_queue = PortQueue::new(proxy_cfg.base, proxy_cfg.amount);
    let mut tasks: JoinSet<(u16, u16)> = JoinSet::new();

    loop {
        tokio::select! {
            biased;

            _ = session_token.cancelled() => break,

            frame = codec.read_frame(&mut reader) => {
                match frame {
                    Ok(frame) => {
                        if dispatch(
                            frame,
                            peer_addr,
                            &tx,
                            &mut exposures,
                            &mut port_queue,
                            &mut tasks,
                            accept_timeout,
                            &session_token,
                        ) {
                            break;
                        }
                    }
                    Err(e) => {
                        tracing::warn!(%peer_addr, error = %e, "control read failed, ending session");
                        break;
                    }
                }
            }

            Some(result) = tasks.join_next(), if !tasks.is_empty() => {
                reclaim(result, &mut exposures, &mut port_queue);
            }
        }
    }

    session_token.cancel();
    let _ = tx.send(ControlFrame::unpair()).await;
    let _ = tx.send(ControlFrame { typ: FrameType::Stop, data: Vec::new() }).await;
    let _ = egress.await;

    while let Some(result) = tasks.join_next().await {
        reclaim(result, &mut exposures, &mut port_queue);
    }

    tracing::info!(%peer_addr, "session ended");
}

/// Returns `true` when the session should end (an `Unpair` frame arrived).
#[allow(clippy::too_many_arguments)]
fn dispatch(
    frame: ControlFrame,
    peer_addr: SocketAddr,
    outbound: &mpsc::Sender<ControlFrame>,
    exposures: &mut HashMap<u16, ExposureHandle>,
    port_queue: &mut PortQueue,
    tasks: &mut JoinSet<(u16, u16)>,
    accept_timeout: Duration,
    session_token: &CancellationToken,
) -> bool {
    match frame.typ {
        FrameType::Unpair => {
            tracing::info!(%peer_addr, "received Unpair");
            true
        }
        FrameType::ExposeTcp => {
            match frame.port() {
                Ok(port) => expose_tcp(port, peer_addr, outbound, exposures, port_queue, tasks, accept_timeout, session_token),
                Err(e) => tracing::warn!(%peer_addr, error = %e, "malformed ExposeTcp"),
            }
            false
        }
        FrameType::HideTcp => {
            match frame.port() {
                Ok(port) => hide_tcp(port, exposures),
                Err(e) => tracing::warn!(%peer_addr, error = %e, "malformed HideTcp"),
            }
            false
        }
        FrameType::ExposeUdp | FrameType::HideUdp => {
            tracing::debug!(%peer_addr, "ignoring reserved UDP frame");
            false
        }
        FrameType::Connect => {
            tracing::debug!(%peer_addr, "unexpected Connect on server side, ignoring");
            false
        }
        FrameType::Stop => {
            tracing::debug!(%peer_addr, "received private Stop frame on the wire, ignoring");
            false
        }
    }
}

/// Why an `ExposeTcp` was rejected (spec §4.5's pre-checks / spec §8's
/// boundary behaviors). Kept as a pure, synchronous decision separate from
/// `expose_tcp`'s side effects (spawning a task, mutating the maps) so the
/// three rejection reasons and the boundary ports that trigger them can be
/// tested without any I/O.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ExposeRejection {
    OutOfRange,
    AlreadyExposed,
    PoolExhausted,
}

/// Spec §4.5's three-step pre-check: range, then duplicate, then pool
/// availability. On acceptance, the proxy port is already taken out of
/// `port_queue` — callers own putting it back if they don't follow through.
fn validate_expose(
    port: u16,
    exposures: &HashMap<u16, ExposureHandle>,
    port_queue: &mut PortQueue,
) -> Result<u16, ExposeRejection> {
    if !(1024..=65535).contains(&port) {
        return Err(ExposeRejection::OutOfRange);
    }
    if exposures.contains_key(&port) {
        return Err(ExposeRejection::AlreadyExposed);
    }
    port_queue.take().ok_or(ExposeRejection::PoolExhausted)
}

#[allow(clippy::too_many_arguments)]
fn expose_tcp(
    port: u16,
    peer_addr: SocketAddr,
    outbound: &mpsc::Sender<ControlFrame>,
    exposures: &mut HashMap<u16, ExposureHandle>,
    port_queue: &mut PortQueue,
    tasks: &mut JoinSet<(u16, u16)>,
    accept_timeout: Duration,
    session_token: &CancellationToken,
) {
    let proxy_port = match validate_expose(port, exposures, port_queue) {
        Ok(proxy_port) => proxy_port,
        Err(ExposeRejection::OutOfRange) => {
            tracing::warn!(port, "rejecting ExposeTcp: port out of range");
            return;
        }
        Err(ExposeRejection::AlreadyExposed) => {
            tracing::warn!(port, "rejecting ExposeTcp: already exposed");
            return;
        }
        Err(ExposeRejection::PoolExhausted) => {
            tracing::warn!(port, "rejecting ExposeTcp: proxy pool exhausted");
            return;
        }
    };

    let exposure_cancel = session_token.child_token();
    tasks.spawn(run_exposer(
        port,
        proxy_port,
        peer_addr.ip(),
        outbound.clone(),
        accept_timeout,
        exposure_cancel.clone(),
    ));
    exposures.insert(port, ExposureHandle { proxy_port, cancel: exposure_cancel });
}

fn hide_tcp(port: u16, exposures: &mut HashMap<u16, ExposureHandle>) {
    if let Some(handle) = exposures.get(&port) {
        handle.cancel.cancel();
    } else {
        tracing::debug!(port, "HideTcp for a port that is not exposed, ignoring");
    }
}

fn reclaim(
    result: Result<(u16, u16), tokio::task::JoinError>,
    exposures: &mut HashMap<u16, ExposureHandle>,
    port_queue: &mut PortQueue,
) {
    if let Ok((external_port, proxy_port)) = result {
        exposures.remove(&external_port);
        port_queue.give(proxy_port);
    }
}

async fn egress_task<W>(mut writer: W, codec: FrameCodec, mut rx: mpsc::Receiver<ControlFrame>)
where
    W: AsyncWrite + Unpin,
{
    while let Some(frame) = rx.recv().await {
        if frame.typ == FrameType::Stop {
            break;
        }
        if let Err(e) = codec.write_frame(&mut writer, &frame).await {
            tracing::warn!(error = %e, "egress write failed");
            break;
        }
    }
    use tokio::io::AsyncWriteExt;
    let _ = writer.shutdown().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::IpAddr;

    fn peer_addr() -> SocketAddr {
        SocketAddr::new(IpAddr::from([127, 0, 0, 1]), 9000)
    }

    /// Spec §8 boundary behaviors: 1023 is rejected, 1024 and 65535 are
    /// the accepted edges of the range.
    #[test]
    fn boundary_ports_1023_rejected_1024_and_65535_accepted() {
        let exposures: HashMap<u16, ExposureHandle> = HashMap::new();
        let mut queue = PortQueue::new(47923, 10);

        assert_eq!(validate_expose(1023, &exposures, &mut queue), Err(ExposeRejection::OutOfRange));

        let taken = validate_expose(1024, &exposures, &mut queue).expect("1024 is in range");
        queue.give(taken); // restore the pool so the next check starts full

        let taken = validate_expose(65535, &exposures, &mut queue).expect("65535 is in range");
        queue.give(taken);

        assert_eq!(queue.len(), 10);
    }

    /// 65536 doesn't even exist as a `u16`: the spec's "1023 and 65536 are
    /// rejected" boundary is enforced one layer up, where the `ExposeTcp`
    /// frame's port string fails to parse before `validate_expose` ever runs.
    #[test]
    fn port_65536_fails_to_parse_before_the_range_check() {
        let frame = ControlFrame { typ: FrameType::ExposeTcp, data: vec!["65536".to_string()] };
        assert!(frame.port().is_err());
    }

    #[test]
    fn validate_expose_rejects_an_already_exposed_port() {
        let mut exposures: HashMap<u16, ExposureHandle> = HashMap::new();
        exposures.insert(9000, ExposureHandle { proxy_port: 47923, cancel: CancellationToken::new() });
        let mut queue = PortQueue::new(47924, 9);

        assert_eq!(validate_expose(9000, &exposures, &mut queue), Err(ExposeRejection::AlreadyExposed));
        assert_eq!(queue.len(), 9, "a rejected expose must not consume a proxy port");
    }

    #[test]
    fn validate_expose_rejects_when_the_pool_is_exhausted() {
        let exposures: HashMap<u16, ExposureHandle> = HashMap::new();
        let mut queue = PortQueue::new(47923, 0);

        assert_eq!(validate_expose(9001, &exposures, &mut queue), Err(ExposeRejection::PoolExhausted));
    }

    /// Testable property 1 / spec §8 boundary behavior: a rejected
    /// `ExposeTcp` is a no-op — no exposure recorded, no proxy port taken,
    /// and no frame put on the wire.
    #[test]
    fn dispatch_rejects_duplicate_exposure_as_a_silent_no_op() {
        let mut exposures: HashMap<u16, ExposureHandle> = HashMap::new();
        exposures.insert(9000, ExposureHandle { proxy_port: 47923, cancel: CancellationToken::new() });
        let mut queue = PortQueue::new(47924, 9);
        let mut tasks: JoinSet<(u16, u16)> = JoinSet::new();
        let (tx, mut rx) = mpsc::channel(4);
        let session_token = CancellationToken::new();

        let ended = dispatch(
            ControlFrame::expose_tcp(9000),
            peer_addr(),
            &tx,
            &mut exposures,
            &mut queue,
            &mut tasks,
            Duration::from_secs(2),
            &session_token,
        );

        assert!(!ended);
        assert!(tasks.is_empty());
        assert_eq!(exposures.len(), 1, "only the original exposure remains");
        assert_eq!(queue.len(), 9);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn dispatch_rejects_expose_when_the_proxy_pool_is_exhausted_as_a_silent_no_op() {
        let mut exposures: HashMap<u16, ExposureHandle> = HashMap::new();
        let mut queue = PortQueue::new(47923, 0);
        let mut tasks: JoinSet<(u16, u16)> = JoinSet::new();
        let (tx, mut rx) = mpsc::channel(4);
        let session_token = CancellationToken::new();

        let ended = dispatch(
            ControlFrame::expose_tcp(9001),
            peer_addr(),
            &tx,
            &mut exposures,
            &mut queue,
            &mut tasks,
            Duration::from_secs(2),
            &session_token,
        );

        assert!(!ended);
        assert!(tasks.is_empty());
        assert!(exposures.is_empty());
        assert!(queue.is_empty());
        assert!(rx.try_recv().is_err(), "a rejected ExposeTcp must not put any frame on the wire");
    }

    #[test]
    fn hide_tcp_is_a_no_op_for_a_port_that_is_not_exposed() {
        let mut exposures: HashMap<u16, ExposureHandle> = HashMap::new();
        hide_tcp(9002, &mut exposures);
        assert!(exposures.is_empty());
    }

    #[test]
    fn hide_tcp_cancels_the_exposure_token() {
        let mut exposures: HashMap<u16, ExposureHandle> = HashMap::new();
        let cancel = CancellationToken::new();
        exposures.insert(9003, ExposureHandle { proxy_port: 47923, cancel: cancel.clone() });

        hide_tcp(9003, &mut exposures);
        assert!(cancel.is_cancelled());
    }

    #[test]
    fn reclaim_removes_the_exposure_and_returns_the_proxy_port_to_the_queue() {
        let mut exposures: HashMap<u16, ExposureHandle> = HashMap::new();
        exposures.insert(9004, ExposureHandle { proxy_port: 47925, cancel: CancellationToken::new() });
        let mut queue = PortQueue::new(47923, 2);

        reclaim(Ok((9004, 47925)), &mut exposures, &mut queue);

        assert!(!exposures.contains_key(&9004));
        assert!(queue.contains(47925));
    }
}
