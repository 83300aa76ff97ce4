/// Client-side session (spec §4.6): the rendezvous responder. Dials the
/// Server mutually authenticated, then owns the control connection's
/// reader/writer halves and the exposure map for the lifetime of one
/// pairing. `Connect` frames trigger a dial to the Server's proxy port and
/// to the local application, relayed together.
use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_rustls::TlsConnector;
use tokio_util::sync::CancellationToken;

use goexpose_proto::tls::TlsMaterial;
use goexpose_proto::{relay_pair, ControlFrame, FrameCodec, FrameType, GoExposeError};

/// Requests the control loop forwards into a live session.
pub enum SessionCommand {
    Expose(u16),
    Hide(u16),
    Unpair,
}

pub struct ClientSessionHandle {
    pub commands: mpsc::Sender<SessionCommand>,
    pub cancel: CancellationToken,
    pub task: JoinHandle<()>,
}

/// Resolves `host`, TLS-dials the control port with mutual authentication,
/// and spawns the session task. `host` may be a literal IPv4 address or a
/// DNS name, per spec §4.6.
pub async fn pair(
    host: &str,
    control_port: u16,
    tls_material: &dyn TlsMaterial,
    parent_shutdown: &CancellationToken,
) -> Result<ClientSessionHandle, GoExposeError> {
    let ip = resolve_host(host).await.map_err(GoExposeError::Transport)?;
    let addr = SocketAddr::new(ip, control_port);

    let client_config = tls_material.client_config().map_err(|e| GoExposeError::Config(e.to_string()))?;
    let connector = TlsConnector::from(client_config);

    let tcp = TcpStream::connect(addr).await.map_err(GoExposeError::Transport)?;
    let server_name = rustls::pki_types::ServerName::try_from(host.to_string())
        .map_err(|e| GoExposeError::Config(e.to_string()))?;
    let tls = connector.connect(server_name, tcp).await.map_err(GoExposeError::Transport)?;

    let (reader, writer) = tokio::io::split(tls);
    let session_token = parent_shutdown.child_token();
    let (cmd_tx, cmd_rx) = mpsc::channel(32);

    let task = tokio::spawn(run_session(reader, writer, ip, cmd_rx, session_token.clone()));

    Ok(ClientSessionHandle { commands: cmd_tx, cancel: session_token, task })
}

async fn resolve_host(host: &str) -> std::io::Result<IpAddr> {
    if let Ok(ip) = host.parse::<IpAddr>() {
        return Ok(ip);
    }
    let mut addrs = tokio::net::lookup_host((host, 0)).await?;
    addrs.next().map(|a| a.ip()).ok_or_else(|| {
        std::io::Error::new(std::io::ErrorKind::NotFound, format!("could not resolve {host}"))
    })
}

async fn run_session<R, W>(
    mut reader: R,
    writer: W,
    paired_ip: IpAddr,
    mut cmd_rx: mpsc::Receiver<SessionCommand>,
    session_token: CancellationToken,
) where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let codec = FrameCodec::default();
    let (tx, rx) = mpsc::channel::<ControlFrame>(100);
    let egress = tokio::spawn(egress_task(writer, codec, rx));

    let mut exposures: HashMap<u16, CancellationToken> = HashMap::new();

    loop {
        tokio::select! {
            biased;

            _ = session_token.cancelled() => break,

            frame = codec.read_frame(&mut reader) => {
                match frame {
                    Ok(f) => {
                        if handle_frame(f, paired_ip, &exposures).await {
                            break;
                        }
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "control read failed, ending session");
                        break;
                    }
                }
            }

            Some(cmd) = cmd_rx.recv() => {
                if handle_session_command(cmd, &tx, &mut exposures, &session_token).await {
                    break;
                }
            }
        }
    }

    session_token.cancel();
    let _ = tx.send(ControlFrame { typ: FrameType::Stop, data: Vec::new() }).await;
    let _ = egress.await;

    for (_, cancel) in exposures {
        cancel.cancel();
    }
}

/// Returns `true` when the session should end (an `Unpair` frame arrived or
/// the control read failed).
async fn handle_frame(frame: ControlFrame, paired_ip: IpAddr, exposures: &HashMap<u16, CancellationToken>) -> bool {
    match frame.typ {
        FrameType::Unpair => {
            tracing::info!("received Unpair");
            true
        }
        FrameType::Connect => {
            match frame.connect_ports() {
                Ok((external_port, proxy_port)) => dial_rendezvous(external_port, proxy_port, paired_ip, exposures).await,
                Err(e) => tracing::warn!(error = %e, "malformed Connect"),
            }
            false
        }
        FrameType::ExposeUdp | FrameType::HideUdp => {
            tracing::debug!("ignoring reserved UDP frame");
            false
        }
        FrameType::ExposeTcp | FrameType::HideTcp | FrameType::Stop => {
            tracing::debug!("unexpected frame type on the client side, ignoring");
            false
        }
    }
}

/// `Connect` for a port this Client has not exposed is dropped without
/// dialing — the Client-side half of the open question recorded in DESIGN.md.
async fn dial_rendezvous(external_port: u16, proxy_port: u16, paired_ip: IpAddr, exposures: &HashMap<u16, CancellationToken>) {
    let Some(exposure_cancel) = exposures.get(&external_port) else {
        tracing::debug!(external_port, "Connect for a port not exposed locally, dropping");
        return;
    };

    let proxy_addr = SocketAddr::new(paired_ip, proxy_port);
    let proxy = match TcpStream::connect(proxy_addr).await {
        Ok(s) => s,
        Err(e) => {
            tracing::warn!(%proxy_addr, error = %e, "failed to dial the Server's proxy port");
            return;
        }
    };

    let local_addr: SocketAddr = ([127, 0, 0, 1], external_port).into();
    let local = match TcpStream::connect(local_addr).await {
        Ok(s) => s,
        Err(e) => {
            tracing::warn!(%local_addr, error = %e, "failed to dial the local application");
            return;
        }
    };

    let flow_cancel = exposure_cancel.child_token();
    tokio::spawn(relay_pair(proxy, local, flow_cancel));
}

/// Returns `true` when the session should end (`unpair` was requested).
async fn handle_session_command(
    cmd: SessionCommand,
    outbound: &mpsc::Sender<ControlFrame>,
    exposures: &mut HashMap<u16, CancellationToken>,
    session_token: &CancellationToken,
) -> bool {
    match cmd {
        SessionCommand::Expose(port) => {
            let _ = outbound.send(ControlFrame::expose_tcp(port)).await;
            exposures.insert(port, session_token.child_token());
            false
        }
        SessionCommand::Hide(port) => {
            if let Some(cancel) = exposures.remove(&port) {
                cancel.cancel();
            }
            let _ = outbound.send(ControlFrame::hide_tcp(port)).await;
            false
        }
        SessionCommand::Unpair => {
            let _ = outbound.send(ControlFrame::unpair()).await;
            true
        }
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
