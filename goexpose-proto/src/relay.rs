/// Bidirectional byte relay between two TCP sockets, with cooperative
/// cancellation instead of read-deadline polling. Two single-direction
/// tasks share one `CancellationToken`; whichever terminates first fires
/// it so the other observes cancellation at its next `select!` wakeup and
/// closes its own sink in turn — both sockets end up closed without either
/// task reaching into the other's half.
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;

const RELAY_BUF_SIZE: usize = 2048;

/// Copies bytes from `source` to `sink` until EOF, a write failure, or
/// cancellation. Always fires `cancel` on exit (idempotent) so a paired
/// relay running the opposite direction terminates promptly too.
pub async fn relay<R, W>(mut source: R, mut sink: W, cancel: CancellationToken) -> io::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = [0u8; RELAY_BUF_SIZE];

    let result = loop {
        tokio::select! {
            _ = cancel.cancelled() => break Ok(()),
            read = source.read(&mut buf) => {
                match read {
                    Ok(0) => break Ok(()),
                    Ok(n) => {
                        if sink.write_all(&buf[..n]).await.is_err() {
                            break Ok(());
                        }
                    }
                    Err(e) => break Err(e),
                }
            }
        }
    };

    cancel.cancel();
    let _ = sink.shutdown().await;
    result
}

/// Spawns the two directional relays for one proxied flow and waits for
/// both to finish. Used identically by the Server's exposure engine
/// (external <-> proxy) and the Client's rendezvous responder (proxy <->
/// local application).
pub async fn relay_pair(a: TcpStream, b: TcpStream, cancel: CancellationToken) {
    let (ar, aw) = a.into_split();
    let (br, bw) = b.into_split();

    let t1 = tokio::spawn(relay(ar, bw, cancel.clone()));
    let t2 = tokio::spawn(relay(br, aw, cancel));

    let _ = tokio::join!(t1, t2);
}
