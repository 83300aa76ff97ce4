/// Client control loop (spec §4.7): a single `paired` state, driven by
/// commands from a `CommandSource`. `pair` while already paired and
/// `unpair`/`expose`/`hide` while unpaired are rejected.
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use goexpose_proto::tls::TlsMaterial;
use goexpose_proto::CommandSource;

use crate::session::{self, ClientSessionHandle, SessionCommand};

pub async fn run<C>(mut commands: C, tls_material: Arc<dyn TlsMaterial>, control_port: u16, shutdown: CancellationToken)
where
    C: CommandSource,
{
    let mut session: Option<ClientSessionHandle> = None;

    loop {
        tokio::select! {
            biased;

            _ = shutdown.cancelled() => break,

            _ = wait_session(&mut session), if session.is_some() => {
                println!("session ended");
                session = None;
            }

            maybe_cmd = commands.next_command() => {
                let Some(tokens) = maybe_cmd else { break };
                if handle_command(tokens, &mut session, &tls_material, control_port, &shutdown).await {
                    break;
                }
            }
        }
    }

    if let Some(s) = session.take() {
        s.cancel.cancel();
        let _ = s.task.await;
    }
}

async fn wait_session(session: &mut Option<ClientSessionHandle>) {
    if let Some(s) = session {
        let _ = (&mut s.task).await;
    }
}

/// Returns `true` when the control loop should exit (`exit` was issued).
async fn handle_command(
    tokens: Vec<String>,
    session: &mut Option<ClientSessionHandle>,
    tls_material: &Arc<dyn TlsMaterial>,
    control_port: u16,
    shutdown: &CancellationToken,
) -> bool {
    let Some(verb) = tokens.first().map(String::as_str) else { return false };

    match verb {
        "pair" => {
            if session.is_some() {
                println!("already paired");
                return false;
            }
            let Some(host) = tokens.get(1) else {
                println!("usage: pair <host>");
                return false;
            };
            match session::pair(host, control_port, tls_material.as_ref(), shutdown).await {
                Ok(handle) => {
                    println!("paired with {host}");
                    *session = Some(handle);
                }
                Err(e) => println!("pair failed: {e}"),
            }
        }
        "unpair" => {
            let Some(s) = session.take() else {
                println!("not paired");
                return false;
            };
            let _ = s.commands.send(SessionCommand::Unpair).await;
            let _ = s.task.await;
            println!("unpaired");
        }
        "expose" => {
            let Some(s) = session.as_ref() else {
                println!("not paired");
                return false;
            };
            match tokens.get(1).and_then(|p| p.parse::<u16>().ok()) {
                Some(port) => {
                    let _ = s.commands.send(SessionCommand::Expose(port)).await;
                    println!("exposing {port}");
                }
                None => println!("usage: expose <port>"),
            }
        }
        "hide" => {
            let Some(s) = session.as_ref() else {
                println!("not paired");
                return false;
            };
            match tokens.get(1).and_then(|p| p.parse::<u16>().ok()) {
                Some(port) => {
                    let _ = s.commands.send(SessionCommand::Hide(port)).await;
                    println!("hiding {port}");
                }
                None => println!("usage: hide <port>"),
            }
        }
        "exit" => {
            shutdown.cancel();
            return true;
        }
        other => println!("unknown command: {other}"),
    }
    false
}
