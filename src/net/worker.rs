//! Connection worker: per-connection read and write tasks
//!
//! The read task feeds the streaming frame decoder and dispatches decoded
//! client messages; the write task drains the session's outbound queue in
//! order. Either side terminating closes the session, which wakes the other
//! side. Transient would-block conditions never surface here: the runtime's
//! readiness polling retries them below the `read`/`write_all` calls.

use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::io::AsyncReadExt;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tracing::{debug, warn};

use crate::context::ServerContext;
use crate::game::constants::net::{OUTBOUND_PARK_MS, READ_CHUNK};
use crate::net::framing::{write_frame, FrameDecoder};
use crate::net::protocol::{decode, encode, ClientMessage, DecodeError, ServerMessage};
use crate::net::registry::Session;

/// Serve one accepted connection until either direction terminates
pub async fn handle_connection(stream: TcpStream, peer: SocketAddr, server: ServerContext) {
    let session = server.registry.add_connection();
    debug!("connection {} accepted from {}", session.connection_id, peer);

    let (read_half, write_half) = stream.into_split();
    let writer = tokio::spawn(write_loop(write_half, session.clone(), server.clone()));

    read_loop(read_half, &session, &server).await;

    // Read side is done: close the session so the writer drains and exits
    server.registry.disconnect_session(&session);
    let _ = writer.await;
    debug!("connection {} closed", session.connection_id);
}

async fn read_loop(mut read_half: OwnedReadHalf, session: &Arc<Session>, server: &ServerContext) {
    let mut decoder = FrameDecoder::new();
    let mut buf = vec![0u8; READ_CHUNK];

    'conn: loop {
        tokio::select! {
            _ = server.shutdown.wait() => break 'conn,
            _ = session.wait_closed() => break 'conn,
            result = read_half.read(&mut buf) => {
                let n = match result {
                    Ok(0) => {
                        debug!("connection {}: peer closed", session.connection_id);
                        break 'conn;
                    }
                    Ok(n) => n,
                    Err(e) => {
                        debug!("connection {}: read error: {}", session.connection_id, e);
                        break 'conn;
                    }
                };
                decoder.extend(&buf[..n]);
                loop {
                    match decoder.try_extract() {
                        Ok(Some(frame)) => {
                            server.metrics.frames_received.fetch_add(1, Ordering::Relaxed);
                            if let Err(e) = dispatch(&frame, session, server) {
                                warn!(
                                    "connection {}: undecodable frame, closing: {}",
                                    session.connection_id, e
                                );
                                break 'conn;
                            }
                        }
                        Ok(None) => break,
                        Err(e) => {
                            warn!("connection {}: {}, closing", session.connection_id, e);
                            break 'conn;
                        }
                    }
                }
            }
        }
    }
}

/// Decode one frame and apply it to the session. A decode failure is
/// protocol-fatal; every application-level outcome (auth rejection, a full
/// queue, stale input) is handled without surfacing an error frame.
fn dispatch(
    frame: &[u8],
    session: &Arc<Session>,
    server: &ServerContext,
) -> Result<(), DecodeError> {
    let message: ClientMessage = decode(frame)?;
    match message {
        ClientMessage::AuthRequest {
            token,
            client_version,
        } => {
            if session.is_authenticated() {
                let session_id = session.session_id().unwrap_or_default();
                server.registry.push_message(
                    session,
                    ServerMessage::AuthResponse {
                        success: true,
                        session_id,
                        reason: String::new(),
                    },
                );
                return Ok(());
            }
            match server.auth.validate(&token, &client_version) {
                Ok(session_id) => match server.registry.authenticate(session, session_id.clone()) {
                    Ok(()) => {
                        debug!(
                            "connection {} authenticated as {}",
                            session.connection_id, session_id
                        );
                        server.registry.push_message(
                            session,
                            ServerMessage::AuthResponse {
                                success: true,
                                session_id,
                                reason: String::new(),
                            },
                        );
                    }
                    Err(e) => {
                        warn!("connection {}: auth failed: {}", session.connection_id, e);
                        server.registry.push_message(
                            session,
                            ServerMessage::AuthResponse {
                                success: false,
                                session_id: String::new(),
                                reason: e.to_string(),
                            },
                        );
                        session.request_close_after_flush();
                    }
                },
                Err(e) => {
                    server.registry.push_message(
                        session,
                        ServerMessage::AuthResponse {
                            success: false,
                            session_id: String::new(),
                            reason: e.to_string(),
                        },
                    );
                    session.request_close_after_flush();
                }
            }
        }
        ClientMessage::QueueJoin => {
            if let Err(e) = server.registry.enqueue(session) {
                debug!(
                    "connection {}: queue join refused: {}",
                    session.connection_id, e
                );
            }
        }
        ClientMessage::Input(cmd) => {
            server.registry.update_input(session, &cmd);
        }
        ClientMessage::Heartbeat { client_time_ms, .. } => {
            server.registry.update_heartbeat(session);
            let server_time_ms = unix_millis();
            server.registry.push_message(
                session,
                ServerMessage::HeartbeatResponse {
                    client_time_ms,
                    server_time_ms,
                    delta_ms: server_time_ms as i64 - client_time_ms as i64,
                },
            );
        }
    }
    Ok(())
}

async fn write_loop(mut write_half: OwnedWriteHalf, session: Arc<Session>, server: ServerContext) {
    loop {
        let messages = server.registry.drain_messages(&session);
        if messages.is_empty() {
            if session.is_closed() || session.close_after_flush() || server.shutdown.triggered() {
                break;
            }
            tokio::select! {
                _ = session.outbound_ready() => {}
                _ = server.shutdown.wait() => {}
                _ = tokio::time::sleep(Duration::from_millis(OUTBOUND_PARK_MS)) => {}
            }
            continue;
        }

        for message in messages {
            let payload = match encode(&message) {
                Ok(payload) => payload,
                Err(e) => {
                    warn!(
                        "connection {}: dropping unencodable message: {}",
                        session.connection_id, e
                    );
                    continue;
                }
            };
            if let Err(e) = write_frame(&mut write_half, &payload).await {
                debug!(
                    "connection {}: write failed: {}",
                    session.connection_id, e
                );
                server.registry.disconnect_session(&session);
                return;
            }
        }
    }

    let _ = write_half.shutdown().await;
    server.registry.disconnect_session(&session);
}

fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::config::ServerConfig;
    use crate::context::ShutdownHandle;
    use crate::net::protocol::InputCommand;

    // The handle must stay alive: dropping it reads as a shutdown request to
    // the connection tasks
    fn test_server() -> (ServerContext, ShutdownHandle) {
        ServerContext::new(ServerConfig::default()).unwrap()
    }

    fn frame_of(message: &ClientMessage) -> Vec<u8> {
        encode(message).unwrap()
    }

    #[test]
    fn test_dispatch_auth_success() {
        let (server, _keep) = test_server();
        let session = server.registry.add_connection();

        let frame = frame_of(&ClientMessage::AuthRequest {
            token: "secret".to_string(),
            client_version: "1.0".to_string(),
        });
        dispatch(&frame, &session, &server).unwrap();

        assert!(session.is_authenticated());
        let messages = server.registry.drain_messages(&session);
        match messages.as_slice() {
            [ServerMessage::AuthResponse {
                success: true,
                session_id,
                ..
            }] => {
                assert_eq!(session_id, &session.session_id().unwrap());
            }
            other => panic!("unexpected: {other:?}"),
        }
        assert!(!session.close_after_flush());
    }

    #[test]
    fn test_dispatch_auth_failure_closes_after_flush() {
        let (server, _keep) = test_server();
        let session = server.registry.add_connection();

        let frame = frame_of(&ClientMessage::AuthRequest {
            token: String::new(), // stub rejects empty tokens
            client_version: "1.0".to_string(),
        });
        dispatch(&frame, &session, &server).unwrap();

        assert!(!session.is_authenticated());
        assert!(session.close_after_flush());
        let messages = server.registry.drain_messages(&session);
        match messages.as_slice() {
            [ServerMessage::AuthResponse { success: false, reason, .. }] => {
                assert!(!reason.is_empty());
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_dispatch_duplicate_session_id_rejected() {
        let (server, _keep) = test_server();
        let auth = ClientMessage::AuthRequest {
            token: "same-token".to_string(),
            client_version: "1.0".to_string(),
        };

        let first = server.registry.add_connection();
        dispatch(&frame_of(&auth), &first, &server).unwrap();
        assert!(first.is_authenticated());

        // The stub maps the same token to the same session id
        let second = server.registry.add_connection();
        dispatch(&frame_of(&auth), &second, &server).unwrap();
        assert!(!second.is_authenticated());
        assert!(second.close_after_flush());
    }

    #[test]
    fn test_dispatch_queue_join() {
        let (server, _keep) = test_server();
        let session = server.registry.add_connection();

        // Unauthenticated join is refused quietly
        dispatch(&frame_of(&ClientMessage::QueueJoin), &session, &server).unwrap();
        assert_eq!(server.registry.queue_len(), 0);

        dispatch(
            &frame_of(&ClientMessage::AuthRequest {
                token: "t".to_string(),
                client_version: "1.0".to_string(),
            }),
            &session,
            &server,
        )
        .unwrap();
        dispatch(&frame_of(&ClientMessage::QueueJoin), &session, &server).unwrap();
        assert_eq!(server.registry.queue_len(), 1);
    }

    #[test]
    fn test_dispatch_input_updates_retained_state() {
        let (server, _keep) = test_server();
        let session = server.registry.add_connection();

        let frame = frame_of(&ClientMessage::Input(InputCommand {
            client_tick: 9,
            move_dir: -1.0,
            fire: true,
            ..Default::default()
        }));
        dispatch(&frame, &session, &server).unwrap();

        let input = server.registry.input_snapshot(&session);
        assert_eq!(input.last_client_tick, 9);
        assert_eq!(input.move_dir, -1.0);
        assert!(input.fire);
    }

    #[test]
    fn test_dispatch_heartbeat_responds() {
        let (server, _keep) = test_server();
        let session = server.registry.add_connection();

        let frame = frame_of(&ClientMessage::Heartbeat {
            session_id: "s".to_string(),
            client_time_ms: 12345,
        });
        dispatch(&frame, &session, &server).unwrap();

        let messages = server.registry.drain_messages(&session);
        match messages.as_slice() {
            [ServerMessage::HeartbeatResponse {
                client_time_ms,
                server_time_ms,
                delta_ms,
            }] => {
                assert_eq!(*client_time_ms, 12345);
                assert_eq!(*delta_ms, *server_time_ms as i64 - 12345);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_dispatch_garbage_is_fatal() {
        let (server, _keep) = test_server();
        let session = server.registry.add_connection();
        assert!(dispatch(&[0xFF, 0xFE], &session, &server).is_err());
    }

    #[tokio::test]
    async fn test_connection_end_to_end() {
        use tokio::net::{TcpListener, TcpStream};

        let (server, _keep) = test_server();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let accept_server = server.clone();
        tokio::spawn(async move {
            let (stream, peer) = listener.accept().await.unwrap();
            handle_connection(stream, peer, accept_server).await;
        });

        let mut client = TcpStream::connect(addr).await.unwrap();
        let auth = encode(&ClientMessage::AuthRequest {
            token: "tok".to_string(),
            client_version: "1.0".to_string(),
        })
        .unwrap();
        write_frame(&mut client, &auth).await.unwrap();

        // Read the framed AuthResponse back
        let mut decoder = FrameDecoder::new();
        let mut buf = [0u8; 1024];
        let response: ServerMessage = loop {
            let n = client.read(&mut buf).await.unwrap();
            assert!(n > 0, "server closed before responding");
            decoder.extend(&buf[..n]);
            if let Some(frame) = decoder.try_extract().unwrap() {
                break decode(&frame).unwrap();
            }
        };
        match response {
            ServerMessage::AuthResponse { success, session_id, .. } => {
                assert!(success);
                assert!(!session_id.is_empty());
            }
            other => panic!("unexpected: {other:?}"),
        }

        // Dropping the client tears the session down
        drop(client);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(server.registry.connection_count(), 0);
    }
}
