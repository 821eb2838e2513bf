//! Newline-delimited JSON transport over TCP (spec.md §6: "JSON, one message
//! per frame"). One task per accepted connection reads frames strictly in
//! arrival order and awaits `Router::dispatch` before reading the next one,
//! satisfying the per-client ordering guarantee in spec.md §5; a second task
//! per connection drains that client's outbound notification queue.

use std::net::SocketAddr;
use std::sync::Arc;

use relay_core::Server;
use relay_proto::{now_iso8601, Envelope, ErrorPayload, MessageType};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Accepts connections on `addr` until `shutdown` is cancelled. `addr` is
/// resolved (hostname or literal IP) the same way `TcpListener::bind` always
/// resolves its argument.
pub async fn serve(
	server: Arc<Server>,
	addr: impl ToSocketAddrs,
	shutdown: CancellationToken,
) -> std::io::Result<()> {
	let listener = TcpListener::bind(addr).await?;
	let local_addr = listener.local_addr()?;
	info!(addr = %local_addr, "listening");

	loop {
		tokio::select! {
			_ = shutdown.cancelled() => {
				info!("transport accept loop stopping");
				return Ok(());
			}
			accepted = listener.accept() => {
				let (stream, peer) = accepted?;
				let server = server.clone();
				let shutdown = shutdown.clone();
				tokio::spawn(async move {
					if let Err(err) = handle_connection(server, stream, peer, shutdown).await {
						warn!(%peer, error = %err, "connection ended with error");
					}
				});
			}
		}
	}
}

async fn write_line(writer: &mut (impl AsyncWriteExt + Unpin), envelope: &Envelope) -> std::io::Result<()> {
	let mut line = serde_json::to_vec(envelope).expect("Envelope always serializes");
	line.push(b'\n');
	writer.write_all(&line).await
}

fn malformed_first_frame() -> Envelope {
	Envelope {
		message_type: MessageType::Error,
		id: format!("err-{}", uuid::Uuid::new_v4()),
		timestamp: now_iso8601(),
		payload: serde_json::to_value(ErrorPayload::new(
			relay_proto::ErrorCode::InvalidMessageFormat,
			"first frame on a connection must be a `connection` message",
			None,
		))
		.expect("ErrorPayload always serializes"),
		response_to: None,
	}
}

async fn handle_connection(
	server: Arc<Server>,
	stream: TcpStream,
	peer: SocketAddr,
	shutdown: CancellationToken,
) -> std::io::Result<()> {
	let (read_half, mut write_half) = stream.into_split();
	let mut lines = BufReader::new(read_half).lines();

	let Some(first_line) = lines.next_line().await? else {
		return Ok(());
	};

	let envelope = match Envelope::parse(first_line.as_bytes()) {
		Ok(e) if e.message_type == MessageType::Connection => e,
		_ => {
			write_line(&mut write_half, &malformed_first_frame()).await?;
			return Ok(());
		}
	};

	let payload: relay_proto::messages::ConnectionPayload =
		match serde_json::from_value(envelope.payload.clone()) {
			Ok(p) => p,
			Err(_) => {
				write_line(&mut write_half, &malformed_first_frame()).await?;
				return Ok(());
			}
		};
	let client_id = payload.client_id.clone();

	let (mut outbound_rx, ack) = match server
		.router
		.handle_connection(payload, Some(peer.ip().to_string()))
		.await
	{
		Ok(pair) => pair,
		Err(error_envelope) => {
			write_line(&mut write_half, &error_envelope).await?;
			return Ok(());
		}
	};

	write_line(&mut write_half, &ack).await?;

	let writer_task = tokio::spawn(async move {
		while let Some(envelope) = outbound_rx.recv().await {
			if write_line(&mut write_half, &envelope).await.is_err() {
				break;
			}
		}
	});

	loop {
		tokio::select! {
			_ = shutdown.cancelled() => break,
			line = lines.next_line() => {
				let line = match line {
					Ok(Some(line)) => line,
					Ok(None) => break,
					Err(err) => {
						warn!(%client_id, error = %err, "read error, closing connection");
						break;
					}
				};
				if line.trim().is_empty() {
					continue;
				}
				let response = match Envelope::parse(line.as_bytes()) {
					Ok(envelope) => server.router.dispatch(&client_id, envelope).await,
					Err(err) => Envelope {
						message_type: MessageType::Error,
						id: format!("err-{}", uuid::Uuid::new_v4()),
						timestamp: now_iso8601(),
						payload: serde_json::to_value(ErrorPayload::new(err.code(), err.to_string(), None))
							.expect("ErrorPayload always serializes"),
						response_to: None,
					},
				};
				if !server.router.connections.try_send(&client_id, response).await {
					warn!(%client_id, "dropped response: outbound queue full or client gone");
				}
			}
		}
	}

	server.sessions.remove_client_from_all(
		&client_id,
		&server
			.connections
			.get(&client_id)
			.await
			.map(|c| c.joined_sessions.keys().cloned().collect::<Vec<_>>())
			.unwrap_or_default(),
	).await;
	server.connections.disconnect(&client_id).await;
	writer_task.abort();
	Ok(())
}
