//! The `/ws` endpoint: one upgrade handler, two roles.
//!
//! Agents connect with `role=agent&machineId=<id>`, dashboards with
//! `role=dashboard`; anything else is rejected before the upgrade.
//! Each accepted socket gets a reader loop plus a writer task draining
//! an ordered channel, so per-machine message order is exactly channel
//! order. A handler error for one frame is logged and isolated; it
//! never tears down sibling connections.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use fleet_shared::command::{CommandKind, CommandTarget};
use fleet_shared::machine::MachineStatus;
use fleet_shared::protocol::{AgentMessage, DashboardEvent, DashboardRequest, ServerMessage};

use crate::response::ServerResult;
use crate::util::app_state::AppState;

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    role: Option<String>,
    #[serde(rename = "machineId")]
    machine_id: Option<String>,
}

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<WsQuery>,
    State(state): State<AppState>,
) -> Response {
    match (query.role.as_deref(), query.machine_id) {
        (Some("agent"), Some(machine_id)) if !machine_id.is_empty() => {
            ws.on_upgrade(move |socket| handle_agent(socket, machine_id, state))
        }
        (Some("dashboard"), _) => ws.on_upgrade(move |socket| handle_dashboard(socket, state)),
        _ => (StatusCode::BAD_REQUEST, "invalid connection parameters").into_response(),
    }
}

// ---------------------------------------------------------------
// Agent connections
// ---------------------------------------------------------------

async fn handle_agent(socket: WebSocket, machine_id: String, state: AppState) {
    info!(%machine_id, "agent connected");
    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerMessage>();

    let handle = state.registry.new_handle(tx.clone());
    let epoch = handle.epoch();
    let cancel = handle.cancel_token();

    if let Some(displaced) = state.registry.register(&machine_id, handle) {
        debug!(%machine_id, "replacing existing agent connection");
        displaced.close();
    }

    if let Err(e) = state
        .storage
        .update_machine_status(&machine_id, MachineStatus::Online)
        .await
    {
        warn!(%machine_id, error = %e, "failed to persist online status");
    }
    state.observers.broadcast(DashboardEvent::AgentStatus {
        machine_id: machine_id.clone(),
        status: MachineStatus::Online,
    });

    let _ = tx.send(ServerMessage::Connected {
        machine_id: machine_id.clone(),
    });

    // writer task: the single ordered path onto this socket
    let writer = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            let text = match serde_json::to_string(&message) {
                Ok(text) => text,
                Err(e) => {
                    warn!(error = %e, "failed to encode outbound agent message");
                    continue;
                }
            };
            if sink.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    loop {
        tokio::select! {
            // a replacement connection for this machine id closes us
            _ = cancel.cancelled() => break,
            frame = stream.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    match serde_json::from_str::<AgentMessage>(text.as_str()) {
                        Ok(message) => {
                            if let Err(e) = handle_agent_message(&state, &machine_id, message).await {
                                warn!(%machine_id, error = %e, "agent message handler failed");
                            }
                        }
                        Err(e) => {
                            warn!(%machine_id, error = %e, "discarding malformed agent frame");
                        }
                    }
                }
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            }
        }
    }

    writer.abort();

    // only the currently-registered connection may flip the machine
    // offline; a stale close racing a fresh reconnect is a no-op
    if state.registry.unregister(&machine_id, epoch) {
        info!(%machine_id, "agent disconnected");
        if let Err(e) = state
            .storage
            .update_machine_status(&machine_id, MachineStatus::Offline)
            .await
        {
            warn!(%machine_id, error = %e, "failed to persist offline status");
        }
        state.observers.broadcast(DashboardEvent::AgentStatus {
            machine_id,
            status: MachineStatus::Offline,
        });
    }
}

async fn handle_agent_message(
    state: &AppState,
    machine_id: &str,
    message: AgentMessage,
) -> ServerResult<()> {
    match message {
        AgentMessage::Register { data } => {
            let record = state.storage.register_machine(machine_id, data).await?;
            info!(%machine_id, hostname = %record.facts.hostname, "machine registered");
            state.observers.broadcast(DashboardEvent::MachineRegistered {
                machine_id: machine_id.to_string(),
                data: record.facts,
            });
        }
        AgentMessage::Metrics { data } => {
            state.storage.save_metrics(machine_id, data.clone()).await?;
            state.observers.broadcast(DashboardEvent::MetricsUpdate {
                machine_id: machine_id.to_string(),
                data,
            });
        }
        AgentMessage::CommandResult {
            command_id,
            status,
            output,
            error,
        } => {
            state
                .router
                .ingest_result(machine_id, &command_id, status, output, error)
                .await?;
        }
        AgentMessage::Logs { data } => {
            let count = data.len();
            state.storage.save_logs(machine_id, data).await?;
            state.observers.broadcast(DashboardEvent::LogsUpdate {
                machine_id: machine_id.to_string(),
                count,
            });
        }
        AgentMessage::Packages { data } => {
            let count = data.len();
            state.storage.replace_packages(machine_id, data).await?;
            state.observers.broadcast(DashboardEvent::PackagesUpdate {
                machine_id: machine_id.to_string(),
                count,
            });
        }
        // file and shell replies fan out to every dashboard, not just
        // the requester (see DESIGN.md)
        AgentMessage::FileListing {
            path, files, error, ..
        } => {
            state.observers.broadcast(DashboardEvent::FileListing {
                machine_id: machine_id.to_string(),
                path,
                files,
                error,
            });
        }
        AgentMessage::FileContent {
            path,
            content,
            error,
            is_binary,
            ..
        } => {
            state.observers.broadcast(DashboardEvent::FileContent {
                machine_id: machine_id.to_string(),
                path,
                content,
                error,
                is_binary,
            });
        }
        AgentMessage::ShellOutput {
            session_id,
            output,
            is_error,
            is_complete,
        } => {
            state.observers.broadcast(DashboardEvent::ShellOutput {
                machine_id: machine_id.to_string(),
                session_id,
                output,
                is_error,
                is_complete,
            });
        }
        AgentMessage::Heartbeat => {
            state
                .storage
                .update_machine_status(machine_id, MachineStatus::Online)
                .await?;
        }
    }
    Ok(())
}

// ---------------------------------------------------------------
// Dashboard connections
// ---------------------------------------------------------------

async fn handle_dashboard(socket: WebSocket, state: AppState) {
    info!("dashboard connected");
    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<DashboardEvent>();
    let observer_id = state.observers.subscribe(tx.clone());

    let _ = tx.send(DashboardEvent::Connected {
        client_type: "dashboard".to_string(),
    });

    let writer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            let text = match serde_json::to_string(&event) {
                Ok(text) => text,
                Err(e) => {
                    warn!(error = %e, "failed to encode dashboard event");
                    continue;
                }
            };
            if sink.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    while let Some(frame) = stream.next().await {
        match frame {
            Ok(Message::Text(text)) => match serde_json::from_str::<DashboardRequest>(text.as_str())
            {
                Ok(request) => {
                    if let Err(e) = handle_dashboard_request(&state, &tx, request).await {
                        warn!(error = %e, "dashboard request handler failed");
                    }
                }
                Err(e) => warn!(error = %e, "discarding malformed dashboard frame"),
            },
            Ok(Message::Close(_)) | Err(_) => break,
            Ok(_) => {}
        }
    }

    state.observers.unsubscribe(observer_id);
    writer.abort();
    info!("dashboard disconnected");
}

async fn handle_dashboard_request(
    state: &AppState,
    reply: &mpsc::UnboundedSender<DashboardEvent>,
    request: DashboardRequest,
) -> ServerResult<()> {
    match request {
        DashboardRequest::ExecuteCommand {
            command_type,
            command,
            machine_id,
            group_id,
        } => {
            execute_command(state, reply, command_type, command, machine_id, group_id).await?;
        }
        DashboardRequest::GetFileListing {
            machine_id,
            request_id,
            path,
        } => {
            forward(state, &machine_id, ServerMessage::GetFileListing { request_id, path });
        }
        DashboardRequest::GetFileContent {
            machine_id,
            request_id,
            path,
        } => {
            forward(state, &machine_id, ServerMessage::GetFileContent { request_id, path });
        }
        DashboardRequest::ShellInput {
            machine_id,
            session_id,
            input,
        } => {
            forward(state, &machine_id, ServerMessage::ShellInput { session_id, input });
        }
        DashboardRequest::CloseShell {
            machine_id,
            session_id,
        } => {
            forward(state, &machine_id, ServerMessage::CloseShell { session_id });
        }
        DashboardRequest::RequestMetrics { machine_id } => {
            forward(state, &machine_id, ServerMessage::RequestMetrics);
        }
        DashboardRequest::RequestLogs { machine_id, hours } => {
            forward(
                state,
                &machine_id,
                ServerMessage::RequestLogs {
                    hours: hours.unwrap_or(24),
                },
            );
        }
        DashboardRequest::RequestPackages { machine_id } => {
            forward(state, &machine_id, ServerMessage::RequestPackages);
        }
    }
    Ok(())
}

async fn execute_command(
    state: &AppState,
    reply: &mpsc::UnboundedSender<DashboardEvent>,
    command_type: CommandKind,
    command: String,
    machine_id: Option<String>,
    group_id: Option<String>,
) -> ServerResult<()> {
    // a single machine target takes precedence over a group
    let target = match (machine_id, group_id) {
        (Some(id), _) => CommandTarget::Machine { id },
        (None, Some(id)) => CommandTarget::Group { id },
        (None, None) => {
            warn!("execute_command without machineId or groupId, dropping");
            return Ok(());
        }
    };

    let record = state.router.create(command_type, &command, target).await?;
    state.router.dispatch(&record).await?;

    // the creation acknowledgment goes only to the requesting dashboard
    let _ = reply.send(DashboardEvent::CommandCreated {
        command_id: record.id,
    });
    Ok(())
}

fn forward(state: &AppState, machine_id: &str, message: ServerMessage) {
    if !state.registry.send_to_machine(machine_id, message) {
        debug!(%machine_id, "dropping request for offline machine");
    }
}
