//! Call coordination: the single call slot, its state machine, and the
//! WebRTC signaling relay between the two participants.
//!
//! All call state lives inside one task. Commands arrive over an mpsc
//! channel and are processed strictly one at a time, so the async
//! private-room lookup inside `Initiate` cannot interleave with a second
//! command observing the still-empty slot.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::{mpsc, oneshot};

use crate::auth::tokens::Identity;
use crate::store::DirectoryStore;

use super::events::EventName;
use super::fanout::GatewayBroadcast;

/// Capacity of the command channel feeding the coordinator task.
const COMMAND_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CallStatus {
    Ringing,
    Active,
}

/// Terminal status attached to the `call:ended` broadcast.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EndReason {
    Ended,
    Rejected,
    Terminated,
}

/// The single system-wide call record.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Call {
    pub caller_id: String,
    pub callee_id: String,
    pub log_id: String,
    pub caller_name: String,
    pub started_at: DateTime<Utc>,
    pub status: CallStatus,
}

impl Call {
    fn is_participant(&self, user_id: &str) -> bool {
        self.caller_id == user_id || self.callee_id == user_id
    }

    /// The other participant, if `user_id` is one of the two.
    fn counterpart(&self, user_id: &str) -> Option<&str> {
        if self.caller_id == user_id {
            Some(&self.callee_id)
        } else if self.callee_id == user_id {
            Some(&self.caller_id)
        } else {
            None
        }
    }
}

/// Commands accepted by the coordinator task.
#[derive(Debug)]
pub enum CallCommand {
    Initiate {
        identity: Identity,
        callee_id: String,
    },
    Accept {
        identity: Identity,
        log_id: String,
    },
    End {
        identity: Identity,
        log_id: String,
    },
    Reject {
        identity: Identity,
        log_id: String,
    },
    Terminate {
        identity: Identity,
        log_id: String,
    },
    Signal {
        identity: Identity,
        target_user_id: String,
        signal: Value,
    },
    Disconnected {
        user_id: String,
    },
    Snapshot {
        reply: oneshot::Sender<Option<Call>>,
    },
}

/// Cloneable handle to the coordinator task.
#[derive(Clone)]
pub struct CallCoordinator {
    tx: mpsc::Sender<CallCommand>,
}

impl CallCoordinator {
    /// Spawn the coordinator task and return its handle.
    pub fn spawn(store: Arc<dyn DirectoryStore>, hub: GatewayBroadcast) -> Self {
        let (tx, rx) = mpsc::channel(COMMAND_CAPACITY);
        tokio::spawn(run(rx, store, hub));
        Self { tx }
    }

    /// Submit a command. Delivery failure means the coordinator task is
    /// gone, which only happens at shutdown.
    pub async fn send(&self, command: CallCommand) {
        if self.tx.send(command).await.is_err() {
            tracing::error!("call coordinator is not running");
        }
    }

    /// Current call, if any. Used for operator state-sync on connect; also
    /// serves as a barrier, since the reply comes after all prior commands.
    pub async fn snapshot(&self) -> Option<Call> {
        let (reply, rx) = oneshot::channel();
        self.send(CallCommand::Snapshot { reply }).await;
        rx.await.unwrap_or(None)
    }
}

async fn run(
    mut rx: mpsc::Receiver<CallCommand>,
    store: Arc<dyn DirectoryStore>,
    hub: GatewayBroadcast,
) {
    let mut active: Option<Call> = None;

    while let Some(command) = rx.recv().await {
        match command {
            CallCommand::Initiate { identity, callee_id } => {
                initiate(&mut active, store.as_ref(), &hub, &identity, &callee_id).await;
            }
            CallCommand::Accept { identity, log_id } => {
                accept(&mut active, &hub, &identity, &log_id);
            }
            CallCommand::End { identity, log_id } => {
                if participant_matches(&active, &identity.user_id, &log_id) {
                    finish(&mut active, &hub, EndReason::Ended);
                }
            }
            CallCommand::Reject { identity, log_id } => {
                if participant_matches(&active, &identity.user_id, &log_id) {
                    finish(&mut active, &hub, EndReason::Rejected);
                }
            }
            CallCommand::Terminate { identity, log_id } => {
                if !identity.is_operator {
                    hub.to_user(
                        &identity.user_id,
                        EventName::ERROR,
                        Value::String("Forbidden".to_string()),
                    );
                } else if active.as_ref().is_some_and(|c| c.log_id == log_id) {
                    tracing::info!(operator = %identity.user_id, %log_id, "call terminated by operator");
                    finish(&mut active, &hub, EndReason::Terminated);
                }
            }
            CallCommand::Signal {
                identity,
                target_user_id,
                signal,
            } => {
                let relay = active.as_ref().is_some_and(|c| {
                    c.counterpart(&identity.user_id)
                        .is_some_and(|other| other == target_user_id)
                });
                if relay {
                    hub.to_user(
                        &target_user_id,
                        EventName::CALL_SIGNAL,
                        json!({ "fromUserId": identity.user_id, "signal": signal }),
                    );
                }
            }
            CallCommand::Disconnected { user_id } => {
                if active.as_ref().is_some_and(|c| c.is_participant(&user_id)) {
                    tracing::info!(%user_id, "call participant disconnected");
                    finish(&mut active, &hub, EndReason::Ended);
                }
            }
            CallCommand::Snapshot { reply } => {
                let _ = reply.send(active.clone());
            }
        }
    }
}

async fn initiate(
    active: &mut Option<Call>,
    store: &dyn DirectoryStore,
    hub: &GatewayBroadcast,
    identity: &Identity,
    callee_id: &str,
) {
    if active.is_some() {
        hub.to_user(
            &identity.user_id,
            EventName::CALL_ERROR,
            Value::String("A call is already active. Please wait.".to_string()),
        );
        return;
    }

    if callee_id.is_empty() || callee_id == identity.user_id {
        hub.to_user(
            &identity.user_id,
            EventName::CALL_ERROR,
            Value::String("Invalid callee.".to_string()),
        );
        return;
    }

    // Calling is gated on a private room already existing between the two.
    match store.private_room_exists(&identity.user_id, callee_id).await {
        Ok(true) => {}
        Ok(false) => {
            hub.to_user(
                &identity.user_id,
                EventName::CALL_ERROR,
                Value::String("No private room with this user.".to_string()),
            );
            return;
        }
        Err(err) => {
            tracing::warn!(%err, caller = %identity.user_id, callee = %callee_id, "private room lookup failed; rejecting call");
            hub.to_user(
                &identity.user_id,
                EventName::CALL_ERROR,
                Value::String("Call setup failed.".to_string()),
            );
            return;
        }
    }

    let call = Call {
        caller_id: identity.user_id.clone(),
        callee_id: callee_id.to_string(),
        log_id: format!("call-{}", Utc::now().timestamp_millis()),
        caller_name: identity.username.clone(),
        started_at: Utc::now(),
        status: CallStatus::Ringing,
    };

    hub.to_user(
        callee_id,
        EventName::CALL_INCOMING,
        json!({
            "callerId": call.caller_id,
            "callerName": call.caller_name,
            "logId": call.log_id,
        }),
    );
    hub.to_monitors(
        EventName::CALL_STARTED,
        serde_json::to_value(&call).unwrap_or_default(),
    );

    tracing::info!(caller = %call.caller_id, callee = %call.callee_id, log_id = %call.log_id, "call ringing");
    *active = Some(call);
}

fn accept(active: &mut Option<Call>, hub: &GatewayBroadcast, identity: &Identity, log_id: &str) {
    let Some(call) = active.as_mut() else { return };
    if call.log_id != log_id
        || call.status != CallStatus::Ringing
        || !call.is_participant(&identity.user_id)
    {
        return;
    }

    call.status = CallStatus::Active;
    hub.to_user(
        &call.caller_id,
        EventName::CALL_ACCEPTED,
        json!({ "logId": call.log_id }),
    );
    hub.to_monitors(
        EventName::CALL_UPDATED,
        serde_json::to_value(&call).unwrap_or_default(),
    );
    tracing::info!(log_id = %call.log_id, "call active");
}

fn participant_matches(active: &Option<Call>, user_id: &str, log_id: &str) -> bool {
    active
        .as_ref()
        .is_some_and(|c| c.log_id == log_id && c.is_participant(user_id))
}

/// Tear down the current call, notifying both participants and the
/// monitoring group. Participants get `{logId, status}`; monitors get the
/// full ended record.
fn finish(active: &mut Option<Call>, hub: &GatewayBroadcast, reason: EndReason) {
    let Some(call) = active.take() else { return };

    let notice = json!({ "logId": call.log_id, "status": reason });
    hub.to_user(&call.caller_id, EventName::CALL_ENDED, notice.clone());
    hub.to_user(&call.callee_id, EventName::CALL_ENDED, notice);

    let mut record = serde_json::to_value(&call).unwrap_or_default();
    if let Value::Object(map) = &mut record {
        map.insert("status".to_string(), json!(reason));
        map.insert("endedAt".to_string(), json!(Utc::now()));
    }
    hub.to_monitors(EventName::CALL_ENDED, record);

    tracing::info!(log_id = %call.log_id, ?reason, "call finished");
}
