// /////////////////////////////////////////////////////////////////////////////
// Buildflow
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # RPC Messenger
//!
//! The request/response multiplexer spoken over a worker's message port.
//! Both sides of the boundary run one of these; the protocol is symmetric.
//!
//! Each pending request records a resolver and an optional table of
//! sub-request handlers keyed by event. Incoming sub-requests are routed to
//! their originating request's table first, then to the top-level handler
//! table. Responses resolve or reject the matching pending request and move
//! its id into a completed set so late duplicates are ignored; a response
//! for an id that was never issued is a protocol fault.
//!
//! Handlers run as spawned tasks so a slow handler never blocks the demux
//! loop — in particular, a side can keep servicing sub-requests while one
//! of its own requests is still in flight.

use futures::future::BoxFuture;
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

use buildflow_domain::EngineError;

use super::protocol::{WorkerEvent, WorkerMessage};
use super::wire::{error_to_wire, wire_to_error, WireValue};

/// An async handler for one protocol event. Receives the request id (so it
/// can issue sub-requests against it) and the payload.
pub type RpcHandler = Arc<dyn Fn(u64, WireValue) -> BoxFuture<'static, Result<WireValue, EngineError>> + Send + Sync>;

struct Pending {
    responder: oneshot::Sender<Result<WireValue, EngineError>>,
    sub_handlers: HashMap<WorkerEvent, RpcHandler>,
}

#[derive(Default)]
struct MessengerState {
    pending: HashMap<u64, Pending>,
    completed: HashSet<u64>,
}

/// One side of a worker message port.
pub struct Messenger {
    outbound: mpsc::UnboundedSender<WorkerMessage>,
    next_id: AtomicU64,
    state: Mutex<MessengerState>,
    handlers: RwLock<HashMap<WorkerEvent, RpcHandler>>,
}

impl Messenger {
    /// Creates a messenger sending frames through `outbound`.
    pub fn new(outbound: mpsc::UnboundedSender<WorkerMessage>) -> Arc<Self> {
        Arc::new(Messenger {
            outbound,
            next_id: AtomicU64::new(0),
            state: Mutex::new(MessengerState::default()),
            handlers: RwLock::new(HashMap::new()),
        })
    }

    /// Installs the top-level handler for an event.
    pub fn set_handler(&self, event: WorkerEvent, handler: RpcHandler) {
        self.handlers.write().insert(event, handler);
    }

    fn allocate_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn send_response(&self, request_id: u64, outcome: Result<WireValue, WireValue>) {
        // A dead peer means nobody is waiting anyway.
        let _ = self.outbound.send(WorkerMessage::Response { request_id, outcome });
    }

    /// Sends a request and awaits its response.
    ///
    /// `sub_handlers` services sub-requests the peer issues while handling
    /// this request.
    ///
    /// # Errors
    /// Fails when the peer is gone, when the peer responds with a fault, or
    /// when the pending request is rejected (pool disposal, worker crash).
    pub async fn request(
        &self,
        event: WorkerEvent,
        data: WireValue,
        sub_handlers: HashMap<WorkerEvent, RpcHandler>,
    ) -> Result<WireValue, EngineError> {
        let id = self.allocate_id();
        let (responder, receiver) = oneshot::channel();
        self.state.lock().pending.insert(
            id,
            Pending {
                responder,
                sub_handlers,
            },
        );

        if self
            .outbound
            .send(WorkerMessage::Request {
                id,
                event,
                data: data.projected(),
            })
            .is_err()
        {
            self.state.lock().pending.remove(&id);
            return Err(EngineError::worker_crash(format!(
                "Worker channel closed before {} request could be sent",
                event
            )));
        }

        match receiver.await {
            Ok(outcome) => outcome,
            Err(_) => Err(EngineError::disposed(format!("{} request abandoned", event))),
        }
    }

    /// Sends a request whose response is ignored (`online`, `terminated`).
    pub fn notify(&self, event: WorkerEvent, data: WireValue) {
        let id = self.allocate_id();
        self.state.lock().completed.insert(id);
        let _ = self.outbound.send(WorkerMessage::Request {
            id,
            event,
            data: data.projected(),
        });
    }

    /// Sends a fire-and-forget sub-request against an in-flight request the
    /// peer opened.
    pub fn sub_notify(&self, original_request_id: u64, event: WorkerEvent, data: WireValue) {
        let id = self.allocate_id();
        self.state.lock().completed.insert(id);
        let _ = self.outbound.send(WorkerMessage::SubRequest {
            id,
            original_request_id,
            event,
            data: data.projected(),
        });
    }

    /// Answers a request the peer opened, outside the handler-table path.
    /// Used by the worker loop to acknowledge `terminated` before exiting.
    pub fn respond(&self, request_id: u64, outcome: Result<WireValue, EngineError>) {
        self.send_response(
            request_id,
            outcome.map(|v| v.projected()).map_err(|e| error_to_wire(&e)),
        );
    }

    /// Rejects every pending request with a clone of `error`.
    pub fn reject_all(&self, error: &EngineError) {
        let drained: Vec<(u64, Pending)> = {
            let mut state = self.state.lock();
            let drained = state.pending.drain().collect::<Vec<_>>();
            for (id, _) in &drained {
                state.completed.insert(*id);
            }
            drained
        };
        for (_, pending) in drained {
            let _ = pending.responder.send(Err(error.clone()));
        }
    }

    /// Processes one incoming frame.
    ///
    /// # Errors
    /// Returns a protocol fault for an unknown event, an unroutable
    /// sub-request, or a response to a request that was never issued. The
    /// caller surfaces these on the worker's error channel; they do not stop
    /// the demux loop.
    pub async fn handle_message(self: &Arc<Self>, message: WorkerMessage) -> Result<(), EngineError> {
        match message {
            WorkerMessage::Request { id, event, data } => {
                let handler = self.handlers.read().get(&event).cloned();
                match handler {
                    Some(handler) => {
                        self.run_handler(id, handler, data);
                        Ok(())
                    }
                    None => {
                        let fault = EngineError::protocol(format!("No handler for {} request {}", event, id));
                        self.send_response(id, Err(error_to_wire(&fault)));
                        Err(fault)
                    }
                }
            }
            WorkerMessage::SubRequest {
                id,
                original_request_id,
                event,
                data,
            } => {
                let handler = {
                    let state = self.state.lock();
                    state
                        .pending
                        .get(&original_request_id)
                        .and_then(|pending| pending.sub_handlers.get(&event).cloned())
                }
                .or_else(|| self.handlers.read().get(&event).cloned());
                match handler {
                    Some(handler) => {
                        self.run_handler(id, handler, data);
                        Ok(())
                    }
                    None => {
                        let fault = EngineError::protocol(format!(
                            "Unroutable {} sub-request {} for request {}",
                            event, id, original_request_id
                        ));
                        self.send_response(id, Err(error_to_wire(&fault)));
                        Err(fault)
                    }
                }
            }
            WorkerMessage::Response { request_id, outcome } => {
                let resolved = {
                    let mut state = self.state.lock();
                    match state.pending.remove(&request_id) {
                        Some(pending) => {
                            state.completed.insert(request_id);
                            Some(pending)
                        }
                        None if state.completed.contains(&request_id) => None, // late duplicate
                        None => {
                            return Err(EngineError::protocol(format!(
                                "Response for unknown request {}",
                                request_id
                            )));
                        }
                    }
                };
                if let Some(pending) = resolved {
                    let outcome = outcome.map_err(|fault| wire_to_error(&fault));
                    let _ = pending.responder.send(outcome);
                }
                Ok(())
            }
        }
    }

    fn run_handler(self: &Arc<Self>, id: u64, handler: RpcHandler, data: WireValue) {
        let messenger = self.clone();
        tokio::spawn(async move {
            let outcome = handler(id, data).await;
            messenger.send_response(id, outcome.map(|v| v.projected()).map_err(|e| error_to_wire(&e)));
        });
    }
}

impl std::fmt::Debug for Messenger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Messenger")
            .field("pending", &state.pending.len())
            .field("completed", &state.completed.len())
            .finish()
    }
}
