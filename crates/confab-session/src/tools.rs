//! Tool orchestrator.
//!
//! Detects function-call events, queues pending approvals, dispatches
//! registered handlers on worker tasks, and sends exactly one tool
//! response frame per call id back on the live stream. Handlers run
//! concurrently and may finish out of order; the server correlates by the
//! echoed call id. A panicking handler is recovered per-call and mapped
//! to a structured failure, never propagated to the session.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;

use confab_core::{
    ClientError, FunctionCall, FunctionResponse, SessionEvent, ToolCall, ToolCallStatus,
    ToolDefinition,
};

use crate::bus::EventBus;
use crate::outbound::TransportSlot;
use crate::send::{build_tool_responses, tool_error_payload, tool_rejection_payload};

/// A client-side tool implementation.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    /// Execute the tool with the model-provided arguments.
    async fn call(&self, arguments: Value) -> Result<Value, ClientError>;
}

struct RegisteredTool {
    definition: ToolDefinition,
    handler: Arc<dyn ToolHandler>,
    available: bool,
}

/// Per-session tool state and dispatch.
pub struct ToolOrchestrator {
    registered: Mutex<HashMap<String, RegisteredTool>>,
    /// Calls awaiting user approval, by call id.
    pending: Mutex<HashMap<String, ToolCall>>,
    /// Tool names the user pre-approved for this session.
    approved_types: Mutex<HashSet<String>>,
    require_approval: bool,
    slot: Arc<TransportSlot>,
    bus: EventBus,
}

impl ToolOrchestrator {
    /// Assemble the orchestrator.
    #[must_use]
    pub fn new(require_approval: bool, slot: Arc<TransportSlot>, bus: EventBus) -> Arc<Self> {
        Arc::new(Self {
            registered: Mutex::new(HashMap::new()),
            pending: Mutex::new(HashMap::new()),
            approved_types: Mutex::new(HashSet::new()),
            require_approval,
            slot,
            bus,
        })
    }

    /// Register a tool. Fails on duplicate names.
    pub fn register(
        &self,
        definition: ToolDefinition,
        handler: Arc<dyn ToolHandler>,
    ) -> Result<(), ClientError> {
        let mut registered = self.registered.lock().expect("tool registry poisoned");
        if registered.contains_key(&definition.name) {
            return Err(ClientError::Config(format!(
                "tool '{}' is already registered",
                definition.name
            )));
        }
        tracing::debug!(name = %definition.name, "Registered tool");
        registered.insert(
            definition.name.clone(),
            RegisteredTool {
                definition,
                handler,
                available: true,
            },
        );
        Ok(())
    }

    /// Declarations of every registered tool, for the setup frame.
    #[must_use]
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.registered
            .lock()
            .expect("tool registry poisoned")
            .values()
            .map(|t| t.definition.clone())
            .collect()
    }

    /// Toggle a tool's availability. Returns false for unknown names.
    pub fn set_available(&self, name: &str, available: bool) -> bool {
        let mut registered = self.registered.lock().expect("tool registry poisoned");
        match registered.get_mut(name) {
            Some(tool) => {
                tool.available = available;
                true
            }
            None => false,
        }
    }

    /// Handle one server-emitted function call.
    pub async fn handle_call(self: &Arc<Self>, call: FunctionCall) {
        let call = ToolCall::new(call.id, call.name, call.args);

        let handler = {
            let registered = self.registered.lock().expect("tool registry poisoned");
            registered
                .get(&call.name)
                .filter(|t| t.available)
                .map(|t| Arc::clone(&t.handler))
        };

        let Some(handler) = handler else {
            tracing::warn!(name = %call.name, id = %call.id, "Call for unknown or unavailable tool");
            self.finish_failure(call, "tool is not available".to_string())
                .await;
            return;
        };

        let needs_approval = self.require_approval
            && !self
                .approved_types
                .lock()
                .expect("approved set poisoned")
                .contains(&call.name);

        if needs_approval {
            self.pending
                .lock()
                .expect("pending queue poisoned")
                .insert(call.id.clone(), call.clone());
            self.bus.emit(SessionEvent::ApprovalRequested(call));
            return;
        }

        self.dispatch(call, handler);
    }

    /// Approve a pending call; `remember` silently approves future calls
    /// of the same tool for the rest of the session.
    pub async fn approve(self: &Arc<Self>, id: &str, remember: bool) -> Result<(), ClientError> {
        let mut call = self.take_pending(id)?;
        call.status = ToolCallStatus::Approved;

        if remember {
            self.approved_types
                .lock()
                .expect("approved set poisoned")
                .insert(call.name.clone());
        }

        let handler = {
            let registered = self.registered.lock().expect("tool registry poisoned");
            registered
                .get(&call.name)
                .filter(|t| t.available)
                .map(|t| Arc::clone(&t.handler))
        };
        match handler {
            Some(handler) => self.dispatch(call, handler),
            None => {
                self.finish_failure(call, "tool is not available".to_string())
                    .await;
            }
        }
        Ok(())
    }

    /// Reject a pending call; sends the explicit rejection sentinel.
    pub async fn reject(self: &Arc<Self>, id: &str, reason: &str) -> Result<(), ClientError> {
        let mut call = self.take_pending(id)?;
        call.status = ToolCallStatus::Rejected;
        tracing::debug!(id = %call.id, name = %call.name, "Tool call rejected by user");
        self.send_response(&call, tool_rejection_payload(reason))
            .await;
        Ok(())
    }

    /// Fail every call still awaiting approval (used on reconnect: the
    /// stream they arrived on is gone).
    pub async fn fail_all_pending(self: &Arc<Self>, reason: &str) {
        let drained: Vec<ToolCall> = {
            let mut pending = self.pending.lock().expect("pending queue poisoned");
            pending.drain().map(|(_, call)| call).collect()
        };
        for call in drained {
            self.finish_failure(call, reason.to_string()).await;
        }
    }

    /// Number of calls awaiting approval.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.lock().expect("pending queue poisoned").len()
    }

    fn take_pending(&self, id: &str) -> Result<ToolCall, ClientError> {
        self.pending
            .lock()
            .expect("pending queue poisoned")
            .remove(id)
            .ok_or_else(|| ClientError::Protocol(format!("unknown tool call id '{id}'")))
    }

    /// Run the handler on a worker task and send the response when done.
    fn dispatch(self: &Arc<Self>, mut call: ToolCall, handler: Arc<dyn ToolHandler>) {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            call.status = ToolCallStatus::Executing;
            let arguments = call.arguments.clone();

            // The extra spawn isolates handler panics from this task.
            let joined = tokio::spawn(async move { handler.call(arguments).await }).await;

            match joined {
                Ok(Ok(result)) => this.finish_success(call, result).await,
                Ok(Err(err)) => this.finish_failure(call, err.to_string()).await,
                Err(join_err) if join_err.is_panic() => {
                    tracing::error!(name = %call.name, "Tool handler panicked");
                    this.finish_failure(call, "tool handler panicked".to_string())
                        .await;
                }
                Err(_) => {
                    this.finish_failure(call, "tool handler was cancelled".to_string())
                        .await;
                }
            }
        });
    }

    async fn finish_success(&self, mut call: ToolCall, result: Value) {
        call.status = ToolCallStatus::Completed;
        self.send_response(&call, result.clone()).await;
        self.bus.emit(SessionEvent::ToolCompleted {
            id: call.id,
            name: call.name,
            result,
        });
    }

    async fn finish_failure(&self, mut call: ToolCall, error: String) {
        call.status = ToolCallStatus::Failed;
        self.send_response(&call, tool_error_payload(&error)).await;
        self.bus.emit(SessionEvent::ToolFailed {
            id: call.id,
            name: call.name,
            error,
        });
    }

    /// Send the single response frame for `call`.
    async fn send_response(&self, call: &ToolCall, payload: Value) {
        let frame = build_tool_responses(vec![FunctionResponse {
            id: Some(call.id.clone()),
            name: call.name.clone(),
            response: payload,
        }]);
        if let Err(err) = self.slot.send(frame).await {
            tracing::warn!(
                id = %call.id,
                name = %call.name,
                error = %err,
                "Failed to send tool response"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use confab_core::{ClientFrame, ServerFrame, TransportSession};
    use serde_json::json;
    use std::time::Duration;
    use tokio::sync::mpsc;

    /// Transport that records outbound frames.
    struct CapturingTransport {
        frames: tokio::sync::Mutex<Vec<ClientFrame>>,
    }

    #[async_trait]
    impl TransportSession for CapturingTransport {
        async fn send(&self, frame: ClientFrame) -> Result<(), ClientError> {
            self.frames.lock().await.push(frame);
            Ok(())
        }
        async fn recv(&self) -> Result<Option<ServerFrame>, ClientError> {
            Ok(None)
        }
        async fn close_send(&self) -> Result<(), ClientError> {
            Ok(())
        }
        async fn close(&self) -> Result<(), ClientError> {
            Ok(())
        }
    }

    struct EchoHandler;

    #[async_trait]
    impl ToolHandler for EchoHandler {
        async fn call(&self, arguments: Value) -> Result<Value, ClientError> {
            Ok(json!({ "echo": arguments }))
        }
    }

    struct PanickingHandler;

    #[async_trait]
    impl ToolHandler for PanickingHandler {
        async fn call(&self, _arguments: Value) -> Result<Value, ClientError> {
            panic!("boom");
        }
    }

    struct Fixture {
        orchestrator: Arc<ToolOrchestrator>,
        transport: Arc<CapturingTransport>,
        events: mpsc::Receiver<SessionEvent>,
    }

    async fn fixture(require_approval: bool) -> Fixture {
        let transport = Arc::new(CapturingTransport {
            frames: tokio::sync::Mutex::new(Vec::new()),
        });
        let slot = TransportSlot::new();
        let _ = slot.replace(Some(transport.clone())).await;
        let (bus, events) = EventBus::new(32);
        let orchestrator = ToolOrchestrator::new(require_approval, slot, bus);
        Fixture {
            orchestrator,
            transport,
            events,
        }
    }

    fn definition(name: &str) -> ToolDefinition {
        ToolDefinition {
            name: name.into(),
            description: String::new(),
            parameters: None,
        }
    }

    fn get_time_call(id: &str) -> FunctionCall {
        FunctionCall {
            id: Some(id.into()),
            name: "getTime".into(),
            args: json!({}),
        }
    }

    async fn wait_for_frames(transport: &CapturingTransport, count: usize) -> Vec<ClientFrame> {
        for _ in 0..100 {
            {
                let frames = transport.frames.lock().await;
                if frames.len() >= count {
                    return frames.clone();
                }
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("expected {count} frames");
    }

    fn response_id(frame: &ClientFrame) -> String {
        let ClientFrame::ToolResponse(responses) = frame else {
            panic!("expected tool response frame");
        };
        responses[0].id.clone().unwrap()
    }

    #[tokio::test]
    async fn approval_flow_runs_handler_after_approve() {
        let mut f = fixture(true).await;
        f.orchestrator
            .register(definition("getTime"), Arc::new(EchoHandler))
            .unwrap();

        f.orchestrator.handle_call(get_time_call("t1")).await;

        // No frame before approval (invariant I4).
        assert!(f.transport.frames.lock().await.is_empty());
        assert!(matches!(
            f.events.recv().await,
            Some(SessionEvent::ApprovalRequested(call)) if call.id == "t1"
        ));

        f.orchestrator.approve("t1", false).await.unwrap();
        let frames = wait_for_frames(&f.transport, 1).await;
        assert_eq!(response_id(&frames[0]), "t1");
        assert!(matches!(
            f.events.recv().await,
            Some(SessionEvent::ToolCompleted { id, .. }) if id == "t1"
        ));
    }

    #[tokio::test]
    async fn approve_and_remember_bypasses_queue_next_time() {
        let mut f = fixture(true).await;
        f.orchestrator
            .register(definition("getTime"), Arc::new(EchoHandler))
            .unwrap();

        f.orchestrator.handle_call(get_time_call("t1")).await;
        assert!(matches!(
            f.events.recv().await,
            Some(SessionEvent::ApprovalRequested(_))
        ));
        f.orchestrator.approve("t1", true).await.unwrap();
        wait_for_frames(&f.transport, 1).await;
        assert!(matches!(
            f.events.recv().await,
            Some(SessionEvent::ToolCompleted { .. })
        ));

        // Second call of the same tool: dispatched immediately.
        f.orchestrator.handle_call(get_time_call("t2")).await;
        let frames = wait_for_frames(&f.transport, 2).await;
        assert_eq!(response_id(&frames[1]), "t2");
        assert!(matches!(
            f.events.recv().await,
            Some(SessionEvent::ToolCompleted { id, .. }) if id == "t2"
        ));
        assert_eq!(f.orchestrator.pending_count(), 0);
    }

    #[tokio::test]
    async fn reject_sends_rejection_sentinel() {
        let mut f = fixture(true).await;
        f.orchestrator
            .register(definition("getTime"), Arc::new(EchoHandler))
            .unwrap();
        f.orchestrator.handle_call(get_time_call("t1")).await;
        let _ = f.events.recv().await;

        f.orchestrator.reject("t1", "not now").await.unwrap();
        let frames = wait_for_frames(&f.transport, 1).await;
        let ClientFrame::ToolResponse(responses) = &frames[0] else {
            panic!("expected tool response frame");
        };
        assert_eq!(responses[0].response["rejected"], json!(true));
        assert_eq!(responses[0].response["reason"], json!("not now"));
    }

    #[tokio::test]
    async fn unknown_tool_fails_immediately() {
        let mut f = fixture(true).await;
        f.orchestrator
            .handle_call(FunctionCall {
                id: Some("t9".into()),
                name: "nope".into(),
                args: json!({}),
            })
            .await;
        let frames = wait_for_frames(&f.transport, 1).await;
        assert_eq!(response_id(&frames[0]), "t9");
        assert!(matches!(
            f.events.recv().await,
            Some(SessionEvent::ToolFailed { id, .. }) if id == "t9"
        ));
    }

    #[tokio::test]
    async fn unavailable_tool_fails_immediately() {
        let mut f = fixture(false).await;
        f.orchestrator
            .register(definition("getTime"), Arc::new(EchoHandler))
            .unwrap();
        assert!(f.orchestrator.set_available("getTime", false));
        f.orchestrator.handle_call(get_time_call("t1")).await;
        assert!(matches!(
            f.events.recv().await,
            Some(SessionEvent::ToolFailed { .. })
        ));
    }

    #[tokio::test]
    async fn handler_panic_is_recovered() {
        let mut f = fixture(false).await;
        f.orchestrator
            .register(definition("getTime"), Arc::new(PanickingHandler))
            .unwrap();
        f.orchestrator.handle_call(get_time_call("t1")).await;
        let frames = wait_for_frames(&f.transport, 1).await;
        assert_eq!(response_id(&frames[0]), "t1");
        assert!(matches!(
            f.events.recv().await,
            Some(SessionEvent::ToolFailed { error, .. }) if error.contains("panicked")
        ));
    }

    #[tokio::test]
    async fn duplicate_registration_is_a_config_error() {
        let f = fixture(false).await;
        f.orchestrator
            .register(definition("getTime"), Arc::new(EchoHandler))
            .unwrap();
        let err = f
            .orchestrator
            .register(definition("getTime"), Arc::new(EchoHandler))
            .unwrap_err();
        assert!(matches!(err, ClientError::Config(_)));
    }

    #[tokio::test]
    async fn approving_unknown_id_is_a_protocol_error() {
        let f = fixture(true).await;
        let err = f.orchestrator.approve("ghost", false).await.unwrap_err();
        assert!(matches!(err, ClientError::Protocol(_)));
        let err = f.orchestrator.reject("ghost", "x").await.unwrap_err();
        assert!(matches!(err, ClientError::Protocol(_)));
    }

    #[tokio::test]
    async fn fail_all_pending_drains_the_queue() {
        let mut f = fixture(true).await;
        f.orchestrator
            .register(definition("getTime"), Arc::new(EchoHandler))
            .unwrap();
        f.orchestrator.handle_call(get_time_call("t1")).await;
        f.orchestrator.handle_call(get_time_call("t2")).await;
        assert_eq!(f.orchestrator.pending_count(), 2);

        f.orchestrator.fail_all_pending("connection lost").await;
        assert_eq!(f.orchestrator.pending_count(), 0);
        wait_for_frames(&f.transport, 2).await;
        let mut failed = 0;
        while let Ok(event) = f.events.try_recv() {
            if matches!(event, SessionEvent::ToolFailed { .. }) {
                failed += 1;
            }
        }
        assert_eq!(failed, 2);
    }
}
