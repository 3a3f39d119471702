//! Session loop: receive, dispatch, execute, respond.
//!
//! One request is handled to completion before the next frame is read. The
//! loop only ends when the channel faults.

use cmdlink_common::{
    channel::{Channel, ChannelError, Frame},
    protocol::{decode_request, encode_response, Request, Response},
};

use crate::{
    dispatcher::{Dispatch, Dispatcher},
    executor::ActionExecutor,
    response::build_response,
};

/// Where the loop currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Waiting for the next frame
    Ready,
    /// Resolving and running a request
    Dispatching,
    /// Writing a response back
    Responding,
    /// The channel faulted; nothing more is processed
    Terminated,
}

/// Drives requests from a channel through the dispatcher and executor
pub struct Session<C: Channel> {
    channel:    C,
    dispatcher: Dispatcher,
    executor:   ActionExecutor,
    state:      SessionState,
}

impl<C: Channel> Session<C> {
    pub fn new(channel: C, dispatcher: Dispatcher, executor: ActionExecutor) -> Self {
        Self {
            channel,
            dispatcher,
            executor,
            state: SessionState::Ready,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn channel(&self) -> &C {
        &self.channel
    }

    /// Process frames until the channel reports a fault, then return it.
    pub fn run(&mut self) -> ChannelError {
        if self.state == SessionState::Terminated {
            return ChannelError::Closed;
        }

        tracing::debug!("Starting session loop...");
        loop {
            match self.channel.receive() {
                Ok(frame) => self.handle_frame(frame),
                Err(e) => {
                    tracing::error!("Read error: {}", e);
                    self.state = SessionState::Terminated;
                    return e;
                }
            }
        }
    }

    fn handle_frame(&mut self, frame: Frame) {
        match frame {
            Frame::Text(text) => self.handle_text(&text),
            Frame::Binary(len) => {
                tracing::warn!("Ignoring non-text message ({} bytes)", len);
            }
            Frame::Control => {
                tracing::trace!("Control frame handled by the transport");
            }
        }
    }

    fn handle_text(&mut self, text: &str) {
        let request = match decode_request(text) {
            Ok(request) => request,
            Err(e) => {
                tracing::warn!("❌ Failed to parse incoming message: {}\nMessage: {}", e, text);
                return;
            }
        };

        tracing::info!(
            "📨 Received message with requestId: {}, command: {}",
            request.request_id,
            request.command
        );

        self.state = SessionState::Dispatching;
        let response = self.process(&request);

        if let Some(response) = response {
            self.state = SessionState::Responding;
            self.respond(&response);
        }
        self.state = SessionState::Ready;
    }

    /// Dispatch and execute one request. `None` means it was skipped.
    pub fn process(&self, request: &Request) -> Option<Response> {
        let action = match self.dispatcher.dispatch(&request.command, &request.data) {
            Dispatch::Run(action) => action,
            Dispatch::Skip => {
                tracing::warn!(
                    "Dropping request {} (command {}) without a response",
                    request.request_id,
                    request.command
                );
                return None;
            }
        };

        tracing::info!(
            "🚀 Executing script: {} with args: {:?}",
            action.executable_path.display(),
            action.arguments
        );
        let result = self.executor.execute(&action);

        if result.succeeded {
            tracing::info!(
                "✅ Script succeeded (command {}):\n{}",
                request.command,
                result.combined_output
            );
        } else {
            tracing::warn!(
                "❌ Script failed (command {}):\n{}",
                request.command,
                result.combined_output
            );
        }

        Some(build_response(&request.request_id, &request.command, result))
    }

    fn respond(&mut self, response: &Response) {
        let text = match encode_response(response) {
            Ok(text) => text,
            Err(e) => {
                tracing::error!("Failed to encode response {}: {}", response.request_id, e);
                return;
            }
        };

        tracing::info!("📤 Sending response with requestId: {}", response.request_id);
        if let Err(e) = self.channel.send(text) {
            tracing::error!("Failed to send response {}: {}", response.request_id, e);
        }
    }
}
