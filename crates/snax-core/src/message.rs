// Copyright 2025 eraflo
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! The engine's message channel for fatal and warning reports.

use std::fmt;

/// A message published by engine subsystems for the host application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineMessage {
    /// The current frame's evaluation can no longer be trusted.
    Fatal {
        /// The frame the message was raised in.
        frame: u64,
        /// A human-readable description of the failure.
        message: String,
    },
    /// Something unexpected happened but evaluation could continue.
    Warning {
        /// The frame the message was raised in.
        frame: u64,
        /// A human-readable description of the problem.
        message: String,
    },
}

impl EngineMessage {
    /// Returns `true` for [`EngineMessage::Fatal`].
    pub fn is_fatal(&self) -> bool {
        matches!(self, EngineMessage::Fatal { .. })
    }
}

impl fmt::Display for EngineMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineMessage::Fatal { frame, message } => write!(f, "[fatal, frame {frame}] {message}"),
            EngineMessage::Warning { frame, message } => {
                write!(f, "[warning, frame {frame}] {message}")
            }
        }
    }
}

/// Manages the engine's message channel.
///
/// The producer side is handed to subsystems through [`MessageBus::sender`];
/// the owner drains the receiving end once per frame.
#[derive(Debug)]
pub struct MessageBus {
    sender: flume::Sender<EngineMessage>,
    receiver: flume::Receiver<EngineMessage>,
}

impl MessageBus {
    /// Creates a new bus with an unbounded channel.
    pub fn new() -> Self {
        let (sender, receiver) = flume::unbounded();
        log::debug!("Engine message bus initialized.");
        Self { sender, receiver }
    }

    /// Publishes a message, logging an error if the receiver is disconnected.
    pub fn publish(&self, message: EngineMessage) {
        if let Err(e) = self.sender.send(message) {
            log::error!("Failed to publish engine message: {e}. Receiver likely disconnected.");
        }
    }

    /// Returns a clone of the sender end of the channel.
    pub fn sender(&self) -> flume::Sender<EngineMessage> {
        self.sender.clone()
    }

    /// Returns every message published since the last drain.
    pub fn drain(&self) -> Vec<EngineMessage> {
        self.receiver.try_iter().collect()
    }
}

impl Default for MessageBus {
    fn default() -> Self {
        Self::new()
    }
}
