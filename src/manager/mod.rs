// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

pub mod agent;
pub mod channel;
pub mod messages;

pub use agent::{AgentConfig, ManagerAgent};
pub use channel::{Inbound, ManagerConnection, MessageWriter};
pub use messages::{ControlMessage, PT_VERSION};
