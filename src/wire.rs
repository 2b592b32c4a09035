//! Messages between client and server, as JSON.
//!
//! The transport is expected to be ordered and reliable. Framing is up to it.

use crate::{
	error::WireError,
	node::ViewNode,
	state::{InstanceId, StateDelta},
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all_fields = "camelCase")]
pub enum ClientMessage {
	/// First render request. Creates the instance if it doesn't exist yet.
	Render { instance_id: InstanceId, component: String },
	StateDelta(StateDelta),
	Unmount { instance_id: InstanceId },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all_fields = "camelCase")]
pub enum ServerMessage {
	/// The full tree after applying everything up to and including `version`.
	Confirmation { instance_id: InstanceId, version: u64, tree: ViewNode },
	Rejected {
		instance_id: InstanceId,
		client_version: u64,
		reason: RejectReason,
		message: String,
	},
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RejectReason {
	MalformedDelta,
	UnknownInstance,
	UnknownComponent,
	/// The component rendered a tree outside the configured limits.
	InvalidTree,
}

impl ClientMessage {
	#[must_use]
	pub fn instance_id(&self) -> &InstanceId {
		match self {
			ClientMessage::Render { instance_id, .. } | ClientMessage::Unmount { instance_id } => instance_id,
			ClientMessage::StateDelta(delta) => &delta.instance_id,
		}
	}

	/// # Errors
	///
	/// Never in practice, since all contents are plain data.
	pub fn to_json(&self) -> Result<String, WireError> {
		Ok(serde_json::to_string(self)?)
	}

	/// # Errors
	///
	/// Iff `json` isn't a valid client message.
	pub fn from_json(json: &str) -> Result<Self, WireError> {
		Ok(serde_json::from_str(json)?)
	}
}

impl ServerMessage {
	#[must_use]
	pub fn instance_id(&self) -> &InstanceId {
		match self {
			ServerMessage::Confirmation { instance_id, .. } | ServerMessage::Rejected { instance_id, .. } => instance_id,
		}
	}

	/// # Errors
	///
	/// Never in practice, since all contents are plain data.
	pub fn to_json(&self) -> Result<String, WireError> {
		Ok(serde_json::to_string(self)?)
	}

	/// # Errors
	///
	/// Iff `json` isn't a valid server message.
	pub fn from_json(json: &str) -> Result<Self, WireError> {
		Ok(serde_json::from_str(json)?)
	}
}

#[cfg(test)]
mod tests {
	use super::{ClientMessage, ServerMessage};
	use crate::{StateDelta, ViewNode};
	use serde_json::json;

	#[test]
	fn delta_shape() {
		let message = ClientMessage::StateDelta(StateDelta {
			instance_id: "counter-1".into(),
			changes: [("count".to_owned(), 1.into())].into_iter().collect(),
			client_version: 4,
		});
		assert_eq!(
			serde_json::to_value(&message).unwrap(),
			json!({ "type": "StateDelta", "instanceId": "counter-1", "changes": { "count": 1.0 }, "clientVersion": 4 })
		);
		assert_eq!(ClientMessage::from_json(&message.to_json().unwrap()).unwrap(), message);
	}

	#[test]
	fn confirmation_shape() {
		let message = ServerMessage::from_json(r#"{ "type": "Confirmation", "instanceId": "a", "version": 2, "tree": { "type": "Empty" } }"#).unwrap();
		assert_eq!(
			message,
			ServerMessage::Confirmation {
				instance_id: "a".into(),
				version: 2,
				tree: ViewNode::Empty
			}
		);
		assert!(ServerMessage::from_json(r#"{ "type": "Confirmation", "instanceId": "a" }"#).is_err());
	}
}
