//! Component state: values, schemas and the versioned store.

use crate::error::DeltaError;
use core::fmt::{self, Display, Formatter};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Identifies one mounted component instance on both ends of a connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstanceId(pub String);

impl InstanceId {
	#[must_use]
	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl From<&str> for InstanceId {
	fn from(id: &str) -> Self {
		Self(id.to_owned())
	}
}

impl From<String> for InstanceId {
	fn from(id: String) -> Self {
		Self(id)
	}
}

impl Display for InstanceId {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

/// State keys to values, ordered by key.
pub type StateMap = BTreeMap<String, StateValue>;

/// A plain data value. There is deliberately no opaque variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StateValue {
	Null,
	Bool(bool),
	Number(f64),
	String(String),
	List(Vec<StateValue>),
	Map(BTreeMap<String, StateValue>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StateKind {
	Null,
	Bool,
	Number,
	String,
	List,
	Map,
}

impl Display for StateKind {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		f.write_str(match self {
			StateKind::Null => "null",
			StateKind::Bool => "bool",
			StateKind::Number => "number",
			StateKind::String => "string",
			StateKind::List => "list",
			StateKind::Map => "map",
		})
	}
}

impl StateValue {
	#[must_use]
	pub fn kind(&self) -> StateKind {
		match self {
			StateValue::Null => StateKind::Null,
			StateValue::Bool(_) => StateKind::Bool,
			StateValue::Number(_) => StateKind::Number,
			StateValue::String(_) => StateKind::String,
			StateValue::List(_) => StateKind::List,
			StateValue::Map(_) => StateKind::Map,
		}
	}
}

/// The text a value renders as when bound into a template slot.
///
/// Scalars render bare (`null` as nothing, integral numbers without a fraction),
/// lists and maps as JSON.
impl Display for StateValue {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		match self {
			StateValue::Null => Ok(()),
			StateValue::Bool(b) => write!(f, "{}", b),
			StateValue::Number(n) => write!(f, "{}", n),
			StateValue::String(s) => f.write_str(s),
			StateValue::List(_) | StateValue::Map(_) => {
				let json = serde_json::to_string(self).map_err(|_| fmt::Error)?;
				f.write_str(&json)
			}
		}
	}
}

impl From<bool> for StateValue {
	fn from(value: bool) -> Self {
		Self::Bool(value)
	}
}

impl From<f64> for StateValue {
	fn from(value: f64) -> Self {
		Self::Number(value)
	}
}

impl From<i32> for StateValue {
	fn from(value: i32) -> Self {
		Self::Number(value.into())
	}
}

impl From<u32> for StateValue {
	fn from(value: u32) -> Self {
		Self::Number(value.into())
	}
}

impl From<&str> for StateValue {
	fn from(value: &str) -> Self {
		Self::String(value.to_owned())
	}
}

impl From<String> for StateValue {
	fn from(value: String) -> Self {
		Self::String(value)
	}
}

impl From<Vec<StateValue>> for StateValue {
	fn from(value: Vec<StateValue>) -> Self {
		Self::List(value)
	}
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StateField {
	pub name: String,
	pub kind: StateKind,
	#[serde(default)]
	pub nullable: bool,
	#[serde(default = "null")]
	pub default: StateValue,
}

fn null() -> StateValue {
	StateValue::Null
}

/// The declared state keys of a component type, in declaration order.
///
/// Deltas are checked against this before anything is applied.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StateSchema {
	fields: Vec<StateField>,
}

impl StateSchema {
	#[must_use]
	pub fn new() -> Self {
		Self::default()
	}

	/// Declares a non-nullable field whose kind is that of `default`.
	#[must_use]
	pub fn field(mut self, name: impl Into<String>, default: impl Into<StateValue>) -> Self {
		let default = default.into();
		self.fields.push(StateField {
			name: name.into(),
			kind: default.kind(),
			nullable: false,
			default,
		});
		self
	}

	/// Declares a nullable field that starts out as [`StateValue::Null`].
	#[must_use]
	pub fn nullable(mut self, name: impl Into<String>, kind: StateKind) -> Self {
		self.fields.push(StateField {
			name: name.into(),
			kind,
			nullable: true,
			default: StateValue::Null,
		});
		self
	}

	#[must_use]
	pub fn fields(&self) -> &[StateField] {
		&self.fields
	}

	#[must_use]
	pub fn get(&self, name: &str) -> Option<&StateField> {
		self.fields.iter().find(|field| field.name == name)
	}

	#[must_use]
	pub fn defaults(&self) -> StateMap {
		self.fields.iter().map(|field| (field.name.clone(), field.default.clone())).collect()
	}

	/// # Errors
	///
	/// On the first key (in key order) that isn't declared or whose value has the wrong kind.
	/// `null` is accepted only for nullable fields.
	pub fn validate(&self, changes: &StateMap) -> Result<(), DeltaError> {
		for (key, value) in changes {
			let field = self.get(key).ok_or_else(|| DeltaError::UnknownKey { key: key.clone() })?;
			let found = value.kind();
			if found != field.kind && !(found == StateKind::Null && field.nullable) {
				return Err(DeltaError::TypeMismatch {
					key: key.clone(),
					expected: field.kind,
					found,
				});
			}
		}
		Ok(())
	}
}

/// A client's absolute state changes for one instance, tagged with the client's version counter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateDelta {
	pub instance_id: InstanceId,
	pub changes: StateMap,
	pub client_version: u64,
}

/// How a delta's version relates to the last one a [`StateStore`] applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
	Fresh,
	/// Equal to the last applied version, so a resend of a delta that was already applied.
	Duplicate,
	Stale,
}

/// Authoritative state of one instance and the last client version applied to it.
#[derive(Debug, Clone, PartialEq)]
pub struct StateStore {
	values: StateMap,
	version: u64,
}

impl StateStore {
	/// Starts at version 0, which no delta can carry.
	#[must_use]
	pub fn new(values: StateMap) -> Self {
		Self { values, version: 0 }
	}

	#[must_use]
	pub fn values(&self) -> &StateMap {
		&self.values
	}

	#[must_use]
	pub fn version(&self) -> u64 {
		self.version
	}

	#[must_use]
	pub fn freshness(&self, client_version: u64) -> Freshness {
		match client_version.cmp(&self.version) {
			core::cmp::Ordering::Greater => Freshness::Fresh,
			core::cmp::Ordering::Equal => Freshness::Duplicate,
			core::cmp::Ordering::Less => Freshness::Stale,
		}
	}

	/// The values as they would be with `changes` applied. `self` is left untouched.
	#[must_use]
	pub fn merged(&self, changes: &StateMap) -> StateMap {
		let mut values = self.values.clone();
		values.extend(changes.iter().map(|(key, value)| (key.clone(), value.clone())));
		values
	}

	/// Replaces the values and advances to `version`.
	///
	/// Stale versions are ignored, so the version never goes backwards. Returns whether anything was committed.
	pub fn commit(&mut self, values: StateMap, version: u64) -> bool {
		if self.freshness(version) != Freshness::Fresh {
			return false;
		}
		self.values = values;
		self.version = version;
		true
	}
}

#[cfg(test)]
mod tests {
	use super::{Freshness, StateKind, StateMap, StateSchema, StateStore, StateValue};
	use crate::error::DeltaError;

	fn changes(pairs: &[(&str, StateValue)]) -> StateMap {
		pairs.iter().cloned().map(|(key, value)| (key.to_owned(), value)).collect()
	}

	#[test]
	fn rendering() {
		assert_eq!(StateValue::from(1).to_string(), "1");
		assert_eq!(StateValue::from(1.5).to_string(), "1.5");
		assert_eq!(StateValue::Null.to_string(), "");
		assert_eq!(StateValue::from(vec![StateValue::from(true), StateValue::from("a")]).to_string(), r#"[true,"a"]"#);
	}

	#[test]
	fn untagged_json() {
		let value: StateValue = serde_json::from_str(r#"{"a": [1, null, "x"]}"#).unwrap();
		assert_eq!(value.kind(), StateKind::Map);
		assert_eq!(value, StateValue::Map(changes(&[("a", StateValue::List(vec![1.into(), StateValue::Null, "x".into()]))])));
	}

	#[test]
	fn schema_validation() {
		let schema = StateSchema::new().field("count", 0).nullable("label", StateKind::String);
		assert_eq!(schema.validate(&changes(&[("count", 3.into()), ("label", StateValue::Null)])), Ok(()));
		assert_eq!(
			schema.validate(&changes(&[("count", StateValue::Null)])),
			Err(DeltaError::TypeMismatch {
				key: "count".to_owned(),
				expected: StateKind::Number,
				found: StateKind::Null
			})
		);
		assert_eq!(schema.validate(&changes(&[("missing", 1.into())])), Err(DeltaError::UnknownKey { key: "missing".to_owned() }));
	}

	#[test]
	fn versions_only_advance() {
		let mut store = StateStore::new(changes(&[("count", 0.into())]));
		assert!(store.commit(store.merged(&changes(&[("count", 5.into())])), 5));
		assert_eq!(store.freshness(3), Freshness::Stale);
		assert_eq!(store.freshness(5), Freshness::Duplicate);
		assert!(!store.commit(changes(&[("count", 3.into())]), 3));
		assert_eq!(store.values()["count"], StateValue::from(5));
		assert_eq!(store.version(), 5);
	}
}
