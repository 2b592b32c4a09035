use crate::{path::Path, state::StateKind, InstanceId};
use thiserror::Error;

/// A patch didn't fit the tree it was applied to.
///
/// With a correct diff this only happens if a sequence is applied to the wrong tree version,
/// or applied twice.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApplyError {
	#[error("no node at {path}")]
	NoSuchNode { path: Path },
	#[error("expected an element at {path}")]
	NotAnElement { path: Path },
	#[error("expected a text node at {path}")]
	NotText { path: Path },
	#[error("child index {index} out of bounds at {parent} (length {len})")]
	IndexOutOfBounds { parent: Path, index: usize, len: usize },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LimitError {
	#[error("tree too deep: depth {depth} exceeds {max}")]
	TooDeep { depth: usize, max: usize },
	#[error("tree too large: {nodes} nodes exceed {max}")]
	TooManyNodes { nodes: usize, max: usize },
	#[error("too many children at {path}: {count} exceed {max}")]
	TooManyChildren { path: Path, count: usize, max: usize },
	#[error("text at {path} too long: {len} bytes exceed {max}")]
	TextTooLong { path: Path, len: usize, max: usize },
	#[error("property {name:?} at {path} too long: {len} bytes exceed {max}")]
	PropTooLong { path: Path, name: String, len: usize, max: usize },
	#[error("duplicate sibling key {key:?} under {path}")]
	DuplicateKey { path: Path, key: String },
}

/// A malformed state delta. The instance state is left unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeltaError {
	#[error("unknown state key {key:?}")]
	UnknownKey { key: String },
	#[error("state key {key:?} expects {expected}, found {found}")]
	TypeMismatch { key: String, expected: StateKind, found: StateKind },
}

#[derive(Debug, Error)]
pub enum TemplateError {
	#[error("unterminated slot in template {template:?}")]
	UnterminatedSlot { template: String },
	#[error("empty slot name in template {template:?}")]
	EmptySlot { template: String },
	#[error("unmatched `}}` in template {template:?}")]
	UnmatchedBrace { template: String },
	#[error("conditional cases given for {slot:?}, which the template doesn't contain")]
	UnknownCaseSlot { slot: String },
	#[error("invalid template table: {0}")]
	Json(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum ServerError {
	#[error("unknown component type {0:?}")]
	UnknownComponent(String),
	#[error("unknown instance {0}")]
	UnknownInstance(InstanceId),
	#[error("instance {instance} is a {actual:?}, not a {requested:?}")]
	ComponentMismatch { instance: InstanceId, actual: String, requested: String },
	#[error("malformed delta: {0}")]
	Delta(#[from] DeltaError),
	#[error("rendered tree rejected: {0}")]
	InvalidTree(#[from] LimitError),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClientError {
	#[error("unknown instance {0}")]
	UnknownInstance(InstanceId),
	#[error("instance {0} is already mounted")]
	AlreadyMounted(InstanceId),
}

#[derive(Debug, Error)]
#[error("invalid configuration: {0}")]
pub struct ConfigError(#[from] pub serde_json::Error);

#[derive(Debug, Error)]
#[error("invalid wire message: {0}")]
pub struct WireError(#[from] pub serde_json::Error);
