#![doc(html_root_url = "https://docs.rs/sapwood/0.1.0")]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

//! Server-authoritative view trees with speculative client updates.
//!
//! The server owns component state and renders [`ViewNode`] trees. Clients show a display tree that may run ahead
//! of what the server has confirmed: interactions are predicted locally through a [`HintCache`],
//! batched into versioned [`StateDelta`]s, and mispredictions are corrected with the same [`diff`] that the rest
//! of the crate uses.
//!
//! See [`ClientRuntime`] and [`Server`] for the two ends, and [`driver`] and [`server::serve`] for async loops around them.

#[cfg(doctest)]
pub mod readme {
	doc_comment::doctest!("../README.md");
}

pub mod apply;
pub mod client;
mod config;
mod count_map;
pub mod diff;
pub mod driver;
pub mod error;
pub mod hint;
pub mod limits;
pub mod live;
pub mod node;
pub mod patch;
pub mod path;
pub mod server;
pub mod state;
mod temp_index;
pub mod template;
pub mod wire;

pub use apply::{apply, PatchTarget};
pub use client::{ClientEvent, ClientRuntime, Predicted, SyncPhase, SyncStats};
pub use config::SyncConfig;
pub use diff::{diff, Reconciler};
pub use hint::{HintCache, HintId, Prediction, SpeculativeHint};
pub use limits::Limits;
pub use live::LiveTree;
pub use node::{Element, Props, ViewNode};
pub use patch::{Patch, PatchSequence};
pub use path::Path;
pub use server::{Component, FnComponent, Registry, Server};
pub use state::{InstanceId, StateDelta, StateKind, StateMap, StateSchema, StateStore, StateValue};
pub use template::{PatchTemplate, TemplateEntry, TemplateTable, TextTemplate};
pub use wire::{ClientMessage, RejectReason, ServerMessage};
