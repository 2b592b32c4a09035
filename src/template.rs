//! Parameterized patch templates, as emitted per component type by an offline template compiler.
//!
//! A table is loaded once and never changes afterwards. Each entry maps a set of bound state keys to
//! patches whose text contains named `{slot}`s:
//!
//! ```json
//! {
//!   "Counter": [
//!     { "keys": ["count"], "patches": [{ "type": "UpdateText", "path": [0], "text": "Count: {count}" }] },
//!     { "keys": ["active"], "patches": [{
//!       "type": "SetProp", "path": [], "key": "class",
//!       "value": { "text": "{active}", "cases": { "active": { "true": "on", "false": "off" } } }
//!     }] }
//!   ]
//! }
//! ```

use crate::{
	error::TemplateError,
	patch::Patch,
	path::Path,
	state::{StateMap, StateValue},
};
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};

/// Where slot values come from: the interaction's changes first, then the instance's local state.
#[derive(Debug, Clone, Copy)]
pub struct Bindings<'a> {
	changes: &'a StateMap,
	state: &'a StateMap,
}

impl<'a> Bindings<'a> {
	#[must_use]
	pub fn new(changes: &'a StateMap, state: &'a StateMap) -> Self {
		Self { changes, state }
	}

	#[must_use]
	pub fn get(&self, slot: &str) -> Option<&'a StateValue> {
		self.changes.get(slot).or_else(|| self.state.get(slot))
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
	Literal(String),
	Slot(String),
}

/// Text with named slots.
///
/// `{name}` is a slot, `{{` and `}}` are literal braces. A slot may carry conditional cases that map
/// a rendered value to fixed text, like `true` to `"Active"`. Values without a case render as they are.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(try_from = "TextTemplateSource")]
pub struct TextTemplate {
	segments: Vec<Segment>,
	cases: BTreeMap<String, BTreeMap<String, String>>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum TextTemplateSource {
	Plain(String),
	Conditional {
		text: String,
		#[serde(default)]
		cases: BTreeMap<String, BTreeMap<String, String>>,
	},
}

impl TryFrom<TextTemplateSource> for TextTemplate {
	type Error = TemplateError;

	fn try_from(source: TextTemplateSource) -> Result<Self, Self::Error> {
		match source {
			TextTemplateSource::Plain(text) => Self::parse(&text),
			TextTemplateSource::Conditional { text, cases } => {
				let mut template = Self::parse(&text)?;
				for (slot, cases) in cases {
					for (value, text) in cases {
						template = template.with_case(&slot, value, text)?;
					}
				}
				Ok(template)
			}
		}
	}
}

impl TextTemplate {
	/// # Errors
	///
	/// Iff a slot is unterminated or empty, or a `}` is neither doubled nor closing a slot.
	pub fn parse(text: &str) -> Result<Self, TemplateError> {
		let mut segments = Vec::new();
		let mut literal = String::new();
		let mut chars = text.chars().peekable();
		while let Some(c) = chars.next() {
			match c {
				'{' if chars.peek() == Some(&'{') => {
					chars.next();
					literal.push('{');
				}
				'{' => {
					let mut name = String::new();
					loop {
						match chars.next() {
							Some('}') => break,
							Some(c) => name.push(c),
							None => return Err(TemplateError::UnterminatedSlot { template: text.to_owned() }),
						}
					}
					if name.is_empty() {
						return Err(TemplateError::EmptySlot { template: text.to_owned() });
					}
					if !literal.is_empty() {
						segments.push(Segment::Literal(core::mem::take(&mut literal)));
					}
					segments.push(Segment::Slot(name));
				}
				'}' if chars.peek() == Some(&'}') => {
					chars.next();
					literal.push('}');
				}
				'}' => return Err(TemplateError::UnmatchedBrace { template: text.to_owned() }),
				c => literal.push(c),
			}
		}
		if !literal.is_empty() {
			segments.push(Segment::Literal(literal));
		}
		Ok(Self {
			segments,
			cases: BTreeMap::new(),
		})
	}

	/// Adds a conditional case: wherever `slot` renders as `value`, `text` is used instead.
	///
	/// # Errors
	///
	/// Iff the template has no slot named `slot`.
	pub fn with_case(mut self, slot: &str, value: impl Into<String>, text: impl Into<String>) -> Result<Self, TemplateError> {
		if !self.slots().any(|s| s == slot) {
			return Err(TemplateError::UnknownCaseSlot { slot: slot.to_owned() });
		}
		self.cases.entry(slot.to_owned()).or_default().insert(value.into(), text.into());
		Ok(self)
	}

	pub fn slots(&self) -> impl Iterator<Item = &str> {
		self.segments.iter().filter_map(|segment| match segment {
			Segment::Slot(name) => Some(name.as_str()),
			Segment::Literal(_) => None,
		})
	}

	/// [`None`] iff a slot has no value in `bindings`.
	#[must_use]
	pub fn render(&self, bindings: &Bindings<'_>) -> Option<String> {
		let mut rendered = String::new();
		for segment in &self.segments {
			match segment {
				Segment::Literal(literal) => rendered.push_str(literal),
				Segment::Slot(name) => {
					let value = bindings.get(name)?.to_string();
					match self.cases.get(name).and_then(|cases| cases.get(&value)) {
						Some(text) => rendered.push_str(text),
						None => rendered.push_str(&value),
					}
				}
			}
		}
		Some(rendered)
	}
}

/// One patch of a template entry.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all_fields = "camelCase")]
pub enum PatchTemplate {
	UpdateText { path: Path, text: TextTemplate },
	SetProp { path: Path, key: String, value: TextTemplate },
	RemoveProp { path: Path, key: String },
	/// A patch without slots, used as is.
	Fixed { patch: Patch },
}

impl PatchTemplate {
	#[must_use]
	pub fn instantiate(&self, bindings: &Bindings<'_>) -> Option<Patch> {
		Some(match self {
			PatchTemplate::UpdateText { path, text } => Patch::UpdateText {
				path: path.clone(),
				text: text.render(bindings)?,
			},
			PatchTemplate::SetProp { path, key, value } => Patch::SetProp {
				path: path.clone(),
				key: key.clone(),
				value: value.render(bindings)?,
			},
			PatchTemplate::RemoveProp { path, key } => Patch::RemoveProp {
				path: path.clone(),
				key: key.clone(),
			},
			PatchTemplate::Fixed { patch } => patch.clone(),
		})
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TemplateEntry {
	/// The state keys whose change this entry predicts.
	pub keys: BTreeSet<String>,
	pub patches: Vec<PatchTemplate>,
}

impl TemplateEntry {
	#[must_use]
	pub fn new<K: Into<String>>(keys: impl IntoIterator<Item = K>, patches: Vec<PatchTemplate>) -> Self {
		Self {
			keys: keys.into_iter().map(Into::into).collect(),
			patches,
		}
	}

	/// [`None`] iff a slot has no value in `bindings`.
	#[must_use]
	pub fn instantiate(&self, bindings: &Bindings<'_>) -> Option<Vec<Patch>> {
		self.patches.iter().map(|patch| patch.instantiate(bindings)).collect()
	}
}

/// Template entries by component type.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct TemplateTable {
	components: BTreeMap<String, Vec<TemplateEntry>>,
}

impl TemplateTable {
	#[must_use]
	pub fn new() -> Self {
		Self::default()
	}

	/// # Errors
	///
	/// Iff `json` isn't a valid table, including malformed template text.
	pub fn from_json(json: &str) -> Result<Self, TemplateError> {
		Ok(serde_json::from_str(json)?)
	}

	#[must_use]
	pub fn with_entry(mut self, component: impl Into<String>, entry: TemplateEntry) -> Self {
		self.components.entry(component.into()).or_default().push(entry);
		self
	}

	#[must_use]
	pub fn entries(&self, component: &str) -> &[TemplateEntry] {
		self.components.get(component).map_or(&[][..], Vec::as_slice)
	}

	/// Whether any entry of `component` is triggered by `key`.
	#[must_use]
	pub fn binds(&self, component: &str, key: &str) -> bool {
		self.entries(component).iter().any(|entry| entry.keys.contains(key))
	}
}
