//! Streamed model output accumulation.
//!
//! Text deltas are concatenated.  Tool calls are assembled from
//! [`ToolCallDelta`] fragments: fragments share an `index`, the id and name
//! usually arrive first, and the argument JSON follows in pieces.

use std::collections::HashMap;

use crate::error::Result;
use crate::model::{ModelChunk, ToolCallDelta, parse_arguments};
use crate::types::ToolCall;

// ---------------------------------------------------------------------------
// Stream accumulator
// ---------------------------------------------------------------------------

/// Accumulates [`ModelChunk`]s into a complete turn.
#[derive(Debug, Default)]
pub struct StreamAccumulator {
    /// Accumulated text.
    text: String,

    /// In-progress tool calls in first-seen order.
    builders: Vec<ToolCallBuilder>,

    /// Stream index -> position in `builders` of the call currently being
    /// assembled at that index.
    by_index: HashMap<usize, usize>,
}

/// In-progress tool call.
#[derive(Debug, Default)]
struct ToolCallBuilder {
    id: String,
    name: String,
    arguments: String,
}

impl StreamAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one chunk.
    ///
    /// Tool-call fragments are applied before text, so a chunk that carries
    /// both already counts as having a pending tool call.  Returns the text
    /// fragments in the chunk, in order.
    pub fn feed(&mut self, chunk: &ModelChunk) -> Vec<String> {
        for delta in &chunk.tool_calls {
            self.apply(delta);
        }

        let Some(content) = &chunk.content else {
            return Vec::new();
        };
        content
            .fragments()
            .into_iter()
            .filter(|f| !f.is_empty())
            .map(|f| {
                self.text.push_str(f);
                f.to_owned()
            })
            .collect()
    }

    /// Whether any tool call has started.
    pub fn has_tool_calls(&self) -> bool {
        !self.builders.is_empty()
    }

    /// Text accumulated so far.
    pub fn text(&self) -> &str {
        &self.text
    }

    fn apply(&mut self, delta: &ToolCallDelta) {
        let current = self.by_index.get(&delta.index).copied();

        // A new id at an index that already holds a call starts another call.
        let starts_new = match (current, delta.id.as_deref()) {
            (None, _) => true,
            (Some(pos), Some(id)) => {
                let existing = &self.builders[pos].id;
                !existing.is_empty() && existing != id
            }
            (Some(_), None) => false,
        };

        let pos = if starts_new {
            self.builders.push(ToolCallBuilder::default());
            let pos = self.builders.len() - 1;
            self.by_index.insert(delta.index, pos);
            pos
        } else {
            current.unwrap_or_default()
        };

        let builder = &mut self.builders[pos];
        if let Some(id) = &delta.id {
            builder.id.clone_from(id);
        }
        if let Some(name) = &delta.name {
            builder.name.push_str(name);
        }
        builder.arguments.push_str(&delta.arguments);
    }

    /// Consume the accumulator, producing the text and the parsed tool calls.
    pub fn finish(self) -> Result<(String, Vec<ToolCall>)> {
        let calls = self
            .builders
            .into_iter()
            .map(|b| {
                let arguments = parse_arguments(&b.name, &b.arguments)?;
                Ok(ToolCall {
                    id: b.id,
                    name: b.name,
                    arguments,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok((self.text, calls))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
