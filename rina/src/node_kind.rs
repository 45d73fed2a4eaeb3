use anyhow::{anyhow, bail};
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display};
use tracing::info;

/// Data type carried over a pin link. A link is only made once both ends
/// agree on one.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, AsRefStr, Display)]
pub enum PinType {
    /// ASCII only text.
    NarrowText,
    /// Any text. Compositors only take this.
    WideText,
}

/// Built-in node behaviors. Text stands in for image data: a fragment is a
/// run of characters placed at a column of a one-line canvas.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, AsRefStr, Display)]
#[serde(tag = "type")]
pub enum NodeKind {
    /// Source node. Publishes `caption` at `position`.
    TextProvider { caption: String, position: usize },
    /// Source node for narrow text. The caption must be ASCII.
    NarrowTextProvider { caption: String, position: usize },
    /// Reads one narrow fragment and publishes it as wide text, printable
    /// ASCII mapped onto its full-width form.
    NarrowToWideConverter,
    /// Composites its inputs onto a blank canvas and publishes the result
    /// at `position`.
    TextMixer { position: usize, canvas_size: usize },
    /// Terminal compositor. Presents the composited line.
    DrawDevice { canvas_size: usize },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextFragment {
    pub position: usize,
    pub text: String,
}

/// Per-run working state of a queued node.
#[derive(Debug, Default)]
pub(crate) struct NodeState {
    canvas: Option<Vec<char>>,
    pub(crate) output: Option<TextFragment>,
}

impl NodeKind {
    pub fn output_count(&self) -> usize {
        1
    }

    /// Input pin count of kinds whose pins cannot be inserted or removed.
    pub fn fixed_input_count(&self) -> Option<usize> {
        match self {
            NodeKind::TextProvider { .. } | NodeKind::NarrowTextProvider { .. } => Some(0),
            NodeKind::NarrowToWideConverter => Some(1),
            NodeKind::TextMixer { .. } | NodeKind::DrawDevice { .. } => None,
        }
    }

    pub fn accepts_inputs(&self) -> bool {
        self.fixed_input_count().is_none()
    }

    /// Types every input pin of this kind can take, most preferred first.
    pub fn input_types(&self) -> &'static [PinType] {
        match self {
            NodeKind::TextProvider { .. } | NodeKind::NarrowTextProvider { .. } => &[],
            NodeKind::NarrowToWideConverter => &[PinType::NarrowText],
            NodeKind::TextMixer { .. } | NodeKind::DrawDevice { .. } => &[PinType::WideText],
        }
    }

    /// Types every output pin of this kind can publish, most preferred first.
    pub fn output_types(&self) -> &'static [PinType] {
        match self {
            NodeKind::NarrowTextProvider { .. } => &[PinType::NarrowText],
            NodeKind::TextProvider { .. }
            | NodeKind::NarrowToWideConverter
            | NodeKind::TextMixer { .. }
            | NodeKind::DrawDevice { .. } => &[PinType::WideText],
        }
    }

    pub(crate) fn begin_process(&self, state: &mut NodeState) -> anyhow::Result<()> {
        match self {
            NodeKind::TextProvider { .. }
            | NodeKind::NarrowTextProvider { .. }
            | NodeKind::NarrowToWideConverter => {}
            NodeKind::TextMixer { canvas_size, .. } | NodeKind::DrawDevice { canvas_size } => {
                state.canvas = Some(vec![' '; *canvas_size]);
            }
        }

        Ok(())
    }

    /// `inputs` are the outputs of the node's producers in input pin order.
    pub(crate) fn end_process(
        &self,
        state: &mut NodeState,
        inputs: Vec<TextFragment>,
    ) -> anyhow::Result<()> {
        let output = match self {
            NodeKind::TextProvider { caption, position } => TextFragment {
                position: *position,
                text: caption.clone(),
            },
            NodeKind::NarrowTextProvider { caption, position } => {
                if !caption.is_ascii() {
                    bail!("Narrow caption '{}' is not ASCII", caption);
                }
                TextFragment {
                    position: *position,
                    text: caption.clone(),
                }
            }
            NodeKind::NarrowToWideConverter => {
                // a skipped producer leaves nothing to convert
                let Some(fragment) = inputs.into_iter().next() else {
                    return Ok(());
                };
                TextFragment {
                    position: fragment.position,
                    text: fragment.text.chars().map(widen).collect(),
                }
            }
            NodeKind::TextMixer { position, .. } => TextFragment {
                position: *position,
                text: composite(state, inputs)?,
            },
            NodeKind::DrawDevice { .. } => {
                let text = composite(state, inputs)?;
                info!(line = %text, "draw device presented");
                TextFragment { position: 0, text }
            }
        };
        state.output = Some(output);

        Ok(())
    }
}

/// First type of `consumer_types` that `producer_types` also offers. The
/// input side's preference wins.
pub fn negotiate(producer_types: &[PinType], consumer_types: &[PinType]) -> Option<PinType> {
    consumer_types
        .iter()
        .find(|pin_type| producer_types.contains(pin_type))
        .copied()
}

fn widen(ch: char) -> char {
    match ch {
        '!'..='~' => char::from_u32(ch as u32 - 0x21 + 0xFF01).unwrap_or(ch),
        _ => ch,
    }
}

// Spaces are transparent. Every fragment must fit inside the canvas.
fn composite(state: &mut NodeState, inputs: Vec<TextFragment>) -> anyhow::Result<String> {
    let mut canvas = state
        .canvas
        .take()
        .ok_or_else(|| anyhow!("Canvas was not allocated"))?;

    for fragment in inputs {
        let len = fragment.text.chars().count();
        if fragment.position + len > canvas.len() {
            bail!(
                "Fragment '{}' at {} does not fit into a canvas of {}",
                fragment.text,
                fragment.position,
                canvas.len()
            );
        }

        for (offset, ch) in fragment.text.chars().enumerate() {
            if ch != ' ' {
                canvas[fragment.position + offset] = ch;
            }
        }
    }

    Ok(canvas.into_iter().collect())
}
