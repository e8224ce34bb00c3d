//! Core node and edge type definitions
//!
//! Nodes carry a strongly-typed payload per kind. The JSON wire form is the
//! canvas shape `{id, type, position, data}`; conversion goes through a raw
//! intermediate so that unknown kinds survive a load/save round trip.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Kind of a workflow node
///
/// Source kinds resolve from their own stored data, executable kinds need a
/// remote task, and anything else is a pass-through that trivially succeeds.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum NodeKind {
    /// Free text prompt
    Text,
    /// Uploaded image (data URL or remote URL)
    UploadImage,
    /// Uploaded video (data URL or remote URL)
    UploadVideo,
    /// Remote LLM call
    Llm,
    /// Remote crop of an image
    CropImage,
    /// Remote frame extraction from a video
    ExtractFrame,
    /// Any kind the engine does not know about
    Other(String),
}

/// Execution category of a node kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeCategory {
    Source,
    Executable,
    Passthrough,
}

impl NodeKind {
    /// Wire name used by the canvas (e.g. "uploadImage")
    pub fn as_str(&self) -> &str {
        match self {
            NodeKind::Text => "text",
            NodeKind::UploadImage => "uploadImage",
            NodeKind::UploadVideo => "uploadVideo",
            NodeKind::Llm => "llm",
            NodeKind::CropImage => "cropImage",
            NodeKind::ExtractFrame => "extractFrame",
            NodeKind::Other(name) => name,
        }
    }

    pub fn category(&self) -> NodeCategory {
        match self {
            NodeKind::Text | NodeKind::UploadImage | NodeKind::UploadVideo => NodeCategory::Source,
            NodeKind::Llm | NodeKind::CropImage | NodeKind::ExtractFrame => NodeCategory::Executable,
            NodeKind::Other(_) => NodeCategory::Passthrough,
        }
    }

    pub fn is_executable(&self) -> bool {
        self.category() == NodeCategory::Executable
    }
}

impl From<String> for NodeKind {
    fn from(value: String) -> Self {
        match value.as_str() {
            "text" => NodeKind::Text,
            "uploadImage" => NodeKind::UploadImage,
            "uploadVideo" => NodeKind::UploadVideo,
            "llm" => NodeKind::Llm,
            "cropImage" => NodeKind::CropImage,
            "extractFrame" => NodeKind::ExtractFrame,
            _ => NodeKind::Other(value),
        }
    }
}

impl From<NodeKind> for String {
    fn from(kind: NodeKind) -> Self {
        kind.as_str().to_string()
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Text node payload
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TextData {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
}

/// Uploaded image payload
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ImageUploadData {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    pub image_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub had_image: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
}

/// Uploaded video payload
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct VideoUploadData {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    pub video_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub had_video: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
}

/// LLM node payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LlmData {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    pub model: String,
    pub system_prompt: Option<String>,
    pub user_message: Option<String>,
    pub temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
}

impl Default for LlmData {
    fn default() -> Self {
        Self {
            label: None,
            model: "gemini-1.5-flash".to_string(),
            system_prompt: None,
            user_message: None,
            temperature: 0.7,
            result: None,
        }
    }
}

/// Crop node payload; the rectangle is expressed in percent of the source image
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CropData {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    pub image_url: Option<String>,
    pub x: f64,
    pub y: f64,
    pub w: f64,
    pub h: f64,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub had_result: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
}

impl Default for CropData {
    fn default() -> Self {
        Self {
            label: None,
            image_url: None,
            x: 0.0,
            y: 0.0,
            w: 100.0,
            h: 100.0,
            had_result: false,
            result: None,
        }
    }
}

/// Unit of an extract-frame timestamp
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimestampUnit {
    #[default]
    Sec,
    Ms,
    Pct,
}

/// Extract-frame node payload
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExtractFrameData {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    pub video_url: Option<String>,
    pub timestamp: f64,
    pub timestamp_unit: TimestampUnit,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub had_result: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
}

/// Typed payload of a node, one variant per kind
#[derive(Debug, Clone, PartialEq)]
pub enum NodeData {
    Text(TextData),
    UploadImage(ImageUploadData),
    UploadVideo(VideoUploadData),
    Llm(LlmData),
    CropImage(CropData),
    ExtractFrame(ExtractFrameData),
    /// Unknown kind; the raw payload is kept untouched
    Passthrough { kind: String, raw: Value },
}

impl NodeData {
    pub fn kind(&self) -> NodeKind {
        match self {
            NodeData::Text(_) => NodeKind::Text,
            NodeData::UploadImage(_) => NodeKind::UploadImage,
            NodeData::UploadVideo(_) => NodeKind::UploadVideo,
            NodeData::Llm(_) => NodeKind::Llm,
            NodeData::CropImage(_) => NodeKind::CropImage,
            NodeData::ExtractFrame(_) => NodeKind::ExtractFrame,
            NodeData::Passthrough { kind, .. } => NodeKind::Other(kind.clone()),
        }
    }

    fn label(&self) -> Option<&str> {
        match self {
            NodeData::Text(d) => d.label.as_deref(),
            NodeData::UploadImage(d) => d.label.as_deref(),
            NodeData::UploadVideo(d) => d.label.as_deref(),
            NodeData::Llm(d) => d.label.as_deref(),
            NodeData::CropImage(d) => d.label.as_deref(),
            NodeData::ExtractFrame(d) => d.label.as_deref(),
            NodeData::Passthrough { raw, .. } => raw.get("label").and_then(Value::as_str),
        }
    }

    fn result(&self) -> Option<&str> {
        match self {
            NodeData::Text(d) => d.result.as_deref(),
            NodeData::UploadImage(d) => d.result.as_deref(),
            NodeData::UploadVideo(d) => d.result.as_deref(),
            NodeData::Llm(d) => d.result.as_deref(),
            NodeData::CropImage(d) => d.result.as_deref(),
            NodeData::ExtractFrame(d) => d.result.as_deref(),
            NodeData::Passthrough { raw, .. } => raw.get("result").and_then(Value::as_str),
        }
    }

    fn result_mut(&mut self) -> Option<&mut Option<String>> {
        match self {
            NodeData::Text(d) => Some(&mut d.result),
            NodeData::UploadImage(d) => Some(&mut d.result),
            NodeData::UploadVideo(d) => Some(&mut d.result),
            NodeData::Llm(d) => Some(&mut d.result),
            NodeData::CropImage(d) => Some(&mut d.result),
            NodeData::ExtractFrame(d) => Some(&mut d.result),
            NodeData::Passthrough { .. } => None,
        }
    }

    /// Native payload field of source kinds (text, imageUrl, videoUrl)
    fn native_value(&self) -> Option<&str> {
        match self {
            NodeData::Text(d) => Some(d.text.as_str()),
            NodeData::UploadImage(d) => d.image_url.as_deref(),
            NodeData::UploadVideo(d) => d.video_url.as_deref(),
            _ => None,
        }
    }
}

/// A single node in the workflow graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawNode", into = "RawNode")]
pub struct Node {
    /// Unique node identifier (e.g., "llm-1718000000")
    pub id: String,
    /// Canvas position; carried for persistence, ignored by the engine
    pub position: Option<Value>,
    /// Typed payload which also determines the node kind
    pub data: NodeData,
}

impl Node {
    pub fn new(id: impl Into<String>, data: NodeData) -> Self {
        Self {
            id: id.into(),
            position: None,
            data,
        }
    }

    pub fn text(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self::new(
            id,
            NodeData::Text(TextData {
                text: text.into(),
                ..Default::default()
            }),
        )
    }

    pub fn kind(&self) -> NodeKind {
        self.data.kind()
    }

    pub fn category(&self) -> NodeCategory {
        self.kind().category()
    }

    /// Display name: label, falling back to the kind and then the id
    pub fn name(&self) -> String {
        match self.data.label() {
            Some(label) if !label.is_empty() => label.to_string(),
            _ => match self.kind() {
                NodeKind::Other(kind) if kind.is_empty() => self.id.clone(),
                kind => kind.to_string(),
            },
        }
    }

    /// Value this node offers to downstream consumers
    ///
    /// Prefers a previously computed `result` and falls back to the native
    /// field of source kinds. Empty strings count as absent.
    pub fn output_value(&self) -> Option<String> {
        self.data
            .result()
            .filter(|value| !value.is_empty())
            .or_else(|| self.data.native_value().filter(|value| !value.is_empty()))
            .map(str::to_string)
    }

    /// Native payload of a source node (text, imageUrl or videoUrl), if non-empty
    pub fn source_value(&self) -> Option<String> {
        self.data
            .native_value()
            .filter(|value| !value.is_empty())
            .map(str::to_string)
    }

    /// Whether an inline media payload was cleared before the node was stored
    pub fn payload_stripped(&self) -> bool {
        match &self.data {
            NodeData::UploadImage(d) => d.had_image,
            NodeData::UploadVideo(d) => d.had_video,
            NodeData::CropImage(d) => d.had_result,
            NodeData::ExtractFrame(d) => d.had_result,
            NodeData::Passthrough { raw, .. } => ["hadImage", "hadVideo", "hadResult"]
                .iter()
                .any(|flag| raw.get(*flag).and_then(Value::as_bool).unwrap_or(false)),
            NodeData::Text(_) | NodeData::Llm(_) => false,
        }
    }

    /// Store a computed result on the node. Pass-through nodes keep no result.
    pub fn set_result(&mut self, result: Option<String>) {
        if let Some(slot) = self.data.result_mut() {
            *slot = result;
        }
    }
}

/// Canvas wire form of a node
#[derive(Debug, Clone, Serialize, Deserialize)]
struct RawNode {
    id: String,
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    position: Option<Value>,
    #[serde(default)]
    data: Value,
}

impl TryFrom<RawNode> for Node {
    type Error = serde_json::Error;

    fn try_from(raw: RawNode) -> Result<Self, Self::Error> {
        let payload = if raw.data.is_null() {
            Value::Object(Default::default())
        } else {
            raw.data
        };

        let data = match NodeKind::from(raw.kind) {
            NodeKind::Text => NodeData::Text(serde_json::from_value(payload)?),
            NodeKind::UploadImage => NodeData::UploadImage(serde_json::from_value(payload)?),
            NodeKind::UploadVideo => NodeData::UploadVideo(serde_json::from_value(payload)?),
            NodeKind::Llm => NodeData::Llm(serde_json::from_value(payload)?),
            NodeKind::CropImage => NodeData::CropImage(serde_json::from_value(payload)?),
            NodeKind::ExtractFrame => NodeData::ExtractFrame(serde_json::from_value(payload)?),
            NodeKind::Other(kind) => NodeData::Passthrough { kind, raw: payload },
        };

        Ok(Node {
            id: raw.id,
            position: raw.position,
            data,
        })
    }
}

impl From<Node> for RawNode {
    fn from(node: Node) -> Self {
        let kind = node.kind().to_string();
        let data = match node.data {
            NodeData::Text(d) => serde_json::to_value(d),
            NodeData::UploadImage(d) => serde_json::to_value(d),
            NodeData::UploadVideo(d) => serde_json::to_value(d),
            NodeData::Llm(d) => serde_json::to_value(d),
            NodeData::CropImage(d) => serde_json::to_value(d),
            NodeData::ExtractFrame(d) => serde_json::to_value(d),
            NodeData::Passthrough { raw, .. } => Ok(raw),
        }
        .unwrap_or_default();

        RawNode {
            id: node.id,
            kind,
            position: node.position,
            data,
        }
    }
}

/// Directed data dependency between two named handles
///
/// The target's input `target_handle` is fed by the source's output
/// `source_handle`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Edge {
    pub id: String,
    pub source: String,
    pub target: String,
    #[serde(default)]
    pub source_handle: String,
    #[serde(default)]
    pub target_handle: String,
}

impl Edge {
    /// Build an edge with the canvas id convention
    pub fn new(
        source: impl Into<String>,
        source_handle: impl Into<String>,
        target: impl Into<String>,
        target_handle: impl Into<String>,
    ) -> Self {
        let (source, source_handle) = (source.into(), source_handle.into());
        let (target, target_handle) = (target.into(), target_handle.into());
        Self {
            id: format!("xy-edge__{}{}-{}{}", source, source_handle, target, target_handle),
            source,
            target,
            source_handle,
            target_handle,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn canvas_json_parses_into_typed_payloads() {
        let node: Node = serde_json::from_value(json!({
            "id": "crop-1",
            "type": "cropImage",
            "position": {"x": 10, "y": 20},
            "data": {"label": "Crop", "x": 10, "w": 50}
        }))
        .unwrap();

        assert_eq!(node.kind(), NodeKind::CropImage);
        match &node.data {
            NodeData::CropImage(crop) => {
                assert_eq!(crop.x, 10.0);
                assert_eq!(crop.w, 50.0);
                assert_eq!(crop.h, 100.0);
            }
            other => panic!("unexpected payload: {:?}", other),
        }
        assert_eq!(node.name(), "Crop");
    }

    #[test]
    fn unknown_kinds_round_trip_untouched() {
        let original = json!({
            "id": "note-1",
            "type": "stickyNote",
            "data": {"label": "hello", "color": "yellow"}
        });
        let node: Node = serde_json::from_value(original.clone()).unwrap();
        assert_eq!(node.kind(), NodeKind::Other("stickyNote".to_string()));
        assert_eq!(node.category(), NodeCategory::Passthrough);
        assert_eq!(serde_json::to_value(&node).unwrap(), original);
    }

    #[test]
    fn output_prefers_result_over_native_field() {
        let mut node: Node = serde_json::from_value(json!({
            "id": "img",
            "type": "uploadImage",
            "data": {"imageUrl": "https://cdn/a.png"}
        }))
        .unwrap();
        assert_eq!(node.output_value().as_deref(), Some("https://cdn/a.png"));

        node.set_result(Some("data:image/png;base64,AAA".to_string()));
        assert_eq!(node.output_value().as_deref(), Some("data:image/png;base64,AAA"));

        node.set_result(Some(String::new()));
        assert_eq!(node.output_value().as_deref(), Some("https://cdn/a.png"));
    }

    #[test]
    fn null_data_takes_kind_defaults() {
        let node: Node = serde_json::from_value(json!({"id": "llm-1", "type": "llm"})).unwrap();
        match node.data {
            NodeData::Llm(ref llm) => {
                assert_eq!(llm.model, "gemini-1.5-flash");
                assert!((llm.temperature - 0.7).abs() < f32::EPSILON);
            }
            other => panic!("unexpected payload: {:?}", other),
        }
        assert_eq!(node.output_value(), None);
    }
}
