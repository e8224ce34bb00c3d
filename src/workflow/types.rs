//! Persisted workflow definition
//!
//! A workflow is a named graph. Its JSON form is `{id, name, description,
//! nodes, edges}` with nodes in canvas shape.

use crate::graph::{NodeData, WorkflowGraph};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A complete workflow definition containing nodes and their connections
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workflow {
    /// Unique workflow identifier (e.g., "wf-product-shots")
    pub id: String,
    /// Human-readable workflow name
    #[serde(default = "default_name")]
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Nodes and edges
    #[serde(flatten)]
    pub graph: WorkflowGraph,
}

fn default_name() -> String {
    "Untitled Workflow".to_string()
}

fn is_data_url(value: &str) -> bool {
    value.starts_with("data:")
}

/// Clear an inline data URL, returning whether one was present
fn strip(slot: &mut Option<String>) -> bool {
    if slot.as_deref().is_some_and(is_data_url) {
        *slot = None;
        true
    } else {
        false
    }
}

impl Workflow {
    pub fn new(id: impl Into<String>, name: impl Into<String>, graph: WorkflowGraph) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            graph,
        }
    }

    /// Drop inline `data:` payloads before persistence
    ///
    /// Uploaded media and media results can be megabytes of base64. They are
    /// cleared and a `hadImage` / `hadVideo` / `hadResult` flag is left in
    /// their place so the canvas can prompt for a re-upload or re-run.
    /// Returns the number of fields cleared.
    pub fn strip_binary_payloads(&mut self) -> usize {
        let mut cleared = 0;
        for node in &mut self.graph.nodes {
            match &mut node.data {
                NodeData::UploadImage(data) => {
                    if strip(&mut data.image_url) {
                        data.had_image = true;
                        cleared += 1;
                    }
                    cleared += usize::from(strip(&mut data.result));
                }
                NodeData::UploadVideo(data) => {
                    if strip(&mut data.video_url) {
                        data.had_video = true;
                        cleared += 1;
                    }
                    cleared += usize::from(strip(&mut data.result));
                }
                NodeData::CropImage(data) => {
                    cleared += usize::from(strip(&mut data.image_url));
                    if strip(&mut data.result) {
                        data.had_result = true;
                        cleared += 1;
                    }
                }
                NodeData::ExtractFrame(data) => {
                    cleared += usize::from(strip(&mut data.video_url));
                    if strip(&mut data.result) {
                        data.had_result = true;
                        cleared += 1;
                    }
                }
                NodeData::Text(data) => cleared += usize::from(strip(&mut data.result)),
                NodeData::Llm(data) => cleared += usize::from(strip(&mut data.result)),
                NodeData::Passthrough { raw, .. } => cleared += strip_raw(raw),
            }
        }
        cleared
    }
}

/// Same treatment for payloads of unknown kinds
fn strip_raw(raw: &mut Value) -> usize {
    let Some(map) = raw.as_object_mut() else {
        return 0;
    };

    let mut cleared = 0;
    for (field, flag) in [("imageUrl", "hadImage"), ("videoUrl", "hadVideo"), ("result", "hadResult")] {
        if map.get(field).and_then(Value::as_str).is_some_and(is_data_url) {
            map.insert(field.to_string(), Value::Null);
            map.insert(flag.to_string(), Value::Bool(true));
            cleared += 1;
        }
    }
    cleared
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn binary_payloads_are_flagged_and_cleared() {
        let mut workflow: Workflow = serde_json::from_value(json!({
            "id": "wf-1",
            "name": "Shots",
            "nodes": [
                {"id": "img", "type": "uploadImage", "data": {"imageUrl": "data:image/png;base64,AAAA", "fileName": "a.png"}},
                {"id": "crop", "type": "cropImage", "data": {"result": "data:image/png;base64,BBBB"}},
                {"id": "llm", "type": "llm", "data": {"result": "a caption"}},
                {"id": "vid", "type": "uploadVideo", "data": {"videoUrl": "https://cdn/v.mp4"}},
                {"id": "odd", "type": "custom", "data": {"imageUrl": "data:x"}}
            ],
            "edges": []
        }))
        .unwrap();

        assert_eq!(workflow.strip_binary_payloads(), 3);

        let value = serde_json::to_value(&workflow).unwrap();
        let nodes = &value["nodes"];
        assert_eq!(nodes[0]["data"]["imageUrl"], Value::Null);
        assert_eq!(nodes[0]["data"]["hadImage"], true);
        assert_eq!(nodes[0]["data"]["fileName"], "a.png");
        assert_eq!(nodes[1]["data"]["hadResult"], true);
        assert_eq!(nodes[2]["data"]["result"], "a caption");
        assert_eq!(nodes[3]["data"]["videoUrl"], "https://cdn/v.mp4");
        assert_eq!(nodes[4]["data"]["hadImage"], true);
    }

    #[test]
    fn missing_name_gets_a_default() {
        let workflow: Workflow = serde_json::from_value(json!({"id": "wf-2"})).unwrap();
        assert_eq!(workflow.name, "Untitled Workflow");
        assert!(workflow.graph.nodes.is_empty());
    }
}
