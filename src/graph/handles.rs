//! Handle typing rules
//!
//! Every (node kind, handle id) pair maps to a semantic payload type. Two
//! handles may be wired together only when their types match or either side
//! accepts anything.

use crate::graph::types::NodeKind;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Semantic payload type carried by a handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HandleType {
    Text,
    Image,
    Video,
    Any,
}

impl fmt::Display for HandleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            HandleType::Text => "text",
            HandleType::Image => "image",
            HandleType::Video => "video",
            HandleType::Any => "any",
        };
        f.write_str(name)
    }
}

/// Look up the semantic type of a handle on a node kind
pub fn handle_type(kind: &NodeKind, handle: &str) -> HandleType {
    match (kind, handle) {
        (NodeKind::Text, "text") => HandleType::Text,
        (NodeKind::UploadImage, "image") => HandleType::Image,
        (NodeKind::UploadVideo, "video") => HandleType::Video,
        (NodeKind::Llm, "system_prompt" | "user_message" | "output") => HandleType::Text,
        (NodeKind::Llm, "images") => HandleType::Image,
        (NodeKind::CropImage, "image" | "output") => HandleType::Image,
        (NodeKind::ExtractFrame, "video") => HandleType::Video,
        (NodeKind::ExtractFrame, "output") => HandleType::Image,
        _ => HandleType::Any,
    }
}

/// Check whether an output handle may feed an input handle
pub fn is_compatible(
    source_kind: &NodeKind,
    source_handle: &str,
    target_kind: &NodeKind,
    target_handle: &str,
) -> bool {
    let from = handle_type(source_kind, source_handle);
    let to = handle_type(target_kind, target_handle);
    from == to || from == HandleType::Any || to == HandleType::Any
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_output_cannot_feed_image_input() {
        assert!(!is_compatible(&NodeKind::Text, "text", &NodeKind::CropImage, "image"));
        assert!(!is_compatible(&NodeKind::Text, "text", &NodeKind::Llm, "images"));
    }

    #[test]
    fn matching_types_connect() {
        assert!(is_compatible(&NodeKind::Text, "text", &NodeKind::Llm, "user_message"));
        assert!(is_compatible(&NodeKind::UploadImage, "image", &NodeKind::CropImage, "image"));
        assert!(is_compatible(&NodeKind::ExtractFrame, "output", &NodeKind::Llm, "images"));
        assert!(is_compatible(&NodeKind::UploadVideo, "video", &NodeKind::ExtractFrame, "video"));
    }

    #[test]
    fn unknown_handles_accept_anything() {
        assert_eq!(handle_type(&NodeKind::CropImage, "x"), HandleType::Any);
        assert!(is_compatible(&NodeKind::Llm, "output", &NodeKind::CropImage, "x"));
        assert!(is_compatible(
            &NodeKind::Other("note".to_string()),
            "out",
            &NodeKind::CropImage,
            "image"
        ));
    }
}
