//! Discovery action.
//!
//! `meta.actions` enumerates every registered action with its schema and
//! required scope, so callers can introspect capabilities without
//! out-of-band documentation. The registry wires this in itself because the
//! descriptor list only exists once all packs are assembled.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::json;
use validator::Validate;

use crate::registry::{typed_handler, ActionDef, ActionDescriptor};

pub const META_ACTIONS: &str = "meta.actions";
pub const META_ACTIONS_SCOPE: &str = "meta.actions:read";

#[derive(Debug, Deserialize, Validate)]
struct DescribeInput {}

pub fn meta_actions_descriptor() -> ActionDescriptor {
    ActionDescriptor {
        name: META_ACTIONS.to_string(),
        required_scope: META_ACTIONS_SCOPE.to_string(),
        description: "List every registered action with its required scope and schemas"
            .to_string(),
        side_effecting: false,
        input_schema: json!({"type": "object", "properties": {}}),
        output_schema: json!({
            "type": "object",
            "properties": {
                "actions": {
                    "type": "array",
                    "items": {"type": "object"}
                }
            }
        }),
    }
}

pub(crate) fn build_meta_action(descriptors: Arc<Vec<ActionDescriptor>>) -> ActionDef {
    let descriptor = meta_actions_descriptor();
    ActionDef {
        name: descriptor.name.clone(),
        required_scope: descriptor.required_scope.clone(),
        description: descriptor.description.clone(),
        side_effecting: false,
        input_schema: descriptor.input_schema.clone(),
        output_schema: descriptor.output_schema.clone(),
        handler: typed_handler(move |_ctx, _input: DescribeInput| {
            let descriptors = descriptors.clone();
            async move { Ok(json!({ "actions": &*descriptors })) }
        }),
    }
}
