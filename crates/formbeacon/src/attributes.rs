//! Attribute map helpers shared by the tracker and the bootstrap.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub use formbeacon_protocol::Attributes;

/// Key under which call sites pass custom attributes.
pub const CUSTOM_KEY: &str = "custom";

/// Default attributes merged into every tracked event.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SuperAttributes {
    pub attributes: Attributes,
    pub custom: Attributes,
}

impl SuperAttributes {
    pub fn new(attributes: Attributes) -> Self {
        Self {
            attributes,
            custom: Map::new(),
        }
    }

    pub fn with_custom(mut self, custom: Attributes) -> Self {
        self.custom = custom;
        self
    }

    /// Merge `other` into `self`; nested maps merge key by key.
    pub fn merge(&mut self, other: SuperAttributes) {
        deep_merge(&mut self.attributes, other.attributes);
        deep_merge(&mut self.custom, other.custom);
    }
}

/// Recursive merge: objects on both sides merge key by key, anything else
/// (scalars, arrays, object over non-object) is overwritten by `source`.
pub fn deep_merge(target: &mut Attributes, source: Attributes) {
    for (key, source_value) in source {
        let overwrite = match (target.get_mut(&key), source_value) {
            (Some(Value::Object(target_map)), Value::Object(source_map)) => {
                deep_merge(target_map, source_map);
                None
            }
            (_, source_value) => Some(source_value),
        };
        if let Some(value) = overwrite {
            target.insert(key, value);
        }
    }
}

/// Drop `null` and `""` values recursively. Maps left empty by the strip are
/// dropped as well. Arrays are kept as they are.
pub fn strip_empty(attributes: Attributes) -> Attributes {
    attributes
        .into_iter()
        .filter_map(|(key, value)| match value {
            Value::Null => None,
            Value::String(text) if text.is_empty() => None,
            Value::Object(nested) => {
                let nested = strip_empty(nested);
                (!nested.is_empty()).then(|| (key, Value::Object(nested)))
            }
            value => Some((key, value)),
        })
        .collect()
}

/// Split call-site attributes into the flat part and the `custom` sub-map.
/// A non-object `custom` value is discarded.
pub fn split_custom(mut attributes: Attributes) -> (Attributes, Attributes) {
    let custom = match attributes.remove(CUSTOM_KEY) {
        Some(Value::Object(custom)) => custom,
        _ => Map::new(),
    };
    (attributes, custom)
}

/// `Value::Object` into its map, anything else into an empty map.
pub fn into_attributes(value: Value) -> Attributes {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}
