use serde::{Deserialize, Serialize};

///
/// IterableDescription
///
/// Portable description of one iterable node: its kind tag, numeric
/// parameters in declaration order, and child descriptions.
///
/// Parameter layout per kind:
/// - `empty`: none
/// - `all_entities`: `[type_id]`
/// - `entities_with_link`: `[type_id, link_id]`
/// - `filter_links`: `[type_id, link_id]`, one child (the target set)
/// - `union` / `intersect`: none, two children
///

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct IterableDescription {
    pub tag: u8,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub params: Vec<u32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<Self>,
}

impl IterableDescription {
    #[must_use]
    pub const fn new(tag: u8, params: Vec<u32>, children: Vec<Self>) -> Self {
        Self {
            tag,
            params,
            children,
        }
    }
}
