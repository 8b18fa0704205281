use uuid::Uuid;

use crate::core::tree::TreeNode;

pub const DELTA_TAG: &str = "delta";
const ATTR_TYPE: &str = "type";
const ATTR_NAME: &str = "name";
const ATTR_STRING_PARAM: &str = "stringParam";
const ATTR_INT_PARAM: &str = "intParam";
const ATTR_ID: &str = "id";

pub const UNDEFINED_DELTA: &str = "undefined";

/// Human-readable description of a delta: a message key plus optional parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeltaDescription {
    pub string_to_translate: String,
    pub int_parameter: i64,
    pub string_parameter: String,
}

impl DeltaDescription {
    /// Sentinel for "no integer parameter".
    pub const DEFAULT_NUM_CHANGES: i64 = -1;

    pub fn new(text: impl Into<String>) -> Self {
        Self {
            string_to_translate: text.into(),
            int_parameter: Self::DEFAULT_NUM_CHANGES,
            string_parameter: String::new(),
        }
    }

    pub fn with_int(text: impl Into<String>, value: i64) -> Self {
        Self {
            int_parameter: value,
            ..Self::new(text)
        }
    }

    pub fn with_string(text: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            string_parameter: value.into(),
            ..Self::new(text)
        }
    }

    pub fn full_text(&self) -> String {
        if self.int_parameter != Self::DEFAULT_NUM_CHANGES {
            return self
                .string_to_translate
                .replace("{x}", &self.int_parameter.to_string());
        }
        if !self.string_parameter.is_empty() {
            return self
                .string_to_translate
                .replace("{x}", &self.string_parameter);
        }
        self.string_to_translate.clone()
    }
}

impl Default for DeltaDescription {
    fn default() -> Self {
        Self::new(String::new())
    }
}

/// A single recorded change entry in a revision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delta {
    delta_type: String,
    description: DeltaDescription,
    id: Uuid,
}

impl Delta {
    pub fn new(description: DeltaDescription, delta_type: impl Into<String>) -> Self {
        Self {
            delta_type: delta_type.into(),
            description,
            id: Uuid::new_v4(),
        }
    }

    pub fn human_readable_text(&self) -> String {
        self.description.full_text()
    }

    pub fn description(&self) -> &DeltaDescription {
        &self.description
    }

    pub fn set_description(&mut self, description: DeltaDescription) {
        self.description = description;
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn delta_type(&self) -> &str {
        &self.delta_type
    }

    /// Clears type and description. The id is kept.
    pub fn reset(&mut self) {
        self.delta_type = UNDEFINED_DELTA.to_string();
        self.description = DeltaDescription::default();
    }

    pub fn serialize(&self) -> TreeNode {
        TreeNode::new(DELTA_TAG)
            .with_attribute(ATTR_TYPE, self.delta_type.as_str())
            .with_attribute(ATTR_NAME, self.description.string_to_translate.as_str())
            .with_attribute(ATTR_STRING_PARAM, self.description.string_parameter.as_str())
            .with_attribute(ATTR_INT_PARAM, self.description.int_parameter.to_string())
            .with_attribute(ATTR_ID, self.id.hyphenated().to_string())
    }

    /// Accepts either a `delta` element or a node with a `delta` child.
    pub fn deserialize(&mut self, tree: &TreeNode) {
        self.reset();

        let root = if tree.has_tag(DELTA_TAG) {
            Some(tree)
        } else {
            tree.child_by_name(DELTA_TAG)
        };
        let Some(root) = root else {
            return;
        };

        if let Some(id) = root.attribute(ATTR_ID).and_then(|s| Uuid::parse_str(s).ok()) {
            self.id = id;
        }
        self.delta_type = root.attribute_or(ATTR_TYPE, UNDEFINED_DELTA);

        let int_parameter = root
            .attribute(ATTR_INT_PARAM)
            .map(leading_int)
            .unwrap_or(DeltaDescription::DEFAULT_NUM_CHANGES);

        self.description = DeltaDescription {
            string_to_translate: root.attribute_or(ATTR_NAME, ""),
            int_parameter,
            string_parameter: root.attribute_or(ATTR_STRING_PARAM, ""),
        };
    }

    pub fn from_tree(tree: &TreeNode) -> Self {
        let mut delta = Self::new(DeltaDescription::default(), UNDEFINED_DELTA);
        delta.deserialize(tree);
        delta
    }
}

/// Leading decimal integer of `s`, ignoring whatever follows it.
/// No digits at all reads as 0.
fn leading_int(s: &str) -> i64 {
    let s = s.trim_start();
    let sign_len = usize::from(s.starts_with(['+', '-']));
    let digits = s[sign_len..]
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(s.len() - sign_len);
    s[..sign_len + digits].parse().unwrap_or(0)
}
