//! Tagged representation of a captured variable value

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Why a value was summarized instead of expanded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SummaryCause {
    /// Expansion stopped at the configured depth
    DepthLimit,
    /// The value is already being expanded further up the path
    Cycle,
    /// The adapter refused to list the children
    Unreadable,
}

/// A variable value as captured at one stop
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CapturedValue {
    Scalar {
        value: String,
        #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
        type_name: Option<String>,
    },
    Sequence {
        #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
        type_name: Option<String>,
        items: Vec<CapturedValue>,
        #[serde(default)]
        truncated: bool,
    },
    Mapping {
        #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
        type_name: Option<String>,
        entries: BTreeMap<String, CapturedValue>,
        #[serde(default)]
        truncated: bool,
    },
    Summary {
        #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
        type_name: Option<String>,
        /// The adapter's one-line rendering
        text: String,
        cause: SummaryCause,
    },
}

impl CapturedValue {
    pub fn scalar(value: impl Into<String>, type_name: Option<String>) -> Self {
        CapturedValue::Scalar {
            value: value.into(),
            type_name,
        }
    }

    pub fn summary(text: impl Into<String>, type_name: Option<String>, cause: SummaryCause) -> Self {
        CapturedValue::Summary {
            type_name,
            text: text.into(),
            cause,
        }
    }

    pub fn type_name(&self) -> Option<&str> {
        match self {
            CapturedValue::Scalar { type_name, .. }
            | CapturedValue::Sequence { type_name, .. }
            | CapturedValue::Mapping { type_name, .. }
            | CapturedValue::Summary { type_name, .. } => type_name.as_deref(),
        }
    }

    /// Short single-line rendering for narration and the live view
    pub fn brief(&self, max_len: usize) -> String {
        let text = self.to_string();
        if text.chars().count() <= max_len {
            return text;
        }
        let cut: String = text.chars().take(max_len.saturating_sub(3)).collect();
        format!("{cut}...")
    }
}

impl fmt::Display for CapturedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CapturedValue::Scalar { value, .. } => f.write_str(value),
            CapturedValue::Summary { text, .. } => f.write_str(text),
            CapturedValue::Sequence {
                items, truncated, ..
            } => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                if *truncated {
                    f.write_str(", ...")?;
                }
                f.write_str("]")
            }
            CapturedValue::Mapping {
                entries, truncated, ..
            } => {
                f.write_str("{")?;
                for (i, (key, value)) in entries.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{key}: {value}")?;
                }
                if *truncated {
                    f.write_str(", ...")?;
                }
                f.write_str("}")
            }
        }
    }
}
