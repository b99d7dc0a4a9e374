use serde::{Deserialize, Serialize};

/// A locally installed model, ready for display in a picker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalModel {
    /// Name as the provider knows it, e.g. "llama3.2:3b"
    pub model_name: String,
    pub display_name: String,
    pub provider: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalModelListResponse {
    pub models: Vec<LocalModel>,
}
