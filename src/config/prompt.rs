use log::info;
use serde::Deserialize;
use std::error::Error;
use std::fs;
use std::sync::Arc;

/// Framing prepended to every model call. Never shown to the patient.
pub const DEFAULT_CONSULTANT_SYSTEM: &str = "You are an AI medical consultant.\n\
Your goal is to gather symptoms from the patient and guide them.\n\
1. Ask clear questions about their symptoms (duration, severity, etc.).\n\
2. If you have enough information, suggest they upload a lab report if relevant, or provide general guidance.\n\
3. Be empathetic and professional.\n\
4. DO NOT provide definitive medical diagnoses. Always advise seeing a real doctor.";

#[derive(Deserialize, Debug, Clone)]
pub struct PromptConfig {
    pub consultant_system: String,
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self {
            consultant_system: DEFAULT_CONSULTANT_SYSTEM.to_string(),
        }
    }
}

pub fn load_prompts(path: &str) -> Result<Arc<PromptConfig>, Box<dyn Error + Send + Sync>> {
    let file_content = fs
        ::read_to_string(path)
        .map_err(|e| format!("Failed to read prompts file '{}': {}", path, e))?;
    let config: PromptConfig = serde_json
        ::from_str(&file_content)
        .map_err(|e| format!("Failed to parse prompts file '{}': {}", path, e))?;
    info!("Loaded prompt overrides from '{}'", path);
    Ok(Arc::new(config))
}
