//! Persona configuration: who the agent is and how it speaks.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Persona {
    pub name: String,
    pub description: String,
    pub voice_id: String,
    pub voice_name: String,
    pub prompt: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct PersonaSettings {
    pub max_response_sentences: u32,
    pub allow_screen_context: bool,
    pub conversation_memory: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct PersonaConfig {
    pub personas: HashMap<String, Persona>,
    pub default: String,
    pub settings: PersonaSettings,
}

impl PersonaConfig {
    pub fn load(path: &Path) -> Result<Self, crate::AgentError> {
        let data = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&data)?)
    }

    /// Built-in fallback used when no config file can be found.
    #[must_use]
    pub fn builtin() -> Self {
        let mut personas = HashMap::new();
        personas.insert(
            "assistant".to_string(),
            Persona {
                name: "Helpful Assistant".to_string(),
                description: "A friendly, general-purpose voice assistant".to_string(),
                voice_id: "21m00Tcm4TlvDq8ikWAM".to_string(),
                voice_name: "Rachel".to_string(),
                prompt: "You are a helpful voice assistant. Keep responses concise and \
                         conversational since they will be spoken aloud. Respond in 1-2 \
                         sentences maximum."
                    .to_string(),
            },
        );
        Self {
            personas,
            default: "assistant".to_string(),
            settings: PersonaSettings::default(),
        }
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Persona> {
        self.personas.get(key)
    }
}

/// Candidate locations for the persona file, checked in order: next to the
/// executable, then upward from the working directory.
#[must_use]
pub fn default_config_path() -> PathBuf {
    if let Ok(exe) = std::env::current_exe() {
        if let Some(dir) = exe.parent() {
            let candidate = dir.join("../../config/prompts.json");
            if candidate.exists() {
                return candidate;
            }
        }
    }

    for candidate in [
        "config/prompts.json",
        "../config/prompts.json",
        "../../config/prompts.json",
    ] {
        let path = PathBuf::from(candidate);
        if path.exists() {
            return path;
        }
    }

    PathBuf::from("config/prompts.json")
}

/// Make sure the prompt mentions the screen-sharing capability so the model
/// knows it can reference forwarded screenshots.
#[must_use]
pub fn with_screen_hint(prompt: &str) -> String {
    if prompt.to_lowercase().contains("screen") {
        return prompt.to_string();
    }
    format!(
        "{prompt} You can also see the user's screen when they share it - reference what \
         you see when relevant."
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_config_has_a_valid_default() {
        let config = PersonaConfig::builtin();
        assert!(config.get(&config.default).is_some());
    }

    #[test]
    fn config_parses_from_json() {
        let json = r#"{
            "personas": {
                "coach": {
                    "name": "Coach",
                    "description": "Motivational coach",
                    "voice_id": "v1",
                    "voice_name": "Sam",
                    "prompt": "You are a coach."
                }
            },
            "default": "coach",
            "settings": {
                "max_response_sentences": 2,
                "allow_screen_context": true,
                "conversation_memory": true
            }
        }"#;
        let config: PersonaConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.get("coach").unwrap().voice_name, "Sam");
        assert!(config.settings.allow_screen_context);
    }

    #[test]
    fn screen_hint_is_added_only_when_missing() {
        let hinted = with_screen_hint("You are a helper.");
        assert!(hinted.contains("screen"));

        let already = "You watch the user's screen closely.";
        assert_eq!(with_screen_hint(already), already);
    }
}
