//! Claude-backed implementation of [`NarrativeBackend`].

use super::{BackendError, NarrativeBackend, PriorTurn, ResponseSchema, TextStream, TurnRole};
use ::claude::{Claude, Message, Request, Role, Tool};
use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{json, Value};
use tracing::debug;

// Array schemas are wrapped in an object under this key, since a tool's
// input must be an object.
const ARRAY_WRAPPER_KEY: &str = "items";

/// Adapter over the Anthropic Messages API.
#[derive(Clone)]
pub struct ClaudeBackend {
    client: Claude,
    max_tokens: usize,
    temperature: Option<f32>,
}

impl ClaudeBackend {
    pub fn new(client: Claude) -> Self {
        Self {
            client,
            max_tokens: 2048,
            temperature: None,
        }
    }

    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_temperature(mut self, temperature: Option<f32>) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn model(&self) -> &str {
        self.client.model()
    }

    fn request(&self, messages: Vec<Message>) -> Request {
        let request = Request::new(messages).with_max_tokens(self.max_tokens);
        match self.temperature {
            Some(temperature) => request.with_temperature(temperature),
            None => request,
        }
    }
}

/// Map prior turns and the new message onto a user-first conversation.
///
/// Leading model turns and empty turns are dropped; consecutive turns by the
/// same speaker are merged.
fn build_messages(prior_turns: &[PriorTurn], message: &str) -> Vec<Message> {
    let mut merged: Vec<(Role, String)> = Vec::new();

    let turns = prior_turns
        .iter()
        .map(|turn| (turn.role, turn.text.as_str()))
        .chain(std::iter::once((TurnRole::User, message)));

    for (role, text) in turns {
        if text.trim().is_empty() {
            continue;
        }
        let role = match role {
            TurnRole::User => Role::User,
            TurnRole::Model => Role::Assistant,
        };
        if merged.is_empty() && role == Role::Assistant {
            continue;
        }
        match merged.last_mut() {
            Some((last_role, last_text)) if *last_role == role => {
                last_text.push_str("\n\n");
                last_text.push_str(text);
            }
            _ => merged.push((role, text.to_string())),
        }
    }

    merged
        .into_iter()
        .map(|(role, text)| match role {
            Role::User => Message::user(text),
            Role::Assistant => Message::assistant(text),
        })
        .collect()
}

fn tool_for(schema: &ResponseSchema) -> Tool {
    let input_schema = if schema.is_array() {
        json!({
            "type": "object",
            "properties": { ARRAY_WRAPPER_KEY: schema.schema() },
            "required": [ARRAY_WRAPPER_KEY],
        })
    } else {
        schema.schema().clone()
    };

    Tool {
        name: schema.name().to_string(),
        description: schema.description().to_string(),
        input_schema,
    }
}

fn unwrap_tool_input(schema: &ResponseSchema, input: Value) -> Result<Value, BackendError> {
    if !schema.is_array() || input.is_array() {
        return Ok(input);
    }
    match input {
        Value::Object(mut map) => map
            .remove(ARRAY_WRAPPER_KEY)
            .ok_or(BackendError::EmptyResponse),
        other => Err(BackendError::Malformed(format!(
            "expected an object wrapping `{ARRAY_WRAPPER_KEY}`, got {other}"
        ))),
    }
}

#[async_trait]
impl NarrativeBackend for ClaudeBackend {
    async fn stream_complete(
        &self,
        system: &str,
        prior_turns: &[PriorTurn],
        message: &str,
    ) -> Result<TextStream, BackendError> {
        let messages = build_messages(prior_turns, message);
        debug!(messages = messages.len(), "Starting streamed completion");

        let request = self.request(messages).with_system(system);
        let stream = self.client.stream_text(request).await?;
        Ok(Box::pin(stream.map(|delta| delta.map_err(BackendError::from))))
    }

    async fn structured_complete(
        &self,
        prompt: &str,
        schema: &ResponseSchema,
    ) -> Result<Value, BackendError> {
        debug!(schema = schema.name(), chars = prompt.chars().count(), "Starting structured completion");

        let request = self.request(vec![Message::user(prompt)]);
        let input = self
            .client
            .complete_structured(request, tool_for(schema))
            .await?;
        unwrap_tool_input(schema, input)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roles(messages: &[Message]) -> Vec<Role> {
        messages.iter().map(|m| m.role).collect()
    }

    #[test]
    fn test_leading_model_turns_are_dropped() {
        let prior = vec![PriorTurn::new(TurnRole::Model, "I am the Mirror.")];
        let messages = build_messages(&prior, "I feel stuck");

        assert_eq!(roles(&messages), vec![Role::User]);
        assert_eq!(messages[0].content[0].as_text(), Some("I feel stuck"));
    }

    #[test]
    fn test_empty_turns_skipped_and_same_roles_merged() {
        let prior = vec![
            PriorTurn::new(TurnRole::Model, "welcome"),
            PriorTurn::new(TurnRole::User, "first"),
            PriorTurn::new(TurnRole::Model, ""),
            PriorTurn::new(TurnRole::User, "second"),
            PriorTurn::new(TurnRole::Model, "reply"),
        ];
        let messages = build_messages(&prior, "third");

        assert_eq!(roles(&messages), vec![Role::User, Role::Assistant, Role::User]);
        assert_eq!(messages[0].content[0].as_text(), Some("first\n\nsecond"));
    }

    #[test]
    fn test_array_schema_is_wrapped_and_unwrapped() {
        let schema = ResponseSchema::array_of("signifiers", "themes", json!({"type": "object"}));
        let tool = tool_for(&schema);

        assert_eq!(tool.input_schema["type"], "object");
        assert_eq!(tool.input_schema["properties"]["items"]["type"], "array");
        assert_eq!(tool.input_schema["required"][0], "items");

        let unwrapped = unwrap_tool_input(&schema, json!({"items": [{"text": "Control"}]})).unwrap();
        assert_eq!(unwrapped[0]["text"], "Control");
        assert!(matches!(
            unwrap_tool_input(&schema, json!({})),
            Err(BackendError::EmptyResponse)
        ));
    }

    #[test]
    fn test_object_schema_passes_through() {
        let schema = ResponseSchema::new("analysis", "five voices", json!({"type": "object"}));
        assert_eq!(tool_for(&schema).input_schema, json!({"type": "object"}));
        let value = unwrap_tool_input(&schema, json!({"symptom": "loop"})).unwrap();
        assert_eq!(value["symptom"], "loop");
    }
}
