//! System prompt that teaches a model without native function calling how to
//! request tools.

use crate::error::Result;
use crate::types::{ChatMessage, MessageContent, Role, ToolDefinition, ToolSet};

const TOOL_PROMPT_TEMPLATE: &str = "In this environment you have access to a set of tools you can use to answer the user's question.

{formatting_instructions}

Here are the tools available, described as JSON:

<tools>
{tool_definitions}
</tools>

{user_system_prompt}

{tool_configuration}";

const FORMATTING_INSTRUCTIONS: &str = "You may call a tool by writing a block in exactly this form:

<function_calls>
<invoke>
<tool_name>$TOOL_NAME</tool_name>
<parameters>
<$PARAMETER_NAME>$PARAMETER_VALUE</$PARAMETER_NAME>
...
</parameters>
</invoke>
</function_calls>

Stop writing after a </function_calls> block. The result will be returned to you inside <function_results></function_results> tags. Only call tools listed below, and only pass parameters their schemas define.";

pub const DEFAULT_USER_SYSTEM_PROMPT: &str = "You are a helpful assistant.";

pub const DEFAULT_TOOL_CONFIGURATION: &str =
    "Call a tool only when it is needed to answer; otherwise reply directly.";

/// Fill the tool prompt template. The four placeholders are substituted in one
/// pass, so placeholder-looking text inside the inputs is left untouched.
pub fn generate_tool_prompt(
    tools: &[ToolDefinition],
    system_prompt: Option<&str>,
    tool_configuration: Option<&str>,
) -> Result<String> {
    let tool_definitions = serde_json::to_string_pretty(tools)?;
    let user_system_prompt = system_prompt
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or(DEFAULT_USER_SYSTEM_PROMPT);
    let tool_configuration = tool_configuration
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or(DEFAULT_TOOL_CONFIGURATION);

    Ok(render(
        TOOL_PROMPT_TEMPLATE,
        &[
            ("formatting_instructions", FORMATTING_INSTRUCTIONS),
            ("tool_definitions", &tool_definitions),
            ("user_system_prompt", user_system_prompt),
            ("tool_configuration", tool_configuration),
        ],
    ))
}

fn render(template: &str, vars: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find('{') {
        out.push_str(&rest[..start]);
        let after = &rest[start + 1..];
        let replaced = after.find('}').and_then(|end| {
            let key = &after[..end];
            vars.iter()
                .find(|(k, _)| *k == key)
                .map(|(_, v)| (*v, end))
        });
        match replaced {
            Some((value, end)) => {
                out.push_str(value);
                rest = &after[end + 1..];
            }
            None => {
                out.push('{');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

/// Replace the conversation's system prompt with the generated tool prompt.
/// The first system message's text serves as the user system prompt unless the
/// tool set carries its own.
pub(crate) fn apply_tool_prompt(messages: &mut Vec<ChatMessage>, tools: &ToolSet) -> Result<()> {
    let existing = messages.iter().position(|m| m.role == Role::System);
    let base = tools
        .system_prompt
        .clone()
        .or_else(|| existing.map(|idx| messages[idx].text()));

    let prompt = generate_tool_prompt(
        &tools.definitions,
        base.as_deref(),
        tools.configuration.as_deref(),
    )?;

    match existing {
        Some(idx) => messages[idx].content = MessageContent::Text(prompt),
        None => messages.insert(0, ChatMessage::system(prompt)),
    }
    Ok(())
}
