//! Reusable prompts using Handlebars for templating. Strict mode
//! makes a missing variable a render error instead of an empty
//! string.

use std::fmt;

use anyhow::{Error, Result};
use chrono::{Local, NaiveDate};
use handlebars::Handlebars;
use serde_json::json;

#[derive(Debug)]
pub enum Prompt {
    SystemInstruction,
}

impl fmt::Display for Prompt {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

// Triple braces so the operator's prompt is rendered verbatim
const SYSTEM_INSTRUCTION_PROMPT: &str = r"{{{system_prompt}}}

Today's date is {{date}}.";

pub fn templates<'a>() -> Handlebars<'a> {
    let mut registry = Handlebars::new();
    registry.set_strict_mode(true);
    registry
        .register_template_string(
            &Prompt::SystemInstruction.to_string(),
            SYSTEM_INSTRUCTION_PROMPT,
        )
        .expect("Failed to register template");
    registry
}

/// Stamps the system prompt with `date` so the assistant can answer
/// date-sensitive questions.
pub fn system_instruction_for(system_prompt: &str, date: NaiveDate) -> Result<String, Error> {
    let rendered = templates().render(
        &Prompt::SystemInstruction.to_string(),
        &json!({
            "system_prompt": system_prompt,
            "date": date.format("%A, %B %-d, %Y").to_string(),
        }),
    )?;
    Ok(rendered)
}

/// Same as `system_instruction_for` using today's local date.
pub fn system_instruction(system_prompt: &str) -> Result<String, Error> {
    system_instruction_for(system_prompt, Local::now().date_naive())
}
