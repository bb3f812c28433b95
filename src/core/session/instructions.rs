//! Agent instruction assembly.
//!
//! One parameterized builder turns the configured scripts and prompts into
//! the system instructions sent at negotiation, and into the injected turns
//! for the opening line, the idle check-in, and the closing line. Tested
//! independently of any socket plumbing.

use crate::config::ScriptConfig;

/// Placeholder in the opening template replaced with the callee identity.
const NAME_PLACEHOLDER: &str = "{name}";

/// Neutral filler used when no callee identity was supplied.
const NEUTRAL_FILLER: &str = "there";

/// Assemble the system instructions from the configured scripts.
pub fn build_instructions(scripts: &ScriptConfig, callee: Option<&str>) -> String {
    let mut sections: Vec<String> = Vec::new();

    if let Some(general) = &scripts.general_prompt {
        sections.push(general.clone());
    }
    if let Some(business) = &scripts.business_prompt {
        sections.push(business.clone());
    }
    if !scripts.languages.is_empty() {
        sections.push(format!(
            "Only speak the following languages: {}.",
            scripts.languages.join(", ")
        ));
    }
    sections.push(format!(
        "Your first line on the call must be: \"{}\"",
        fill_name(&scripts.opening_script, callee)
    ));
    if let Some(closing) = &scripts.closing_script {
        sections.push(format!(
            "When the call is ending, say goodbye with: \"{closing}\""
        ));
    }

    sections.join("\n\n")
}

/// The opening utterance injected as the first turn, asking the service to
/// speak it.
pub fn opening_turn(scripts: &ScriptConfig, callee: Option<&str>) -> String {
    format!(
        "Greet the caller now with exactly this line: \"{}\"",
        fill_name(&scripts.opening_script, callee)
    )
}

/// The check-in turn injected when the caller has been quiet.
pub fn check_in_turn() -> String {
    "The caller has been quiet for a while. Gently check in and ask if they are still there."
        .to_string()
}

/// The wrap-up turn injected when the call is approaching its ceiling.
pub fn wrap_up_turn() -> String {
    "The call is running long. Start wrapping up the conversation politely.".to_string()
}

/// The closing turn injected before hangup.
pub fn closing_turn(closing_script: &str) -> String {
    format!("End the call now by saying exactly: \"{closing_script}\"")
}

/// Replace the name placeholder with the callee identity, or a neutral
/// filler when none was supplied. The placeholder is never left literal.
fn fill_name(template: &str, callee: Option<&str>) -> String {
    let name = match callee {
        Some(name) if !name.trim().is_empty() => name.trim(),
        _ => NEUTRAL_FILLER,
    };
    template.replace(NAME_PLACEHOLDER, name)
}
