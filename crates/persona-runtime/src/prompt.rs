//! Prompt composition.
//!
//! The persona adapter was trained on Mistral's instruction format, so the
//! short-term conversation and any recalled long-term memories are folded
//! into a single `[INST]` block:
//!
//! ```text
//! <s>[INST] {persona}
//!
//! Relevant past conversations:
//! {long-term memories}
//!
//! {short-term context} [/INST]
//! ```
//!
//! The "Relevant past conversations" section is omitted when nothing was
//! recalled.

/// Default persona line opening every prompt.
pub const DEFAULT_PERSONA: &str = "You are a casual, playful Discord user chatting with friends.";

/// Build the generation prompt from the persona line and both memory
/// contexts (each already newline-joined).
pub fn build_prompt(persona: &str, short_term_context: &str, long_term_context: &str) -> String {
    let mut system = persona.to_string();
    if !long_term_context.is_empty() {
        system.push_str("\n\nRelevant past conversations:\n");
        system.push_str(long_term_context);
    }
    format!("<s>[INST] {system}\n\n{short_term_context} [/INST]")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_without_long_term_context() {
        let prompt = build_prompt(DEFAULT_PERSONA, "A: hi\nB: yo", "");
        assert_eq!(
            prompt,
            format!("<s>[INST] {DEFAULT_PERSONA}\n\nA: hi\nB: yo [/INST]")
        );
        assert!(!prompt.contains("Relevant past conversations"));
    }

    #[test]
    fn prompt_includes_recalled_memories_before_conversation() {
        let prompt = build_prompt("persona", "A: pizza?", "A: likes pineapple\nB: gross");
        assert_eq!(
            prompt,
            "<s>[INST] persona\n\nRelevant past conversations:\nA: likes pineapple\nB: gross\n\nA: pizza? [/INST]"
        );
    }
}
