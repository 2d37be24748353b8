//! Prompt assembly per entry type.

use murmur_core::{PromptAnswers, PromptKey};

/// Section order of the Daily Strategic Journal skeleton the brain-dump
/// prompt asks for. The note writer recognizes the generated body as one
/// JOURNAL section; this list only shapes the model's output.
pub const JOURNAL_SECTIONS: &[&str] = &[
    "TL;DR",
    "Today in 6 Bullets",
    "What Actually Mattered",
    "Distractions vs Leverage",
    "Decisions",
    "Friction",
    "Emotional State",
    "Money",
    "90-day Extrapolation",
    "Identity Continuation",
    "Three Non-Negotiables",
    "Open Loops",
    "Identity Check",
    "Tags",
];

/// Build the long-form brain-dump prompt. The transcript is interpolated
/// verbatim inside triple-quoted fences so the model never confuses
/// spoken content with instructions.
pub fn brain_dump_prompt(transcript: &str, user_name: &str) -> String {
    let mut sections = String::new();
    for (i, name) in JOURNAL_SECTIONS.iter().enumerate() {
        sections.push_str(&format!("{}. ## {name}\n", i + 1));
    }

    let who = if user_name.trim().is_empty() {
        "the author".to_string()
    } else {
        user_name.trim().to_string()
    };

    format!(
        "You are a precise journaling assistant working for {who}. Below is a raw \
voice transcript of a daily brain dump. Rewrite it as a Daily Strategic Journal \
in Markdown with exactly these sections, in this order, each as a `##` heading:\n\n\
{sections}\n\
Rules:\n\
- Use only information present in the transcript; never invent events.\n\
- Keep the author's first-person voice.\n\
- \"Today in 6 Bullets\" is at most six short bullets.\n\
- \"Tags\" is a single line of lowercase #hashtags.\n\
- If the transcript has nothing for a section, write a single dash.\n\n\
Transcript:\n\"\"\"\n{transcript}\n\"\"\"\n\n\
Return only the Markdown body, starting with the first heading."
    )
}

/// Build the short daily-reflection prompt from whichever prompt answers
/// are non-empty.
pub fn reflection_prompt(answers: &PromptAnswers) -> String {
    let mut parts = String::new();
    for key in PromptKey::all() {
        if let Some(answer) = answers.get(key) {
            let text = answer.effective_text();
            if !text.is_empty() {
                parts.push_str(&format!("{}\n{}\n\n", key.question(), text));
            }
        }
    }

    format!(
        "Below are a person's answers to their evening reflection prompts.\n\n\
{parts}\
Write a warm, grounded reflection of 2-4 sentences in the first person, as if \
the person wrote it themselves. Do not add headings or lists; return only the \
paragraph."
    )
}
