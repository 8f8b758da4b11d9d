use super::sanitize::{PLACEHOLDER_TAG, TAG_COUNT, TAG_MAX_CHARS, TIP_COUNT, TITLE_MAX};

pub const NO_DESCRIPTION: &str = "No description provided";

/// Tags the model is told to avoid.
pub const TAG_STOPWORDS: [&str; 4] = ["gift", "etsy", "handmade", "digital"];

const PROMPT_TITLE_MIN: usize = 100;

/// Renders the instruction block sent to the generation service.
pub fn build_prompt(title: &str, description: Option<&str>) -> String {
    let description = description
        .map(str::trim)
        .filter(|d| !d.is_empty())
        .unwrap_or(NO_DESCRIPTION);
    let stopwords = TAG_STOPWORDS
        .iter()
        .map(|w| format!("\"{w}\""))
        .collect::<Vec<_>>()
        .join(", ");

    format!(
        r#"You are an Etsy SEO specialist who optimizes product listings for search visibility and conversion.

Using the product TITLE and optional DESCRIPTION below, produce one JSON object with exactly this shape:

{{
  "optimized_title": "string",
  "character_count": number,
  "tags": ["tag 1", "...", "tag {TAG_COUNT}"],
  "description_improvements": ["tip 1", "...", "tip {TIP_COUNT}"]
}}

optimized_title:
- Between {PROMPT_TITLE_MIN} and {TITLE_MAX} characters, never longer than {TITLE_MAX}.
- Natural English. No keyword stuffing, no repeated words, no all-caps, no emojis.
- Start with the primary keyword phrase shoppers actually search for.
- Add concrete attributes: material, style, audience, occasion or use.
- If the input looks like gibberish or random characters, the value must be exactly "{PLACEHOLDER_TAG}".

tags:
- Exactly {TAG_COUNT} tags, lowercase English.
- Each tag is 1 to 3 whole words and at most {TAG_MAX_CHARS} characters.
- Prefer niche, long-tail phrases describing style, use, material, theme, audience or occasion.
- Do not use generic tags such as {stopwords}.
- If the input looks like gibberish, return ["{PLACEHOLDER_TAG}"].

description_improvements:
- Exactly {TIP_COUNT} specific, actionable tips for improving the product description.
- Give advice only. Never write or rewrite the description itself.
- Cover structure, clarity, tone, SEO and buyer trust without repeating an idea.

Output rules:
- Respond with the raw JSON object only.
- No markdown, no code fences, no text before or after the JSON.
- Include every field.

INPUT:
TITLE: "{title}"
DESCRIPTION: "{description}"
"#
    )
}
