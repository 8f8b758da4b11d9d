//! Shape repair for model output and the network-free fallback result.

use crate::models::ListingResult;
use serde_json::{Map, Value};

pub const TITLE_MIN: usize = 90;
pub const TITLE_MAX: usize = 140;
pub const TITLE_SUFFIX: &str = " | Premium Handcrafted Quality & Fast Shipping";
pub const MISSING_TITLE: &str = "N/A";

pub const TAG_COUNT: usize = 13;
pub const TAG_MAX_CHARS: usize = 20;
pub const TIP_COUNT: usize = 5;
pub const PLACEHOLDER_TAG: &str = "enter the correct name of the product";
pub const PAD_TAG: &str = "custom-tag";

const FORBIDDEN_TAG_SYMBOLS: &[char] = &[
    '%', '$', '#', '@', '^', '&', '*', '(', ')', '+', '=', '/', '\\', '?', '<', '>',
];

const DEFAULT_TIPS: [&str; TIP_COUNT] = [
    "Add a clear and engaging opening line",
    "Include product materials and dimensions",
    "Highlight craftsmanship and benefits",
    "Mention customization and shipping details",
    "Use natural SEO phrases without overstuffing",
];

const FALLBACK_TAGS: [&str; TAG_COUNT] = [
    "handmade",
    "custom",
    "personalized",
    "gift",
    "unique",
    "premium quality",
    "handcrafted",
    "artisan",
    "special gift",
    "exclusive",
    "limited edition",
    "etsy favorite",
    "perfect present",
];

const FALLBACK_TIPS: [&str; TIP_COUNT] = [
    "Write a compelling opening that highlights the unique value proposition",
    "Include all product specifications with exact measurements and materials",
    "Describe the craftsmanship process and quality standards in detail",
    "Mention customization options and personalization delivery timeline",
    "Add shipping information, care instructions and satisfaction guarantee",
];

pub fn char_len(s: &str) -> usize {
    s.chars().count()
}

fn truncate_chars(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

/// Repairs a parsed model object into a [`ListingResult`].
pub fn sanitize(raw: &Map<String, Value>) -> ListingResult {
    let (optimized_title, character_count) = repair_title(raw.get("optimized_title"));
    ListingResult {
        optimized_title,
        character_count,
        tags: repair_tags(raw.get("tags")),
        description_improvements: repair_tips(raw.get("description_improvements")),
        used_fallback: false,
    }
}

fn repair_title(value: Option<&Value>) -> (String, usize) {
    let Some(title) = value.and_then(Value::as_str).filter(|t| !t.is_empty()) else {
        return (MISSING_TITLE.to_string(), 0);
    };
    let mut title = title.to_string();
    if char_len(&title) < TITLE_MIN {
        title.push_str(TITLE_SUFFIX);
    }
    if char_len(&title) > TITLE_MAX {
        title = truncate_chars(&title, TITLE_MAX);
    }
    let count = char_len(&title);
    (title, count)
}

fn repair_tags(value: Option<&Value>) -> Vec<String> {
    let entries = value.and_then(Value::as_array).map(Vec::as_slice).unwrap_or(&[]);
    let mut tags: Vec<String> = entries
        .iter()
        .filter_map(|entry| match entry {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
        .map(|tag| tag.trim().to_string())
        .filter(|tag| !tag.is_empty())
        .map(|tag| {
            if char_len(&tag) > TAG_MAX_CHARS {
                tag.split_whitespace().next().unwrap_or_default().to_string()
            } else {
                tag
            }
        })
        .take(TAG_COUNT)
        .collect();

    if tags.is_empty() || tags.iter().any(|tag| is_nonsense_tag(tag)) {
        tags = vec![PLACEHOLDER_TAG.to_string()];
    }
    // The placeholder list is padded too.
    while tags.len() < TAG_COUNT {
        tags.push(PAD_TAG.to_string());
    }
    tags
}

/// A tag containing a digit or a symbol marks the whole answer as nonsense.
pub fn is_nonsense_tag(tag: &str) -> bool {
    tag.chars()
        .any(|c| c.is_ascii_digit() || FORBIDDEN_TAG_SYMBOLS.contains(&c))
}

/// Keeps the first non-blank string tips and tops the list up to
/// `TIP_COUNT` from the defaults.
fn repair_tips(value: Option<&Value>) -> Vec<String> {
    let mut tips: Vec<String> = value
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::trim)
                .filter(|tip| !tip.is_empty())
                .take(TIP_COUNT)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();
    for default in DEFAULT_TIPS {
        if tips.len() == TIP_COUNT {
            break;
        }
        if !tips.iter().any(|tip| tip == default) {
            tips.push(default.to_string());
        }
    }
    tips
}

/// Deterministic result built from the caller's title alone.
pub fn fallback(title: &str) -> ListingResult {
    let len = char_len(title);
    let optimized_title = if len > TITLE_MAX {
        truncate_chars(title, TITLE_MAX)
    } else if len < TITLE_MIN {
        format!("{title}{TITLE_SUFFIX}")
    } else {
        title.to_string()
    };
    ListingResult {
        optimized_title,
        // Clamp of the input length, not the length of the returned title.
        character_count: len.clamp(TITLE_MIN, TITLE_MAX),
        tags: FALLBACK_TAGS.iter().map(|tag| tag.to_string()).collect(),
        description_improvements: FALLBACK_TIPS.iter().map(|tip| tip.to_string()).collect(),
        used_fallback: true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn run(value: Value) -> ListingResult {
        sanitize(value.as_object().expect("object"))
    }

    fn title_of(len: usize) -> String {
        "a".repeat(len)
    }

    #[test]
    fn short_title_gets_suffix() {
        let out = run(json!({ "optimized_title": "Handmade Silver Ring" }));
        assert_eq!(
            out.optimized_title,
            "Handmade Silver Ring | Premium Handcrafted Quality & Fast Shipping"
        );
        assert_eq!(out.character_count, char_len(&out.optimized_title));
        assert!(!out.used_fallback);
    }

    #[test]
    fn long_title_is_cut_to_max() {
        let out = run(json!({ "optimized_title": title_of(180) }));
        assert_eq!(out.character_count, TITLE_MAX);
        assert_eq!(char_len(&out.optimized_title), TITLE_MAX);
    }

    #[test]
    fn suffixed_title_stays_within_max() {
        let out = run(json!({ "optimized_title": title_of(89) }));
        assert_eq!(out.character_count, 89 + char_len(TITLE_SUFFIX));
        assert!(out.character_count <= TITLE_MAX);
    }

    #[test]
    fn in_range_title_untouched() {
        for len in [TITLE_MIN, 120, TITLE_MAX] {
            let title = title_of(len);
            let out = run(json!({ "optimized_title": title }));
            assert_eq!(out.optimized_title, title);
            assert_eq!(out.character_count, len);
        }
    }

    #[test]
    fn counts_characters_not_bytes() {
        let title = "é".repeat(100);
        let out = run(json!({ "optimized_title": title }));
        assert_eq!(out.character_count, 100);
        assert_eq!(out.optimized_title, title);
    }

    #[test]
    fn missing_title_defaults() {
        for raw in [json!({}), json!({ "optimized_title": "" }), json!({ "optimized_title": 42 })] {
            let out = run(raw);
            assert_eq!(out.optimized_title, MISSING_TITLE);
            assert_eq!(out.character_count, 0);
        }
    }

    #[test]
    fn twelve_tags_padded_to_thirteen() {
        let tags: Vec<String> = (0..12).map(|i| format!("tag {}", "x".repeat(i % 3 + 1))).collect();
        let out = run(json!({ "tags": tags }));
        assert_eq!(out.tags.len(), TAG_COUNT);
        assert_eq!(out.tags[..12], tags[..]);
        assert_eq!(out.tags[12], PAD_TAG);
    }

    #[test]
    fn extra_tags_are_dropped() {
        let words: Vec<String> = (0..20).map(|i| "z".repeat(i % 10 + 1)).collect();
        let out = run(json!({ "tags": words }));
        assert_eq!(out.tags.len(), TAG_COUNT);
        assert_eq!(out.tags[..], words[..TAG_COUNT]);
    }

    #[test]
    fn long_tag_keeps_first_word() {
        let out = run(json!({ "tags": ["  sterling silver moon necklace  ", "ring"] }));
        assert_eq!(out.tags[0], "sterling");
        assert_eq!(out.tags[1], "ring");
    }

    #[test]
    fn blank_and_non_string_tags_are_skipped() {
        let out = run(json!({ "tags": ["", "   ", null, {"a": 1}, "boho decor"] }));
        assert_eq!(out.tags[0], "boho decor");
        assert_eq!(out.tags[1..], vec![PAD_TAG.to_string(); 12][..]);
    }

    #[test]
    fn nonsense_tags_become_placeholder() {
        for tags in [
            json!(["good tag", "size 10"]),
            json!(["50% off"]),
            json!(["a/b"]),
            json!([7]),
            json!([]),
            json!("not a list"),
        ] {
            let out = run(json!({ "tags": tags }));
            assert_eq!(out.tags.len(), TAG_COUNT);
            assert_eq!(out.tags[0], PLACEHOLDER_TAG);
            assert!(out.tags[1..].iter().all(|t| t == PAD_TAG));
        }
    }

    #[test]
    fn nonsense_detection() {
        assert!(is_nonsense_tag("suhev68"));
        assert!(is_nonsense_tag("a\\b"));
        assert!(is_nonsense_tag("<tag>"));
        assert!(!is_nonsense_tag("boho wall art"));
        assert!(!is_nonsense_tag("mother's day"));
    }

    #[test]
    fn tips_default_when_not_a_list() {
        let out = run(json!({ "description_improvements": "write better" }));
        assert_eq!(out.description_improvements.len(), TIP_COUNT);
        assert_eq!(out.description_improvements[0], DEFAULT_TIPS[0]);

        let out = run(json!({ "description_improvements": ["one", "two"] }));
        assert_eq!(out.description_improvements.len(), TIP_COUNT);
        assert_eq!(out.description_improvements[..2], ["one", "two"]);
        assert_eq!(out.description_improvements[2], DEFAULT_TIPS[0]);
    }

    #[test]
    fn tips_are_always_five() {
        let out = run(json!({ "description_improvements": [] }));
        assert_eq!(out.description_improvements, DEFAULT_TIPS.to_vec());

        let out = run(json!({ "description_improvements": [1, 2, "x", "  "] }));
        assert_eq!(out.description_improvements.len(), TIP_COUNT);
        assert_eq!(out.description_improvements[0], "x");

        let seven: Vec<String> = (1..=7).map(|n| format!("tip {n}")).collect();
        let out = run(json!({ "description_improvements": seven }));
        assert_eq!(out.description_improvements, seven[..TIP_COUNT].to_vec());

        let out = run(json!({ "description_improvements": [DEFAULT_TIPS[0]] }));
        assert_eq!(out.description_improvements, DEFAULT_TIPS.to_vec());
    }

    #[test]
    fn sanitized_shape_holds_for_assorted_inputs() {
        let many_tags = vec!["ok"; 40];
        let inputs = [
            json!({}),
            json!({ "optimized_title": "x", "tags": ["a"] }),
            json!({ "optimized_title": title_of(300), "tags": many_tags }),
            json!({ "optimized_title": title_of(95), "tags": ["#1 seller"] }),
        ];
        for raw in inputs {
            let out = run(raw);
            assert_eq!(out.tags.len(), TAG_COUNT);
            assert_eq!(out.description_improvements.len(), TIP_COUNT);
            assert!(out.character_count <= TITLE_MAX);
            if out.optimized_title != MISSING_TITLE {
                assert_eq!(out.character_count, char_len(&out.optimized_title));
            }
        }
    }

    #[test]
    fn fallback_for_short_title() {
        let out = fallback("Handmade Silver Ring");
        assert!(out.optimized_title.ends_with(TITLE_SUFFIX));
        assert_eq!(out.character_count, TITLE_MIN);
        assert_eq!(out.tags, FALLBACK_TAGS.map(String::from).to_vec());
        assert_eq!(out.description_improvements.len(), TIP_COUNT);
        assert!(out.used_fallback);
    }

    #[test]
    fn fallback_count_is_clamped_input_length() {
        let long = fallback(&title_of(200));
        assert_eq!(char_len(&long.optimized_title), TITLE_MAX);
        assert_eq!(long.character_count, TITLE_MAX);

        let mid = fallback(&title_of(100));
        assert_eq!(mid.optimized_title, title_of(100));
        assert_eq!(mid.character_count, 100);

        // Suffixed title is 66 characters but the count reports the clamp.
        let short = fallback("Handmade Silver Ring");
        assert_eq!(char_len(&short.optimized_title), 20 + char_len(TITLE_SUFFIX));
        assert_eq!(short.character_count, TITLE_MIN);
    }
}
