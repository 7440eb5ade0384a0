// Fixture tests shared by both block passes.
// Run with: cargo test --lib text::normalizer

use super::{
    fallback, normalize, normalize_lines, run_pipeline, BlockRenderer, CleaningOptions,
    CodeBlockRule,
};
use std::collections::HashMap;

const GUIDE: &str = "# Guide\n\nDr. Smith wrote **this** tool.\nIt is *fast*.\n\n```\nlet x = 1;\n```\n\n- first item\n- second item\n\nVisit https://www.example.com/docs today.";

const GUIDE_SPOKEN: &str = "Section: Guide.\n\nDoctor Smith wrote this tool. It is fast.\n\nfirst item\n\nsecond item\n\nVisit example.com/docs today.";

const CODE_DOC: &str = "Intro.\n\n```rust\nfn main() { println!(\"hi\"); }\n```\n\nOutro.";

const CODE_SPAN_DOC: &str = "Call `Dr.who()` now.";

const RAW_TABLE: &str = "| a | b |\n|---|---|\n| 1 | 2 |";

const TABLE_DOC: &str = "| Name | Age |\n|------|-----|\n| Alice | 30 |\n| Bob | 25 |\n| Carol | 41 |\n| Dan | 19 |\n";

fn renderers() -> Vec<(&'static str, BlockRenderer)> {
    let mut all: Vec<(&'static str, BlockRenderer)> = vec![("lines", fallback::render_blocks)];
    #[cfg(feature = "markdown")]
    all.push(("markdown", super::markdown::render_blocks));
    all
}

fn with_rule(rule: CodeBlockRule) -> CleaningOptions {
    CleaningOptions {
        code_block_rule: rule,
        ..CleaningOptions::default()
    }
}

// =========================================================================
// Shared fixtures
// =========================================================================

#[test]
fn test_document_fixture_matches_on_both_paths() {
    for (name, render) in renderers() {
        let out = run_pipeline(GUIDE, &CleaningOptions::default(), render);
        assert_eq!(out, GUIDE_SPOKEN, "renderer {}", name);
    }
}

#[test]
fn test_code_block_rules() {
    for (name, render) in renderers() {
        assert_eq!(
            run_pipeline(CODE_DOC, &with_rule(CodeBlockRule::Skip), render),
            "Intro.\n\nOutro.",
            "renderer {}",
            name
        );
        assert_eq!(
            run_pipeline(CODE_DOC, &with_rule(CodeBlockRule::Placeholder), render),
            "Intro.\n\n(Code block.)\n\nOutro.",
            "renderer {}",
            name
        );
        assert_eq!(
            run_pipeline(CODE_DOC, &with_rule(CodeBlockRule::Read), render),
            "Intro.\n\nCode: fn main() { println!(\"hi\"); }\n\nOutro.",
            "renderer {}",
            name
        );
    }
}

#[test]
fn test_inline_code_follows_code_rule() {
    for (name, render) in renderers() {
        assert_eq!(
            run_pipeline(CODE_SPAN_DOC, &with_rule(CodeBlockRule::Skip), render),
            "Call now.",
            "renderer {}",
            name
        );
        assert_eq!(
            run_pipeline(CODE_SPAN_DOC, &with_rule(CodeBlockRule::Placeholder), render),
            "Call now.",
            "renderer {}",
            name
        );
        assert_eq!(
            run_pipeline(CODE_SPAN_DOC, &with_rule(CodeBlockRule::Read), render),
            "Call Dr.who() now.",
            "renderer {}",
            name
        );
    }
}

#[test]
fn test_inline_code_keeps_urls_verbatim() {
    let text = "Dr. Ng said `curl https://www.example.com/` works.";
    for (name, render) in renderers() {
        assert_eq!(
            run_pipeline(text, &with_rule(CodeBlockRule::Read), render),
            "Doctor Ng said curl https://www.example.com/ works.",
            "renderer {}",
            name
        );
    }
}

#[test]
fn test_raw_table_rows_read_as_cells() {
    let options = CleaningOptions {
        handle_tables: false,
        ..CleaningOptions::default()
    };
    for (name, render) in renderers() {
        assert_eq!(run_pipeline(RAW_TABLE, &options, render), "a. b\n\n1. 2", "renderer {}", name);
    }
}

#[test]
fn test_table_becomes_sentences() {
    for (name, render) in renderers() {
        let out = run_pipeline(TABLE_DOC, &CleaningOptions::default(), render);
        assert!(out.contains("4 rows and 2 columns"), "renderer {}", name);
        assert_eq!(out.matches("Row ").count(), 3, "renderer {}", name);
        assert!(out.ends_with("And 1 more row."), "renderer {}", name);
        assert!(!out.contains("Dan"), "renderer {}", name);
    }
}

#[test]
fn test_images_are_announced() {
    for (name, render) in renderers() {
        let out = run_pipeline("Look: ![A red bike](bike.png)", &CleaningOptions::default(), render);
        assert_eq!(out, "Look: (Image: A red bike)", "renderer {}", name);
    }
}

#[test]
fn test_question_heading_keeps_its_mark() {
    for (name, render) in renderers() {
        let out = run_pipeline("## What now?\n\nWe wait.", &CleaningOptions::default(), render);
        assert_eq!(out, "Section: What now?\n\nWe wait.", "renderer {}", name);
    }
}

#[test]
fn test_remove_non_text_strips_symbols() {
    let options = CleaningOptions {
        remove_non_text: true,
        ..CleaningOptions::default()
    };
    for (name, render) in renderers() {
        let out = run_pipeline("Price: $5 & more #deals (today)", &options, render);
        assert_eq!(out, "Price: 5 more deals (today)", "renderer {}", name);
    }
}

#[test]
fn test_options_can_be_switched_off() {
    let options = CleaningOptions {
        speak_urls: false,
        expand_abbreviations: false,
        ..CleaningOptions::default()
    };
    for (name, render) in renderers() {
        let out = run_pipeline("Dr. Who at https://example.com now", &options, render);
        assert_eq!(out, "Dr. Who at https://example.com now", "renderer {}", name);
    }
}

// =========================================================================
// Public entry points
// =========================================================================

#[test]
fn test_empty_input_is_empty() {
    assert_eq!(normalize("", &CleaningOptions::default()), "");
    assert_eq!(normalize(" \n\t", &CleaningOptions::default()), "");
    assert_eq!(normalize_lines("   ", &CleaningOptions::default()), "");
}

#[test]
fn test_abbreviation_example() {
    let out = normalize("Dr. Smith met Mr. Jones.", &CleaningOptions::default());
    assert_eq!(out, "Doctor Smith met Mister Jones.");
}

#[test]
fn test_normalized_text_is_stable() {
    let once = normalize(GUIDE, &CleaningOptions::default());
    let twice = normalize(&once, &CleaningOptions::default());
    assert_eq!(once, twice);

    let plain = "First paragraph here.\n\nSecond one, with a comma.";
    assert_eq!(normalize(plain, &CleaningOptions::default()), plain);
}

#[test]
fn test_options_from_settings() {
    let mut settings = HashMap::new();
    settings.insert("clean_remove_non_text".to_string(), "true".to_string());
    settings.insert("clean_speak_urls".to_string(), "0".to_string());
    settings.insert("clean_handle_tables".to_string(), "garbage".to_string());
    settings.insert("code_block_rule".to_string(), "read".to_string());

    let options = CleaningOptions::from_settings(&settings);
    assert!(options.remove_non_text);
    assert!(!options.speak_urls);
    assert!(options.handle_tables);
    assert!(options.expand_abbreviations);
    assert_eq!(options.code_block_rule, CodeBlockRule::Read);
}
