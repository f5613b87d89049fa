//! Tests for utility functions

use prometheus_planboard::core::model::{is_done_column, Priority};
use prometheus_planboard::util::{after_secs, extract_json_object, now, truncate_chars};

#[test]
fn test_priority_rank_orders_high_first() {
    assert!(Priority::High.rank() < Priority::Medium.rank());
    assert!(Priority::Medium.rank() < Priority::Low.rank());
    assert_eq!(Priority::default(), Priority::Medium);
}

#[test]
fn test_priority_parse_lenient() {
    assert_eq!(Priority::parse_lenient(" HIGH "), Priority::High);
    assert_eq!(Priority::parse_lenient("urgent"), Priority::High);
    assert_eq!(Priority::parse_lenient("low"), Priority::Low);
    assert_eq!(Priority::parse_lenient("whenever"), Priority::Medium);
}

#[test]
fn test_done_column_match() {
    assert!(is_done_column("Done"));
    assert!(is_done_column("  DONE "));
    assert!(!is_done_column("Doing"));
    assert!(!is_done_column("Done-ish"));
}

#[test]
fn test_truncate_chars_counts_characters() {
    assert_eq!(truncate_chars("héllo wörld", 5), "héll…");
    assert_eq!(truncate_chars("abc", 3), "abc");
}

#[test]
fn test_extract_json_object_from_fenced_reply() {
    let text = "Here you go:\n```json\n{\"a\": {\"b\": 1}}\n```\nthanks";
    assert_eq!(extract_json_object(text), Some("{\"a\": {\"b\": 1}}"));
    assert_eq!(extract_json_object("{ unterminated"), None);
    assert_eq!(extract_json_object("no braces"), None);
}

#[test]
fn test_after_secs_is_in_the_future() {
    let start = now();
    let later = after_secs(60);
    let delta = (later - start).num_seconds();
    assert!((59..=61).contains(&delta));
    // Saturates instead of overflowing.
    assert!(after_secs(u64::MAX) > start);
}
