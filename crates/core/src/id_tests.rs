// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

crate::define_id! {
    /// Test-only id type.
    pub struct TestId;
}

#[test]
fn short_truncates_long_ids() {
    let id = TestId::new("abcdef123456");
    assert_eq!(id.short(6), "abcdef");
}

#[test]
fn short_returns_whole_id_when_shorter() {
    let id = TestId::new("abc");
    assert_eq!(id.short(8), "abc");
}

#[test]
fn display_matches_inner_string() {
    let id = TestId::new("worker-qa-12ab34cd");
    assert_eq!(id.to_string(), "worker-qa-12ab34cd");
    assert_eq!(id.as_str(), "worker-qa-12ab34cd");
}

#[test]
fn eq_against_str() {
    let id = TestId::new("t-1");
    assert_eq!(id, *"t-1");
    assert_eq!(id, "t-1");
}

#[test]
fn random_suffix_is_lowercase_hex_of_requested_length() {
    let s = random_suffix(8);
    assert_eq!(s.len(), 8);
    assert!(s.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
}

#[test]
fn random_suffixes_differ() {
    assert_ne!(random_suffix(12), random_suffix(12));
}
