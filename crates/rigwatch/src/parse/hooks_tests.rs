// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::hooks::*;

#[test]
fn parses_hooked_bead_with_trailing_colon_stripped() {
    let output = "Hook Status: active\nRole: witness\nHooked: gt-abc: Fix the parser\nMolecule: m1";
    let hook = parse_hook_output(output, "rig1", "witness").expect("hook present");
    assert_eq!(hook.bead.as_deref(), Some("gt-abc"));
    assert_eq!(hook.title.as_deref(), Some("Fix the parser"));
    assert_eq!(hook.molecule.as_deref(), Some("m1"));
}

#[test]
fn detects_autonomous_mode() {
    let output = "Hook Status: active\nAUTONOMOUS MODE enabled";
    let hook = parse_hook_output(output, "rig1", "crew1").expect("hook present");
    assert!(hook.autonomous_mode);
}

#[test]
fn empty_output_is_no_hook() {
    assert!(parse_hook_output("", "rig1", "a").is_none());
    assert!(parse_hook_output("   \n  ", "rig1", "a").is_none());
}

#[test]
fn unrelated_text_is_no_hook() {
    assert!(parse_hook_output("some unrelated banner text", "rig1", "a").is_none());
}

#[test]
fn parses_json_hook_and_strips_trailing_colon() {
    let output = r#"{"bead":"b1:","title":"fix it","autonomousMode":true}"#;
    let hook = parse_hook_output(output, "rig1", "a").expect("hook present");
    assert_eq!(hook.bead.as_deref(), Some("b1"));
    assert!(hook.autonomous_mode);
}
