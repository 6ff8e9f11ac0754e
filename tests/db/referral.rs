//! Referral code generation and purchase-time resolution tests
//!
//! Resolution is deliberately soft: malformed or unknown codes resolve to
//! None so a stale code never blocks a paying customer. Attribution walks
//! exactly one parent hop, never the whole referral tree.

#[path = "../common/mod.rs"]
mod common;

use common::*;
use kickback::referral::{generate_referral_code, normalize_referral_code, resolve};

// ============ Code Generation Tests ============

#[test]
fn test_generate_code_uses_name_prefix() {
    let conn = setup_test_db();

    let code = generate_referral_code(&conn, Some("Ana Silva")).expect("generation should succeed");

    assert!(
        code.starts_with("ANASILVA-"),
        "code should start with the uppercased alphanumeric name prefix, got {}",
        code
    );
    assert_eq!(
        normalize_referral_code(&code),
        Some(code.clone()),
        "generated code should already be in canonical form"
    );
}

#[test]
fn test_generate_code_truncates_long_names() {
    let conn = setup_test_db();

    let code = generate_referral_code(&conn, Some("Maximiliano Fernandez"))
        .expect("generation should succeed");

    assert!(
        code.starts_with("MAXIMILI-"),
        "prefix should be capped at 8 characters, got {}",
        code
    );
    assert!(
        code.len() <= 20,
        "generated code must fit the referral code length limit, got {} ({})",
        code.len(),
        code
    );
}

#[test]
fn test_generate_code_falls_back_for_short_names() {
    let conn = setup_test_db();

    // Too few usable characters after filtering
    let short = generate_referral_code(&conn, Some("Jo")).expect("generation should succeed");
    assert!(
        short.starts_with("INSTR-"),
        "short name should fall back to the generic prefix, got {}",
        short
    );

    // Entirely non-ASCII name filters down to nothing
    let non_ascii = generate_referral_code(&conn, Some("李明")).expect("generation should succeed");
    assert!(
        non_ascii.starts_with("INSTR-"),
        "non-ASCII name should fall back to the generic prefix, got {}",
        non_ascii
    );

    let missing = generate_referral_code(&conn, None).expect("generation should succeed");
    assert!(
        missing.starts_with("INSTR-"),
        "missing name should fall back to the generic prefix, got {}",
        missing
    );
}

// ============ Resolution Tests ============

#[test]
fn test_resolve_known_code_without_parent() {
    let conn = setup_test_db();
    let instructor = create_test_instructor(&conn, "ana@example.com", "YOGA-ANA", None);

    let resolved = resolve(&conn, "YOGA-ANA")
        .expect("resolution should not error")
        .expect("known code should resolve");

    assert_eq!(resolved.instructor.id, instructor.id);
    assert!(
        resolved.parent.is_none(),
        "instructor without a recruiter should have no parent"
    );
}

#[test]
fn test_resolve_is_case_insensitive() {
    let conn = setup_test_db();
    let instructor = create_test_instructor(&conn, "ana@example.com", "YOGA-ANA", None);

    let resolved = resolve(&conn, "  yoga-ana  ")
        .expect("resolution should not error")
        .expect("lowercased, padded input should still resolve");

    assert_eq!(resolved.instructor.id, instructor.id);
}

#[test]
fn test_resolve_walks_single_hop_to_parent() {
    let conn = setup_test_db();
    let parent = create_test_instructor(&conn, "parent@example.com", "PARENT-CODE", None);
    let child = create_test_instructor(&conn, "child@example.com", "CHILD-CODE", Some(&parent.id));

    let resolved = resolve(&conn, "CHILD-CODE")
        .expect("resolution should not error")
        .expect("child code should resolve");

    assert_eq!(resolved.instructor.id, child.id);
    assert_eq!(
        resolved.parent.as_ref().map(|p| p.id.as_str()),
        Some(parent.id.as_str()),
        "parent should be the instructor who recruited the seller"
    );
}

#[test]
fn test_resolve_never_reaches_grandparent() {
    let conn = setup_test_db();
    let grandparent = create_test_instructor(&conn, "gp@example.com", "GRANDPARENT", None);
    let parent =
        create_test_instructor(&conn, "parent@example.com", "PARENT-CODE", Some(&grandparent.id));
    let child = create_test_instructor(&conn, "child@example.com", "CHILD-CODE", Some(&parent.id));

    let resolved = resolve(&conn, "CHILD-CODE")
        .expect("resolution should not error")
        .expect("child code should resolve");

    assert_eq!(resolved.instructor.id, child.id);
    assert_eq!(
        resolved.parent.as_ref().map(|p| p.id.as_str()),
        Some(parent.id.as_str()),
        "attribution stops at the direct parent; the grandparent earns nothing"
    );
}

#[test]
fn test_resolve_unknown_code_returns_none() {
    let conn = setup_test_db();
    create_test_instructor(&conn, "ana@example.com", "YOGA-ANA", None);

    let resolved = resolve(&conn, "NO-SUCH-CODE").expect("resolution should not error");
    assert!(resolved.is_none(), "unknown code should resolve to None");
}

#[test]
fn test_resolve_malformed_code_returns_none() {
    let conn = setup_test_db();

    for raw in ["", "ab", "has space", "bang!", &"x".repeat(21)] {
        let resolved = resolve(&conn, raw).expect("resolution should not error");
        assert!(
            resolved.is_none(),
            "malformed code {:?} should resolve to None, not error",
            raw
        );
    }
}

#[test]
fn test_resolve_ignores_instructor_status() {
    // Attribution is independent of the subscription lifecycle: a canceled
    // instructor's code still resolves and their ledger keeps accruing.
    let conn = setup_test_db();
    let instructor = create_test_instructor(&conn, "ana@example.com", "YOGA-ANA", None);

    let inactive = resolve(&conn, "YOGA-ANA").expect("resolution should not error");
    assert!(
        inactive.is_some(),
        "inactive instructor's code should resolve"
    );

    queries::set_instructor_status(&conn, &instructor.id, InstructorStatus::Canceled)
        .expect("status update should succeed");

    let canceled = resolve(&conn, "YOGA-ANA").expect("resolution should not error");
    assert!(
        canceled.is_some(),
        "canceled instructor's code should still resolve"
    );
}
