//! Referral code handling: normalization, generation, and purchase-time
//! resolution of a code to its instructor and single parent.

use rusqlite::Connection;
use uuid::Uuid;

use crate::db::queries;
use crate::error::Result;
use crate::models::Instructor;

pub const MIN_CODE_LEN: usize = 3;
pub const MAX_CODE_LEN: usize = 20;

/// Normalize a referral code to its canonical stored form: trimmed and
/// uppercased. Returns None when the result is not a valid code
/// (3-20 alphanumeric, dash or underscore characters).
pub fn normalize_referral_code(raw: &str) -> Option<String> {
    let code = raw.trim().to_uppercase();
    if code.len() < MIN_CODE_LEN || code.len() > MAX_CODE_LEN {
        return None;
    }
    if !code
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return None;
    }
    Some(code)
}

/// Generate an unused referral code: an alphanumeric prefix taken from the
/// instructor's name plus a short random suffix, retried on collision.
pub fn generate_referral_code(conn: &Connection, name: Option<&str>) -> Result<String> {
    let mut prefix: String = name
        .unwrap_or("")
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .take(8)
        .collect::<String>()
        .to_uppercase();
    if prefix.len() < MIN_CODE_LEN {
        prefix = "INSTR".to_string();
    }

    for _ in 0..4 {
        let suffix = Uuid::new_v4().simple().to_string()[..6].to_uppercase();
        let code = format!("{}-{}", prefix, suffix);
        if queries::get_instructor_by_referral_code(conn, &code)?.is_none() {
            return Ok(code);
        }
    }

    // Practically unreachable: four 24-bit suffixes cannot keep colliding.
    // The unique constraint on referral_code remains the final guard.
    Ok(format!(
        "IN-{}",
        Uuid::new_v4().simple().to_string()[..16].to_uppercase()
    ))
}

/// A resolved referral attribution: the selling instructor and, when that
/// instructor was itself referred, its single parent.
#[derive(Debug)]
pub struct ResolvedReferral {
    pub instructor: Instructor,
    pub parent: Option<Instructor>,
}

/// Resolve a referral code at purchase time.
///
/// Malformed and unknown codes resolve to None rather than an error; a stale
/// code must never block a paying customer. The parent lookup is a single
/// hop by `parent_instructor_id`, never a tree walk, so an instructor two
/// levels up earns nothing from this sale.
pub fn resolve(conn: &Connection, raw_code: &str) -> Result<Option<ResolvedReferral>> {
    let Some(code) = normalize_referral_code(raw_code) else {
        return Ok(None);
    };
    let Some(instructor) = queries::get_instructor_by_referral_code(conn, &code)? else {
        return Ok(None);
    };
    let parent = match &instructor.parent_instructor_id {
        Some(parent_id) => queries::get_instructor_by_id(conn, parent_id)?,
        None => None,
    };
    Ok(Some(ResolvedReferral { instructor, parent }))
}
