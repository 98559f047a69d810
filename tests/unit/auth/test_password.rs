// Unit tests for password hashing

use jutzo::auth::password::{hash_password, stored_cost, verify_password, PasswordPolicy, DEFAULT_COST, MIN_COST};

// The top of the range needs 128 MiB per hash; the lower costs exercise the same code path
const TESTED_COSTS: std::ops::RangeInclusive<u8> = MIN_COST..=8;

#[test]
fn test_round_trip_across_costs() {
    for cost in TESTED_COSTS {
        let hash = hash_password("correct horse", cost).unwrap();
        assert!(verify_password(&hash, "correct horse"), "cost {}", cost);
        assert!(!verify_password(&hash, "correct horse "), "cost {}", cost);
        assert_eq!(stored_cost(&hash), Some(cost));
    }
}

#[test]
fn test_verify_uses_stored_cost_not_policy_cost() {
    let hash = PasswordPolicy::new(5).unwrap().hash("pw1").unwrap();
    let other = PasswordPolicy::new(MIN_COST).unwrap();
    assert!(other.verify(&hash, "pw1"));
}

#[test]
fn test_mismatch_at_any_position() {
    let hash = hash_password("abcdefgh", MIN_COST).unwrap();
    for wrong in ["Xbcdefgh", "abcdXfgh", "abcdefgX", "abcdefg", "abcdefghi", ""] {
        assert!(!verify_password(&hash, wrong), "{} verified", wrong);
    }
}

#[test]
fn test_hash_is_phc_string() {
    let hash = hash_password("pw1", MIN_COST).unwrap();
    let encoded = String::from_utf8(hash).unwrap();
    assert!(encoded.starts_with("$scrypt$"));
    assert!(!encoded.contains("pw1"));
}

#[test]
fn test_tampered_hash_fails() {
    let mut hash = hash_password("pw1", MIN_COST).unwrap();
    // First character of the digest segment carries six full bits
    let digest_start = hash.iter().rposition(|&b| b == b'$').unwrap() + 1;
    hash[digest_start] = if hash[digest_start] == b'A' { b'B' } else { b'A' };
    assert!(!verify_password(&hash, "pw1"));
}

#[test]
fn test_default_policy_cost() {
    assert_eq!(PasswordPolicy::default().cost(), DEFAULT_COST);
    assert_eq!(DEFAULT_COST, 15);
}
