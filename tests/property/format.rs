//! Property-based tests for batch text formatting.
//!
//! The display text joins codes with commas and a final ampersand. These
//! properties pin the separator discipline and the nonce bookkeeping for
//! any batch the dispatcher can produce. Codes are all digits, so the
//! separators can never collide with code content.

use proptest::prelude::*;
use stagepager::bridge::queue::{Submission, format_batch};
use stagepager::chat::Nonce;

/// Build submissions with sequence-numbered nonces.
fn submissions(codes: &[String]) -> Vec<Submission> {
    codes
        .iter()
        .enumerate()
        .map(|(seq, code)| Submission {
            nonce: Nonce::new(format!("{seq}.000100")),
            code: code.clone(),
        })
        .collect()
}

proptest! {
    /// A single code renders verbatim with no separators.
    #[test]
    fn single_codes_render_verbatim(code in "[0-9]{4}") {
        let (text, nonces) = format_batch(&submissions(&[code.clone()]));
        prop_assert_eq!(text, code);
        prop_assert_eq!(nonces.len(), 1);
    }

    /// Every code appears in the joined text, in submission order.
    #[test]
    fn every_code_appears_in_order(codes in prop::collection::vec("[0-9]{4}", 1..8)) {
        let (text, _) = format_batch(&submissions(&codes));
        let mut from = 0;
        for code in &codes {
            let at = text[from..].find(code.as_str());
            prop_assert!(at.is_some(), "{} missing after byte {} of {:?}", code, from, text);
            from += at.unwrap() + code.len();
        }
    }

    /// Multi-code batches join with commas and exactly one ampersand.
    #[test]
    fn multi_code_batches_use_one_ampersand(codes in prop::collection::vec("[0-9]{4}", 2..8)) {
        let (text, _) = format_batch(&submissions(&codes));
        prop_assert_eq!(text.matches(" & ").count(), 1);
        prop_assert_eq!(text.matches(", ").count(), codes.len() - 2);
        prop_assert!(text.starts_with(codes[0].as_str()));
        prop_assert!(text.ends_with(codes[codes.len() - 1].as_str()));
    }

    /// Nonces come back one per code, in submission order.
    #[test]
    fn nonces_mirror_submission_order(codes in prop::collection::vec("[0-9]{4}", 1..8)) {
        let items = submissions(&codes);
        let (_, nonces) = format_batch(&items);
        let expected: Vec<Nonce> = items.iter().map(|item| item.nonce.clone()).collect();
        prop_assert_eq!(nonces, expected);
    }
}
