// Copyright (c) 2025 - Cowboy AI, LLC.

//! Property tests for DN escaping and normalization.

use icao_pkd::ldap::dn::{escape_dn_value, unescape_dn_value};
use icao_pkd::x509::dn;
use proptest::prelude::*;

proptest! {
    #[test]
    fn escape_then_unescape_is_identity(value in "[ -~]{0,40}") {
        prop_assert_eq!(unescape_dn_value(&escape_dn_value(&value)), value);
    }

    #[test]
    fn escaped_value_never_leaks_unescaped_separators(value in "[ -~]{0,40}") {
        let escaped = escape_dn_value(&value);
        let mut chars = escaped.chars().peekable();
        while let Some(c) = chars.next() {
            if c == '\\' {
                chars.next();
                continue;
            }
            prop_assert!(!matches!(c, ',' | '+' | '"' | '<' | '>' | ';' | '='));
        }
    }

    #[test]
    fn normalization_is_case_insensitive(cn in "[A-Za-z0-9 ]{1,20}", c in "[A-Z]{2}") {
        let upper = format!("CN={cn},C={c}");
        let lower = upper.to_lowercase();
        prop_assert!(dn::equals(&upper, &lower));
    }

    #[test]
    fn normalization_is_order_independent(cn in "[A-Za-z0-9]{1,20}", o in "[A-Za-z0-9]{1,20}") {
        let a = format!("CN={cn},O={o},C=KR");
        let b = format!("C=KR,O={o},CN={cn}");
        prop_assert!(dn::equals(&a, &b));
    }

    #[test]
    fn slash_and_comma_renderings_agree(cn in "[A-Za-z0-9]{1,20}") {
        let comma = format!("CN={cn},C=KR");
        let slash = format!("/C=KR/CN={cn}");
        prop_assert!(dn::equals(&comma, &slash));
    }
}
