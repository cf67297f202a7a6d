use mockwire::{ExclusionPattern, ExclusionRules};
use proptest::prelude::*;

#[test]
fn configured_patterns_match_per_shape() {
    let rules = ExclusionRules::from_patterns(["/api", "/api/v1/*", "*_info"]);

    assert!(rules.matches("/api"));
    assert!(rules.matches("/api/v1/get/order"));
    assert!(rules.matches("/api/v2/_info"));
    assert!(!rules.matches("/api/v3"));
    assert!(!rules.matches(""));
}

#[test]
fn no_rules_means_nothing_excluded() {
    let rules = ExclusionRules::new();
    assert!(!rules.matches("/api/v3"));
    assert!(!rules.matches("api/v3"));
}

#[test]
fn parse_classifies_the_wildcard_position() {
    assert_eq!(
        ExclusionPattern::parse("/api/v1/*"),
        ExclusionPattern::Prefix("/api/v1/".to_string())
    );
    assert_eq!(
        ExclusionPattern::parse("*_info"),
        ExclusionPattern::Suffix("_info".to_string())
    );
    assert_eq!(
        ExclusionPattern::parse("/api"),
        ExclusionPattern::Exact("/api".to_string())
    );
}

#[test]
fn rule_order_is_preserved() {
    let rules = ExclusionRules::from_patterns(["/a", "/b", "/c"]);
    let rendered: Vec<String> = rules.patterns().iter().map(|p| p.to_string()).collect();
    assert_eq!(rendered, vec!["/a", "/b", "/c"]);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    /// An exact rule matches its own pattern text and nothing with extra
    /// characters on either side.
    #[test]
    fn exact_rules_match_only_themselves(identifier in "[a-z/]{1,20}") {
        let rules = ExclusionRules::from_patterns([identifier.as_str()]);
        prop_assert!(rules.matches(&identifier));
        prop_assert!(!rules.matches(&format!("{}x", identifier)), "matched suffixed identifier");
        prop_assert!(!rules.matches(&format!("x{}", identifier)), "matched prefixed identifier");
    }

    /// A prefix rule matches every extension of its stem.
    #[test]
    fn prefix_rules_match_all_descendants(
        stem in "/[a-z]{1,10}/",
        rest in "[a-z/]{0,20}",
    ) {
        let rules = ExclusionRules::from_patterns([format!("{}*", stem)]);
        prop_assert!(rules.matches(&format!("{}{}", stem, rest)), "prefix rule did not match descendant");
    }

    /// A suffix rule matches every identifier ending with its stem.
    #[test]
    fn suffix_rules_match_all_endings(
        head in "[a-z/]{0,20}",
        stem in "_[a-z]{1,10}",
    ) {
        let rules = ExclusionRules::from_patterns([format!("*{}", stem)]);
        let identifier = format!("{}{}", head, stem);
        prop_assert!(rules.matches(&identifier));
    }

    /// The empty identifier is never excluded, whatever the rules say.
    #[test]
    fn empty_identifier_is_never_excluded(
        patterns in prop::collection::vec("[a-z*/_]{1,12}", 0..8),
    ) {
        let rules = ExclusionRules::from_patterns(patterns);
        prop_assert!(!rules.matches(""));
    }
}
