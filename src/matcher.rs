//! Picks the single rule that governs a window.
//!
//! Rules are filtered by their [`Matcher`](crate::rule::Matcher); among the
//! survivors the highest `priority` wins and ties go to the rule declared
//! first.  Pure functions, no backend access.

use crate::rule::{MatchField, PlacementRule};
use crate::window::WindowInfo;

/// Whether `rule`'s matcher accepts `window`.
pub fn matches(rule: &PlacementRule, window: &WindowInfo) -> bool {
    let m = &rule.matcher;
    m.patterns()
        .all(|(field, pattern)| m.mode.accepts(pattern, field_value(window, field)))
}

fn field_value(window: &WindowInfo, field: MatchField) -> &str {
    match field {
        MatchField::Class => &window.class,
        MatchField::Instance => &window.instance,
        MatchField::Title => &window.title,
    }
}

/// Return the index (declaration order) of the best rule for `window`, or
/// `None` if no rule matches.
pub fn best_match(window: &WindowInfo, rules: &[PlacementRule]) -> Option<usize> {
    rules
        .iter()
        .enumerate()
        .filter(|(_, rule)| matches(rule, window))
        // `max_by_key` keeps the *last* maximum, so compare on the reversed
        // index to let the earliest declaration win a priority tie.
        .max_by_key(|(i, rule)| (rule.priority, std::cmp::Reverse(*i)))
        .map(|(i, _)| i)
}
