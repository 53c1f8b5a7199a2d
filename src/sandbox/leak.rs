//! Static leak-idiom scan
//!
//! Advisory only: a textual pass over the patched source looking for
//! registrations with no matching teardown and containers that grow inside
//! an unbounded loop without ever being cleared. It will miss leaks and can
//! flag code that is fine; the result feeds the safety score, nothing more.

use regex::Regex;

struct LeakRule {
    name: &'static str,
    trigger: Regex,
    teardown: Regex,
}

pub struct LeakScanner {
    rules: Vec<LeakRule>,
}

impl LeakScanner {
    pub fn new() -> Result<Self, regex::Error> {
        let rule = |name, trigger: &str, teardown: &str| -> Result<LeakRule, regex::Error> {
            Ok(LeakRule {
                name,
                trigger: Regex::new(trigger)?,
                teardown: Regex::new(teardown)?,
            })
        };
        Ok(Self {
            rules: vec![
                rule(
                    "interval_without_clear",
                    r"\bsetInterval\s*\(",
                    r"\bclearInterval\s*\(",
                )?,
                rule(
                    "listener_without_removal",
                    r"\b(addEventListener|addListener)\s*\(|\.on\s*\(",
                    r"\b(removeEventListener|removeListener|removeAllListeners)\s*\(|\.off\s*\(",
                )?,
                rule(
                    "unbounded_growth",
                    r"(?s)(while\s*\(\s*true\s*\)|while\s+(true\b|:)|for\s*\(\s*;\s*;\s*\)|\bloop\s*\{).*?(\.push\s*\(|\.push_back\s*\(|\.append\s*\(|\.insert\s*\()",
                    r"\.clear\s*\(|\.splice\s*\(|\.shift\s*\(|\.pop\s*\(|\.truncate\s*\(|\.length\s*=\s*0",
                )?,
            ],
        })
    }

    /// Names of the idioms found in `source`, in rule order.
    pub fn scan(&self, source: &str) -> Vec<String> {
        self.rules
            .iter()
            .filter(|r| r.trigger.is_match(source) && !r.teardown.is_match(source))
            .map(|r| r.name.to_string())
            .collect()
    }
}
