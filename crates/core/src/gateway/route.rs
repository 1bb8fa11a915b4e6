//! Route matcher (SPEC_FULL §4.C): longest-prefix match over a declaration-
//! ordered route table, followed by ordered regex rewrite rules.
//!
//! No equivalent exists elsewhere in this codebase — routing there resolves
//! by model name, not URL path prefix. Grounded in the reference pack's
//! reverse-proxy route tables: prefix-keyed route lists with ordered regex
//! rewrite rules, matched with a plain linear scan rather than a trie, since
//! route counts in this domain are small (tens, not thousands).

use prism_types::Route;
use regex::Regex;

/// A route table ready to match against, sorted once at load time by
/// descending prefix length (ties kept in declaration order, since a stable
/// sort preserves the input order of equal-length prefixes).
#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    routes: Vec<Route>,
}

#[derive(Debug, Clone)]
pub struct Matched<'a> {
    pub route: &'a Route,
    pub rewritten_path: String,
}

impl RouteTable {
    pub fn new(mut routes: Vec<Route>) -> Self {
        routes.sort_by_key(|r| std::cmp::Reverse(r.path.len()));
        Self { routes }
    }

    pub fn routes(&self) -> &[Route] {
        &self.routes
    }

    /// Find the route whose `path` is the longest prefix of `request_path`,
    /// then apply its rewrite rules in declaration order.
    pub fn match_path(&self, request_path: &str) -> Option<Matched<'_>> {
        let route = self
            .routes
            .iter()
            .find(|r| request_path.starts_with(r.path.as_str()))?;

        let mut rewritten = request_path.to_string();
        for rule in &route.rewrites {
            let Ok(re) = Regex::new(&rule.pattern) else {
                continue;
            };
            if let Some(m) = re.find(&rewritten) {
                let mut next = String::with_capacity(rewritten.len());
                next.push_str(&rewritten[..m.start()]);
                next.push_str(&re.replace(m.as_str(), rule.replacement.as_str()));
                next.push_str(&rewritten[m.end()..]);
                if next != rewritten {
                    rewritten = next;
                    break;
                }
            }
        }

        Some(Matched {
            route,
            rewritten_path: rewritten,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prism_types::RewriteRule;

    fn route(path: &str) -> Route {
        Route {
            path: path.to_string(),
            ..Route::default()
        }
    }

    #[test]
    fn longest_prefix_wins() {
        let table = RouteTable::new(vec![route("/v1"), route("/v1/chat")]);
        let m = table.match_path("/v1/chat/completions").unwrap();
        assert_eq!(m.route.path, "/v1/chat");
    }

    #[test]
    fn ties_keep_declaration_order() {
        let mut a = route("/v1/chat");
        a.rewrites = vec![];
        let mut b = route("/v1/chat");
        b.rewrites = vec![RewriteRule {
            pattern: "never-matches".into(),
            replacement: "x".into(),
        }];
        let table = RouteTable::new(vec![a, b]);
        // Both candidates are the same length, so declaration order (a
        // first) must be preserved by the stable sort.
        let m = table.match_path("/v1/chat/completions").unwrap();
        assert!(m.route.rewrites.is_empty());
    }

    #[test]
    fn no_match_returns_none() {
        let table = RouteTable::new(vec![route("/v1")]);
        assert!(table.match_path("/v2/foo").is_none());
    }

    #[test]
    fn rewrite_applies_first_matching_rule_and_stops() {
        let mut r = route("/v1/claude");
        r.rewrites = vec![
            RewriteRule {
                pattern: "^/v1/claude".into(),
                replacement: "/anthropic".into(),
            },
            RewriteRule {
                pattern: "never".into(),
                replacement: "x".into(),
            },
        ];
        let table = RouteTable::new(vec![r]);
        let m = table.match_path("/v1/claude/messages").unwrap();
        assert_eq!(m.rewritten_path, "/anthropic/messages");
    }

    #[test]
    fn rewrite_no_match_leaves_path_unchanged() {
        let mut r = route("/v1");
        r.rewrites = vec![RewriteRule {
            pattern: "nope".into(),
            replacement: "x".into(),
        }];
        let table = RouteTable::new(vec![r]);
        let m = table.match_path("/v1/chat").unwrap();
        assert_eq!(m.rewritten_path, "/v1/chat");
    }
}
