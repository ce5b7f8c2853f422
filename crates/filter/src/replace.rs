//! Restore-time path rewriting

use crate::LIST_SEPARATOR;
use keepsake_core::{Error, Result};

/// Where a rule may rewrite
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    /// First occurrence, only when the path starts with it
    Prefix,
    /// First occurrence anywhere
    First,
    /// Every occurrence
    All,
}

/// One rewrite rule
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rule {
    pub archived: String,
    pub replacement: String,
    pub scope: Scope,
}

impl Rule {
    pub fn new(scope: Scope, archived: impl Into<String>, replacement: impl Into<String>) -> Self {
        Self {
            archived: archived.into(),
            replacement: replacement.into(),
            scope,
        }
    }

    pub fn apply(&self, path: &str) -> String {
        match self.scope {
            Scope::Prefix if path.starts_with(&self.archived) => {
                format!("{}{}", self.replacement, &path[self.archived.len()..])
            }
            Scope::Prefix => path.to_string(),
            Scope::First => path.replacen(&self.archived, &self.replacement, 1),
            Scope::All => path.replace(&self.archived, &self.replacement),
        }
    }
}

/// An ordered chain of rewrite rules
#[derive(Debug, Clone, Default)]
pub struct Replacements {
    rules: Vec<Rule>,
}

impl Replacements {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, rule: Rule) {
        self.rules.push(rule);
    }

    /// Parse a separator-joined list of `archived`/`replacement` pairs
    ///
    /// A list with a single element adds nothing; an odd number of elements
    /// is rejected.
    pub fn add_list(&mut self, scope: Scope, list: &str) -> Result<()> {
        let flat: Vec<&str> = list.split(LIST_SEPARATOR).collect();
        if flat.len() == 1 {
            return Ok(());
        }
        if flat.len() % 2 != 0 {
            return Err(Error::BadReplacementList(list.to_string()));
        }
        for pair in flat.chunks_exact(2) {
            self.push(Rule::new(scope, pair[0], pair[1]));
        }
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    /// Apply every rule in order
    pub fn replace(&self, path: &str) -> String {
        self.rules
            .iter()
            .fold(path.to_string(), |current, rule| rule.apply(&current))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn list(items: &[&str]) -> String {
        items.join(&LIST_SEPARATOR.to_string())
    }

    #[test]
    fn test_prefix_only_at_start() {
        let rule = Rule::new(Scope::Prefix, "/home", "/mnt/home");
        assert_eq!(rule.apply("/home/kim/a"), "/mnt/home/kim/a");
        assert_eq!(rule.apply("/srv/home/a"), "/srv/home/a");
    }

    #[test]
    fn test_first_and_all() {
        let first = Rule::new(Scope::First, "x", "y");
        let all = Rule::new(Scope::All, "x", "y");
        assert_eq!(first.apply("/ax/bx"), "/ay/bx");
        assert_eq!(all.apply("/ax/bx"), "/ay/by");
    }

    #[test]
    fn test_rules_apply_in_order() {
        let mut chain = Replacements::new();
        chain.push(Rule::new(Scope::Prefix, "/a", "/b"));
        chain.push(Rule::new(Scope::Prefix, "/b", "/c"));
        assert_eq!(chain.replace("/a/file"), "/c/file");
        assert_eq!(Replacements::new().replace("/a/file"), "/a/file");
    }

    #[test]
    fn test_add_list_pairs() -> anyhow::Result<()> {
        let mut chain = Replacements::new();
        chain.add_list(Scope::All, &list(&["old", "new", "tmp", "var"]))?;
        assert_eq!(chain.rules().len(), 2);
        assert_eq!(chain.replace("/old/tmp/old"), "/new/var/new");
        Ok(())
    }

    #[test]
    fn test_add_list_single_element_adds_nothing() -> anyhow::Result<()> {
        let mut chain = Replacements::new();
        chain.add_list(Scope::First, "")?;
        chain.add_list(Scope::First, "lonely")?;
        assert!(chain.is_empty());
        Ok(())
    }

    #[test]
    fn test_add_list_odd_count_rejected() {
        let mut chain = Replacements::new();
        let result = chain.add_list(Scope::Prefix, &list(&["a", "b", "c"]));
        assert!(matches!(result, Err(Error::BadReplacementList(_))));
        assert!(chain.is_empty());
    }
}
