//! Cross-skill entity ownership: which skill answers a given list action.
//!
//! Entity authors name the concept ("customer"), not the wire action; the
//! registry derives `list-customers` by pluralization and maps it to the
//! owning skill. The static table is overridable per deployment.

use std::collections::HashMap;

/// Static list-action → owning-skill mapping with convention-based fallback.
pub struct EntityLookupRegistry {
    owners: HashMap<String, String>,
    irregular_plurals: HashMap<String, String>,
}

impl EntityLookupRegistry {
    /// Empty registry; every lookup falls back to the current skill.
    pub fn new() -> Self {
        Self {
            owners: HashMap::new(),
            irregular_plurals: irregular_defaults(),
        }
    }

    /// Registry pre-seeded with the stock deployment map.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        for (action, skill) in [
            ("list-items", "inventory"),
            ("list-warehouses", "inventory"),
            ("list-customers", "selling"),
            ("list-suppliers", "buying"),
            ("list-companies", "setup"),
            ("list-accounts", "gl"),
            ("list-cost-centers", "gl"),
            ("list-fiscal-years", "gl"),
            ("list-employees", "hr"),
            ("list-departments", "hr"),
            ("list-tax-templates", "tax"),
            ("list-assets", "assets"),
        ] {
            registry.owners.insert(action.to_string(), skill.to_string());
        }
        registry
    }

    /// Overrides or adds an ownership entry (per-deployment wiring).
    pub fn set_owner(&mut self, list_action: impl Into<String>, skill: impl Into<String>) {
        self.owners.insert(list_action.into(), skill.into());
    }

    /// Registers an irregular plural for list-action derivation.
    pub fn set_plural(&mut self, singular: impl Into<String>, plural: impl Into<String>) {
        self.irregular_plurals.insert(singular.into(), plural.into());
    }

    /// Skill owning the given list action, if any.
    pub fn owner_of(&self, list_action: &str) -> Option<&str> {
        self.owners.get(list_action).map(String::as_str)
    }

    /// Derives the list action for an entity named by concept,
    /// e.g. "cost-center" → "list-cost-centers".
    pub fn list_action_for(&self, entity: &str) -> String {
        format!("list-{}", self.pluralize(entity))
    }

    /// Pluralizes an entity name: irregular overrides first, then
    /// `y→ies`, trailing `s→ses`, else append `s`.
    pub fn pluralize(&self, entity: &str) -> String {
        let kebab = entity.replace('_', "-");
        if let Some(p) = self.irregular_plurals.get(kebab.as_str()) {
            return p.clone();
        }
        if let Some(stem) = kebab.strip_suffix('y') {
            return format!("{}ies", stem);
        }
        if kebab.ends_with('s') {
            return format!("{}es", kebab);
        }
        format!("{}s", kebab)
    }
}

impl Default for EntityLookupRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn irregular_defaults() -> HashMap<String, String> {
    [
        ("company", "companies"),
        ("currency", "currencies"),
        ("delivery-note", "delivery-notes"),
        ("stock-entry", "stock-entries"),
        ("territory", "territories"),
        ("category", "categories"),
        ("payment-terms", "payment-terms"),
    ]
    .into_iter()
    .map(|(a, b)| (a.to_string(), b.to_string()))
    .collect()
}
