//! Name → rule factory table.

use std::collections::BTreeMap;
use std::sync::Arc;

use codegate_core::{check_fields, FieldError, FieldSpec, RuleConfig, RuleSchema};

use super::build_imports::{self, BuildImportsRule};
use super::policy::{self, PolicyRule};
use super::security_deps::{self, SecurityDepsRule};
use super::security_sast::{self, SecuritySastRule};
use super::unit_tests::{self, UnitTestsRule};
use super::{Capability, Rule, RuleExecutionError};

/// Builds a rule from its validated config.
pub type RuleFactory =
    Arc<dyn Fn(&RuleConfig) -> Result<Box<dyn Rule>, RuleExecutionError> + Send + Sync>;

#[derive(Clone)]
struct Registration {
    capability: Capability,
    fields: &'static [FieldSpec],
    factory: RuleFactory,
}

/// Every rule a contract may name.
#[derive(Clone, Default)]
pub struct RuleRegistry {
    rules: BTreeMap<String, Registration>,
}

impl std::fmt::Debug for RuleRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuleRegistry")
            .field("rules", &self.rules.keys().collect::<Vec<_>>())
            .finish()
    }
}

fn boxed<R: Rule + 'static>(rule: R) -> Box<dyn Rule> {
    Box::new(rule)
}

impl RuleRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// The built-in rules.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry.register(
            "build_imports",
            Capability::Containerized,
            build_imports::FIELDS,
            |config| BuildImportsRule::from_config(config).map(boxed),
        );
        registry.register(
            "unit_tests",
            Capability::Containerized,
            unit_tests::FIELDS,
            |config| UnitTestsRule::from_config(config).map(boxed),
        );
        registry.register(
            "security_sast",
            Capability::Containerized,
            security_sast::FIELDS,
            |config| SecuritySastRule::from_config(config).map(boxed),
        );
        registry.register(
            "security_deps",
            Capability::Containerized,
            security_deps::FIELDS,
            |config| SecurityDepsRule::from_config(config).map(boxed),
        );
        registry.register(
            "policy",
            Capability::LocalStatic,
            policy::FIELDS,
            |config| PolicyRule::from_config(config).map(boxed),
        );
        registry
    }

    /// Register (or replace) a rule under `name`.
    pub fn register<F>(
        &mut self,
        name: impl Into<String>,
        capability: Capability,
        fields: &'static [FieldSpec],
        factory: F,
    ) -> &mut Self
    where
        F: Fn(&RuleConfig) -> Result<Box<dyn Rule>, RuleExecutionError> + Send + Sync + 'static,
    {
        self.rules.insert(
            name.into(),
            Registration {
                capability,
                fields,
                factory: Arc::new(factory),
            },
        );
        self
    }

    pub fn capability(&self, name: &str) -> Option<Capability> {
        self.rules.get(name).map(|r| r.capability)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.rules.contains_key(name)
    }

    /// Construct the rule registered under `name`.
    pub fn construct(&self, name: &str, config: &RuleConfig) -> Result<Box<dyn Rule>, RuleExecutionError> {
        let registration = self
            .rules
            .get(name)
            .ok_or_else(|| RuleExecutionError::UnknownRule(name.to_string()))?;
        (registration.factory)(config)
    }

    pub fn names(&self) -> Vec<String> {
        self.rules.keys().cloned().collect()
    }
}

impl RuleSchema for RuleRegistry {
    fn known_rules(&self) -> Vec<String> {
        self.names()
    }

    fn check_rule(&self, name: &str, config: &RuleConfig) -> Option<Vec<FieldError>> {
        let registration = self.rules.get(name)?;
        let errors = check_fields(&config.fields, registration.fields);
        if !errors.is_empty() {
            return Some(errors);
        }
        // Field types are fine; the factory still rejects bad values.
        match (registration.factory)(config) {
            Err(RuleExecutionError::InvalidConfig { field, reason }) => {
                Some(vec![FieldError::new(field, reason)])
            }
            Err(other) => Some(vec![FieldError::new("config", other.to_string())]),
            Ok(_) => Some(Vec::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use codegate_core::Verdict;

    use crate::context::ExecutionContext;

    struct AlwaysPass;

    #[async_trait]
    impl Rule for AlwaysPass {
        async fn execute(&self, _ctx: &ExecutionContext) -> Result<Verdict, RuleExecutionError> {
            Ok(Verdict::pass("ok"))
        }
    }

    #[test]
    fn test_builtin_rules_and_capabilities() {
        let registry = RuleRegistry::builtin();
        assert_eq!(
            registry.names(),
            vec!["build_imports", "policy", "security_deps", "security_sast", "unit_tests"]
        );
        assert_eq!(registry.capability("policy"), Some(Capability::LocalStatic));
        assert_eq!(registry.capability("unit_tests"), Some(Capability::Containerized));
        assert_eq!(registry.capability("lint"), None);
    }

    #[test]
    fn test_construct_unknown_rule() {
        let registry = RuleRegistry::builtin();
        let err = registry.construct("lint", &RuleConfig::enabled()).err();
        assert!(matches!(err, Some(RuleExecutionError::UnknownRule(name)) if name == "lint"));
    }

    #[test]
    fn test_check_rule_reports_factory_rejections() {
        let registry = RuleRegistry::builtin();
        assert_eq!(registry.check_rule("lint", &RuleConfig::enabled()), None);
        assert_eq!(registry.check_rule("policy", &RuleConfig::enabled()), Some(Vec::new()));

        let escaping = RuleConfig::enabled().with_field("test_directory", "../outside");
        let errors = registry.check_rule("unit_tests", &escaping).unwrap();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].path, "test_directory");

        let mistyped = RuleConfig::enabled().with_field("timeout", "later");
        let errors = registry.check_rule("security_deps", &mistyped).unwrap();
        assert_eq!(errors[0].path, "timeout");
    }

    #[test]
    fn test_register_custom_rule() {
        let mut registry = RuleRegistry::new();
        registry.register("always_pass", Capability::LocalStatic, &[], |_| Ok(boxed(AlwaysPass)));
        assert!(registry.contains("always_pass"));
        assert!(registry.construct("always_pass", &RuleConfig::enabled()).is_ok());
        assert_eq!(registry.check_rule("always_pass", &RuleConfig::enabled()), Some(Vec::new()));
    }
}
