use std::path::PathBuf;

use dexshrink_rules::{RepackagePolicy, RuleOptions};

use crate::errors::ShrinkError;

/// Lowest API level the platform base supports.
pub const PLATFORM_BASE_API: u32 = 1;

/// Validated configuration of one shrink run.
///
/// Command-line flags and rule-file directives both funnel into this record;
/// validation happens once, when the final value is constructed.
#[derive(Debug, Clone)]
pub struct Options {
    /// Run the tree pruner.
    pub tree_shaking: bool,
    /// Verify every `-checkdiscard` reference was removed.
    pub discarded_checker: bool,
    /// Run the minifier.
    pub minification: bool,
    /// Run member rebinding and vertical class merging between rounds.
    pub optimize: bool,
    /// Relax precision-vs-compatibility tie-breaks: resolution failures
    /// downgrade to warnings.
    pub force_compatibility: bool,
    /// Missing classes warn instead of failing the run.
    pub ignore_missing_classes: bool,
    /// Keep annotations of live items and what they reference.
    pub keep_annotations: bool,
    pub min_api_level: u32,
    /// Feature split names partitioning the program classes.
    pub feature_splits: Vec<String>,
    /// Externally-supplied renaming seed for the minifier.
    pub apply_mapping: Option<PathBuf>,
    pub repackage: RepackagePolicy,
    /// Requested artifact outputs; `Some(None)` means standard output.
    pub print_mapping: Option<Option<PathBuf>>,
    pub print_seeds: Option<Option<PathBuf>>,
    pub print_usage: Option<Option<PathBuf>>,
}

impl Default for Options {
    fn default() -> Options {
        Options {
            tree_shaking: true,
            discarded_checker: true,
            minification: true,
            optimize: true,
            force_compatibility: false,
            ignore_missing_classes: false,
            keep_annotations: true,
            min_api_level: PLATFORM_BASE_API,
            feature_splits: Vec::new(),
            apply_mapping: None,
            repackage: RepackagePolicy::None,
            print_mapping: None,
            print_seeds: None,
            print_usage: None,
        }
    }
}

impl Options {
    /// Folds rule-file directives into this configuration. Rule toggles
    /// only ever switch features off or request outputs; flags set by the
    /// caller stay in force.
    pub fn merge_rule_options(&mut self, rule_options: &RuleOptions) {
        if rule_options.dont_shrink {
            self.tree_shaking = false;
        }
        if rule_options.dont_obfuscate {
            self.minification = false;
        }
        if rule_options.dont_optimize {
            self.optimize = false;
        }
        if rule_options.repackage != RepackagePolicy::None {
            self.repackage = rule_options.repackage.clone();
        }
        if self.apply_mapping.is_none() {
            self.apply_mapping = rule_options.apply_mapping.clone();
        }
        if self.print_mapping.is_none() {
            self.print_mapping = rule_options.print_mapping.clone();
        }
        if self.print_seeds.is_none() {
            self.print_seeds = rule_options.print_seeds.clone();
        }
        if self.print_usage.is_none() {
            self.print_usage = rule_options.print_usage.clone();
        }
    }

    /// Validates the record once; everything downstream may rely on it.
    pub fn validate(self) -> Result<Options, ShrinkError> {
        if self.min_api_level < PLATFORM_BASE_API {
            return Err(ShrinkError::InvalidOptions(format!(
                "min api level {} is below the platform base",
                self.min_api_level
            )));
        }
        let mut seen = std::collections::HashSet::new();
        for feature in &self.feature_splits {
            if feature.is_empty() {
                return Err(ShrinkError::InvalidOptions(
                    "feature split names must be non-empty".to_owned(),
                ));
            }
            if !seen.insert(feature.as_str()) {
                return Err(ShrinkError::InvalidOptions(format!(
                    "duplicate feature split '{feature}'"
                )));
            }
        }
        if let RepackagePolicy::All(package) | RepackagePolicy::Flatten(package) = &self.repackage {
            if package
                .chars()
                .any(|c| !c.is_alphanumeric() && c != '.' && c != '_')
            {
                return Err(ShrinkError::InvalidOptions(format!(
                    "invalid repackage target '{package}'"
                )));
            }
        }
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_enable_the_full_pipeline() {
        let options = Options::default().validate().unwrap();
        assert!(options.tree_shaking);
        assert!(options.discarded_checker);
        assert!(options.minification);
    }

    #[test]
    fn rule_toggles_switch_features_off() {
        let config = dexshrink_rules::parse_rules("-dontshrink\n-dontobfuscate").unwrap();
        let mut options = Options::default();
        options.merge_rule_options(&config.options);
        assert!(!options.tree_shaking);
        assert!(!options.minification);
        assert!(options.optimize);
    }

    #[test]
    fn duplicate_features_are_rejected() {
        let options = Options {
            feature_splits: vec!["f1".to_owned(), "f1".to_owned()],
            ..Options::default()
        };
        assert!(matches!(
            options.validate(),
            Err(ShrinkError::InvalidOptions(_))
        ));
    }

    #[test]
    fn bad_repackage_target_is_rejected() {
        let options = Options {
            repackage: RepackagePolicy::All("bad/pkg".to_owned()),
            ..Options::default()
        };
        assert!(matches!(
            options.validate(),
            Err(ShrinkError::InvalidOptions(_))
        ));
    }
}
