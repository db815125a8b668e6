//! Keep-rule grammar, rule matching and root set construction.
//!
//! The grammar recognizes the ProGuard-style directives the shrinker core
//! consumes; matched rules are applied to the hierarchy index to produce the
//! reachability seeds and the pinned/attribute sets driving later phases.

pub mod ast;
pub mod errors;
pub mod matcher;
pub mod parse;
pub mod root_set;

pub use ast::{
    AccessPattern, ClassKindSelector, ClassNamePattern, ClassSpec, FieldSpec, IfRule,
    InheritanceSpec, KeepKind, KeepModifiers, KeepRule, MemberNamePattern, MemberSpec, MethodSpec,
    ParamsPattern, RepackagePolicy, Rule, RuleConfig, RuleOptions, TypePattern,
};
pub use errors::RuleError;
pub use matcher::{class_matches, match_members, match_spec, MemberMatches};
pub use parse::{parse_rules, parse_rules_from_file};
pub use root_set::{
    build_root_set, evaluate_if_rule, ConditionalMembers, RootSet, RootSetBuilder,
};
