use std::fmt;
use std::path::PathBuf;

use dexshrink_model::AccessFlags;
use regex::Regex;

use crate::errors::RuleError;

/// Glob over dotted class names: `?` matches one character within a package
/// segment, `*` any run within a segment, `**` any run across segments.
#[derive(Clone, Debug)]
pub struct ClassNamePattern {
    source: String,
    regex: Regex,
}

impl ClassNamePattern {
    pub fn new(source: &str) -> Result<ClassNamePattern, RuleError> {
        let mut pattern = String::from("^");
        let mut chars = source.chars().peekable();
        while let Some(c) = chars.next() {
            match c {
                '*' => {
                    if chars.peek() == Some(&'*') {
                        chars.next();
                        pattern.push_str(".*");
                    } else {
                        pattern.push_str("[^.]*");
                    }
                }
                '?' => pattern.push_str("[^.]"),
                '.' => pattern.push_str("\\."),
                '$' => pattern.push_str("\\$"),
                c if c.is_alphanumeric() || c == '_' || c == '/' => pattern.push(c),
                _ => return Err(RuleError::InvalidPattern(source.to_owned())),
            }
        }
        pattern.push('$');
        let regex = Regex::new(&pattern)
            .map_err(|_| RuleError::InvalidPattern(source.to_owned()))?;
        Ok(ClassNamePattern {
            source: source.to_owned(),
            regex,
        })
    }

    /// Matches a dotted java name.
    #[inline]
    pub fn matches(&self, java_name: &str) -> bool {
        self.regex.is_match(java_name)
    }

    #[inline]
    pub fn source(&self) -> &str {
        &self.source
    }
}

impl fmt::Display for ClassNamePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

/// Glob over member names; no package separators, so `*` spans the name.
#[derive(Clone, Debug)]
pub struct MemberNamePattern {
    source: String,
    regex: Regex,
}

impl MemberNamePattern {
    pub fn new(source: &str) -> Result<MemberNamePattern, RuleError> {
        let mut pattern = String::from("^");
        for c in source.chars() {
            match c {
                '*' => pattern.push_str(".*"),
                '?' => pattern.push('.'),
                '$' => pattern.push_str("\\$"),
                '<' | '>' => pattern.push_str(&regex::escape(&c.to_string())),
                c if c.is_alphanumeric() || c == '_' => pattern.push(c),
                _ => return Err(RuleError::InvalidPattern(source.to_owned())),
            }
        }
        pattern.push('$');
        let regex = Regex::new(&pattern)
            .map_err(|_| RuleError::InvalidPattern(source.to_owned()))?;
        Ok(MemberNamePattern {
            source: source.to_owned(),
            regex,
        })
    }

    #[inline]
    pub fn matches(&self, name: &str) -> bool {
        self.regex.is_match(name)
    }

    #[inline]
    pub fn source(&self) -> &str {
        &self.source
    }
}

/// Pattern over java type names as written in rules.
#[derive(Clone, Debug)]
pub enum TypePattern {
    /// `***` matches any type at all.
    Any,
    /// A (possibly glob) dotted name with its array depth (`int[]` is depth 1).
    Name {
        pattern: ClassNamePattern,
        array_depth: usize,
    },
}

impl TypePattern {
    pub fn parse(source: &str) -> Result<TypePattern, RuleError> {
        if source == "***" {
            return Ok(TypePattern::Any);
        }
        let (base, array_depth) = strip_array_suffix(source);
        Ok(TypePattern::Name {
            pattern: ClassNamePattern::new(base)?,
            array_depth,
        })
    }

    /// Matches a descriptor rendered as a java name (`int`, `java.lang.String`,
    /// `int[]`).
    pub fn matches(&self, java_name: &str) -> bool {
        match self {
            TypePattern::Any => true,
            TypePattern::Name {
                pattern,
                array_depth,
            } => {
                let (base, depth) = strip_array_suffix(java_name);
                depth == *array_depth && pattern.matches(base)
            }
        }
    }
}

fn strip_array_suffix(source: &str) -> (&str, usize) {
    let mut base = source;
    let mut depth = 0;
    while let Some(stripped) = base.strip_suffix("[]") {
        base = stripped;
        depth += 1;
    }
    (base, depth)
}

/// Required and forbidden access flags, e.g. `public static !final`.
#[derive(Clone, Debug, Default)]
pub struct AccessPattern {
    pub required: AccessFlags,
    pub forbidden: AccessFlags,
}

impl AccessPattern {
    pub fn matches(&self, flags: AccessFlags) -> bool {
        flags.contains(self.required) && !flags.intersects(self.forbidden)
    }
}

/// The `class` / `interface` / `enum` / `@interface` selector.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClassKindSelector {
    /// `class` matches classes, interfaces and enums alike.
    Any,
    Interface,
    Enum,
    AnnotationInterface,
}

impl ClassKindSelector {
    pub fn matches(&self, flags: AccessFlags) -> bool {
        match self {
            ClassKindSelector::Any => true,
            ClassKindSelector::Interface => flags.is_interface(),
            ClassKindSelector::Enum => flags.is_enum(),
            ClassKindSelector::AnnotationInterface => flags.is_annotation(),
        }
    }
}

/// Parameter list pattern of a method spec.
#[derive(Clone, Debug)]
pub enum ParamsPattern {
    /// `...` matches any number of any types.
    Any,
    Exact(Vec<TypePattern>),
}

/// One member line inside a class spec body.
#[derive(Clone, Debug)]
pub enum MemberSpec {
    /// `<fields>` with optional access filter.
    AllFields(AccessPattern),
    /// `<methods>` with optional access filter.
    AllMethods(AccessPattern),
    /// Bare `*;`: all members.
    AllMembers,
    /// `<init>(...)`.
    Init(ParamsPattern),
    Field(FieldSpec),
    Method(MethodSpec),
}

#[derive(Clone, Debug)]
pub struct FieldSpec {
    pub annotation: Option<ClassNamePattern>,
    pub access: AccessPattern,
    pub field_type: TypePattern,
    pub name: MemberNamePattern,
}

#[derive(Clone, Debug)]
pub struct MethodSpec {
    pub annotation: Option<ClassNamePattern>,
    pub access: AccessPattern,
    pub return_type: TypePattern,
    pub name: MemberNamePattern,
    pub params: ParamsPattern,
}

/// `extends` / `implements` selector of a class spec.
#[derive(Clone, Debug)]
pub struct InheritanceSpec {
    pub annotation: Option<ClassNamePattern>,
    pub name: ClassNamePattern,
}

/// The class half of every member-bearing directive.
#[derive(Clone, Debug)]
pub struct ClassSpec {
    pub annotation: Option<ClassNamePattern>,
    pub access: AccessPattern,
    pub kind: ClassKindSelector,
    pub name: ClassNamePattern,
    pub extends: Option<InheritanceSpec>,
    pub members: Vec<MemberSpec>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KeepKind {
    /// `-keep`: the class and the named members.
    Classes,
    /// `-keepclassmembers`: members, once the class is live.
    ClassMembers,
    /// `-keepclasseswithmembers`: class and members, iff all member specs match.
    ClassesWithMembers,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct KeepModifiers {
    pub allow_obfuscation: bool,
    pub allow_shrinking: bool,
    pub allow_access_modification: bool,
}

#[derive(Clone, Debug)]
pub struct KeepRule {
    pub kind: KeepKind,
    pub modifiers: KeepModifiers,
    pub spec: ClassSpec,
}

/// `-if spec` guarding a keep rule.
#[derive(Clone, Debug)]
pub struct IfRule {
    pub condition: ClassSpec,
    pub keep: KeepRule,
}

#[derive(Clone, Debug)]
pub enum Rule {
    Keep(KeepRule),
    If(IfRule),
    CheckDiscard(ClassSpec),
    AssumeNoSideEffects(ClassSpec),
    AssumeValues(ClassSpec),
    WhyAreYouKeeping(ClassSpec),
    WhyAreYouNotInlining(ClassSpec),
}

/// Where renamed classes go.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum RepackagePolicy {
    #[default]
    None,
    /// `-flattenpackagehierarchy 'pkg'`.
    Flatten(String),
    /// `-repackageclasses 'pkg'`.
    All(String),
}

/// Non-rule directives collected from the rule text.
#[derive(Clone, Debug, Default)]
pub struct RuleOptions {
    pub print_mapping: Option<Option<PathBuf>>,
    pub print_usage: Option<Option<PathBuf>>,
    pub print_seeds: Option<Option<PathBuf>>,
    pub repackage: RepackagePolicy,
    pub dont_optimize: bool,
    pub dont_shrink: bool,
    pub dont_obfuscate: bool,
    pub apply_mapping: Option<PathBuf>,
    pub dont_warn: Vec<ClassNamePattern>,
}

/// Result of parsing one rule configuration.
#[derive(Clone, Debug, Default)]
pub struct RuleConfig {
    pub rules: Vec<Rule>,
    pub options: RuleOptions,
}
