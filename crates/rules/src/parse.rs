use std::fs;
use std::path::{Path, PathBuf};

use dexshrink_model::AccessFlags;
use winnow::ascii::{multispace1, till_line_ending};
use winnow::combinator::opt;
use winnow::error::{ContextError, ErrMode};
use winnow::prelude::*;
use winnow::token::take_while;

use crate::ast::{
    AccessPattern, ClassKindSelector, ClassNamePattern, ClassSpec, FieldSpec, IfRule,
    InheritanceSpec, KeepKind, KeepModifiers, KeepRule, MemberNamePattern, MemberSpec, MethodSpec,
    ParamsPattern, RepackagePolicy, Rule, RuleConfig, TypePattern,
};
use crate::errors::RuleError;

const MAX_INCLUDE_DEPTH: usize = 16;

/// Parse rule text without resolving `@file` / `-include` directives.
pub fn parse_rules(text: &str) -> Result<RuleConfig, RuleError> {
    let mut config = RuleConfig::default();
    parse_into(text, None, 0, &mut config)?;
    Ok(config)
}

/// Parse a rule file; includes are resolved relative to its directory.
pub fn parse_rules_from_file(path: &Path) -> Result<RuleConfig, RuleError> {
    let mut config = RuleConfig::default();
    include_file(path, 0, &mut config)?;
    Ok(config)
}

fn include_file(path: &Path, depth: usize, config: &mut RuleConfig) -> Result<(), RuleError> {
    if depth > MAX_INCLUDE_DEPTH {
        return Err(RuleError::IncludeDepth(path.to_owned()));
    }
    let text = fs::read_to_string(path).map_err(|source| RuleError::Include {
        path: path.to_owned(),
        source,
    })?;
    parse_into(&text, path.parent(), depth, config)
}

fn parse_into(
    text: &str,
    base_dir: Option<&Path>,
    depth: usize,
    config: &mut RuleConfig,
) -> Result<(), RuleError> {
    let mut input = text;
    loop {
        skip_trivia(&mut input);
        if input.is_empty() {
            return Ok(());
        }
        parse_directive(&mut input, text, base_dir, depth, config)?;
    }
}

fn line_of(full: &str, rest: &str) -> usize {
    let consumed = full.len() - rest.len();
    full[..consumed].matches('\n').count() + 1
}

fn parse_error(full: &str, rest: &str, message: impl Into<String>) -> RuleError {
    RuleError::Parse {
        line: line_of(full, rest),
        message: message.into(),
    }
}

fn skip_trivia(input: &mut &str) {
    loop {
        let skipped_ws = opt(multispace1::<&str, ContextError>)
            .parse_next(input)
            .unwrap_or_default()
            .is_some();
        let mut skipped_comment = false;
        if input.starts_with('#') {
            let _ = till_line_ending::<&str, ContextError>.parse_next(input);
            skipped_comment = true;
        }
        if !skipped_ws && !skipped_comment {
            return;
        }
    }
}

/// A rule token: everything up to whitespace or a structural delimiter.
fn word<'s>(input: &mut &'s str) -> ModalResult<&'s str> {
    take_while(1.., |c: char| {
        !c.is_whitespace() && !matches!(c, '{' | '}' | '(' | ')' | ';' | ',')
    })
    .parse_next(input)
}

fn expect_char(input: &mut &str, expected: char) -> Result<(), ErrMode<ContextError>> {
    skip_trivia(input);
    if input.starts_with(expected) {
        *input = &input[expected.len_utf8()..];
        Ok(())
    } else {
        Err(ErrMode::Cut(ContextError::new()))
    }
}

fn parse_directive(
    input: &mut &str,
    full: &str,
    base_dir: Option<&Path>,
    depth: usize,
    config: &mut RuleConfig,
) -> Result<(), RuleError> {
    if input.starts_with('@') {
        *input = &input[1..];
        let file = word(input).map_err(|_| parse_error(full, input, "expected file after @"))?;
        return include_file(&resolve_path(base_dir, file), depth + 1, config);
    }

    if !input.starts_with('-') {
        return Err(parse_error(full, input, "expected a directive"));
    }
    *input = &input[1..];
    let name = word(input).map_err(|_| parse_error(full, input, "expected directive name"))?;

    match name {
        "keep" | "keepclassmembers" | "keepclasseswithmembers" => {
            let kind = match name {
                "keep" => KeepKind::Classes,
                "keepclassmembers" => KeepKind::ClassMembers,
                _ => KeepKind::ClassesWithMembers,
            };
            let modifiers = parse_modifiers(input, full)?;
            let spec = parse_class_spec(input, full)?;
            config.rules.push(Rule::Keep(KeepRule {
                kind,
                modifiers,
                spec,
            }));
        }
        "if" => {
            let line = line_of(full, input);
            let condition = parse_class_spec(input, full)?;
            skip_trivia(input);
            if !input.starts_with("-keep") {
                return Err(RuleError::DanglingIf { line });
            }
            *input = &input[1..];
            let keep_name =
                word(input).map_err(|_| parse_error(full, input, "expected keep directive"))?;
            let kind = match keep_name {
                "keep" => KeepKind::Classes,
                "keepclassmembers" => KeepKind::ClassMembers,
                "keepclasseswithmembers" => KeepKind::ClassesWithMembers,
                _ => return Err(RuleError::DanglingIf { line }),
            };
            let modifiers = parse_modifiers(input, full)?;
            let spec = parse_class_spec(input, full)?;
            config.rules.push(Rule::If(IfRule {
                condition,
                keep: KeepRule {
                    kind,
                    modifiers,
                    spec,
                },
            }));
        }
        "checkdiscard" => {
            let spec = parse_class_spec(input, full)?;
            config.rules.push(Rule::CheckDiscard(spec));
        }
        "assumenosideeffects" => {
            let spec = parse_class_spec(input, full)?;
            config.rules.push(Rule::AssumeNoSideEffects(spec));
        }
        "assumevalues" => {
            let spec = parse_class_spec(input, full)?;
            config.rules.push(Rule::AssumeValues(spec));
        }
        "whyareyoukeeping" => {
            let spec = parse_class_spec(input, full)?;
            config.rules.push(Rule::WhyAreYouKeeping(spec));
        }
        "whyareyounotinlining" => {
            let spec = parse_class_spec(input, full)?;
            config.rules.push(Rule::WhyAreYouNotInlining(spec));
        }
        "printmapping" => config.options.print_mapping = Some(parse_opt_path(input)),
        "printusage" => config.options.print_usage = Some(parse_opt_path(input)),
        "printseeds" => config.options.print_seeds = Some(parse_opt_path(input)),
        "repackageclasses" => {
            config.options.repackage =
                RepackagePolicy::All(parse_opt_quoted(input).unwrap_or_default());
        }
        "flattenpackagehierarchy" => {
            config.options.repackage =
                RepackagePolicy::Flatten(parse_opt_quoted(input).unwrap_or_default());
        }
        "dontoptimize" => config.options.dont_optimize = true,
        "dontshrink" => config.options.dont_shrink = true,
        "dontobfuscate" => config.options.dont_obfuscate = true,
        "dontwarn" => {
            loop {
                skip_trivia(input);
                let pattern =
                    word(input).map_err(|_| parse_error(full, input, "expected pattern"))?;
                config.options.dont_warn.push(ClassNamePattern::new(pattern)?);
                skip_trivia(input);
                if input.starts_with(',') {
                    *input = &input[1..];
                } else {
                    break;
                }
            }
        }
        "applymapping" => {
            skip_trivia(input);
            let file = word(input).map_err(|_| parse_error(full, input, "expected file"))?;
            config.options.apply_mapping = Some(resolve_path(base_dir, file));
        }
        "include" => {
            skip_trivia(input);
            let file = word(input).map_err(|_| parse_error(full, input, "expected file"))?;
            include_file(&resolve_path(base_dir, file), depth + 1, config)?;
        }
        other => {
            return Err(parse_error(
                full,
                input,
                format!("unknown directive -{other}"),
            ));
        }
    }
    Ok(())
}

fn resolve_path(base_dir: Option<&Path>, file: &str) -> PathBuf {
    match base_dir {
        Some(dir) => dir.join(file),
        None => PathBuf::from(file),
    }
}

fn parse_modifiers(input: &mut &str, full: &str) -> Result<KeepModifiers, RuleError> {
    let mut modifiers = KeepModifiers::default();
    loop {
        skip_trivia(input);
        if !input.starts_with(',') {
            return Ok(modifiers);
        }
        *input = &input[1..];
        skip_trivia(input);
        let token = word(input).map_err(|_| parse_error(full, input, "expected modifier"))?;
        match token {
            "allowobfuscation" => modifiers.allow_obfuscation = true,
            "allowshrinking" => modifiers.allow_shrinking = true,
            "allowaccessmodification" => modifiers.allow_access_modification = true,
            other => {
                return Err(parse_error(
                    full,
                    input,
                    format!("unknown keep modifier '{other}'"),
                ));
            }
        }
    }
}

fn parse_opt_path(input: &mut &str) -> Option<PathBuf> {
    skip_trivia(input);
    if input.starts_with('-') || input.is_empty() {
        return None;
    }
    word(input).ok().map(PathBuf::from)
}

fn parse_opt_quoted(input: &mut &str) -> Option<String> {
    skip_trivia(input);
    if input.starts_with('\'') {
        *input = &input[1..];
        let value = take_while::<_, &str, ContextError>(0.., |c: char| c != '\'')
            .parse_next(input)
            .ok()?;
        *input = input.strip_prefix('\'').unwrap_or(input);
        return Some(value.to_owned());
    }
    if input.starts_with('-') || input.is_empty() {
        return None;
    }
    word(input).ok().map(str::to_owned)
}

fn parse_class_spec(input: &mut &str, full: &str) -> Result<ClassSpec, RuleError> {
    skip_trivia(input);

    // `@interface` is the annotation-class selector, not an annotation
    let mut annotation = None;
    if input.starts_with('@') && !input.starts_with("@interface") {
        *input = &input[1..];
        let name = word(input).map_err(|_| parse_error(full, input, "expected annotation"))?;
        annotation = Some(ClassNamePattern::new(name)?);
        skip_trivia(input);
    }

    let mut access = AccessPattern::default();
    let kind = loop {
        skip_trivia(input);
        let token = word(input).map_err(|_| parse_error(full, input, "expected class selector"))?;
        match token {
            "class" => break ClassKindSelector::Any,
            "interface" => break ClassKindSelector::Interface,
            "enum" => break ClassKindSelector::Enum,
            "@interface" => break ClassKindSelector::AnnotationInterface,
            flag => {
                if !apply_access_flag(&mut access, flag) {
                    return Err(parse_error(
                        full,
                        input,
                        format!("unexpected token '{flag}' in class specification"),
                    ));
                }
            }
        }
    };

    skip_trivia(input);
    let name = word(input).map_err(|_| parse_error(full, input, "expected class name"))?;
    let name = ClassNamePattern::new(name)?;

    skip_trivia(input);
    let mut extends = None;
    if input.starts_with("extends") || input.starts_with("implements") {
        let _ = word(input);
        skip_trivia(input);
        let mut super_annotation = None;
        if input.starts_with('@') {
            *input = &input[1..];
            let ann = word(input).map_err(|_| parse_error(full, input, "expected annotation"))?;
            super_annotation = Some(ClassNamePattern::new(ann)?);
            skip_trivia(input);
        }
        let super_name =
            word(input).map_err(|_| parse_error(full, input, "expected superclass name"))?;
        extends = Some(InheritanceSpec {
            annotation: super_annotation,
            name: ClassNamePattern::new(super_name)?,
        });
        skip_trivia(input);
    }

    let mut members = Vec::new();
    if input.starts_with('{') {
        *input = &input[1..];
        loop {
            skip_trivia(input);
            if input.starts_with('}') {
                *input = &input[1..];
                break;
            }
            if input.is_empty() {
                return Err(parse_error(full, input, "unterminated member block"));
            }
            members.push(parse_member_spec(input, full)?);
        }
    }

    Ok(ClassSpec {
        annotation,
        access,
        kind,
        name,
        extends,
        members,
    })
}

fn apply_access_flag(pattern: &mut AccessPattern, token: &str) -> bool {
    let (negated, token) = match token.strip_prefix('!') {
        Some(rest) => (true, rest),
        None => (false, token),
    };
    let flag = match token {
        "public" => AccessFlags::PUBLIC,
        "private" => AccessFlags::PRIVATE,
        "protected" => AccessFlags::PROTECTED,
        "static" => AccessFlags::STATIC,
        "final" => AccessFlags::FINAL,
        "abstract" => AccessFlags::ABSTRACT,
        "synthetic" => AccessFlags::SYNTHETIC,
        "native" => AccessFlags::NATIVE,
        "transient" => AccessFlags::TRANSIENT,
        "volatile" => AccessFlags::VOLATILE,
        _ => return false,
    };
    if negated {
        pattern.forbidden |= flag;
    } else {
        pattern.required |= flag;
    }
    true
}

fn parse_member_spec(input: &mut &str, full: &str) -> Result<MemberSpec, RuleError> {
    skip_trivia(input);

    let mut annotation = None;
    if input.starts_with('@') {
        *input = &input[1..];
        let name = word(input).map_err(|_| parse_error(full, input, "expected annotation"))?;
        annotation = Some(ClassNamePattern::new(name)?);
        skip_trivia(input);
    }

    let mut access = AccessPattern::default();
    let first = loop {
        skip_trivia(input);
        let token = word(input).map_err(|_| parse_error(full, input, "expected member"))?;
        if apply_access_flag(&mut access, token) {
            continue;
        }
        break token.to_owned();
    };

    // wildcards and initializers
    match first.as_str() {
        "<fields>" => {
            expect_semicolon(input, full)?;
            return Ok(MemberSpec::AllFields(access));
        }
        "<methods>" => {
            expect_semicolon(input, full)?;
            return Ok(MemberSpec::AllMethods(access));
        }
        "*" => {
            skip_trivia(input);
            if input.starts_with(';') {
                *input = &input[1..];
                return Ok(MemberSpec::AllMembers);
            }
            // `* name(...)` is a *-typed member; fall through with type `***`
        }
        "<init>" => {
            let params = parse_params(input, full)?;
            expect_semicolon(input, full)?;
            return Ok(MemberSpec::Init(params));
        }
        _ => {}
    }

    let member_type = if first == "*" {
        TypePattern::Any
    } else {
        TypePattern::parse(&first)?
    };

    skip_trivia(input);
    let name = word(input).map_err(|_| parse_error(full, input, "expected member name"))?;
    let name = name.to_owned();

    skip_trivia(input);
    if input.starts_with('(') {
        let params = parse_params(input, full)?;
        expect_semicolon(input, full)?;
        if name == "<init>" {
            return Ok(MemberSpec::Init(params));
        }
        return Ok(MemberSpec::Method(MethodSpec {
            annotation,
            access,
            return_type: member_type,
            name: MemberNamePattern::new(&name)?,
            params,
        }));
    }

    expect_semicolon(input, full)?;
    Ok(MemberSpec::Field(FieldSpec {
        annotation,
        access,
        field_type: member_type,
        name: MemberNamePattern::new(&name)?,
    }))
}

fn parse_params(input: &mut &str, full: &str) -> Result<ParamsPattern, RuleError> {
    expect_char(input, '(').map_err(|_| parse_error(full, input, "expected ("))?;
    skip_trivia(input);
    if input.starts_with(')') {
        *input = &input[1..];
        return Ok(ParamsPattern::Exact(Vec::new()));
    }
    if input.starts_with("...") {
        *input = &input[3..];
        expect_char(input, ')').map_err(|_| parse_error(full, input, "expected )"))?;
        return Ok(ParamsPattern::Any);
    }
    let mut params = Vec::new();
    loop {
        skip_trivia(input);
        let token = word(input).map_err(|_| parse_error(full, input, "expected parameter type"))?;
        params.push(TypePattern::parse(token)?);
        skip_trivia(input);
        if input.starts_with(',') {
            *input = &input[1..];
            continue;
        }
        expect_char(input, ')').map_err(|_| parse_error(full, input, "expected )"))?;
        return Ok(ParamsPattern::Exact(params));
    }
}

fn expect_semicolon(input: &mut &str, full: &str) -> Result<(), RuleError> {
    expect_char(input, ';').map_err(|_| parse_error(full, input, "expected ;"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_keep() {
        let config = parse_rules("-keep class com.example.Main { void main(java.lang.String[]); }")
            .unwrap();
        assert_eq!(config.rules.len(), 1);
        let Rule::Keep(rule) = &config.rules[0] else {
            panic!("expected keep rule");
        };
        assert_eq!(rule.kind, KeepKind::Classes);
        assert!(rule.spec.name.matches("com.example.Main"));
        assert_eq!(rule.spec.members.len(), 1);
    }

    #[test]
    fn parses_modifiers() {
        let config = parse_rules("-keep,allowobfuscation,allowshrinking class * extends android.app.Activity").unwrap();
        let Rule::Keep(rule) = &config.rules[0] else {
            panic!("expected keep rule");
        };
        assert!(rule.modifiers.allow_obfuscation);
        assert!(rule.modifiers.allow_shrinking);
        assert!(rule.spec.extends.is_some());
    }

    #[test]
    fn parses_member_wildcards_and_init() {
        let config = parse_rules(
            "-keepclassmembers class ** {\n    # keep everything interesting\n    <fields>;\n    <init>(...);\n    public static <methods>;\n}",
        )
        .unwrap();
        let Rule::Keep(rule) = &config.rules[0] else {
            panic!("expected keep rule");
        };
        assert_eq!(rule.kind, KeepKind::ClassMembers);
        assert_eq!(rule.spec.members.len(), 3);
        assert!(matches!(rule.spec.members[0], MemberSpec::AllFields(_)));
        assert!(matches!(rule.spec.members[1], MemberSpec::Init(ParamsPattern::Any)));
        match &rule.spec.members[2] {
            MemberSpec::AllMethods(access) => {
                assert!(access.required.contains(AccessFlags::PUBLIC | AccessFlags::STATIC));
            }
            other => panic!("expected <methods>, got {other:?}"),
        }
    }

    #[test]
    fn parses_if_conditional() {
        let config = parse_rules(
            "-if class com.example.Config { boolean DEBUG; } -keep class com.example.Logger { *; }",
        )
        .unwrap();
        let Rule::If(rule) = &config.rules[0] else {
            panic!("expected if rule");
        };
        assert!(rule.condition.name.matches("com.example.Config"));
        assert!(rule.keep.spec.name.matches("com.example.Logger"));
    }

    #[test]
    fn dangling_if_is_an_error() {
        let result = parse_rules("-if class A\n-dontoptimize");
        assert!(matches!(result, Err(RuleError::DanglingIf { .. })));
    }

    #[test]
    fn parses_output_directives_and_toggles() {
        let config = parse_rules(
            "-printmapping out/mapping.txt\n-printseeds\n-dontobfuscate\n-repackageclasses 'o'\n-dontwarn javax.annotation.**,sun.misc.Unsafe",
        )
        .unwrap();
        assert_eq!(
            config.options.print_mapping,
            Some(Some(PathBuf::from("out/mapping.txt")))
        );
        assert_eq!(config.options.print_seeds, Some(None));
        assert!(config.options.dont_obfuscate);
        assert_eq!(config.options.repackage, RepackagePolicy::All("o".to_owned()));
        assert_eq!(config.options.dont_warn.len(), 2);
    }

    #[test]
    fn parses_annotation_selectors() {
        let config = parse_rules(
            "-keep @com.example.Keep class * { *; }\n-keep @interface com.example.MyAnnotation",
        )
        .unwrap();
        let Rule::Keep(first) = &config.rules[0] else {
            panic!("expected keep rule");
        };
        assert!(first.spec.annotation.is_some());
        let Rule::Keep(second) = &config.rules[1] else {
            panic!("expected keep rule");
        };
        assert_eq!(second.spec.kind, ClassKindSelector::AnnotationInterface);
    }

    #[test]
    fn checkdiscard_and_assumptions() {
        let config = parse_rules(
            "-checkdiscard class com.example.Dbg\n-assumenosideeffects class android.util.Log { public static *** d(...); }",
        )
        .unwrap();
        assert!(matches!(config.rules[0], Rule::CheckDiscard(_)));
        assert!(matches!(config.rules[1], Rule::AssumeNoSideEffects(_)));
    }

    #[test]
    fn unknown_directive_is_rejected_with_line() {
        let result = parse_rules("-dontoptimize\n-bogus thing");
        match result {
            Err(RuleError::Parse { line, .. }) => assert_eq!(line, 2),
            other => panic!("expected parse error, got {other:?}"),
        }
    }

    #[test]
    fn negated_flags_parse() {
        let config = parse_rules("-keep public !final class * { !static <fields>; }").unwrap();
        let Rule::Keep(rule) = &config.rules[0] else {
            panic!("expected keep rule");
        };
        assert!(rule.spec.access.required.contains(AccessFlags::PUBLIC));
        assert!(rule.spec.access.forbidden.contains(AccessFlags::FINAL));
    }
}
