use std::io::{self, Write};
use std::path::Path;

use dexshrink_model::{ClassRef, GraphLens, InvokeKind, Origin};

use crate::errors::NamingError;

/// One member line of a parsed proguard map.
#[derive(Debug, Clone, PartialEq)]
pub struct MemberMappingRecord {
    pub is_method: bool,
    /// Field type or method return type, in java form.
    pub member_type: String,
    pub original_name: String,
    /// `None` for fields.
    pub parameters: Option<Vec<String>>,
    pub renamed_name: String,
    /// `a:b` span on the obfuscated side, when present.
    pub line_range: Option<(usize, usize)>,
    /// `c:d` original span for inlined frames, when present.
    pub original_range: Option<(usize, usize)>,
}

/// One class section of a parsed proguard map.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassMappingRecord {
    pub original: String,
    pub renamed: String,
    pub members: Vec<MemberMappingRecord>,
}

/// A parsed proguard-compatible map, as consumed by `-applymapping` and
/// produced by the minifier.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedMapping {
    pub classes: Vec<ClassMappingRecord>,
}

impl ParsedMapping {
    pub fn from_file(path: &Path) -> Result<ParsedMapping, NamingError> {
        let text = std::fs::read_to_string(path)?;
        ParsedMapping::parse(&text)
    }

    pub fn parse(text: &str) -> Result<ParsedMapping, NamingError> {
        let mut mapping = ParsedMapping::default();
        for (index, raw_line) in text.lines().enumerate() {
            let line_number = index + 1;
            let line = strip_comment(raw_line);
            if line.trim().is_empty() {
                continue;
            }

            if !raw_line.starts_with([' ', '\t']) {
                // class line: `original -> renamed:`
                let line = line.trim();
                let (original, renamed) = line
                    .strip_suffix(':')
                    .and_then(|l| l.split_once(" -> "))
                    .ok_or_else(|| NamingError::MappingParse {
                        line: line_number,
                        message: "expected '<original> -> <renamed>:'".to_owned(),
                    })?;
                mapping.classes.push(ClassMappingRecord {
                    original: original.trim().to_owned(),
                    renamed: renamed.trim().to_owned(),
                    members: Vec::new(),
                });
                continue;
            }

            let class = mapping
                .classes
                .last_mut()
                .ok_or_else(|| NamingError::MappingParse {
                    line: line_number,
                    message: "member line before any class line".to_owned(),
                })?;
            class
                .members
                .push(parse_member_line(line.trim(), line_number)?);
        }
        Ok(mapping)
    }

    /// The class renaming pairs, original to renamed.
    pub fn class_renamings(&self) -> impl Iterator<Item = (&str, &str)> {
        self.classes
            .iter()
            .map(|c| (c.original.as_str(), c.renamed.as_str()))
    }
}

fn strip_comment(line: &str) -> &str {
    match line.find('#') {
        Some(position) => &line[..position],
        None => line,
    }
}

/// `[a:b:]type name[(params)][:c[:d]] -> renamed`
fn parse_member_line(line: &str, line_number: usize) -> Result<MemberMappingRecord, NamingError> {
    let error = |message: &str| NamingError::MappingParse {
        line: line_number,
        message: message.to_owned(),
    };

    let (signature, renamed) = line
        .split_once(" -> ")
        .ok_or_else(|| error("expected ' -> '"))?;
    let renamed = renamed.trim().to_owned();
    let mut signature = signature.trim();

    // leading obfuscated line range `a:b:`
    let mut line_range = None;
    if let Some((prefix, rest)) = split_leading_range(signature) {
        line_range = Some(prefix);
        signature = rest;
    }

    // trailing original range `:c` or `:c:d`
    let mut original_range = None;
    if let Some((rest, range)) = split_trailing_range(signature) {
        original_range = Some(range);
        signature = rest;
    }

    let (member_type, rest) = signature
        .split_once(' ')
        .ok_or_else(|| error("expected '<type> <name>'"))?;

    if let Some((name, params)) = rest.split_once('(') {
        let params = params
            .strip_suffix(')')
            .ok_or_else(|| error("unterminated parameter list"))?;
        let parameters = if params.trim().is_empty() {
            Vec::new()
        } else {
            params.split(',').map(|p| p.trim().to_owned()).collect()
        };
        Ok(MemberMappingRecord {
            is_method: true,
            member_type: member_type.to_owned(),
            original_name: name.trim().to_owned(),
            parameters: Some(parameters),
            renamed_name: renamed,
            line_range,
            original_range,
        })
    } else {
        Ok(MemberMappingRecord {
            is_method: false,
            member_type: member_type.to_owned(),
            original_name: rest.trim().to_owned(),
            parameters: None,
            renamed_name: renamed,
            line_range,
            original_range,
        })
    }
}

fn split_leading_range(signature: &str) -> Option<((usize, usize), &str)> {
    let mut parts = signature.splitn(3, ':');
    let first = parts.next()?.parse::<usize>().ok()?;
    let second = parts.next()?.parse::<usize>().ok()?;
    let rest = parts.next()?;
    Some(((first, second), rest))
}

fn split_trailing_range(signature: &str) -> Option<(&str, (usize, usize))> {
    // ranges attach after the closing paren or the field name
    let colon = signature.find(':')?;
    let (head, tail) = signature.split_at(colon);
    let tail = &tail[1..];
    match tail.split_once(':') {
        Some((first, second)) => {
            let first = first.parse::<usize>().ok()?;
            let second = second.parse::<usize>().ok()?;
            Some((head, (first, second)))
        }
        None => {
            let single = tail.parse::<usize>().ok()?;
            Some((head, (single, single)))
        }
    }
}

/// Emits the proguard-compatible map for the given classes through the final
/// lens. Member signatures are printed with their original names and types.
pub fn write_mapping<W: Write>(
    classes: &[ClassRef],
    lens: &GraphLens,
    out: &mut W,
) -> io::Result<()> {
    let mut sorted: Vec<&ClassRef> = classes.iter().collect();
    sorted.sort_by(|a, b| a.class_type.cmp(&b.class_type));

    for class in sorted {
        let original = class.class_type.java_name();
        let renamed = lens.lookup_type(&class.class_type).java_name();
        match &class.origin {
            Origin::Synthesized(context) => writeln!(
                out,
                "{original} -> {renamed}: # synthesized from {}",
                context.java_name()
            )?,
            _ => writeln!(out, "{original} -> {renamed}:")?,
        }

        let mut fields: Vec<_> = class.fields().collect();
        fields.sort_by(|a, b| a.field.cmp(&b.field));
        for field in fields {
            let renamed_field = lens.lookup_field(&field.field);
            writeln!(
                out,
                "    {} {} -> {}",
                field.field.field_type().java_name(),
                field.field.name(),
                renamed_field.name()
            )?;
        }

        let mut methods: Vec<_> = class.methods().collect();
        methods.sort_by(|a, b| a.method.cmp(&b.method));
        for method in methods {
            let renamed_method = lens
                .lookup_method(&method.method, None, InvokeKind::Virtual)
                .method;
            let parameters: Vec<String> = method
                .method
                .proto()
                .parameters()
                .iter()
                .map(|p| p.java_name())
                .collect();
            writeln!(
                out,
                "    {} {}({}) -> {}",
                method.method.proto().return_type().java_name(),
                method.method.name(),
                parameters.join(","),
                renamed_method.name()
            )?;
        }
    }
    Ok(())
}
