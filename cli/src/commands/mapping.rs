use std::path::Path;

use anyhow::Context;
use colored::Colorize;
use dexshrink_naming::ParsedMapping;
use serde::Serialize;

#[derive(Serialize)]
struct MappingSummary {
    classes: usize,
    fields: usize,
    methods: usize,
    with_line_ranges: usize,
}

/// Parses a proguard map, printing either a summary or the normalized map.
pub fn command_mapping(path: &Path, normalize: bool, json: bool) -> anyhow::Result<()> {
    let mapping = ParsedMapping::from_file(path)
        .with_context(|| format!("in {}", path.display()))?;

    if normalize {
        for class in &mapping.classes {
            println!("{} -> {}:", class.original, class.renamed);
            for member in &class.members {
                match &member.parameters {
                    Some(parameters) => println!(
                        "    {} {}({}) -> {}",
                        member.member_type,
                        member.original_name,
                        parameters.join(","),
                        member.renamed_name
                    ),
                    None => println!(
                        "    {} {} -> {}",
                        member.member_type, member.original_name, member.renamed_name
                    ),
                }
            }
        }
        return Ok(());
    }

    let mut summary = MappingSummary {
        classes: mapping.classes.len(),
        fields: 0,
        methods: 0,
        with_line_ranges: 0,
    };
    for class in &mapping.classes {
        for member in &class.members {
            if member.is_method {
                summary.methods += 1;
            } else {
                summary.fields += 1;
            }
            if member.line_range.is_some() {
                summary.with_line_ranges += 1;
            }
        }
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        let shown = path.display().to_string();
        println!(
            "{} {}: {} classes, {} fields, {} methods",
            "ok".green().bold(),
            shown.as_str().dimmed(),
            summary.classes,
            summary.fields,
            summary.methods
        );
    }
    Ok(())
}
