use std::path::{Path, PathBuf};

use anyhow::Context;
use colored::Colorize;
use dexshrink_rules::{parse_rules_from_file, Rule, RuleConfig};
use serde::Serialize;
use walkdir::WalkDir;

#[derive(Serialize)]
struct RulesSummary {
    files: usize,
    keep_rules: usize,
    conditional_rules: usize,
    check_discard: usize,
    assumptions: usize,
    diagnostics_asked: usize,
    dont_warn_patterns: usize,
}

/// Parses every given rule file (directories are walked for `.pro` and
/// `.txt` files) and reports what was found; any parse error fails the run.
pub fn command_rules(paths: &[PathBuf], json: bool) -> anyhow::Result<()> {
    let files = collect_rule_files(paths);
    if files.is_empty() {
        anyhow::bail!("no rule files found");
    }

    let mut summary = RulesSummary {
        files: files.len(),
        keep_rules: 0,
        conditional_rules: 0,
        check_discard: 0,
        assumptions: 0,
        diagnostics_asked: 0,
        dont_warn_patterns: 0,
    };

    for file in &files {
        log::debug!("parsing {}", file.display());
        let config = parse_rules_from_file(file)
            .with_context(|| format!("in {}", file.display()))?;
        absorb(&config, &mut summary);
        if !json {
            let shown = file.display().to_string();
            println!("{} {}", "ok".green().bold(), shown.as_str().dimmed());
        }
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        println!(
            "{} files, {} keep rules, {} conditional, {} checkdiscard, {} assumptions",
            summary.files,
            summary.keep_rules,
            summary.conditional_rules,
            summary.check_discard,
            summary.assumptions
        );
    }
    Ok(())
}

fn absorb(config: &RuleConfig, summary: &mut RulesSummary) {
    for rule in &config.rules {
        match rule {
            Rule::Keep(_) => summary.keep_rules += 1,
            Rule::If(_) => summary.conditional_rules += 1,
            Rule::CheckDiscard(_) => summary.check_discard += 1,
            Rule::AssumeNoSideEffects(_) | Rule::AssumeValues(_) => summary.assumptions += 1,
            Rule::WhyAreYouKeeping(_) | Rule::WhyAreYouNotInlining(_) => {
                summary.diagnostics_asked += 1
            }
        }
    }
    summary.dont_warn_patterns += config.options.dont_warn.len();
}

fn collect_rule_files(paths: &[PathBuf]) -> Vec<PathBuf> {
    let mut files = Vec::new();
    for path in paths {
        if path.is_dir() {
            for entry in WalkDir::new(path)
                .sort_by_file_name()
                .into_iter()
                .filter_map(Result::ok)
            {
                if entry.file_type().is_file() && is_rule_file(entry.path()) {
                    files.push(entry.path().to_owned());
                }
            }
        } else {
            files.push(path.clone());
        }
    }
    files
}

fn is_rule_file(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("pro") | Some("txt") | Some("cfg")
    )
}
