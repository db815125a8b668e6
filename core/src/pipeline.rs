use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use ahash::AHashSet;
use dexshrink_model::{
    AppInfo, ClassRef, DexType, GraphLens, InvokeKind, ItemFactory, ItemRef, ServiceMapping,
};
use dexshrink_naming::{write_mapping, Minifier, ParsedMapping};
use dexshrink_rules::{build_root_set, RootSet, RuleConfig};
use dexshrink_shake::{
    merge_classes, prune_program, rebind_members, Enqueuer, EnqueuerConfig, LivenessView,
    ShakeDiagnostic,
};
use serde::Serialize;

use crate::diagnostics::{Diagnostic, Reporter};
use crate::errors::ShrinkError;
use crate::options::Options;
use crate::reader::{decode_services, read_classes, AppReader};
use crate::writer::{rewrite_class, ArtifactSink};

/// Machine-readable summary of one shrink run.
#[derive(Debug, Clone, Serialize)]
pub struct ShrinkStats {
    pub input_program_classes: usize,
    pub output_classes: usize,
    pub removed_items: usize,
    pub merged_classes: usize,
    pub synthesized_classes: usize,
}

/// Everything a front end needs after a successful run.
pub struct ShrinkResult {
    /// The final program, rewritten through the composed lens and sorted.
    pub classes: Vec<ClassRef>,
    /// The composed lens from original references to emitted references.
    pub lens: GraphLens,
    /// Proguard-compatible map, when `-printmapping` was requested.
    pub mapping: Option<String>,
    /// Seed lines, when `-printseeds` was requested.
    pub seeds: Option<Vec<String>>,
    /// One line per removed element, when `-printusage` was requested.
    pub usage: Option<Vec<String>>,
    pub stats: ShrinkStats,
    pub diagnostics: Vec<Diagnostic>,
}

/// Drives the stages in order: read, index, match rules, trace, prune,
/// rebind, merge, trace again, verify discards, minify, rewrite.
///
/// Stages are strictly sequential; each reads a snapshot of the previous
/// stage's output. A shared cancel flag aborts between units of work.
pub struct Pipeline {
    options: Options,
    cancel: Option<Arc<AtomicBool>>,
}

impl Pipeline {
    pub fn new(options: Options) -> Pipeline {
        Pipeline {
            options,
            cancel: None,
        }
    }

    pub fn with_cancel(mut self, cancel: Arc<AtomicBool>) -> Pipeline {
        self.cancel = Some(cancel);
        self
    }

    /// Runs the pipeline. `factory` must be the registry the reader interned
    /// its classes through; all identity comparisons depend on it.
    pub fn run(
        &self,
        factory: &Arc<ItemFactory>,
        reader: &dyn AppReader,
        rules: &RuleConfig,
    ) -> Result<ShrinkResult, ShrinkError> {
        let factory = factory.clone();
        let mut reporter = Reporter::new();

        let mut options = self.options.clone();
        options.merge_rule_options(&rules.options);
        let options = options.validate()?;

        // stage: read and index
        let all_classes = read_classes(reader);
        let input_program_classes = all_classes.iter().filter(|c| c.is_program()).count();
        let classpath_library: Vec<ClassRef> = all_classes
            .iter()
            .filter(|c| !c.is_program())
            .cloned()
            .collect();
        let mut services = decode_services(reader, &factory, &mut reporter);
        let app_info = AppInfo::build(factory.clone(), all_classes.iter().cloned())?;

        // stage: rules and roots
        let mut root_set = build_root_set(&app_info, rules)?;
        let seeds = options
            .print_seeds
            .as_ref()
            .map(|_| root_set.seed_lines());
        self.check_cancel()?;

        let enqueuer_config = |factory: &ItemFactory| EnqueuerConfig {
            keep_annotations: options.keep_annotations,
            ..EnqueuerConfig::new(factory.known())
        };

        // stage: first reachability round and tree-pruning
        let mut current_program: Vec<ClassRef>;
        let mut removed: Vec<ItemRef> = Vec::new();
        let mut synthesized_classes = 0;
        if options.tree_shaking {
            let view = self
                .enqueuer(&app_info, root_set, &services, enqueuer_config(&factory))
                .run()?;
            synthesized_classes = view.synthesized.len();
            self.absorb_shake_diagnostics(&view, &options, &mut reporter);
            self.report_reasons(&view, &mut reporter);
            self.fatal_boundary(&reporter)?;

            let pruned = prune_program(&app_info, &view);
            current_program = pruned.classes;
            removed = pruned.removed;
            services = services.pruned_copy(&view.live_types);
            root_set = view.root_set.pruned_copy(&view.live_types);
        } else {
            current_program = app_info.program_classes().cloned().collect();
            current_program.sort_by(|a, b| a.class_type.cmp(&b.class_type));
        }
        self.check_cancel()?;

        // stage: lens-producing rewrites between rounds
        let mut lens = GraphLens::identity();
        let mut merged_classes = 0;
        if options.optimize {
            let app_info = AppInfo::build(
                factory.clone(),
                current_program.iter().chain(&classpath_library).cloned(),
            )?;
            lens = rebind_members(&app_info, &root_set, lens);
            let merge = merge_classes(&app_info, &root_set, lens.clone());
            merged_classes = merge.merged.len();
            lens = merge.lens;
            current_program = merge
                .classes
                .iter()
                .map(|class| Arc::new(rewrite_class(class, &lens)))
                .collect();
            root_set = map_root_set(&root_set, &lens);
        }
        self.check_cancel()?;

        // stage: second reachability round on the rewritten program
        if options.tree_shaking {
            let app_info = AppInfo::build(
                factory.clone(),
                current_program.iter().chain(&classpath_library).cloned(),
            )?;
            let view = self
                .enqueuer(&app_info, root_set, &services, enqueuer_config(&factory))
                .run()?;
            self.absorb_shake_diagnostics(&view, &options, &mut reporter);
            self.fatal_boundary(&reporter)?;

            let pruned = prune_program(&app_info, &view);
            current_program = pruned.classes;
            removed.extend(pruned.removed);
            removed.sort();
            removed.dedup();
            root_set = view.root_set.pruned_copy(&view.live_types);
        }
        self.check_cancel()?;

        // stage: check-discard verification
        if options.discarded_checker {
            let survivors = surviving_discards(&root_set, &current_program, &lens);
            if !survivors.is_empty() {
                return Err(ShrinkError::CheckDiscardFailed { survivors });
            }
        }

        // stage: minification
        let final_lens = if options.minification {
            let applied = match root_set.apply_mapping.as_ref() {
                Some(path) => Some(ParsedMapping::from_file(path)?),
                None => None,
            };
            let app_info = AppInfo::build(
                factory.clone(),
                current_program.iter().chain(&classpath_library).cloned(),
            )?;
            let minifier = Minifier::new(
                &app_info,
                &root_set,
                options.repackage.clone(),
                applied.as_ref(),
            );
            minifier.compute_renaming(lens.clone())?
        } else {
            lens.clone()
        };
        self.check_cancel()?;

        // stage: artifacts and final rewrite
        let mapping = if options.print_mapping.is_some() {
            let mut buffer = Vec::new();
            write_mapping(&current_program, &final_lens, &mut buffer)?;
            Some(String::from_utf8(buffer).map_err(|_| {
                ShrinkError::Internal("mapping output is not UTF-8".to_owned())
            })?)
        } else {
            None
        };
        let usage = options.print_usage.as_ref().map(|_| {
            let mut lines: Vec<String> = removed.iter().map(|item| item.to_string()).collect();
            lines.sort();
            lines
        });

        // file-backed consumers open and close inside write_all, so a
        // failure on one never leaves another dangling
        if let (Some(target), Some(text)) = (&options.print_mapping, &mapping) {
            artifact_sink(target).write_all(text)?;
        }
        if let (Some(target), Some(lines)) = (&options.print_seeds, &seeds) {
            artifact_sink(target).write_all(&joined(lines))?;
        }
        if let (Some(target), Some(lines)) = (&options.print_usage, &usage) {
            artifact_sink(target).write_all(&joined(lines))?;
        }

        if !final_lens.is_context_free_for_methods() {
            return Err(ShrinkError::Internal(
                "final lens is not context-free for methods".to_owned(),
            ));
        }
        let mut classes: Vec<ClassRef> = current_program
            .iter()
            .map(|class| Arc::new(rewrite_class(class, &final_lens)))
            .collect();
        classes.sort_by(|a, b| a.class_type.cmp(&b.class_type));

        let stats = ShrinkStats {
            input_program_classes,
            output_classes: classes.len(),
            removed_items: removed.len(),
            merged_classes,
            synthesized_classes,
        };
        log::info!(
            "shrink finished: {} -> {} classes, {} items removed",
            stats.input_program_classes,
            stats.output_classes,
            stats.removed_items
        );

        Ok(ShrinkResult {
            classes,
            lens: final_lens,
            mapping,
            seeds,
            usage,
            stats,
            diagnostics: reporter.into_diagnostics(),
        })
    }

    fn enqueuer<'a>(
        &self,
        app_info: &'a AppInfo,
        root_set: RootSet,
        services: &'a ServiceMapping,
        config: EnqueuerConfig,
    ) -> Enqueuer<'a> {
        let enqueuer = Enqueuer::new(app_info, root_set, services, config);
        match &self.cancel {
            Some(cancel) => enqueuer.with_cancel(cancel.clone()),
            None => enqueuer,
        }
    }

    fn check_cancel(&self) -> Result<(), ShrinkError> {
        if let Some(cancel) = &self.cancel {
            if cancel.load(Ordering::Relaxed) {
                return Err(ShrinkError::Cancelled);
            }
        }
        Ok(())
    }

    /// Tracing problems become diagnostics according to the configuration:
    /// `-dontwarn` drops, `ignore_missing_classes` and `force_compatibility`
    /// downgrade, everything else is fatal at the next stage boundary.
    fn absorb_shake_diagnostics(
        &self,
        view: &LivenessView,
        options: &Options,
        reporter: &mut Reporter,
    ) {
        for diagnostic in &view.diagnostics {
            match diagnostic {
                ShakeDiagnostic::MissingClass { ty, context } => {
                    let java_name = ty.java_name();
                    if view.root_set.warning_suppressed(&java_name) {
                        continue;
                    }
                    let origin = context
                        .as_ref()
                        .map(|c| c.java_name())
                        .unwrap_or_default();
                    let message = format!("missing class {java_name}");
                    if options.ignore_missing_classes {
                        reporter.report(Diagnostic::warning(origin, message));
                    } else {
                        reporter.report(Diagnostic::error(origin, message));
                    }
                }
                ShakeDiagnostic::Resolution { message, context } => {
                    let origin = context.smali_string();
                    if options.force_compatibility {
                        reporter.report(Diagnostic::warning(origin, message.clone()));
                    } else {
                        reporter.report(Diagnostic::error(origin, message.clone()));
                    }
                }
            }
        }
    }

    /// `-whyareyoukeeping` and `-whyareyounotinlining` answers, one info
    /// diagnostic per asked item.
    fn report_reasons(&self, view: &LivenessView, reporter: &mut Reporter) {
        let mut asked: Vec<&ItemRef> = view.root_set.reasons_asked.iter().collect();
        asked.sort();
        for item in asked {
            let chain = view.reason_chain(item);
            let message = if chain.is_empty() {
                format!("{item} is not kept")
            } else {
                chain.join("\n  ")
            };
            reporter.report(Diagnostic::info(item.to_string(), message));
        }

        let mut not_inlined: Vec<&ItemRef> = view.root_set.not_inlining_asked.iter().collect();
        not_inlined.sort();
        for item in not_inlined {
            reporter.report(Diagnostic::info(
                item.to_string(),
                "not inlined: no per-method optimizer is configured",
            ));
        }
    }

    fn fatal_boundary(&self, reporter: &Reporter) -> Result<(), ShrinkError> {
        if !reporter.has_errors() {
            return Ok(());
        }
        let sorted = reporter.sorted();
        let first = sorted
            .first()
            .map(|d| d.message.clone())
            .unwrap_or_default();
        let count = reporter.error_count();
        if first.starts_with("missing class") {
            Err(ShrinkError::MissingClasses { count, first })
        } else {
            Err(ShrinkError::ResolutionFailures { count, first })
        }
    }
}

fn artifact_sink(target: &Option<std::path::PathBuf>) -> ArtifactSink {
    match target {
        Some(path) => ArtifactSink::file(path.clone()),
        None => ArtifactSink::stdout(),
    }
}

fn joined(lines: &[String]) -> String {
    let mut text = lines.join("\n");
    text.push('\n');
    text
}

/// Rewrites every reference the root set holds through a lens, so the
/// second round sees the same identities as the first.
fn map_root_set(root_set: &RootSet, lens: &GraphLens) -> RootSet {
    let map_item = |item: &ItemRef| -> ItemRef {
        match item {
            ItemRef::Type(ty) => ItemRef::Type(lens.lookup_type(ty)),
            ItemRef::Field(field) => ItemRef::Field(lens.lookup_field(field)),
            ItemRef::Method(method) => {
                ItemRef::Method(lens.lookup_method(method, None, InvokeKind::Virtual).method)
            }
        }
    };
    let map_type_set = |set: &AHashSet<DexType>| -> AHashSet<DexType> {
        set.iter().map(|ty| lens.lookup_type(ty)).collect()
    };

    let mut mapped = root_set.clone();
    mapped.live_types = map_type_set(&root_set.live_types);
    mapped.instantiated_types = map_type_set(&root_set.instantiated_types);
    mapped.live_fields = root_set
        .live_fields
        .iter()
        .map(|f| lens.lookup_field(f))
        .collect();
    mapped.live_methods = root_set
        .live_methods
        .iter()
        .map(|m| lens.lookup_method(m, None, InvokeKind::Virtual).method)
        .collect();
    mapped.pinned = root_set.pinned.iter().map(|i| map_item(i)).collect();
    mapped.no_obfuscation = root_set.no_obfuscation.iter().map(|i| map_item(i)).collect();
    mapped.no_shrinking = root_set.no_shrinking.iter().map(|i| map_item(i)).collect();
    mapped.no_access_modification = root_set
        .no_access_modification
        .iter()
        .map(|i| map_item(i))
        .collect();
    mapped.check_discard = root_set.check_discard.iter().map(|i| map_item(i)).collect();
    mapped.assume_no_side_effects = root_set
        .assume_no_side_effects
        .iter()
        .map(|m| lens.lookup_method(m, None, InvokeKind::Virtual).method)
        .collect();
    mapped.assume_values = root_set.assume_values.iter().map(|i| map_item(i)).collect();
    mapped.reasons_asked = root_set.reasons_asked.iter().map(|i| map_item(i)).collect();
    mapped.not_inlining_asked = root_set
        .not_inlining_asked
        .iter()
        .map(|i| map_item(i))
        .collect();
    mapped.conditional_members = root_set
        .conditional_members
        .iter()
        .map(|(ty, members)| {
            let holder = lens.lookup_type(ty);
            let members = members
                .iter()
                .map(|conditional| dexshrink_rules::ConditionalMembers {
                    holder: holder.clone(),
                    fields: conditional
                        .fields
                        .iter()
                        .map(|f| lens.lookup_field(f))
                        .collect(),
                    methods: conditional
                        .methods
                        .iter()
                        .map(|m| lens.lookup_method(m, None, InvokeKind::Virtual).method)
                        .collect(),
                })
                .collect();
            (holder, members)
        })
        .collect();
    mapped
}

/// `-checkdiscard` references still present after pruning, sorted.
fn surviving_discards(
    root_set: &RootSet,
    program: &[ClassRef],
    lens: &GraphLens,
) -> Vec<String> {
    let mut survivors = Vec::new();
    for item in &root_set.check_discard {
        let mapped = match item {
            ItemRef::Type(ty) => ItemRef::Type(lens.lookup_type(ty)),
            ItemRef::Field(field) => ItemRef::Field(lens.lookup_field(field)),
            ItemRef::Method(method) => {
                ItemRef::Method(lens.lookup_method(method, None, InvokeKind::Virtual).method)
            }
        };
        let holder = mapped.holder_type();
        let Some(class) = program.iter().find(|c| &c.class_type == holder) else {
            continue;
        };
        let present = match &mapped {
            ItemRef::Type(_) => true,
            ItemRef::Field(field) => class.lookup_field(field).is_some(),
            ItemRef::Method(method) => class.lookup_method(method).is_some(),
        };
        if present {
            survivors.push(item.to_string());
        }
    }
    survivors.sort();
    survivors
}
