use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use ahash::{AHashMap, AHashSet};
use dexshrink_model::{
    AccessFlags, AppInfo, CallSite, ClassKind, ClassRef, Code, DexAnnotation, DexClass,
    DexEncodedMethod, DexField, DexMethod, DexString, DexType, DexValue, FieldResolutionResult,
    Instruction, ItemRef, MethodHandle, MethodResolutionResult, Origin, ResolvedMethod,
    ServiceMapping, WellKnownItems,
};
use dexshrink_rules::{evaluate_if_rule, RootSet};
use rayon::prelude::*;

use crate::errors::ShakeError;
use crate::registry::{trace_method, CollectingRegistry, TracedUse};

/// Reflective idioms recognized syntactically during tracing. The set is a
/// configuration constant; callers can extend it.
#[derive(Debug, Clone)]
pub struct ReflectiveIdioms {
    pub class_lookups: Vec<DexMethod>,
    pub method_lookups: Vec<DexMethod>,
    pub field_lookups: Vec<DexMethod>,
    pub service_loader_load: DexMethod,
}

impl ReflectiveIdioms {
    pub fn default_set(known: &WellKnownItems) -> ReflectiveIdioms {
        ReflectiveIdioms {
            class_lookups: vec![known.class_for_name.clone()],
            method_lookups: vec![
                known.class_get_method.clone(),
                known.class_get_declared_method.clone(),
            ],
            field_lookups: vec![
                known.class_get_field.clone(),
                known.class_get_declared_field.clone(),
            ],
            service_loader_load: known.service_loader_load.clone(),
        }
    }
}

/// Tuning knobs of one reachability round.
#[derive(Debug, Clone)]
pub struct EnqueuerConfig {
    /// Scan annotations of live items and keep what they reference.
    pub keep_annotations: bool,
    pub idioms: ReflectiveIdioms,
}

impl EnqueuerConfig {
    pub fn new(known: &WellKnownItems) -> EnqueuerConfig {
        EnqueuerConfig {
            keep_annotations: true,
            idioms: ReflectiveIdioms::default_set(known),
        }
    }
}

/// Per-field access record kept for every live field reference.
#[derive(Debug, Default, Clone)]
pub struct FieldAccessInfo {
    pub reads: AHashSet<DexMethod>,
    pub writes: AHashSet<DexMethod>,
    pub read_reflectively: bool,
    pub read_from_annotation: bool,
    pub method_handle_read: bool,
    pub method_handle_write: bool,
}

impl FieldAccessInfo {
    pub fn is_written(&self) -> bool {
        !self.writes.is_empty() || self.method_handle_write
    }

    pub fn is_read(&self) -> bool {
        !self.reads.is_empty()
            || self.read_reflectively
            || self.read_from_annotation
            || self.method_handle_read
    }
}

/// Why an item became live, for `-whyareyoukeeping` output.
#[derive(Debug, Clone)]
pub enum KeptReason {
    KeepRule,
    ConditionalRule(DexType),
    ReferencedFrom(DexMethod),
    SupertypeOf(DexType),
    HolderOf(ItemRef),
    InstantiatedIn(DexMethod),
    ServiceImplementation(DexType),
    AnnotatedOn(ItemRef),
    Reflective(DexMethod),
    SynthesizedLambda(DexType),
}

impl KeptReason {
    /// The item one step closer to a root, if any.
    fn parent(&self) -> Option<ItemRef> {
        match self {
            KeptReason::KeepRule => None,
            KeptReason::ConditionalRule(ty) => Some(ItemRef::Type(ty.clone())),
            KeptReason::ReferencedFrom(method) => Some(ItemRef::Method(method.clone())),
            KeptReason::SupertypeOf(ty) => Some(ItemRef::Type(ty.clone())),
            KeptReason::HolderOf(item) => Some(item.clone()),
            KeptReason::InstantiatedIn(method) => Some(ItemRef::Method(method.clone())),
            KeptReason::ServiceImplementation(ty) => Some(ItemRef::Type(ty.clone())),
            KeptReason::AnnotatedOn(item) => Some(item.clone()),
            KeptReason::Reflective(method) => Some(ItemRef::Method(method.clone())),
            KeptReason::SynthesizedLambda(ty) => Some(ItemRef::Type(ty.clone())),
        }
    }
}

impl fmt::Display for KeptReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeptReason::KeepRule => f.write_str("kept by a keep rule"),
            KeptReason::ConditionalRule(ty) => write!(f, "kept because {ty} is live"),
            KeptReason::ReferencedFrom(m) => write!(f, "referenced from {}", m.smali_string()),
            KeptReason::SupertypeOf(ty) => write!(f, "supertype of {ty}"),
            KeptReason::HolderOf(item) => write!(f, "holder of {item}"),
            KeptReason::InstantiatedIn(m) => write!(f, "instantiated in {}", m.smali_string()),
            KeptReason::ServiceImplementation(ty) => write!(f, "implementation of service {ty}"),
            KeptReason::AnnotatedOn(item) => write!(f, "referenced by an annotation on {item}"),
            KeptReason::Reflective(m) => write!(f, "reflected upon in {}", m.smali_string()),
            KeptReason::SynthesizedLambda(ty) => write!(f, "lambda synthesized as {ty}"),
        }
    }
}

/// A problem found while tracing; never aborts the round.
#[derive(Debug, Clone)]
pub enum ShakeDiagnostic {
    MissingClass {
        ty: DexType,
        context: Option<DexType>,
    },
    Resolution {
        message: String,
        context: DexMethod,
    },
}

/// Output of one reachability round.
pub struct LivenessView {
    pub root_set: RootSet,
    pub live_types: AHashSet<DexType>,
    pub instantiated_types: AHashSet<DexType>,
    pub live_methods: AHashSet<DexMethod>,
    /// Resolved references seen as targets of virtual/interface invokes;
    /// their declarations survive pruning even when never dispatched to.
    pub virtual_targets: AHashSet<DexMethod>,
    pub field_access: AHashMap<DexField, FieldAccessInfo>,
    pub reflective: AHashSet<ItemRef>,
    pub reasons: AHashMap<ItemRef, KeptReason>,
    /// Lambda classes created during this round, in creation order.
    pub synthesized: Vec<ClassRef>,
    /// Call sites with unrecognized bootstraps, kept for reporting.
    pub call_sites: Vec<(Arc<CallSite>, DexMethod)>,
    pub diagnostics: Vec<ShakeDiagnostic>,
}

impl LivenessView {
    pub fn is_field_live(&self, field: &DexField) -> bool {
        self.field_access.contains_key(field)
    }

    /// Walks the reason graph from an item back to a root, one line per edge.
    pub fn reason_chain(&self, item: &ItemRef) -> Vec<String> {
        let mut lines = Vec::new();
        let mut current = item.clone();
        let mut visited = AHashSet::new();
        while visited.insert(current.clone()) {
            let Some(reason) = self.reasons.get(&current) else {
                break;
            };
            lines.push(format!("{current} is {reason}"));
            match reason.parent() {
                Some(parent) => current = parent,
                None => break,
            }
        }
        lines
    }
}

enum WorkItem {
    TypeLive(DexType),
    Instantiated(DexType),
    MethodLive(DexMethod),
}

/// The reachability fixed point.
///
/// Worklist items are processed one at a time; batches of method bodies are
/// traced on worker threads with per-worker use buffers merged back on the
/// single-threaded drain, so the live sets stay single-writer. The lattice is
/// the powerset of interned references and every transition is monotone, so
/// the loop terminates.
pub struct Enqueuer<'a> {
    app_info: &'a AppInfo,
    services: &'a ServiceMapping,
    config: EnqueuerConfig,
    cancel: Option<Arc<AtomicBool>>,

    root_set: RootSet,
    live_types: AHashSet<DexType>,
    instantiated_types: AHashSet<DexType>,
    live_methods: AHashSet<DexMethod>,
    virtual_targets: AHashSet<DexMethod>,
    field_access: AHashMap<DexField, FieldAccessInfo>,
    reflective: AHashSet<ItemRef>,
    /// Resolutions recorded per resolved method so later instantiations can
    /// complete their dispatches retroactively.
    pending_dispatches: AHashMap<DexMethod, ResolvedMethod>,
    reasons: AHashMap<ItemRef, KeptReason>,
    traced: AHashSet<DexMethod>,
    diagnostics: Vec<ShakeDiagnostic>,
    reported_missing: AHashSet<DexType>,

    worklist: VecDeque<WorkItem>,
    trace_queue: Vec<DexMethod>,

    synthesized: AHashMap<DexType, ClassRef>,
    synthesized_order: Vec<DexType>,
    lambda_cache: AHashMap<(DexType, DexMethod), DexType>,
    call_sites: Vec<(Arc<CallSite>, DexMethod)>,
    applied_if_rules: AHashSet<usize>,
}

impl<'a> Enqueuer<'a> {
    pub fn new(
        app_info: &'a AppInfo,
        root_set: RootSet,
        services: &'a ServiceMapping,
        config: EnqueuerConfig,
    ) -> Enqueuer<'a> {
        Enqueuer {
            app_info,
            services,
            config,
            cancel: None,
            root_set,
            live_types: AHashSet::new(),
            instantiated_types: AHashSet::new(),
            live_methods: AHashSet::new(),
            virtual_targets: AHashSet::new(),
            field_access: AHashMap::new(),
            reflective: AHashSet::new(),
            pending_dispatches: AHashMap::new(),
            reasons: AHashMap::new(),
            traced: AHashSet::new(),
            diagnostics: Vec::new(),
            reported_missing: AHashSet::new(),
            worklist: VecDeque::new(),
            trace_queue: Vec::new(),
            synthesized: AHashMap::new(),
            synthesized_order: Vec::new(),
            lambda_cache: AHashMap::new(),
            call_sites: Vec::new(),
            applied_if_rules: AHashSet::new(),
        }
    }

    pub fn with_cancel(mut self, cancel: Arc<AtomicBool>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// Runs the fixed point to completion.
    pub fn run(mut self) -> Result<LivenessView, ShakeError> {
        self.seed();

        loop {
            if let Some(cancel) = &self.cancel {
                if cancel.load(Ordering::Relaxed) {
                    return Err(ShakeError::Cancelled);
                }
            }

            if let Some(item) = self.worklist.pop_front() {
                match item {
                    WorkItem::TypeLive(ty) => self.transition_type_live(&ty),
                    WorkItem::Instantiated(ty) => self.transition_instantiated(&ty),
                    WorkItem::MethodLive(method) => self.transition_method_live(&method),
                }
                continue;
            }

            if !self.trace_queue.is_empty() {
                self.drain_trace_queue();
                continue;
            }

            // primary worklists are empty; conditional keeps may still fire
            if self.evaluate_if_rules() {
                continue;
            }
            break;
        }

        log::debug!(
            "fixed point: {} live types, {} live methods, {} live fields",
            self.live_types.len(),
            self.live_methods.len(),
            self.field_access.len()
        );

        let synthesized = self
            .synthesized_order
            .iter()
            .map(|ty| self.synthesized[ty].clone())
            .collect();

        Ok(LivenessView {
            root_set: self.root_set,
            live_types: self.live_types,
            instantiated_types: self.instantiated_types,
            live_methods: self.live_methods,
            virtual_targets: self.virtual_targets,
            field_access: self.field_access,
            reflective: self.reflective,
            reasons: self.reasons,
            synthesized,
            call_sites: self.call_sites,
            diagnostics: self.diagnostics,
        })
    }

    fn seed(&mut self) {
        let types: Vec<DexType> = self.root_set.live_types.iter().cloned().collect();
        for ty in types {
            self.mark_type_live(&ty, KeptReason::KeepRule);
        }
        let instantiated: Vec<DexType> =
            self.root_set.instantiated_types.iter().cloned().collect();
        for ty in instantiated {
            self.mark_instantiated(&ty, KeptReason::KeepRule);
        }
        let methods: Vec<DexMethod> = self.root_set.live_methods.iter().cloned().collect();
        for method in methods {
            self.mark_method_live(method, KeptReason::KeepRule);
        }
        let fields: Vec<DexField> = self.root_set.live_fields.iter().cloned().collect();
        for field in fields {
            self.mark_field_live(&field, KeptReason::KeepRule);
        }
    }

    /// Class definition lookup that also sees this round's synthetics.
    fn class_for(&self, ty: &DexType) -> Option<ClassRef> {
        self.synthesized
            .get(ty)
            .cloned()
            .or_else(|| self.app_info.definition_for(ty).cloned())
    }

    fn report_missing(&mut self, ty: &DexType, context: Option<&DexType>) {
        if !self.reported_missing.insert(ty.clone()) {
            return;
        }
        self.diagnostics.push(ShakeDiagnostic::MissingClass {
            ty: ty.clone(),
            context: context.cloned(),
        });
    }

    fn mark_type_live(&mut self, ty: &DexType, reason: KeptReason) {
        let ty = if ty.is_array() {
            // arrays keep their element class
            let Some(element) = ty.array_element_descriptor() else {
                return;
            };
            match self.app_info.factory().create_type(element) {
                Ok(element) => element,
                Err(_) => return,
            }
        } else {
            ty.clone()
        };
        if !ty.is_class() {
            return;
        }
        let Some(class) = self.class_for(&ty) else {
            self.report_missing(&ty, None);
            return;
        };
        if class.kind != ClassKind::Program {
            return;
        }
        if !self.live_types.insert(ty.clone()) {
            return;
        }
        self.reasons.entry(ItemRef::Type(ty.clone())).or_insert(reason);
        self.worklist.push_back(WorkItem::TypeLive(ty));
    }

    /// Transition 1: a type became live.
    fn transition_type_live(&mut self, ty: &DexType) {
        let Some(class) = self.class_for(ty) else {
            return;
        };

        if let Some(super_type) = &class.super_type {
            self.mark_type_live(super_type, KeptReason::SupertypeOf(ty.clone()));
        }
        for interface in &class.interfaces {
            self.mark_type_live(interface, KeptReason::SupertypeOf(ty.clone()));
        }

        if let Some(clinit) = class.class_initializer() {
            self.mark_method_live(
                clinit.method.clone(),
                KeptReason::HolderOf(ItemRef::Type(ty.clone())),
            );
        }

        // `-keepclassmembers` rules predicated on this type
        if let Some(conditionals) = self.root_set.conditional_members.get(ty) {
            let conditionals = conditionals.clone();
            for conditional in conditionals {
                for field in conditional.fields {
                    self.mark_field_live(&field, KeptReason::ConditionalRule(ty.clone()));
                }
                for method in conditional.methods {
                    if method.is_instance_initializer() {
                        self.mark_instantiated(ty, KeptReason::ConditionalRule(ty.clone()));
                    }
                    self.mark_method_live(method, KeptReason::ConditionalRule(ty.clone()));
                }
            }
        }

        if self.config.keep_annotations {
            let annotations = class.annotations.clone();
            self.scan_annotations(&annotations, ItemRef::Type(ty.clone()));
        }
    }

    fn mark_instantiated(&mut self, ty: &DexType, reason: KeptReason) {
        if self.instantiated_types.contains(ty) {
            return;
        }
        let Some(class) = self.class_for(ty) else {
            self.report_missing(ty, None);
            return;
        };
        if class.kind != ClassKind::Program {
            return;
        }
        self.instantiated_types.insert(ty.clone());
        self.mark_type_live(ty, reason);
        self.worklist.push_back(WorkItem::Instantiated(ty.clone()));
    }

    /// Transition 2: a type became instantiated; complete recorded virtual
    /// dispatches retroactively.
    fn transition_instantiated(&mut self, ty: &DexType) {
        let matching: Vec<ResolvedMethod> = self
            .pending_dispatches
            .values()
            .filter(|resolved| self.app_info.is_subtype(ty, resolved.method.holder()))
            .cloned()
            .collect();
        for resolved in matching {
            if let Some(target) = self.app_info.dispatch_target(ty, &resolved) {
                if target.class.is_program() {
                    self.mark_method_live(
                        target.method,
                        KeptReason::ReferencedFrom(resolved.method.clone()),
                    );
                }
            }
        }
    }

    fn mark_method_live(&mut self, method: DexMethod, reason: KeptReason) {
        if !self.live_methods.insert(method.clone()) {
            return;
        }
        self.reasons
            .entry(ItemRef::Method(method.clone()))
            .or_insert(reason);
        self.worklist.push_back(WorkItem::MethodLive(method));
    }

    /// Transition 3: a method became live.
    fn transition_method_live(&mut self, method: &DexMethod) {
        self.mark_type_live(
            method.holder(),
            KeptReason::HolderOf(ItemRef::Method(method.clone())),
        );

        if method.is_instance_initializer() {
            self.mark_instantiated(
                method.holder(),
                KeptReason::HolderOf(ItemRef::Method(method.clone())),
            );
        }

        let Some(class) = self.class_for(method.holder()) else {
            return;
        };
        let Some(definition) = class.lookup_method(method) else {
            return;
        };

        if self.config.keep_annotations {
            let mut annotations = definition.annotations.clone();
            for parameter in &definition.parameter_annotations {
                annotations.extend(parameter.iter().cloned());
            }
            self.scan_annotations(&annotations, ItemRef::Method(method.clone()));
        }

        if definition.code.is_some() && !self.traced.contains(method) {
            self.trace_queue.push(method.clone());
        }
    }

    fn mark_field_live(&mut self, field: &DexField, reason: KeptReason) {
        let newly_live = !self.field_access.contains_key(field);
        self.field_access.entry(field.clone()).or_default();
        if !newly_live {
            return;
        }
        self.reasons
            .entry(ItemRef::Field(field.clone()))
            .or_insert(reason);
        self.mark_type_live(
            field.holder(),
            KeptReason::HolderOf(ItemRef::Field(field.clone())),
        );
        self.mark_type_live(
            field.field_type(),
            KeptReason::HolderOf(ItemRef::Field(field.clone())),
        );

        if self.config.keep_annotations {
            if let Some(class) = self.class_for(field.holder()) {
                if let Some(definition) = class.lookup_field(field) {
                    let annotations = definition.annotations.clone();
                    self.scan_annotations(&annotations, ItemRef::Field(field.clone()));
                }
            }
        }
    }

    /// Transition 6: annotations of a live item keep what they reference.
    fn scan_annotations(&mut self, annotations: &[DexAnnotation], owner: ItemRef) {
        for annotation in annotations {
            self.mark_type_live(
                &annotation.annotation_type,
                KeptReason::AnnotatedOn(owner.clone()),
            );
            for (_, value) in &annotation.elements {
                self.scan_annotation_value(value, &owner);
            }
        }
    }

    fn scan_annotation_value(&mut self, value: &DexValue, owner: &ItemRef) {
        match value {
            DexValue::Type(ty) => {
                self.mark_type_live(ty, KeptReason::AnnotatedOn(owner.clone()));
            }
            DexValue::Field(field) => {
                self.mark_field_live(field, KeptReason::AnnotatedOn(owner.clone()));
                if let Some(info) = self.field_access.get_mut(field) {
                    info.read_from_annotation = true;
                }
            }
            DexValue::Method(method) => {
                self.mark_method_live(method.clone(), KeptReason::AnnotatedOn(owner.clone()));
            }
            DexValue::Array(values) => {
                for value in values {
                    self.scan_annotation_value(value, owner);
                }
            }
            DexValue::Annotation(inner) => {
                self.mark_type_live(
                    &inner.annotation_type,
                    KeptReason::AnnotatedOn(owner.clone()),
                );
                for (_, value) in &inner.elements {
                    self.scan_annotation_value(value, owner);
                }
            }
            _ => {}
        }
    }

    /// Drains the current trace batch on worker threads and merges the
    /// per-method use buffers back on this thread.
    fn drain_trace_queue(&mut self) {
        let batch: Vec<DexMethod> = std::mem::take(&mut self.trace_queue);
        let mut units: Vec<(DexMethod, ClassRef)> = Vec::with_capacity(batch.len());
        for method in batch {
            if !self.traced.insert(method.clone()) {
                continue;
            }
            if let Some(class) = self.class_for(method.holder()) {
                units.push((method, class));
            }
        }

        let results: Vec<(DexMethod, Vec<TracedUse>)> = units
            .par_iter()
            .map(|(method, class)| {
                let mut registry = CollectingRegistry::default();
                if let Some(definition) = class.lookup_method(method) {
                    trace_method(definition, &mut registry);
                }
                (method.clone(), registry.uses)
            })
            .collect();

        for (context, uses) in results {
            self.process_traced_uses(&context, uses);
        }
    }

    /// Transition 4: apply every reference a traced body reported.
    fn process_traced_uses(&mut self, context: &DexMethod, uses: Vec<TracedUse>) {
        // window for the syntactic reflective idioms: the most recent string
        // and class constants, cleared by any invoke
        let mut last_string: Option<DexString> = None;
        let mut last_class: Option<DexType> = None;

        for traced in uses {
            match traced {
                TracedUse::ConstString(value) => {
                    last_string = Some(value);
                }
                TracedUse::ConstClass(ty) => {
                    self.mark_type_live(&ty, KeptReason::ReferencedFrom(context.clone()));
                    last_class = Some(ty);
                }
                TracedUse::TypeReference(ty) => {
                    self.mark_type_live(&ty, KeptReason::ReferencedFrom(context.clone()));
                }
                TracedUse::NewInstance(ty) => {
                    self.mark_instantiated(&ty, KeptReason::InstantiatedIn(context.clone()));
                }
                TracedUse::InvokeStatic(target) => {
                    self.process_static_invoke(context, &target, &last_string, &last_class);
                    last_string = None;
                    last_class = None;
                }
                TracedUse::InvokeDirect(target) => {
                    self.process_direct_invoke(context, &target);
                    last_string = None;
                    last_class = None;
                }
                TracedUse::InvokeSuper(target) => {
                    self.process_super_invoke(context, &target);
                    last_string = None;
                    last_class = None;
                }
                TracedUse::InvokeVirtual(target) | TracedUse::InvokeInterface(target) => {
                    self.process_virtual_invoke(context, &target, &last_string, &last_class);
                    last_string = None;
                    last_class = None;
                }
                TracedUse::FieldRead { field, .. } => {
                    self.process_field_access(context, &field, false, None);
                }
                TracedUse::FieldWrite { field, .. } => {
                    self.process_field_access(context, &field, true, None);
                }
                TracedUse::MethodHandle(handle) => {
                    self.process_method_handle(context, &handle);
                }
                TracedUse::CallSite(call_site) => {
                    self.process_call_site(context, call_site);
                }
            }
        }
    }

    fn process_static_invoke(
        &mut self,
        context: &DexMethod,
        target: &DexMethod,
        last_string: &Option<DexString>,
        last_class: &Option<DexType>,
    ) {
        // transition 5: ServiceLoader.load(S.class)
        if target == &self.config.idioms.service_loader_load {
            if let Some(service) = last_class {
                self.process_service_load(context, &service.clone());
            }
            return;
        }
        // transition 7: Class.forName("...")
        if self.config.idioms.class_lookups.contains(target) {
            if let Some(name) = last_string {
                self.process_reflective_class(context, &name.clone());
            }
            return;
        }
        self.resolve_and_mark_invoke(context, target.holder(), target);
    }

    fn process_direct_invoke(&mut self, context: &DexMethod, target: &DexMethod) {
        self.resolve_and_mark_invoke(context, target.holder(), target);
    }

    fn process_super_invoke(&mut self, context: &DexMethod, target: &DexMethod) {
        let Some(holder_class) = self.class_for(context.holder()) else {
            return;
        };
        let Some(super_type) = holder_class.super_type.clone() else {
            return;
        };
        self.resolve_and_mark_invoke(context, &super_type, target);
    }

    fn resolve_and_mark_invoke(
        &mut self,
        context: &DexMethod,
        receiver: &DexType,
        target: &DexMethod,
    ) {
        match self
            .app_info
            .resolve_method_in_context(receiver, target, context.holder())
        {
            MethodResolutionResult::Found(resolved) => {
                if resolved.class.is_program() {
                    self.mark_method_live(
                        resolved.method,
                        KeptReason::ReferencedFrom(context.clone()),
                    );
                } else {
                    // library targets stay untouched, their holder is
                    // referenced though
                    self.mark_type_live(
                        resolved.method.holder(),
                        KeptReason::ReferencedFrom(context.clone()),
                    );
                }
            }
            MethodResolutionResult::ClassMissing(ty) => {
                self.report_missing(&ty, Some(context.holder()));
            }
            failure => {
                self.diagnostics.push(ShakeDiagnostic::Resolution {
                    message: resolution_failure_message(&failure, target),
                    context: context.clone(),
                });
            }
        }
    }

    fn process_virtual_invoke(
        &mut self,
        context: &DexMethod,
        target: &DexMethod,
        last_string: &Option<DexString>,
        last_class: &Option<DexType>,
    ) {
        // transition 7: Class.getDeclaredMethod / getDeclaredField family
        if self.config.idioms.method_lookups.contains(target) {
            if let (Some(receiver), Some(name)) = (last_class, last_string) {
                self.process_reflective_method(context, &receiver.clone(), &name.clone());
            }
            return;
        }
        if self.config.idioms.field_lookups.contains(target) {
            if let (Some(receiver), Some(name)) = (last_class, last_string) {
                self.process_reflective_field(context, &receiver.clone(), &name.clone());
            }
            return;
        }

        match self
            .app_info
            .resolve_method_in_context(target.holder(), target, context.holder())
        {
            MethodResolutionResult::Found(resolved) => {
                self.mark_type_live(
                    resolved.method.holder(),
                    KeptReason::ReferencedFrom(context.clone()),
                );
                if resolved.class.is_program() {
                    self.virtual_targets.insert(resolved.method.clone());
                    self.reasons
                        .entry(ItemRef::Method(resolved.method.clone()))
                        .or_insert_with(|| KeptReason::ReferencedFrom(context.clone()));
                }
                // dispatch into every receiver type known so far; future
                // instantiations complete retroactively via the recorded
                // resolution
                let targets = self
                    .app_info
                    .lookup_virtual_dispatch_targets(&resolved, &self.instantiated_types);
                self.pending_dispatches
                    .insert(resolved.method.clone(), resolved);
                for dispatch in targets {
                    self.mark_method_live(
                        dispatch.method,
                        KeptReason::ReferencedFrom(context.clone()),
                    );
                }
            }
            MethodResolutionResult::ClassMissing(ty) => {
                self.report_missing(&ty, Some(context.holder()));
            }
            failure => {
                self.diagnostics.push(ShakeDiagnostic::Resolution {
                    message: resolution_failure_message(&failure, target),
                    context: context.clone(),
                });
            }
        }
    }

    fn process_field_access(
        &mut self,
        context: &DexMethod,
        field: &DexField,
        is_write: bool,
        handle: Option<&MethodHandle>,
    ) {
        match self
            .app_info
            .resolve_field_in_context(field.holder(), field, context.holder())
        {
            FieldResolutionResult::Found(resolved) => {
                if !resolved.class.is_program() {
                    self.mark_type_live(
                        resolved.field.holder(),
                        KeptReason::ReferencedFrom(context.clone()),
                    );
                    return;
                }
                self.mark_field_live(
                    &resolved.field,
                    KeptReason::ReferencedFrom(context.clone()),
                );
                let info = self.field_access.entry(resolved.field).or_default();
                if is_write {
                    info.writes.insert(context.clone());
                } else {
                    info.reads.insert(context.clone());
                }
                if let Some(handle) = handle {
                    if handle.is_field_write() {
                        info.method_handle_write = true;
                    } else {
                        info.method_handle_read = true;
                    }
                }
            }
            FieldResolutionResult::ClassMissing(ty) => {
                self.report_missing(&ty, Some(context.holder()));
            }
            FieldResolutionResult::NoSuchField { receiver, field } => {
                self.diagnostics.push(ShakeDiagnostic::Resolution {
                    message: format!("no such field {} on {receiver}", field.smali_string()),
                    context: context.clone(),
                });
            }
            FieldResolutionResult::Inaccessible { field, .. } => {
                self.diagnostics.push(ShakeDiagnostic::Resolution {
                    message: format!("{} is not accessible", field.smali_string()),
                    context: context.clone(),
                });
            }
        }
    }

    fn process_method_handle(&mut self, context: &DexMethod, handle: &MethodHandle) {
        if let Some(method) = handle.method() {
            self.resolve_and_mark_invoke(context, method.holder(), method);
            self.reflective.insert(ItemRef::Method(method.clone()));
        }
        if let Some(field) = handle.field() {
            self.process_field_access(context, field, handle.is_field_write(), Some(handle));
        }
    }

    /// Transition 5: every listed implementation of a loaded service becomes
    /// instantiable and its no-argument constructor live.
    fn process_service_load(&mut self, context: &DexMethod, service: &DexType) {
        self.mark_type_live(service, KeptReason::ReferencedFrom(context.clone()));
        let implementations = self.services.implementations_for(service);
        let factory = self.app_info.factory().clone();
        for implementation in implementations {
            if self.class_for(&implementation).is_none() {
                self.report_missing(&implementation, Some(context.holder()));
                continue;
            }
            self.mark_instantiated(
                &implementation,
                KeptReason::ServiceImplementation(service.clone()),
            );
            // the runtime instantiates through the public no-arg constructor
            let void = match factory.create_type("V") {
                Ok(void) => void,
                Err(_) => continue,
            };
            let Ok(init_proto) = factory.create_proto(void, &[]) else {
                continue;
            };
            let init = factory.create_method(implementation.clone(), "<init>", init_proto);
            if self
                .class_for(&implementation)
                .and_then(|class| class.lookup_method(&init).map(|_| ()))
                .is_some()
            {
                self.mark_method_live(
                    init,
                    KeptReason::ServiceImplementation(service.clone()),
                );
            }
        }
    }

    /// Transition 7: `Class.forName("com.example.Foo")`.
    fn process_reflective_class(&mut self, context: &DexMethod, name: &DexString) {
        let descriptor = format!("L{};", name.as_str().replace('.', "/"));
        let Ok(ty) = self.app_info.factory().create_type(&descriptor) else {
            return;
        };
        self.mark_type_live(&ty, KeptReason::Reflective(context.clone()));
        self.reflective.insert(ItemRef::Type(ty));
    }

    /// `receiver.getDeclaredMethod("name", ...)`: parameter types are not
    /// modeled, so every overload of the name stays.
    fn process_reflective_method(
        &mut self,
        context: &DexMethod,
        receiver: &DexType,
        name: &DexString,
    ) {
        let Some(class) = self.class_for(receiver) else {
            return;
        };
        let matching: Vec<DexMethod> = class
            .methods()
            .filter(|m| m.method.name() == name)
            .map(|m| m.method.clone())
            .collect();
        for method in matching {
            self.mark_method_live(method.clone(), KeptReason::Reflective(context.clone()));
            self.reflective.insert(ItemRef::Method(method));
        }
    }

    fn process_reflective_field(
        &mut self,
        context: &DexMethod,
        receiver: &DexType,
        name: &DexString,
    ) {
        let Some(class) = self.class_for(receiver) else {
            return;
        };
        let matching: Vec<DexField> = class
            .fields()
            .filter(|f| f.field.name() == name)
            .map(|f| f.field.clone())
            .collect();
        for field in matching {
            self.mark_field_live(&field, KeptReason::Reflective(context.clone()));
            self.reflective.insert(ItemRef::Field(field.clone()));
            if let Some(info) = self.field_access.get_mut(&field) {
                info.read_reflectively = true;
            }
        }
    }

    /// Lambda metafactory call sites are rewritten into synthetic classes;
    /// anything else is recorded for reporting.
    fn process_call_site(&mut self, context: &DexMethod, call_site: Arc<CallSite>) {
        let known = self.app_info.factory().known();
        let is_metafactory = call_site.bootstrap == known.lambda_metafactory
            || call_site.bootstrap == known.lambda_alt_metafactory;
        if !is_metafactory {
            self.call_sites.push((call_site, context.clone()));
            return;
        }
        self.desugar_lambda(context, &call_site);
    }

    /// Lambda desugaring: synthesize a program class implementing the
    /// functional interface, forwarding to the implementation method.
    ///
    /// The synthetic name is a pure function of the call site, so a later
    /// round re-tracing the same site finds the class it created before
    /// instead of minting a duplicate.
    fn desugar_lambda(&mut self, context: &DexMethod, call_site: &CallSite) {
        let interface = call_site.method_proto.return_type().clone();
        let Some(implementation) = call_site
            .implementation_handle()
            .and_then(|handle| handle.method().cloned())
        else {
            return;
        };
        let Some(sam_proto) = call_site.interface_proto().cloned() else {
            return;
        };

        let cache_key = (interface.clone(), implementation.clone());
        if let Some(existing) = self.lambda_cache.get(&cache_key) {
            let existing = existing.clone();
            self.mark_instantiated(&existing, KeptReason::InstantiatedIn(context.clone()));
            return;
        }

        let factory = self.app_info.factory().clone();
        let descriptor = format!(
            "L{}$$Lambda${}${};",
            implementation.holder().internal_name().unwrap_or("lambda"),
            interface.simple_name().unwrap_or("iface"),
            sanitize_member_name(implementation.name().as_str())
        );
        let Ok(synthetic_type) = factory.create_type(&descriptor) else {
            return;
        };

        // an earlier round already synthesized this class
        if let Some(existing) = self.app_info.definition_for(&synthetic_type) {
            if existing.is_program() {
                self.lambda_cache.insert(cache_key, synthetic_type.clone());
                self.mark_instantiated(
                    &synthetic_type,
                    KeptReason::InstantiatedIn(context.clone()),
                );
                let forward_ref = factory.create_method(
                    synthetic_type.clone(),
                    call_site.method_name.as_str(),
                    sam_proto,
                );
                self.mark_method_live(
                    forward_ref,
                    KeptReason::SynthesizedLambda(synthetic_type.clone()),
                );
                if let Ok(void) = factory.create_type("V") {
                    if let Ok(init_proto) = factory.create_proto(void, &[]) {
                        let init_ref =
                            factory.create_method(synthetic_type.clone(), "<init>", init_proto);
                        self.mark_method_live(
                            init_ref,
                            KeptReason::SynthesizedLambda(synthetic_type),
                        );
                    }
                }
                return;
            }
        }

        let forward_ref = factory.create_method(
            synthetic_type.clone(),
            call_site.method_name.as_str(),
            sam_proto,
        );
        let forward_body = Code::new(vec![
            forward_instruction(call_site, &implementation),
            if forward_ref.proto().return_type().is_void() {
                Instruction::ReturnVoid
            } else {
                Instruction::Return
            },
        ]);
        let forward =
            DexEncodedMethod::new(forward_ref.clone(), AccessFlags::PUBLIC).with_code(forward_body);

        let void = match factory.create_type("V") {
            Ok(void) => void,
            Err(_) => return,
        };
        let Ok(init_proto) = factory.create_proto(void, &[]) else {
            return;
        };
        let init_ref = factory.create_method(synthetic_type.clone(), "<init>", init_proto);
        let init_body = Code::new(vec![
            Instruction::InvokeDirect(factory.known().object_init.clone()),
            Instruction::ReturnVoid,
        ]);
        let init = DexEncodedMethod::new(
            init_ref.clone(),
            AccessFlags::PUBLIC | AccessFlags::CONSTRUCTOR,
        )
        .with_code(init_body);

        let interfaces = if interface.is_class() {
            vec![interface.clone()]
        } else {
            Vec::new()
        };
        let Ok(class) = DexClass::new(
            ClassKind::Program,
            synthetic_type.clone(),
            Some(factory.known().object_type.clone()),
            interfaces,
            AccessFlags::PUBLIC | AccessFlags::FINAL | AccessFlags::SYNTHETIC,
            vec![init],
            vec![forward],
            Vec::new(),
            Vec::new(),
            Origin::Synthesized(context.holder().clone()),
        ) else {
            return;
        };

        self.synthesized
            .insert(synthetic_type.clone(), Arc::new(class));
        self.synthesized_order.push(synthetic_type.clone());
        self.lambda_cache.insert(cache_key, synthetic_type.clone());

        self.mark_type_live(&interface, KeptReason::ReferencedFrom(context.clone()));
        self.mark_instantiated(
            &synthetic_type,
            KeptReason::InstantiatedIn(context.clone()),
        );
        self.mark_method_live(
            forward_ref,
            KeptReason::SynthesizedLambda(synthetic_type.clone()),
        );
        self.mark_method_live(init_ref, KeptReason::SynthesizedLambda(synthetic_type));
    }

    /// Re-evaluates pending `-if` rules; true when any new keep applied.
    fn evaluate_if_rules(&mut self) -> bool {
        let rules = self.root_set.if_rules.clone();
        let mut progressed = false;
        for (index, rule) in rules.iter().enumerate() {
            if self.applied_if_rules.contains(&index) {
                continue;
            }
            let applications = evaluate_if_rule(rule, self.app_info, &self.live_types);
            if applications.is_empty() {
                continue;
            }
            self.applied_if_rules.insert(index);
            progressed = true;
            for (class_type, members) in applications {
                self.root_set
                    .apply_matched_keep(&rule.keep, &class_type, members);
            }
        }
        if progressed {
            self.seed();
        }
        progressed
    }
}

fn sanitize_member_name(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '_' || c == '$' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

fn forward_instruction(call_site: &CallSite, implementation: &DexMethod) -> Instruction {
    match call_site.implementation_handle() {
        Some(MethodHandle::StaticInvoke(_)) => Instruction::InvokeStatic(implementation.clone()),
        Some(MethodHandle::ConstructorInvoke(_)) => {
            Instruction::InvokeDirect(implementation.clone())
        }
        Some(MethodHandle::InterfaceInvoke(_)) => {
            Instruction::InvokeInterface(implementation.clone())
        }
        _ => Instruction::InvokeVirtual(implementation.clone()),
    }
}

fn resolution_failure_message(failure: &MethodResolutionResult, target: &DexMethod) -> String {
    match failure {
        MethodResolutionResult::NoSuchMethod { receiver, .. } => {
            format!("no such method {} on {receiver}", target.smali_string())
        }
        MethodResolutionResult::AmbiguousDefault { candidates, .. } => format!(
            "ambiguous default methods for {}: {} candidates",
            target.smali_string(),
            candidates.len()
        ),
        MethodResolutionResult::Inaccessible { .. } => {
            format!("{} is not accessible", target.smali_string())
        }
        _ => format!("can't resolve {}", target.smali_string()),
    }
}
