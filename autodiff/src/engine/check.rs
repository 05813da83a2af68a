//! Static differentiability checking.
//!
//! Runs once per (function, parameter subset) before anything is
//! evaluated, following direct calls and every implementation a witness
//! or method call can dispatch to.

use super::activity::{crosses_no_derivative, Activity};
use super::config::EngineOptions;
use super::diagnostics::{self as msg, Diagnostic, Note};
use super::ir::{Body, Callee, Instr, Local, Span, Statement, Terminator};
use super::module::{FunctionDecl, Implementation, Module};
use std::collections::{HashMap, HashSet};
use std::rc::Rc;
use tracing::debug;

pub(crate) type Key = (String, Vec<usize>);

/// Verdicts and activity results shared across requests.
#[derive(Debug, Default)]
pub(crate) struct CheckCache {
    verdicts: HashMap<Key, Result<(), Vec<Note>>>,
    activities: HashMap<Key, Rc<Activity>>,
}

impl CheckCache {
    /// The activity of `name`'s body for `wrt`, computing it on first use.
    pub(crate) fn activity(&mut self, module: &Module, body: &Body, name: &str, wrt: &[usize]) -> Rc<Activity> {
        self.activities
            .entry((name.to_string(), wrt.to_vec()))
            .or_insert_with(|| Rc::new(Activity::analyze(module, body, wrt)))
            .clone()
    }
}

fn note(message: impl Into<String>, span: Option<Span>) -> Note {
    Note {
        message: message.into(),
        span,
    }
}

pub(crate) struct Checker<'a> {
    module: &'a Module,
    options: &'a EngineOptions,
    cache: &'a mut CheckCache,
    in_progress: HashSet<Key>,
}

impl<'a> Checker<'a> {
    pub(crate) fn new(module: &'a Module, options: &'a EngineOptions, cache: &'a mut CheckCache) -> Self {
        Self {
            module,
            options,
            cache,
            in_progress: HashSet::new(),
        }
    }

    /// Checks `name` with respect to the parameters at `wrt`; the error
    /// holds the notes explaining the rejection.
    pub(crate) fn check(&mut self, name: &str, wrt: &[usize]) -> Result<(), Vec<Note>> {
        let key = (name.to_string(), wrt.to_vec());
        if let Some(verdict) = self.cache.verdicts.get(&key) {
            return verdict.clone();
        }
        // Recursive requests are accepted here and judged by the outer one.
        if self.in_progress.contains(&key) {
            return Ok(());
        }
        if self.in_progress.len() >= self.options.max_call_depth {
            return Err(vec![note(
                format!("differentiation of '{name}' nests deeper than {} calls", self.options.max_call_depth),
                None,
            )]);
        }
        let module = self.module;
        let Some(decl) = module.function(name) else {
            return Err(vec![note(format!("unknown function '{name}'"), None)]);
        };

        self.in_progress.insert(key.clone());
        let verdict = self.check_decl(decl, wrt);
        self.in_progress.remove(&key);

        debug!(function = name, ?wrt, accepted = verdict.is_ok(), "checked differentiability");
        if verdict.is_err() || self.in_progress.is_empty() {
            self.cache.verdicts.insert(key, verdict.clone());
        }
        verdict
    }

    fn check_decl(&mut self, decl: &FunctionDecl, wrt: &[usize]) -> Result<(), Vec<Note>> {
        let mut notes = Vec::new();
        for &index in wrt {
            let Some(param) = decl.params.get(index) else {
                notes.push(note(
                    format!(
                        "parameter index {index} is out of range for '{}', which has {} parameters",
                        decl.name,
                        decl.params.len()
                    ),
                    None,
                ));
                continue;
            };
            if param.nondiff {
                notes.push(note(msg::NONDIFF_PARAM, None));
            } else if !self.module.is_differentiable(&param.ty) {
                notes.push(note(
                    format!(
                        "can only differentiate with respect to parameters that conform to 'Differentiable', but '{}' does not conform to 'Differentiable'",
                        param.ty
                    ),
                    None,
                ));
            }
        }
        if !self.module.is_differentiable(&decl.result) {
            notes.push(note(
                format!(
                    "can only differentiate functions with results that conform to 'Differentiable', but '{}' does not conform to 'Differentiable'",
                    decl.result
                ),
                None,
            ));
        }
        if !notes.is_empty() {
            return Err(notes);
        }

        if decl.derivative.is_some() {
            return Ok(());
        }
        match &decl.implementation {
            Implementation::Native(_) => Err(vec![note(msg::OPAQUE, None)]),
            Implementation::Ir(body) => self.check_body(&decl.name, body, wrt),
        }
    }

    fn check_body(&mut self, name: &str, body: &Body, wrt: &[usize]) -> Result<(), Vec<Note>> {
        let activity = self.cache.activity(self.module, body, name, wrt);
        let mut notes = Vec::new();
        for id in body.reachable() {
            let block = body.block(id);
            for stmt in &block.statements {
                self.check_statement(body, &activity, stmt, &mut notes);
            }
            if matches!(block.terminator, Terminator::Unreachable) {
                notes.push(note(msg::MISSING_RETURN, block.terminator_span.clone()));
            }
        }
        if notes.is_empty() {
            Ok(())
        } else {
            Err(notes)
        }
    }

    fn check_statement(&mut self, body: &Body, activity: &Activity, stmt: &Statement, notes: &mut Vec<Note>) {
        let span = stmt.span.clone();
        match &stmt.instr {
            Instr::StoreGlobal { value, .. } if activity.is_varied(*value) => {
                notes.push(note(msg::GLOBAL_WRITE, span));
                return;
            }
            Instr::CompoundAssign { target, value, .. }
                if activity.is_useful(*target)
                    && (activity.is_varied(*target) || activity.is_varied(*value)) =>
            {
                notes.push(note(msg::INOUT, span));
                return;
            }
            Instr::Assign { target, path, value }
                if activity.is_varied(*value)
                    && activity.is_useful(*target)
                    && crosses_no_derivative(self.module, body.local_type(*target), path) =>
            {
                notes.push(note(msg::NO_DERIVATIVE_FIELD, span));
                return;
            }
            Instr::EnumPayload { dst, .. } | Instr::ForceUnwrap { dst, .. } if activity.is_active(*dst) => {
                notes.push(note(msg::ENUM, span));
                return;
            }
            Instr::Call { dst, callee, args } if activity.is_active(*dst) => {
                self.check_call(activity, callee, args, span.clone(), notes);
            }
            _ => {}
        }
        if let Some(dst) = stmt.instr.defined() {
            if activity.is_active(dst) && !self.module.is_differentiable(body.local_type(dst)) {
                notes.push(note(msg::NON_DIFFERENTIABLE_RESULT, span));
            }
        }
    }

    fn check_call(
        &mut self,
        activity: &Activity,
        callee: &Callee,
        args: &[Local],
        span: Option<Span>,
        notes: &mut Vec<Note>,
    ) {
        match callee {
            Callee::Function(_) => {}
            Callee::Witness { protocol, requirement } => {
                let differentiable = self
                    .module
                    .protocol(protocol)
                    .and_then(|decl| decl.requirements.get(requirement))
                    .map_or(false, |req| req.differentiable);
                if !differentiable {
                    notes.push(note(msg::PROTOCOL_REQUIREMENT, span));
                    return;
                }
            }
            Callee::Method { class, method } => {
                let entries = self.module.overrides(class, method);
                if entries.is_empty() || entries.iter().any(|entry| !entry.differentiable) {
                    notes.push(note(msg::CLASS_MEMBER, span));
                    return;
                }
            }
        }

        let wrt: Vec<usize> = args
            .iter()
            .enumerate()
            .filter(|(_, arg)| activity.is_varied(**arg))
            .map(|(index, _)| index)
            .collect();
        let module = self.module;
        for candidate in module.candidates(callee) {
            let Some(decl) = module.function(&candidate) else {
                notes.push(note(format!("unknown function '{candidate}'"), span.clone()));
                continue;
            };
            if wrt
                .iter()
                .any(|&index| decl.params.get(index).map_or(false, |param| param.nondiff))
            {
                notes.push(note(msg::NONDIFF_PARAM, span.clone()));
                continue;
            }
            if decl.derivative.is_none() && matches!(decl.implementation, Implementation::Native(_)) {
                notes.push(note(msg::OPAQUE, span.clone()));
                continue;
            }
            if let Err(nested) = self.check(&candidate, &wrt) {
                notes.extend(nested);
                notes.push(note(msg::CALL_SITE, span.clone()));
            }
        }
    }
}

/// The warning for a result that no differentiation argument reaches.
pub(crate) fn nonvaried_result(body: &Body, activity: &Activity) -> Option<Diagnostic> {
    let returns: Vec<(Local, Option<Span>)> = body
        .reachable()
        .into_iter()
        .filter_map(|id| {
            let block = body.block(id);
            match block.terminator {
                Terminator::Return(local) => Some((local, block.terminator_span.clone())),
                _ => None,
            }
        })
        .collect();
    if returns.is_empty() || returns.iter().any(|(local, _)| activity.is_varied(*local)) {
        return None;
    }
    Some(Diagnostic::warning(msg::NONVARIED_RESULT, returns[0].1.clone()))
}
