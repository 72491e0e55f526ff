//! Explicit registration of evaluation cases.
//!
//! Cases register under a module name; discovery later resolves eval
//! manifests against those modules. Named targets and evaluators registered
//! here can be referenced from manifest defaults.

use std::collections::{BTreeMap, HashMap};
use std::sync::{OnceLock, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::error::{EvalError, Result};
use crate::function::{EvalFunction, SourceLocation};
use crate::hooks::{Evaluator, Target};
use crate::parametrize::ParametrizedEval;

/// Register a case in `registry` under `module`, capturing the call site.
///
/// ```ignore
/// register_eval!(EvalRegistry::global(), "sentiment", EvalFunction::plain("positive", body))?;
/// ```
#[macro_export]
macro_rules! register_eval {
    ($registry:expr, $module:expr, $item:expr $(,)?) => {
        $registry.register_at(
            $module,
            $item,
            $crate::SourceLocation::new(::std::file!(), ::std::line!()),
        )
    };
}

/// A registered case: a single function or a parametrized template.
#[derive(Debug, Clone)]
pub enum RegisteredEval {
    Function(EvalFunction),
    Template(ParametrizedEval),
}

impl RegisteredEval {
    pub fn name(&self) -> &str {
        match self {
            Self::Function(f) => f.name(),
            Self::Template(t) => t.name(),
        }
    }

    pub fn location(&self) -> Option<&SourceLocation> {
        match self {
            Self::Function(f) => f.location(),
            Self::Template(t) => t.location(),
        }
    }

    /// The function whose configuration discovery defaults apply to.
    pub fn base_mut(&mut self) -> &mut EvalFunction {
        match self {
            Self::Function(f) => f,
            Self::Template(t) => t.base_mut(),
        }
    }

    /// Concrete functions, expanding templates in order.
    pub fn into_functions(self) -> Vec<EvalFunction> {
        match self {
            Self::Function(f) => vec![f],
            Self::Template(t) => t.expand(),
        }
    }

    fn located(self, location: SourceLocation) -> Self {
        match self {
            Self::Function(f) if f.location().is_none() => Self::Function(f.at(location)),
            Self::Template(mut t) if t.location().is_none() => {
                let base = t.base_mut();
                *base = base.clone().at(location);
                Self::Template(t)
            }
            other => other,
        }
    }
}

impl From<EvalFunction> for RegisteredEval {
    fn from(f: EvalFunction) -> Self {
        Self::Function(f)
    }
}

impl From<ParametrizedEval> for RegisteredEval {
    fn from(t: ParametrizedEval) -> Self {
        Self::Template(t)
    }
}

/// `module::function`
pub fn qualified_name(module: &str, name: &str) -> String {
    format!("{module}::{name}")
}

#[derive(Debug, Default)]
struct RegistryInner {
    modules: BTreeMap<String, Vec<RegisteredEval>>,
    targets: HashMap<String, Target>,
    evaluators: HashMap<String, Evaluator>,
}

/// Process-wide or owned catalogue of evaluation cases.
#[derive(Debug, Default)]
pub struct EvalRegistry {
    inner: RwLock<RegistryInner>,
}

impl EvalRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide registry.
    pub fn global() -> &'static EvalRegistry {
        static GLOBAL: OnceLock<EvalRegistry> = OnceLock::new();
        GLOBAL.get_or_init(EvalRegistry::new)
    }

    fn read(&self) -> RwLockReadGuard<'_, RegistryInner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, RegistryInner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a case under `module`.
    pub fn register(&self, module: &str, item: impl Into<RegisteredEval>) -> Result<()> {
        let item = item.into();
        let mut inner = self.write();
        let entries = inner.modules.entry(module.to_string()).or_default();
        if entries.iter().any(|e| e.name() == item.name()) {
            return Err(EvalError::DuplicateRegistration(qualified_name(
                module,
                item.name(),
            )));
        }
        tracing::debug!(module = %module, function = %item.name(), "registered eval");
        entries.push(item);
        Ok(())
    }

    /// Register a case, recording `location` unless it already has one.
    pub fn register_at(
        &self,
        module: &str,
        item: impl Into<RegisteredEval>,
        location: SourceLocation,
    ) -> Result<()> {
        self.register(module, item.into().located(location))
    }

    /// Replaces any target with the same name.
    pub fn register_target(&self, target: Target) {
        self.write()
            .targets
            .insert(target.name().to_string(), target);
    }

    /// Replaces any evaluator with the same name.
    pub fn register_evaluator(&self, evaluator: Evaluator) {
        self.write()
            .evaluators
            .insert(evaluator.name().to_string(), evaluator);
    }

    pub fn target(&self, name: &str) -> Option<Target> {
        self.read().targets.get(name).cloned()
    }

    pub fn evaluator(&self, name: &str) -> Option<Evaluator> {
        self.read().evaluators.get(name).cloned()
    }

    pub fn contains(&self, module: &str, name: &str) -> bool {
        self.read()
            .modules
            .get(module)
            .is_some_and(|entries| entries.iter().any(|e| e.name() == name))
    }

    /// Registered module names, sorted.
    pub fn modules(&self) -> Vec<String> {
        self.read().modules.keys().cloned().collect()
    }

    /// Independent copies of a module's entries ordered by source location.
    /// Entries without a location keep registration order, after the rest.
    pub fn module(&self, module: &str) -> Vec<RegisteredEval> {
        let mut entries = self.read().modules.get(module).cloned().unwrap_or_default();
        entries.sort_by(|a, b| {
            let key = |e: &RegisteredEval| {
                e.location()
                    .map(|loc| (false, loc.file.clone(), loc.line))
                    .unwrap_or((true, Default::default(), 0))
            };
            key(a).cmp(&key(b))
        });
        entries
    }
}
