//! Configuration for one inference run.
//!
//! All knobs live in a record passed to the seeder and the solver; there is
//! no global mutable state, so two runs with different configurations can
//! coexist in one process.

/// Which evidence source seeds the type graph.
#[derive(clap::ArgEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum TypeSrc {
    /// IR types only (pre-erasure "migration" modules)
    Mig,
    /// Debug info only
    Di,
    /// TBAA metadata only
    Tbaa,
    /// All sources, highest-trust first (DI > TBAA > IR types)
    Comb,
}

/// How the solver reaches a fixed point.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SolverKind {
    /// Edge-triggered worklist; terminates when the queue drains.
    Worklist,
    /// Full sweeps over the module, capped at
    /// [`InferenceConfig::max_sweeps`]. A fail-safe fallback; the worklist
    /// driver is preferred.
    BoundedIteration,
}

/// The configuration record.
#[derive(Clone, Debug)]
pub struct InferenceConfig {
    pub type_src: TypeSrc,
    pub solver: SolverKind,
    /// Sweep cap for [`SolverKind::BoundedIteration`].
    pub max_sweeps: usize,
    /// Resolve `typedef` indirection when rendering DI types.
    pub resolve_typedefs: bool,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        InferenceConfig {
            type_src: TypeSrc::Comb,
            solver: SolverKind::Worklist,
            max_sweeps: 5,
            resolve_typedefs: true,
        }
    }
}

/// Advanced command-line switches mapped onto the record.
#[derive(clap::ArgEnum, Clone, Debug)]
pub enum CommandLineInferenceConfig {
    UseBoundedIterationSolver,
    KeepTypedefNames,
}

impl From<Vec<CommandLineInferenceConfig>> for InferenceConfig {
    fn from(v: Vec<CommandLineInferenceConfig>) -> Self {
        use CommandLineInferenceConfig::*;
        let mut r = InferenceConfig::default();
        for v in v {
            match v {
                UseBoundedIterationSolver => {
                    r.solver = SolverKind::BoundedIteration;
                }
                KeepTypedefNames => {
                    r.resolve_typedefs = false;
                }
            }
        }
        r
    }
}
