//! The fixed-point driver: seed the graph, then propagate constraints until
//! nothing grows.
//!
//! Termination follows from monotonicity: rules only ever add names, the
//! name domain of a module is finite, and users are requeued only on strict
//! growth. The bounded-iteration driver trades the edge-triggered queue for
//! a fixed number of whole-module sweeps; it exists as a fail-safe and for
//! corpus comparison against the worklist driver.

use crate::constraints::FlowRules;
use crate::inference_config::{InferenceConfig, SolverKind};
use crate::ir::Module;
use crate::log::*;
use crate::metadata::build_struct_di_map;
use crate::seeders::TypeSeeder;
use crate::type_graph::TypeGraph;
use crate::worklist::WorkList;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum InferenceError {
    /// The selected seeder reads debug info, but the module carries none.
    #[error("no debug info found in module")]
    MissingDebugInfo,
}

/// One inference run over one module.
pub struct TypeInference<'m> {
    module: &'m Module,
    config: InferenceConfig,
}

impl<'m> TypeInference<'m> {
    pub fn new(module: &'m Module, config: InferenceConfig) -> Self {
        TypeInference { module, config }
    }

    /// Seed a fresh graph from the configured evidence source.
    pub fn seed(&self) -> Result<TypeGraph, InferenceError> {
        let seeder = TypeSeeder::from(self.config.type_src);
        if seeder.needs_debug_info() && !self.module.has_debug_info() {
            return Err(InferenceError::MissingDebugInfo);
        }

        let mut graph = TypeGraph::new();
        seeder.seed(self.module, &mut graph, &self.config);
        Ok(graph)
    }

    /// Propagate constraints over `graph` until the fixed point.
    pub fn solve(&self, graph: &mut TypeGraph) {
        let struct_di = build_struct_di_map(self.module);
        let rules = FlowRules::new(self.module, &self.config, &struct_di);
        let mut worklist = WorkList::new(self.module);

        match self.config.solver {
            SolverKind::Worklist => {
                let mut steps = 0usize;
                while let Some(inst) = worklist.pop() {
                    rules.apply(graph, &mut worklist, inst);
                    steps += 1;
                }
                debug!("worklist drained"; "steps" => steps);
            }
            SolverKind::BoundedIteration => {
                // every instruction is already queued, so requeueing inside
                // the rules is a no-op; the sweeps drive all revisits
                for sweep in 0..self.config.max_sweeps {
                    for inst in self.module.all_insts() {
                        rules.apply(graph, &mut worklist, inst);
                    }
                    trace!("sweep finished"; "sweep" => sweep);
                }
            }
        }
    }

    /// Seed and solve.
    pub fn run(&self) -> Result<TypeGraph, InferenceError> {
        let mut graph = self.seed()?;
        self.solve(&mut graph);
        Ok(graph)
    }
}
