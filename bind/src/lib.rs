//! Operator-to-kernel binding.
//!
//! Every graph operator has candidate (type checker, kernel template, pass
//! pipeline) triples, grouped by the parser that admits the node. The
//! [`Resolver`] picks one triple per operator such that the whole graph
//! type-checks, backtracking when a downstream operator can only be satisfied
//! by an upstream change.
//!
//! ```text
//! Platform ── Engine ── op type ── LayerSpec
//!                                     │ instantiate(node)
//!                                     ▼
//!                                   Layer ── NodeMapper (parser) ── NodeBinding (checker, template, passes)
//! ```

pub mod binding;
pub mod checker;
pub mod config;
pub mod error;
pub mod layer;
pub mod mapper;
pub mod parser;
pub mod platform;
pub mod resolver;
pub mod template;


pub use binding::NodeBinding;
pub use checker::{NodeTypeChecker, OutputRule};
pub use config::ResolverConfig;
pub use error::{Error, Result};
pub use layer::{Layer, LayerState};
pub use mapper::NodeMapper;
pub use parser::{NodeParser, hoist_io};
pub use platform::{Engine, LayerSpec, Platform};
pub use resolver::{ResolveReport, Resolver, Step, network_context};
pub use template::{KernelTemplate, NodeTemplate, TransientSize, TransientSpec};
