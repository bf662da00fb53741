//! Deployment of canonical graphs to target code.
//!
//! This crate drives the whole pipeline: it resolves a binding for every
//! operator, materializes and tiles the kernels, then renders the resulting
//! fragment sequences with a registry of template sources.
//!
//! # Module Organization
//!
//! - [`templates`] - Template sources and their placeholders
//! - [`render`] - Fragment sequences to text, with deferred variables
//! - [`generic`] - Reference target with integer kernels
//! - [`deploy`] - The resolve, bind and generate stages
//!
//! # Usage
//!
//! ```ignore
//! use kiln_codegen::{DeployConfig, Deployer, generic};
//!
//! let config = DeployConfig::builder().unit_name("net").build();
//! let network = Deployer::new(&graph, generic::platform(&config), config)?
//!     .with_tiling(tiling)
//!     .resolve_and_generate()?;
//! println!("{}", network.code());
//! ```

pub mod config;
pub mod deploy;
pub mod error;
pub mod generic;
pub mod render;
pub mod templates;


pub use config::DeployConfig;
pub use deploy::{DeployedNetwork, DeployedOperator, Deployer, DeploymentPlatform, Stage};
pub use error::{Error, Result};
pub use render::Renderer;
pub use templates::{Segment, TemplateRegistry};
