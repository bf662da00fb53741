//! Tiled, asynchronous data movement for bound operators.
//!
//! The passes in this crate wrap an operator's kernel in a tile loop that
//! moves each tile between external and local memory with an asynchronous
//! transfer engine.
//!
//! # Module Organization
//!
//! - [`future`] - Wait-handles and waiting strategies
//! - [`engine`] - Transfer-engine interface and transfer preconditions
//! - [`adapter`] - Lowering of unsupported ranks onto a fixed-rank engine
//! - [`engines`] - Concrete engines
//! - [`legalize`] - Rectangles to byte-granular transfer descriptors
//! - [`generator`] - Planning and emission shared by both buffering schemes
//! - [`single_buffering`] / [`double_buffering`] - The tiling passes
//! - [`memory_management`] - Allocation of operator-scoped buffers

pub mod adapter;
pub mod config;
pub mod double_buffering;
pub mod engine;
pub mod engines;
pub mod error;
pub mod future;
pub mod generator;
pub mod legalize;
pub mod memory_management;
pub mod single_buffering;


pub use adapter::AnyRankAdapter;
pub use config::TilingConfig;
pub use double_buffering::DoubleBufferingPass;
pub use engine::{AsyncTransferEngine, Params, TransferCode, TransferRequest, check_transfer};
pub use engines::{BarrierDma, ClusterDma, HostDma};
pub use error::{Error, Result};
pub use future::{Direction, Future, FutureTemplates, WaitingStrategy};
pub use generator::{TensorPlan, TileParam, TilingPlan};
pub use legalize::{LegalizedTile, legalize, minimize_rectangle};
pub use memory_management::MemoryManagementPass;
pub use single_buffering::SingleBufferingPass;
