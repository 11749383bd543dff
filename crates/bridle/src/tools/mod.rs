//! Tools: the capability contract, the catalog, and the dispatcher.
//!
//! Every capability a model can drive (camera, SMS, location, printer,
//! card reader, ...) is a [`Tool`] implementor. Tools live in a shared
//! [`ToolCatalog`] and are invoked through a [`Dispatcher`], which turns
//! every outcome into a [`ToolResult`](crate::ToolResult).
//!
//! # Defining tools
//!
//! - **[`FnTool`]** wraps an async closure with typed arguments. Use
//!   [`FnTool::blocking`] for synchronous SDKs.
//! - **`impl Tool`** for adapters that carry their own state.
//!
//! Gate a tool on live device or permission state with
//! [`FnTool::with_availability`] or a shared [`AvailabilityFlag`].
//!
//! # Submodules
//!
//! - [`core`]: [`Tool`] trait, [`FnTool`], [`AvailabilityFlag`].
//! - [`catalog`]: [`ToolCatalog`] registry and listings.
//! - [`dispatch`]: [`Dispatcher`] and the [`DispatchError`] taxonomy.

pub mod catalog;
pub mod core;
pub mod dispatch;

pub use catalog::ToolCatalog;
pub use core::{Arguments, AvailabilityFlag, FnTool, Tool, ToolFuture, parse_tool_args};
pub use dispatch::{DEFAULT_TOOL_TIMEOUT, DispatchError, Dispatcher};
