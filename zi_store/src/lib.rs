//! I/O-heavy layer: builders, directory replay, recipe application, and
//! the content-addressed implementation store. Pure logic (manifests,
//! digests, the solver) lives in `zi_core`.

pub mod builder;
pub mod directory_builder;
pub mod lock;
pub mod manifest_builder;
pub mod prefix_builder;
pub mod read_directory;
pub mod recipe;
pub mod store;

pub use builder::{Builder, ForwardOnlyBuilder};
pub use store::{CompositeStore, ImplementationStore, StoreKind};
