extern crate serde;
extern crate serde_json;

extern crate chrono;
extern crate itertools;
#[macro_use]
extern crate lazy_static;
extern crate tracing;
extern crate tracing_subscriber;

pub mod config;
pub mod config_source;
pub mod logging;

pub mod access;
pub mod aggregator;
pub mod assembler;
pub mod entity_path;
pub mod feature_toggles;
pub mod help_context;
pub mod local_overlay;
pub mod node;
pub mod node_sort;
pub mod tree_builder;
pub mod visibility;

pub use aggregator::{ChildrenByEntity, ChildrenByEntityAggregator};
pub use assembler::{assemble, NavigationConfig, ResolvedRoute};
pub use node::{Context, NavigationNode, NodeChildren};
pub use tree_builder::NavigationTreeBuilder;
