pub mod codec;
pub mod component;
pub mod external;
pub mod shard_key;
pub mod values;

pub use component::{KeyComponent, KeyKind, MAX_STRING_BYTES};
pub use shard_key::{
    KeyedModel, ShardChild, ShardGrandchild, ShardKey, ShardKeyed, EMPTY_ORIGIN,
};
pub use values::{merge_models, ShardsValues};

// Re-exported so `key_component_enum!` expands against `$crate` paths.
pub use sg_types::{FromValue, KeyError, ToValue, Value};
