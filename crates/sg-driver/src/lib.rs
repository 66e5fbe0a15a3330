pub mod mem;
pub mod traits;
pub mod types;

pub use mem::{MemCall, MemCallRecord, MemDriver, MemStats};
pub use traits::{DbConnection, Driver};
pub use types::{Command, ConnectionSpec, Credential, ExecuteBehavior, Execution, Query, QueryKind};
