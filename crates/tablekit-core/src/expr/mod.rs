//! Expression building: document paths, placeholder allocation, predicate
//! trees, update operations and the compiler that turns them into the
//! request strings the service evaluates.

pub mod compiled;
pub mod compiler;
pub mod path;
pub mod placeholder;
pub mod predicate;
pub mod update;

pub use compiled::CompiledRequest;
pub use compiler::{Compiler, MAX_EXPRESSION_LENGTH, VersionCheck};
pub use path::{DocumentPath, Segment};
pub use placeholder::Placeholders;
pub use predicate::{FieldCompare, GroupBuilder, IntoOperator, Joiner, Operator, Predicate};
pub use update::{Clause, UpdateOp};
