pub mod registry;
pub mod schema;
pub mod watcher;

pub use registry::{parse_template, TemplateRegistry};
pub use schema::{Charset, DateConstraint, FieldDef, FieldRules, Template, Transform};
pub use watcher::TemplateWatcher;
