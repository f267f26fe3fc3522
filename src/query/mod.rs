pub mod builder;
pub mod command;
pub mod model;
pub mod parser;
pub mod pattern;

pub use builder::build;
pub use command::{Command, Directive, OperatorKind, OrderDirective};
pub use model::{
    Condition, ConditionValue, FilterValue, OrderSpec, QueryModel, QueryResult, Record, WhereGroup,
};
pub use parser::parse;
pub use pattern::PatternSegment;
