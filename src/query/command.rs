use std::fmt;

/// Filter operators understood in `filter[where][<Field>][<op>]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperatorKind {
    Equal,
    NotEqual,
    GreaterThan,
    GreaterOrEqual,
    LessThan,
    LessOrEqual,
    Like,
    NotLike,
    Contains,
    NotContains,
}

impl OperatorKind {
    pub const ALL: [OperatorKind; 10] = [
        OperatorKind::Equal,
        OperatorKind::NotEqual,
        OperatorKind::GreaterThan,
        OperatorKind::GreaterOrEqual,
        OperatorKind::LessThan,
        OperatorKind::LessOrEqual,
        OperatorKind::Like,
        OperatorKind::NotLike,
        OperatorKind::Contains,
        OperatorKind::NotContains,
    ];

    pub fn from_wire(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|op| op.wire_name() == name)
    }

    pub fn wire_name(self) -> &'static str {
        match self {
            OperatorKind::Equal => "eq",
            OperatorKind::NotEqual => "neq",
            OperatorKind::GreaterThan => "gt",
            OperatorKind::GreaterOrEqual => "gte",
            OperatorKind::LessThan => "lt",
            OperatorKind::LessOrEqual => "lte",
            OperatorKind::Like => "like",
            OperatorKind::NotLike => "nlike",
            OperatorKind::Contains => "contains",
            OperatorKind::NotContains => "ncontains",
        }
    }

    pub fn is_negated(self) -> bool {
        matches!(
            self,
            OperatorKind::NotEqual | OperatorKind::NotLike | OperatorKind::NotContains
        )
    }

    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            OperatorKind::GreaterThan
                | OperatorKind::GreaterOrEqual
                | OperatorKind::LessThan
                | OperatorKind::LessOrEqual
        )
    }

    pub fn is_pattern(self) -> bool {
        matches!(
            self,
            OperatorKind::Like
                | OperatorKind::NotLike
                | OperatorKind::Contains
                | OperatorKind::NotContains
        )
    }
}

impl fmt::Display for OperatorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.wire_name())
    }
}

/// One `filter[where]...` entry as it appeared in the query string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub path: Vec<String>,
    pub operator: OperatorKind,
    pub raw_value: String,
    pub group_id: String,
    pub is_or: bool,
    /// Decoded `key=value` text, used when reporting errors.
    pub source: String,
}

impl Command {
    pub fn field_name(&self) -> &str {
        self.path.first().map(String::as_str).unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderDirective {
    /// Position from `filter[order][<n>]`, 0 when absent.
    pub index: usize,
    pub field: String,
    pub ascending: bool,
    pub source: String,
}

/// Everything the query string can ask for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Directive {
    Where(Command),
    Order(OrderDirective),
    Skip { value: usize, source: String },
    Limit { value: usize, source: String },
    Include { path: String, source: String },
    Select { field: String, source: String },
    FreeText(String),
}
