//! Catalog metadata returned by database handles.

use serde::{Deserialize, Serialize};

/// Column metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnInfo {
    /// Column name.
    pub name: String,
    /// Declared type as the catalog reports it (e.g. `character varying`, `VARCHAR(255)`).
    pub data_type: String,
    /// Character length limit when the catalog reports it separately.
    pub max_length: Option<i64>,
    /// Precision of `numeric`/`decimal` columns when reported separately.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub numeric_precision: Option<i64>,
    /// Scale of `numeric`/`decimal` columns when reported separately.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub numeric_scale: Option<i64>,
    /// Fractional-second precision of time and timestamp columns.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub datetime_precision: Option<i64>,
    /// Whether NULL is allowed.
    pub nullable: bool,
}

impl ColumnInfo {
    /// Create column metadata.
    pub fn new(name: impl Into<String>, data_type: impl Into<String>, nullable: bool) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
            max_length: None,
            numeric_precision: None,
            numeric_scale: None,
            datetime_precision: None,
            nullable,
        }
    }

    /// Set the separately reported length limit.
    pub fn with_max_length(mut self, max_length: Option<i64>) -> Self {
        self.max_length = max_length;
        self
    }

    /// Set the separately reported numeric precision and scale.
    pub fn with_numeric_precision(mut self, precision: Option<i64>, scale: Option<i64>) -> Self {
        self.numeric_precision = precision;
        self.numeric_scale = scale;
        self
    }

    /// Set the separately reported fractional-second precision.
    pub fn with_datetime_precision(mut self, precision: Option<i64>) -> Self {
        self.datetime_precision = precision;
        self
    }

    /// Full type including its arguments, e.g. `character varying(255)`
    /// or `numeric(10,2)`.
    pub fn display_type(&self) -> String {
        if self.data_type.contains('(') {
            return self.data_type.clone();
        }
        if let Some(len) = self.max_length {
            return format!("{}({})", self.data_type, len);
        }

        let base = normalize_type(&self.data_type);
        match base.as_str() {
            "numeric" => match self.numeric_precision {
                Some(precision) => format!(
                    "{}({},{})",
                    self.data_type,
                    precision,
                    self.numeric_scale.unwrap_or(0)
                ),
                None => self.data_type.clone(),
            },
            "time" | "timetz" | "timestamp" | "timestamptz" | "interval" => {
                match self.datetime_precision {
                    Some(precision) => format!("{}({})", self.data_type, precision),
                    None => self.data_type.clone(),
                }
            }
            _ => self.data_type.clone(),
        }
    }

    /// Compare against an expected type, ignoring dialect spelling.
    ///
    /// An expected type without arguments (`varchar`) matches any length.
    pub fn type_matches(&self, expected: &str) -> bool {
        let observed = normalize_type(&self.display_type());
        let expected = normalize_type(expected);

        if expected.contains('(') {
            observed == expected
        } else {
            base_type(&observed) == expected
        }
    }
}

/// Index metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexInfo {
    /// Index name.
    pub name: String,
    /// Whether the index enforces uniqueness.
    pub unique: bool,
    /// Indexed columns in key order (may be empty for expression indexes).
    pub columns: Vec<String>,
}

/// Kind of table constraint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConstraintKind {
    /// Primary key.
    PrimaryKey,
    /// Foreign key.
    ForeignKey,
    /// Unique constraint.
    Unique,
    /// Check constraint.
    Check,
    /// Anything else the catalog reports (exclusion, trigger, ...).
    Other,
}

impl std::fmt::Display for ConstraintKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConstraintKind::PrimaryKey => write!(f, "primary key"),
            ConstraintKind::ForeignKey => write!(f, "foreign key"),
            ConstraintKind::Unique => write!(f, "unique"),
            ConstraintKind::Check => write!(f, "check"),
            ConstraintKind::Other => write!(f, "other"),
        }
    }
}

/// Constraint metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConstraintInfo {
    /// Constraint name. SQLite does not keep names for most constraints.
    pub name: Option<String>,
    /// Constraint kind.
    pub kind: ConstraintKind,
    /// Constrained columns.
    pub columns: Vec<String>,
    /// Referenced table (foreign keys only).
    pub referenced_table: Option<String>,
    /// Referenced columns (foreign keys only).
    pub referenced_columns: Vec<String>,
}

impl ConstraintInfo {
    /// Create constraint metadata without references.
    pub fn new(name: Option<String>, kind: ConstraintKind, columns: Vec<String>) -> Self {
        Self {
            name,
            kind,
            columns,
            referenced_table: None,
            referenced_columns: Vec::new(),
        }
    }

    /// Create foreign key metadata.
    pub fn foreign_key(
        name: Option<String>,
        columns: Vec<String>,
        referenced_table: impl Into<String>,
        referenced_columns: Vec<String>,
    ) -> Self {
        Self {
            name,
            kind: ConstraintKind::ForeignKey,
            columns,
            referenced_table: Some(referenced_table.into()),
            referenced_columns,
        }
    }

    /// Check if this foreign key maps `column` to `table.referenced_column`.
    pub fn references(&self, column: &str, table: &str, referenced_column: &str) -> bool {
        if self.kind != ConstraintKind::ForeignKey {
            return false;
        }

        let table_matches = self
            .referenced_table
            .as_deref()
            .map(|t| unqualified(t).eq_ignore_ascii_case(unqualified(table)))
            .unwrap_or(false);

        table_matches
            && self
                .columns
                .iter()
                .zip(self.referenced_columns.iter())
                .any(|(from, to)| {
                    from.eq_ignore_ascii_case(column) && to.eq_ignore_ascii_case(referenced_column)
                })
    }

    /// One-line description for reports.
    pub fn describe(&self) -> String {
        let name = self.name.as_deref().unwrap_or("<unnamed>");
        match &self.referenced_table {
            Some(table) => format!(
                "{} {} ({}) -> {}({})",
                self.kind,
                name,
                self.columns.join(", "),
                table,
                self.referenced_columns.join(", ")
            ),
            None => format!("{} {} ({})", self.kind, name, self.columns.join(", ")),
        }
    }
}

/// Normalize a SQL type name so dialect spellings compare equal.
///
/// Lowercases, collapses whitespace, strips spaces inside the argument list
/// and maps common synonyms (`character varying` -> `varchar`,
/// `int4` -> `integer`, `timestamp with time zone` -> `timestamptz`, ...).
pub fn normalize_type(raw: &str) -> String {
    let lowered = raw.trim().to_ascii_lowercase();
    // `timestamp(3) with time zone` keeps its suffix after the arguments.
    let (base, args) = match (lowered.find('('), lowered.find(')')) {
        (Some(open), Some(close)) if close > open => (
            format!("{} {}", &lowered[..open], &lowered[close + 1..]),
            Some(&lowered[open..=close]),
        ),
        _ => (lowered.clone(), None),
    };

    let base = base.split_whitespace().collect::<Vec<_>>().join(" ");
    let base = match base.as_str() {
        "character varying" | "varchar" => "varchar",
        "character" | "char" | "bpchar" => "char",
        "int" | "int4" | "integer" => "integer",
        "int8" | "bigint" => "bigint",
        "int2" | "smallint" => "smallint",
        "bool" | "boolean" => "boolean",
        "float8" | "double precision" => "double precision",
        "float4" | "real" => "real",
        "decimal" | "numeric" => "numeric",
        "timestamp with time zone" | "timestamptz" => "timestamptz",
        "timestamp without time zone" | "timestamp" => "timestamp",
        "time with time zone" | "timetz" => "timetz",
        "time without time zone" | "time" => "time",
        other => other,
    }
    .to_string();

    match args {
        Some(args) => {
            let args: String = args.chars().filter(|c| !c.is_whitespace()).collect();
            format!("{}{}", base, args)
        }
        None => base,
    }
}

fn base_type(normalized: &str) -> &str {
    normalized.split('(').next().unwrap_or(normalized)
}

fn unqualified(name: &str) -> &str {
    name.rsplit('.').next().unwrap_or(name)
}
