//! Schema Catalog
//!
//! Static, hand-authored description of the CRM tables. Loaded once at startup
//! and shared read-only by every pipeline stage.

use crate::error::{PipelineError, Result};
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::path::Path;
use strsim::jaro_winkler;
use tracing::{debug, info};

const BUILTIN_CATALOG: &str = include_str!("../catalog/crm_schema.txt");

lazy_static! {
    static ref TABLE_LINE: Regex = Regex::new(r"^General Table name:\s*(\S+)\s*$").unwrap();
    static ref DESCRIPTION_LINE: Regex = Regex::new(r"^Description\s*:\s*(.*)$").unwrap();
    static ref COLUMN_LINE: Regex = Regex::new(
        r#"^\s+([A-Za-z_][A-Za-z0-9_]*)\s*\(([^)]*)\)\s*Description\s*:\s*"(.*)"\s*$"#
    )
    .unwrap();
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    String,
    Integer,
    Decimal,
    Boolean,
    Date,
}

impl ColumnType {
    fn parse(tag: &str) -> Option<Self> {
        match tag.trim().to_lowercase().as_str() {
            "string" | "text" => Some(ColumnType::String),
            "integer" | "int" => Some(ColumnType::Integer),
            "decimal" | "float" | "number" => Some(ColumnType::Decimal),
            "boolean" | "bool" => Some(ColumnType::Boolean),
            "date" | "datetime" => Some(ColumnType::Date),
            _ => None,
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColumnType::String => write!(f, "String"),
            ColumnType::Integer => write!(f, "Integer"),
            ColumnType::Decimal => write!(f, "Decimal"),
            ColumnType::Boolean => write!(f, "Boolean"),
            ColumnType::Date => write!(f, "Date"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ColumnRole {
    Plain,
    PrimaryKey,
    ForeignKey { table: String, column: String },
    /// Polymorphic reference ("Foreign key to multiple tables").
    MultiReference,
}

impl Default for ColumnRole {
    fn default() -> Self {
        ColumnRole::Plain
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnDescriptor {
    pub name: String,
    #[serde(rename = "type")]
    pub data_type: ColumnType,
    #[serde(default)]
    pub role: ColumnRole,
    #[serde(default)]
    pub description: String,
}

impl ColumnDescriptor {
    /// Parse the parenthesised tag of a catalog column line.
    fn from_tag(name: &str, tag: &str, description: &str) -> Result<Self> {
        let lowered = tag.trim().to_lowercase();
        let (data_type, role) = if lowered == "primary key" {
            (ColumnType::String, ColumnRole::PrimaryKey)
        } else if lowered == "foreign key to multiple tables" {
            (ColumnType::String, ColumnRole::MultiReference)
        } else if lowered.starts_with("foreign key to ") {
            let target = tag.trim()["foreign key to ".len()..].trim();
            let (table, column) = target.rsplit_once('.').ok_or_else(|| {
                PipelineError::Catalog(format!(
                    "Column '{}' has foreign key target '{}' without a column",
                    name, target
                ))
            })?;
            (
                ColumnType::String,
                ColumnRole::ForeignKey {
                    table: table.to_string(),
                    column: column.to_string(),
                },
            )
        } else {
            let data_type = ColumnType::parse(tag).ok_or_else(|| {
                PipelineError::Catalog(format!("Column '{}' has unknown type '{}'", name, tag))
            })?;
            (data_type, ColumnRole::Plain)
        };

        Ok(Self {
            name: name.to_string(),
            data_type,
            role,
            description: description.to_string(),
        })
    }

    fn tag(&self) -> String {
        match &self.role {
            ColumnRole::PrimaryKey => "Primary Key".to_string(),
            ColumnRole::ForeignKey { table, column } => format!("Foreign key to {}.{}", table, column),
            ColumnRole::MultiReference => "Foreign key to multiple tables".to_string(),
            ColumnRole::Plain => self.data_type.to_string(),
        }
    }

    pub fn is_identifier(&self) -> bool {
        match self.role {
            ColumnRole::PrimaryKey | ColumnRole::ForeignKey { .. } | ColumnRole::MultiReference => true,
            ColumnRole::Plain => {
                self.data_type == ColumnType::String && self.name.to_lowercase().ends_with("id")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableDescriptor {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub columns: Vec<ColumnDescriptor>,
}

impl TableDescriptor {
    /// Unqualified table name (`crm.lead` -> `lead`).
    pub fn short_name(&self) -> &str {
        short_name(&self.name)
    }

    pub fn matches(&self, name: &str) -> bool {
        self.name.eq_ignore_ascii_case(name) || self.short_name().eq_ignore_ascii_case(short_name(name))
    }

    pub fn column(&self, name: &str) -> Option<&ColumnDescriptor> {
        self.columns.iter().find(|c| c.name.eq_ignore_ascii_case(name))
    }
}

fn short_name(name: &str) -> &str {
    name.rsplit('.').next().unwrap_or(name)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaCatalog {
    tables: Vec<TableDescriptor>,
}

impl SchemaCatalog {
    pub fn new(tables: Vec<TableDescriptor>) -> Result<Self> {
        let catalog = Self { tables };
        catalog.validate()?;
        Ok(catalog)
    }

    /// The CRM catalog shipped with the crate.
    pub fn builtin() -> Result<Self> {
        Self::from_text(BUILTIN_CATALOG)
    }

    /// Load a catalog file. `.json` files use the serde shape, anything else the text format.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let catalog = match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::from_json(&content)?,
            _ => Self::from_text(&content)?,
        };
        info!("Loaded catalog from {} ({} tables)", path.display(), catalog.tables.len());
        Ok(catalog)
    }

    pub fn load_or_builtin(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => Self::builtin(),
        }
    }

    pub fn from_json(content: &str) -> Result<Self> {
        let catalog: SchemaCatalog = serde_json::from_str(content)
            .map_err(|e| PipelineError::Catalog(format!("Invalid catalog JSON: {}", e)))?;
        catalog.validate()?;
        Ok(catalog)
    }

    /// Parse the hand-authored text format.
    pub fn from_text(content: &str) -> Result<Self> {
        let mut tables: Vec<TableDescriptor> = Vec::new();

        for (line_no, line) in content.lines().enumerate() {
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') || trimmed.eq_ignore_ascii_case("columns:") {
                continue;
            }

            if let Some(caps) = TABLE_LINE.captures(trimmed) {
                tables.push(TableDescriptor {
                    name: caps[1].to_string(),
                    description: String::new(),
                    columns: Vec::new(),
                });
                continue;
            }

            let current = tables.last_mut().ok_or_else(|| {
                PipelineError::Catalog(format!("Line {}: content before the first table", line_no + 1))
            })?;

            if let Some(caps) = COLUMN_LINE.captures(line) {
                let column = ColumnDescriptor::from_tag(&caps[1], &caps[2], &caps[3])?;
                current.columns.push(column);
            } else if let Some(caps) = DESCRIPTION_LINE.captures(trimmed) {
                current.description = caps[1].trim().to_string();
            } else {
                return Err(PipelineError::Catalog(format!(
                    "Line {}: unrecognised catalog line '{}'",
                    line_no + 1,
                    trimmed
                )));
            }
        }

        debug!("Parsed {} catalog tables", tables.len());
        Self::new(tables)
    }

    /// Check structural invariants: unique tables, and every foreign key pointing
    /// at a table and column present in this catalog.
    pub fn validate(&self) -> Result<()> {
        if self.tables.is_empty() {
            return Err(PipelineError::Catalog("Catalog has no tables".to_string()));
        }

        let mut seen = HashSet::new();
        for table in &self.tables {
            if !seen.insert(table.name.to_lowercase()) {
                return Err(PipelineError::Catalog(format!("Duplicate table '{}'", table.name)));
            }
            if table.columns.is_empty() {
                return Err(PipelineError::Catalog(format!("Table '{}' has no columns", table.name)));
            }
        }

        for table in &self.tables {
            for column in &table.columns {
                if let ColumnRole::ForeignKey { table: target, column: target_column } = &column.role {
                    let target_table = self.find_table(target).ok_or_else(|| {
                        PipelineError::Catalog(format!(
                            "{}.{} references unknown table '{}'",
                            table.name, column.name, target
                        ))
                    })?;
                    if target_table.column(target_column).is_none() {
                        return Err(PipelineError::Catalog(format!(
                            "{}.{} references unknown column '{}.{}'",
                            table.name, column.name, target, target_column
                        )));
                    }
                }
            }
        }

        Ok(())
    }

    pub fn tables(&self) -> &[TableDescriptor] {
        &self.tables
    }

    pub fn find_table(&self, name: &str) -> Option<&TableDescriptor> {
        self.tables
            .iter()
            .find(|t| t.name.eq_ignore_ascii_case(name))
            .or_else(|| self.tables.iter().find(|t| t.matches(name)))
    }

    /// Column names of `table`, in catalog order.
    pub fn column_names(&self, table: &str) -> Option<Vec<&str>> {
        self.find_table(table)
            .map(|t| t.columns.iter().map(|c| c.name.as_str()).collect())
    }

    pub fn table_names(&self) -> Vec<&str> {
        self.tables.iter().map(|t| t.name.as_str()).collect()
    }

    /// Render the catalog in its text format, for embedding in prompts.
    pub fn describe(&self) -> String {
        let mut out = String::new();
        for (idx, table) in self.tables.iter().enumerate() {
            if idx > 0 {
                out.push('\n');
            }
            out.push_str(&format!("General Table name: {}\n", table.name));
            out.push_str(&format!("Description: {}\n", table.description));
            out.push_str("Columns:\n");
            for column in &table.columns {
                out.push_str(&format!(
                    "  {} ({}) Description : \"{}\"\n",
                    column.name,
                    column.tag(),
                    column.description
                ));
            }
        }
        out
    }

    /// ID columns whose values carry curly braces and must be stripped before comparison.
    pub fn identifier_columns(&self) -> BTreeSet<String> {
        self.tables
            .iter()
            .flat_map(|t| t.columns.iter())
            .filter(|c| c.is_identifier())
            .map(|c| c.name.to_lowercase())
            .collect()
    }

    /// Catalog columns most similar to `name`, best first.
    pub fn suggest_columns(&self, name: &str, limit: usize) -> Vec<String> {
        let needle = short_name(name).to_lowercase();
        let needle = needle.as_str();
        let mut scored: Vec<(f64, String)> = self
            .tables
            .iter()
            .flat_map(|t| {
                t.columns
                    .iter()
                    .map(move |c| (jaro_winkler(needle, &c.name.to_lowercase()), format!("{}.{}", t.name, c.name)))
            })
            .filter(|(score, _)| *score >= 0.8)
            .collect();
        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        scored.into_iter().take(limit).map(|(_, name)| name).collect()
    }
}
