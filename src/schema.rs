use std::collections::HashSet;
use std::fmt;

use serde::Serialize;

use crate::error::SchemaError;

/// Which kind of entity a key names, and therefore which page and field table apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Zip,
    County,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityKind::Zip => f.write_str("zip"),
            EntityKind::County => f.write_str("county"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SqlType {
    Integer,
    Real,
}

impl SqlType {
    pub fn as_sql(&self) -> &'static str {
        match self {
            SqlType::Integer => "INTEGER",
            SqlType::Real => "REAL",
        }
    }
}

/// How a raw value is sliced out of the line that carries a field's anchor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Rule {
    /// `label</b> value<...`: skip `offset` bytes past `marker`, read to a delimiter.
    /// `after` names a secondary label that must follow the anchor before `marker`.
    TagBounded {
        after: Option<&'static str>,
        marker: &'static str,
        offset: usize,
        strip: Option<char>,
    },
    /// `label ... (value)`.
    Parenthesized { strip_sign: bool },
    /// Value follows the next unconsumed occurrence of a marker shared by several fields.
    Badge { marker: &'static str },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Normalize {
    /// `"12,345"` -> `"12345"`, empty -> `"0"`.
    Integer,
    /// `"12.3%"` -> `"0.1230"`, empty -> `"0.0"`.
    Percentage,
    /// `"1,234.5\r"` -> `"1234.5"`; anything that is not a finite number is a miss.
    Decimal,
}

impl Normalize {
    /// True when `value` is already in this rule's canonical shape.
    pub fn accepts(&self, value: &str) -> bool {
        match self {
            Normalize::Integer => !value.contains(',') && value.parse::<i64>().is_ok(),
            Normalize::Percentage => value.parse::<f64>().map(f64::is_finite).unwrap_or(false),
            Normalize::Decimal => {
                !value.contains(',')
                    && value.trim() == value
                    && value.parse::<f64>().is_ok_and(f64::is_finite)
            }
        }
    }

    /// Column type that every value this rule produces binds to.
    pub fn column_type(&self) -> SqlType {
        match self {
            Normalize::Integer => SqlType::Integer,
            Normalize::Percentage | Normalize::Decimal => SqlType::Real,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct FieldDefinition {
    /// Header label in the CSV export.
    pub name: &'static str,
    /// Column in the SQLite table.
    pub column: &'static str,
    pub sql_type: SqlType,
    pub anchor: &'static str,
    pub rule: Rule,
    pub normalize: Normalize,
    pub default: &'static str,
}

#[derive(Debug, Serialize)]
pub struct Schema {
    pub kind: EntityKind,
    pub table: &'static str,
    pub key_name: &'static str,
    pub key_column: &'static str,
    pub url_template: &'static str,
    pub fields: &'static [FieldDefinition],
}

impl Schema {
    pub fn for_kind(kind: EntityKind) -> &'static Schema {
        match kind {
            EntityKind::Zip => &ZIP_SCHEMA,
            EntityKind::County => &COUNTY_SCHEMA,
        }
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn field_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.fields.iter().map(|f| f.name)
    }

    /// Checks the invariants every table must hold before a run may start.
    pub fn validate(&self) -> Result<(), SchemaError> {
        if !is_identifier(self.table) {
            return Err(SchemaError::BadIdentifier(self.table.to_string()));
        }
        if !is_identifier(self.key_column) {
            return Err(SchemaError::BadIdentifier(self.key_column.to_string()));
        }

        let mut names = HashSet::new();
        let mut columns = HashSet::from([self.key_column]);
        names.insert(self.key_name);

        for field in self.fields {
            if !names.insert(field.name) {
                return Err(SchemaError::DuplicateName(field.name.to_string()));
            }
            if !is_identifier(field.column) {
                return Err(SchemaError::BadIdentifier(field.column.to_string()));
            }
            if !columns.insert(field.column) {
                return Err(SchemaError::DuplicateColumn(field.column.to_string()));
            }
            if field.anchor.is_empty() {
                return Err(SchemaError::EmptyAnchor(field.name.to_string()));
            }
            if field.normalize.column_type() != field.sql_type {
                return Err(SchemaError::TypeMismatch {
                    field: field.name.to_string(),
                    column_type: field.sql_type.as_sql(),
                });
            }
            if !field.normalize.accepts(field.default) {
                return Err(SchemaError::BadDefault {
                    field: field.name.to_string(),
                    default: field.default.to_string(),
                });
            }
        }
        Ok(())
    }
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_lowercase() || c == '_')
        && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}

// ── Built-in tables ──

const BADGE: &str = "<span class=\"badge\">";

pub static ZIP_SCHEMA: Schema = Schema {
    kind: EntityKind::Zip,
    table: "zip_code_stats",
    key_name: "Zip Code",
    key_column: "zip_code",
    url_template: "http://www.city-data.com/zips/{key}.html",
    fields: &[
        FieldDefinition {
            name: "Population",
            column: "population",
            sql_type: SqlType::Integer,
            anchor: "Estimated zip code population in 2016:",
            rule: Rule::TagBounded { after: None, marker: "</b>", offset: 1, strip: None },
            normalize: Normalize::Integer,
            default: "0",
        },
        FieldDefinition {
            name: "Median Household Income",
            column: "median_household_income",
            sql_type: SqlType::Integer,
            anchor: "Estimated median household income in 2016:",
            rule: Rule::TagBounded {
                after: Some("This zip code:"),
                marker: "</p>",
                offset: 0,
                strip: Some('$'),
            },
            normalize: Normalize::Integer,
            default: "0",
        },
        FieldDefinition {
            name: "Foreign Born Population",
            column: "foreign_born_fraction",
            sql_type: SqlType::Real,
            anchor: "Foreign born population:",
            rule: Rule::Parenthesized { strip_sign: false },
            normalize: Normalize::Percentage,
            default: "0.0",
        },
        FieldDefinition {
            name: "Median Resident Age",
            column: "median_resident_age",
            sql_type: SqlType::Real,
            anchor: "Median resident age:",
            rule: Rule::Badge { marker: BADGE },
            normalize: Normalize::Decimal,
            default: "0.0",
        },
        FieldDefinition {
            name: "Average Household Size",
            column: "average_household_size",
            sql_type: SqlType::Real,
            anchor: "Average household size:",
            rule: Rule::Badge { marker: BADGE },
            normalize: Normalize::Decimal,
            default: "0.0",
        },
        FieldDefinition {
            name: "Median House Value",
            column: "median_house_value",
            sql_type: SqlType::Integer,
            anchor: "Estimated median house or condo value in 2016:",
            rule: Rule::TagBounded { after: None, marker: "</b>", offset: 1, strip: Some('$') },
            normalize: Normalize::Integer,
            default: "0",
        },
        FieldDefinition {
            name: "Unemployment",
            column: "unemployment_fraction",
            sql_type: SqlType::Real,
            anchor: "Unemployed percentage:",
            rule: Rule::TagBounded { after: None, marker: "</b>", offset: 1, strip: None },
            normalize: Normalize::Percentage,
            default: "0.0",
        },
        FieldDefinition {
            name: "Land Area",
            column: "land_area_sq_mi",
            sql_type: SqlType::Real,
            anchor: "Land area:",
            rule: Rule::TagBounded { after: None, marker: "</b>", offset: 1, strip: None },
            normalize: Normalize::Decimal,
            default: "0.0",
        },
    ],
};

pub static COUNTY_SCHEMA: Schema = Schema {
    kind: EntityKind::County,
    table: "county_stats",
    key_name: "County",
    key_column: "county",
    url_template: "https://www.zip-codes.com/county/{key}.asp",
    fields: &[
        FieldDefinition {
            name: "Population",
            column: "population",
            sql_type: SqlType::Integer,
            anchor: "Population:",
            rule: Rule::TagBounded { after: None, marker: "</td>", offset: 4, strip: None },
            normalize: Normalize::Integer,
            default: "0",
        },
        FieldDefinition {
            name: "Households",
            column: "households",
            sql_type: SqlType::Integer,
            anchor: "Households:",
            rule: Rule::TagBounded { after: None, marker: "</td>", offset: 4, strip: None },
            normalize: Normalize::Integer,
            default: "0",
        },
        FieldDefinition {
            name: "Average Household Income",
            column: "average_household_income",
            sql_type: SqlType::Integer,
            anchor: "Average Household Income:",
            rule: Rule::TagBounded { after: None, marker: "</td>", offset: 4, strip: Some('$') },
            normalize: Normalize::Integer,
            default: "0",
        },
        FieldDefinition {
            name: "White Population",
            column: "white_fraction",
            sql_type: SqlType::Real,
            anchor: "Race - White:",
            rule: Rule::Parenthesized { strip_sign: false },
            normalize: Normalize::Percentage,
            default: "0.0",
        },
        FieldDefinition {
            name: "Median Age",
            column: "median_age",
            sql_type: SqlType::Real,
            anchor: "Median Age:",
            rule: Rule::TagBounded { after: None, marker: "</td>", offset: 4, strip: None },
            normalize: Normalize::Decimal,
            default: "0.0",
        },
        FieldDefinition {
            name: "Land Area",
            column: "land_area_sq_mi",
            sql_type: SqlType::Real,
            anchor: "Land Area:",
            rule: Rule::TagBounded { after: None, marker: "</td>", offset: 4, strip: None },
            normalize: Normalize::Decimal,
            default: "0.0",
        },
    ],
};
