//! Master variable catalog model.
//!
//! # Responsibility
//! - Define master variables (tier-1 defaults) and their grouping.
//! - Validate names and typed values before persistence.
//!
//! # Invariants
//! - `name` is a unique hierarchical dotted key, e.g. `org.coordinator.phone`.
//! - `default_value`, when set, is valid for `var_type`.
//! - `select` variables carry at least one option.

use crate::model::validation::{require_text, ValidationError};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Stable identifier of a master variable.
pub type MasterVarId = Uuid;

/// Stable identifier of a variable group.
pub type GroupId = Uuid;

static VARIABLE_NAME_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[a-z0-9_]+(\.[a-z0-9_]+)*$").expect("valid variable name regex")
});
static DATE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d{4})-(\d{2})-(\d{2})$").expect("valid date regex"));

/// Declared value type of a master variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VariableType {
    Text,
    Number,
    /// Calendar date as `YYYY-MM-DD`.
    Date,
    /// `true` or `false`.
    Boolean,
    /// One of the variable's `options`.
    Select,
}

impl VariableType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Number => "number",
            Self::Date => "date",
            Self::Boolean => "boolean",
            Self::Select => "select",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "text" => Some(Self::Text),
            "number" => Some(Self::Number),
            "date" => Some(Self::Date),
            "boolean" => Some(Self::Boolean),
            "select" => Some(Self::Select),
            _ => None,
        }
    }
}

/// Globally defined placeholder with one canonical default value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MasterVariable {
    pub id: MasterVarId,
    pub name: String,
    pub description: Option<String>,
    #[serde(rename = "type")]
    pub var_type: VariableType,
    /// Allowed values; meaningful only for `VariableType::Select`.
    pub options: Vec<String>,
    pub default_value: Option<String>,
    pub is_active: bool,
    pub created_by: String,
    /// Epoch milliseconds.
    pub created_at: i64,
    /// Epoch milliseconds.
    pub updated_at: i64,
}

impl MasterVariable {
    /// Creates an active variable with a generated id and no default.
    pub fn new(
        name: impl Into<String>,
        var_type: VariableType,
        created_by: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            description: None,
            var_type,
            options: Vec::new(),
            default_value: None,
            is_active: true,
            created_by: created_by.into(),
            created_at: 0,
            updated_at: 0,
        }
    }

    /// Validates name, options and default value.
    pub fn validate(&self) -> Result<(), ValidationError> {
        validate_variable_name(&self.name)?;
        require_text("created_by", &self.created_by)?;
        if self.var_type == VariableType::Select && self.options.is_empty() {
            return Err(ValidationError::MissingSelectOptions);
        }
        self.validate_value(self.default_value.as_deref())
    }

    /// Checks that `value` fits this variable's type. `None` is always valid.
    pub fn validate_value(&self, value: Option<&str>) -> Result<(), ValidationError> {
        let Some(value) = value else {
            return Ok(());
        };
        let invalid = |reason: &'static str| ValidationError::InvalidValue {
            var_type: self.var_type.as_str(),
            value: value.to_string(),
            reason,
        };

        match self.var_type {
            VariableType::Text => Ok(()),
            VariableType::Number => match value.trim().parse::<f64>() {
                Ok(number) if number.is_finite() => Ok(()),
                _ => Err(invalid("not a finite number")),
            },
            VariableType::Boolean => match value {
                "true" | "false" => Ok(()),
                _ => Err(invalid("expected `true` or `false`")),
            },
            VariableType::Date => {
                if is_calendar_date(value) {
                    Ok(())
                } else {
                    Err(invalid("expected YYYY-MM-DD"))
                }
            }
            VariableType::Select => {
                if self.options.iter().any(|option| option == value) {
                    Ok(())
                } else {
                    Err(invalid("not one of the declared options"))
                }
            }
        }
    }
}

/// Named collection of master variables for list/edit UIs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariableGroup {
    pub id: GroupId,
    pub name: String,
    pub description: Option<String>,
}

/// Membership of one variable in one group, as seen from the variable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupRef {
    pub group_id: GroupId,
    pub name: String,
    pub sort_order: i64,
}

/// Member of a group, ordered by `sort_order`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupMember {
    pub variable: MasterVariable,
    pub sort_order: i64,
}

/// Validates a hierarchical dotted key such as `finance.accommodation.weekly_rent`.
pub fn validate_variable_name(name: &str) -> Result<(), ValidationError> {
    if VARIABLE_NAME_RE.is_match(name) {
        Ok(())
    } else {
        Err(ValidationError::InvalidVariableName(name.to_string()))
    }
}

fn is_calendar_date(value: &str) -> bool {
    let Some(caps) = DATE_RE.captures(value) else {
        return false;
    };
    let year = caps[1].parse::<u32>().unwrap_or(0);
    let month = caps[2].parse::<u32>().unwrap_or(0);
    let day = caps[3].parse::<u32>().unwrap_or(0);
    let last_day = match month {
        1 | 3 | 5 | 7 | 8 | 10 | 12 => 31,
        4 | 6 | 9 | 11 => 30,
        2 if is_leap_year(year) => 29,
        2 => 28,
        _ => return false,
    };
    (1..=last_day).contains(&day)
}

fn is_leap_year(year: u32) -> bool {
    (year % 4 == 0 && year % 100 != 0) || year % 400 == 0
}

#[cfg(test)]
mod tests {
    use super::{validate_variable_name, MasterVariable, VariableType};
    use crate::model::validation::ValidationError;

    #[test]
    fn variable_name_accepts_dotted_lowercase_keys() {
        validate_variable_name("org.coordinator.phone").unwrap();
        validate_variable_name("finance.accommodation.weekly_rent").unwrap();
    }

    #[test]
    fn variable_name_rejects_empty_segments_and_uppercase() {
        assert!(validate_variable_name("org..phone").is_err());
        assert!(validate_variable_name(".org").is_err());
        assert!(validate_variable_name("Org.Phone").is_err());
        assert!(validate_variable_name("").is_err());
    }

    #[test]
    fn typed_values_are_checked() {
        let number = MasterVariable::new("fees.hourly", VariableType::Number, "admin");
        number.validate_value(Some("150.5")).unwrap();
        assert!(number.validate_value(Some("$150")).is_err());
        for raw in ["NaN", "inf", "-infinity"] {
            assert!(number.validate_value(Some(raw)).is_err(), "{raw}");
        }

        let flag = MasterVariable::new("flags.urgent", VariableType::Boolean, "admin");
        flag.validate_value(Some("true")).unwrap();
        assert!(flag.validate_value(Some("yes")).is_err());

        let date = MasterVariable::new("dates.start", VariableType::Date, "admin");
        date.validate_value(Some("2024-02-29")).unwrap();
        assert!(date.validate_value(Some("2024-13-01")).is_err());
        assert!(date.validate_value(Some("29/02/2024")).is_err());
        assert!(date.validate_value(Some("2024-02-31")).is_err());
        assert!(date.validate_value(Some("2023-02-29")).is_err());
        assert!(date.validate_value(Some("2024-04-31")).is_err());
        date.validate_value(Some("2000-02-29")).unwrap();
        assert!(date.validate_value(Some("1900-02-29")).is_err());
    }

    #[test]
    fn select_requires_options_and_membership() {
        let mut state = MasterVariable::new("org.state", VariableType::Select, "admin");
        assert_eq!(
            state.validate().unwrap_err(),
            ValidationError::MissingSelectOptions
        );

        state.options = vec!["NSW".to_string(), "VIC".to_string()];
        state.default_value = Some("VIC".to_string());
        state.validate().unwrap();

        state.default_value = Some("QLD".to_string());
        assert!(state.validate().is_err());
    }

    #[test]
    fn missing_value_is_always_valid() {
        let number = MasterVariable::new("fees.hourly", VariableType::Number, "admin");
        number.validate_value(None).unwrap();
    }
}
