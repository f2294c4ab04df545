//! Variable planning: the interactive controls the dashboard declares.

use anomdash_core::config::ThresholdConfig;
use anomdash_core::{ColumnSchema, Variable, VariableSource};

use crate::kql::{Pipeline, ident};
use crate::token::THRESHOLD_VARIABLE;

/// Declare one multi-value control per dimension, then the threshold
/// control.
///
/// Dimension controls are query-sourced; only the distinct-values query is
/// emitted here, nothing is executed.
pub fn plan(schema: &ColumnSchema, table: &str, threshold: &ThresholdConfig) -> Vec<Variable> {
    let mut variables: Vec<Variable> = schema
        .dimensions()
        .map(|dimension| Variable {
            name: dimension.to_string(),
            label: dimension.to_string(),
            source: VariableSource::Query {
                query: distinct_values_query(table, dimension),
                values: Vec::new(),
            },
            multi_value: true,
        })
        .collect();

    variables.push(threshold_variable(threshold));
    variables
}

/// Distinct values of `column` in `table`, as strings, sorted.
pub fn distinct_values_query(table: &str, column: &str) -> String {
    let column = ident(column);
    Pipeline::new(ident(table))
        .pipe(format!("project {column} = tostring({column})"))
        .pipe(format!("distinct {column}"))
        .pipe(format!("sort by {column} asc"))
        .render()
}

pub fn threshold_variable(threshold: &ThresholdConfig) -> Variable {
    Variable {
        name: THRESHOLD_VARIABLE.to_string(),
        label: "Anomaly Threshold".to_string(),
        source: VariableSource::StaticList {
            values: threshold.preset_values(),
            default: threshold.default_value(),
        },
        multi_value: false,
    }
}
