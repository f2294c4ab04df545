//! Referential closure of an assembled dashboard.
//!
//! Runs as a standalone pass over a finished [`Dashboard`]: panels must
//! reference owned queries, every token in a referenced query or a panel
//! title must name a declared variable, a repeated panel must repeat over a
//! declared variable, and every declared variable must be referenced.

use std::collections::BTreeSet;

use anomdash_core::{AssemblyError, Dashboard, VariableSource};

use crate::token;

pub fn validate(dashboard: &Dashboard) -> Result<(), AssemblyError> {
    let mut declared = BTreeSet::new();
    for variable in &dashboard.variables {
        if !declared.insert(variable.name.as_str()) {
            return Err(AssemblyError::DuplicateVariable(variable.name.clone()));
        }
    }

    // Text reachable from rows, in layout order, then variable queries.
    let mut texts: Vec<&str> = Vec::new();
    for panel in dashboard.panels() {
        if let Some(repeat) = &panel.repeat {
            if !declared.contains(repeat.as_str()) {
                return Err(AssemblyError::UnboundToken(repeat.clone()));
            }
        }
        texts.push(&panel.title);
        for key in &panel.query_refs {
            let query = dashboard
                .query(key)
                .ok_or_else(|| AssemblyError::DanglingQueryRef {
                    panel: panel.title.clone(),
                    key: key.clone(),
                })?;
            texts.push(&query.text);
        }
    }
    for variable in &dashboard.variables {
        if let VariableSource::Query { query, .. } = &variable.source {
            texts.push(query);
        }
    }

    let mut referenced = BTreeSet::new();
    for text in texts {
        for name in token::scan(text) {
            if !declared.contains(name.as_str()) {
                return Err(AssemblyError::UnboundToken(name));
            }
            referenced.insert(name);
        }
    }

    if let Some(unused) = dashboard
        .variables
        .iter()
        .find(|v| !referenced.contains(&v.name))
    {
        return Err(AssemblyError::UnusedVariable(unused.name.clone()));
    }

    Ok(())
}
