//! Notebook files for the `run` command.
//!
//! ```toml
//! order = ["load", "scale", "load"]
//!
//! [settings]
//! exec_schedule = "dag_based"
//!
//! [[cells]]
//! id = "load"
//! content = "x = 1"
//! ```
//!
//! Cells are positioned in file order. `order` lists the executions to
//! replay; when omitted every code cell runs once, top to bottom.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{bail, Context, Result};
use cellflow_dataflow::{CellId, CellMetadata, Settings};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct Notebook {
    #[serde(default)]
    pub order: Vec<CellId>,
    pub settings: Option<Settings>,
    #[serde(default)]
    pub cells: Vec<NotebookCell>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NotebookCell {
    pub id: CellId,
    #[serde(rename = "type", default = "NotebookCell::code")]
    pub cell_type: String,
    pub content: String,
}

impl NotebookCell {
    fn code() -> String {
        "code".to_string()
    }

    pub fn is_code(&self) -> bool {
        self.cell_type == "code"
    }
}

impl Notebook {
    pub fn from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read notebook {}", path.display()))?;
        Self::from_toml_str(&content)
            .with_context(|| format!("invalid notebook {}", path.display()))
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let notebook: Self = toml::from_str(content)?;
        let mut seen = std::collections::BTreeSet::new();
        for cell in &notebook.cells {
            if !seen.insert(cell.id.as_str()) {
                bail!("duplicate cell id `{}`", cell.id);
            }
        }
        Ok(notebook)
    }

    fn cell(&self, id: &str) -> Option<&NotebookCell> {
        self.cells.iter().find(|cell| cell.id == id)
    }

    /// The cells to execute, in execution order
    pub fn execution_order(&self) -> Result<Vec<&NotebookCell>> {
        if self.order.is_empty() {
            return Ok(self.cells.iter().filter(|cell| cell.is_code()).collect());
        }
        self.order
            .iter()
            .map(|id| match self.cell(id) {
                Some(cell) if cell.is_code() => Ok(cell),
                Some(_) => bail!("cell `{id}` is not a code cell"),
                None => bail!("`order` names unknown cell `{id}`"),
            })
            .collect()
    }

    /// What a frontend would report about the notebook after the run
    pub fn metadata(&self) -> BTreeMap<CellId, CellMetadata> {
        self.cells
            .iter()
            .enumerate()
            .map(|(index, cell)| {
                (
                    cell.id.clone(),
                    CellMetadata {
                        cell_type: cell.cell_type.clone(),
                        index: index as i64,
                        content: cell.content.clone(),
                        override_live_refs: None,
                        override_dead_refs: None,
                    },
                )
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cellflow_dataflow::ExecutionSchedule;
    use pretty_assertions::assert_eq;

    const NOTEBOOK: &str = r##"
order = ["a", "b", "a"]

[settings]
exec_schedule = "strict"

[[cells]]
id = "a"
content = "x = 1"

[[cells]]
id = "notes"
type = "markdown"
content = "# About x"

[[cells]]
id = "b"
content = "y = x + 1"
"##;

    #[test]
    fn test_parse_and_order() {
        let notebook = Notebook::from_toml_str(NOTEBOOK).unwrap();
        assert_eq!(
            notebook.settings.as_ref().map(|s| s.exec_schedule),
            Some(ExecutionSchedule::Strict)
        );
        let order: Vec<&str> = notebook
            .execution_order()
            .unwrap()
            .into_iter()
            .map(|cell| cell.id.as_str())
            .collect();
        assert_eq!(order, vec!["a", "b", "a"]);

        let metadata = notebook.metadata();
        assert_eq!(metadata["b"].index, 2);
        assert!(!metadata["notes"].is_checked());
    }

    #[test]
    fn test_default_order_skips_markdown() {
        let notebook = Notebook::from_toml_str(
            "[[cells]]\nid = \"m\"\ntype = \"markdown\"\ncontent = \"\"\n\n[[cells]]\nid = \"c\"\ncontent = \"z = 0\"\n",
        )
        .unwrap();
        let order = notebook.execution_order().unwrap();
        assert_eq!(order.len(), 1);
        assert_eq!(order[0].id, "c");
    }

    #[test]
    fn test_rejects_bad_notebooks() {
        let duplicate = "[[cells]]\nid = \"a\"\ncontent = \"\"\n[[cells]]\nid = \"a\"\ncontent = \"\"\n";
        assert!(Notebook::from_toml_str(duplicate).is_err());

        let unknown = Notebook::from_toml_str("order = [\"ghost\"]\n").unwrap();
        let err = unknown.execution_order().unwrap_err();
        assert_eq!(err.to_string(), "`order` names unknown cell `ghost`");
    }
}
