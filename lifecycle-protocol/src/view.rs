//! Renderable table model handed to the presentation layer.

use crate::model::{Action, LifecycleState};
use serde::{Deserialize, Serialize};

pub const HEADERS: [&str; 2] = ["node", "state"];
pub const COLUMN_COUNT: usize = HEADERS.len();

/// Text shown in the state column before a state is confirmed.
pub const NOT_LOADED: &str = "not loaded";

/// Status LED shown next to a node name and on menu entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusIcon {
    Active,
    Inactive,
    Unconfigured,
    Finalized,
    Unknown,
}

impl From<LifecycleState> for StatusIcon {
    fn from(state: LifecycleState) -> Self {
        match state {
            LifecycleState::Active => StatusIcon::Active,
            LifecycleState::Inactive => StatusIcon::Inactive,
            LifecycleState::Unconfigured => StatusIcon::Unconfigured,
            LifecycleState::Finalized => StatusIcon::Finalized,
            LifecycleState::Unknown => StatusIcon::Unknown,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Alignment {
    Left,
    Center,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cell {
    pub text: String,
    pub icon: Option<StatusIcon>,
    pub bold: bool,
    pub alignment: Alignment,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MenuEntry {
    pub action: Action,
    pub label: String,
    pub icon: StatusIcon,
}

impl From<Action> for MenuEntry {
    fn from(action: Action) -> Self {
        Self {
            action,
            label: action.label().to_string(),
            icon: action.target().into(),
        }
    }
}

/// One table row: node name cell, state cell, and the row's action menu.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeRow {
    pub name: String,
    pub state: LifecycleState,
    pub stale: bool,
    pub cells: [Cell; COLUMN_COUNT],
    pub menu: Vec<MenuEntry>,
}

impl NodeRow {
    pub fn cell(&self, column: usize) -> Option<&Cell> {
        self.cells.get(column)
    }

    pub fn offers(&self, action: Action) -> bool {
        self.menu.iter().any(|entry| entry.action == action)
    }
}
