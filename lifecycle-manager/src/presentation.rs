//! Turns registry snapshots into the two column table and its row menus,
//! and routes menu selections back to the orchestrator.

use crate::orchestrator::{TransitionOrchestrator, TransitionTicket};
use lifecycle_protocol::view::{Alignment, Cell, MenuEntry, NOT_LOADED};
use lifecycle_protocol::{
    Action, LifecycleState, NodeRow, NodeState, StatusIcon, SubmitError, TransitionService,
};
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PresentationError {
    #[error("no row {row} (table has {len} rows)")]
    NoSuchRow { row: usize, len: usize },

    #[error(transparent)]
    Submit(#[from] SubmitError),
}

/// Builds the row for one node.
pub fn render_row(node: &NodeState) -> NodeRow {
    let name = Cell {
        text: node.name.clone(),
        icon: Some(StatusIcon::from(node.state)),
        bold: true,
        alignment: Alignment::Left,
    };
    let state = Cell {
        text: match node.state {
            LifecycleState::Unknown => NOT_LOADED.to_string(),
            known => known.label().to_string(),
        },
        icon: None,
        bold: false,
        alignment: Alignment::Center,
    };

    NodeRow {
        name: node.name.clone(),
        state: node.state,
        stale: node.stale,
        cells: [name, state],
        menu: node.state.actions().into_iter().map(MenuEntry::from).collect(),
    }
}

pub fn render(snapshot: &[NodeState]) -> Vec<NodeRow> {
    snapshot.iter().map(render_row).collect()
}

/// Table model for one view of the fleet.
///
/// Rows only change on `refresh`, so a row index stays stable between the
/// moment a menu is opened and the moment an entry is picked.
pub struct PresentationAdapter<S: ?Sized> {
    orchestrator: Arc<TransitionOrchestrator<S>>,
    rows: Vec<NodeRow>,
}

impl<S: TransitionService + ?Sized + 'static> PresentationAdapter<S> {
    pub fn new(orchestrator: Arc<TransitionOrchestrator<S>>) -> Self {
        Self {
            orchestrator,
            rows: Vec::new(),
        }
    }

    /// Replaces the whole table.
    pub fn refresh(&mut self, snapshot: &[NodeState]) {
        self.rows = render(snapshot);
    }

    pub fn rows(&self) -> &[NodeRow] {
        &self.rows
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn menu(&self, row: usize) -> Result<&[MenuEntry], PresentationError> {
        Ok(&self.row(row)?.menu)
    }

    /// Submits `action` for the node shown in `row`.
    ///
    /// An action the row does not offer is refused here; the transition
    /// service is never contacted for it.
    pub fn select(&self, row: usize, action: Action) -> Result<TransitionTicket, PresentationError> {
        let row = self.row(row)?;
        if !row.offers(action) {
            let steps = action.steps();
            let (step, transition) = match row.state.walk(steps) {
                Err(illegal) => illegal,
                // Offered menus come from the same walk; this is a stale row.
                Ok(_) => (0, steps[0]),
            };
            return Err(SubmitError::IllegalTransition {
                node: row.name.clone(),
                state: row.state,
                step,
                transition,
            }
            .into());
        }
        Ok(self.orchestrator.submit(&row.name, action.steps())?)
    }

    fn row(&self, row: usize) -> Result<&NodeRow, PresentationError> {
        self.rows.get(row).ok_or(PresentationError::NoSuchRow {
            row,
            len: self.rows.len(),
        })
    }
}
