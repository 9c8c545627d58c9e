//! Declarative column tables.
//!
//! Each item type gets one table of `(title, width, id, display, sort,
//! delegate, tooltip, default visibility)` built once through the fluent
//! builder. The table drives painting (with a per-item display cache),
//! sorting (typed keys with a display-text fallback), the visibility menu,
//! and the persisted `(widths, order, visibility)` layout.

use super::registry::VisibleRow;
use crate::model::{EntityKey, Keyed};

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Mutex;

/// Typed sort key. Mixed variants fall back to their textual form, which
/// keeps comparators total without reflective tricks.
#[derive(Debug, Clone, PartialEq)]
pub enum SortKey {
    Int(i64),
    Float(f64),
    Text(String),
}

impl SortKey {
    fn cmp_key(&self, other: &SortKey) -> Option<Ordering> {
        match (self, other) {
            (SortKey::Int(a), SortKey::Int(b)) => Some(a.cmp(b)),
            (SortKey::Float(a), SortKey::Float(b)) => a.partial_cmp(b),
            (SortKey::Text(a), SortKey::Text(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }
}

/// How a cell paints. The console renders ProgressBar as a percentage bar
/// and SegmentBar as stacked per-state segments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delegate {
    Text,
    ProgressBar,
    SegmentBar,
}

pub struct Column<E> {
    pub title: &'static str,
    pub id: &'static str,
    pub width: u16,
    pub tooltip: &'static str,
    pub default_visible: bool,
    pub delegate: Delegate,
    /// Never cached; for cells derived from the wall clock (runtimes,
    /// LLUs) that must move on repaint without the entity changing.
    pub volatile: bool,
    display: fn(&E) -> String,
    sort: Option<fn(&E) -> SortKey>,
}

/// Persisted visual state: widths per logical column, visual-to-logical
/// order permutation, per-logical visibility flags.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnLayout {
    pub widths: Vec<u16>,
    pub order: Vec<usize>,
    pub visible: Vec<bool>,
}

pub struct ColumnModel<E> {
    columns: Vec<Column<E>>,
    cache: Mutex<HashMap<(EntityKey, usize), (u64, String)>>,
}

pub struct ColumnModelBuilder<E> {
    columns: Vec<Column<E>>,
}

impl<E> ColumnModelBuilder<E> {
    /// Start a new column. Modifiers apply to the most recent one.
    pub fn column(
        mut self,
        title: &'static str,
        id: &'static str,
        width: u16,
        display: fn(&E) -> String,
    ) -> Self {
        self.columns.push(Column {
            title,
            id,
            width,
            tooltip: "",
            default_visible: width > 0,
            delegate: Delegate::Text,
            volatile: false,
            display,
            sort: None,
        });
        self
    }

    pub fn volatile(mut self) -> Self {
        if let Some(last) = self.columns.last_mut() {
            last.volatile = true;
        }
        self
    }

    pub fn sort(mut self, sort: fn(&E) -> SortKey) -> Self {
        if let Some(last) = self.columns.last_mut() {
            last.sort = Some(sort);
        }
        self
    }

    pub fn tooltip(mut self, tooltip: &'static str) -> Self {
        if let Some(last) = self.columns.last_mut() {
            last.tooltip = tooltip;
        }
        self
    }

    pub fn hidden(mut self) -> Self {
        if let Some(last) = self.columns.last_mut() {
            last.default_visible = false;
        }
        self
    }

    pub fn delegate(mut self, delegate: Delegate) -> Self {
        if let Some(last) = self.columns.last_mut() {
            last.delegate = delegate;
        }
        self
    }

    pub fn build(self) -> ColumnModel<E> {
        ColumnModel {
            columns: self.columns,
            cache: Mutex::new(HashMap::new()),
        }
    }
}

/// Pruning bound for the display cache; past this it is simply dropped.
const CACHE_LIMIT: usize = 50_000;

impl<E: Keyed> ColumnModel<E> {
    pub fn builder() -> ColumnModelBuilder<E> {
        ColumnModelBuilder {
            columns: Vec::new(),
        }
    }

    pub fn columns(&self) -> &[Column<E>] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Display text for one cell, cached until the entity is replaced.
    pub fn display(&self, row: &VisibleRow<E>, col: usize) -> String {
        let column = match self.columns.get(col) {
            Some(c) => c,
            None => return String::new(),
        };
        if column.volatile {
            return (column.display)(&row.entity);
        }
        let mut cache = self.cache.lock().unwrap_or_else(|p| p.into_inner());
        if let Some((generation, text)) = cache.get(&(row.key.clone(), col)) {
            if *generation == row.generation {
                return text.clone();
            }
        }
        let text = (column.display)(&row.entity);
        if cache.len() >= CACHE_LIMIT {
            cache.clear();
        }
        cache.insert((row.key.clone(), col), (row.generation, text.clone()));
        text
    }

    /// Sort rows by a column's key, descending on request. Without a sort
    /// key, or when keys are incomparable, falls back to lexicographic
    /// display text.
    pub fn sort_rows(&self, rows: &mut [VisibleRow<E>], col: usize, descending: bool) {
        let column = match self.columns.get(col) {
            Some(c) => c,
            None => return,
        };
        rows.sort_by(|a, b| {
            let ord = match column.sort {
                Some(sort) => sort(&a.entity)
                    .cmp_key(&sort(&b.entity))
                    .unwrap_or_else(|| (column.display)(&a.entity).cmp(&(column.display)(&b.entity))),
                None => (column.display)(&a.entity).cmp(&(column.display)(&b.entity)),
            };
            if descending {
                ord.reverse()
            } else {
                ord
            }
        });
    }

    pub fn default_layout(&self) -> ColumnLayout {
        ColumnLayout {
            widths: self.columns.iter().map(|c| c.width).collect(),
            order: (0..self.columns.len()).collect(),
            visible: self.columns.iter().map(|c| c.default_visible).collect(),
        }
    }

    /// Validate a restored layout; anything inconsistent with the current
    /// column table falls back to the defaults.
    pub fn restore_layout(&self, layout: ColumnLayout) -> ColumnLayout {
        let n = self.columns.len();
        let mut sorted = layout.order.clone();
        sorted.sort_unstable();
        let order_ok = sorted == (0..n).collect::<Vec<_>>();
        if layout.widths.len() != n || layout.visible.len() != n || !order_ok {
            return self.default_layout();
        }
        layout
    }

    /// Logical column indexes in visual order, visible columns only.
    pub fn visual_columns(&self, layout: &ColumnLayout) -> Vec<usize> {
        layout
            .order
            .iter()
            .copied()
            .filter(|i| layout.visible.get(*i).copied().unwrap_or(false))
            .collect()
    }

    /// Entries for the column-visibility menu. Columns registered with
    /// width zero are tooling-only and stay out of the menu until a layout
    /// re-shows them.
    pub fn visibility_menu(&self, layout: &ColumnLayout) -> Vec<(usize, &'static str, bool)> {
        self.columns
            .iter()
            .enumerate()
            .filter(|(i, c)| c.width > 0 || layout.visible.get(*i).copied().unwrap_or(false))
            .map(|(i, c)| (i, c.title, layout.visible.get(i).copied().unwrap_or(false)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{EntityKey, EntityKind};
    use uuid::Uuid;

    #[derive(Debug, Clone)]
    struct Rec {
        id: Uuid,
        name: String,
        cores: f64,
    }

    impl Keyed for Rec {
        fn key(&self) -> EntityKey {
            EntityKey::new(EntityKind::Job, self.id)
        }
        fn label(&self) -> &str {
            &self.name
        }
    }

    fn model() -> ColumnModel<Rec> {
        ColumnModel::builder()
            .column("Name", "name", 30, |r: &Rec| r.name.clone())
            .sort(|r: &Rec| SortKey::Text(r.name.clone()))
            .tooltip("The job name")
            .column("Cores", "cores", 8, |r: &Rec| format!("{:.2}", r.cores))
            .sort(|r: &Rec| SortKey::Float(r.cores))
            .column("Debug", "debug", 0, |r: &Rec| format!("{:?}", r.id))
            .hidden()
            .build()
    }

    fn row(name: &str, cores: f64, generation: u64) -> VisibleRow<Rec> {
        let rec = Rec {
            id: Uuid::new_v4(),
            name: name.to_string(),
            cores,
        };
        VisibleRow {
            key: rec.key(),
            entity: rec,
            depth: 0,
            selected: false,
            expanded: false,
            has_children: false,
            generation,
        }
    }

    #[test]
    fn display_caches_until_generation_changes() {
        let model = model();
        let mut r = row("alpha", 1.0, 0);
        assert_eq!(model.display(&r, 0), "alpha");
        // Mutate the entity without bumping the generation: stale cache.
        r.entity.name = "beta".to_string();
        assert_eq!(model.display(&r, 0), "alpha");
        r.generation = 1;
        assert_eq!(model.display(&r, 0), "beta");
    }

    #[test]
    fn sorts_by_key_then_reversed() {
        let model = model();
        let mut rows = vec![row("b", 2.0, 0), row("a", 8.0, 0), row("c", 1.0, 0)];
        model.sort_rows(&mut rows, 1, false);
        let cores: Vec<f64> = rows.iter().map(|r| r.entity.cores).collect();
        assert_eq!(cores, vec![1.0, 2.0, 8.0]);
        model.sort_rows(&mut rows, 1, true);
        let cores: Vec<f64> = rows.iter().map(|r| r.entity.cores).collect();
        assert_eq!(cores, vec![8.0, 2.0, 1.0]);
    }

    #[test]
    fn nan_keys_fall_back_to_display_text() {
        let model = model();
        let mut rows = vec![row("b", f64::NAN, 0), row("a", f64::NAN, 0)];
        model.sort_rows(&mut rows, 1, false);
        assert_eq!(rows.len(), 2);
    }

    #[test]
    fn layout_round_trips_through_json() {
        let model = model();
        let mut layout = model.default_layout();
        layout.order = vec![1, 0, 2];
        layout.visible[2] = true;
        let text = serde_json::to_string(&layout).unwrap();
        let back: ColumnLayout = serde_json::from_str(&text).unwrap();
        assert_eq!(model.restore_layout(back), layout);
    }

    #[test]
    fn bad_restored_layout_falls_back_to_default() {
        let model = model();
        let bad = ColumnLayout {
            widths: vec![1],
            order: vec![0, 0, 1],
            visible: vec![true],
        };
        assert_eq!(model.restore_layout(bad), model.default_layout());
    }

    #[test]
    fn zero_width_columns_stay_out_of_the_menu() {
        let model = model();
        let layout = model.default_layout();
        let menu = model.visibility_menu(&layout);
        assert_eq!(menu.len(), 2);
        assert!(menu.iter().all(|(_, title, _)| *title != "Debug"));

        // Re-shown through a restored layout, it reappears.
        let mut layout = model.default_layout();
        layout.visible[2] = true;
        let menu = model.visibility_menu(&layout);
        assert_eq!(menu.len(), 3);
    }

    #[test]
    fn visual_columns_follow_order_and_visibility() {
        let model = model();
        let mut layout = model.default_layout();
        layout.order = vec![1, 2, 0];
        assert_eq!(model.visual_columns(&layout), vec![1, 0]);
    }
}
