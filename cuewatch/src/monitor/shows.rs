//! Active shows with their subscriptions nested underneath.

use super::{ColumnModel, Monitor, MonitorCore, NestedNode, SortKey};
use crate::model::{EntityKey, Keyed, Show, Subscription};
use crate::pool::TickScheduler;
use crate::rpc::{CueClient, CueError};

use std::collections::HashMap;

pub const SHOW_UPDATE_INTERVAL: u32 = 60;

#[derive(Debug, Clone, PartialEq)]
pub enum ShowNode {
    Show(Show),
    Subscription(Subscription),
}

impl Keyed for ShowNode {
    fn key(&self) -> EntityKey {
        match self {
            ShowNode::Show(show) => show.key(),
            ShowNode::Subscription(sub) => sub.key(),
        }
    }
    fn label(&self) -> &str {
        match self {
            ShowNode::Show(show) => show.label(),
            ShowNode::Subscription(sub) => sub.label(),
        }
    }
}

pub struct ShowMonitor {
    core: MonitorCore<ShowNode>,
    columns: ColumnModel<ShowNode>,
}

impl Default for ShowMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl ShowMonitor {
    pub fn new() -> ShowMonitor {
        ShowMonitor {
            core: MonitorCore::new("refresh:Shows", TickScheduler::new(SHOW_UPDATE_INTERVAL)),
            columns: show_columns(),
        }
    }

    pub fn columns(&self) -> &ColumnModel<ShowNode> {
        &self.columns
    }
}

impl Monitor for ShowMonitor {
    type Entity = ShowNode;

    fn core(&self) -> &MonitorCore<ShowNode> {
        &self.core
    }

    fn get_update(&self, client: &dyn CueClient) -> Result<Vec<ShowNode>, CueError> {
        let mut records = Vec::new();
        for show in client.get_active_shows()? {
            let subs = client.get_subscriptions(&show.name)?;
            records.push(ShowNode::Show(show));
            records.extend(subs.into_iter().map(ShowNode::Subscription));
        }
        Ok(records)
    }

    fn process_update(&self, records: Vec<ShowNode>) {
        let mut shows: Vec<Show> = Vec::new();
        let mut subs: HashMap<String, Vec<Subscription>> = HashMap::new();
        for record in records {
            match record {
                ShowNode::Show(show) => shows.push(show),
                ShowNode::Subscription(sub) => {
                    subs.entry(sub.show_name.clone()).or_default().push(sub)
                }
            }
        }
        let tree: Vec<NestedNode<ShowNode>> = shows
            .into_iter()
            .map(|show| {
                let children = subs
                    .remove(&show.name)
                    .unwrap_or_default()
                    .into_iter()
                    .map(|sub| NestedNode::leaf(ShowNode::Subscription(sub)))
                    .collect();
                NestedNode {
                    entity: ShowNode::Show(show),
                    children,
                }
            })
            .collect();
        self.core.registry.merge_nested(tree);
    }
}

fn show_columns() -> ColumnModel<ShowNode> {
    ColumnModel::builder()
        .column("Show", "name", 26, |n: &ShowNode| n.label().to_string())
        .sort(|n: &ShowNode| SortKey::Text(n.label().to_string()))
        .column("Cores", "cores", 8, |n: &ShowNode| match n {
            ShowNode::Show(s) => format!("{:.2}", s.reserved_cores),
            ShowNode::Subscription(sub) => format!("{:.2}", sub.reserved_cores),
        })
        .column("Size", "size", 8, |n: &ShowNode| match n {
            ShowNode::Show(_) => String::new(),
            ShowNode::Subscription(sub) => format!("{:.0}", sub.size),
        })
        .column("Burst", "burst", 8, |n: &ShowNode| match n {
            ShowNode::Show(_) => String::new(),
            ShowNode::Subscription(sub) => format!("{:.0}", sub.burst),
        })
        .column("Jobs", "jobs", 6, |n: &ShowNode| match n {
            ShowNode::Show(s) => s.pending_jobs.to_string(),
            ShowNode::Subscription(_) => String::new(),
        })
        .build()
}
