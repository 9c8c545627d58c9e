//! Show / group / job hierarchy.
//!
//! One tree per monitored show: the show at the root, its group tree
//! underneath, jobs as leaves of their group. The worker fetch is flat;
//! the merge rebuilds nesting from the parent references the records
//! carry, so the registry parents each node to the in-registry item of its
//! snapshot parent at visit time.

use super::{ColumnModel, Monitor, MonitorCore, NestedNode, SortKey};
use crate::model::{EntityKey, Group, Job, Keyed, Show};
use crate::pool::TickScheduler;
use crate::rpc::{CueClient, CueError, JobSearch};

use std::collections::HashMap;
use std::sync::Mutex;
use uuid::Uuid;

pub const CUEJOB_UPDATE_INTERVAL: u32 = 20;

#[derive(Debug, Clone, PartialEq)]
pub enum CueNode {
    Show(Show),
    Group(Group),
    Job(Job),
}

impl Keyed for CueNode {
    fn key(&self) -> EntityKey {
        match self {
            CueNode::Show(show) => show.key(),
            CueNode::Group(group) => group.key(),
            CueNode::Job(job) => job.key(),
        }
    }
    fn label(&self) -> &str {
        match self {
            CueNode::Show(show) => show.label(),
            CueNode::Group(group) => group.label(),
            CueNode::Job(job) => job.label(),
        }
    }
}

impl CueNode {
    pub fn as_job(&self) -> Option<&Job> {
        match self {
            CueNode::Job(job) => Some(job),
            _ => None,
        }
    }

    pub fn as_group(&self) -> Option<&Group> {
        match self {
            CueNode::Group(group) => Some(group),
            _ => None,
        }
    }
}

pub struct CueJobMonitor {
    core: MonitorCore<CueNode>,
    columns: ColumnModel<CueNode>,
    shows: Mutex<Vec<String>>,
}

impl Default for CueJobMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl CueJobMonitor {
    pub fn new() -> CueJobMonitor {
        CueJobMonitor {
            core: MonitorCore::new(
                "refresh:CueJobs",
                TickScheduler::new(CUEJOB_UPDATE_INTERVAL),
            ),
            columns: cuejob_columns(),
            shows: Mutex::new(Vec::new()),
        }
    }

    pub fn columns(&self) -> &ColumnModel<CueNode> {
        &self.columns
    }

    pub fn add_show(&self, name: &str) {
        let mut shows = self.shows.lock().unwrap_or_else(|p| p.into_inner());
        if !shows.iter().any(|s| s == name) {
            shows.push(name.to_string());
        }
        drop(shows);
        self.core.update_soon();
    }

    pub fn remove_show(&self, name: &str) {
        self.shows
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .retain(|s| s != name);
        self.core.update_soon();
    }

    pub fn shows(&self) -> Vec<String> {
        self.shows.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    pub fn clear(&self) {
        self.shows.lock().unwrap_or_else(|p| p.into_inner()).clear();
        self.core.registry.remove_all();
        self.core.with_ticker(|t| t.clear());
    }

    /// Move jobs into a group. The console asks for confirmation before
    /// calling this; here it is just the dispatch plus a prompt refresh.
    pub fn reparent_jobs(
        &self,
        client: &dyn CueClient,
        group: Uuid,
        jobs: &[Uuid],
    ) -> Result<(), CueError> {
        client.reparent_jobs(group, jobs)?;
        self.core.update_soon();
        Ok(())
    }

    pub fn reparent_groups(
        &self,
        client: &dyn CueClient,
        group: Uuid,
        groups: &[Uuid],
    ) -> Result<(), CueError> {
        client.reparent_groups(group, groups)?;
        self.core.update_soon();
        Ok(())
    }
}

impl Monitor for CueJobMonitor {
    type Entity = CueNode;

    fn core(&self) -> &MonitorCore<CueNode> {
        &self.core
    }

    fn get_update(&self, client: &dyn CueClient) -> Result<Vec<CueNode>, CueError> {
        let mut records = Vec::new();
        for name in self.shows() {
            let show = client.find_show(&name)?;
            records.push(CueNode::Show(show));
            for group in client.get_groups(&name)? {
                records.push(CueNode::Group(group));
            }
            let jobs = client.get_jobs(&JobSearch {
                shows: vec![name],
                ..Default::default()
            })?;
            records.extend(jobs.into_iter().map(CueNode::Job));
        }
        Ok(records)
    }

    fn process_update(&self, records: Vec<CueNode>) {
        // Split the flat fetch back into a forest. Groups attach to their
        // parent group, root groups to their show; jobs attach to their
        // group by name within the show.
        let mut shows: Vec<Show> = Vec::new();
        let mut groups: Vec<Group> = Vec::new();
        let mut jobs: Vec<Job> = Vec::new();
        for record in records {
            match record {
                CueNode::Show(s) => shows.push(s),
                CueNode::Group(g) => groups.push(g),
                CueNode::Job(j) => jobs.push(j),
            }
        }

        let mut group_children: HashMap<Uuid, Vec<Uuid>> = HashMap::new();
        let mut show_roots: HashMap<String, Vec<Uuid>> = HashMap::new();
        let by_id: HashMap<Uuid, Group> = groups.iter().map(|g| (g.id, g.clone())).collect();
        for group in &groups {
            match group.parent_id {
                Some(parent) if by_id.contains_key(&parent) => {
                    group_children.entry(parent).or_default().push(group.id)
                }
                _ => show_roots
                    .entry(group.show_name.clone())
                    .or_default()
                    .push(group.id),
            }
        }
        let mut jobs_by_group: HashMap<(String, String), Vec<Job>> = HashMap::new();
        for job in jobs {
            jobs_by_group
                .entry((job.show.clone(), job.group.clone()))
                .or_default()
                .push(job);
        }

        fn build_group(
            id: Uuid,
            by_id: &HashMap<Uuid, Group>,
            group_children: &HashMap<Uuid, Vec<Uuid>>,
            jobs_by_group: &mut HashMap<(String, String), Vec<Job>>,
        ) -> NestedNode<CueNode> {
            let group = by_id[&id].clone();
            let mut children: Vec<NestedNode<CueNode>> = group_children
                .get(&id)
                .map(|kids| {
                    kids.iter()
                        .map(|k| build_group(*k, by_id, group_children, jobs_by_group))
                        .collect()
                })
                .unwrap_or_default();
            if let Some(jobs) = jobs_by_group.remove(&(group.show_name.clone(), group.name.clone()))
            {
                children.extend(jobs.into_iter().map(|j| NestedNode::leaf(CueNode::Job(j))));
            }
            NestedNode {
                entity: CueNode::Group(group),
                children,
            }
        }

        let tree: Vec<NestedNode<CueNode>> = shows
            .into_iter()
            .map(|show| {
                let roots = show_roots.remove(&show.name).unwrap_or_default();
                NestedNode {
                    entity: CueNode::Show(show),
                    children: roots
                        .into_iter()
                        .map(|id| build_group(id, &by_id, &group_children, &mut jobs_by_group))
                        .collect(),
                }
            })
            .collect();
        self.core.registry.merge_nested(tree);
    }
}

fn cuejob_columns() -> ColumnModel<CueNode> {
    ColumnModel::builder()
        .column("Name", "name", 40, |n: &CueNode| n.label().to_string())
        .sort(|n: &CueNode| SortKey::Text(n.label().to_string()))
        .column("Cores", "cores", 7, |n: &CueNode| match n {
            CueNode::Show(s) => format!("{:.2}", s.reserved_cores),
            CueNode::Group(g) => format!("{:.2}", g.stats.reserved_cores),
            CueNode::Job(j) => format!("{:.2}", j.stats.reserved_cores),
        })
        .column("Run", "run", 6, |n: &CueNode| match n {
            CueNode::Show(s) => s.running_frames.to_string(),
            CueNode::Group(g) => g.stats.running_frames.to_string(),
            CueNode::Job(j) => j.stats.frames.running.to_string(),
        })
        .column("Wait", "wait", 6, |n: &CueNode| match n {
            CueNode::Show(s) => s.pending_frames.to_string(),
            CueNode::Group(g) => g.stats.waiting_frames.to_string(),
            CueNode::Job(j) => j.stats.frames.waiting.to_string(),
        })
        .column("Dead", "dead", 6, |n: &CueNode| match n {
            CueNode::Show(_) => String::new(),
            CueNode::Group(g) => g.stats.dead_frames.to_string(),
            CueNode::Job(j) => j.stats.frames.dead.to_string(),
        })
        .column("Dept", "department", 10, |n: &CueNode| match n {
            CueNode::Group(g) => g.department.clone(),
            _ => String::new(),
        })
        .hidden()
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::EntityKind;
    use crate::monitor::refresh_now;
    use crate::rpc::fake::{self, FakeFarm};
    use std::sync::Arc;

    fn staged() -> Arc<FakeFarm> {
        let farm = Arc::new(FakeFarm::new("t"));
        farm.edit(|s| {
            s.shows.push(fake::show("testing"));
            let root = fake::group("testing", "testing", None);
            let fx = fake::group("fx", "testing", Some(root.id));
            let mut job = fake::job("testing-sh010-render", "testing", "t");
            job.group = fx.name.clone();
            s.groups.push(root);
            s.groups.push(fx);
            s.jobs.push(job);
        });
        farm
    }

    #[test]
    fn builds_show_group_job_hierarchy() {
        let farm = staged();
        let monitor = Arc::new(CueJobMonitor::new());
        monitor.add_show("testing");
        let client: Arc<dyn CueClient> = farm.clone();
        refresh_now(&monitor, &client);

        assert_eq!(monitor.core().registry.len(), 4);
        monitor.core().registry.expand_all();
        let rows = monitor.core().registry.visible();
        let depths: Vec<(usize, EntityKind)> =
            rows.iter().map(|r| (r.depth, r.key.kind)).collect();
        assert_eq!(
            depths,
            vec![
                (0, EntityKind::Show),
                (1, EntityKind::Group),
                (2, EntityKind::Group),
                (3, EntityKind::Job),
            ]
        );
    }

    #[test]
    fn repeat_update_is_in_place() {
        let farm = staged();
        let monitor = Arc::new(CueJobMonitor::new());
        monitor.add_show("testing");
        let client: Arc<dyn CueClient> = farm.clone();
        refresh_now(&monitor, &client);
        let records = monitor.get_update(farm.as_ref()).unwrap();
        let stats_before = monitor.core().registry.len();
        monitor.process_update(records);
        assert_eq!(monitor.core().registry.len(), stats_before);
    }

    #[test]
    fn removing_show_empties_tree_on_next_update() {
        let farm = staged();
        let monitor = Arc::new(CueJobMonitor::new());
        monitor.add_show("testing");
        let client: Arc<dyn CueClient> = farm.clone();
        refresh_now(&monitor, &client);
        monitor.remove_show("testing");
        refresh_now(&monitor, &client);
        assert!(monitor.core().registry.is_empty());
    }
}
