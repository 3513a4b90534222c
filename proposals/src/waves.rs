//! Conflict-graph partitioning of a ticket batch into sequential waves of
//! mutually non-conflicting tickets, so `ParallelExecute` can run every
//! ticket in a wave concurrently without two pipelines racing on the same
//! file. Grounded on a connected-components-over-touched-paths approach,
//! the same shape a monorepo build graph uses to schedule independent
//! packages.

use std::collections::{HashMap, HashSet};

use ratchet_types::Ticket;

/// Directories whose siblings are treated as conflicting even in relaxed
/// mode, because two tickets touching different files in one of these
/// almost always collide on a shared export surface.
const HUB_DIRS: &[&str] = &["shared", "common", "utils", "types", "config"];

const HUB_FILES: &[&str] = &["index.ts", "index.js", "package.json", "cargo.toml", "go.mod", "__init__.py"];

fn parent_dir(path: &str) -> &str {
    match path.rfind('/') {
        Some(idx) => &path[..idx],
        None => "",
    }
}

fn file_name(path: &str) -> &str {
    match path.rfind('/') {
        Some(idx) => &path[idx + 1..],
        None => path,
    }
}

fn is_hub_dir(dir: &str) -> bool {
    let last_segment = dir.rsplit('/').next().unwrap_or(dir).to_lowercase();
    HUB_DIRS.contains(&last_segment.as_str())
}

fn is_hub_file(path: &str) -> bool {
    HUB_FILES.iter().any(|f| file_name(path).eq_ignore_ascii_case(f))
}

/// Whether tickets `a` and `b` conflict given their touched-file sets.
/// `strict` additionally conflicts any two tickets that share a directory
/// at all (not just a hub one), for projects whose modules are fragile
/// enough that "same folder" already implies a collision risk.
pub fn tickets_conflict(a: &Ticket, b: &Ticket, strict: bool) -> bool {
    let a_files: HashSet<&str> = a.allowed_paths.iter().map(String::as_str).collect();
    let b_files: HashSet<&str> = b.allowed_paths.iter().map(String::as_str).collect();

    if a_files.intersection(&b_files).next().is_some() {
        return true;
    }

    for a_file in &a_files {
        if is_hub_file(a_file) {
            return true;
        }
        let a_dir = parent_dir(a_file);
        for b_file in &b_files {
            if is_hub_file(b_file) {
                return true;
            }
            let b_dir = parent_dir(b_file);
            if a_dir == b_dir && (strict || is_hub_dir(a_dir)) {
                return true;
            }
        }
    }
    false
}

struct UnionFind {
    parent: Vec<usize>,
}

impl UnionFind {
    fn new(n: usize) -> Self {
        Self { parent: (0..n).collect() }
    }

    fn find(&mut self, x: usize) -> usize {
        if self.parent[x] != x {
            self.parent[x] = self.find(self.parent[x]);
        }
        self.parent[x]
    }

    fn union(&mut self, a: usize, b: usize) {
        let ra = self.find(a);
        let rb = self.find(b);
        if ra != rb {
            self.parent[ra] = rb;
        }
    }
}

/// Partition `tickets` into sequential waves: each wave is a maximal set
/// of tickets with no pairwise conflict, and no ticket in wave N conflicts
/// with any ticket in wave N's own set — conflicting tickets land in
/// separate waves via the conflict graph's connected components, then
/// each component's tickets (all mutually conflict-free within a
/// component is NOT assumed — see below) are further split so a wave only
/// ever contains a clique of mutual non-conflict.
///
/// Concretely: build the conflict graph, then greedily assign tickets to
/// the first wave in which they conflict with no existing member,
/// creating a new wave when none fits. This is the same greedy
/// interval-graph-coloring approach a scheduler uses for non-overlapping
/// resource claims.
pub fn partition_into_waves(tickets: Vec<Ticket>, strict: bool) -> Vec<Vec<Ticket>> {
    let mut waves: Vec<Vec<Ticket>> = Vec::new();
    'ticket: for ticket in tickets {
        for wave in waves.iter_mut() {
            if wave.iter().all(|existing| !tickets_conflict(existing, &ticket, strict)) {
                wave.push(ticket);
                continue 'ticket;
            }
        }
        waves.push(vec![ticket]);
    }
    waves
}

/// Connected components of the conflict graph, mostly useful for
/// diagnostics (`tracing` output showing why two tickets were split
/// apart) rather than scheduling itself.
pub fn conflict_components(tickets: &[Ticket], strict: bool) -> Vec<Vec<usize>> {
    let mut uf = UnionFind::new(tickets.len());
    for i in 0..tickets.len() {
        for j in (i + 1)..tickets.len() {
            if tickets_conflict(&tickets[i], &tickets[j], strict) {
                uf.union(i, j);
            }
        }
    }
    let mut groups: HashMap<usize, Vec<usize>> = HashMap::new();
    for i in 0..tickets.len() {
        let root = uf.find(i);
        groups.entry(root).or_default().push(i);
    }
    groups.into_values().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ratchet_types::TicketCategory;
    use uuid::Uuid;

    fn ticket(title: &str, paths: Vec<&str>) -> Ticket {
        Ticket::new(Uuid::new_v4(), title, TicketCategory::Fix, paths.into_iter().map(String::from).collect())
    }

    #[test]
    fn disjoint_tickets_land_in_the_same_wave() {
        let tickets = vec![ticket("a", vec!["src/a.rs"]), ticket("b", vec!["src/b.rs"])];
        let waves = partition_into_waves(tickets, false);
        assert_eq!(waves.len(), 1);
        assert_eq!(waves[0].len(), 2);
    }

    #[test]
    fn shared_file_forces_separate_waves() {
        let tickets = vec![ticket("a", vec!["src/shared.rs"]), ticket("b", vec!["src/shared.rs"])];
        let waves = partition_into_waves(tickets, false);
        assert_eq!(waves.len(), 2);
    }

    #[test]
    fn hub_directory_siblings_conflict_even_relaxed() {
        let tickets = vec![ticket("a", vec!["src/utils/format.rs"]), ticket("b", vec!["src/utils/parse.rs"])];
        let waves = partition_into_waves(tickets, false);
        assert_eq!(waves.len(), 2);
    }

    #[test]
    fn ordinary_directory_siblings_only_conflict_in_strict_mode() {
        let a = ticket("a", vec!["src/widgets/button.rs"]);
        let b = ticket("b", vec!["src/widgets/input.rs"]);
        assert_eq!(partition_into_waves(vec![a.clone(), b.clone()], false).len(), 1);
        assert_eq!(partition_into_waves(vec![a, b], true).len(), 2);
    }

    #[test]
    fn no_proposal_pair_in_a_wave_conflicts() {
        let tickets = vec![
            ticket("a", vec!["src/a.rs"]),
            ticket("b", vec!["src/shared.rs"]),
            ticket("c", vec!["src/c.rs"]),
            ticket("d", vec!["src/shared.rs"]),
        ];
        let waves = partition_into_waves(tickets, false);
        for wave in &waves {
            for i in 0..wave.len() {
                for j in (i + 1)..wave.len() {
                    assert!(!tickets_conflict(&wave[i], &wave[j], false));
                }
            }
        }
    }
}
