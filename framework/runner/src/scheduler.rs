use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::task::{TaskDefinition, TaskList};

/// Picks the next task for one session.
///
/// Sequence position is per scheduler, so every session walks its own copy of the flow.
#[derive(Debug)]
pub struct TaskScheduler<R = StdRng> {
    tasks: Arc<TaskList>,
    cursor: usize,
    rng: R,
}

impl TaskScheduler<StdRng> {
    pub fn new(tasks: Arc<TaskList>) -> Self {
        Self::with_rng(tasks, StdRng::from_entropy())
    }
}

impl<R: Rng> TaskScheduler<R> {
    pub fn with_rng(tasks: Arc<TaskList>, rng: R) -> Self {
        Self {
            tasks,
            cursor: 0,
            rng,
        }
    }

    /// The task to run on this tick. The task list must not be empty.
    pub fn next(&mut self) -> Arc<TaskDefinition> {
        let index = match self.tasks.as_ref() {
            TaskList::Sequence(tasks) => {
                let index = self.cursor;
                self.cursor = (self.cursor + 1) % tasks.len();
                index
            }
            TaskList::WeightedSet(tasks) => weighted_index(tasks, &mut self.rng),
        };

        Arc::clone(&self.tasks.tasks()[index])
    }
}

fn weighted_index(tasks: &[Arc<TaskDefinition>], rng: &mut impl Rng) -> usize {
    let total: u64 = tasks.iter().map(|t| u64::from(t.weight())).sum();
    if total == 0 {
        return 0;
    }

    let mut draw = rng.gen_range(0..total);
    for (index, task) in tasks.iter().enumerate() {
        let weight = u64::from(task.weight());
        if draw < weight {
            return index;
        }
        draw -= weight;
    }

    tasks.len() - 1
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::RequestTemplate;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;

    fn task(name: &str, weight: u32) -> TaskDefinition {
        TaskDefinition::new(name, RequestTemplate::get("/")).with_weight(weight)
    }

    fn seeded(tasks: TaskList) -> TaskScheduler<StdRng> {
        TaskScheduler::with_rng(Arc::new(tasks), StdRng::seed_from_u64(42))
    }

    #[test]
    fn sequence_runs_in_order_and_wraps() {
        let mut scheduler = seeded(TaskList::sequence([
            task("get_org", 1),
            task("generate_otp", 1),
            task("verify_otp", 1),
        ]));

        let names = (0..7)
            .map(|_| scheduler.next().name().to_string())
            .collect::<Vec<_>>();

        assert_eq!(
            vec![
                "get_org",
                "generate_otp",
                "verify_otp",
                "get_org",
                "generate_otp",
                "verify_otp",
                "get_org"
            ],
            names
        );
    }

    #[test]
    fn weighted_selection_follows_weights() {
        let mut scheduler = seeded(TaskList::weighted([
            task("leave_application", 2),
            task("employee_list", 1),
            task("never", 0),
        ]));

        let mut counts = HashMap::<String, usize>::new();
        for _ in 0..30_000 {
            *counts.entry(scheduler.next().name().to_string()).or_default() += 1;
        }

        let heavy = counts["leave_application"] as f64 / 30_000.0;
        let light = counts["employee_list"] as f64 / 30_000.0;
        assert!((heavy - 2.0 / 3.0).abs() < 0.02, "{heavy}");
        assert!((light - 1.0 / 3.0).abs() < 0.02, "{light}");
        assert!(!counts.contains_key("never"));
    }

    #[test]
    fn single_task_is_always_chosen() {
        let mut scheduler = seeded(TaskList::weighted([task("only", 5)]));

        for _ in 0..100 {
            assert_eq!("only", scheduler.next().name());
        }
    }
}
