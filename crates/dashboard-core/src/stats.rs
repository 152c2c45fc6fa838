use serde::Serialize;

use crate::filter::{count_completed, count_pending};
use crate::task::{Category, Task};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskStatistics {
    pub total: usize,
    pub completed: usize,
    pub pending: usize,
    /// Percent, 0 when there are no tasks.
    pub completion_rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CategoryStatistics {
    pub id: String,
    pub name: String,
    pub color: String,
    pub total: usize,
    pub completed: usize,
    pub pending: usize,
    /// Share of all tasks, in percent.
    pub percentage: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PieSlice {
    pub name: String,
    pub value: usize,
    pub color: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BarEntry {
    pub name: String,
    pub completed: usize,
    pub pending: usize,
    pub color: String,
}

pub fn task_statistics(tasks: &[Task]) -> TaskStatistics {
    let total = tasks.len();
    let completed = count_completed(tasks);
    TaskStatistics {
        total,
        completed,
        pending: count_pending(tasks),
        completion_rate: percent(completed, total),
    }
}

pub fn category_statistics(tasks: &[Task], categories: &[Category]) -> Vec<CategoryStatistics> {
    categories
        .iter()
        .map(|category| {
            let in_category: Vec<&Task> = tasks
                .iter()
                .filter(|task| task.category_id == category.id)
                .collect();
            let total = in_category.len();
            let completed = in_category.iter().filter(|task| task.completed).count();
            CategoryStatistics {
                id: category.id.clone(),
                name: category.name.clone(),
                color: category.color.clone(),
                total,
                completed,
                pending: total - completed,
                percentage: percent(total, tasks.len()),
            }
        })
        .collect()
}

pub fn pie_chart(stats: &[CategoryStatistics]) -> Vec<PieSlice> {
    stats
        .iter()
        .map(|stat| PieSlice {
            name: stat.name.clone(),
            value: stat.total,
            color: stat.color.clone(),
        })
        .collect()
}

pub fn bar_chart(stats: &[CategoryStatistics]) -> Vec<BarEntry> {
    stats
        .iter()
        .map(|stat| BarEntry {
            name: stat.name.clone(),
            completed: stat.completed,
            pending: stat.pending,
            color: stat.color.clone(),
        })
        .collect()
}

fn percent(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64 * 100.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{seed_categories, seed_tasks};

    #[test]
    fn empty_list_has_zero_rate() {
        let stats = task_statistics(&[]);
        assert_eq!(stats.total, 0);
        assert_eq!(stats.completion_rate, 0.0);
    }

    #[test]
    fn seed_statistics() {
        let tasks = seed_tasks();
        let stats = task_statistics(&tasks);
        assert_eq!(stats.total, 6);
        assert_eq!(stats.completed, 2);
        assert_eq!(stats.pending, 4);
        assert!((stats.completion_rate - 100.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn category_breakdown_sums_to_total() {
        let tasks = seed_tasks();
        let per_category = category_statistics(&tasks, &seed_categories());

        assert_eq!(per_category.len(), 4);
        assert_eq!(per_category[0].total, 0);
        assert_eq!(per_category.iter().map(|stat| stat.total).sum::<usize>(), 6);

        let work = &per_category[1];
        assert_eq!((work.completed, work.pending), (1, 1));

        let bars = bar_chart(&per_category);
        assert_eq!(bars[1].name, "Work");
        let pie = pie_chart(&per_category);
        assert_eq!(pie[1].value, 2);
    }
}
