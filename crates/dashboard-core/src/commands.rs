use std::time::Instant;

use anyhow::{anyhow, bail};
use tracing::{debug, info, instrument};

use crate::backend::Backend;
use crate::cli::Invocation;
use crate::config::Config;
use crate::dashboard::Dashboard;
use crate::filter::{SortBy, StatusLabel, count_by_category, sort_tasks};
use crate::migrate::migration_info;
use crate::render::{Renderer, short_id};
use crate::stats::{bar_chart, category_statistics, pie_chart, task_statistics};
use crate::task::{NO_CATEGORY_ID, NewTask, TaskPatch};

pub fn known_command_names() -> Vec<&'static str> {
    vec![
        "add",
        "list",
        "info",
        "edit",
        "done",
        "undone",
        "delete",
        "undo",
        "categories",
        "category",
        "filter",
        "stats",
        "migration",
        "show",
        "help",
        "version",
    ]
}

pub fn expand_command_abbrev<'a>(token: &'a str, known: &[&'a str]) -> Option<&'a str> {
    if known.contains(&token) {
        return Some(token);
    }

    let mut matches = known.iter().copied().filter(|name| name.starts_with(token));
    let first = matches.next()?;
    if matches.next().is_some() {
        None
    } else {
        Some(first)
    }
}

#[instrument(skip(dashboard, cfg, renderer, inv))]
pub fn dispatch<B: Backend>(
    dashboard: &mut Dashboard<B>,
    cfg: &Config,
    renderer: &mut Renderer,
    inv: Invocation,
) -> anyhow::Result<()> {
    let now = Instant::now();
    let command = inv.command.as_str();
    debug!(command, args = ?inv.args, "dispatching command");

    let result = match command {
        "add" => cmd_add(dashboard, &inv.args),
        "list" => cmd_list(dashboard, renderer, &inv.args, now),
        "info" => cmd_info(dashboard, renderer, &inv.args),
        "edit" => cmd_edit(dashboard, &inv.args),
        "done" => cmd_status(dashboard, &inv.args, true),
        "undone" => cmd_status(dashboard, &inv.args, false),
        "delete" => cmd_delete(dashboard, &inv.args, now),
        "undo" => cmd_undo(dashboard),
        "categories" => cmd_categories(dashboard, renderer),
        "category" => cmd_category(dashboard, &inv.args),
        "filter" => cmd_filter(dashboard, renderer, &inv.args, now),
        "stats" => cmd_stats(dashboard, renderer, &inv.args),
        "migration" => cmd_migration(dashboard),
        "show" => cmd_show(cfg),
        "help" => cmd_help(),
        "version" => {
            println!("{}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        other => Err(anyhow!("unknown command: {other}")),
    };

    renderer.print_notifications(dashboard.drain_notifications())?;
    result
}

/// Title words plus `category:` / `description:` modifiers.
#[derive(Debug, Default, PartialEq, Eq)]
struct TaskWords {
    title: Option<String>,
    description: Option<String>,
    category: Option<String>,
}

fn parse_task_words(args: &[String]) -> TaskWords {
    let mut words = Vec::new();
    let mut out = TaskWords::default();

    for arg in args {
        if let Some((key, value)) = arg.split_once(':') {
            match key {
                "category" | "cat" => {
                    out.category = Some(value.to_string());
                    continue;
                }
                "description" | "desc" => {
                    out.description = Some(value.to_string());
                    continue;
                }
                _ => {}
            }
        }
        words.push(arg.as_str());
    }

    if !words.is_empty() {
        out.title = Some(words.join(" "));
    }
    out
}

/// Exact id, or a unique id prefix.
fn resolve_task_id<B: Backend>(dashboard: &Dashboard<B>, token: &str) -> anyhow::Result<String> {
    if dashboard.task(token).is_some() {
        return Ok(token.to_string());
    }
    let mut matches = dashboard
        .tasks()
        .iter()
        .filter(|task| task.id.starts_with(token));
    match (matches.next(), matches.next()) {
        (Some(task), None) => Ok(task.id.clone()),
        (Some(_), Some(_)) => Err(anyhow!("ambiguous task id: {token}")),
        (None, _) => Err(anyhow!("task not found: {token}")),
    }
}

/// Exact id, case-insensitive name, or a unique id prefix.
fn resolve_category_id<B: Backend>(
    dashboard: &Dashboard<B>,
    token: &str,
) -> anyhow::Result<String> {
    let categories = dashboard.categories();
    if let Some(category) = categories
        .iter()
        .find(|category| category.id == token || category.name.eq_ignore_ascii_case(token))
    {
        return Ok(category.id.clone());
    }
    let mut matches = categories
        .iter()
        .filter(|category| category.id.starts_with(token));
    match (matches.next(), matches.next()) {
        (Some(category), None) => Ok(category.id.clone()),
        (Some(_), Some(_)) => Err(anyhow!("ambiguous category: {token}")),
        (None, _) => Err(anyhow!("category not found: {token}")),
    }
}

fn single_arg<'a>(args: &'a [String], what: &str) -> anyhow::Result<&'a str> {
    match args {
        [one] => Ok(one.as_str()),
        [] => Err(anyhow!("missing {what}")),
        _ => Err(anyhow!("expected a single {what}")),
    }
}

#[instrument(skip(dashboard, args))]
fn cmd_add<B: Backend>(dashboard: &mut Dashboard<B>, args: &[String]) -> anyhow::Result<()> {
    info!("command add");

    let words = parse_task_words(args);
    let title = words.title.ok_or_else(|| anyhow!("add requires a title"))?;
    let category_id = match words.category.as_deref() {
        Some(token) => resolve_category_id(dashboard, token)?,
        None => NO_CATEGORY_ID.to_string(),
    };

    let mut new = NewTask::new(title, category_id);
    if let Some(description) = words.description {
        new = new.with_description(description);
    }

    let task = dashboard.add_task(new)?;
    println!("Created task {}.", short_id(&task.id));
    Ok(())
}

#[instrument(skip(dashboard, renderer, args, now))]
fn cmd_list<B: Backend>(
    dashboard: &mut Dashboard<B>,
    renderer: &mut Renderer,
    args: &[String],
    now: Instant,
) -> anyhow::Result<()> {
    info!("command list");

    let sort_by = match args {
        [] => SortBy::Created,
        [arg] => match arg.strip_prefix("sort:") {
            Some("title") => SortBy::Title,
            Some("completed" | "status") => SortBy::Completed,
            Some("created") => SortBy::Created,
            _ => bail!("unsupported list argument: {arg}"),
        },
        _ => bail!("list takes at most one sort: argument"),
    };

    let mut view = dashboard.view(now);
    let tasks: Vec<_> = view.plan.items.iter().map(|item| item.task.clone()).collect();
    let order = sort_tasks(&tasks, sort_by);
    view.plan
        .items
        .sort_by_key(|item| order.iter().position(|task| task.id == item.task.id));

    renderer.print_task_table(&view, dashboard.categories())
}

fn cmd_info<B: Backend>(
    dashboard: &mut Dashboard<B>,
    renderer: &mut Renderer,
    args: &[String],
) -> anyhow::Result<()> {
    let id = resolve_task_id(dashboard, single_arg(args, "task id")?)?;
    let task = dashboard
        .task(&id)
        .ok_or_else(|| anyhow!("task not found: {id}"))?;
    renderer.print_task_info(task, dashboard.categories())
}

#[instrument(skip(dashboard, args))]
fn cmd_edit<B: Backend>(dashboard: &mut Dashboard<B>, args: &[String]) -> anyhow::Result<()> {
    info!("command edit");

    let (token, rest) = args
        .split_first()
        .ok_or_else(|| anyhow!("edit requires a task id"))?;
    let id = resolve_task_id(dashboard, token)?;
    let words = parse_task_words(rest);

    let patch = TaskPatch {
        title: words.title,
        description: words.description.map(Some),
        completed: None,
        category_id: match words.category.as_deref() {
            Some(token) => Some(resolve_category_id(dashboard, token)?),
            None => None,
        },
    };
    if patch.is_empty() {
        bail!("nothing to change: give a title, category: or description:");
    }

    dashboard.update_task(&id, patch)?;
    println!("Modified task {}.", short_id(&id));
    Ok(())
}

#[instrument(skip(dashboard, args))]
fn cmd_status<B: Backend>(
    dashboard: &mut Dashboard<B>,
    args: &[String],
    completed: bool,
) -> anyhow::Result<()> {
    if args.is_empty() {
        bail!("missing task id");
    }
    for token in args {
        let id = resolve_task_id(dashboard, token)?;
        dashboard.set_task_status(&id, completed)?;
    }
    Ok(())
}

/// Deletes run through the same delayed path as the interactive view; the
/// command simply waits out the delay.
#[instrument(skip(dashboard, args, now))]
fn cmd_delete<B: Backend>(
    dashboard: &mut Dashboard<B>,
    args: &[String],
    now: Instant,
) -> anyhow::Result<()> {
    info!("command delete");

    let id = resolve_task_id(dashboard, single_arg(args, "task id")?)?;
    if !dashboard.request_delete_task(&id, now)? {
        println!("Task {} is already being deleted.", short_id(&id));
        return Ok(());
    }

    let mut deleted = 0;
    while let Some(at) = dashboard.next_wakeup() {
        deleted += dashboard.advance(at);
    }
    if deleted == 0 {
        bail!("task {} was not deleted", short_id(&id));
    }
    println!("Deleted task {}. Run `undo` to restore it.", short_id(&id));
    Ok(())
}

fn cmd_undo<B: Backend>(dashboard: &mut Dashboard<B>) -> anyhow::Result<()> {
    let task = dashboard.undo_delete()?;
    println!("Restored task {} ({}).", short_id(&task.id), task.title);
    Ok(())
}

fn cmd_categories<B: Backend>(
    dashboard: &mut Dashboard<B>,
    renderer: &mut Renderer,
) -> anyhow::Result<()> {
    let counts = count_by_category(dashboard.tasks(), dashboard.categories());
    renderer.print_categories(dashboard.categories(), &counts)
}

#[instrument(skip(dashboard, args))]
fn cmd_category<B: Backend>(dashboard: &mut Dashboard<B>, args: &[String]) -> anyhow::Result<()> {
    let (action, rest) = args
        .split_first()
        .ok_or_else(|| anyhow!("category requires add, rename or delete"))?;

    match action.as_str() {
        "add" => {
            if rest.is_empty() {
                bail!("category add requires a name");
            }
            let category = dashboard.add_category(&rest.join(" "))?;
            println!("Created category {} ({}).", category.name, category.color);
        }
        "rename" => {
            let (token, name) = rest
                .split_first()
                .ok_or_else(|| anyhow!("category rename requires a category and a name"))?;
            if name.is_empty() {
                bail!("category rename requires a new name");
            }
            let id = resolve_category_id(dashboard, token)?;
            dashboard.rename_category(&id, &name.join(" "))?;
        }
        "delete" => {
            let id = resolve_category_id(dashboard, single_arg(rest, "category")?)?;
            let moved = dashboard.delete_category(&id)?;
            println!("Moved {moved} task(s) to No Category.");
        }
        other => bail!("unknown category action: {other}"),
    }
    Ok(())
}

#[instrument(skip(dashboard, renderer, args, now))]
fn cmd_filter<B: Backend>(
    dashboard: &mut Dashboard<B>,
    renderer: &mut Renderer,
    args: &[String],
    now: Instant,
) -> anyhow::Result<()> {
    let (action, rest) = match args.split_first() {
        Some((action, rest)) => (action.as_str(), rest),
        None => ("show", &args[..0]),
    };

    match action {
        "show" => {}
        "status" => {
            let mut labels = Vec::new();
            for token in rest {
                match token.as_str() {
                    "none" | "any" => {}
                    other => labels.push(
                        StatusLabel::parse(other)
                            .ok_or_else(|| anyhow!("unknown status: {other}"))?,
                    ),
                }
            }
            dashboard.clear_status_filters()?;
            for label in labels {
                dashboard.set_status_filter(label, true)?;
            }
        }
        "category" => match rest {
            [] => bail!("filter category requires a category or none"),
            [none] if none == "none" || none == "any" => {
                dashboard.set_selected_categories(Vec::new())?;
            }
            tokens => {
                for token in tokens {
                    let id = resolve_category_id(dashboard, token)?;
                    dashboard.toggle_category_filter(&id)?;
                }
            }
        },
        "search" => {
            dashboard.set_search(&rest.join(" "), now)?;
            dashboard.flush_search();
        }
        "clear" => dashboard.clear_filters(now)?,
        other => bail!("unknown filter action: {other}"),
    }

    renderer.print_filter(dashboard.filter(), dashboard.categories())
}

fn cmd_stats<B: Backend>(
    dashboard: &mut Dashboard<B>,
    renderer: &mut Renderer,
    args: &[String],
) -> anyhow::Result<()> {
    let totals = task_statistics(dashboard.tasks());
    let per_category = category_statistics(dashboard.tasks(), dashboard.categories());

    match args {
        [] => renderer.print_stats(&totals, &per_category),
        [format] if format == "json" => {
            let doc = serde_json::json!({
                "totals": totals,
                "categories": per_category,
                "pie": pie_chart(&per_category),
                "bar": bar_chart(&per_category),
            });
            println!("{}", serde_json::to_string_pretty(&doc)?);
            Ok(())
        }
        _ => Err(anyhow!("stats takes no arguments or `json`")),
    }
}

fn cmd_migration<B: Backend>(dashboard: &mut Dashboard<B>) -> anyhow::Result<()> {
    let info = migration_info(dashboard.storage())?;
    println!("{}", serde_json::to_string_pretty(&info)?);
    Ok(())
}

fn cmd_show(cfg: &Config) -> anyhow::Result<()> {
    let mut entries: Vec<_> = cfg.iter().collect();
    entries.sort();
    for (k, v) in entries {
        println!("{k}={v}");
    }
    Ok(())
}

fn cmd_help() -> anyhow::Result<()> {
    println!(
        "Commands: add, list, info, edit, done, undone, delete, undo, categories, category add|rename|delete, filter show|status|category|search|clear, stats, migration, show"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(args: &[&str]) -> Vec<String> {
        args.iter().map(|arg| arg.to_string()).collect()
    }

    #[test]
    fn task_words_split_modifiers_from_title() {
        let words = parse_task_words(&strings(&["Buy", "milk", "cat:Work", "desc:2 litres"]));
        assert_eq!(
            words,
            TaskWords {
                title: Some("Buy milk".to_string()),
                description: Some("2 litres".to_string()),
                category: Some("Work".to_string()),
            }
        );
    }

    #[test]
    fn unknown_modifier_stays_in_title() {
        let words = parse_task_words(&strings(&["Call", "at:noon"]));
        assert_eq!(words.title.as_deref(), Some("Call at:noon"));
        assert_eq!(words.category, None);
    }

    #[test]
    fn command_abbreviations() {
        let known = known_command_names();
        assert_eq!(expand_command_abbrev("st", &known), Some("stats"));
        assert_eq!(expand_command_abbrev("undo", &known), Some("undo"));
        assert_eq!(expand_command_abbrev("d", &known), None);
        assert_eq!(expand_command_abbrev("zzz", &known), None);
    }
}
