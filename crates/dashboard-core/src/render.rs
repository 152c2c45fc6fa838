use std::collections::BTreeMap;
use std::io::{self, IsTerminal, Write};

use anyhow::anyhow;
use unicode_width::UnicodeWidthStr;

use crate::config::Config;
use crate::dashboard::DashboardView;
use crate::filter::FilterState;
use crate::notify::{Level, Notification};
use crate::stats::{CategoryStatistics, TaskStatistics};
use crate::task::{Category, NO_CATEGORY_NAME, Task};

const SHORT_ID_CHARS: usize = 8;

#[derive(Debug, Clone)]
pub struct Renderer {
    color: bool,
}

impl Renderer {
    pub fn new(cfg: &Config) -> anyhow::Result<Self> {
        let color_cfg = cfg.get("color").unwrap_or_else(|| "on".to_string());
        let color = match color_cfg.to_ascii_lowercase().as_str() {
            "on" | "yes" | "true" | "1" => true,
            "off" | "no" | "false" | "0" => false,
            other => return Err(anyhow!("invalid color setting: {other}")),
        };

        Ok(Self { color })
    }

    #[tracing::instrument(skip_all)]
    pub fn print_task_table(
        &mut self,
        view: &DashboardView,
        categories: &[Category],
    ) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();

        if view.plan.shows_placeholder() {
            writeln!(out, "No tasks found")?;
            return Ok(());
        }

        let headers = vec![
            "ID".to_string(),
            "Status".to_string(),
            "Category".to_string(),
            "Title".to_string(),
        ];

        let mut rows = Vec::with_capacity(view.plan.items.len());
        for item in &view.plan.items {
            let task = &item.task;
            let status = if task.completed {
                self.paint(task.status_label(), "32")
            } else {
                self.paint(task.status_label(), "33")
            };
            let title = if item.animation.is_leaving() {
                self.paint(&task.title, "2")
            } else {
                task.title.clone()
            };
            rows.push(vec![
                short_id(&task.id).to_string(),
                status,
                self.category_label(task, categories),
                title,
            ]);
        }

        write_table(&mut out, headers, rows)?;
        writeln!(
            out,
            "\n{} pending, {} completed",
            view.pending, view.completed
        )?;
        Ok(())
    }

    #[tracing::instrument(skip(self, task, categories))]
    pub fn print_task_info(&mut self, task: &Task, categories: &[Category]) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();

        writeln!(out, "id        {}", task.id)?;
        writeln!(out, "title     {}", task.title)?;
        writeln!(out, "status    {}", task.status_label())?;
        writeln!(out, "category  {}", self.category_label(task, categories))?;
        if let Some(description) = &task.description {
            writeln!(out, "desc      {description}")?;
        }
        Ok(())
    }

    #[tracing::instrument(skip_all)]
    pub fn print_categories(
        &mut self,
        categories: &[Category],
        counts: &BTreeMap<String, usize>,
    ) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();

        let headers = vec![
            "ID".to_string(),
            "Name".to_string(),
            "Color".to_string(),
            "Tasks".to_string(),
        ];
        let rows = categories
            .iter()
            .map(|category| {
                vec![
                    short_id(&category.id).to_string(),
                    self.paint_hex(&category.name, &category.color),
                    category.color.clone(),
                    counts.get(&category.id).copied().unwrap_or(0).to_string(),
                ]
            })
            .collect();

        write_table(&mut out, headers, rows)
    }

    #[tracing::instrument(skip_all)]
    pub fn print_stats(
        &mut self,
        totals: &TaskStatistics,
        per_category: &[CategoryStatistics],
    ) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();

        writeln!(out, "total      {}", totals.total)?;
        writeln!(out, "completed  {}", totals.completed)?;
        writeln!(out, "pending    {}", totals.pending)?;
        writeln!(out, "rate       {:.1}%", totals.completion_rate)?;
        writeln!(out)?;

        let headers = vec![
            "Category".to_string(),
            "Total".to_string(),
            "Done".to_string(),
            "Pending".to_string(),
            "Share".to_string(),
        ];
        let rows = per_category
            .iter()
            .map(|entry| {
                vec![
                    self.paint_hex(&entry.name, &entry.color),
                    entry.total.to_string(),
                    entry.completed.to_string(),
                    entry.pending.to_string(),
                    format!("{:.1}%", entry.percentage),
                ]
            })
            .collect();

        write_table(&mut out, headers, rows)
    }

    pub fn print_filter(&mut self, filter: &FilterState, categories: &[Category]) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();

        let search = if filter.search_term.is_empty() {
            "-".to_string()
        } else {
            format!("{:?}", filter.search_term)
        };
        let labels = filter.active_labels();
        let status = if labels.is_empty() {
            "any".to_string()
        } else {
            labels
                .iter()
                .map(|label| label.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        };
        let selected = if filter.selected_categories.is_empty() {
            "any".to_string()
        } else {
            filter
                .selected_categories
                .iter()
                .map(|id| {
                    categories
                        .iter()
                        .find(|category| category.id == *id)
                        .map(|category| category.name.clone())
                        .unwrap_or_else(|| id.clone())
                })
                .collect::<Vec<_>>()
                .join(", ")
        };

        writeln!(out, "search    {search}")?;
        writeln!(out, "status    {status}")?;
        writeln!(out, "category  {selected}")?;
        Ok(())
    }

    pub fn print_notifications(&mut self, notifications: Vec<Notification>) -> anyhow::Result<()> {
        for note in notifications {
            match note.level {
                Level::Success => {
                    let mut out = io::stdout().lock();
                    writeln!(out, "{}", self.paint(&note.message, "32"))?;
                }
                Level::Error => {
                    let mut err = io::stderr().lock();
                    writeln!(err, "{}", self.paint(&note.message, "31"))?;
                }
            }
        }
        Ok(())
    }

    fn category_label(&self, task: &Task, categories: &[Category]) -> String {
        match categories
            .iter()
            .find(|category| category.id == task.category_id)
        {
            Some(category) => self.paint_hex(&category.name, &category.color),
            None => NO_CATEGORY_NAME.to_string(),
        }
    }

    fn paint(&self, text: &str, code: &str) -> String {
        if !self.color || !io::stdout().is_terminal() {
            return text.to_string();
        }
        format!("\x1b[{code}m{text}\x1b[0m")
    }

    fn paint_hex(&self, text: &str, hex: &str) -> String {
        match parse_hex(hex) {
            Some((r, g, b)) => self.paint(text, &format!("38;2;{r};{g};{b}")),
            None => text.to_string(),
        }
    }
}

pub fn short_id(id: &str) -> &str {
    match id.char_indices().nth(SHORT_ID_CHARS) {
        Some((end, _)) => &id[..end],
        None => id,
    }
}

fn parse_hex(hex: &str) -> Option<(u8, u8, u8)> {
    let digits = hex.strip_prefix('#')?;
    if digits.len() != 6 || !digits.is_ascii() {
        return None;
    }
    let channel = |range: std::ops::Range<usize>| u8::from_str_radix(&digits[range], 16).ok();
    Some((channel(0..2)?, channel(2..4)?, channel(4..6)?))
}

fn write_table<W: Write>(
    mut writer: W,
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
) -> anyhow::Result<()> {
    let column_count = headers.len();
    let mut widths = vec![0usize; column_count];

    for (idx, header) in headers.iter().enumerate() {
        widths[idx] = widths[idx].max(UnicodeWidthStr::width(header.as_str()));
    }

    for row in &rows {
        for (idx, cell) in row.iter().enumerate().take(column_count) {
            widths[idx] = widths[idx].max(UnicodeWidthStr::width(strip_ansi(cell).as_str()));
        }
    }

    for (header, width) in headers.iter().zip(&widths) {
        write!(writer, "{header:width$} ", width = *width)?;
    }
    writeln!(writer)?;

    for width in &widths {
        write!(writer, "{:-<width$} ", "", width = *width)?;
    }
    writeln!(writer)?;

    for row in rows {
        for (cell, width) in row.iter().zip(&widths) {
            let visible_width = UnicodeWidthStr::width(strip_ansi(cell).as_str());
            let padding = width.saturating_sub(visible_width);
            write!(writer, "{}{} ", cell, " ".repeat(padding))?;
        }
        writeln!(writer)?;
    }

    Ok(())
}

fn strip_ansi(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut escaped = false;

    for ch in s.chars() {
        if escaped {
            if ch == 'm' {
                escaped = false;
            }
            continue;
        }

        if ch == '\x1b' {
            escaped = true;
            continue;
        }

        out.push(ch);
    }

    out
}
