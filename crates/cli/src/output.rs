// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Plain-text table rendering for list output.

use mab_core::{format_elapsed_ms, Clock, SystemClock};
use serde_json::Value;

/// Render rows as a left-aligned table with a header.
pub fn render_table(headers: &[&str], rows: &[Vec<String>]) -> String {
    let mut widths: Vec<usize> = headers.iter().map(|h| h.len()).collect();
    for row in rows {
        for (i, cell) in row.iter().enumerate() {
            if i < widths.len() && cell.len() > widths[i] {
                widths[i] = cell.len();
            }
        }
    }

    let mut out = String::new();
    let render_row = |cells: &[String], out: &mut String| {
        let line = cells
            .iter()
            .enumerate()
            .map(|(i, cell)| format!("{:<width$}", cell, width = widths[i]))
            .collect::<Vec<_>>()
            .join("  ");
        out.push_str(line.trim_end());
        out.push('\n');
    };

    let header_cells: Vec<String> = headers.iter().map(|h| h.to_uppercase()).collect();
    render_row(&header_cells, &mut out);
    for row in rows {
        render_row(row, &mut out);
    }
    out
}

/// One row per worker, in `worker.list` order.
pub fn worker_rows(workers: &[Value]) -> Vec<Vec<String>> {
    let now = SystemClock.epoch_ms();
    workers
        .iter()
        .map(|w| {
            let age = w["started_at"]
                .as_i64()
                .map(|started| format_elapsed_ms(now.saturating_sub(started).max(0) as u64))
                .unwrap_or_else(|| "-".to_string());
            vec![
                text(&w["id"]),
                text(&w["role"]),
                w["instance"].as_u64().unwrap_or(0).to_string(),
                text(&w["status"]),
                w["pid"].as_u64().map_or_else(|| "-".to_string(), |p| p.to_string()),
                age,
                text(&w["town_id"]),
            ]
        })
        .collect()
}

/// One row per town.
pub fn town_rows(towns: &[Value]) -> Vec<Vec<String>> {
    towns
        .iter()
        .map(|t| vec![text(&t["id"]), text(&t["name"]), text(&t["path"])])
        .collect()
}

fn text(value: &Value) -> String {
    value.as_str().unwrap_or("-").to_string()
}

#[cfg(test)]
#[path = "output_tests.rs"]
mod tests;
