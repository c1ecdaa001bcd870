//! Tube statistics and their table rendering.

use std::collections::HashMap;

use serde::Serialize;

use crate::error::{Error, Result};

/// Snapshot of one tube's `stats-tube` counters, kept as reported.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TubeStats {
    pub name: String,
    pub buried: String,
    pub ready: String,
    pub delayed: String,
    pub reserved: String,
    pub urgent: String,
    pub waiting: String,
    pub total: String,
}

impl TubeStats {
    /// Build from a raw `stats-tube` dictionary, checking it describes
    /// `requested`.
    pub fn from_server_stats(requested: &str, stats: &HashMap<String, String>) -> Result<Self> {
        let reported = stats.get("name").map(String::as_str).unwrap_or_default();
        if reported != requested {
            return Err(Error::StatsMismatch {
                requested: requested.to_string(),
                reported: reported.to_string(),
            });
        }

        let field = |key: &str| stats.get(key).cloned().unwrap_or_default();
        Ok(Self {
            name: requested.to_string(),
            buried: field("current-jobs-buried"),
            ready: field("current-jobs-ready"),
            delayed: field("current-jobs-delayed"),
            reserved: field("current-jobs-reserved"),
            urgent: field("current-jobs-urgent"),
            waiting: field("current-waiting"),
            total: field("total-jobs"),
        })
    }

    fn columns(&self) -> [&str; 8] {
        [
            self.name.as_str(),
            self.buried.as_str(),
            self.delayed.as_str(),
            self.ready.as_str(),
            self.reserved.as_str(),
            self.urgent.as_str(),
            self.waiting.as_str(),
            self.total.as_str(),
        ]
    }
}

const HEADER: [&str; 8] = [
    "NAME", "BURIED", "DELAYED", "READY", "RESERVED", "URGENT", "WAITING", "TOTAL",
];

/// Render stats as a boxed ASCII table:
///
/// ```text
/// +---------+--------+---------+-------+----------+--------+---------+-------+
/// |  NAME   | BURIED | DELAYED | READY | RESERVED | URGENT | WAITING | TOTAL |
/// +---------+--------+---------+-------+----------+--------+---------+-------+
/// | default |      0 |       0 |     0 |        0 |      0 |       0 |     0 |
/// +---------+--------+---------+-------+----------+--------+---------+-------+
/// ```
pub fn render_table(rows: &[TubeStats]) -> String {
    let mut widths = HEADER.map(str::len);
    for row in rows {
        for (width, cell) in widths.iter_mut().zip(row.columns()) {
            *width = (*width).max(cell.len());
        }
    }

    let border: String = widths
        .iter()
        .map(|w| format!("+{}", "-".repeat(w + 2)))
        .chain(std::iter::once("+\n".to_string()))
        .collect();

    let mut out = border.clone();
    for (title, width) in HEADER.iter().zip(widths) {
        let pad = width - title.len();
        let left = pad / 2;
        out.push_str(&format!(
            "| {}{}{} ",
            " ".repeat(left),
            title,
            " ".repeat(pad - left)
        ));
    }
    out.push_str("|\n");
    out.push_str(&border);

    for row in rows {
        for (i, (cell, width)) in row.columns().iter().zip(widths).enumerate() {
            if i == 0 {
                out.push_str(&format!("| {:<width$} ", cell, width = width));
            } else {
                out.push_str(&format!("| {:>width$} ", cell, width = width));
            }
        }
        out.push_str("|\n");
    }
    out.push_str(&border);
    out
}
