// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! `tat search`

use clap::Args;
use tat_domain_types::SearchHit;
use tat_local_db::{SearchOptions, search};

use crate::CliContext;

const PREVIEW_CHARS: usize = 200;

#[derive(Args, Debug, Clone)]
pub struct SearchArgs {
    /// Text to look for in recorded commands
    pub query: String,

    /// Maximum number of results
    #[arg(long, default_value_t = 50)]
    pub limit: usize,

    /// Show a short preview of captured output
    #[arg(long)]
    pub with_output: bool,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

impl SearchArgs {
    pub fn run(self, ctx: &CliContext) -> anyhow::Result<()> {
        let config = ctx.load_config()?;
        let db = crate::open_existing_database(&config.database_path)?;

        let options = SearchOptions {
            query: self.query,
            limit: self.limit,
            with_output: self.with_output,
            ..SearchOptions::default()
        };
        let hits = search::search_commands(db.connection(), &options)?;

        if self.json {
            println!("{}", serde_json::to_string_pretty(&hits)?);
            return Ok(());
        }
        for hit in &hits {
            print!("{}", format_hit(hit, self.with_output));
        }
        Ok(())
    }
}

/// `[cwd] cmd (exit:N)` followed by optional one-line previews.
pub fn format_hit(hit: &SearchHit, with_output: bool) -> String {
    let exit = hit
        .exit_code
        .map(|code| code.to_string())
        .unwrap_or_else(|| "-".into());
    let mut out = format!("[{}] {} (exit:{})\n", hit.cwd, hit.cmd, exit);

    if with_output {
        for (label, preview) in [("stdout", &hit.stdout_preview), ("stderr", &hit.stderr_preview)] {
            let line = preview.as_deref().map(preview_one_line).unwrap_or_default();
            if !line.is_empty() {
                out.push_str(&format!("  {label}: {line}\n"));
            }
        }
    }
    out
}

/// Flatten newlines into a visible marker and cap the length.
pub fn preview_one_line(text: &str) -> String {
    let flat = text.replace("\r\n", "\n").replace('\n', " ⏎ ");
    match flat.char_indices().nth(PREVIEW_CHARS) {
        Some((idx, _)) => format!("{}...", &flat[..idx]),
        None => flat,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tat_domain_types::from_epoch_ms;

    fn hit(exit_code: Option<i32>, stdout: Option<&str>) -> SearchHit {
        SearchHit {
            command_id: "c1".into(),
            cmd: "cargo build".into(),
            cwd: "/src".into(),
            exit_code,
            started_at: from_epoch_ms(0),
            stdout_preview: stdout.map(str::to_string),
            stderr_preview: None,
        }
    }

    #[tat_test_utils::logged_test]
    fn test_format_hit() {
        assert_eq!(format_hit(&hit(None, None), true), "[/src] cargo build (exit:-)\n");
        assert_eq!(
            format_hit(&hit(Some(0), Some("Compiling\r\nFinished\n")), true),
            "[/src] cargo build (exit:0)\n  stdout: Compiling ⏎ Finished ⏎ \n"
        );
        assert_eq!(
            format_hit(&hit(Some(1), Some("ignored")), false),
            "[/src] cargo build (exit:1)\n"
        );
    }

    #[tat_test_utils::logged_test]
    fn test_preview_is_capped() {
        let long = "x".repeat(PREVIEW_CHARS + 5);
        let preview = preview_one_line(&long);
        assert!(preview.ends_with("..."));
        assert_eq!(preview.chars().count(), PREVIEW_CHARS + 3);
        assert_eq!(preview_one_line("short"), "short");
    }
}
