//! Command-line interface definitions.
//!
//! Every option can also be provided through the environment variable named
//! in its help text. Values given here override the YAML configuration.

use std::path::PathBuf;

use chrono::NaiveDate;
use clap::{Parser, Subcommand};

use crate::config::Config;
use crate::week::WeekKey;

/// Weekly AI-in-finance news digest.
///
/// # Examples
///
/// ```sh
/// # Full weekly run (default when no subcommand is given)
/// ai_fintech_weekly --data-dir ./data --site-dir ./docs
///
/// # Re-summarize an older week with another model
/// ai_fintech_weekly --openai-model gpt-4o summarize --week 2024-W03
/// ```
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,

    /// Directory holding news_<week>.json and summary_<week>.json
    #[arg(long, global = true, env = "WEEKLY_DATA_DIR", default_value = "data")]
    pub data_dir: PathBuf,

    /// Output directory for the static site
    #[arg(long, global = true, env = "WEEKLY_SITE_DIR", default_value = "docs")]
    pub site_dir: PathBuf,

    /// Optional path to a config.yaml file
    #[arg(short, long, global = true, env = "WEEKLY_CONFIG")]
    pub config: Option<PathBuf>,

    /// Treat this date as today (YYYY-MM-DD)
    #[arg(long, global = true)]
    pub as_of: Option<NaiveDate>,

    /// Only keep items published within this many days (0 keeps everything)
    #[arg(long, global = true, env = "LOOKBACK_DAYS")]
    pub lookback_days: Option<u32>,

    /// API key for the summarization backend
    #[arg(long, global = true, env = "OPENAI_API_KEY", hide_env_values = true)]
    pub openai_api_key: Option<String>,

    /// Base URL of an OpenAI-compatible API
    #[arg(long, global = true, env = "OPENAI_BASE_URL")]
    pub openai_base_url: Option<String>,

    /// Model used for the weekly digest
    #[arg(long, global = true, env = "OPENAI_MODEL")]
    pub openai_model: Option<String>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Fetch, summarize and rebuild the site
    Run,
    /// Fetch sources and merge into the current week only
    Fetch,
    /// Bring a week's summary up to date
    Summarize {
        /// Week to summarize (YYYY-Www); defaults to the current week
        #[arg(long)]
        week: Option<WeekKey>,
    },
    /// Rebuild the site from the stored archive
    Site,
}

impl Cli {
    /// The chosen subcommand, [`Command::Run`] when none was given.
    pub fn command(&self) -> Command {
        self.command.clone().unwrap_or(Command::Run)
    }

    /// Apply command-line overrides on top of a loaded configuration.
    pub fn apply_to(&self, config: &mut Config) {
        if let Some(days) = self.lookback_days {
            config.lookback_days = days;
        }
        if let Some(url) = &self.openai_base_url {
            config.summarizer.base_url = url.clone();
        }
        if let Some(model) = &self.openai_model {
            config.summarizer.model = model.clone();
        }
    }
}
