//! Weekly digest generation through an OpenAI-compatible chat API.
//!
//! - [`Summarize`]: core trait, one call per week
//! - [`OpenAiSummarizer`]: `POST {base_url}/chat/completions`
//! - [`RetrySummarize`]: decorator adding exponential backoff to any
//!   [`Summarize`] implementation
//!
//! # Retry Strategy
//!
//! ```text
//! delay = min(base_delay * 2^(attempt-1), max_delay) + random_jitter(0..=max_jitter)
//! ```
//!
//! Errors that cannot improve on retry (missing key, 4xx other than 429)
//! are returned immediately.

use std::fmt;
use std::fmt::Write as _;
use std::time::{Duration as StdDuration, Instant};

use rand::{Rng, rng};
use serde::{Deserialize, Serialize};
use tokio::time::sleep;
use tracing::{debug, error, info, instrument, warn};

use crate::config::SummarizerConfig;
use crate::error::SummarizationError;
use crate::models::WeeklyDataset;
use crate::utils::{truncate_chars, truncate_for_log};

/// Longest item teaser included in the prompt, in characters.
const ITEM_SUMMARY_CHARS: usize = 200;

/// Something that turns a week's items into digest text.
pub trait Summarize {
    /// Model identifier recorded alongside generated summaries.
    fn model(&self) -> &str;

    /// Produce the markdown digest for `dataset`.
    async fn summarize(&self, dataset: &WeeklyDataset) -> Result<String, SummarizationError>;
}

/// Wrapper that adds exponential backoff retry logic to any [`Summarize`]
/// implementation.
pub struct RetrySummarize<T> {
    inner: T,
    /// Retries after the first attempt.
    max_retries: usize,
    /// Initial delay between retries (doubles with each attempt).
    base_delay: StdDuration,
    max_delay: StdDuration,
    max_jitter: StdDuration,
}

impl<T> RetrySummarize<T>
where
    T: Summarize,
{
    /// Create a new retry wrapper.
    ///
    /// # Arguments
    ///
    /// * `inner` - The summarizer to wrap
    /// * `max_retries` - Attempts after the first one; 0 disables retrying
    /// * `base_delay` - Wait before the first retry, doubled on each further
    ///   retry up to 30 seconds
    pub fn new(inner: T, max_retries: usize, base_delay: StdDuration) -> Self {
        Self {
            inner,
            max_retries,
            base_delay,
            max_delay: StdDuration::from_secs(30),
            max_jitter: StdDuration::from_millis(250),
        }
    }

    /// Upper bound of the random delay added to each backoff.
    pub fn with_max_jitter(mut self, max_jitter: StdDuration) -> Self {
        self.max_jitter = max_jitter;
        self
    }

    fn backoff(&self, attempt: usize) -> StdDuration {
        let shift = u32::try_from(attempt.saturating_sub(1)).unwrap_or(u32::MAX).min(16);
        let delay = self.base_delay.saturating_mul(1 << shift).min(self.max_delay);
        let jitter_ms: u64 = rng().random_range(0..=self.max_jitter.as_millis() as u64);
        delay + StdDuration::from_millis(jitter_ms)
    }
}

impl<T> fmt::Debug for RetrySummarize<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetrySummarize")
            .field("max_retries", &self.max_retries)
            .field("base_delay", &self.base_delay)
            .field("max_delay", &self.max_delay)
            .finish()
    }
}

impl<T> Summarize for RetrySummarize<T>
where
    T: Summarize,
{
    fn model(&self) -> &str {
        self.inner.model()
    }

    #[instrument(level = "info", skip_all, fields(week = %dataset.week))]
    async fn summarize(&self, dataset: &WeeklyDataset) -> Result<String, SummarizationError> {
        let total_t0 = Instant::now();
        let mut attempt = 0usize;

        loop {
            let attempt_t0 = Instant::now();
            match self.inner.summarize(dataset).await {
                Ok(text) => return Ok(text),
                Err(e) => {
                    attempt += 1;
                    let attempt_dt = attempt_t0.elapsed();
                    let total_dt = total_t0.elapsed();

                    if attempt > self.max_retries || !e.is_retryable() {
                        error!(
                            attempt,
                            max = self.max_retries,
                            elapsed_ms_attempt = attempt_dt.as_millis() as u64,
                            elapsed_ms_total = total_dt.as_millis() as u64,
                            error = %e,
                            "summarize() giving up"
                        );
                        return Err(e);
                    }

                    let delay = self.backoff(attempt);
                    warn!(
                        attempt,
                        max = self.max_retries,
                        elapsed_ms_attempt = attempt_dt.as_millis() as u64,
                        elapsed_ms_total = total_dt.as_millis() as u64,
                        ?delay,
                        error = %e,
                        "summarize() attempt failed; backing off"
                    );
                    sleep(delay).await;
                }
            }
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Debug, Deserialize)]
struct ChatReply {
    content: Option<String>,
}

/// Chat-completions client for OpenAI and compatible gateways.
pub struct OpenAiSummarizer {
    client: reqwest::Client,
    api_key: Option<String>,
    base_url: String,
    model: String,
    temperature: f32,
    max_tokens: u32,
    language: String,
}

impl fmt::Debug for OpenAiSummarizer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenAiSummarizer")
            .field("client", &"<reqwest::Client>")
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .finish()
    }
}

impl OpenAiSummarizer {
    /// A missing key is not an error here; every call then fails with
    /// [`SummarizationError::MissingApiKey`] and the run is degraded.
    pub fn new(api_key: Option<String>, config: &SummarizerConfig) -> Result<Self, SummarizationError> {
        let client = reqwest::Client::builder()
            .timeout(StdDuration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            api_key: api_key.filter(|k| !k.trim().is_empty()),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            language: config.language.clone(),
        })
    }
}

impl Summarize for OpenAiSummarizer {
    fn model(&self) -> &str {
        &self.model
    }

    #[instrument(level = "info", skip_all, fields(model = %self.model))]
    async fn summarize(&self, dataset: &WeeklyDataset) -> Result<String, SummarizationError> {
        let api_key = self.api_key.as_deref().ok_or(SummarizationError::MissingApiKey)?;
        let prompt = build_prompt(dataset, &self.language);
        debug!(prompt_chars = prompt.chars().count(), items = dataset.total_count, "Built prompt");

        let request = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: system_message(&self.language),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: prompt,
                },
            ],
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        };

        let t0 = Instant::now();
        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(%status, body = %truncate_for_log(&body, 300), "Chat completion rejected");
            return Err(SummarizationError::Status {
                status: status.as_u16(),
                body: truncate_for_log(&body, 300),
            });
        }

        let body: ChatResponse = response.json().await?;
        let text = extract_summary(body)?;
        info!(
            elapsed_ms = t0.elapsed().as_millis() as u64,
            chars = text.chars().count(),
            "Chat completion succeeded"
        );
        Ok(text)
    }
}

/// First choice's content, trimmed. Blank output is an error so that it is
/// never stored as a summary.
fn extract_summary(response: ChatResponse) -> Result<String, SummarizationError> {
    response
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
        .map(|content| content.trim().to_string())
        .filter(|content| !content.is_empty())
        .ok_or(SummarizationError::EmptyResponse)
}

fn system_message(language: &str) -> String {
    format!(
        "You are a senior fintech analyst who turns technical AI news into clear business insight. \
         Always answer in {language}."
    )
}

/// Numbered item list, one block per item, in `all_news` order.
pub fn format_items_for_prompt(dataset: &WeeklyDataset) -> String {
    let mut out = String::new();
    for (i, item) in dataset.all_news.iter().enumerate() {
        let source = item.publisher.as_deref().unwrap_or(item.source.as_str());
        let date = item
            .published_at
            .map(|d| d.to_string())
            .unwrap_or_else(|| "unknown".to_string());
        let _ = writeln!(out, "{}. [{}] {}", i + 1, item.locale.tag(), item.title);
        let _ = writeln!(out, "   Source: {source} | Date: {date}");
        if let Some(summary) = item.summary.as_deref().filter(|s| !s.is_empty()) {
            let _ = writeln!(out, "   Summary: {}", truncate_chars(summary, ITEM_SUMMARY_CHARS));
        }
        out.push('\n');
    }
    out
}

/// Build the user message asking for a week's digest.
///
/// # Arguments
///
/// * `dataset` - The week whose items are listed, in `all_news` order
/// * `language` - Language the digest should be written in
///
/// # Returns
///
/// A prompt naming the week and its date range, listing every item and
/// asking for three fixed markdown sections.
pub fn build_prompt(dataset: &WeeklyDataset, language: &str) -> String {
    format!(
        "Below are the news items about AI in finance collected for {week} \
         ({from} to {to}, {count} items, English and Chinese).\n\n\
         News items:\n{items}\
         Write the weekly digest in {language}, in markdown, with exactly these sections:\n\n\
         ## This week at a glance\n\
         3-5 sentences on the overall direction of AI in finance this week.\n\n\
         ## Key stories\n\
         The 3-5 most important items, 2-3 sentences each on why they matter.\n\n\
         ## Trends to watch\n\
         1-2 developments worth following, based on this week's items.\n\n\
         Keep an objective, professional tone and focus on real deployments and business value. \
         If the items are few or weak, say so plainly.\n",
        week = dataset.week,
        from = dataset.week.monday(),
        to = dataset.week.sunday(),
        count = dataset.total_count,
        items = format_items_for_prompt(dataset),
    )
}
