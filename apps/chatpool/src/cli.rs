use clap::Parser;

#[derive(Parser)]
#[command(name = "chatpool")]
pub(crate) struct Cli {
    /// JSON file with an array of `{"email": ..., "password": ...}` entries.
    #[arg(long)]
    pub(crate) accounts: String,
    #[arg(long)]
    pub(crate) base_url: Option<String>,
    #[arg(long)]
    pub(crate) model: Option<String>,
    /// The message to send.
    #[arg(long)]
    pub(crate) message: String,
    /// Local path or http(s) URL; repeatable.
    #[arg(long = "attachment")]
    pub(crate) attachments: Vec<String>,
    /// Where to persist account stats between runs.
    #[arg(long)]
    pub(crate) stats: Option<String>,
    /// Print the per-account performance report after the answer.
    #[arg(long, default_value_t = false)]
    pub(crate) report: bool,
}
