use clap::{ArgGroup, Parser};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
#[command(group(
    ArgGroup::new("color_mode")
        .args(["color", "no_color"])
))]
/// Create a Pantheon multidev environment from a branch.
pub struct Cli {
    /// Config file (defaults to $MULTIDEV_CONFIG, then ~/.config/multidev-branch/config.toml)
    #[arg(long, value_name = "FILE")]
    pub config: Option<String>,

    /// Override the scratch directory that holds build directories
    #[arg(long, value_name = "DIR")]
    pub scratch_dir: Option<String>,

    /// Keep the version-control branch when deleting a stale environment
    #[arg(long)]
    pub keep_branch: bool,

    /// Enable colored output
    #[arg(long)]
    pub color: bool,

    /// Disable colored output
    #[arg(long = "no-color")]
    pub no_color: bool,

    /// Suppress progress output (the preview URL is still printed)
    #[arg(long)]
    pub quiet: bool,

    /// Source environment as <site>.<env>, e.g. myapp.dev
    pub source: String,

    /// Branch to build the environment from
    pub branch: String,

    /// External git repository holding the branch
    pub remote: Option<String>,
}
