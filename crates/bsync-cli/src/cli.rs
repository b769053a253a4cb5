use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "bsync",
    about = "Sync a local project to a remote build service",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Path to the config file (default: <root>/bsync.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Project root
    #[arg(long, global = true, default_value = ".")]
    pub root: PathBuf,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Command {
    /// Show the remote snapshot, pending changes and current build host
    Status(StatusArgs),
    /// List the changes the next relink would send
    Diff(DiffArgs),
    /// Upload the whole project for a full build
    Link(LinkArgs),
    /// Send only what changed since the last successful submission
    Relink(RelinkArgs),
    /// Upload the whole project and run its tests
    Test(TestArgs),
    /// Upload the whole project and publish it
    Publish(PublishArgs),
    /// Watch the project and relink on every change
    Watch(WatchArgs),
    /// Show or reset the sticky build host
    Host(HostArgs),
}

#[derive(Args)]
pub struct StatusArgs {}

#[derive(Args)]
pub struct DiffArgs {}

#[derive(Args)]
pub struct LinkArgs {}

#[derive(Args)]
pub struct RelinkArgs {}

#[derive(Args)]
pub struct TestArgs {
    /// Only run tests matching this filter
    #[arg(long)]
    pub filter: Option<String>,
}

#[derive(Args)]
pub struct PublishArgs {
    /// Release tag
    #[arg(long)]
    pub tag: Option<String>,
}

#[derive(Args)]
pub struct WatchArgs {
    /// Link the whole project before watching
    #[arg(long)]
    pub link_first: bool,
}

#[derive(Args)]
pub struct HostArgs {
    /// Forget the current host so the next submission probes again
    #[arg(long)]
    pub reset: bool,
}
