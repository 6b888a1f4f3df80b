use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(
    name = "hcf",
    about = "Inspect and edit the groups of a hierarchical container file",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,

    /// TOML file with namespace settings
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Create a container file with an empty root group
    Init(InitArgs),
    /// Create a group
    Mkdir(MkdirArgs),
    /// Add a hard or symbolic link
    Ln(LnArgs),
    /// Remove a name
    Rm(RmArgs),
    /// Rename a link
    Mv(MvArgs),
    /// List the members of a group
    Ls(LsArgs),
    /// Describe what a name refers to
    Stat(StatArgs),
    /// Print the group hierarchy
    Tree(TreeArgs),
    /// Validate every group table and link count
    Check(CheckArgs),
}

#[derive(Args, Debug)]
pub struct InitArgs {
    pub file: PathBuf,
    /// Overwrite an existing file
    #[arg(long)]
    pub force: bool,
}

#[derive(Args, Debug)]
pub struct MkdirArgs {
    pub file: PathBuf,
    pub path: String,
    /// Create missing parents and accept existing groups
    #[arg(short, long)]
    pub parents: bool,
}

#[derive(Args, Debug)]
pub struct LnArgs {
    pub file: PathBuf,
    /// Existing object, or the link value with `--soft`
    pub target: String,
    pub link: String,
    #[arg(short, long)]
    pub soft: bool,
}

#[derive(Args, Debug)]
pub struct RmArgs {
    pub file: PathBuf,
    pub path: String,
}

#[derive(Args, Debug)]
pub struct MvArgs {
    pub file: PathBuf,
    pub from: String,
    pub to: String,
}

#[derive(Args, Debug)]
pub struct LsArgs {
    pub file: PathBuf,
    #[arg(default_value = "/")]
    pub path: String,
}

#[derive(Args, Debug)]
pub struct StatArgs {
    pub file: PathBuf,
    pub path: String,
    /// Describe the target of a symbolic link instead of the link
    #[arg(short = 'L', long)]
    pub dereference: bool,
}

#[derive(Args, Debug)]
pub struct TreeArgs {
    pub file: PathBuf,
    #[arg(default_value = "/")]
    pub path: String,
}

#[derive(Args, Debug)]
pub struct CheckArgs {
    pub file: PathBuf,
}
