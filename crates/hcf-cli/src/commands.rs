use std::collections::HashSet;
use std::path::Path;

use anyhow::{bail, Context};
use colored::Colorize;
use serde::Serialize;
use tracing::debug;

use hcf_group::names::{components, join};
use hcf_group::{
    FileId, GroupError, HandleId, Namespace, NamespaceConfig, ObjInfo, ObjType, ValidationReport,
};
use hcf_store::FileDevice;
use hcf_types::Address;

use crate::cli::*;

/// What a command produced, ready for either output format.
#[derive(Debug, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Report {
    Done {
        message: String,
    },
    Listing {
        path: String,
        members: Vec<Row>,
    },
    Stat {
        path: String,
        info: ObjInfo,
        target: Option<String>,
    },
    Tree {
        path: String,
        nodes: Vec<TreeNode>,
    },
    Check {
        file: String,
        report: ValidationReport,
    },
}

#[derive(Debug, Serialize)]
pub struct Row {
    pub name: String,
    pub kind: ObjType,
    pub target: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct TreeNode {
    pub depth: usize,
    pub name: String,
    pub kind: ObjType,
    pub target: Option<String>,
    /// Already listed under another name.
    pub revisited: bool,
}

pub fn run_command(cli: Cli) -> anyhow::Result<()> {
    let format = cli.format;
    let report = execute(cli)?;
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        OutputFormat::Text => print_text(&report),
    }
    Ok(())
}

pub fn execute(cli: Cli) -> anyhow::Result<Report> {
    let config = load_config(cli.config.as_deref())?;
    match cli.command {
        Command::Init(args) => cmd_init(&config, args),
        Command::Mkdir(args) => cmd_mkdir(&config, args),
        Command::Ln(args) => cmd_ln(&config, args),
        Command::Rm(args) => cmd_rm(&config, args),
        Command::Mv(args) => cmd_mv(&config, args),
        Command::Ls(args) => cmd_ls(&config, args),
        Command::Stat(args) => cmd_stat(&config, args),
        Command::Tree(args) => cmd_tree(&config, args),
        Command::Check(args) => cmd_check(&config, args),
    }
}

fn load_config(path: Option<&Path>) -> anyhow::Result<NamespaceConfig> {
    let Some(path) = path else {
        return Ok(NamespaceConfig::default());
    };
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading config {}", path.display()))?;
    let config = NamespaceConfig::from_toml_str(&text)
        .with_context(|| format!("parsing config {}", path.display()))?;
    debug!(path = %path.display(), "loaded config");
    Ok(config)
}

/// One container opened with its root group.
struct Session {
    ns: Namespace,
    file: FileId,
    root: HandleId,
}

impl Session {
    fn open(config: &NamespaceConfig, path: &Path) -> anyhow::Result<Self> {
        let device = FileDevice::open(path).with_context(|| format!("opening {}", path.display()))?;
        let mut ns = Namespace::new(config.clone());
        let file = ns.open_file(Box::new(device))?;
        let root = ns.open_root(file)?;
        Ok(Self { ns, file, root })
    }

    /// Close the root and write everything back.
    fn finish(mut self) -> anyhow::Result<()> {
        self.ns.close(self.root)?;
        self.ns.close_file(self.file)?;
        Ok(())
    }

    fn describe(&mut self, path: &str, follow: bool) -> anyhow::Result<(ObjInfo, Option<String>)> {
        let info = self.ns.get_objinfo(self.root, path, follow)?;
        let target = match info.kind {
            ObjType::SymbolicLink => Some(self.ns.get_linkval(self.root, path)?),
            _ => None,
        };
        Ok((info, target))
    }
}

fn done(message: String) -> anyhow::Result<Report> {
    Ok(Report::Done { message })
}

fn cmd_init(config: &NamespaceConfig, args: InitArgs) -> anyhow::Result<Report> {
    if args.file.exists() && !args.force {
        bail!("{} already exists (use --force to overwrite)", args.file.display());
    }
    let device = FileDevice::create(&args.file)
        .with_context(|| format!("creating {}", args.file.display()))?;
    let mut ns = Namespace::new(config.clone());
    let file = ns.create_file(Box::new(device))?;
    ns.close_file(file)?;
    done(format!("Initialized container {}", args.file.display()))
}

fn cmd_mkdir(config: &NamespaceConfig, args: MkdirArgs) -> anyhow::Result<Report> {
    let mut s = Session::open(config, &args.file)?;
    let mut created = 0;
    if args.parents {
        let mut prefix = if args.path.starts_with('/') { "/".to_owned() } else { ".".to_owned() };
        for comp in components(&args.path) {
            prefix = join(&prefix, comp);
            match s.ns.get_objinfo(s.root, &prefix, true) {
                Ok(info) if info.kind == ObjType::Group => continue,
                Ok(info) => bail!("{prefix} is a {}, not a group", info.kind),
                Err(GroupError::NotFound(_)) => {
                    let g = s.ns.create_group(s.root, &prefix)?;
                    s.ns.close(g)?;
                    created += 1;
                }
                Err(err) => return Err(err.into()),
            }
        }
    } else {
        let g = s.ns.create_group(s.root, &args.path)?;
        s.ns.close(g)?;
        created = 1;
    }
    s.finish()?;
    done(format!("Created {created} group(s) for {}", args.path))
}

fn cmd_ln(config: &NamespaceConfig, args: LnArgs) -> anyhow::Result<Report> {
    let mut s = Session::open(config, &args.file)?;
    if args.soft {
        s.ns.link_soft(&args.target, s.root, &args.link)?;
    } else {
        s.ns.link_hard(s.root, &args.target, s.root, &args.link)?;
    }
    s.finish()?;
    let arrow = if args.soft { "->" } else { "=>" };
    done(format!("Linked {} {arrow} {}", args.link, args.target))
}

fn cmd_rm(config: &NamespaceConfig, args: RmArgs) -> anyhow::Result<Report> {
    let mut s = Session::open(config, &args.file)?;
    s.ns.unlink(s.root, &args.path)?;
    s.finish()?;
    done(format!("Removed {}", args.path))
}

fn cmd_mv(config: &NamespaceConfig, args: MvArgs) -> anyhow::Result<Report> {
    let mut s = Session::open(config, &args.file)?;
    s.ns.move_link(s.root, &args.from, s.root, &args.to)?;
    s.finish()?;
    done(format!("Moved {} to {}", args.from, args.to))
}

fn cmd_ls(config: &NamespaceConfig, args: LsArgs) -> anyhow::Result<Report> {
    let mut s = Session::open(config, &args.file)?;
    let mut members = Vec::new();
    for member in s.ns.members(s.root, &args.path)? {
        let (info, target) = s.describe(&join(&args.path, &member.name), false)?;
        members.push(Row {
            name: member.name,
            kind: info.kind,
            target,
        });
    }
    s.finish()?;
    Ok(Report::Listing {
        path: args.path,
        members,
    })
}

fn cmd_stat(config: &NamespaceConfig, args: StatArgs) -> anyhow::Result<Report> {
    let mut s = Session::open(config, &args.file)?;
    let (info, target) = s.describe(&args.path, args.dereference)?;
    s.finish()?;
    Ok(Report::Stat {
        path: args.path,
        info,
        target,
    })
}

fn cmd_tree(config: &NamespaceConfig, args: TreeArgs) -> anyhow::Result<Report> {
    let mut s = Session::open(config, &args.file)?;
    let mut seen = HashSet::new();
    let start = s.ns.get_objinfo(s.root, &args.path, true)?;
    seen.insert((start.file, start.header));
    let mut nodes = Vec::new();
    walk(&mut s, &args.path, 0, &mut seen, &mut nodes)?;
    s.finish()?;
    Ok(Report::Tree {
        path: args.path,
        nodes,
    })
}

/// Depth-first listing. Groups reachable under more than one name are
/// expanded once.
fn walk(
    s: &mut Session,
    path: &str,
    depth: usize,
    seen: &mut HashSet<(FileId, Address)>,
    nodes: &mut Vec<TreeNode>,
) -> anyhow::Result<()> {
    for member in s.ns.members(s.root, path)? {
        let child = join(path, &member.name);
        let (info, target) = s.describe(&child, false)?;
        let revisited = info.kind == ObjType::Group && !seen.insert((info.file, info.header));
        nodes.push(TreeNode {
            depth,
            name: member.name,
            kind: info.kind,
            target,
            revisited,
        });
        if info.kind == ObjType::Group && !revisited {
            walk(s, &child, depth + 1, seen, nodes)?;
        }
    }
    Ok(())
}

fn cmd_check(config: &NamespaceConfig, args: CheckArgs) -> anyhow::Result<Report> {
    let mut s = Session::open(config, &args.file)?;
    let report = s.ns.validate(s.file)?;
    s.finish()?;
    Ok(Report::Check {
        file: args.file.display().to_string(),
        report,
    })
}

fn styled_name(name: &str, kind: ObjType) -> String {
    match kind {
        ObjType::Group => format!("{}/", name.blue().bold()),
        ObjType::SymbolicLink => name.cyan().to_string(),
        ObjType::NamedDatatype => name.magenta().to_string(),
        ObjType::Dataset => name.to_string(),
    }
}

fn print_text(report: &Report) {
    match report {
        Report::Done { message } => println!("{} {}", "✓".green().bold(), message),
        Report::Listing { members, .. } => {
            if members.is_empty() {
                println!("{}", "(empty)".dimmed());
            }
            for row in members {
                match &row.target {
                    Some(target) => println!("{} -> {}", styled_name(&row.name, row.kind), target),
                    None => println!("{}", styled_name(&row.name, row.kind)),
                }
            }
        }
        Report::Stat { path, info, target } => {
            println!("{}: {}", path.bold(), info.kind);
            println!("  File: {}", info.file);
            match target {
                Some(target) => {
                    println!("  Value: {} ({} bytes)", target.cyan(), info.link_len);
                }
                None => {
                    println!("  Header: {}", info.header.to_string().yellow());
                    println!("  Links: {}", info.link_count);
                }
            }
            if info.mounted {
                println!("  {}", "mount point".yellow());
            }
        }
        Report::Tree { path, nodes } => {
            println!("{}", path.bold());
            for node in nodes {
                let indent = "  ".repeat(node.depth + 1);
                let mut line = format!("{indent}{}", styled_name(&node.name, node.kind));
                if let Some(target) = &node.target {
                    line.push_str(&format!(" -> {target}"));
                }
                if node.revisited {
                    line.push_str(&format!(" {}", "(seen)".dimmed()));
                }
                println!("{line}");
            }
        }
        Report::Check { file, report } => {
            println!("{} {} is consistent", "✓".green().bold(), file.bold());
            println!(
                "  {} groups, {} other objects, {} symbolic links",
                report.groups, report.objects, report.symlinks
            );
            println!("  {} nodes, {} entries", report.nodes, report.entries);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    fn run(args: &[&str]) -> anyhow::Result<Report> {
        let mut argv = vec!["hcf"];
        argv.extend_from_slice(args);
        execute(Cli::try_parse_from(argv)?)
    }

    fn names(report: Report) -> Vec<(String, ObjType)> {
        match report {
            Report::Listing { members, .. } => members.into_iter().map(|r| (r.name, r.kind)).collect(),
            other => panic!("expected a listing, got {other:?}"),
        }
    }

    #[test]
    fn init_mkdir_and_list() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("c.hcf");
        let file = path.to_str().unwrap();

        run(&["init", file]).unwrap();
        run(&["mkdir", "-p", file, "/a/b/c"]).unwrap();
        run(&["mkdir", file, "/a/z"]).unwrap();

        let listed = names(run(&["ls", file, "/a"]).unwrap());
        assert_eq!(
            listed,
            vec![("b".to_owned(), ObjType::Group), ("z".to_owned(), ObjType::Group)]
        );
        // Existing parents are accepted with -p only.
        run(&["mkdir", "-p", file, "/a/b"]).unwrap();
        assert!(run(&["mkdir", file, "/a/b"]).is_err());
    }

    #[test]
    fn init_refuses_to_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("c.hcf");
        let file = path.to_str().unwrap();
        run(&["init", file]).unwrap();
        assert!(run(&["init", file]).is_err());
        run(&["init", "--force", file]).unwrap();
    }

    #[test]
    fn links_moves_and_removal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("c.hcf");
        let file = path.to_str().unwrap();
        run(&["init", file]).unwrap();
        run(&["mkdir", "-p", file, "/data/raw"]).unwrap();
        run(&["ln", file, "/data/raw", "/alias"]).unwrap();
        run(&["ln", "--soft", file, "data/raw", "/shortcut"]).unwrap();

        match run(&["stat", file, "/shortcut"]).unwrap() {
            Report::Stat { info, target, .. } => {
                assert_eq!(info.kind, ObjType::SymbolicLink);
                assert_eq!(target.as_deref(), Some("data/raw"));
                assert_eq!(info.link_len, 8);
            }
            other => panic!("unexpected {other:?}"),
        }
        match run(&["stat", "-L", file, "/shortcut"]).unwrap() {
            Report::Stat { info, .. } => {
                assert_eq!(info.kind, ObjType::Group);
                assert_eq!(info.link_count, 2);
            }
            other => panic!("unexpected {other:?}"),
        }

        run(&["mv", file, "/alias", "/renamed"]).unwrap();
        run(&["rm", file, "/data/raw"]).unwrap();
        let listed = names(run(&["ls", file]).unwrap());
        assert_eq!(
            listed,
            vec![
                ("data".to_owned(), ObjType::Group),
                ("renamed".to_owned(), ObjType::Group),
                ("shortcut".to_owned(), ObjType::SymbolicLink),
            ]
        );

        match run(&["check", file]).unwrap() {
            Report::Check { report, .. } => {
                assert_eq!(report.groups, 3);
                assert_eq!(report.symlinks, 1);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn tree_expands_shared_groups_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("c.hcf");
        let file = path.to_str().unwrap();
        run(&["init", file]).unwrap();
        run(&["mkdir", "-p", file, "/a/inner"]).unwrap();
        run(&["ln", file, "/a", "/b"]).unwrap();

        let Report::Tree { nodes, .. } = run(&["tree", file]).unwrap() else {
            panic!("expected a tree");
        };
        let lines: Vec<(usize, &str, bool)> = nodes
            .iter()
            .map(|n| (n.depth, n.name.as_str(), n.revisited))
            .collect();
        assert_eq!(lines, vec![(0, "a", false), (1, "inner", false), (0, "b", true)]);
    }

    #[test]
    fn json_reports_are_tagged() {
        let report = Report::Done {
            message: "ok".into(),
        };
        let value: serde_json::Value =
            serde_json::from_str(&serde_json::to_string(&report).unwrap()).unwrap();
        assert_eq!(value["kind"], "done");
        assert_eq!(value["message"], "ok");
    }

    #[test]
    fn config_file_is_applied() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = dir.path().join("hcf.toml");
        std::fs::write(&cfg, "max_symlink_hops = 0\n").unwrap();
        let path = dir.path().join("c.hcf");
        let err = run(&["--config", cfg.to_str().unwrap(), "init", path.to_str().unwrap()]).unwrap_err();
        assert!(format!("{err:#}").contains("max_symlink_hops"));
        assert!(!path.exists());
    }
}
