//! Binary entry point for the `zsrutil` command-line tool.
//!
//! Thin front-end over the library: `create` builds an archive from a
//! directory, `extract` unpacks an archive or one member into the current
//! directory, `info` prints metadata, and `list` shows a directory's
//! immediate children. Exit code is 0 on success and 1 on any error, with
//! the error message on stderr.

use std::fs::File;
use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};

use zsr::display::set_display_level;
use zsr::{Archive, LinkPolicy, NodeType, Writer};

#[derive(Parser)]
#[command(name = "zsrutil", version, about = "Create and inspect ZSR archives")]
struct Cli {
    /// Increase verbosity (repeatable).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Pack a directory tree into a new archive.
    Create {
        /// Source directory to archive.
        src: PathBuf,
        /// Destination archive file.
        dest: PathBuf,
        /// How to treat symbolic links.
        #[arg(long, value_enum, default_value_t = LinkArg::Process)]
        links: LinkArg,
    },
    /// Extract an archive, or one member, into the current directory.
    Extract {
        /// Archive file to read.
        src: PathBuf,
        /// Member path; the whole archive when omitted.
        member: Option<String>,
    },
    /// Print archive metadata, or one member's metadata.
    Info {
        /// Archive file to read.
        src: PathBuf,
        /// Member path; archive-level metadata when omitted.
        member: Option<String>,
    },
    /// List the immediate children of a member.
    List {
        /// Archive file to read.
        src: PathBuf,
        /// Member path; the root when omitted.
        member: Option<String>,
    },
}

#[derive(ValueEnum, Clone, Copy)]
enum LinkArg {
    /// Archive in-tree links as links, out-of-tree links as their targets.
    Process,
    /// Replace every link by its target.
    Follow,
    /// Omit links entirely.
    Skip,
}

impl From<LinkArg> for LinkPolicy {
    fn from(arg: LinkArg) -> LinkPolicy {
        match arg {
            LinkArg::Process => LinkPolicy::Process,
            LinkArg::Follow => LinkPolicy::Follow,
            LinkArg::Skip => LinkPolicy::Skip,
        }
    }
}

fn create(src: &Path, dest: &Path, links: LinkArg, debug: bool) -> anyhow::Result<()> {
    let mut writer = Writer::new(src, links.into(), debug)
        .with_context(|| format!("couldn't open source directory {}", src.display()))?;
    let out = File::create(dest)
        .with_context(|| format!("couldn't create archive file {}", dest.display()))?;
    writer.write(out)?;
    Ok(())
}

fn extract(src: &Path, member: Option<&str>) -> anyhow::Result<()> {
    let ar = Archive::open(src)?;
    ar.get(member.unwrap_or(""))?.extract(Path::new("."))?;
    Ok(())
}

fn info(src: &Path, member: Option<&str>) -> anyhow::Result<()> {
    let ar = Archive::open(src)?;
    if let Some(member) = member {
        let node = ar.get(member)?;
        let width = ar.node_meta_keys().iter().map(|k| k.len()).max().unwrap_or(0);
        for key in ar.node_meta_keys() {
            let value = node.meta(key)?;
            if !value.is_empty() {
                println!("{key:>width$}:  {value}");
            }
        }
        return Ok(());
    }
    println!("Archive metadata:");
    let width = ar.archive_meta().keys().map(|k| k.len()).max().unwrap_or(0);
    let mut pairs: Vec<_> = ar.archive_meta().iter().collect();
    pairs.sort();
    for (key, value) in pairs {
        println!("    {key:>width$}:  {value}");
    }
    println!("Node metadata:");
    for key in ar.node_meta_keys() {
        println!("    {key}");
    }
    Ok(())
}

fn list(src: &Path, member: Option<&str>) -> anyhow::Result<()> {
    let ar = Archive::open(src)?;
    for child in ar.get(member.unwrap_or(""))?.children()? {
        let (name, id) = child?;
        let node = ar.index(id)?;
        match node.node_type() {
            NodeType::Directory => println!("{name}/"),
            NodeType::Link => println!("{name} -> {}", node.dest()?),
            NodeType::Regular => println!("{name}"),
        }
    }
    Ok(())
}

fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Command::Create { src, dest, links } => create(&src, &dest, links, cli.verbose >= 2),
        Command::Extract { src, member } => extract(&src, member.as_deref()),
        Command::Info { src, member } => info(&src, member.as_deref()),
        Command::List { src, member } => list(&src, member.as_deref()),
    }
}

fn main() {
    let cli = Cli::parse();
    set_display_level(2 + cli.verbose as u32);
    if let Err(e) = run(cli) {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}
