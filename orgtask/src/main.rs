use std::{
    collections::{BTreeSet, HashSet},
    fs,
    path::{Path, PathBuf},
    process::ExitCode,
};

use anyhow::{Context as _, Result};
use clap::{Args, Parser, Subcommand};
use orgtask::core::{Context, ParseResult, Project, Task};
use orgtask::format::render_planning;
use orgtask::{ParseOptions, parse_bytes_with_options};
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(
    name = "orgtask",
    about = "Read GTD tasks and projects out of Org files",
    version
)]
struct Cli {
    /// Enable verbose logging for debugging.
    #[arg(long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Parse Org files and print the tasks and projects they hold.
    Parse(ParseArgs),

    /// Report warnings and errors; exits non-zero when any file has errors.
    Check(CheckArgs),
}

#[derive(Debug, Args)]
struct ParseArgs {
    /// Org files or directories containing Org files to parse.
    #[arg(required = true)]
    inputs: Vec<PathBuf>,
    /// Emit JSON instead of a human-readable listing.
    #[arg(long)]
    json: bool,
    /// Context for entries without a CONTEXT property, instead of deriving it from the path.
    #[arg(long)]
    context: Option<String>,
}

#[derive(Debug, Args)]
struct CheckArgs {
    /// Org files or directories containing Org files to check.
    #[arg(required = true)]
    inputs: Vec<PathBuf>,
    /// Context for entries without a CONTEXT property, instead of deriving it from the path.
    #[arg(long)]
    context: Option<String>,
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    match cli.command {
        Commands::Parse(args) => handle_parse(args),
        Commands::Check(args) => handle_check(args),
    }
}

fn init_tracing(verbose: bool) {
    let fallback = if verbose { "orgtask=debug" } else { "orgtask=warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn options_for(context: Option<&str>) -> ParseOptions {
    ParseOptions {
        default_context: context.map(Context::new),
        now: None,
    }
}

fn handle_parse(args: ParseArgs) -> Result<ExitCode> {
    let ParseArgs {
        inputs,
        json,
        context,
    } = args;
    let expanded = expand_inputs(&inputs)?;
    if expanded.is_empty() {
        anyhow::bail!("no Org files found in the provided inputs");
    }

    let options = options_for(context.as_deref());
    let (parsed, unreadable) = parse_all(expanded, &options);

    if json {
        #[derive(serde::Serialize)]
        struct JsonOutput<'a> {
            path: String,
            result: &'a ParseResult,
        }

        let payload: Vec<JsonOutput<'_>> = parsed
            .iter()
            .map(|(path, result)| JsonOutput {
                path: path.display().to_string(),
                result,
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&payload)?);
    } else {
        for (idx, (path, result)) in parsed.iter().enumerate() {
            if parsed.len() > 1 {
                println!("== {} ==", path.display());
            }
            print!("{}", describe(result));
            if parsed.len() > 1 && idx + 1 < parsed.len() {
                println!();
            }
        }
    }

    Ok(exit_code(unreadable == 0))
}

fn handle_check(args: CheckArgs) -> Result<ExitCode> {
    let CheckArgs { inputs, context } = args;
    let expanded = expand_inputs(&inputs)?;
    if expanded.is_empty() {
        anyhow::bail!("no Org files found in the provided inputs");
    }

    let options = options_for(context.as_deref());
    let (parsed, unreadable) = parse_all(expanded, &options);

    for (path, result) in &parsed {
        for problem in &result.errors {
            println!("{}:{problem}", path.display());
            if !problem.snippet.is_empty() {
                println!("    {}", problem.snippet);
            }
        }
    }
    let (errors, warnings) = tally(&parsed);
    println!(
        "{} file(s) checked: {errors} error(s), {warnings} warning(s)",
        parsed.len()
    );

    Ok(exit_code(errors == 0 && unreadable == 0))
}

/// (errors, warnings) across every parsed file.
fn tally(parsed: &[(PathBuf, ParseResult)]) -> (usize, usize) {
    parsed.iter().fold((0, 0), |(errors, warnings), (_, result)| {
        (
            errors + result.errors.iter().filter(|e| e.is_error()).count(),
            warnings + result.warnings().count(),
        )
    })
}

fn exit_code(ok: bool) -> ExitCode {
    if ok { ExitCode::SUCCESS } else { ExitCode::FAILURE }
}

/// Parses every file on its own; a file that cannot be read is logged and counted, and
/// the rest of the batch still runs.
fn parse_all(paths: Vec<PathBuf>, options: &ParseOptions) -> (Vec<(PathBuf, ParseResult)>, usize) {
    let mut parsed = Vec::new();
    let mut unreadable = 0;
    for path in paths {
        match parse_file(&path, options) {
            Ok(result) => parsed.push((path, result)),
            Err(err) => {
                error!("{err:#}");
                unreadable += 1;
            }
        }
    }
    (parsed, unreadable)
}

fn parse_file(path: &Path, options: &ParseOptions) -> Result<ParseResult> {
    debug!(path = %path.display(), "parsing");
    let bytes = fs::read(path).with_context(|| format!("reading {:?}", path))?;
    let result = parse_bytes_with_options(&bytes, &path.display().to_string(), options);
    if result.has_errors() {
        warn!(path = %path.display(), errors = result.errors.len(), "file has errors");
    }
    Ok(result)
}

fn describe(result: &ParseResult) -> String {
    let mut out = String::new();
    for project in &result.projects {
        out.push_str(&describe_project(project));
        out.push('\n');
        for task in result
            .tasks
            .iter()
            .filter(|t| t.project.as_deref() == Some(project.title.as_str()))
        {
            out.push_str("  ");
            out.push_str(&describe_task(task));
            out.push('\n');
        }
    }
    let known: HashSet<&str> = result.projects.iter().map(|p| p.title.as_str()).collect();
    for task in result
        .tasks
        .iter()
        .filter(|t| t.project.as_deref().is_none_or(|p| !known.contains(p)))
    {
        out.push_str(&describe_task(task));
        out.push('\n');
    }
    for problem in &result.errors {
        out.push_str(&format!("! {problem}\n"));
    }
    out
}

fn describe_project(project: &Project) -> String {
    let mut line = format!(
        "PROJECT {} [{}] ({})",
        project.title, project.status, project.context
    );
    if let Some(priority) = project.priority {
        line.push_str(&format!(" #{}", priority.as_char()));
    }
    line
}

fn describe_task(task: &Task) -> String {
    let mut line = format!("{} {}", task.state, task.title);
    if let Some(priority) = task.priority {
        line.push_str(&format!(" #{}", priority.as_char()));
    }
    if !task.tags.is_empty() {
        let tags: Vec<&str> = task.tags.iter().map(|t| t.0.as_str()).collect();
        line.push_str(&format!(" :{}:", tags.join(":")));
    }
    line.push_str(&format!(" ({})", task.context));
    if task.effort > 0.0 {
        line.push_str(&format!(" effort={}h", task.effort));
    }
    let planning = render_planning(task);
    if !planning.is_empty() {
        line.push(' ');
        line.push_str(&planning);
    }
    line
}

fn expand_inputs(paths: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let mut out = Vec::new();
    let mut listed = BTreeSet::new();
    for path in paths {
        let canonical =
            fs::canonicalize(path).with_context(|| format!("resolving path {:?}", path))?;
        let meta = fs::metadata(&canonical)
            .with_context(|| format!("reading metadata for {:?}", canonical))?;
        if meta.is_dir() {
            info!(dir = %canonical.display(), "scanning directory");
            let mut found = Vec::new();
            visit_dir(&canonical, &mut found, &mut HashSet::new())?;
            found.sort();
            for file in found {
                if listed.insert(file.clone()) {
                    out.push(file);
                }
            }
        } else if meta.is_file() {
            if !is_org_file(&canonical) {
                anyhow::bail!("{:?} is not an .org file", canonical);
            }
            if listed.insert(canonical.clone()) {
                out.push(canonical);
            }
        }
    }
    Ok(out)
}

fn visit_dir(path: &Path, out: &mut Vec<PathBuf>, visited: &mut HashSet<PathBuf>) -> Result<()> {
    let canonical = fs::canonicalize(path)?;
    if !visited.insert(canonical.clone()) {
        return Ok(());
    }

    let metadata = fs::metadata(&canonical)?;
    if metadata.is_dir() {
        debug!(dir = %canonical.display(), "visiting directory");
        for entry in fs::read_dir(&canonical)? {
            let entry = entry?;
            if entry.file_type()?.is_symlink() {
                continue;
            }
            visit_dir(&entry.path(), out, visited)?;
        }
    } else if metadata.is_file() && is_org_file(&canonical) {
        out.push(canonical);
    }
    Ok(())
}

fn is_org_file(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == "org")
}
