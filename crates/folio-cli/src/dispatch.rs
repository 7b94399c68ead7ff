use std::fs;
use std::path::Path;
use std::sync::Arc;

use folio_core::{
    BagOptions, Bagger, Config, Convention, Error, ErrorKind, ManifestationDepth, Resolver,
    Result, Workspace,
};
use folio_mets::{mimetype_for_filename, FileFilter, Matcher, MetsFile, NewFile};
use serde_json::{json, Value};
use tracing::debug;

use crate::cli::{
    AddArgs, BagArgs, CloneArgs, CommandGroupCli, CreateArgs, FindArgs, FolioCli, InitArgs,
    RemoveArgs, SpillArgs, ValidateArgs, WorkspaceCommand, ZipCommand,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandStatus {
    Ok,
    UserError,
    Failure,
}

#[derive(Debug, Clone, Copy)]
pub struct CommandInfo {
    pub group: &'static str,
    pub name: &'static str,
}

/// What a command produced: a one-line summary, optional plain lines for
/// stdout and structured details for `--json`.
#[derive(Debug, Clone)]
pub struct ExecutionOutcome {
    pub status: CommandStatus,
    pub message: String,
    pub lines: Vec<String>,
    pub details: Value,
}

impl ExecutionOutcome {
    fn ok(message: impl Into<String>, details: Value) -> Self {
        Self {
            status: CommandStatus::Ok,
            message: message.into(),
            lines: Vec::new(),
            details,
        }
    }

    fn with_lines(mut self, lines: Vec<String>) -> Self {
        self.lines = lines;
        self
    }

    fn from_error(err: &Error) -> Self {
        let kind = err.kind();
        let status = match kind {
            ErrorKind::NotFound | ErrorKind::Conflict | ErrorKind::InvalidArgument => {
                CommandStatus::UserError
            }
            _ => CommandStatus::Failure,
        };
        Self {
            status,
            message: err.to_string(),
            lines: Vec::new(),
            details: json!({ "kind": kind }),
        }
    }
}

#[must_use]
pub fn command_info(cli: &FolioCli) -> CommandInfo {
    let (group, name) = match &cli.command {
        CommandGroupCli::Workspace(cmd) => (
            "workspace",
            match cmd {
                WorkspaceCommand::Clone(_) => "clone",
                WorkspaceCommand::Init(_) => "init",
                WorkspaceCommand::Create(_) => "create",
                WorkspaceCommand::Find(_) => "find",
                WorkspaceCommand::Add(_) => "add",
                WorkspaceCommand::Remove(_) => "remove",
                WorkspaceCommand::ListGroup => "list-group",
                WorkspaceCommand::ListPage => "list-page",
            },
        ),
        CommandGroupCli::Zip(cmd) => (
            "zip",
            match cmd {
                ZipCommand::Bag(_) => "bag",
                ZipCommand::Spill(_) => "spill",
                ZipCommand::Validate(_) => "validate",
            },
        ),
    };
    CommandInfo { group, name }
}

pub fn execute(cli: &FolioCli) -> ExecutionOutcome {
    match run(cli) {
        Ok(outcome) => outcome,
        Err(err) => {
            debug!(?err, "command failed");
            ExecutionOutcome::from_error(&err)
        }
    }
}

fn run(cli: &FolioCli) -> Result<ExecutionOutcome> {
    let config = Config::from_env()?;
    let resolver = Arc::new(Resolver::new(config)?);
    match &cli.command {
        CommandGroupCli::Workspace(cmd) => match cmd {
            WorkspaceCommand::Clone(args) => workspace_clone(cli, &resolver, args),
            WorkspaceCommand::Init(args) => workspace_init(cli, &resolver, args),
            WorkspaceCommand::Create(args) => workspace_create(cli, &resolver, args),
            WorkspaceCommand::Find(args) => workspace_find(open(cli, &resolver)?, args),
            WorkspaceCommand::Add(args) => workspace_add(open(cli, &resolver)?, args),
            WorkspaceCommand::Remove(args) => workspace_remove(open(cli, &resolver)?, args),
            WorkspaceCommand::ListGroup => {
                let groups = open(cli, &resolver)?.mets().file_groups();
                Ok(list_outcome("file groups", groups))
            }
            WorkspaceCommand::ListPage => {
                let pages = open(cli, &resolver)?.mets().physical_pages();
                Ok(list_outcome("physical pages", pages))
            }
        },
        CommandGroupCli::Zip(cmd) => {
            let bagger = Bagger::new(Arc::clone(&resolver));
            match cmd {
                ZipCommand::Bag(args) => zip_bag(&bagger, &open(cli, &resolver)?, cli, args),
                ZipCommand::Spill(args) => zip_spill(&bagger, args),
                ZipCommand::Validate(args) => zip_validate(&bagger, args),
            }
        }
    }
}

fn open(cli: &FolioCli, resolver: &Arc<Resolver>) -> Result<Workspace> {
    Workspace::open(
        Arc::clone(resolver),
        &cli.directory,
        Some(&cli.mets_basename),
    )
}

fn workspace_details(workspace: &Workspace) -> Value {
    json!({
        "directory": workspace.directory(),
        "mets": workspace.mets_path(),
        "files": workspace.mets().find_files(&FileFilter::new()).len(),
    })
}

fn workspace_clone(
    cli: &FolioCli,
    resolver: &Arc<Resolver>,
    args: &CloneArgs,
) -> Result<ExecutionOutcome> {
    let directory = args.workspace_dir.as_deref().unwrap_or(&cli.directory);
    let mut workspace =
        resolver.workspace_from_url(&args.mets_url, Some(directory), Some(&cli.mets_basename))?;
    let mut downloaded = 0;
    if args.download {
        for file in workspace.mets().find_files(&FileFilter::new()) {
            workspace.download_file(&file)?;
            downloaded += 1;
        }
    }
    let mut details = workspace_details(&workspace);
    details["downloaded"] = json!(downloaded);
    Ok(ExecutionOutcome::ok(
        format!("cloned into {}", workspace.directory().display()),
        details,
    ))
}

fn workspace_init(
    cli: &FolioCli,
    resolver: &Arc<Resolver>,
    args: &InitArgs,
) -> Result<ExecutionOutcome> {
    let workspace = resolver.workspace_from_nothing(Some(&cli.directory), args.clobber)?;
    Ok(ExecutionOutcome::ok(
        format!("initialized {}", workspace.mets_path().display()),
        workspace_details(&workspace),
    ))
}

fn workspace_create(
    cli: &FolioCli,
    resolver: &Arc<Resolver>,
    args: &CreateArgs,
) -> Result<ExecutionOutcome> {
    let convention: Convention = args.convention.parse()?;
    let workspace = resolver.workspace_from_folder(&cli.directory, convention, args.clobber)?;
    let details = workspace_details(&workspace);
    Ok(ExecutionOutcome::ok(
        format!(
            "created {} with {} files",
            workspace.mets_path().display(),
            details["files"]
        ),
        details,
    ))
}

fn workspace_find(mut workspace: Workspace, args: &FindArgs) -> Result<ExecutionOutcome> {
    let mut filter = FileFilter::new().local_only(args.local_only);
    if let Some(id) = &args.file_id {
        filter = filter.id(Matcher::parse(id)?);
    }
    if let Some(grp) = &args.file_grp {
        filter = filter.file_grp(Matcher::parse(grp)?);
    }
    if let Some(mimetype) = &args.mimetype {
        filter = filter.mimetype(Matcher::parse(mimetype)?);
    }
    if let Some(url) = &args.url {
        filter = filter.url(Matcher::parse(url)?);
    }
    if let Some(page_id) = &args.page_id {
        filter = filter.page_id(page_id)?;
    }
    for field in &args.output_fields {
        if field_value(&placeholder_file(), field).is_none() {
            return Err(Error::InvalidArgument(format!(
                "unknown output field '{field}'"
            )));
        }
    }

    let mut files = workspace.mets().find_files(&filter);
    if args.download {
        files = files
            .iter()
            .map(|file| workspace.download_file(file))
            .collect::<Result<Vec<_>>>()?;
    }
    let lines = files
        .iter()
        .map(|file| {
            args.output_fields
                .iter()
                .map(|field| field_value(file, field).unwrap_or_default())
                .collect::<Vec<_>>()
                .join("\t")
        })
        .collect();
    Ok(
        ExecutionOutcome::ok(format!("{} files", files.len()), json!({ "files": files }))
            .with_lines(lines),
    )
}

fn placeholder_file() -> MetsFile {
    MetsFile {
        id: String::new(),
        file_grp: String::new(),
        mimetype: None,
        url: None,
        page_id: None,
        local_filename: None,
    }
}

fn field_value(file: &MetsFile, field: &str) -> Option<String> {
    let value = match field {
        "id" | "ID" => file.id.clone(),
        "file_grp" | "fileGrp" => file.file_grp.clone(),
        "mimetype" | "mimeType" => file.mimetype.clone().unwrap_or_default(),
        "url" => file.url.clone().unwrap_or_default(),
        "page_id" | "pageId" => file.page_id.clone().unwrap_or_default(),
        "local_filename" | "localFilename" => file
            .local_filename
            .as_ref()
            .map(|path| path.display().to_string())
            .unwrap_or_default(),
        _ => return None,
    };
    Some(value)
}

fn workspace_add(mut workspace: Workspace, args: &AddArgs) -> Result<ExecutionOutcome> {
    let url = workspace_relative(workspace.directory(), &args.fname);
    let mimetype = args
        .mimetype
        .clone()
        .unwrap_or_else(|| mimetype_for_filename(&args.fname).to_string());
    let mut new_file = NewFile::new(args.file_grp.as_str(), args.file_id.as_str())
        .mimetype(mimetype)
        .url(url)
        .force(args.force);
    if let Some(page_id) = &args.page_id {
        new_file = new_file.page_id(page_id.as_str());
    }
    let file = workspace.mets_mut().add_file(new_file)?;
    workspace.save_mets()?;
    Ok(ExecutionOutcome::ok(
        format!("added {}", file.id),
        json!({ "file": file }),
    ))
}

/// Local paths inside the workspace are stored relative to it.
fn workspace_relative(directory: &Path, fname: &str) -> String {
    if fname.contains("://") {
        return fname.to_string();
    }
    let (Ok(path), Ok(directory)) = (fs::canonicalize(fname), fs::canonicalize(directory)) else {
        return fname.to_string();
    };
    path.strip_prefix(&directory)
        .map_or_else(|_| fname.to_string(), |rel| rel.to_string_lossy().into_owned())
}

fn workspace_remove(mut workspace: Workspace, args: &RemoveArgs) -> Result<ExecutionOutcome> {
    let removed = args
        .ids
        .iter()
        .map(|id| workspace.mets_mut().remove_file(id))
        .collect::<std::result::Result<Vec<_>, _>>()?;
    workspace.save_mets()?;
    let lines = removed.iter().map(|file| file.id.clone()).collect();
    Ok(ExecutionOutcome::ok(
        format!("removed {} files", removed.len()),
        json!({ "removed": removed }),
    )
    .with_lines(lines))
}

fn list_outcome(what: &str, items: Vec<String>) -> ExecutionOutcome {
    ExecutionOutcome::ok(format!("{} {what}", items.len()), json!({ "items": items }))
        .with_lines(items)
}

fn zip_bag(
    bagger: &Bagger,
    workspace: &Workspace,
    cli: &FolioCli,
    args: &BagArgs,
) -> Result<ExecutionOutcome> {
    let depth: ManifestationDepth = args.manifestation_depth.parse()?;
    let options = BagOptions {
        dest: args.dest.clone(),
        mets_basename: cli.mets_basename.clone(),
        depth,
        base_version_checksum: args.base_version_checksum.clone(),
        skip_zip: args.skip_zip,
        parallelism: args.processes,
    };
    let dest = bagger.bag(workspace, &args.identifier, &options)?;
    Ok(ExecutionOutcome::ok(
        format!("bagged {}", dest.display()),
        json!({ "path": dest, "depth": depth }),
    )
    .with_lines(vec![dest.display().to_string()]))
}

fn zip_spill(bagger: &Bagger, args: &SpillArgs) -> Result<ExecutionOutcome> {
    let workspace = bagger.spill(&args.src, &args.dest)?;
    Ok(ExecutionOutcome::ok(
        format!("spilled into {}", workspace.directory().display()),
        workspace_details(&workspace),
    )
    .with_lines(vec![workspace.directory().display().to_string()]))
}

fn zip_validate(bagger: &Bagger, args: &ValidateArgs) -> Result<ExecutionOutcome> {
    let report = bagger.validate(&args.src)?;
    let mut lines: Vec<String> = report
        .errors
        .iter()
        .map(|err| format!("error: {err}"))
        .collect();
    lines.extend(report.warnings.iter().map(|warn| format!("warning: {warn}")));
    let (status, message) = if report.is_valid {
        (CommandStatus::Ok, format!("{} is a valid bag", args.src.display()))
    } else {
        (
            CommandStatus::UserError,
            format!(
                "{} is not a valid bag ({} errors)",
                args.src.display(),
                report.errors.len()
            ),
        )
    };
    Ok(ExecutionOutcome {
        status,
        message,
        lines,
        details: json!(report),
    })
}
